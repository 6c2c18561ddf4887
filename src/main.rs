use std::sync::Arc;

use tokio::signal;

use voice_link_rs::audio::{AlsaInput, AlsaOutput, DecodeQueue, PcmDecoder};
use voice_link_rs::capture::CaptureEncoder;
use voice_link_rs::config::Config;
use voice_link_rs::events;
use voice_link_rs::net_link::WsConnector;
use voice_link_rs::playback::PlaybackScheduler;
use voice_link_rs::session::SessionLifecycleManager;
use voice_link_rs::status_bridge::StatusBridge;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info，可通过 RUST_LOG 覆盖
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 加载配置和密钥，失败直接退出
    let config = Config::new()?;
    let api_key = config.api_key()?;
    log::info!("{} v{} starting", config.app_name, config.app_version);

    // 所有组件的事件都汇入同一个通道，由主循环串行处理
    let (tx, mut rx) = events::channel();

    // 播放设备同时提供时钟
    let output = AlsaOutput::open(&config.playback(), tx.clone())?;
    let clock = output.clock();

    let capture = CaptureEncoder::new(
        Box::new(AlsaInput::new()),
        config.capture_constraints(),
        tx.clone(),
        clock.clone(),
    );
    let scheduler = PlaybackScheduler::new(clock, Box::new(output));
    let decoder = DecodeQueue::spawn(
        Box::new(PcmDecoder::new(config.playback_sample_rate)),
        tx.clone(),
    );
    let connector = WsConnector::new(config.ws_url, &api_key)?;

    let mut manager = SessionLifecycleManager::new(
        config.lifecycle(),
        Box::new(connector),
        capture,
        scheduler,
        decoder,
        tx.clone(),
    );

    // 启动状态桥，与UI进程通信
    if config.status_enabled {
        let bridge = Arc::new(StatusBridge::new(&config, tx.clone()).await?);
        let bridge_clone = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge_clone.run().await {
                log::error!("StatusBridge error: {}", e);
            }
        });
        let status = manager.subscribe_status();
        tokio::spawn(async move {
            if let Err(e) = bridge.publish(status).await {
                log::error!("StatusBridge publish error: {}", e);
            }
        });
    }

    // 连接失败时保持 errored，等待 UI 发起 reset
    if let Err(e) = manager.connect() {
        log::error!("Initial connect failed: {}", e);
    }

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            event = rx.recv() => match event {
                Some(event) => manager.dispatch(event),
                None => break,
            },
        }
    }

    manager.shutdown();
    Ok(())
}
