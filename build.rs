use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    session: Session,
    capture: Capture,
    playback: Playback,
    status: Status,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Session {
    ws_url: String,
    model: String,
    voice: String,
    api_key_env: String,
    settle_delay_ms: u64,
}

#[derive(Deserialize)]
struct Capture {
    device: String,
    sample_rate: u32,
    frame_size: usize,
    auto_start: bool,
    monitor_self: bool,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    sample_rate: u32,
    period_size: usize,
}

#[derive(Deserialize)]
struct Status {
    enabled: bool,
    local_port: u16,
    remote_port: u16,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 会话配置
    println!("cargo:rustc-env=SESSION_WS_URL={}", config.session.ws_url);
    println!("cargo:rustc-env=SESSION_MODEL={}", config.session.model);
    println!("cargo:rustc-env=SESSION_VOICE={}", config.session.voice);
    println!("cargo:rustc-env=SESSION_API_KEY_ENV={}", config.session.api_key_env);
    println!("cargo:rustc-env=SESSION_SETTLE_DELAY_MS={}", config.session.settle_delay_ms);

    // 采集配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.capture.device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.capture.sample_rate);
    println!("cargo:rustc-env=CAPTURE_FRAME_SIZE={}", config.capture.frame_size);
    println!("cargo:rustc-env=CAPTURE_AUTO_START={}", config.capture.auto_start);
    println!("cargo:rustc-env=CAPTURE_MONITOR_SELF={}", config.capture.monitor_self);

    // 播放配置
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}", config.playback.sample_rate);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);

    // 状态桥配置
    println!("cargo:rustc-env=STATUS_ENABLED={}", config.status.enabled);
    println!("cargo:rustc-env=STATUS_LOCAL_PORT={}", config.status.local_port);
    println!("cargo:rustc-env=STATUS_REMOTE_PORT={}", config.status.remote_port);
}
