use std::time::Duration;

use crate::audio::{CaptureConstraints, PlaybackConfig};
use crate::error::{LinkError, Result};
use crate::session::LifecycleSettings;
use crate::transport::{ResponseFormat, StreamConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 会话配置
    pub ws_url: &'static str,
    pub model: &'static str,
    pub voice: &'static str,
    pub api_key_env: &'static str,
    pub settle_delay_ms: u64,

    // 采集配置
    pub capture_device: &'static str,
    pub capture_sample_rate: u32,
    pub capture_frame_size: usize,
    pub capture_auto_start: bool,
    pub capture_monitor_self: bool,

    // 播放配置
    pub playback_device: &'static str,
    pub playback_sample_rate: u32,
    pub playback_period_size: usize,

    // 状态桥配置
    pub status_enabled: bool,
    pub status_local_port: u16,
    pub status_remote_port: u16,
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| LinkError::Configuration(format!("Failed to parse {} ({:?})", name, value)))
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self> {
        let config = Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            ws_url: env!("SESSION_WS_URL"),
            model: env!("SESSION_MODEL"),
            voice: env!("SESSION_VOICE"),
            api_key_env: env!("SESSION_API_KEY_ENV"),
            settle_delay_ms: parse("SESSION_SETTLE_DELAY_MS", env!("SESSION_SETTLE_DELAY_MS"))?,

            capture_device: env!("CAPTURE_DEVICE"),
            capture_sample_rate: parse("CAPTURE_SAMPLE_RATE", env!("CAPTURE_SAMPLE_RATE"))?,
            capture_frame_size: parse("CAPTURE_FRAME_SIZE", env!("CAPTURE_FRAME_SIZE"))?,
            capture_auto_start: parse("CAPTURE_AUTO_START", env!("CAPTURE_AUTO_START"))?,
            capture_monitor_self: parse("CAPTURE_MONITOR_SELF", env!("CAPTURE_MONITOR_SELF"))?,

            playback_device: env!("PLAYBACK_DEVICE"),
            playback_sample_rate: parse("PLAYBACK_SAMPLE_RATE", env!("PLAYBACK_SAMPLE_RATE"))?,
            playback_period_size: parse("PLAYBACK_PERIOD_SIZE", env!("PLAYBACK_PERIOD_SIZE"))?,

            status_enabled: parse("STATUS_ENABLED", env!("STATUS_ENABLED"))?,
            status_local_port: parse("STATUS_LOCAL_PORT", env!("STATUS_LOCAL_PORT"))?,
            status_remote_port: parse("STATUS_REMOTE_PORT", env!("STATUS_REMOTE_PORT"))?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(LinkError::Configuration("session.model is empty".into()));
        }
        if self.capture_sample_rate == 0 || self.playback_sample_rate == 0 {
            return Err(LinkError::Configuration("sample rates must be non-zero".into()));
        }
        if self.capture_frame_size == 0 || self.playback_period_size == 0 {
            return Err(LinkError::Configuration(
                "frame and period sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// 运行时从环境变量读取 API 密钥
    pub fn api_key(&self) -> Result<String> {
        Self::read_key(self.api_key_env, std::env::var(self.api_key_env).ok())
    }

    fn read_key(name: &str, value: Option<String>) -> Result<String> {
        match value.map(|v| v.trim().to_string()) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(LinkError::Configuration(format!(
                "API key missing: set the {} environment variable",
                name
            ))),
        }
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            device: self.capture_device.to_string(),
            sample_rate: self.capture_sample_rate,
            channels: 1,
            frame_size: self.capture_frame_size,
        }
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            device: self.playback_device.to_string(),
            sample_rate: self.playback_sample_rate,
            period_size: self.playback_period_size,
        }
    }

    pub fn lifecycle(&self) -> LifecycleSettings {
        LifecycleSettings {
            model: self.model.to_string(),
            stream: StreamConfig {
                response_format: ResponseFormat::Audio,
                voice: self.voice.to_string(),
            },
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            auto_capture: self.capture_auto_start,
            monitor_self: self.capture_monitor_self,
        }
    }
}
