use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::config::Config;
use crate::events::{EventSender, LinkEvent};
use crate::session::StatusSnapshot;

/// Commands an external UI process may send.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UiCommand {
    Reset,
    Capture { state: CaptureSwitch },
}

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSwitch {
    Start,
    Stop,
}

impl UiCommand {
    pub fn into_event(self) -> LinkEvent {
        match self {
            UiCommand::Reset => LinkEvent::ResetRequested,
            UiCommand::Capture { state } => LinkEvent::CaptureRequested(state == CaptureSwitch::Start),
        }
    }
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    state: &'a str,
    text: &'a str,
    error: Option<&'a str>,
}

pub fn status_message(snapshot: &StatusSnapshot) -> String {
    let msg = StatusMessage {
        msg_type: "status",
        state: &snapshot.state,
        text: &snapshot.status,
        error: snapshot.error.as_deref(),
    };
    // Only string fields, serialization cannot fail
    serde_json::to_string(&msg).unwrap_or_default()
}

pub struct StatusBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: EventSender,
}

// UI进程和本进程通过本地UDP通信，端口在配置中指定
impl StatusBridge {
    pub async fn new(config: &Config, tx: EventSender) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("0.0.0.0:{}", config.status_local_port)).await?;
        let target_addr = format!("127.0.0.1:{}", config.status_remote_port);
        log::info!(
            "Status bridge listening on {}, reporting to {}",
            config.status_local_port,
            target_addr
        );

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
        })
    }

    /// Receive UI commands until the event loop goes away.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let command = match serde_json::from_slice::<UiCommand>(&buf[..len]) {
                Ok(command) => command,
                Err(e) => {
                    log::warn!("Ignoring malformed UI command from {}: {}", from, e);
                    continue;
                }
            };
            log::debug!("UI command: {:?}", command);
            if self.tx.send(command.into_event()).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Push every status change to the UI.
    pub async fn publish(&self, mut status: watch::Receiver<StatusSnapshot>) -> anyhow::Result<()> {
        loop {
            let msg = status_message(&status.borrow_and_update());
            if let Err(e) = self.send_message(&msg).await {
                log::warn!("Failed to send status to UI: {}", e);
            }
            if status.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket.send_to(msg.as_bytes(), &self.target_addr).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let reset: UiCommand = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert!(matches!(reset.into_event(), LinkEvent::ResetRequested));

        let start: UiCommand =
            serde_json::from_str(r#"{"type":"capture","state":"start"}"#).unwrap();
        assert!(matches!(start.into_event(), LinkEvent::CaptureRequested(true)));

        let stop: UiCommand = serde_json::from_str(r#"{"type":"capture","state":"stop"}"#).unwrap();
        assert!(matches!(stop.into_event(), LinkEvent::CaptureRequested(false)));
    }

    #[test]
    fn test_unknown_commands_are_rejected() {
        assert!(serde_json::from_str::<UiCommand>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<UiCommand>(r#"{"type":"capture","state":"pause"}"#).is_err());
        assert!(serde_json::from_str::<UiCommand>("not json").is_err());
    }

    #[test]
    fn test_status_message_shape() {
        let snapshot = StatusSnapshot {
            state: "open".into(),
            status: "Listening".into(),
            error: Some("Send error: broken pipe".into()),
        };
        let value: serde_json::Value = serde_json::from_str(&status_message(&snapshot)).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["state"], "open");
        assert_eq!(value["text"], "Listening");
        assert_eq!(value["error"], "Send error: broken pipe");
    }

    #[tokio::test]
    async fn test_bridge_forwards_commands() {
        let (tx, mut rx) = crate::events::channel();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let bridge = StatusBridge {
            socket: Arc::new(socket),
            target_addr: "127.0.0.1:9".into(),
            tx,
        };
        tokio::spawn(async move { bridge.run().await });

        let ui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        ui.send_to(b"garbage", addr).await.unwrap();
        ui.send_to(br#"{"type":"reset"}"#, addr).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, LinkEvent::ResetRequested));
    }
}
