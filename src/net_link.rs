use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use url::Url;

use crate::audio::EncodedChunk;
use crate::error::{LinkError, Result};
use crate::protocol::{RealtimeInputMessage, ServerFrame, SetupMessage};
use crate::transport::{Connector, ServerMessage, Session, StreamConfig, TransportCallbacks};

/// Abnormal closure, reported when the socket drops without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Debug)]
enum NetCommand {
    SendText(String),
    Close,
}

/// Builds WebSocket sessions against the live endpoint.
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// `api_key` is appended to the endpoint as the `key` query parameter.
    pub fn new(ws_url: &str, api_key: &str) -> Result<Self> {
        let mut url = Url::parse(ws_url)
            .map_err(|e| LinkError::Configuration(format!("invalid ws_url '{}': {}", ws_url, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(LinkError::Configuration(format!(
                    "ws_url must use ws:// or wss://, got {}://",
                    other
                )));
            }
        }
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(Self { url })
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        model: &str,
        config: &StreamConfig,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn Session>> {
        let setup = serde_json::to_string(&SetupMessage::new(model, config))
            .map_err(|e| LinkError::Connection(format!("failed to encode setup: {}", e)))?;

        let (tx_cmd, rx_cmd) = mpsc::unbounded_channel();
        let url = self.url.to_string();
        log::info!("Transport {}: connecting to {}", callbacks.id(), self.url.host_str().unwrap_or("?"));

        let task = tokio::spawn(run_link(url, setup, rx_cmd, callbacks));
        Ok(Box::new(WsSession {
            tx_cmd,
            task: Some(task),
        }))
    }
}

pub struct WsSession {
    tx_cmd: mpsc::UnboundedSender<NetCommand>,
    task: Option<JoinHandle<()>>,
}

impl Session for WsSession {
    fn send(&mut self, chunk: &EncodedChunk) -> Result<()> {
        let text = serde_json::to_string(&RealtimeInputMessage::from_chunk(chunk))
            .map_err(|e| LinkError::Send(e.to_string()))?;
        self.tx_cmd
            .send(NetCommand::SendText(text))
            .map_err(|_| LinkError::Send("link task has exited".into()))
    }

    fn close(&mut self) -> Result<()> {
        let result = self
            .tx_cmd
            .send(NetCommand::Close)
            .map_err(|_| LinkError::Connection("link task already exited".into()));
        // The task closes the socket itself; it is only aborted if it is gone
        if result.is_err() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
        result
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if self.tx_cmd.send(NetCommand::Close).is_err() {
                task.abort();
            }
        }
    }
}

// 连接并进入读写主循环，所有结果都通过回调上报
async fn run_link(
    url: String,
    setup: String,
    mut rx_cmd: mpsc::UnboundedReceiver<NetCommand>,
    callbacks: TransportCallbacks,
) {
    let id = callbacks.id();
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::error!("Transport {}: connect failed: {}", id, e);
            callbacks.on_error(format!("connect failed: {}", e));
            return;
        }
    };
    log::info!("Transport {}: socket open, sending setup", id);

    let (mut write, mut read) = ws_stream.split();
    if let Err(e) = write.send(Message::Text(setup.into())).await {
        callbacks.on_error(format!("failed to send setup: {}", e));
        return;
    }

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(text.as_bytes(), &callbacks),
                    Some(Ok(Message::Binary(data))) => handle_frame(&data, &callbacks),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.as_str().to_string()),
                            None => (u16::from(CloseCode::Status), String::new()),
                        };
                        log::info!("Transport {}: server closed ({}) {}", id, code, reason);
                        callbacks.on_close(code, reason, true);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("Transport {}: read error: {}", id, e);
                        callbacks.on_error(e.to_string());
                        callbacks.on_close(CLOSE_ABNORMAL, "", false);
                        return;
                    }
                    None => {
                        callbacks.on_close(CLOSE_ABNORMAL, "stream ended", false);
                        return;
                    }
                }
            }
            cmd = rx_cmd.recv() => {
                match cmd {
                    Some(NetCommand::SendText(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            log::error!("Transport {}: write error: {}", id, e);
                            callbacks.on_error(e.to_string());
                            callbacks.on_close(CLOSE_ABNORMAL, "", false);
                            return;
                        }
                    }
                    Some(NetCommand::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closed".into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            log::debug!("Transport {}: close frame not sent: {}", id, e);
                        }
                        callbacks.on_close(u16::from(CloseCode::Normal), "client closed", true);
                        return;
                    }
                }
            }
        }
    }
}

fn handle_frame(payload: &[u8], callbacks: &TransportCallbacks) {
    let frame: ServerFrame = match serde_json::from_slice(payload) {
        Ok(frame) => frame,
        Err(e) => {
            let detail = format!("unparseable frame ({} bytes): {}", payload.len(), e);
            log::warn!("Transport {}: {}", callbacks.id(), detail);
            callbacks.on_message(ServerMessage::malformed(detail));
            return;
        }
    };

    if frame.setup_complete.is_some() {
        log::info!("Transport {}: setup complete", callbacks.id());
        callbacks.on_open();
    }
    if frame.go_away.is_some() {
        log::warn!("Transport {}: server announced go-away", callbacks.id());
    }
    for message in frame.into_messages() {
        callbacks.on_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, LinkEvent};
    use crate::transport::{TransportId, TransportSignal};

    #[test]
    fn test_connector_appends_key() {
        let connector = WsConnector::new("wss://example.com/live?alt=json", "secret").unwrap();
        assert_eq!(connector.url.as_str(), "wss://example.com/live?alt=json&key=secret");
    }

    #[test]
    fn test_connector_rejects_http_url() {
        assert!(matches!(
            WsConnector::new("https://example.com", "k"),
            Err(LinkError::Configuration(_))
        ));
        assert!(WsConnector::new("not a url", "k").is_err());
    }

    #[test]
    fn test_handle_frame_emits_open_and_messages() {
        let (tx, mut rx) = events::channel();
        let callbacks = TransportCallbacks::new(TransportId::new(), tx);

        handle_frame(br#"{"setupComplete":{}}"#, &callbacks);
        handle_frame(br#"{"serverContent":{"interrupted":true}}"#, &callbacks);
        handle_frame(b"garbage", &callbacks);

        let mut signals = Vec::new();
        while let Ok(LinkEvent::Transport { signal, .. }) = rx.try_recv() {
            signals.push(signal);
        }
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0], TransportSignal::Open);
        assert!(matches!(&signals[1], TransportSignal::Message(m) if m.interrupted));
        assert!(matches!(&signals[2], TransportSignal::Message(m) if m.malformed.is_some()));
    }

    #[test]
    fn test_truncated_audio_frame_is_reported() {
        let (tx, mut rx) = events::channel();
        let callbacks = TransportCallbacks::new(TransportId::new(), tx);

        let truncated = br#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","da"#;
        handle_frame(truncated, &callbacks);

        match rx.try_recv().unwrap() {
            LinkEvent::Transport {
                signal: TransportSignal::Message(message),
                ..
            } => {
                assert!(message.audio.is_none());
                assert!(!message.interrupted);
                assert!(message.malformed.unwrap().starts_with("unparseable frame"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
