//! Opaque duplex channel to the remote audio session.
//!
//! A [`Connector`] builds one [`Session`] per connection attempt. The session
//! reports back through [`TransportCallbacks`], which tag every signal with the
//! [`TransportId`] of the instance that produced it so the lifecycle manager
//! can drop signals from a transport it has already replaced.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::audio::{EncodedChunk, InboundAudio};
use crate::error::Result;
use crate::events::{EventSender, LinkEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(Uuid);

impl TransportId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseFormat {
    #[default]
    Audio,
}

/// Session options handed through to the remote service untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub response_format: ResponseFormat,
    pub voice: String,
}

/// One inbound message, reduced to what the audio pipeline consumes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerMessage {
    pub audio: Option<InboundAudio>,
    pub interrupted: bool,
    /// Set when the frame could not be parsed; reported as a decode error
    pub malformed: Option<String>,
}

impl ServerMessage {
    pub fn audio(audio: InboundAudio) -> Self {
        Self {
            audio: Some(audio),
            ..Self::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            malformed: Some(detail.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Open,
    Message(ServerMessage),
    Error(String),
    Close {
        code: u16,
        reason: String,
        clean: bool,
    },
}

/// Callback set given to a transport at connect time.
#[derive(Debug, Clone)]
pub struct TransportCallbacks {
    id: TransportId,
    events: EventSender,
}

impl TransportCallbacks {
    pub fn new(id: TransportId, events: EventSender) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn on_open(&self) {
        self.emit(TransportSignal::Open);
    }

    pub fn on_message(&self, message: ServerMessage) {
        self.emit(TransportSignal::Message(message));
    }

    pub fn on_error(&self, detail: impl Into<String>) {
        self.emit(TransportSignal::Error(detail.into()));
    }

    pub fn on_close(&self, code: u16, reason: impl Into<String>, clean: bool) {
        self.emit(TransportSignal::Close {
            code,
            reason: reason.into(),
            clean,
        });
    }

    fn emit(&self, signal: TransportSignal) {
        let event = LinkEvent::Transport {
            transport: self.id,
            signal,
        };
        if self.events.send(event).is_err() {
            log::debug!("Transport {}: event loop gone, signal dropped", self.id);
        }
    }
}

/// Creates transport instances.
pub trait Connector: Send {
    /// Start connecting. Returns immediately; readiness arrives as `on_open`.
    fn connect(
        &self,
        model: &str,
        config: &StreamConfig,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn Session>>;
}

/// A live transport instance.
pub trait Session: Send {
    fn send(&mut self, chunk: &EncodedChunk) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}
