use thiserror::Error;

use crate::session::SessionState;

/// Error taxonomy shared by every component of the link.
///
/// Device and decode errors stay local to one frame or chunk; connection
/// errors move the session state. Every variant ends up on the status board.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Session is not open (state: {0})")]
    NotOpen(SessionState),
}

pub type Result<T> = std::result::Result<T, LinkError>;
