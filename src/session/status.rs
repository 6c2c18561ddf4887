//! The single user-visible status line.

use serde::Serialize;
use tokio::sync::watch;

use super::state::SessionState;
use crate::error::LinkError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    pub status: String,
    pub error: Option<String>,
}

impl StatusSnapshot {
    /// What a UI should show: the error wins over informational status.
    pub fn display(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.status)
    }
}

/// Holds the current status and error and publishes every change.
pub struct StatusBoard {
    current: StatusSnapshot,
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let current = StatusSnapshot {
            state: SessionState::Disconnected.to_string(),
            status: "Idle".into(),
            error: None,
        };
        let (tx, _rx) = watch::channel(current.clone());
        Self { current, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.current
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.current.state = state.to_string();
        self.publish();
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.current.status = status.into();
        log::info!("Status: {}", self.current.status);
        self.publish();
    }

    pub fn set_error(&mut self, error: &LinkError) {
        self.current.error = Some(error.to_string());
        match error {
            LinkError::Decode(_) => log::warn!("{}", error),
            _ => log::error!("{}", error),
        }
        self.publish();
    }

    pub fn clear_error(&mut self) {
        if self.current.error.take().is_some() {
            self.publish();
        }
    }

    fn publish(&self) {
        // No subscribers is fine
        self.tx.send_replace(self.current.clone());
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_takes_precedence() {
        let mut board = StatusBoard::new();
        board.set_status("Session open");
        assert_eq!(board.snapshot().display(), "Session open");

        board.set_error(&LinkError::Decode("bad chunk".into()));
        board.set_status("Interrupted");
        assert_eq!(board.snapshot().display(), "Decode error: bad chunk");

        board.clear_error();
        assert_eq!(board.snapshot().display(), "Interrupted");
    }

    #[test]
    fn test_subscribers_see_changes() {
        let mut board = StatusBoard::new();
        let rx = board.subscribe();
        board.set_state(SessionState::Open);
        assert_eq!(rx.borrow().state, "open");
    }
}
