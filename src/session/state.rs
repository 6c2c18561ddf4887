//! Session state machine.
//!
//! `transition` is pure: it maps the current state and one transport signal
//! to the next state plus the side effects the lifecycle manager must apply,
//! in order.

use std::fmt;

use crate::error::LinkError;
use crate::transport::TransportSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Stop the microphone before the state leaves `Open`
    StopCapture,
    /// Informational status line
    Status(String),
    /// Error status line
    Fail(LinkError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(state: SessionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }
}

/// Lifecycle signals only; inbound messages never change the state.
pub fn transition(state: SessionState, signal: &TransportSignal) -> Transition {
    use SessionState::*;

    match (state, signal) {
        (Connecting, TransportSignal::Open) => Transition {
            next: Open,
            effects: vec![Effect::Status("Session open".into())],
        },
        (Connecting, TransportSignal::Error(detail)) => Transition {
            next: Errored,
            effects: vec![Effect::Fail(LinkError::Connection(detail.clone()))],
        },
        (Connecting, TransportSignal::Close { code, reason, .. }) => Transition {
            next: Errored,
            effects: vec![Effect::Fail(LinkError::Connection(format!(
                "closed before open ({}) {}",
                code, reason
            )))],
        },
        (Open, TransportSignal::Error(detail)) => Transition {
            next: Errored,
            effects: vec![
                Effect::StopCapture,
                Effect::Fail(LinkError::Connection(detail.clone())),
            ],
        },
        (Open, TransportSignal::Close { code, reason, clean }) => Transition {
            next: Closed,
            effects: vec![
                Effect::StopCapture,
                Effect::Status(format!(
                    "Session closed ({}{}) {}",
                    code,
                    if *clean { "" } else { ", unclean" },
                    reason
                )),
            ],
        },
        _ => Transition::stay(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close() -> TransportSignal {
        TransportSignal::Close {
            code: 1000,
            reason: "done".into(),
            clean: true,
        }
    }

    fn error() -> TransportSignal {
        TransportSignal::Error("boom".into())
    }

    #[test]
    fn test_connecting_transitions() {
        let t = transition(SessionState::Connecting, &TransportSignal::Open);
        assert_eq!(t.next, SessionState::Open);

        let t = transition(SessionState::Connecting, &error());
        assert_eq!(t.next, SessionState::Errored);
        assert_eq!(t.effects, vec![Effect::Fail(LinkError::Connection("boom".into()))]);

        let t = transition(SessionState::Connecting, &close());
        assert_eq!(t.next, SessionState::Errored);
    }

    #[test]
    fn test_leaving_open_stops_capture_first() {
        for signal in [error(), close()] {
            let t = transition(SessionState::Open, &signal);
            assert_ne!(t.next, SessionState::Open);
            assert_eq!(t.effects.first(), Some(&Effect::StopCapture));
        }
        assert_eq!(transition(SessionState::Open, &close()).next, SessionState::Closed);
        assert_eq!(transition(SessionState::Open, &error()).next, SessionState::Errored);
    }

    #[test]
    fn test_terminal_states_absorb_signals() {
        for state in [SessionState::Errored, SessionState::Closed, SessionState::Disconnected] {
            for signal in [TransportSignal::Open, error(), close()] {
                let t = transition(state, &signal);
                assert_eq!(t.next, state);
                assert!(t.effects.is_empty());
            }
        }
    }

    #[test]
    fn test_duplicate_open_is_ignored() {
        let t = transition(SessionState::Open, &TransportSignal::Open);
        assert_eq!(t.next, SessionState::Open);
        assert!(t.effects.is_empty());
    }
}
