//! The single event type consumed by the session event loop.
//!
//! Every producer (capture thread, mixer thread, WebSocket task, decode
//! worker, reconnect timer, status bridge) posts into one queue, and
//! [`SessionLifecycleManager::dispatch`](crate::session::SessionLifecycleManager::dispatch)
//! is the only place that reacts to them.

use tokio::sync::mpsc;

use crate::audio::{AudioFrame, DecodedBuffer};
use crate::capture::CaptureHandle;
use crate::error::LinkError;
use crate::playback::ScheduledSourceId;
use crate::transport::{TransportId, TransportSignal};

#[derive(Debug)]
pub enum LinkEvent {
    /// A frame read by the input device
    FrameCaptured {
        capture: CaptureHandle,
        frame: AudioFrame,
    },
    /// A callback from a transport instance
    Transport {
        transport: TransportId,
        signal: TransportSignal,
    },
    /// Result of one inbound decode, stamped with the playback generation
    /// that was current when the decode was submitted
    Decoded {
        generation: u64,
        result: Result<DecodedBuffer, LinkError>,
    },
    /// A scheduled source finished playing on its own
    PlaybackEnded(ScheduledSourceId),
    /// The settling delay after a reset has elapsed
    ReconnectDue { reset_epoch: u64 },
    /// The input device stopped producing frames
    CaptureFailed {
        capture: CaptureHandle,
        detail: String,
    },
    /// UI asked for a full session reset
    ResetRequested,
    /// UI asked to start or stop the microphone
    CaptureRequested(bool),
}

pub type EventSender = mpsc::UnboundedSender<LinkEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
