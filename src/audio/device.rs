//! Device capabilities consumed by the pipeline.
//!
//! The capture side and the playback side are traits so the scheduling and
//! session logic can run against mocks; the ALSA implementations live in
//! `record.rs` and `play.rs`.

use std::sync::Arc;

use crate::capture::CaptureHandle;
use crate::clock::Clock;
use crate::error::Result;
use crate::events::{EventSender, LinkEvent};
use crate::playback::ScheduledSourceId;

use super::pcm::{AudioFrame, DecodedBuffer};

/// What the capture side asks of the input device.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// Samples per delivered frame
    pub frame_size: usize,
}

/// An acquired input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputHandle(pub u64);

/// Delivers frames from the device thread into the event queue.
#[derive(Clone)]
pub struct FrameSink {
    capture: CaptureHandle,
    events: EventSender,
    clock: Arc<dyn Clock>,
}

impl FrameSink {
    pub fn new(capture: CaptureHandle, events: EventSender, clock: Arc<dyn Clock>) -> Self {
        Self {
            capture,
            events,
            clock,
        }
    }

    /// Returns false once nobody is listening; the producer should stop.
    pub fn deliver(&self, samples: Vec<f32>, sample_rate: u32, sequence: u64) -> bool {
        let frame = AudioFrame {
            samples,
            sample_rate,
            channels: 1,
            sequence,
            timestamp: self.clock.now(),
        };
        self.events
            .send(LinkEvent::FrameCaptured {
                capture: self.capture,
                frame,
            })
            .is_ok()
    }

    /// Report that the device died mid-stream.
    pub fn fail(&self, detail: impl Into<String>) {
        let _ = self.events.send(LinkEvent::CaptureFailed {
            capture: self.capture,
            detail: detail.into(),
        });
    }
}

/// Capture device capability.
pub trait AudioInput: Send {
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<InputHandle>;

    /// Begin producing frames. After `release` returns, the sink is never
    /// called again.
    fn create_source(&mut self, handle: InputHandle, sink: FrameSink) -> Result<()>;

    fn release(&mut self, handle: InputHandle);
}

/// Playback device capability: a persistent mixing destination that
/// buffer-backed sources are started on. Its time base is the [`Clock`]
/// handed to the scheduler.
///
/// A source that plays to its end is reported as
/// [`LinkEvent::PlaybackEnded`]; a stopped source is not reported.
pub trait PlaybackOutput: Send {
    fn start(&mut self, id: ScheduledSourceId, buffer: DecodedBuffer, at: f64);

    fn stop(&mut self, id: ScheduledSourceId);

    /// Route captured audio straight to the output.
    fn monitor(&mut self, samples: &[f32], sample_rate: u32);
}
