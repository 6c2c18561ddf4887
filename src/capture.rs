//! Microphone capture and outbound encoding.

use std::sync::Arc;

use crate::audio::{AudioFrame, AudioInput, CaptureConstraints, EncodedChunk, FrameSink, InputHandle};
use crate::clock::Clock;
use crate::error::{LinkError, Result};
use crate::events::EventSender;
use crate::session::SessionContext;

/// Identifies one capture run; frames from an earlier run are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(u64);

struct ActiveCapture {
    handle: CaptureHandle,
    input: InputHandle,
}

pub struct CaptureEncoder {
    input: Box<dyn AudioInput>,
    constraints: CaptureConstraints,
    events: EventSender,
    clock: Arc<dyn Clock>,
    active: Option<ActiveCapture>,
    next_handle: u64,
    frames_sent: u64,
}

impl CaptureEncoder {
    pub fn new(
        input: Box<dyn AudioInput>,
        constraints: CaptureConstraints,
        events: EventSender,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            input,
            constraints,
            events,
            clock,
            active: None,
            next_handle: 1,
            frames_sent: 0,
        }
    }

    /// Acquire the input device and start delivering frames.
    pub fn start(&mut self) -> Result<CaptureHandle> {
        if let Some(active) = &self.active {
            return Ok(active.handle);
        }

        let input = self.input.acquire(&self.constraints)?;
        let handle = CaptureHandle(self.next_handle);
        self.next_handle += 1;

        let sink = FrameSink::new(handle, self.events.clone(), self.clock.clone());
        if let Err(e) = self.input.create_source(input, sink) {
            self.input.release(input);
            return Err(e);
        }

        log::info!(
            "Capture started: device={}, rate={}, frame_size={}",
            self.constraints.device,
            self.constraints.sample_rate,
            self.constraints.frame_size
        );
        self.active = Some(ActiveCapture { handle, input });
        Ok(handle)
    }

    /// Release the device. Returns whether capture was running.
    pub fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                self.input.release(active.input);
                log::info!("Capture stopped ({} frames sent so far)", self.frames_sent);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_current(&self, handle: CaptureHandle) -> bool {
        matches!(&self.active, Some(active) if active.handle == handle)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Encode one frame and hand it to the open session.
    ///
    /// Returns `Ok(false)` when the frame is dropped (stale run, capture
    /// stopped, or session not open). A failed send stops capture.
    pub fn on_frame(
        &mut self,
        handle: CaptureHandle,
        frame: &AudioFrame,
        ctx: &mut SessionContext,
    ) -> Result<bool> {
        if !self.is_current(handle) {
            return Ok(false);
        }
        let Some(session) = ctx.open_session() else {
            return Ok(false);
        };

        let chunk = EncodedChunk::pcm16(&frame.samples, frame.sample_rate);
        if let Err(e) = session.send(&chunk) {
            log::error!("Sending frame {} failed: {}", frame.sequence, e);
            self.stop();
            return Err(match e {
                LinkError::Send(detail) => LinkError::Send(detail),
                other => LinkError::Send(other.to_string()),
            });
        }
        self.frames_sent += 1;
        Ok(true)
    }
}

impl Drop for CaptureEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::CAPTURE_FRAME_SIZE;
    use crate::clock::ManualClock;
    use crate::events::{self, EventReceiver, LinkEvent};
    use crate::session::SessionState;
    use crate::testing::{MockConnector, MockInput};
    use crate::transport::{Connector, ResponseFormat, StreamConfig, TransportCallbacks, TransportId};

    fn constraints() -> CaptureConstraints {
        CaptureConstraints {
            device: "default".into(),
            sample_rate: 16000,
            channels: 1,
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }

    fn encoder(input: MockInput) -> (CaptureEncoder, EventReceiver) {
        let (tx, rx) = events::channel();
        let encoder = CaptureEncoder::new(Box::new(input), constraints(), tx, ManualClock::new(0.0));
        (encoder, rx)
    }

    fn open_context(connector: &MockConnector) -> SessionContext {
        let (tx, _rx) = events::channel();
        let id = TransportId::new();
        let config = StreamConfig {
            response_format: ResponseFormat::Audio,
            voice: "v".into(),
        };
        let session = connector
            .connect("m", &config, TransportCallbacks::new(id, tx))
            .unwrap();
        let mut ctx = SessionContext::default();
        ctx.install(id, session);
        ctx.state = SessionState::Open;
        ctx
    }

    fn next_frame(rx: &mut EventReceiver) -> (CaptureHandle, AudioFrame) {
        match rx.try_recv().unwrap() {
            LinkEvent::FrameCaptured { capture, frame } => (capture, frame),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_frames_are_encoded_and_sent() {
        let input = MockInput::new();
        let connector = MockConnector::new();
        let mut ctx = open_context(&connector);
        let (mut encoder, mut rx) = encoder(input.clone());

        encoder.start().unwrap();
        for _ in 0..10 {
            input.push_frame(0.5, CAPTURE_FRAME_SIZE);
        }
        for _ in 0..10 {
            let (handle, frame) = next_frame(&mut rx);
            assert!(encoder.on_frame(handle, &frame, &mut ctx).unwrap());
        }

        assert_eq!(encoder.frames_sent(), 10);
        let state = connector.state.lock();
        assert_eq!(state.sent.len(), 10);
        assert_eq!(state.sent[0].mime_type, "audio/pcm;rate=16000");
        assert_eq!(state.sent[0].data.len(), CAPTURE_FRAME_SIZE * 2);
        assert_eq!(&state.sent[0].data[..2], &16384i16.to_le_bytes());
    }

    #[test]
    fn test_frames_dropped_unless_open() {
        let input = MockInput::new();
        let connector = MockConnector::new();
        let mut ctx = open_context(&connector);
        ctx.state = SessionState::Connecting;
        let (mut encoder, mut rx) = encoder(input.clone());

        encoder.start().unwrap();
        input.push_frame(0.1, CAPTURE_FRAME_SIZE);
        let (handle, frame) = next_frame(&mut rx);
        assert!(!encoder.on_frame(handle, &frame, &mut ctx).unwrap());
        assert_eq!(connector.sent_count(), 0);
    }

    #[test]
    fn test_queued_frame_after_stop_is_dropped() {
        let input = MockInput::new();
        let connector = MockConnector::new();
        let mut ctx = open_context(&connector);
        let (mut encoder, mut rx) = encoder(input.clone());

        encoder.start().unwrap();
        input.push_frame(0.1, CAPTURE_FRAME_SIZE);
        assert!(encoder.stop());
        assert!(!input.is_running());

        // Restart: the frame from the first run is still queued
        encoder.start().unwrap();
        let (stale, frame) = next_frame(&mut rx);
        assert!(!encoder.on_frame(stale, &frame, &mut ctx).unwrap());
        assert_eq!(connector.sent_count(), 0);
    }

    #[test]
    fn test_send_failure_stops_capture() {
        let input = MockInput::new();
        let connector = MockConnector::new();
        let mut ctx = open_context(&connector);
        connector.state.lock().fail_send = true;
        let (mut encoder, mut rx) = encoder(input.clone());

        encoder.start().unwrap();
        input.push_frame(0.1, CAPTURE_FRAME_SIZE);
        let (handle, frame) = next_frame(&mut rx);

        let err = encoder.on_frame(handle, &frame, &mut ctx).unwrap_err();
        assert!(matches!(err, LinkError::Send(_)));
        assert!(!encoder.is_active());
        assert!(!input.is_running());
        assert_eq!(input.state.lock().released.len(), 1);
    }

    #[test]
    fn test_device_error_is_reported() {
        let (mut encoder, _rx) = encoder(MockInput::failing());
        assert!(matches!(encoder.start(), Err(LinkError::Device(_))));
        assert!(!encoder.is_active());
    }

    #[test]
    fn test_start_is_idempotent() {
        let input = MockInput::new();
        let (mut encoder, _rx) = encoder(input.clone());
        let first = encoder.start().unwrap();
        let second = encoder.start().unwrap();
        assert_eq!(first, second);
        assert_eq!(input.state.lock().acquired.len(), 1);
    }
}
