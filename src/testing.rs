//! Mock devices and transports shared by the unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::{
    AudioInput, CaptureConstraints, DecodedBuffer, EncodedChunk, FrameSink, InputHandle,
    PlaybackOutput,
};
use crate::error::{LinkError, Result};
use crate::playback::ScheduledSourceId;
use crate::transport::{Connector, Session, StreamConfig, TransportCallbacks};

// ---------------- playback ----------------

#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Start(ScheduledSourceId, usize, f64),
    Stop(ScheduledSourceId),
    Monitor(usize, u32),
}

#[derive(Clone, Default)]
pub struct MockOutput {
    calls: Arc<Mutex<Vec<OutputCall>>>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.calls.lock().clone()
    }

    pub fn started(&self) -> Vec<(ScheduledSourceId, f64)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                OutputCall::Start(id, _, at) => Some((*id, *at)),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<ScheduledSourceId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                OutputCall::Stop(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl PlaybackOutput for MockOutput {
    fn start(&mut self, id: ScheduledSourceId, buffer: DecodedBuffer, at: f64) {
        self.calls
            .lock()
            .push(OutputCall::Start(id, buffer.samples.len(), at));
    }

    fn stop(&mut self, id: ScheduledSourceId) {
        self.calls.lock().push(OutputCall::Stop(id));
    }

    fn monitor(&mut self, samples: &[f32], sample_rate: u32) {
        self.calls
            .lock()
            .push(OutputCall::Monitor(samples.len(), sample_rate));
    }
}

// ---------------- capture ----------------

#[derive(Default)]
pub struct InputState {
    pub fail_acquire: bool,
    pub acquired: Vec<InputHandle>,
    pub released: Vec<InputHandle>,
    pub sink: Option<FrameSink>,
    next: u64,
}

/// Input device whose frames are pushed by the test through the stored sink.
#[derive(Clone, Default)]
pub struct MockInput {
    pub state: Arc<Mutex<InputState>>,
}

impl MockInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let input = Self::default();
        input.state.lock().fail_acquire = true;
        input
    }

    /// Deliver one frame of `value` samples, as the device thread would.
    pub fn push_frame(&self, value: f32, len: usize) -> bool {
        let sink = self.state.lock().sink.clone();
        match sink {
            Some(sink) => sink.deliver(vec![value; len], 16000, 0),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().sink.is_some()
    }
}

impl AudioInput for MockInput {
    fn acquire(&mut self, _constraints: &CaptureConstraints) -> Result<InputHandle> {
        let mut state = self.state.lock();
        if state.fail_acquire {
            return Err(LinkError::Device("microphone permission denied".into()));
        }
        state.next += 1;
        let handle = InputHandle(state.next);
        state.acquired.push(handle);
        Ok(handle)
    }

    fn create_source(&mut self, _handle: InputHandle, sink: FrameSink) -> Result<()> {
        self.state.lock().sink = Some(sink);
        Ok(())
    }

    fn release(&mut self, handle: InputHandle) {
        let mut state = self.state.lock();
        state.released.push(handle);
        state.sink = None;
    }
}

// ---------------- transport ----------------

#[derive(Default)]
pub struct LinkState {
    pub fail_connect: bool,
    pub fail_send: bool,
    pub fail_close: bool,
    pub connects: Vec<TransportCallbacks>,
    pub sent: Vec<EncodedChunk>,
    pub closed: usize,
}

#[derive(Clone, Default)]
pub struct MockConnector {
    pub state: Arc<Mutex<LinkState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks handed to the most recent transport.
    pub fn latest(&self) -> TransportCallbacks {
        self.state
            .lock()
            .connects
            .last()
            .cloned()
            .expect("no transport created")
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects.len()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _model: &str,
        _config: &StreamConfig,
        callbacks: TransportCallbacks,
    ) -> Result<Box<dyn Session>> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(LinkError::Connection("endpoint unreachable".into()));
        }
        state.connects.push(callbacks);
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

pub struct MockSession {
    state: Arc<Mutex<LinkState>>,
}

impl Session for MockSession {
    fn send(&mut self, chunk: &EncodedChunk) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_send {
            return Err(LinkError::Send("socket buffer full".into()));
        }
        state.sent.push(chunk.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed += 1;
        if state.fail_close {
            return Err(LinkError::Connection("already closing".into()));
        }
        Ok(())
    }
}
