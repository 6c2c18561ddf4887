//! Session lifecycle: connection state, the event dispatch point, and the
//! reset/reconnect procedure.
//!
//! All mutable pipeline state (session state, current transport, playback
//! cursor, active sources) is owned here and only touched from
//! [`SessionLifecycleManager::dispatch`] and the public operations, which run
//! on the single event loop.

mod state;
mod status;

pub use state::{Effect, SessionState, Transition, transition};
pub use status::{StatusBoard, StatusSnapshot};

use std::time::Duration;

use tokio::sync::watch;

use crate::audio::{AudioFrame, DecodeQueue, DecodedBuffer};
use crate::capture::{CaptureEncoder, CaptureHandle};
use crate::error::{LinkError, Result};
use crate::events::{EventSender, LinkEvent};
use crate::interruption::InterruptionController;
use crate::playback::PlaybackScheduler;
use crate::transport::{
    Connector, ServerMessage, Session, StreamConfig, TransportCallbacks, TransportId,
    TransportSignal,
};

/// The transport instance currently owned by the session.
pub struct CurrentTransport {
    pub id: TransportId,
    pub session: Box<dyn Session>,
}

/// Session state plus the one current transport.
#[derive(Default)]
pub struct SessionContext {
    pub state: SessionState,
    transport: Option<CurrentTransport>,
}

impl SessionContext {
    /// Make `session` the current transport, returning the one it replaces.
    pub fn install(&mut self, id: TransportId, session: Box<dyn Session>) -> Option<CurrentTransport> {
        self.transport.replace(CurrentTransport { id, session })
    }

    pub fn take_transport(&mut self) -> Option<CurrentTransport> {
        self.transport.take()
    }

    pub fn current_id(&self) -> Option<TransportId> {
        self.transport.as_ref().map(|t| t.id)
    }

    pub fn is_current(&self, id: TransportId) -> bool {
        self.current_id() == Some(id)
    }

    /// The transport, but only while the session is `Open`.
    pub fn open_session(&mut self) -> Option<&mut (dyn Session + 'static)> {
        if self.state != SessionState::Open {
            return None;
        }
        self.transport.as_mut().map(|t| t.session.as_mut())
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub model: String,
    pub stream: StreamConfig,
    /// Pause between tearing a session down and connecting again
    pub settle_delay: Duration,
    /// Start the microphone as soon as the session opens
    pub auto_capture: bool,
    /// Also route captured audio to the local output
    pub monitor_self: bool,
}

pub struct SessionLifecycleManager {
    settings: LifecycleSettings,
    connector: Box<dyn Connector>,
    ctx: SessionContext,
    capture: CaptureEncoder,
    scheduler: PlaybackScheduler,
    interruption: InterruptionController,
    decoder: DecodeQueue,
    status: StatusBoard,
    events: EventSender,
    reset_epoch: u64,
    /// Set by a failed send; capture stays refused until `reset()`
    send_failed: bool,
    shutting_down: bool,
}

impl SessionLifecycleManager {
    pub fn new(
        settings: LifecycleSettings,
        connector: Box<dyn Connector>,
        capture: CaptureEncoder,
        scheduler: PlaybackScheduler,
        decoder: DecodeQueue,
        events: EventSender,
    ) -> Self {
        Self {
            settings,
            connector,
            ctx: SessionContext::default(),
            capture,
            scheduler,
            interruption: InterruptionController::new(),
            decoder,
            status: StatusBoard::new(),
            events,
            reset_epoch: 0,
            send_failed: false,
            shutting_down: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state
    }

    pub fn status(&self) -> &StatusSnapshot {
        self.status.snapshot()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn capture(&self) -> &CaptureEncoder {
        &self.capture
    }

    pub fn interruption(&self) -> &InterruptionController {
        &self.interruption
    }

    /// Open a new transport. Only valid from `Disconnected`.
    pub fn connect(&mut self) -> Result<()> {
        match self.ctx.state {
            SessionState::Disconnected => {}
            SessionState::Connecting | SessionState::Open => {
                log::debug!("connect() ignored, session already {}", self.ctx.state);
                return Ok(());
            }
            state @ (SessionState::Closed | SessionState::Errored) => {
                return Err(LinkError::Connection(format!(
                    "session is {}, reset required before connecting",
                    state
                )));
            }
        }

        let id = TransportId::new();
        let callbacks = TransportCallbacks::new(id, self.events.clone());
        match self
            .connector
            .connect(&self.settings.model, &self.settings.stream, callbacks)
        {
            Ok(session) => {
                if let Some(mut old) = self.ctx.install(id, session) {
                    log::warn!("Replacing leftover transport {}", old.id);
                    if let Err(e) = old.session.close() {
                        log::warn!("Closing transport {} failed (ignored): {}", old.id, e);
                    }
                }
                log::info!("Transport {} created for model {}", id, self.settings.model);
                self.set_state(SessionState::Connecting);
                self.status.set_status("Connecting");
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    LinkError::Connection(_) => e,
                    other => LinkError::Connection(other.to_string()),
                };
                self.set_state(SessionState::Errored);
                self.status.set_error(&e);
                Err(e)
            }
        }
    }

    /// Single dispatch point for every event source.
    pub fn dispatch(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::FrameCaptured { capture, frame } => self.on_frame(capture, frame),
            LinkEvent::Transport { transport, signal } => self.on_transport(transport, signal),
            LinkEvent::Decoded { generation, result } => self.on_decoded(generation, result),
            LinkEvent::PlaybackEnded(id) => {
                if self.scheduler.complete(id) && self.scheduler.active_count() == 0 {
                    log::debug!("Playback drained");
                }
            }
            LinkEvent::ReconnectDue { reset_epoch } => self.on_reconnect_due(reset_epoch),
            LinkEvent::CaptureFailed { capture, detail } => {
                if self.capture.is_current(capture) {
                    self.capture.stop();
                    self.status.set_error(&LinkError::Device(detail));
                }
            }
            LinkEvent::ResetRequested => self.reset(),
            LinkEvent::CaptureRequested(true) => {
                if let Err(e @ LinkError::NotOpen(_)) = self.start_capture() {
                    self.status.set_error(&e);
                }
            }
            LinkEvent::CaptureRequested(false) => self.stop_capture(),
        }
    }

    /// Start the microphone. Requires an open session.
    pub fn start_capture(&mut self) -> Result<CaptureHandle> {
        if self.ctx.state != SessionState::Open {
            return Err(LinkError::NotOpen(self.ctx.state));
        }
        if self.send_failed {
            let e = LinkError::Send("previous send failed, reset required".into());
            self.status.set_error(&e);
            return Err(e);
        }
        if self.capture.is_active() {
            return self.capture.start();
        }
        match self.capture.start() {
            Ok(handle) => {
                self.status.set_status("Listening");
                Ok(handle)
            }
            Err(e) => {
                self.status.set_error(&e);
                Err(e)
            }
        }
    }

    pub fn stop_capture(&mut self) {
        if self.capture.stop() {
            self.status.set_status("Microphone off");
        }
    }

    /// Tear everything down and reconnect after the settling delay.
    pub fn reset(&mut self) {
        log::info!("Resetting session (was {})", self.ctx.state);
        self.teardown();
        self.status.clear_error();
        self.status.set_status("Reconnecting");

        self.reset_epoch += 1;
        let epoch = self.reset_epoch;
        let delay = self.settings.settle_delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(LinkEvent::ReconnectDue { reset_epoch: epoch });
        });
    }

    /// Final teardown; no reconnect follows.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
        self.teardown();
        self.status.set_status("Stopped");
    }

    fn teardown(&mut self) {
        self.capture.stop();
        self.send_failed = false;
        self.scheduler.cancel_all();
        self.scheduler.reset();
        if let Some(mut current) = self.ctx.take_transport() {
            if let Err(e) = current.session.close() {
                log::warn!("Closing transport {} failed (ignored): {}", current.id, e);
            }
        }
        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.ctx.state != next {
            log::info!("Session state: {} -> {}", self.ctx.state, next);
            self.ctx.state = next;
            self.status.set_state(next);
        }
    }

    fn on_frame(&mut self, capture: CaptureHandle, frame: AudioFrame) {
        if self.settings.monitor_self && self.capture.is_current(capture) {
            self.scheduler.monitor(&frame.samples, frame.sample_rate);
        }
        if let Err(e) = self.capture.on_frame(capture, &frame, &mut self.ctx) {
            // Capture has already stopped itself
            if matches!(e, LinkError::Send(_)) {
                self.send_failed = true;
            }
            self.status.set_error(&e);
        }
    }

    fn on_transport(&mut self, transport: TransportId, signal: TransportSignal) {
        if !self.ctx.is_current(transport) {
            log::debug!("Ignoring {:?} from stale transport {}", signal, transport);
            return;
        }

        let signal = match signal {
            TransportSignal::Message(message) => return self.on_message(message),
            lifecycle => lifecycle,
        };

        let previous = self.ctx.state;
        let Transition { next, effects } = transition(previous, &signal);
        for effect in effects {
            match effect {
                Effect::StopCapture => {
                    self.capture.stop();
                }
                Effect::Status(text) => self.status.set_status(text),
                Effect::Fail(e) => self.status.set_error(&e),
            }
        }
        self.set_state(next);

        if previous != SessionState::Open && next == SessionState::Open && self.settings.auto_capture {
            // Failures are already on the status board
            let _ = self.start_capture();
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        if self.ctx.state != SessionState::Open {
            log::warn!("Dropping message received while {}", self.ctx.state);
            return;
        }

        if let Some(detail) = message.malformed {
            self.status.set_error(&LinkError::Decode(detail));
        }
        if message.interrupted {
            self.interruption.interrupt(&mut self.scheduler);
            self.status.set_status("Interrupted");
        }
        if let Some(audio) = message.audio {
            if let Err(e) = self.decoder.submit(self.scheduler.generation(), audio) {
                self.status.set_error(&e);
            }
        }
    }

    fn on_decoded(&mut self, generation: u64, result: Result<DecodedBuffer>) {
        if !self.interruption.admit(generation, &self.scheduler) {
            if let Err(e) = result {
                log::warn!("{} (generation {} superseded, not reported)", e, generation);
            }
            return;
        }
        match result {
            Ok(buffer) => {
                let was_idle = self.scheduler.active_count() == 0;
                self.scheduler.schedule(buffer);
                if was_idle {
                    self.status.set_status("Speaking");
                }
            }
            Err(e) => self.status.set_error(&e),
        }
    }

    fn on_reconnect_due(&mut self, epoch: u64) {
        if self.shutting_down || epoch != self.reset_epoch {
            log::debug!("Reconnect for reset #{} superseded", epoch);
            return;
        }
        if self.ctx.state != SessionState::Disconnected {
            return;
        }
        if let Err(e) = self.connect() {
            log::error!("Reconnect failed: {}", e);
        }
    }
}
