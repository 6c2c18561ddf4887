//! Software mixing destination on top of an ALSA playback device.
//!
//! The playback thread renders one period at a time from the [`Mixer`],
//! writes it to ALSA, and advances the shared [`DeviceClock`] by the number of
//! frames handed over. Sources finishing inside a period are reported as
//! [`LinkEvent::PlaybackEnded`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use parking_lot::Mutex;

use super::alsa_device;
use super::device::PlaybackOutput;
use super::pcm::{DecodedBuffer, resample_linear};
use crate::clock::DeviceClock;
use crate::error::LinkError;
use crate::events::{EventSender, LinkEvent};
use crate::playback::ScheduledSourceId;

/// Upper bound on buffered self-monitor audio, in seconds
const MONITOR_MAX_SECONDS: f64 = 0.2;

struct Voice {
    id: ScheduledSourceId,
    /// First output frame of this voice
    start: u64,
    samples: Vec<f32>,
    cursor: usize,
}

/// Sums scheduled voices and the monitor feed into output periods.
pub struct Mixer {
    sample_rate: u32,
    /// Index of the next frame to be rendered
    position: u64,
    voices: Vec<Voice>,
    monitor: VecDeque<f32>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            voices: Vec::new(),
            monitor: VecDeque::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Queue `samples` to start at `at` seconds. Late starts begin at the
    /// next rendered frame.
    pub fn add(&mut self, id: ScheduledSourceId, samples: Vec<f32>, at: f64) {
        let requested = (at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.voices.push(Voice {
            id,
            start: requested.max(self.position),
            samples,
            cursor: 0,
        });
    }

    pub fn remove(&mut self, id: ScheduledSourceId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        self.voices.len() != before
    }

    pub fn push_monitor(&mut self, samples: &[f32]) {
        self.monitor.extend(samples.iter().copied());
        let max = (MONITOR_MAX_SECONDS * self.sample_rate as f64) as usize;
        if self.monitor.len() > max {
            let excess = self.monitor.len() - max;
            self.monitor.drain(..excess);
        }
    }

    /// Render `out.len()` mono frames. Returns the voices that finished.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<ScheduledSourceId> {
        out.fill(0.0);
        let len = out.len() as u64;
        let mut finished = Vec::new();

        for voice in &mut self.voices {
            if voice.start >= self.position + len {
                continue;
            }
            let offset = voice.start.saturating_sub(self.position) as usize;
            let remaining = voice.samples.len() - voice.cursor;
            let n = remaining.min(out.len() - offset);
            for (dst, src) in out[offset..offset + n]
                .iter_mut()
                .zip(&voice.samples[voice.cursor..voice.cursor + n])
            {
                *dst += *src;
            }
            voice.cursor += n;
            if voice.cursor >= voice.samples.len() {
                finished.push(voice.id);
            }
        }
        self.voices.retain(|v| v.cursor < v.samples.len());

        for dst in out.iter_mut() {
            match self.monitor.pop_front() {
                Some(s) => *dst += s,
                None => break,
            }
        }
        for dst in out.iter_mut() {
            *dst = dst.clamp(-1.0, 1.0);
        }

        self.position += len;
        finished
    }
}

/// Playback configuration.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// ALSA playback device name
    pub device: String,
    pub sample_rate: u32,
    /// Frames rendered per write
    pub period_size: usize,
}

/// ALSA-backed [`PlaybackOutput`].
pub struct AlsaOutput {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<DeviceClock>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    play_handle: Option<JoinHandle<()>>,
}

impl AlsaOutput {
    /// Open the device and start the playback thread.
    pub fn open(config: &PlaybackConfig, events: EventSender) -> Result<Self, LinkError> {
        let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate)));
        let clock = DeviceClock::new(config.sample_rate);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);

        let play_handle = {
            let mixer = mixer.clone();
            let clock = clock.clone();
            let running = running.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(&config, &mixer, &clock, &events, &running, ready_tx) {
                        log::error!("Playback thread error: {:#}", e);
                    }
                })
                .map_err(|e| LinkError::Device(format!("failed to spawn playback thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                mixer,
                clock,
                sample_rate: config.sample_rate,
                running,
                play_handle: Some(play_handle),
            }),
            Ok(Err(detail)) => {
                let _ = play_handle.join();
                Err(LinkError::Device(detail))
            }
            Err(_) => {
                let _ = play_handle.join();
                Err(LinkError::Device("playback thread exited during startup".into()))
            }
        }
    }

    /// Time base of this output.
    pub fn clock(&self) -> Arc<DeviceClock> {
        self.clock.clone()
    }
}

impl PlaybackOutput for AlsaOutput {
    fn start(&mut self, id: ScheduledSourceId, buffer: DecodedBuffer, at: f64) {
        if buffer.sample_rate != self.sample_rate {
            log::warn!(
                "Buffer rate {} Hz differs from output rate {} Hz",
                buffer.sample_rate,
                self.sample_rate
            );
        }
        self.mixer.lock().add(id, buffer.samples, at);
    }

    fn stop(&mut self, id: ScheduledSourceId) {
        self.mixer.lock().remove(id);
    }

    fn monitor(&mut self, samples: &[f32], sample_rate: u32) {
        let resampled = resample_linear(samples, sample_rate, self.sample_rate);
        self.mixer.lock().push_monitor(&resampled);
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.play_handle.take() {
            let _ = h.join();
        }
    }
}

fn play_thread(
    config: &PlaybackConfig,
    mixer: &Mutex<Mixer>,
    clock: &DeviceClock,
    events: &EventSender,
    running: &AtomicBool,
    ready: std_mpsc::SyncSender<Result<(), String>>,
) -> Result<()> {
    let (pcm, params) =
        match alsa_device::open_playback(&config.device, config.sample_rate, 1, config.period_size) {
            Ok(opened) => opened,
            Err(e) => {
                let _ = ready.send(Err(format!("{:#}", e)));
                return Err(e);
            }
        };
    let io = match pcm.io_f32() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(format!("ALSA float I/O unavailable: {}", e)));
            return Err(e.into());
        }
    };
    let _ = ready.send(Ok(()));

    let period = params.period_size.max(1);
    let mut period_buf = vec![0f32; period];

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        params.channels,
        period,
    );

    while running.load(Ordering::Relaxed) {
        let finished = {
            let mut mixer = mixer.lock();
            let finished = mixer.render(&mut period_buf);
            clock.set_frames(mixer.position());
            finished
        };
        for id in finished {
            if events.send(LinkEvent::PlaybackEnded(id)).is_err() {
                log::info!("Event loop gone, stopping playback");
                return Ok(());
            }
        }

        // Write the period with a retry loop to handle short writes and
        // XRUN recovery without losing frames.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&period_buf[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        anyhow::bail!("Failed to recover PCM playback: {}", e2);
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            period - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::ScheduledSourceId;

    fn id(index: u32) -> ScheduledSourceId {
        ScheduledSourceId::from_parts(index, 0)
    }

    #[test]
    fn test_render_places_voice_at_start_frame() {
        let mut mixer = Mixer::new(1000);
        mixer.add(id(0), vec![0.5; 4], 0.006); // frame 6

        let mut out = vec![0.0; 8];
        assert!(mixer.render(&mut out).is_empty());
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5]);

        let finished = mixer.render(&mut out);
        assert_eq!(finished, vec![id(0)]);
        assert_eq!(&out[..3], &[0.5, 0.5, 0.0]);
        assert_eq!(mixer.voice_count(), 0);
        assert_eq!(mixer.position(), 16);
    }

    #[test]
    fn test_late_voice_starts_at_next_frame() {
        let mut mixer = Mixer::new(1000);
        let mut out = vec![0.0; 4];
        mixer.render(&mut out);

        mixer.add(id(1), vec![0.25; 2], 0.0);
        mixer.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_removed_voice_is_silent_and_not_reported() {
        let mut mixer = Mixer::new(1000);
        mixer.add(id(2), vec![0.5; 2], 0.0);
        assert!(mixer.remove(id(2)));
        assert!(!mixer.remove(id(2)));

        let mut out = vec![1.0; 4];
        assert!(mixer.render(&mut out).is_empty());
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_mix_sums_and_clamps() {
        let mut mixer = Mixer::new(1000);
        mixer.add(id(0), vec![0.75; 2], 0.0);
        mixer.add(id(1), vec![0.75; 2], 0.0);
        mixer.push_monitor(&[0.1]);

        let mut out = vec![0.0; 2];
        let finished = mixer.render(&mut out);
        assert_eq!(finished.len(), 2);
        assert_eq!(out, vec![1.0, 1.0]);
    }

    #[test]
    fn test_monitor_buffer_is_bounded() {
        let mut mixer = Mixer::new(1000);
        mixer.push_monitor(&vec![0.1; 1000]);
        assert_eq!(mixer.monitor.len(), 200);
    }
}
