use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;

use super::alsa_device::{self, AlsaParams};
use super::device::{AudioInput, CaptureConstraints, FrameSink, InputHandle};
use crate::error::{LinkError, Result};

struct Acquired {
    handle: InputHandle,
    pcm: Option<PCM>,
    params: AlsaParams,
    frame_size: usize,
    worker: Option<Worker>,
}

struct Worker {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// ALSA microphone. One device is held at a time; the recording thread owns
/// the PCM while frames are flowing.
pub struct AlsaInput {
    acquired: Option<Acquired>,
    next_handle: u64,
}

impl AlsaInput {
    pub fn new() -> Self {
        Self {
            acquired: None,
            next_handle: 1,
        }
    }
}

impl Default for AlsaInput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioInput for AlsaInput {
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<InputHandle> {
        if let Some(prev) = self.acquired.as_ref().map(|a| a.handle) {
            log::warn!("Capture device already held ({:?}), releasing it first", prev);
            self.release(prev);
        }

        let (pcm, params) = alsa_device::open_capture(
            &constraints.device,
            constraints.sample_rate,
            constraints.channels,
            constraints.frame_size,
        )
        .map_err(|e| LinkError::Device(format!("{:#}", e)))?;

        let handle = InputHandle(self.next_handle);
        self.next_handle += 1;
        self.acquired = Some(Acquired {
            handle,
            pcm: Some(pcm),
            params,
            frame_size: constraints.frame_size,
            worker: None,
        });
        Ok(handle)
    }

    fn create_source(&mut self, handle: InputHandle, sink: FrameSink) -> Result<()> {
        let acquired = match self.acquired.as_mut() {
            Some(a) if a.handle == handle => a,
            _ => return Err(LinkError::Device(format!("unknown input handle {:?}", handle))),
        };
        let pcm = acquired
            .pcm
            .take()
            .ok_or_else(|| LinkError::Device("capture source already created".into()))?;

        let running = Arc::new(AtomicBool::new(true));
        let params = acquired.params.clone();
        let frame_size = acquired.frame_size;
        let thread = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    if let Err(e) = record_thread(pcm, &params, frame_size, sink.clone(), &running) {
                        log::error!("Recording thread error: {:#}", e);
                        sink.fail(format!("{:#}", e));
                    }
                })
                .map_err(|e| LinkError::Device(format!("failed to spawn capture thread: {}", e)))?
        };

        acquired.worker = Some(Worker { running, thread });
        Ok(())
    }

    fn release(&mut self, handle: InputHandle) {
        match self.acquired.take() {
            Some(acquired) if acquired.handle == handle => {
                if let Some(worker) = acquired.worker {
                    worker.running.store(false, Ordering::SeqCst);
                    if worker.thread.join().is_err() {
                        log::error!("Recording thread panicked");
                    }
                }
                // PCM (if never handed to a thread) drops here
            }
            other => {
                self.acquired = other;
                log::debug!("release of stale input handle {:?} ignored", handle);
            }
        }
    }
}

impl Drop for AlsaInput {
    fn drop(&mut self) {
        if let Some(handle) = self.acquired.as_ref().map(|a| a.handle) {
            self.release(handle);
        }
    }
}

/// Read periods from ALSA, downmix to mono and emit fixed-size frames.
fn record_thread(
    pcm: PCM,
    params: &AlsaParams,
    frame_size: usize,
    sink: FrameSink,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let channels = params.channels.max(1) as usize;
    let period_size = params.period_size.max(1);
    let io = pcm.io_f32()?;

    // ALSA read buffer (interleaved f32, one period)
    let mut read_buf = vec![0f32; period_size * channels];
    // Accumulation buffer for mono samples
    let mut accum_buf: Vec<f32> = Vec::with_capacity(frame_size * 2);
    let mut sequence = 0u64;

    log::info!(
        "Recording started: rate={}, ch={}, period={}, frame_size={}",
        params.sample_rate,
        channels,
        period_size,
        frame_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                // Interleaved → mono (average all channels)
                for i in 0..frames {
                    let base = i * channels;
                    let sum: f32 = read_buf[base..base + channels].iter().sum();
                    accum_buf.push(sum / channels as f32);
                }

                while accum_buf.len() >= frame_size {
                    let frame: Vec<f32> = accum_buf.drain(..frame_size).collect();
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    if !sink.deliver(frame, params.sample_rate, sequence) {
                        log::warn!("Frame receiver dropped, stopping capture");
                        return Ok(());
                    }
                    sequence += 1;
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    anyhow::bail!("Failed to recover PCM capture: {}", e2);
                }
            }
        }
    }

    log::info!("Recording stopped after {} frames", sequence);
    Ok(())
}
