//! Monotonic time sources, in seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    /// Current time in seconds. Never decreases.
    fn now(&self) -> f64;
}

/// Clock driven by the playback device: the number of frames handed to the
/// hardware divided by the output sample rate.
#[derive(Debug)]
pub struct DeviceClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl DeviceClock {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            frames: AtomicU64::new(0),
            sample_rate,
        })
    }

    pub fn set_frames(&self, frames: u64) {
        self.frames.fetch_max(frames, Ordering::Release);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

impl Clock for DeviceClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Manually advanced clock for driving the pipeline deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Arc<Self> {
        Arc::new(Self {
            bits: AtomicU64::new(start.to_bits()),
        })
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_clock_follows_frames() {
        let clock = DeviceClock::new(24000);
        assert_eq!(clock.now(), 0.0);

        clock.set_frames(12000);
        assert!((clock.now() - 0.5).abs() < 1e-9);

        // Never moves backwards
        clock.set_frames(100);
        assert_eq!(clock.frames(), 12000);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1.0);
        clock.advance(0.25);
        assert!((clock.now() - 1.25).abs() < 1e-12);
    }
}
