//! Barge-in handling.
//!
//! When the remote side signals an interruption, everything scheduled is
//! stopped and the playback cursor is rewound in one step. Bumping the
//! generation also invalidates decodes that are still in flight, so audio
//! from before the interruption can never play after it.

use crate::playback::PlaybackScheduler;

#[derive(Debug, Default)]
pub struct InterruptionController {
    interruptions: u64,
    discarded: u64,
}

impl InterruptionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel all playback and rewind the cursor. Returns how many sources
    /// were stopped.
    pub fn interrupt(&mut self, scheduler: &mut PlaybackScheduler) -> usize {
        let stopped = scheduler.cancel_all();
        scheduler.reset();
        self.interruptions += 1;
        log::info!(
            "Playback interrupted: {} source(s) stopped, generation now {}",
            stopped,
            scheduler.generation()
        );
        stopped
    }

    /// Whether a decode stamped with `generation` may still be scheduled.
    pub fn admit(&mut self, generation: u64, scheduler: &PlaybackScheduler) -> bool {
        if generation == scheduler.generation() {
            return true;
        }
        self.discarded += 1;
        log::debug!(
            "Discarding decode from generation {} (current {})",
            generation,
            scheduler.generation()
        );
        false
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
