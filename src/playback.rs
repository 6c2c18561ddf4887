//! Gapless playback scheduling.
//!
//! Every decoded buffer is placed at `max(next_start_time, now)` and the
//! cursor moves to the end of that buffer, so buffers play back-to-back in
//! scheduling order and never overlap. Active sources live in an arena
//! addressed by version-tagged ids: completion and cancellation both remove by
//! id, and an id that is no longer present is simply ignored.

use std::fmt;
use std::sync::Arc;

use crate::audio::{DecodedBuffer, PlaybackOutput};
use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduledSourceId {
    index: u32,
    version: u32,
}

impl ScheduledSourceId {
    #[cfg(test)]
    pub(crate) fn from_parts(index: u32, version: u32) -> Self {
        Self { index, version }
    }
}

impl fmt::Display for ScheduledSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.version)
    }
}

/// A buffer that is playing or waiting for its start time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: ScheduledSourceId,
    pub start_time: f64,
    pub duration: f64,
    /// Playback generation the source was scheduled in
    pub generation: u64,
}

impl ScheduledSource {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

struct Slot {
    version: u32,
    source: Option<ScheduledSource>,
}

pub struct PlaybackScheduler {
    clock: Arc<dyn Clock>,
    output: Box<dyn PlaybackOutput>,
    next_start_time: f64,
    generation: u64,
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: usize,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn Clock>, output: Box<dyn PlaybackOutput>) -> Self {
        Self {
            clock,
            output,
            next_start_time: 0.0,
            generation: 0,
            slots: Vec::new(),
            free: Vec::new(),
            active: 0,
        }
    }

    /// Queue `buffer` right after everything already scheduled.
    pub fn schedule(&mut self, buffer: DecodedBuffer) -> ScheduledSourceId {
        let now = self.clock.now();
        let start_time = self.next_start_time.max(now);
        let duration = buffer.duration_seconds();

        let id = self.allocate();
        self.slots[id.index as usize].source = Some(ScheduledSource {
            id,
            start_time,
            duration,
            generation: self.generation,
        });
        self.active += 1;

        self.output.start(id, buffer, start_time);
        self.next_start_time = start_time + duration;

        log::debug!(
            "Scheduled {} at {:.3}s for {:.3}s (now {:.3}s, {} active)",
            id,
            start_time,
            duration,
            now,
            self.active
        );
        id
    }

    /// Natural-completion hook. Returns false for unknown or stale ids.
    pub fn complete(&mut self, id: ScheduledSourceId) -> bool {
        self.remove(id).is_some()
    }

    /// Stop and forget every active source.
    pub fn cancel_all(&mut self) -> usize {
        let mut stopped = 0;
        for index in 0..self.slots.len() {
            let Some(source) = self.slots[index].source.take() else {
                continue;
            };
            self.release_slot(index);
            self.output.stop(source.id);
            stopped += 1;
        }
        self.active = 0;
        if stopped > 0 {
            log::info!("Cancelled {} scheduled source(s)", stopped);
        }
        stopped
    }

    /// Rewind the cursor and start a new generation.
    pub fn reset(&mut self) {
        self.next_start_time = 0.0;
        self.generation += 1;
    }

    /// Route captured audio to the output.
    pub fn monitor(&mut self, samples: &[f32], sample_rate: u32) {
        self.output.monitor(samples, sample_rate);
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn source(&self, id: ScheduledSourceId) -> Option<&ScheduledSource> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.version == id.version)
            .and_then(|slot| slot.source.as_ref())
    }

    pub fn active_sources(&self) -> impl Iterator<Item = &ScheduledSource> {
        self.slots.iter().filter_map(|slot| slot.source.as_ref())
    }

    fn allocate(&mut self) -> ScheduledSourceId {
        match self.free.pop() {
            Some(index) => ScheduledSourceId {
                index,
                version: self.slots[index as usize].version,
            },
            None => {
                self.slots.push(Slot {
                    version: 0,
                    source: None,
                });
                ScheduledSourceId {
                    index: (self.slots.len() - 1) as u32,
                    version: 0,
                }
            }
        }
    }

    fn remove(&mut self, id: ScheduledSourceId) -> Option<ScheduledSource> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.version != id.version {
            return None;
        }
        let source = slot.source.take()?;
        self.release_slot(id.index as usize);
        self.active -= 1;
        Some(source)
    }

    /// Bump the slot version so outstanding ids for it go stale.
    fn release_slot(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.version = slot.version.wrapping_add(1);
        self.free.push(index as u32);
    }
}
