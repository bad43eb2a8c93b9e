//! Sample-accurate playback timeline.
//!
//! Time is counted in output frames since the device started. The device
//! callback advances the clock through [`Timeline::render`]; `enqueue` and
//! `interrupt` only do bookkeeping under the same short lock, so an
//! interrupt can never interleave with a partially rendered buffer.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::playback::arena::{Arena, BufferId};
use crate::AudioFormat;

/// A buffer placed on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledBuffer {
    /// Arena slot of the buffer.
    pub id: BufferId,
    /// First output frame the buffer plays at.
    pub start: u64,
    /// Length in output frames.
    pub frames: u64,
    /// Interrupt epoch the buffer was scheduled in.
    pub epoch: u64,
}

impl ScheduledBuffer {
    /// Frame right after the buffer's last frame.
    pub fn end(&self) -> u64 {
        self.start + self.frames
    }
}

/// Timeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineStats {
    /// Buffers accepted by `enqueue`.
    pub scheduled: u64,
    /// Buffers that played to the end.
    pub completed: u64,
    /// Buffers stopped by `interrupt` or `close`.
    pub discarded: u64,
    /// Frames rendered while nothing was scheduled.
    pub underrun_frames: u64,
}

struct Entry {
    samples: Vec<f32>,
    start: u64,
}

struct TimelineInner {
    clock: u64,
    next_free: u64,
    arena: Arena<Entry>,
    /// Buffer ids in start order. Ranges never overlap.
    order: VecDeque<BufferId>,
    epoch: u64,
    closed: bool,
    stats: TimelineStats,
}

impl TimelineInner {
    fn discard_all(&mut self) -> usize {
        let discarded = self.arena.clear();
        self.order.clear();
        self.next_free = self.clock;
        self.epoch += 1;
        self.stats.discarded += discarded as u64;
        discarded
    }
}

/// Gapless, interruptible schedule of mono f32 buffers.
pub struct Timeline {
    format: AudioFormat,
    inner: Mutex<TimelineInner>,
}

impl Timeline {
    /// Creates an empty timeline for a device running at `format`.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            inner: Mutex::new(TimelineInner {
                clock: 0,
                next_free: 0,
                arena: Arena::new(),
                order: VecDeque::new(),
                epoch: 0,
                closed: false,
                stats: TimelineStats::default(),
            }),
        }
    }

    /// Device format the timeline renders in.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Schedules mono samples (at the device rate) right after everything
    /// already scheduled, or now if the timeline has run dry.
    ///
    /// Returns `None` for an empty buffer or once closed.
    pub fn enqueue(&self, samples: Vec<f32>) -> Option<ScheduledBuffer> {
        if samples.is_empty() {
            return None;
        }
        let frames = samples.len() as u64;

        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        let start = inner.clock.max(inner.next_free);
        let id = inner.arena.insert(Entry { samples, start });
        inner.order.push_back(id);
        inner.next_free = start + frames;
        inner.stats.scheduled += 1;

        Some(ScheduledBuffer {
            id,
            start,
            frames,
            epoch: inner.epoch,
        })
    }

    /// Stops and forgets every scheduled buffer and re-anchors the next start
    /// at the current clock. Returns how many buffers were stopped.
    pub fn interrupt(&self) -> usize {
        self.inner.lock().discard_all()
    }

    /// Interrupts and refuses further buffers, in one critical section.
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.discard_all()
    }

    /// Fills `out` (interleaved, device channel count) with the next frames
    /// and advances the clock. Silence where nothing is scheduled.
    pub fn render(&self, out: &mut [f32]) {
        let channels = self.format.channels.max(1) as usize;
        out.fill(0.0);
        let frames = (out.len() / channels) as u64;
        if frames == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        let window_start = inner.clock;
        let window_end = window_start + frames;
        let mut covered = 0u64;

        for &id in &inner.order {
            let Some(entry) = inner.arena.get(id) else {
                continue;
            };
            if entry.start >= window_end {
                break;
            }
            let entry_end = entry.start + entry.samples.len() as u64;
            let from = entry.start.max(window_start);
            let to = entry_end.min(window_end);
            if from >= to {
                continue;
            }
            covered += to - from;
            for t in from..to {
                let sample = entry.samples[(t - entry.start) as usize];
                let offset = (t - window_start) as usize * channels;
                out[offset..offset + channels].fill(sample);
            }
        }

        // Retire buffers that finished within this window.
        while let Some(&id) = inner.order.front() {
            let finished = inner
                .arena
                .get(id)
                .map_or(true, |entry| entry.start + entry.samples.len() as u64 <= window_end);
            if !finished {
                break;
            }
            inner.order.pop_front();
            if inner.arena.remove(id).is_some() {
                inner.stats.completed += 1;
            }
        }

        inner.clock = window_end;
        inner.stats.underrun_frames += frames - covered;
    }

    /// Current device clock in frames.
    pub fn now(&self) -> u64 {
        self.inner.lock().clock
    }

    /// Frame at which the next enqueued buffer would start if the clock
    /// has not passed it.
    pub fn next_free(&self) -> u64 {
        self.inner.lock().next_free
    }

    /// Number of interrupts so far.
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Buffers scheduled or playing.
    pub fn pending(&self) -> usize {
        self.inner.lock().arena.len()
    }

    /// Returns `true` if `id` is still scheduled or playing.
    pub fn contains(&self, id: BufferId) -> bool {
        self.inner.lock().arena.get(id).is_some()
    }

    /// Current counters.
    pub fn stats(&self) -> TimelineStats {
        self.inner.lock().stats
    }
}
