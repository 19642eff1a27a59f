//! Shared playback cursor.
//!
//! One instance is shared between the engine (real-time consumer) and the
//! prefetch thread. All fields are atomics so neither side ever blocks on
//! the other; the engine writes the window bounds and per-quantum sample
//! count, the prefetch thread owns `current` while streaming.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

/// Snapshot of the playback window, taken at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackWindow {
    /// First sample of the looped range.
    pub start: i64,
    /// One past the last sample of the looped range.
    pub stop: i64,
    /// Next sample the prefetcher will read.
    pub current: i64,
    /// Completed traversals of `[start, stop)` on the prefetch side.
    pub loop_count: i64,
}

pub(crate) struct PlaybackCursor {
    start: AtomicI64,
    stop: AtomicI64,
    current: AtomicI64,
    loop_count: AtomicI64,
    samples_per_buffer: AtomicUsize,
}

impl PlaybackCursor {
    pub fn new() -> Self {
        Self {
            start: AtomicI64::new(0),
            stop: AtomicI64::new(0),
            current: AtomicI64::new(0),
            loop_count: AtomicI64::new(0),
            samples_per_buffer: AtomicUsize::new(0),
        }
    }

    /// Reset to the full extent of a freshly selected recording.
    pub fn reset(&self, total_samples: i64) {
        self.start.store(0, Ordering::Release);
        self.stop.store(total_samples, Ordering::Release);
        self.current.store(0, Ordering::Release);
        self.loop_count.store(0, Ordering::Release);
    }

    pub fn set_range(&self, start: i64, stop: i64) {
        self.start.store(start, Ordering::Release);
        self.stop.store(stop, Ordering::Release);
    }

    pub fn start(&self) -> i64 {
        self.start.load(Ordering::Acquire)
    }

    pub fn stop(&self) -> i64 {
        self.stop.load(Ordering::Acquire)
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn set_current(&self, sample: i64) {
        self.current.store(sample, Ordering::Release);
    }

    pub fn advance_current(&self, samples: i64) {
        self.current.fetch_add(samples, Ordering::AcqRel);
    }

    /// Wrap the read cursor back to the window start, counting the loop.
    pub fn wrap_to_start(&self) {
        self.current
            .store(self.start.load(Ordering::Acquire), Ordering::Release);
        self.loop_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn loop_count(&self) -> i64 {
        self.loop_count.load(Ordering::Acquire)
    }

    pub fn reset_loop_count(&self) {
        self.loop_count.store(0, Ordering::Release);
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer.load(Ordering::Acquire)
    }

    pub fn set_samples_per_buffer(&self, samples: usize) {
        self.samples_per_buffer.store(samples, Ordering::Release);
    }

    pub fn snapshot(&self) -> PlaybackWindow {
        PlaybackWindow {
            start: self.start(),
            stop: self.stop(),
            current: self.current(),
            loop_count: self.loop_count(),
        }
    }
}
