//! Playback engine statistics.
//!
//! Tracks buffer health and prefetch activity. Cheap to update from both
//! threads; read by tests and by hosts that want to surface degradation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the consumer and the prefetch thread.
#[derive(Default)]
pub struct EngineMetrics {
    /// Buffer swaps requested by the consumer.
    swaps: AtomicU64,
    /// Refills completed by the prefetch thread.
    refills: AtomicU64,
    /// Frames read from the file source.
    frames_read: AtomicU64,
    /// Windows served while the front buffer was still being refilled
    /// (the documented stale-buffer degradation).
    stale_windows: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMetricsSnapshot {
    pub swaps: u64,
    pub refills: u64,
    pub frames_read: u64,
    pub stale_windows: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_swap(&self) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_refill(&self, frames: u64) {
        self.refills.fetch_add(1, Ordering::Relaxed);
        self.frames_read.fetch_add(frames, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_stale_window(&self) {
        self.stale_windows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            swaps: self.swaps.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            stale_windows: self.stale_windows.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_swap();
        metrics.record_refill(4096);
        metrics.record_refill(1024);
        metrics.record_stale_window();

        let snap = metrics.snapshot();
        assert_eq!(snap.swaps, 1);
        assert_eq!(snap.refills, 2);
        assert_eq!(snap.frames_read, 5120);
        assert_eq!(snap.stale_windows, 1);
    }
}
