//! Double-buffered sample cache.
//!
//! Two equally sized interleaved `i16` buffers. The front buffer is drained
//! window-by-window by the real-time consumer; the back buffer is refilled
//! by the prefetch thread. `swap` only flips an index and raises the refill
//! flag, it never copies or blocks.
//!
//! The refill flag is the sole synchronization primitive between consumer
//! and prefetcher: `false -> true` is requested by the consumer at swap
//! time, `true -> false` is consumed by the prefetcher, both as a single
//! compare-exchange so redundant wake-ups collapse into one refill.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub(crate) struct SampleCache {
    buffers: [Mutex<Vec<i16>>; 2],
    front: AtomicUsize,
    refill_needed: AtomicBool,
}

impl SampleCache {
    /// Allocate both buffers, zero-filled, `capacity` values each.
    ///
    /// Buffer 0 starts as the back buffer so a pre-fill of buffer 0
    /// followed by the first `swap()` drains the pre-filled data first.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: [
                Mutex::new(vec![0; capacity]),
                Mutex::new(vec![0; capacity]),
            ],
            front: AtomicUsize::new(1),
            refill_needed: AtomicBool::new(false),
        }
    }

    /// The buffer currently designated for draining.
    pub fn front(&self) -> &Mutex<Vec<i16>> {
        &self.buffers[self.front.load(Ordering::Acquire)]
    }

    /// The buffer currently designated for refilling.
    pub fn back(&self) -> &Mutex<Vec<i16>> {
        &self.buffers[1 - self.front.load(Ordering::Acquire)]
    }

    /// Flip front/back and request a refill of the new back buffer.
    /// O(1), never blocks. Returns whether the refill request was newly
    /// raised (false means the prefetcher had not consumed the previous
    /// request yet).
    pub fn swap(&self) -> bool {
        self.front.fetch_xor(1, Ordering::AcqRel);
        self.request_refill()
    }

    /// Consumer side: raise the refill flag (`false -> true`).
    pub fn request_refill(&self) -> bool {
        self.refill_needed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Prefetcher side: consume the refill flag (`true -> false`).
    pub fn take_refill_request(&self) -> bool {
        self.refill_needed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub fn refill_pending(&self) -> bool {
        self.refill_needed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_zero_starts_as_back() {
        let cache = SampleCache::new(16);
        cache.back().lock()[0] = 7;

        cache.swap();
        assert_eq!(cache.front().lock()[0], 7);
    }

    #[test]
    fn test_swap_alternates_roles() {
        let cache = SampleCache::new(4);
        cache.front().lock()[0] = 1;
        cache.back().lock()[0] = 2;

        cache.swap();
        assert_eq!(cache.front().lock()[0], 2);
        cache.swap();
        assert_eq!(cache.front().lock()[0], 1);
    }

    #[test]
    fn test_refill_flag_transitions() {
        let cache = SampleCache::new(4);
        assert!(!cache.refill_pending());
        assert!(!cache.take_refill_request());

        assert!(cache.request_refill());
        assert!(!cache.request_refill(), "second request is redundant");
        assert!(cache.refill_pending());

        assert!(cache.take_refill_request());
        assert!(!cache.take_refill_request());
        assert!(!cache.refill_pending());
    }

    #[test]
    fn test_swap_requests_refill() {
        let cache = SampleCache::new(4);
        assert!(cache.swap());
        assert!(cache.refill_pending());
    }
}
