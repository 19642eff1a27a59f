//! Playback engine configuration.

use std::time::Duration;

/// Configuration for cache sizing and prefetch thread behavior.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Number of callback-sized windows cached per buffer (default: 10).
    ///
    /// Each of the two buffers holds this many windows; a buffer swap is
    /// requested once per full traversal.
    pub cache_windows: usize,
    /// How often the prefetch thread wakes on its own when no explicit
    /// signal arrives (default: 30 ms).
    pub poll_interval: Duration,
    /// How long `stop()` waits for the prefetch thread to exit before
    /// abandoning it (default: 100 ms).
    pub shutdown_grace: Duration,
    /// Device buffer size used when the host reports zero (default: 1024).
    pub fallback_buffer_size: usize,
    /// Device sample rate used when the host reports zero (default: 44100).
    pub fallback_sample_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_windows: 10,
            poll_interval: Duration::from_millis(30),
            shutdown_grace: Duration::from_millis(100),
            fallback_buffer_size: 1024,
            fallback_sample_rate: 44100.0,
        }
    }
}

impl EngineConfig {
    /// Create config with a custom per-buffer window count.
    pub fn with_cache_windows(windows: usize) -> Self {
        Self {
            cache_windows: windows.max(1),
            ..Default::default()
        }
    }
}
