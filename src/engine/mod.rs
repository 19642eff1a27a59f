//! Double-buffered streaming playback engine.

mod cache;
mod cursor;
mod metrics;
mod prefetch;

pub use cursor::PlaybackWindow;
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::source::{ChannelInfo, EventInfo, EventRecord, FileSource, SourceRegistry};
use cache::SampleCache;
use cursor::PlaybackCursor;
use parking_lot::Mutex;
use prefetch::{read_and_fill_cache, PrefetchContext, PrefetchThread};
use smallvec::SmallVec;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Engine life-cycle state.
///
/// `select_recording` and `set_playback_range` are legal in every state but
/// `Closed`; `produce` only in `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No file source open.
    Closed,
    /// A source is open; playback not armed.
    Opened,
    /// Buffers allocated, prefetch thread running, `produce` legal.
    Streaming,
    /// Playback was stopped; the source is still open.
    Stopped,
}

/// One discrete event delivered by `produce`, with its timestamp translated
/// to the absolute output timeline (`source sample + completed loops *
/// window length`), so timestamps stay monotonic across loop iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub sample: i64,
    pub line: u8,
    pub state: bool,
}

/// Result of one `produce` call.
#[derive(Debug, Default)]
pub struct Produced {
    /// Resampled frames written to the output (0 while paused).
    pub samples_written: usize,
    /// Events whose source timestamps fell inside this quantum.
    pub events: SmallVec<[PlaybackEvent; 8]>,
}

/// Streaming file-source playback engine.
///
/// Owns the double buffer and the prefetch thread; invoked once per
/// real-time quantum via [`produce`](Self::produce), which never blocks on
/// disk I/O.
pub struct PlaybackEngine {
    config: EngineConfig,
    registry: SourceRegistry,
    state: EngineState,

    source: Option<Arc<Mutex<Box<dyn FileSource>>>>,
    cursor: Arc<PlaybackCursor>,
    metrics: Arc<EngineMetrics>,
    cache: Option<Arc<SampleCache>>,
    prefetch: Option<PrefetchThread>,

    // Active recording metadata.
    channels: usize,
    sample_rate: f32,
    total_samples: i64,
    channel_info: Vec<ChannelInfo>,
    scrubbed_samples: i64,

    // Captured from the device when playback is armed.
    device_sample_rate: f64,
    window_samples: usize,

    playback_active: bool,
    timestamp: i64,
    buffer_cache_window: usize,
    events: Vec<EventRecord>,
    last_window: Vec<f32>,
}

impl PlaybackEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, SourceRegistry::default())
    }

    /// Engine with a caller-supplied format registry.
    pub fn with_registry(config: EngineConfig, registry: SourceRegistry) -> Self {
        Self {
            config,
            registry,
            state: EngineState::Closed,
            source: None,
            cursor: Arc::new(PlaybackCursor::new()),
            metrics: Arc::new(EngineMetrics::new()),
            cache: None,
            prefetch: None,
            channels: 0,
            sample_rate: 0.0,
            total_samples: 0,
            channel_info: Vec::new(),
            scrubbed_samples: 0,
            device_sample_rate: 0.0,
            window_samples: 0,
            playback_active: true,
            timestamp: 0,
            buffer_cache_window: 0,
            events: Vec::new(),
            last_window: Vec::new(),
        }
    }

    /// Register additional file formats before opening.
    pub fn registry_mut(&mut self) -> &mut SourceRegistry {
        &mut self.registry
    }

    /// Open a recording by path, selecting the source by extension.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;

        let mut source = self
            .registry
            .create(&ext)
            .ok_or(Error::UnsupportedFormat(ext))?;
        source.open(path)?;
        self.open_source(source)
    }

    /// Bind an already-constructed file source (injected collaborator).
    pub fn open_source(&mut self, source: Box<dyn FileSource>) -> Result<()> {
        if source.num_records() == 0 {
            return Err(Error::EmptyRecording);
        }

        self.stop();
        self.source = Some(Arc::new(Mutex::new(source)));
        self.state = EngineState::Opened;
        self.select_recording(0)
    }

    /// Select the active record and reset all playback cursors.
    pub fn select_recording(&mut self, index: usize) -> Result<()> {
        let source = self.source.clone().ok_or(Error::NotConfigured)?;

        // Changing the record invalidates the cache layout.
        if self.state == EngineState::Streaming {
            self.stop();
        }

        {
            let mut src = source.lock();
            let count = src.num_records();
            if index >= count {
                return Err(Error::InvalidRecording { index, count });
            }

            src.set_active_record(index);
            self.channels = src.active_num_channels();
            self.total_samples = src.active_num_samples();
            self.sample_rate = src.active_sample_rate();
            self.channel_info = (0..self.channels).map(|ch| src.channel_info(ch)).collect();
            src.seek_to(0);
        }

        self.cursor.reset(self.total_samples);
        self.scrubbed_samples = self.total_samples;
        self.timestamp = 0;
        self.buffer_cache_window = 0;

        debug!(
            record = index,
            channels = self.channels,
            samples = self.total_samples,
            rate = self.sample_rate,
            "selected recording"
        );
        Ok(())
    }

    /// Set the looped `[start, stop)` sample range. Stop is clamped to the
    /// recording length; an empty window is rejected before it can reach
    /// the refill loop. Legal while streaming: the read cursor is pulled
    /// back to the new start so it can never sit beyond the new stop.
    pub fn set_playback_range(&mut self, start: i64, stop: i64) -> Result<()> {
        if self.state == EngineState::Closed {
            return Err(Error::NotConfigured);
        }

        let start = start.max(0);
        let stop = stop.min(self.total_samples);
        if start >= stop {
            return Err(Error::ZeroLengthWindow);
        }

        self.cursor.set_range(start, stop);
        self.cursor.set_current(start);
        self.scrubbed_samples = stop - start;
        Ok(())
    }

    /// Set the playback start position in milliseconds.
    pub fn set_playback_start_ms(&mut self, ms: u32) -> Result<()> {
        let start = self.ms_to_samples(ms);
        self.set_playback_range(start, self.cursor.stop())
    }

    /// Set the playback stop position in milliseconds.
    pub fn set_playback_stop_ms(&mut self, ms: u32) -> Result<()> {
        let stop = self.ms_to_samples(ms);
        self.set_playback_range(self.cursor.start(), stop)
    }

    /// Arm playback: capture device parameters, allocate both cache
    /// buffers, synchronously pre-fill the first one (the real-time path
    /// is not live yet), and start the prefetch thread.
    pub fn start(&mut self, device_sample_rate: f64, device_buffer_size: usize) -> Result<()> {
        let source = self.source.clone().ok_or(Error::NotConfigured)?;
        if self.state == EngineState::Streaming {
            return Ok(());
        }

        let window = self.cursor.snapshot();
        if window.start >= window.stop {
            return Err(Error::ZeroLengthWindow);
        }

        self.device_sample_rate = if device_sample_rate > 0.0 {
            device_sample_rate
        } else {
            self.config.fallback_sample_rate
        };
        let device_buffer_size = if device_buffer_size > 0 {
            device_buffer_size
        } else {
            self.config.fallback_buffer_size
        };

        let ratio = self.sample_rate as f64 / self.device_sample_rate;
        let samples_per_buffer = ((device_buffer_size as f64 * ratio) as usize).max(1);
        self.window_samples = device_buffer_size.max(samples_per_buffer);

        let cache_windows = self.config.cache_windows;
        let cache = Arc::new(SampleCache::new(
            self.channels * self.window_samples * cache_windows,
        ));

        self.cursor.set_samples_per_buffer(samples_per_buffer);
        self.cursor.set_current(window.start);
        self.cursor.reset_loop_count();

        {
            let mut src = source.lock();
            src.seek_to(window.start);

            // Snapshot events for the armed window so produce never has to
            // touch the source.
            let mut info = EventInfo::default();
            src.events_in_range(&mut info, window.start, window.stop);
            self.events = info.events;
            self.events.sort_by_key(|e| e.sample);

            // Blocking pre-fill of the buffer the first swap will expose.
            let frames = read_and_fill_cache(
                src.as_mut(),
                &mut cache.back().lock(),
                &self.cursor,
                self.channels,
                cache_windows,
            )?;
            self.metrics.record_refill(frames as u64);
        }

        self.timestamp = window.start;
        self.buffer_cache_window = 0;
        self.last_window = vec![0.0; self.window_samples * self.channels];

        let prefetch = PrefetchThread::spawn(
            PrefetchContext {
                source: Arc::clone(&source),
                cache: Arc::clone(&cache),
                cursor: Arc::clone(&self.cursor),
                metrics: Arc::clone(&self.metrics),
                channels: self.channels,
                cache_windows,
            },
            self.config.poll_interval,
        )?;

        self.cache = Some(cache);
        self.prefetch = Some(prefetch);
        self.state = EngineState::Streaming;

        debug!(
            samples_per_buffer,
            window_samples = self.window_samples,
            cache_windows,
            "playback armed"
        );
        Ok(())
    }

    /// Stop streaming. The prefetch thread gets a bounded grace period; if
    /// it is stuck in a disk read it is abandoned and cleans itself up when
    /// the read returns.
    pub fn stop(&mut self) {
        if let Some(mut prefetch) = self.prefetch.take() {
            prefetch.stop(self.config.shutdown_grace);
        }
        self.cache = None;
        if self.state == EngineState::Streaming {
            self.state = EngineState::Stopped;
        }
    }

    /// The real-time callback. Copies one cache window of resampled,
    /// scaled samples into `out` (interleaved, `channels *
    /// samples_requested` values) and returns the discrete events falling
    /// inside this quantum. Never blocks: if the front buffer is still
    /// being refilled, the previous window is replayed and the stale-window
    /// counter is bumped.
    ///
    /// The source/device rate ratio is truncated to a whole sample count
    /// independently each call; the dropped fraction accumulates as drift
    /// for non-integer ratios. Known limitation, kept for parity with the
    /// acquisition systems this engine replays for. When the source rate
    /// exceeds the device rate, a quantum consumes more source frames than
    /// it can carry and only the first `samples_requested` reach `out`.
    pub fn produce(&mut self, samples_requested: usize, out: &mut [f32]) -> Result<Produced> {
        if self.state != EngineState::Streaming {
            return Err(Error::NotStreaming);
        }
        let cache = self.cache.clone().ok_or(Error::NotStreaming)?;

        let channels = self.channels;
        let needed = channels * samples_requested;
        if out.len() < needed {
            return Err(Error::OutputTooSmall {
                needed,
                got: out.len(),
            });
        }
        let out = &mut out[..needed];

        // Paused: silence, no cursor movement.
        if !self.playback_active {
            out.fill(0.0);
            return Ok(Produced::default());
        }

        let ratio = self.sample_rate as f64 / self.device_sample_rate;
        let samples_per_buffer =
            ((samples_requested as f64 * ratio) as usize).min(self.window_samples);
        self.cursor.set_samples_per_buffer(samples_per_buffer);

        // With a source rate above the device rate the cache window holds
        // more frames than the quantum can carry; the excess frames are
        // consumed from the cache but dropped at the output.
        let frames_out = samples_per_buffer.min(samples_requested);

        if self.buffer_cache_window == 0 {
            cache.swap();
            self.metrics.record_swap();
            if let Some(prefetch) = &self.prefetch {
                prefetch.wake();
            }
        }

        out.fill(0.0);
        let copied = frames_out * channels;
        let offset = samples_per_buffer * channels * self.buffer_cache_window;

        match cache.front().try_lock() {
            Some(front) => {
                for frame in 0..frames_out {
                    for ch in 0..channels {
                        out[frame * channels + ch] = front[offset + frame * channels + ch] as f32
                            * self.channel_info[ch].bit_volts;
                    }
                }
                self.last_window.clear();
                self.last_window.extend_from_slice(&out[..copied]);
            }
            None => {
                // Prefetcher still owns what just became the front buffer.
                self.metrics.record_stale_window();
                warn!("front buffer not ready, replaying previous window");
                let n = self.last_window.len().min(copied);
                out[..n].copy_from_slice(&self.last_window[..n]);
            }
        }

        let quantum_start = self.timestamp;
        self.timestamp += samples_per_buffer as i64;
        let events = self.collect_events(quantum_start, samples_per_buffer as i64);

        self.buffer_cache_window = (self.buffer_cache_window + 1) % self.config.cache_windows;

        Ok(Produced {
            samples_written: frames_out,
            events,
        })
    }

    /// Events whose source positions fall inside the quantum
    /// `[quantum_start, quantum_start + span)` on the unrolled timeline,
    /// translated to absolute timestamps. A quantum that crosses the loop
    /// boundary is split so each segment carries its own lap count.
    fn collect_events(&self, quantum_start: i64, span: i64) -> SmallVec<[PlaybackEvent; 8]> {
        let mut out = SmallVec::new();
        let start = self.cursor.start();
        let stop = self.cursor.stop();
        let scrubbed = stop - start;
        if scrubbed <= 0 || span <= 0 || self.events.is_empty() {
            return out;
        }

        let mut unrolled = (quantum_start - start).max(0);
        let mut remaining = span;
        while remaining > 0 {
            let lap = unrolled / scrubbed;
            let position = start + unrolled % scrubbed;
            let segment = remaining.min(stop - position);

            let lo = self.events.partition_point(|e| e.sample < position);
            let hi = self.events.partition_point(|e| e.sample < position + segment);
            for event in &self.events[lo..hi] {
                out.push(PlaybackEvent {
                    sample: event.sample + lap * scrubbed,
                    line: event.line,
                    state: event.state,
                });
            }

            unrolled += segment;
            remaining -= segment;
        }
        out
    }

    /// Pause/resume without tearing down the stream.
    pub fn toggle_playback(&mut self) {
        self.playback_active = !self.playback_active;
    }

    pub fn set_playback_active(&mut self, active: bool) {
        self.playback_active = active;
    }

    pub fn is_playback_active(&self) -> bool {
        self.playback_active
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn num_channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn total_samples(&self) -> i64 {
        self.total_samples
    }

    /// `stop - start` of the current playback window.
    pub fn scrubbed_samples(&self) -> i64 {
        self.scrubbed_samples
    }

    pub fn channel_infos(&self) -> &[ChannelInfo] {
        &self.channel_info
    }

    /// Prefetch-side view of the playback window.
    pub fn playback_window(&self) -> PlaybackWindow {
        self.cursor.snapshot()
    }

    /// Completed loop traversals as heard at the output (derived from the
    /// consumed timestamp, not from the prefetcher, which runs ahead).
    pub fn loop_count(&self) -> i64 {
        let start = self.cursor.start();
        let scrubbed = self.cursor.stop() - start;
        if scrubbed <= 0 {
            return 0;
        }
        (self.timestamp - start).max(0) / scrubbed
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Playback position in milliseconds, folded into the loop window.
    pub fn current_time_ms(&self) -> u32 {
        let start = self.cursor.start();
        let scrubbed = self.cursor.stop() - start;
        let sample = if self.state == EngineState::Streaming && scrubbed > 0 {
            start + (self.timestamp - start).max(0) % scrubbed
        } else {
            self.cursor.current()
        };
        self.samples_to_ms(sample)
    }

    pub fn total_time_ms(&self) -> u32 {
        self.samples_to_ms(self.total_samples)
    }

    fn samples_to_ms(&self, samples: i64) -> u32 {
        if self.sample_rate <= 0.0 {
            return 0;
        }
        (1000.0 * samples as f64 / self.sample_rate as f64) as u32
    }

    fn ms_to_samples(&self, ms: u32) -> i64 {
        (self.sample_rate as f64 * ms as f64 / 1000.0) as i64
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
