//! Background prefetch thread and cache refill.
//!
//! The thread wakes on an explicit signal or on its polling interval,
//! whichever comes first, and performs the blocking file reads the
//! real-time consumer must never do. While streaming, the file source's
//! seek/read cursor belongs exclusively to this thread; the consumer only
//! drains already-filled front-buffer windows.

use super::cache::SampleCache;
use super::cursor::PlaybackCursor;
use super::metrics::EngineMetrics;
use crate::error::{Error, Result};
use crate::source::FileSource;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thread_priority::ThreadPriority;
use tracing::{debug, error, warn};

pub(crate) enum PrefetchMsg {
    Wake,
    Shutdown,
}

/// Everything the prefetch loop needs, bundled for the spawn call.
pub(crate) struct PrefetchContext {
    pub source: Arc<Mutex<Box<dyn FileSource>>>,
    pub cache: Arc<SampleCache>,
    pub cursor: Arc<PlaybackCursor>,
    pub metrics: Arc<EngineMetrics>,
    pub channels: usize,
    pub cache_windows: usize,
}

pub(crate) struct PrefetchThread {
    tx: Sender<PrefetchMsg>,
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl PrefetchThread {
    pub fn spawn(ctx: PrefetchContext, poll_interval: Duration) -> Result<Self> {
        let (tx, rx) = bounded(4);
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("ephys-replay-prefetch".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                prefetch_loop(rx, ctx, thread_shutdown, poll_interval);
            })?;

        Ok(Self {
            tx,
            handle: Some(handle),
            shutdown,
        })
    }

    /// Nudge the thread so a freshly requested refill starts before the
    /// next polling tick. Best effort; a full channel means a wake-up is
    /// already pending.
    pub fn wake(&self) {
        let _ = self.tx.try_send(PrefetchMsg::Wake);
    }

    /// Signal shutdown and wait up to `grace` for the thread to exit.
    /// A thread stuck in a blocking read is abandoned; it holds only
    /// shared handles and drops them whenever the read returns.
    pub fn stop(&mut self, grace: Duration) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(PrefetchMsg::Shutdown);

        if let Some(handle) = self.handle.take() {
            let deadline = Instant::now() + grace;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("prefetch thread did not exit within {grace:?}, abandoning");
            }
        }
    }
}

impl Drop for PrefetchThread {
    fn drop(&mut self) {
        self.stop(Duration::from_millis(100));
    }
}

fn prefetch_loop(
    rx: Receiver<PrefetchMsg>,
    ctx: PrefetchContext,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("prefetch thread started");

    loop {
        match rx.recv_timeout(poll_interval) {
            Ok(PrefetchMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(PrefetchMsg::Wake) | Err(RecvTimeoutError::Timeout) => {}
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        if ctx.cache.take_refill_request() {
            let mut back = ctx.cache.back().lock();
            let mut source = ctx.source.lock();
            match read_and_fill_cache(
                source.as_mut(),
                &mut back,
                &ctx.cursor,
                ctx.channels,
                ctx.cache_windows,
            ) {
                Ok(frames) => ctx.metrics.record_refill(frames as u64),
                Err(e) => error!("cache refill failed: {e}"),
            }
        }
    }

    debug!("prefetch thread exiting");
}

/// Fill `buffer` with exactly `samples_per_buffer * cache_windows`
/// interleaved frames, wrapping from the window stop back to its start as
/// many times as needed. The wrap may fire several times in one call when
/// the playback window is shorter than the refill request.
pub(crate) fn read_and_fill_cache(
    source: &mut dyn FileSource,
    buffer: &mut [i16],
    cursor: &PlaybackCursor,
    channels: usize,
    cache_windows: usize,
) -> Result<usize> {
    let samples_per_buffer = cursor.samples_per_buffer();
    let samples_needed =
        (samples_per_buffer * cache_windows).min(buffer.len() / channels.max(1));
    let start = cursor.start();
    let stop = cursor.stop();

    if start >= stop {
        // A zero-length window would spin here forever; fail loudly instead.
        buffer.fill(0);
        return Err(Error::ZeroLengthWindow);
    }

    let mut samples_read = 0;
    while samples_read < samples_needed {
        let mut to_read = samples_needed - samples_read;
        let current = cursor.current();
        let dest = &mut buffer[samples_read * channels..];

        if current + to_read as i64 >= stop {
            // Chunk up to the window stop, then wrap to the start, so
            // `current` always ends inside `[start, stop)`. A cursor already
            // past stop (the window shrank mid-stream) reads nothing and
            // recovers at the wrap.
            to_read = (stop - current).max(0) as usize;
            if to_read > 0 {
                source.read_data(&mut dest[..to_read * channels], to_read);
            }
            source.seek_to(start);
            cursor.wrap_to_start();
        } else {
            source.read_data(&mut dest[..to_read * channels], to_read);
            cursor.advance_current(to_read as i64);
        }

        samples_read += to_read;
    }

    Ok(samples_read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChannelInfo, EventInfo};
    use std::path::Path;

    /// Ramp source: sample value == frame index (mod i16), any channel.
    struct RampSource {
        total: i64,
        position: i64,
        frames_served: usize,
        seeks: Vec<i64>,
    }

    impl RampSource {
        fn new(total: i64) -> Self {
            Self {
                total,
                position: 0,
                frames_served: 0,
                seeks: Vec::new(),
            }
        }
    }

    impl FileSource for RampSource {
        fn open(&mut self, _path: &Path) -> crate::error::Result<()> {
            Ok(())
        }
        fn num_records(&self) -> usize {
            1
        }
        fn set_active_record(&mut self, _index: usize) {}
        fn active_sample_rate(&self) -> f32 {
            30000.0
        }
        fn active_num_channels(&self) -> usize {
            1
        }
        fn active_num_samples(&self) -> i64 {
            self.total
        }
        fn channel_info(&self, channel: usize) -> ChannelInfo {
            ChannelInfo {
                name: format!("CH{}", channel + 1),
                bit_volts: 1.0,
            }
        }
        fn seek_to(&mut self, sample_index: i64) {
            self.seeks.push(sample_index);
            self.position = sample_index;
        }
        fn read_data(&mut self, dest: &mut [i16], num_samples: usize) -> usize {
            for slot in dest.iter_mut().take(num_samples) {
                *slot = (self.position % 32768) as i16;
                self.position += 1;
            }
            self.frames_served += num_samples;
            num_samples
        }
        fn events_in_range(&mut self, _out: &mut EventInfo, _start: i64, _stop: i64) {}
    }

    fn cursor_for(start: i64, stop: i64, samples_per_buffer: usize) -> PlaybackCursor {
        let cursor = PlaybackCursor::new();
        cursor.set_range(start, stop);
        cursor.set_current(start);
        cursor.set_samples_per_buffer(samples_per_buffer);
        cursor
    }

    #[test]
    fn test_straight_refill_no_wrap() {
        let mut source = RampSource::new(10000);
        let cursor = cursor_for(0, 10000, 100);
        let mut buffer = vec![0i16; 400];

        let filled = read_and_fill_cache(&mut source, &mut buffer, &cursor, 1, 4).unwrap();

        assert_eq!(filled, 400);
        assert_eq!(cursor.current(), 400);
        assert_eq!(cursor.loop_count(), 0);
        assert_eq!(buffer[0], 0);
        assert_eq!(buffer[399], 399);
        assert!(source.seeks.is_empty());
    }

    #[test]
    fn test_wrap_mid_refill() {
        // Window of 300 samples, request of 400: wraps once.
        let mut source = RampSource::new(1000);
        let cursor = cursor_for(700, 1000, 100);
        source.seek_to(700);
        source.seeks.clear();

        let mut buffer = vec![0i16; 400];
        let filled = read_and_fill_cache(&mut source, &mut buffer, &cursor, 1, 4).unwrap();

        assert_eq!(filled, 400);
        assert_eq!(cursor.loop_count(), 1);
        assert_eq!(cursor.current(), 800);
        assert_eq!(source.seeks, vec![700]);
        // Data runs 700..1000 then 700..800.
        assert_eq!(buffer[0], 700);
        assert_eq!(buffer[299], 999);
        assert_eq!(buffer[300], 700);
        assert_eq!(buffer[399], 799);
    }

    #[test]
    fn test_short_window_wraps_repeatedly() {
        // start=950, stop=1000, samples_per_buffer=100,
        // four windows. 400 requested from a 50-sample window: 8 wraps,
        // current ends at 950 + (100 * 4 mod 50) = 950.
        let mut source = RampSource::new(1000);
        let cursor = cursor_for(950, 1000, 100);
        source.seek_to(950);
        source.seeks.clear();

        let mut buffer = vec![0i16; 400];
        let filled = read_and_fill_cache(&mut source, &mut buffer, &cursor, 1, 4).unwrap();

        assert_eq!(filled, 400);
        assert_eq!(source.frames_served, 400, "never reads more than needed");
        assert_eq!(cursor.loop_count(), 8);
        assert_eq!(cursor.current(), 950);
        assert_eq!(source.seeks, vec![950; 8]);
    }

    #[test]
    fn test_exact_fit_refill_wraps() {
        // A refill that lands exactly on stop wraps immediately; current
        // never rests at the exclusive bound.
        let mut source = RampSource::new(1000);
        let cursor = cursor_for(0, 100, 25);
        let mut buffer = vec![0i16; 100];

        let filled = read_and_fill_cache(&mut source, &mut buffer, &cursor, 1, 4).unwrap();

        assert_eq!(filled, 100);
        assert_eq!(cursor.current(), 0);
        assert_eq!(cursor.loop_count(), 1);
        assert_eq!(source.seeks, vec![0]);
        assert_eq!(buffer[99], 99);
    }

    #[test]
    fn test_refill_recovers_when_cursor_overruns_stop() {
        // A range change while streaming can leave the read cursor past the
        // new stop; the refill wraps back instead of reading a negative span.
        let mut source = RampSource::new(10000);
        let cursor = cursor_for(0, 1000, 100);
        cursor.set_current(5000);
        source.seek_to(5000);
        source.seeks.clear();

        let mut buffer = vec![0i16; 400];
        let filled = read_and_fill_cache(&mut source, &mut buffer, &cursor, 1, 4).unwrap();

        assert_eq!(filled, 400);
        assert_eq!(cursor.loop_count(), 1);
        assert_eq!(cursor.current(), 400);
        assert_eq!(source.seeks, vec![0]);
        assert_eq!(buffer[0], 0);
        assert_eq!(buffer[399], 399);
    }

    #[test]
    fn test_zero_length_window_fails_fast() {
        let mut source = RampSource::new(1000);
        let cursor = cursor_for(500, 500, 100);
        let mut buffer = vec![1i16; 400];

        let result = read_and_fill_cache(&mut source, &mut buffer, &cursor, 1, 4);

        assert!(matches!(result, Err(Error::ZeroLengthWindow)));
        assert!(buffer.iter().all(|&s| s == 0), "buffer is silenced");
        assert_eq!(source.frames_served, 0);
    }

    #[test]
    fn test_multichannel_interleaving() {
        struct TwoChannel {
            position: i64,
        }
        impl FileSource for TwoChannel {
            fn open(&mut self, _path: &Path) -> crate::error::Result<()> {
                Ok(())
            }
            fn num_records(&self) -> usize {
                1
            }
            fn set_active_record(&mut self, _index: usize) {}
            fn active_sample_rate(&self) -> f32 {
                30000.0
            }
            fn active_num_channels(&self) -> usize {
                2
            }
            fn active_num_samples(&self) -> i64 {
                1000
            }
            fn channel_info(&self, _channel: usize) -> ChannelInfo {
                ChannelInfo {
                    name: "CH".into(),
                    bit_volts: 1.0,
                }
            }
            fn seek_to(&mut self, sample_index: i64) {
                self.position = sample_index;
            }
            fn read_data(&mut self, dest: &mut [i16], num_samples: usize) -> usize {
                for frame in 0..num_samples {
                    dest[frame * 2] = (self.position % 32768) as i16;
                    dest[frame * 2 + 1] = -((self.position % 32768) as i16);
                    self.position += 1;
                }
                num_samples
            }
            fn events_in_range(&mut self, _out: &mut EventInfo, _start: i64, _stop: i64) {}
        }

        let mut source = TwoChannel { position: 0 };
        let cursor = cursor_for(0, 1000, 10);
        let mut buffer = vec![0i16; 2 * 40];

        let filled = read_and_fill_cache(&mut source, &mut buffer, &cursor, 2, 4).unwrap();

        assert_eq!(filled, 40);
        assert_eq!(buffer[0], 0);
        assert_eq!(buffer[1], 0);
        assert_eq!(buffer[2], 1);
        assert_eq!(buffer[3], -1);
        assert_eq!(buffer[78], 39);
        assert_eq!(buffer[79], -39);
    }

    #[test]
    fn test_thread_refills_on_request() {
        let source: Arc<Mutex<Box<dyn FileSource>>> =
            Arc::new(Mutex::new(Box::new(RampSource::new(100000))));
        let cache = Arc::new(SampleCache::new(400));
        let cursor = Arc::new(PlaybackCursor::new());
        cursor.set_range(0, 100000);
        cursor.set_samples_per_buffer(100);
        let metrics = Arc::new(EngineMetrics::new());

        let mut thread = PrefetchThread::spawn(
            PrefetchContext {
                source,
                cache: Arc::clone(&cache),
                cursor: Arc::clone(&cursor),
                metrics: Arc::clone(&metrics),
                channels: 1,
                cache_windows: 4,
            },
            Duration::from_millis(30),
        )
        .unwrap();

        cache.request_refill();
        thread.wake();

        let deadline = Instant::now() + Duration::from_secs(2);
        while metrics.snapshot().refills == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        thread.stop(Duration::from_millis(100));

        assert_eq!(metrics.snapshot().refills, 1);
        assert_eq!(metrics.snapshot().frames_read, 400);
        assert_eq!(cursor.current(), 400);
        assert_eq!(cache.back().lock()[399], 399);
    }

    #[test]
    fn test_thread_stops_within_grace() {
        let source: Arc<Mutex<Box<dyn FileSource>>> =
            Arc::new(Mutex::new(Box::new(RampSource::new(1000))));
        let cache = Arc::new(SampleCache::new(400));
        let cursor = Arc::new(PlaybackCursor::new());
        cursor.set_range(0, 1000);
        let metrics = Arc::new(EngineMetrics::new());

        let mut thread = PrefetchThread::spawn(
            PrefetchContext {
                source,
                cache,
                cursor,
                metrics,
                channels: 1,
                cache_windows: 4,
            },
            Duration::from_millis(30),
        )
        .unwrap();

        let begin = Instant::now();
        thread.stop(Duration::from_millis(100));
        assert!(begin.elapsed() < Duration::from_millis(500));
    }
}
