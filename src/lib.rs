//! Streaming playback engine for neurophysiology recordings.
//!
//! Replays recorded acquisition files through a fixed-size real-time
//! callback: a background prefetch thread keeps a double-buffered sample
//! cache fed from disk while [`PlaybackEngine::produce`] drains it one
//! cache window per quantum, rate-matched between the file's native sample
//! rate and the playback device, with looped playback over a trimmed
//! `[start, stop)` window and discrete events kept in sync across loops.
//!
//! # Example
//!
//! ```ignore
//! use ephys_replay::{EngineConfig, PlaybackEngine};
//!
//! let mut engine = PlaybackEngine::new(EngineConfig::default());
//! engine.open("session.wav")?;
//! engine.set_playback_range(30_000, 90_000)?;
//! engine.start(44_100.0, 1024)?;
//!
//! // In the real-time callback:
//! let produced = engine.produce(1024, &mut interleaved_out)?;
//! for event in &produced.events {
//!     // event.sample is monotonic across loop iterations
//! }
//! ```

pub mod error;
pub use error::{Error, Result};

mod config;
pub use config::EngineConfig;

pub mod engine;
pub use engine::{
    EngineMetrics, EngineMetricsSnapshot, EngineState, PlaybackEngine, PlaybackEvent,
    PlaybackWindow, Produced,
};

pub mod source;
pub use source::{
    ChannelInfo, EventInfo, EventRecord, FileSource, SourceFactory, SourceRegistry, WavFileSource,
};
