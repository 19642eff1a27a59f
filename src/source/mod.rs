//! File source abstraction for recording containers.
//!
//! A [`FileSource`] decodes one container format: it opens a recording file,
//! reports how many records it holds, and serves interleaved `i16` sample
//! data and discrete event data for the active record. The playback engine
//! treats sources as injected collaborators; concrete implementations are
//! selected by file extension through the [`SourceRegistry`].

mod registry;
mod wav;

pub use registry::{SourceFactory, SourceRegistry};
pub use wav::WavFileSource;

use crate::error::Result;
use std::path::Path;

/// Per-channel metadata for the active record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    /// Channel name, e.g. `"CH1"`.
    pub name: String,
    /// Scale factor from raw `i16` sample values to physical units.
    pub bit_volts: f32,
}

/// One discrete (TTL-style) event in the active record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Sample index the event occurred at, relative to the record start.
    pub sample: i64,
    /// Hardware line the event was recorded on.
    pub line: u8,
    /// Rising (`true`) or falling (`false`) edge.
    pub state: bool,
}

/// Collection of events returned by [`FileSource::events_in_range`].
#[derive(Debug, Clone, Default)]
pub struct EventInfo {
    pub events: Vec<EventRecord>,
}

/// A single decodable recording container.
///
/// The seek/read cursor behind [`seek_to`](FileSource::seek_to) and
/// [`read_data`](FileSource::read_data) is exclusively owned by the prefetch
/// thread while the engine is streaming; implementations do not need any
/// internal synchronization, but must remain safely droppable while a read
/// is abandoned mid-flight.
pub trait FileSource: Send {
    /// Open a recording file. Returns `Error::InvalidFile` when the
    /// container is corrupt or not actually this format.
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Number of records in the open file.
    fn num_records(&self) -> usize;

    /// Select the record that subsequent metadata and data calls refer to.
    fn set_active_record(&mut self, index: usize);

    /// Native sample rate of the active record.
    fn active_sample_rate(&self) -> f32;

    /// Channel count of the active record.
    fn active_num_channels(&self) -> usize;

    /// Total sample count (per channel) of the active record.
    fn active_num_samples(&self) -> i64;

    /// Metadata for one channel of the active record.
    fn channel_info(&self, channel: usize) -> ChannelInfo;

    /// Move the read cursor to an absolute sample index.
    fn seek_to(&mut self, sample_index: i64);

    /// Read `num_samples` interleaved frames from the cursor into `dest`,
    /// advancing the cursor. Returns the number of frames actually read;
    /// any shortfall near end-of-file is zero-filled in `dest`.
    fn read_data(&mut self, dest: &mut [i16], num_samples: usize) -> usize;

    /// Append all events with `start <= sample < stop` to `out`.
    fn events_in_range(&mut self, out: &mut EventInfo, start: i64, stop: i64);
}
