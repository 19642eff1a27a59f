//! Built-in WAV file source.
//!
//! Treats a 16-bit PCM WAV file as a single-record recording. WAV carries
//! no discrete event data, so `events_in_range` yields nothing.

use super::{ChannelInfo, EventInfo, FileSource};
use crate::error::{Error, Result};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub struct WavFileSource {
    reader: Option<WavReader<BufReader<File>>>,
    channels: usize,
    sample_rate: f32,
    num_samples: i64,
}

impl WavFileSource {
    pub fn new() -> Self {
        Self {
            reader: None,
            channels: 0,
            sample_rate: 0.0,
            num_samples: 0,
        }
    }
}

impl Default for WavFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSource for WavFileSource {
    fn open(&mut self, path: &Path) -> Result<()> {
        let reader = WavReader::open(path)
            .map_err(|e| Error::InvalidFile(format!("{}: {e}", path.display())))?;

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(Error::InvalidFile(format!(
                "{}: only 16-bit integer PCM is supported",
                path.display()
            )));
        }

        self.channels = spec.channels as usize;
        self.sample_rate = spec.sample_rate as f32;
        self.num_samples = reader.duration() as i64;
        self.reader = Some(reader);
        Ok(())
    }

    fn num_records(&self) -> usize {
        // A zero-length file opens cleanly but holds nothing playable.
        if self.num_samples > 0 {
            1
        } else {
            0
        }
    }

    fn set_active_record(&mut self, _index: usize) {}

    fn active_sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn active_num_channels(&self) -> usize {
        self.channels
    }

    fn active_num_samples(&self) -> i64 {
        self.num_samples
    }

    fn channel_info(&self, channel: usize) -> ChannelInfo {
        ChannelInfo {
            name: format!("CH{}", channel + 1),
            bit_volts: 1.0 / 32768.0,
        }
    }

    fn seek_to(&mut self, sample_index: i64) {
        if let Some(reader) = self.reader.as_mut() {
            let frame = sample_index.clamp(0, self.num_samples) as u32;
            if let Err(e) = reader.seek(frame) {
                tracing::warn!("wav seek to frame {frame} failed: {e}");
            }
        }
    }

    fn read_data(&mut self, dest: &mut [i16], num_samples: usize) -> usize {
        let channels = self.channels;
        let wanted = num_samples * channels;
        let mut filled = 0;

        if let Some(reader) = self.reader.as_mut() {
            let mut samples = reader.samples::<i16>();
            while filled < wanted {
                match samples.next() {
                    Some(Ok(value)) => {
                        dest[filled] = value;
                        filled += 1;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("wav read error after {filled} values: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }

        dest[filled..wanted].fill(0);
        filled / channels.max(1)
    }

    fn events_in_range(&mut self, _out: &mut EventInfo, _start: i64, _stop: i64) {}
}
