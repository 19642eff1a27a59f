//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No registered file source recognizes the extension.
    #[error("Unsupported file extension: {0}")]
    UnsupportedFormat(String),

    /// The file source rejected the file contents.
    #[error("Invalid recording file: {0}")]
    InvalidFile(String),

    /// The file opened but contains no records.
    #[error("Recording file contains no records")]
    EmptyRecording,

    /// Record index out of range for the open file.
    #[error("Recording index {index} out of range ({count} records)")]
    InvalidRecording { index: usize, count: usize },

    /// Playback was started with no file source open.
    #[error("No file source is open")]
    NotConfigured,

    /// Start and stop samples coincide; the refill loop could never terminate.
    #[error("Playback window is empty (start == stop)")]
    ZeroLengthWindow,

    /// `produce` was called while the engine is not streaming.
    #[error("Playback engine is not streaming")]
    NotStreaming,

    /// Output slice cannot hold one quantum of interleaved samples.
    #[error("Output buffer too small: needed {needed}, got {got}")]
    OutputTooSmall { needed: usize, got: usize },
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
