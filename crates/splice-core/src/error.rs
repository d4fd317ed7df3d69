//! Error types for Splice.

use thiserror::Error;

/// Main error type for Splice operations.
#[derive(Error, Debug)]
pub enum SpliceError {
    #[error("demuxer error: {0}")]
    Demux(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("frame cache exhausted: {0}")]
    CacheExhausted(String),

    #[error("timestamp going backward: last {last} us, got {got} us")]
    TimestampOrder { last: u64, got: u64 },

    #[error("end of stream")]
    EndOfStream,

    #[error("seek target is not a keyframe: {0}")]
    NotOnKeyframe(String),

    #[error("cut point error: {0}")]
    BadCutPoint(String),

    #[error("aborted by user: {0}")]
    Aborted(String),

    #[error("timeline error: {0}")]
    Timeline(String),
}

/// Result type alias for Splice operations.
pub type Result<T> = std::result::Result<T, SpliceError>;
