//! Splice Core - Foundation types for the composition engine
//!
//! This crate provides the fundamental types used throughout Splice:
//! - Microsecond timestamps and frame-rate arithmetic
//! - Compressed and decoded frame buffers, frame flags, codec kinds
//! - The shared error type

pub mod error;
pub mod frame;
pub mod time;

pub use error::{Result, SpliceError};
pub use frame::{
    CodecKind, CompressedFrame, DecodedFrame, FrameFlags, FramePlane, FrameType, PixelFormat,
    VideoInfo,
};
pub use time::{format_opt_us, format_us, FrameRate};

/// Retry and correction limits shared by the decode and copy pipelines.
pub mod tuning {
    /// Worst-case H.264 reference depth when decoding up to an intra.
    pub const MAX_REF_FRAMES: u32 = 15;

    /// Extra attempts allowed for decoder warm-up and recovery.
    pub const DECODE_RECOVERY_SLACK: u32 = 7;

    /// How many frames ahead to try when stepping to the next picture.
    pub const NEXT_PICTURE_TRIES: u32 = 20;

    /// Largest backward DTS jump absorbed by delaying frames, in µs.
    pub const MAX_EXTRA_DELAY_US: u64 = 100_000;

    /// How fast accumulated extra delay decays per copied frame, in µs.
    pub const CATCH_UP_RATE_US: u64 = 5_000;

    /// Extra delay above which desync starts being scored, in µs.
    pub const DESYNC_THRESHOLD_US: u64 = 20_000;

    /// Desync score that triggers a continue/abort confirmation.
    pub const MAX_DESYNC_SCORE: i64 = 20 * 100_000;

    /// Consecutive accepted drop prompts before offering to go silent.
    pub const PROMPTS_BEFORE_SILENCE: i32 = 4;

    /// Frames scanned after a cut point for early open-GOP B-frames.
    pub const OPEN_GOP_SCAN_WINDOW: u32 = 16;

    /// Default number of slots in a decoded-frame cache.
    pub const DEFAULT_CACHE_SLOTS: usize = 32;
}
