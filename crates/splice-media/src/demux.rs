//! Demuxer contract: per-source access to compressed frames by index.

use splice_core::{CompressedFrame, FrameFlags, Result, VideoInfo};

/// Extracts compressed frames and their metadata from one container.
///
/// Frame indices are decode order, starting at 0. Timestamps are reported
/// as the container recorded them: possibly missing, possibly noisy; the
/// composition pipeline reconciles them.
pub trait Demuxer: Send + Sync {
    /// Total number of frames in the source.
    fn frame_count(&self) -> u32;

    /// Fill `out` with the compressed frame at `index`.
    fn get_frame(&mut self, index: u32, out: &mut CompressedFrame) -> Result<()>;

    /// Structure flags for the frame at `index`, if in range.
    fn frame_flags(&self, index: u32) -> Option<FrameFlags>;

    /// Container-reported (pts, dts) for the frame at `index`, if in range.
    fn pts_dts(&self, index: u32) -> Option<(Option<u64>, Option<u64>)>;

    /// Best-effort presentation time for the frame at `index`.
    fn estimate_pts(&self, index: u32) -> Option<u64>;

    /// Static video parameters (codec, dimensions, nominal frame rate).
    fn video_info(&self) -> VideoInfo;

    /// Whether this container carries usable presentation timestamps at
    /// all. When it does not, decode timestamps act as a floor for
    /// synthesized presentation times.
    fn provides_pts(&self) -> bool;
}
