//! Opened source videos.

use splice_core::CodecKind;
use splice_media::{Demuxer, FrameCache, VideoDecoder};
use uuid::Uuid;

/// One opened source: its demuxer, decoder and decoded-frame cache, plus
/// the timestamp bookkeeping the decode pipeline maintains.
///
/// A source lives as long as any segment references it; several segments
/// may share one source by reference index. Its demuxer, decoder and cache
/// are exclusive to it; nothing in the engine touches two sources
/// concurrently.
pub struct SourceVideo {
    /// Unique source ID.
    pub id: Uuid,
    pub demuxer: Box<dyn Demuxer>,
    pub decoder: Box<dyn VideoDecoder>,
    pub cache: Box<dyn FrameCache>,

    /// Last source-frame index pushed into the decoder.
    pub last_sent_frame: u32,
    /// Most recent successfully decoded presentation time, in µs.
    pub last_decoded_pts: u64,
    /// Most recent presentation time returned to the caller, in µs.
    pub last_read_pts: u64,
    /// Presentation time of the first frame, in µs.
    pub first_frame_pts: u64,
    /// Nominal inter-frame spacing, used to synthesize missing timestamps.
    pub time_increment_us: u64,
    /// The decoder's B-frame presentation times are unreliable; synthesize
    /// instead of trusting them.
    pub dont_trust_bframe_pts: bool,
    /// Total frames in the source, cached from the demuxer.
    pub frame_count: u32,
}

impl SourceVideo {
    /// Open a source over the given collaborators, deriving the timestamp
    /// bookkeeping from the demuxer.
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        decoder: Box<dyn VideoDecoder>,
        cache: Box<dyn FrameCache>,
    ) -> Self {
        let frame_count = demuxer.frame_count();
        let first_frame_pts = demuxer.estimate_pts(0).unwrap_or(0);
        let time_increment_us = demuxer.video_info().frame_rate.interval_us();
        Self {
            id: Uuid::new_v4(),
            demuxer,
            decoder,
            cache,
            last_sent_frame: 0,
            last_decoded_pts: first_frame_pts,
            last_read_pts: first_frame_pts,
            first_frame_pts,
            time_increment_us,
            dont_trust_bframe_pts: false,
            frame_count,
        }
    }

    /// Mark the source's B-frame presentation times as untrustworthy.
    pub fn with_untrusted_bframe_pts(mut self) -> Self {
        self.dont_trust_bframe_pts = true;
        self
    }

    /// Codec family of this source.
    pub fn codec(&self) -> CodecKind {
        self.demuxer.video_info().codec
    }

    /// Total duration at the nominal frame interval, in µs.
    pub fn nominal_duration_us(&self) -> u64 {
        self.frame_count as u64 * self.time_increment_us
    }
}
