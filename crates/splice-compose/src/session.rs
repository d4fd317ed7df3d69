//! Composer session state and segment switching.
//!
//! All mutable composition state lives here in explicit structs owned by
//! the session (statistics, stream-copy correction state, the current
//! segment cursor), reset explicitly at the start of a seek or export,
//! never implicitly.

use serde::{Deserialize, Serialize};
use splice_core::{CompressedFrame, DecodedFrame, PixelFormat, Result, SpliceError};
use splice_media::{AlwaysContinue, ConfirmPolicy, Demuxer, PostProcConfig, PostProcessor};
use splice_timeline::SegmentTable;
use tracing::info;

// ── Session state ───────────────────────────────────────────────

/// Frame-type and failure counters for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub i_frames: u64,
    pub p_frames: u64,
    pub b_frames: u64,
    /// Decode calls that produced no picture.
    pub no_image: u64,
    /// Decoded frames dropped for going backward in time.
    pub pts_going_back: u64,
}

/// Running stream-copy correction state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyState {
    /// Expected decode timestamp of the next emitted frame, linear µs.
    pub next_frame_dts: Option<i64>,
    /// Cumulative delay added to absorb backward DTS jumps, in µs.
    /// Decays over time so short glitches do not shift the whole tail.
    pub total_extra_delay: u64,
    /// Accumulated desync measure; `-1` means the user chose to ignore it.
    pub desync_score: i64,
    /// Drop prompts accepted in a row; `-1` means silenced.
    pub warn_count: i32,
}

/// Reusable decode targets: the main image buffer, plus a scratch image
/// for zero-copy decoders whose output must be copied out.
pub(crate) struct ScratchBuffers {
    pub image: DecodedFrame,
    pub scratch: Option<DecodedFrame>,
}

// ── Composer ────────────────────────────────────────────────────

/// The composition session: owns the segment table and drives decoding
/// and stream copy over it.
///
/// Single-threaded and synchronous; interactive seeking and export are
/// mutually exclusive modes of one session.
pub struct Composer {
    pub(crate) segments: SegmentTable,
    pub(crate) current_segment: usize,
    /// Linear frame counter.
    pub(crate) current_frame: u32,
    pub(crate) end_of_stream: bool,
    pub(crate) stats: SessionStats,
    pub(crate) copy: CopyState,
    /// Reusable compressed-frame scratch for the decode path.
    pub(crate) comp_buffer: CompressedFrame,
    pub(crate) buffers: ScratchBuffers,
    pub(crate) post: Option<Box<dyn PostProcessor>>,
    pub(crate) post_config: PostProcConfig,
    pub(crate) confirm: Box<dyn ConfirmPolicy>,
}

impl Composer {
    /// Build a session over a segment table. Decode buffers are sized for
    /// the first source's frames.
    pub fn new(segments: SegmentTable) -> Self {
        let (width, height) = segments
            .source(0)
            .map(|src| {
                let info = src.demuxer.video_info();
                (info.width, info.height)
            })
            .unwrap_or((16, 16));
        Self {
            segments,
            current_segment: 0,
            current_frame: 0,
            end_of_stream: false,
            stats: SessionStats::default(),
            copy: CopyState::default(),
            comp_buffer: CompressedFrame::with_capacity(width as usize * height as usize * 3),
            buffers: ScratchBuffers {
                image: DecodedFrame::new(width, height, PixelFormat::Yuv420P),
                scratch: None,
            },
            post: None,
            post_config: PostProcConfig::default(),
            confirm: Box::new(AlwaysContinue),
        }
    }

    /// Replace the confirmation policy (a UI prompt in production, a
    /// scripted responder in tests).
    pub fn with_confirm_policy(mut self, confirm: Box<dyn ConfirmPolicy>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Attach a post-processing filter and its gate settings.
    pub fn with_post_processor(
        mut self,
        post: Box<dyn PostProcessor>,
        config: PostProcConfig,
    ) -> Self {
        self.post = Some(post);
        self.post_config = config;
        self
    }

    pub fn segments(&self) -> &SegmentTable {
        &self.segments
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn copy_state(&self) -> &CopyState {
        &self.copy
    }

    pub fn current_segment(&self) -> usize {
        self.current_segment
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Zero all per-session counters and cursors.
    pub fn reset_session(&mut self) {
        self.stats = SessionStats::default();
        self.current_segment = 0;
        self.current_frame = 0;
        self.end_of_stream = false;
    }

    /// Zero the stream-copy correction state.
    pub fn reset_copy(&mut self) {
        self.copy = CopyState::default();
    }

    // ── Segment switching ───────────────────────────────────────

    /// Make `index` the active segment, positioning its source at the
    /// segment's reference start. With `dont_decode` only the source
    /// frame cursor moves, which leaves it at the keyframe at or before
    /// the cut, which is what stream copy wants.
    pub fn switch_to_segment(&mut self, index: usize, dont_decode: bool) -> Result<()> {
        let seg = self
            .segments
            .segment(index)
            .ok_or_else(|| SpliceError::Timeline(format!("no segment {index}")))?
            .clone();
        self.seek_to_time(seg.reference, seg.ref_start_time_us, dont_decode)?;
        self.current_segment = index;
        Ok(())
    }

    /// Advance to the following segment, or fail at the end of the
    /// timeline.
    pub fn switch_to_next_segment(&mut self, dont_decode: bool) -> Result<()> {
        let next = self.current_segment + 1;
        if next >= self.segments.num_segments() {
            return Err(SpliceError::EndOfStream);
        }
        self.switch_to_segment(next, dont_decode)
    }

    /// Position a stream-copy export at a linear time: activate the
    /// containing segment and reset the correction state.
    pub fn start_copy(&mut self, linear_us: u64) -> Result<()> {
        let (seg_no, _) = self
            .segments
            .seg_from_linear_time(linear_us)
            .ok_or_else(|| {
                SpliceError::Timeline(format!("time {linear_us} us outside the timeline"))
            })?;
        self.switch_to_segment(seg_no, true)?;
        self.reset_copy();
        info!(segment = seg_no, "stream copy positioned");
        Ok(())
    }
}
