//! Synthetic in-memory media source.
//!
//! A scripted frame-table demuxer plus a decoder model with configurable
//! reorder lag and drain semantics. Used by tests, benchmarks and
//! development: it reproduces the timestamp pathologies the composition
//! engine exists to absorb (missing PTS/DTS, backward jumps, open-GOP
//! B-frames) without touching a real container.

use crate::decode::VideoDecoder;
use crate::demux::Demuxer;
use splice_core::{CompressedFrame, DecodedFrame, FrameFlags, Result, SpliceError, VideoInfo};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ── Scripted demuxer ────────────────────────────────────────────

/// One scripted frame, in decode order.
#[derive(Debug, Clone)]
pub struct SimFrame {
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub flags: FrameFlags,
}

impl SimFrame {
    /// A keyframe with the given timestamps.
    pub fn key(pts: u64, dts: u64) -> Self {
        Self {
            pts: Some(pts),
            dts: Some(dts),
            flags: FrameFlags::KEY,
        }
    }

    /// A predicted frame with the given timestamps.
    pub fn pred(pts: u64, dts: u64) -> Self {
        Self {
            pts: Some(pts),
            dts: Some(dts),
            flags: FrameFlags::default(),
        }
    }

    /// A B-frame with the given timestamps.
    pub fn bframe(pts: u64, dts: u64) -> Self {
        Self {
            pts: Some(pts),
            dts: Some(dts),
            flags: FrameFlags {
                bframe: true,
                ..FrameFlags::default()
            },
        }
    }

    /// Drop both timestamps.
    pub fn without_timestamps(mut self) -> Self {
        self.pts = None;
        self.dts = None;
        self
    }

    /// Replace the presentation timestamp.
    pub fn with_pts(mut self, pts: Option<u64>) -> Self {
        self.pts = pts;
        self
    }

    /// Replace the decode timestamp.
    pub fn with_dts(mut self, dts: Option<u64>) -> Self {
        self.dts = dts;
        self
    }

    /// Mark as field-encoded.
    pub fn field_encoded(mut self) -> Self {
        self.flags.field_structure = true;
        self
    }
}

/// In-memory demuxer over a scripted frame table.
pub struct SyntheticSource {
    frames: Vec<SimFrame>,
    info: VideoInfo,
    provides_pts: bool,
    fail_fetch: HashSet<u32>,
    fetches: Arc<AtomicU32>,
}

impl SyntheticSource {
    pub fn new(info: VideoInfo, frames: Vec<SimFrame>) -> Self {
        Self {
            frames,
            info,
            provides_pts: true,
            fail_fetch: HashSet::new(),
            fetches: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Pretend the container carries no usable PTS.
    pub fn without_pts(mut self) -> Self {
        self.provides_pts = false;
        self
    }

    /// Make fetching the frame at `index` fail, simulating a damaged or
    /// truncated container.
    pub fn fail_fetch_at(mut self, index: u32) -> Self {
        self.fail_fetch.insert(index);
        self
    }

    /// Shared counter of `get_frame` calls, for asserting that cached
    /// seeks do not hit the container again.
    pub fn fetch_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.fetches)
    }
}

impl Demuxer for SyntheticSource {
    fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    fn get_frame(&mut self, index: u32, out: &mut CompressedFrame) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if self.fail_fetch.contains(&index) {
            return Err(SpliceError::Demux(format!("fetch failure at frame {index}")));
        }
        let frame = self
            .frames
            .get(index as usize)
            .ok_or_else(|| SpliceError::Demux(format!("no frame {index}")))?;
        out.reset();
        out.data.extend_from_slice(&index.to_le_bytes());
        out.data.resize(16, 0);
        out.pts = frame.pts;
        out.dts = frame.dts;
        out.flags = frame.flags;
        Ok(())
    }

    fn frame_flags(&self, index: u32) -> Option<FrameFlags> {
        self.frames.get(index as usize).map(|f| f.flags)
    }

    fn pts_dts(&self, index: u32) -> Option<(Option<u64>, Option<u64>)> {
        self.frames.get(index as usize).map(|f| (f.pts, f.dts))
    }

    fn estimate_pts(&self, index: u32) -> Option<u64> {
        self.frames.get(index as usize).and_then(|f| f.pts)
    }

    fn video_info(&self) -> VideoInfo {
        self.info
    }

    fn provides_pts(&self) -> bool {
        self.provides_pts
    }
}

// ── Decoder model ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PendingPicture {
    pts: Option<u64>,
    flags: FrameFlags,
}

/// Decoder model with configurable reorder lag.
///
/// Holds up to `reorder` pictures before producing output, then emits in
/// presentation order, the way a real decoder resolves B-frame reordering.
/// An empty input payload (or draining mode) pops buffered output; popping
/// an empty buffer marks end of stream.
pub struct SimDecoder {
    reorder: usize,
    pending: Vec<PendingPicture>,
    draining: bool,
    eos: bool,
    zero_copy: bool,
}

impl SimDecoder {
    pub fn new(reorder: usize) -> Self {
        Self {
            reorder,
            pending: Vec::new(),
            draining: false,
            eos: false,
            zero_copy: false,
        }
    }

    /// Model a decoder exposing reference-only output.
    pub fn with_zero_copy(mut self) -> Self {
        self.zero_copy = true;
        self
    }

    fn pop_presentation_order(&mut self) -> Option<PendingPicture> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.pts.unwrap_or(0))
            .map(|(i, _)| i)?;
        Some(self.pending.remove(idx))
    }

    fn emit(out: &mut DecodedFrame, picture: PendingPicture) {
        out.pts = picture.pts;
        out.flags = picture.flags;
        out.no_picture = false;
    }
}

impl VideoDecoder for SimDecoder {
    fn decompress(&mut self, input: &CompressedFrame, out: &mut DecodedFrame) -> bool {
        if input.data.is_empty() || self.draining {
            return match self.pop_presentation_order() {
                Some(p) => {
                    Self::emit(out, p);
                    true
                }
                None => {
                    self.eos = true;
                    out.no_picture = true;
                    false
                }
            };
        }
        self.pending.push(PendingPicture {
            pts: input.pts,
            flags: input.flags,
        });
        if self.pending.len() > self.reorder {
            match self.pop_presentation_order() {
                Some(p) => {
                    Self::emit(out, p);
                    true
                }
                None => false,
            }
        } else {
            // warm-up: picture retained, nothing to show yet
            out.no_picture = true;
            false
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }

    fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
    }

    fn is_draining(&self) -> bool {
        self.draining
    }

    fn end_of_stream_reached(&self) -> bool {
        self.eos
    }

    fn set_end_of_stream(&mut self, eos: bool) {
        self.eos = eos;
    }

    fn keep_feeding(&self) -> bool {
        !self.draining && self.pending.len() <= self.reorder
    }

    fn zero_copy(&self) -> bool {
        self.zero_copy
    }
}
