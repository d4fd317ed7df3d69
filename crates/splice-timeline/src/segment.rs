//! Segment table: contiguous cut ranges over the linear timeline.

use serde::{Deserialize, Serialize};
use splice_core::{Result, SpliceError};
use splice_media::Demuxer;
use tracing::debug;

use crate::source::SourceVideo;

/// B-frame drop policy state after a segment switch, for codecs whose
/// open-GOP B-frames can simply be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DropState {
    /// Pass B-frames through.
    #[default]
    NoDrop,
    /// Currently dropping B-frames that trail a cut.
    Dropping,
    /// A switch just happened; start dropping at the next non-B frame.
    MaybeAfterSwitch,
}

/// One contiguous range of the logical timeline, mapped to a time range
/// inside a source video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Index of the source video this segment plays from.
    pub reference: usize,
    /// Position on the linear timeline, in µs.
    pub start_time_us: u64,
    /// Length on the linear timeline, in µs.
    pub duration_us: u64,
    /// Position within the source, in µs.
    pub ref_start_time_us: u64,
    /// Decode timestamp recorded at the cut point, when known.
    pub ref_start_dts: Option<u64>,
    /// Post-switch B-frame drop policy state.
    pub drop_bframes: DropState,
}

impl Segment {
    pub fn new(
        reference: usize,
        start_time_us: u64,
        duration_us: u64,
        ref_start_time_us: u64,
        ref_start_dts: Option<u64>,
    ) -> Self {
        Self {
            reference,
            start_time_us,
            duration_us,
            ref_start_time_us,
            ref_start_dts,
            drop_bframes: DropState::NoDrop,
        }
    }

    /// End of this segment on the linear timeline, exclusive.
    pub fn end_time_us(&self) -> u64 {
        self.start_time_us + self.duration_us
    }

    /// End of this segment inside the source, exclusive. Frames whose
    /// timestamps reach this are the next segment's business.
    pub fn ref_end_time_us(&self) -> u64 {
        self.ref_start_time_us + self.duration_us
    }

    /// Map a linear time inside this segment to source time.
    pub fn linear_to_ref(&self, linear_us: u64) -> u64 {
        linear_us - self.start_time_us + self.ref_start_time_us
    }

    /// Map a source time inside this segment to linear time.
    pub fn ref_to_linear(&self, ref_us: u64) -> u64 {
        ref_us - self.ref_start_time_us + self.start_time_us
    }
}

/// Ordered, contiguous segments plus the source videos they reference.
///
/// The composition engine only reads the table; edit operations build it.
pub struct SegmentTable {
    segments: Vec<Segment>,
    sources: Vec<SourceVideo>,
}

impl SegmentTable {
    /// An empty timeline over the given sources.
    pub fn new(sources: Vec<SourceVideo>) -> Self {
        Self {
            segments: Vec::new(),
            sources,
        }
    }

    /// A timeline playing each source whole, back to back.
    pub fn from_sources(sources: Vec<SourceVideo>) -> Self {
        let mut segments = Vec::with_capacity(sources.len());
        let mut start = 0_u64;
        for (reference, src) in sources.iter().enumerate() {
            let duration = src.nominal_duration_us();
            let ref_start_dts = src.demuxer.pts_dts(0).and_then(|(_, dts)| dts);
            segments.push(Segment::new(
                reference,
                start,
                duration,
                src.first_frame_pts,
                ref_start_dts,
            ));
            start += duration;
        }
        Self { segments, sources }
    }

    /// Append a segment. The table should be `validate`d once built.
    pub fn push_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Check ordering, contiguity and reference bounds.
    pub fn validate(&self) -> Result<()> {
        let mut expected_start = 0_u64;
        for (i, seg) in self.segments.iter().enumerate() {
            if seg.reference >= self.sources.len() {
                return Err(SpliceError::Timeline(format!(
                    "segment {i} references source {} of {}",
                    seg.reference,
                    self.sources.len()
                )));
            }
            if seg.duration_us == 0 {
                return Err(SpliceError::Timeline(format!("segment {i} is empty")));
            }
            if seg.start_time_us != expected_start {
                return Err(SpliceError::Timeline(format!(
                    "segment {i} starts at {} us, expected {} us",
                    seg.start_time_us, expected_start
                )));
            }
            expected_start = seg.end_time_us();
        }
        Ok(())
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn segment_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments.get_mut(index)
    }

    pub fn source(&self, reference: usize) -> Option<&SourceVideo> {
        self.sources.get(reference)
    }

    pub fn source_mut(&mut self, reference: usize) -> Option<&mut SourceVideo> {
        self.sources.get_mut(reference)
    }

    /// Total length of the linear timeline, in µs.
    pub fn total_duration_us(&self) -> u64 {
        self.segments.last().map_or(0, Segment::end_time_us)
    }

    /// Find which segment contains the given linear time.
    /// Returns (segment index, time within the segment).
    pub fn seg_from_linear_time(&self, linear_us: u64) -> Option<(usize, u64)> {
        for (i, seg) in self.segments.iter().enumerate() {
            if linear_us >= seg.start_time_us && linear_us < seg.end_time_us() {
                return Some((i, linear_us - seg.start_time_us));
            }
        }
        debug!(time_us = linear_us, "time outside the timeline");
        None
    }

    /// Source-frame index whose presentation time is exactly `time_us`.
    pub fn frame_at_ref_time(&self, reference: usize, time_us: u64) -> Option<u32> {
        let src = self.sources.get(reference)?;
        (0..src.frame_count)
            .find(|&i| matches!(src.demuxer.pts_dts(i), Some((Some(pts), _)) if pts == time_us))
    }

    /// Whether the frame presented at exactly `time_us` is a keyframe.
    pub fn is_keyframe_at_time(&self, reference: usize, time_us: u64) -> bool {
        let Some(frame) = self.frame_at_ref_time(reference, time_us) else {
            return false;
        };
        self.sources[reference]
            .demuxer
            .frame_flags(frame)
            .is_some_and(|f| f.keyframe)
    }

    /// Presentation time of the nearest keyframe strictly before
    /// `time_us`, scanning the source's frame table.
    pub fn prev_keyframe_before(&self, reference: usize, time_us: u64) -> Option<u64> {
        let src = self.sources.get(reference)?;
        let mut best: Option<u64> = None;
        for i in 0..src.frame_count {
            let keyframe = src.demuxer.frame_flags(i).is_some_and(|f| f.keyframe);
            if !keyframe {
                continue;
            }
            if let Some((Some(pts), _)) = src.demuxer.pts_dts(i) {
                if pts < time_us && best.map_or(true, |b| pts > b) {
                    best = Some(pts);
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use splice_core::{CodecKind, FrameRate, PixelFormat, VideoInfo};
    use splice_media::{SimDecoder, SimFrame, SlotCache, SyntheticSource};

    const INC: u64 = 40_000;

    fn source(frames: Vec<SimFrame>) -> SourceVideo {
        let info = VideoInfo {
            codec: CodecKind::Mpeg4Asp,
            width: 64,
            height: 48,
            frame_rate: FrameRate::FPS_25,
        };
        SourceVideo::new(
            Box::new(SyntheticSource::new(info, frames)),
            Box::new(SimDecoder::new(0)),
            Box::new(SlotCache::new(8, 64, 48, PixelFormat::Yuv420P)),
        )
    }

    fn regular_frames(count: u32, key_every: u32) -> Vec<SimFrame> {
        (0..count)
            .map(|i| {
                let t = i as u64 * INC;
                if i % key_every == 0 {
                    SimFrame::key(t, t)
                } else {
                    SimFrame::pred(t, t)
                }
            })
            .collect()
    }

    #[test]
    fn from_sources_builds_contiguous_timeline() {
        let table = SegmentTable::from_sources(vec![
            source(regular_frames(10, 5)),
            source(regular_frames(4, 4)),
        ]);
        table.validate().unwrap();
        assert_eq!(table.num_segments(), 2);
        assert_eq!(table.total_duration_us(), 14 * INC);
        assert_eq!(table.segment(1).unwrap().start_time_us, 10 * INC);
    }

    #[test]
    fn linear_time_resolves_to_segment_and_offset() {
        let table = SegmentTable::from_sources(vec![
            source(regular_frames(10, 5)),
            source(regular_frames(4, 4)),
        ]);
        assert_eq!(table.seg_from_linear_time(0), Some((0, 0)));
        assert_eq!(table.seg_from_linear_time(9 * INC), Some((0, 9 * INC)));
        assert_eq!(table.seg_from_linear_time(10 * INC), Some((1, 0)));
        assert_eq!(table.seg_from_linear_time(14 * INC), None);
    }

    #[test]
    fn keyframe_queries_use_exact_presentation_times() {
        let table = SegmentTable::from_sources(vec![source(regular_frames(10, 5))]);
        assert!(table.is_keyframe_at_time(0, 0));
        assert!(table.is_keyframe_at_time(0, 5 * INC));
        assert!(!table.is_keyframe_at_time(0, 3 * INC));
        // off-grid time matches no frame at all
        assert!(!table.is_keyframe_at_time(0, 1000));
        assert_eq!(table.frame_at_ref_time(0, 7 * INC), Some(7));
        assert_eq!(table.prev_keyframe_before(0, 7 * INC), Some(5 * INC));
        assert_eq!(table.prev_keyframe_before(0, 5 * INC), Some(0));
        assert_eq!(table.prev_keyframe_before(0, 0), None);
    }

    #[test]
    fn validate_rejects_gaps_and_bad_references() {
        let mut table = SegmentTable::new(vec![source(regular_frames(4, 4))]);
        table.push_segment(Segment::new(0, 0, 2 * INC, 0, Some(0)));
        table.push_segment(Segment::new(0, 3 * INC, INC, 2 * INC, None));
        assert!(table.validate().is_err());

        let mut table = SegmentTable::new(vec![source(regular_frames(4, 4))]);
        table.push_segment(Segment::new(1, 0, INC, 0, None));
        assert!(table.validate().is_err());
    }

    #[test]
    fn ref_and_linear_mappings_are_inverse() {
        let seg = Segment::new(0, 200_000, 400_000, 80_000, Some(40_000));
        assert_eq!(seg.linear_to_ref(200_000), 80_000);
        assert_eq!(seg.ref_to_linear(80_000), 200_000);
        assert_eq!(seg.ref_to_linear(seg.linear_to_ref(333_000)), 333_000);
        assert_eq!(seg.ref_end_time_us(), 480_000);
    }

    proptest! {
        #[test]
        fn linear_lookup_round_trips(
            durations in prop::collection::vec(1_u64..1_000_000, 1..8),
            probe in 0_u64..8_000_000,
        ) {
            let mut table = SegmentTable::new(vec![source(regular_frames(2, 2))]);
            let mut start = 0;
            for d in &durations {
                table.push_segment(Segment::new(0, start, *d, 0, None));
                start += *d;
            }
            table.validate().unwrap();

            let total = table.total_duration_us();
            match table.seg_from_linear_time(probe) {
                Some((idx, offset)) => {
                    let seg = table.segment(idx).unwrap();
                    prop_assert!(probe < total);
                    prop_assert!(offset < seg.duration_us);
                    prop_assert_eq!(seg.start_time_us + offset, probe);
                }
                None => prop_assert!(probe >= total),
            }
        }
    }
}
