//! Shared fixtures for composition tests.

use splice_core::{tuning, CodecKind, FrameRate, PixelFormat, VideoInfo};
use splice_media::{SimDecoder, SimFrame, SlotCache, SyntheticSource};
use splice_timeline::{Segment, SegmentTable, SourceVideo};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use crate::Composer;

/// Nominal frame interval at 25 fps, in µs.
pub const INC: u64 = 40_000;

pub fn video_info(codec: CodecKind) -> VideoInfo {
    VideoInfo {
        codec,
        width: 64,
        height: 48,
        frame_rate: FrameRate::FPS_25,
    }
}

/// Frames with pts = dts = i * INC and a keyframe every `key_every`.
pub fn regular_frames(count: u32, key_every: u32) -> Vec<SimFrame> {
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

pub fn source_over(frames: Vec<SimFrame>, codec: CodecKind, reorder: usize) -> SourceVideo {
    SourceVideo::new(
        Box::new(SyntheticSource::new(video_info(codec), frames)),
        Box::new(SimDecoder::new(reorder)),
        Box::new(SlotCache::new(
            tuning::DEFAULT_CACHE_SLOTS,
            64,
            48,
            PixelFormat::Yuv420P,
        )),
    )
}

/// A composer over a single source playing whole.
pub fn composer_over(frames: Vec<SimFrame>, codec: CodecKind, reorder: usize) -> Composer {
    Composer::new(SegmentTable::from_sources(vec![source_over(
        frames, codec, reorder,
    )]))
}

/// Like `composer_over`, also returning the demuxer fetch counter.
pub fn counted_composer(
    frames: Vec<SimFrame>,
    codec: CodecKind,
    reorder: usize,
) -> (Composer, Arc<AtomicU32>) {
    let demux = SyntheticSource::new(video_info(codec), frames);
    let counter = demux.fetch_counter();
    let src = SourceVideo::new(
        Box::new(demux),
        Box::new(SimDecoder::new(reorder)),
        Box::new(SlotCache::new(
            tuning::DEFAULT_CACHE_SLOTS,
            64,
            48,
            PixelFormat::Yuv420P,
        )),
    );
    (Composer::new(SegmentTable::from_sources(vec![src])), counter)
}

/// A validated table over explicit sources and segments.
pub fn table_with(sources: Vec<SourceVideo>, segments: Vec<Segment>) -> SegmentTable {
    let mut table = SegmentTable::new(sources);
    for seg in segments {
        table.push_segment(seg);
    }
    table.validate().unwrap();
    table
}
