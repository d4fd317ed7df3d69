//! Splice Timeline - The logical timeline over source videos
//!
//! A timeline is an ordered sequence of segments, each mapping a span of
//! the seamless linear timeline to a time range inside one source video.
//! Callers see one continuous video; the segment table answers where any
//! linear time actually lives.

pub mod segment;
pub mod source;

pub use segment::{DropState, Segment, SegmentTable};
pub use source::SourceVideo;
