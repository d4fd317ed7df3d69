//! Frame buffer types for compressed and decoded video frames.
//!
//! Decoded frames carry planar pixel data plus the decode-side metadata the
//! composition pipeline reconciles: presentation time, frame-type flags and
//! the optional per-macroblock quantizer map used by post-processing.

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::time::FrameRate;

// ── Frame classification ────────────────────────────────────────

/// Demuxer-reported structure flags for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameFlags {
    /// Decodable without reference to other frames.
    pub keyframe: bool,
    /// Bidirectionally predicted frame.
    pub bframe: bool,
    /// Field-encoded (interlaced) picture.
    pub field_structure: bool,
}

impl FrameFlags {
    /// Flags for a keyframe.
    pub const KEY: Self = Self {
        keyframe: true,
        bframe: false,
        field_structure: false,
    };

    /// Classify for statistics.
    pub fn frame_type(self) -> FrameType {
        if self.keyframe {
            FrameType::Intra
        } else if self.bframe {
            FrameType::Bidirectional
        } else {
            FrameType::Predicted
        }
    }
}

/// Frame type used for I/P/B statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Intra,
    Predicted,
    Bidirectional,
}

/// Codec family, as far as the composition pipeline cares.
///
/// The distinction that matters here is whether trailing open-GOP B-frames
/// may be dropped at a cut: H.264/H.265 B-frames can be references for
/// later frames, so they must be kept and delayed instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecKind {
    H264,
    H265,
    Mpeg12,
    Mpeg4Asp,
    Other(u32),
}

impl CodecKind {
    /// Whether B-frames following a cut can simply be dropped.
    pub fn bframes_droppable(self) -> bool {
        !matches!(self, CodecKind::H264 | CodecKind::H265)
    }

    /// MPEG-1/2 family, which may carry field-encoded pictures at half
    /// the nominal frame interval.
    pub fn is_mpeg12(self) -> bool {
        matches!(self, CodecKind::Mpeg12)
    }
}

/// Static per-source video parameters reported by the demuxer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub codec: CodecKind,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
}

// ── Compressed frames ───────────────────────────────────────────

/// A compressed frame as read from a container, before or after
/// re-timestamping.
///
/// The payload buffer is owned and reused across calls; `reset` clears it
/// along with the timestamps so stale data never leaks between fetches.
#[derive(Debug, Clone, Default)]
pub struct CompressedFrame {
    /// Compressed payload.
    pub data: Vec<u8>,
    /// Demuxer-reported presentation time in µs.
    pub pts: Option<u64>,
    /// Demuxer-reported decode time in µs.
    pub dts: Option<u64>,
    /// Frame structure flags.
    pub flags: FrameFlags,
}

impl CompressedFrame {
    /// Create a frame with a payload buffer pre-sized for the expected
    /// maximum frame.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Clear payload and metadata before refilling.
    pub fn reset(&mut self) {
        self.data.clear();
        self.pts = None;
        self.dts = None;
        self.flags = FrameFlags::default();
    }
}

// ── Decoded frames ──────────────────────────────────────────────

/// Pixel format of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar
    #[default]
    Yuv420P,
    /// Y plane + interleaved UV at half resolution
    Nv12,
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit grayscale
    Gray8,
}

impl PixelFormat {
    /// Number of planes for this format.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Yuv420P => 3,
            Self::Nv12 => 2,
            Self::Rgba8 | Self::Gray8 => 1,
        }
    }
}

/// A plane of pixel data with stride information.
#[derive(Debug, Clone, Default)]
pub struct FramePlane {
    /// Raw pixel data
    pub data: Vec<u8>,
    /// Bytes per row (may include padding)
    pub stride: usize,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl FramePlane {
    /// Create a new frame plane with the given dimensions.
    pub fn new(width: u32, height: u32, bytes_per_pixel: usize) -> Self {
        // Align stride to 64 bytes for SIMD compatibility
        let min_stride = (width as usize) * bytes_per_pixel;
        let stride = (min_stride + 63) & !63;
        let data = vec![0u8; stride * height as usize];
        Self {
            data,
            stride,
            width,
            height,
        }
    }
}

/// A decoded frame, either owned by a cache slot or used as a decode
/// scratch target.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Pixel planes; count depends on `pixel_format`.
    pub planes: SmallVec<[FramePlane; 3]>,
    /// Presentation time in µs, once reconciled.
    pub pts: Option<u64>,
    /// Frame structure flags.
    pub flags: FrameFlags,
    /// Per-macroblock quantizer map, when the decoder exposes one.
    pub quant: Option<Vec<u8>>,
    /// Row stride of the quantizer map.
    pub q_stride: usize,
    /// Average quantizer strength, clamped to 1..=31.
    pub avg_q: u32,
    /// Decoder produced no picture for this input (warm-up or drain).
    pub no_picture: bool,
    /// Frame lives in hardware memory; post-processing must be skipped.
    pub hw_backed: bool,
}

impl DecodedFrame {
    /// Allocate a frame with planes sized for the given format.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let planes: SmallVec<[FramePlane; 3]> = match pixel_format {
            PixelFormat::Yuv420P => smallvec![
                FramePlane::new(width, height, 1),
                FramePlane::new(width / 2, height / 2, 1),
                FramePlane::new(width / 2, height / 2, 1),
            ],
            PixelFormat::Nv12 => smallvec![
                FramePlane::new(width, height, 1),
                FramePlane::new(width, height / 2, 1),
            ],
            PixelFormat::Rgba8 => smallvec![FramePlane::new(width, height, 4)],
            PixelFormat::Gray8 => smallvec![FramePlane::new(width, height, 1)],
        };
        Self {
            width,
            height,
            pixel_format,
            planes,
            ..Self::default()
        }
    }

    /// Whether a usable quantizer map is attached.
    pub fn has_quant_map(&self) -> bool {
        self.quant.is_some() && self.q_stride != 0
    }

    /// Full copy of pixel data and metadata from `src`.
    pub fn duplicate(&mut self, src: &DecodedFrame) {
        self.width = src.width;
        self.height = src.height;
        self.pixel_format = src.pixel_format;
        self.planes = src.planes.clone();
        self.quant = src.quant.clone();
        self.copy_info(src);
    }

    /// Copy metadata only, leaving pixel data untouched.
    pub fn copy_info(&mut self, src: &DecodedFrame) {
        self.pts = src.pts;
        self.flags = src.flags;
        self.q_stride = src.q_stride;
        self.avg_q = src.avg_q;
        self.no_picture = src.no_picture;
        self.hw_backed = src.hw_backed;
    }
}
