//! Time representation for frame-accurate editing.
//!
//! All timestamps in Splice are in microseconds. Frame rates use rational
//! arithmetic so the nominal inter-frame interval stays exact for NTSC
//! rates like 30000/1001.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A frame rate as an exact rational (frames = numerator / denominator Hz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_50: Self = Self::new(50, 1);
    pub const FPS_59_94: Self = Self::new(60000, 1001);
    pub const FPS_60: Self = Self::new(60, 1);

    /// Create a new frame rate. Both parts must be non-zero.
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Frames per second as a float.
    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Nominal inter-frame interval in microseconds, rounded to nearest.
    ///
    /// Used to synthesize timestamps for frames the decoder or demuxer
    /// returned without one.
    pub fn interval_us(self) -> u64 {
        let r = Rational64::new(
            1_000_000_i64 * self.denominator as i64,
            self.numerator as i64,
        );
        r.round().to_integer() as u64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{} fps", self.numerator)
        } else {
            write!(f, "{:.3} fps", self.to_fps_f64())
        }
    }
}

/// Format a microsecond timestamp as `HH:MM:SS.mmm` for logs and prompts.
pub fn format_us(us: u64) -> String {
    let ms = us / 1000;
    let (s, ms) = (ms / 1000, ms % 1000);
    let (m, s) = (s / 60, s % 60);
    let (h, m) = (m / 60, m % 60);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// Format an optional timestamp, rendering missing values as `none`.
pub fn format_opt_us(us: Option<u64>) -> String {
    match us {
        Some(t) => format_us(t),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_for_exact_rates() {
        assert_eq!(FrameRate::FPS_25.interval_us(), 40_000);
        assert_eq!(FrameRate::FPS_50.interval_us(), 20_000);
        assert_eq!(FrameRate::FPS_24.interval_us(), 41_667);
    }

    #[test]
    fn interval_for_ntsc_rates() {
        assert_eq!(FrameRate::FPS_29_97.interval_us(), 33_367);
        assert_eq!(FrameRate::FPS_59_94.interval_us(), 16_683);
    }

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_us(0), "00:00:00.000");
        assert_eq!(format_us(80_000), "00:00:00.080");
        assert_eq!(format_us(3_723_456_000), "01:02:03.456");
        assert_eq!(format_opt_us(None), "none");
    }

    #[test]
    fn frame_rate_display() {
        assert_eq!(FrameRate::FPS_25.to_string(), "25 fps");
        assert_eq!(FrameRate::FPS_29_97.to_string(), "29.970 fps");
    }
}
