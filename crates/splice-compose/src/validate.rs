//! Cut-point validation before stream-copy export.
//!
//! Copying is only safe when every cut lands on a keyframe: including
//! skipped reference frames makes DTS run backward, skipping them breaks
//! later frames that reference them. Validation also checks the cut's
//! recorded decode timestamp, which catches a seek that silently landed
//! on an earlier keyframe than the cut intended.

use splice_core::{format_opt_us, format_us, CompressedFrame, Result, SpliceError};
use splice_media::Demuxer;
use tracing::{info, warn};

use crate::session::Composer;

impl Composer {
    /// Verify that every segment starts on a keyframe at the expected
    /// decode timestamp. Any mismatch means export must not proceed in
    /// copy mode.
    pub fn check_cuts_are_on_intra(&mut self) -> Result<()> {
        info!("checking cuts start on keyframes");
        let mut img = CompressedFrame::default();
        for i in 0..self.segments.num_segments() {
            let seg = self
                .segments
                .segment(i)
                .ok_or_else(|| SpliceError::Timeline(format!("no segment {i}")))?
                .clone();
            self.switch_to_segment(i, true)?;
            let vid = self.source_mut(seg.reference)?;
            if vid.demuxer.get_frame(vid.last_sent_frame, &mut img).is_err() {
                info!(segment = i, "cannot get the first frame of segment");
                return Err(SpliceError::BadCutPoint(format!(
                    "segment {i}: cannot fetch its first frame"
                )));
            }
            if !img.flags.keyframe {
                warn!(
                    segment = i,
                    pts = %format_opt_us(img.pts),
                    "segment does not start on a keyframe"
                );
                return Err(SpliceError::BadCutPoint(format!(
                    "segment {i} does not start on a keyframe"
                )));
            }
            // After a segment switch the cursor sits on the keyframe at or
            // before the cut; a DTS mismatch means the seek went back too
            // far, which copying cannot tolerate.
            info!(
                segment = i,
                reference = seg.reference,
                ref_dts = %format_opt_us(seg.ref_start_dts),
                img_dts = %format_opt_us(img.dts),
                "checking cut dts"
            );
            if seg.reference == 0 && seg.ref_start_dts.unwrap_or(0) == 0 {
                info!("ignoring first segment (unreliable dts)");
            } else if let (Some(img_dts), Some(ref_dts)) = (img.dts, seg.ref_start_dts) {
                if img_dts != ref_dts {
                    warn!(
                        segment = i,
                        got = %format_us(img_dts),
                        expected = %format_us(ref_dts),
                        "segment does not start on the expected dts"
                    );
                    return Err(SpliceError::BadCutPoint(format!(
                        "segment {i} does not start on the expected dts"
                    )));
                }
            }
            info!(segment = i, "segment ok");
        }
        Ok(())
    }

    /// Check whether a single candidate cut at a linear time sits on a
    /// keyframe, without disturbing the session: the active segment and
    /// the source's frame cursor are restored on every path.
    ///
    /// A time outside the timeline yields `Ok`; there is nothing
    /// meaningful to check.
    pub fn check_cut_is_on_intra(&mut self, time_us: u64) -> Result<()> {
        let Some((seg_no, _)) = self.segments.seg_from_linear_time(time_us) else {
            return Ok(());
        };
        let seg = self
            .segments
            .segment(seg_no)
            .ok_or_else(|| SpliceError::Timeline(format!("no segment {seg_no}")))?
            .clone();
        info!(time = %format_us(time_us), "checking whether the cut is on a keyframe");

        let old_segment = self.current_segment;
        let old_frame = self
            .segments
            .source(seg.reference)
            .map(|v| v.last_sent_frame)
            .unwrap_or(0);

        let mut failure: Option<String> = None;
        let mut img = CompressedFrame::default();
        if self.switch_to_segment(seg_no, true).is_ok() {
            let vid = self.source_mut(seg.reference)?;
            if vid.demuxer.get_frame(vid.last_sent_frame, &mut img).is_ok() {
                if !img.flags.keyframe {
                    warn!(
                        segment = seg_no,
                        pts = %format_opt_us(img.pts),
                        "segment does not start on a keyframe"
                    );
                    failure = Some(format!("segment {seg_no} does not start on a keyframe"));
                }
            } else {
                info!(segment = seg_no, "cannot get the first frame of segment");
            }
            if seg.reference == 0 && seg.ref_start_dts.unwrap_or(0) == 0 {
                info!("ignoring first segment (unreliable dts)");
            } else if let (Some(img_dts), Some(ref_dts)) = (img.dts, seg.ref_start_dts) {
                if img_dts != ref_dts {
                    warn!(
                        segment = seg_no,
                        got = %format_us(img_dts),
                        expected = %format_us(ref_dts),
                        "segment does not start on the expected dts"
                    );
                    failure = Some(format!(
                        "segment {seg_no} does not start on the expected dts"
                    ));
                }
            }
            if failure.is_none() {
                info!(segment = seg_no, "segment ok");
            }
        }

        // restore the session whatever the outcome
        self.current_segment = old_segment;
        if let Ok(vid) = self.source_mut(seg.reference) {
            vid.last_sent_frame = old_frame;
        }
        match failure {
            None => Ok(()),
            Some(msg) => Err(SpliceError::BadCutPoint(msg)),
        }
    }
}
