//! Stream-copy export: compressed frames re-timestamped onto the linear
//! timeline.
//!
//! Frames bypass the decoder entirely; the work is all in the timestamps.
//! Source DTS/PTS are mapped into linear time, missing values are
//! inferred, backward jumps are absorbed by a decaying extra delay, and
//! segment boundaries are crossed when a frame's timestamps fall outside
//! the active segment. Output timestamps are never negative and never go
//! backward beyond the rounding tolerance.

use splice_core::{format_us, tuning, CompressedFrame, Result, SpliceError};
use splice_media::{ConfirmPolicy, Demuxer};
use splice_timeline::{DropState, Segment};
use tracing::{debug, error, info, warn};

use crate::session::Composer;

/// Map a signed reference-time µs value onto the linear timeline.
/// No clamping here; the single non-negative clamp happens at output.
fn recalibrate(time: i64, seg: &Segment) -> i64 {
    time - seg.ref_start_time_us as i64 + seg.start_time_us as i64
}

impl Composer {
    /// Produce the next compressed frame for export, in final
    /// linear-timeline timestamp space.
    ///
    /// `video_delay` shifts every output timestamp (the container muxer's
    /// global audio/video offset); `sanitize` enables backward-DTS
    /// absorption. Returns `EndOfStream` when the last segment's source
    /// is exhausted, `Aborted` when the confirm policy declines to drop a
    /// colliding frame or to keep accumulating desync.
    pub fn get_compressed_frame(
        &mut self,
        video_delay: u64,
        sanitize: bool,
        img: &mut CompressedFrame,
    ) -> Result<()> {
        // gradually pay back accumulated delay
        if self.copy.total_extra_delay >= tuning::CATCH_UP_RATE_US {
            self.copy.total_extra_delay -= tuning::CATCH_UP_RATE_US;
        }

        // explicit retry loop; segment switches are bounded by the table
        let mut switches = 0_usize;
        loop {
            let seg = self
                .segments
                .segment(self.current_segment)
                .ok_or_else(|| {
                    SpliceError::Timeline(format!("no segment {}", self.current_segment))
                })?
                .clone();

            let (info, inc_full, fetched) = {
                let vid = self.source_mut(seg.reference)?;
                let info = vid.demuxer.video_info();
                let inc = vid.time_increment_us;
                img.reset();
                match vid.demuxer.get_frame(vid.last_sent_frame, img) {
                    Ok(()) => {
                        debug!(
                            frame = vid.last_sent_frame,
                            pts = ?img.pts,
                            dts = ?img.dts,
                            "fetched compressed frame"
                        );
                        vid.last_sent_frame += 1;
                        (info, inc, true)
                    }
                    Err(_) => {
                        info!(reference = seg.reference, "failed to get next frame");
                        (info, inc, false)
                    }
                }
            };
            if !fetched {
                self.advance_copy_segment(&mut switches)?;
                continue;
            }
            let droppable = info.codec.bframes_droppable();

            // B-frames trailing a cut, for codecs where dropping is safe
            if droppable {
                let state = self
                    .segments
                    .segment(self.current_segment)
                    .map(|s| s.drop_bframes)
                    .unwrap_or_default();
                if img.flags.bframe {
                    if state == DropState::Dropping {
                        warn!("dropping b-frame after segment switch");
                        continue;
                    }
                } else if let Some(s) = self.segments.segment_mut(self.current_segment) {
                    match s.drop_bframes {
                        DropState::NoDrop => {}
                        DropState::Dropping => s.drop_bframes = DropState::NoDrop,
                        DropState::MaybeAfterSwitch => s.drop_bframes = DropState::Dropping,
                    }
                }
            }

            // frames from before the cut are seek imprecision, drop them
            if let Some(dts) = img.dts {
                let mut drop = false;
                if self.current_segment > 0 {
                    if let Some(ref_dts) = seg.ref_start_dts {
                        if dts < ref_dts {
                            info!(
                                dts = %format_us(dts),
                                ref_dts = %format_us(ref_dts),
                                "frame is in the past for this segment"
                            );
                            drop = true;
                        }
                    }
                }
                if droppable {
                    if let Some(pts) = img.pts {
                        if pts + seg.start_time_us < seg.ref_start_time_us {
                            info!(
                                pts = %format_us(pts),
                                ref_start = %format_us(seg.ref_start_time_us),
                                "frame is in the past for this segment"
                            );
                            drop = true;
                        }
                    }
                }
                if drop {
                    continue;
                }
            }

            // time to hand over to the next segment?
            let tail = seg.ref_end_time_us();
            if img.dts.is_some_and(|d| d >= tail) {
                info!(tail = %format_us(tail), "dts is too late, switching segment");
                self.advance_copy_segment(&mut switches)?;
                continue;
            }
            if img.pts.is_some_and(|p| p >= tail) {
                info!(tail = %format_us(tail), "pts is too late, switching segment");
                self.advance_copy_segment(&mut switches)?;
                continue;
            }

            // map into signed linear time; final clamp happens at output
            let delay = self.copy.total_extra_delay as i64;
            let mut signed_dts = img.dts.map(|d| recalibrate(d as i64 + delay, &seg));
            let mut signed_pts = img.pts.map(|p| recalibrate(p as i64 + delay, &seg));

            // field-encoded MPEG-1/2 pictures tick at half the interval
            let mut time_increment = inc_full;
            if info.codec.is_mpeg12() && img.flags.field_structure {
                time_increment /= 2;
            }

            match signed_dts {
                None => {
                    // rounding can leave pts slightly below the inferred dts
                    if let Some(next) = self.copy.next_frame_dts {
                        signed_dts = Some(next);
                        if let Some(p) = signed_pts {
                            if next > p {
                                warn!(
                                    pts_us = p,
                                    dts_us = next,
                                    "compensating for rounding error"
                                );
                                signed_pts = Some(next);
                            }
                        }
                    }
                }
                Some(dts) => {
                    if sanitize {
                        if let Some(next) = self.copy.next_frame_dts {
                            if next > dts + time_increment as i64 / 3 {
                                let delta = (next - dts).unsigned_abs();
                                if delta < tuning::MAX_EXTRA_DELAY_US
                                    && self.copy.total_extra_delay < tuning::MAX_EXTRA_DELAY_US
                                {
                                    warn!(
                                        delta_us = delta,
                                        "dts going back in time, delaying frame"
                                    );
                                    signed_dts = Some(next);
                                    self.copy.total_extra_delay += delta;
                                    info!(
                                        total_us = self.copy.total_extra_delay,
                                        "total extra delay"
                                    );
                                    if let Some(p) = signed_pts {
                                        signed_pts =
                                            Some(p + self.copy.total_extra_delay as i64);
                                    }
                                } else {
                                    error!(
                                        expected_us = next,
                                        got_us = dts,
                                        increment_us = time_increment,
                                        "dts collision too large to absorb"
                                    );
                                    self.confirm_collision_drop(img, &seg)?;
                                    continue;
                                }
                            }
                        }
                        self.copy.next_frame_dts = signed_dts;
                    } else {
                        self.copy.next_frame_dts = signed_dts;
                    }
                }
            }
            // expected decode time of the frame after this one
            if let Some(next) = self.copy.next_frame_dts {
                self.copy.next_frame_dts = Some(next + time_increment as i64);
            }

            // the next segment's first dts caps how far this one may run
            if self.current_segment + 1 < self.segments.num_segments() && img.dts.is_some() {
                if let Some(next_seg) = self.segments.segment(self.current_segment + 1) {
                    if let Some(ref_dts) = next_seg.ref_start_dts {
                        let next_dts = next_seg.start_time_us as i64 + ref_dts as i64;
                        if next_dts < next_seg.ref_start_time_us as i64 {
                            warn!(next_dts, "next segment dts would be negative");
                        } else {
                            let limit = next_dts - next_seg.ref_start_time_us as i64;
                            if signed_dts.is_some_and(|d| d >= limit) {
                                warn!(
                                    limit_us = limit,
                                    "dts limit reached, switching segment"
                                );
                                self.advance_copy_segment(&mut switches)?;
                                continue;
                            }
                        }
                    }
                }
            }

            // final timestamps on the non-negative linear timeline
            let final_dts = signed_dts.map(|d| d + video_delay as i64);
            if final_dts.is_some_and(|d| d < 0) {
                warn!("final dts < 0, dropping frame");
                continue;
            }
            img.dts = final_dts.map(|d| d as u64);
            img.pts = signed_pts.map(|p| (p + video_delay as i64).max(0) as u64);
            debug!(pts = ?img.pts, dts = ?img.dts, "final timestamps");

            // sustained delay slowly burns a/v sync; score it, ask once
            if self.copy.total_extra_delay > tuning::DESYNC_THRESHOLD_US
                && self.copy.desync_score >= 0
            {
                self.copy.desync_score +=
                    (inc_full * self.copy.total_extra_delay / tuning::MAX_EXTRA_DELAY_US) as i64;
                debug!(score = self.copy.desync_score, "desync score");
            }
            if self.copy.desync_score > tuning::MAX_DESYNC_SCORE {
                let linear = img.pts.unwrap_or(0) as i64 - seg.ref_start_time_us as i64
                    + seg.start_time_us as i64;
                let msg = format!(
                    "While saving, some video frames prior to {} had to be delayed, \
                     resulting in temporary loss of A/V sync. \
                     Would you like to continue nevertheless?",
                    format_us(linear.max(0) as u64)
                );
                if !self.confirm.confirm(&msg) {
                    self.copy.desync_score = 0;
                    self.copy.total_extra_delay = 0;
                    self.copy.warn_count = 0;
                    return Err(SpliceError::Aborted("a/v desync".into()));
                }
                // ignore future desync
                self.copy.desync_score = -1;
            }
            return Ok(());
        }
    }

    /// Ask whether the colliding frame may be dropped; escalate to a
    /// silence offer after enough accepted prompts in a row.
    fn confirm_collision_drop(&mut self, img: &CompressedFrame, seg: &Segment) -> Result<()> {
        let linear = img
            .pts
            .map(|p| p as i64 - seg.ref_start_time_us as i64 + seg.start_time_us as i64)
            .unwrap_or(0)
            .max(0) as u64;
        let msg = if img.flags.keyframe {
            format!(
                "Decode time stamp (DTS) collision affecting a keyframe at {} detected.\n\
                 Dropping a keyframe will result in severely corrupted video.\n\
                 Proceed anyway?",
                format_us(linear)
            )
        } else {
            format!(
                "Decode time stamp (DTS) collision affecting a frame at {} detected.\n\
                 Dropping a frame may result in some video corruption.\n\
                 Proceed anyway?",
                format_us(linear)
            )
        };
        if self.copy.warn_count >= 0 {
            if !self.confirm.confirm(&msg) {
                self.copy.warn_count = 0;
                self.copy.desync_score = 0;
                self.copy.total_extra_delay = 0;
                return Err(SpliceError::Aborted("dts collision".into()));
            }
            self.copy.warn_count += 1;
        }
        if self.copy.warn_count > tuning::PROMPTS_BEFORE_SILENCE {
            if self
                .confirm
                .confirm("Do not warn again and drop frames silently while saving this video?")
            {
                self.copy.warn_count = -1;
            } else {
                self.copy.warn_count = 0;
            }
        }
        Ok(())
    }

    /// Switch to the next segment for stream copy, marking it for the
    /// post-switch B-frame policy. On failure (end of timeline) the
    /// correction state is reset so a following export starts clean.
    fn advance_copy_segment(&mut self, switches: &mut usize) -> Result<()> {
        *switches += 1;
        if *switches > self.segments.num_segments() {
            warn!("segment switch loop while fetching one frame");
            return Err(SpliceError::Timeline("segment switch loop".into()));
        }
        match self.switch_to_next_segment(true) {
            Ok(()) => {
                if let Some(seg) = self.segments.segment_mut(self.current_segment) {
                    seg.drop_bframes = DropState::MaybeAfterSwitch;
                }
                info!(segment = self.current_segment, "retrying for next segment");
                Ok(())
            }
            Err(e) => {
                warn!("cannot update to new segment");
                info!(
                    score = self.copy.desync_score,
                    "accumulated desync score at end of copy"
                );
                self.copy.total_extra_delay = 0;
                self.copy.desync_score = 0;
                self.copy.warn_count = 0;
                Err(e)
            }
        }
    }

    /// Largest delay needed so open-GOP trailing B-frames never map to a
    /// negative timestamp.
    ///
    /// For codecs whose B-frames can simply be dropped at a cut there is
    /// nothing to pad and the answer is zero. Otherwise every segment
    /// from the given time on is scanned: B-frames decoded after the
    /// cut's keyframe but presented before it shift the whole export by
    /// their worst shortfall.
    pub fn open_gop_delay(&self, time_us: u64) -> Result<u64> {
        let (start_seg, start_offset) =
            self.segments.seg_from_linear_time(time_us).ok_or_else(|| {
                warn!(time_us, "cannot navigate to estimate open-gop delay");
                SpliceError::Timeline(format!("time {time_us} us outside the timeline"))
            })?;

        let mut delay = 0_u64;
        let mut found: Option<u32> = None;
        for seg_no in start_seg..self.segments.num_segments() {
            let seg = self
                .segments
                .segment(seg_no)
                .ok_or_else(|| SpliceError::Timeline(format!("no segment {seg_no}")))?;
            let vid = self.source(seg.reference)?;
            if vid.demuxer.video_info().codec.bframes_droppable() {
                // dropping handles it, no extra delay needed
                return Ok(0);
            }

            let seg_time = if seg_no > start_seg { 0 } else { start_offset };
            let ref_time = seg_time + seg.ref_start_time_us;
            found = None;
            if ref_time == 0 {
                found = Some(0);
            } else {
                for i in 0..vid.frame_count {
                    if matches!(vid.demuxer.pts_dts(i), Some((Some(pts), _)) if pts == ref_time) {
                        found = Some(i);
                        break;
                    }
                }
            }
            let Some(base) = found else {
                warn!(segment = seg_no, "cannot find the frame for segment");
                continue;
            };

            // look ahead for late B-frames presented in the past
            for i in base + 1..base + tuning::OPEN_GOP_SCAN_WINDOW {
                let Some(flags) = vid.demuxer.frame_flags(i) else {
                    break;
                };
                if !flags.bframe {
                    info!(offset = i - base, "not a b-frame, stopping");
                    break;
                }
                if let Some((Some(pts), _)) = vid.demuxer.pts_dts(i) {
                    if pts < ref_time {
                        info!(frame = i, "frame is early");
                        let delta = ref_time - pts;
                        if delta > delay {
                            delay = delta;
                        }
                    } else {
                        debug!(delta_us = pts - ref_time, "pts delta");
                    }
                }
            }
        }
        if found.is_none() {
            return Err(SpliceError::NotFound(
                "cannot resolve the segment start frame".into(),
            ));
        }
        info!(delay_us = delay, "maximum non-closed-gop delay");
        Ok(delay)
    }
}
