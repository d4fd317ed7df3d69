//! Decode pipeline: frame-accurate seek and forward decode on one source.
//!
//! Seeking lands on the nearest preceding keyframe and decodes forward
//! until the exact presentation time pops out of the decoder. Everything
//! here has to survive noisy inputs: frames without timestamps, decoder
//! lag, draining at stream end, and presentation times that go backward.

use splice_core::{tuning, CompressedFrame, DecodedFrame, FrameType, PixelFormat, Result, SpliceError};
use splice_media::{Demuxer, FrameCache, PostProcConfig, PostProcessor, VideoDecoder};
use splice_timeline::SourceVideo;
use tracing::{debug, error, info, warn};

use crate::session::{Composer, ScratchBuffers};

/// How a seek completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The exact presentation time was already cached.
    CacheHit,
    /// The target was itself a keyframe; decoded straight to it.
    AtKeyframe,
    /// Decoded from the preceding keyframe, then scanned forward.
    Scanned,
    /// Only the source frame cursor moved (`dont_decode`).
    CursorMoved,
}

impl Composer {
    /// Seek one source to an exact presentation time.
    ///
    /// A cached frame at the target short-circuits the whole operation.
    /// Otherwise the nearest preceding keyframe is decoded up to, then the
    /// pipeline steps forward one picture at a time until the target pops
    /// out. A decoded time past the target means the frame does not exist
    /// (gap or deleted range): the seek fails without retry.
    pub fn seek_to_time(
        &mut self,
        reference: usize,
        time_us: u64,
        dont_decode: bool,
    ) -> Result<SeekOutcome> {
        let cache_hit = {
            let vid = self.source_mut(reference)?;
            if time_us > vid.first_frame_pts
                && !dont_decode
                && vid.cache.get_by_pts(time_us).is_some()
            {
                vid.last_decoded_pts = time_us;
                vid.last_read_pts = time_us;
                info!(
                    pts_ms = time_us / 1000,
                    last_sent = vid.last_sent_frame,
                    "image found in cache"
                );
                true
            } else {
                false
            }
        };
        if cache_hit {
            self.end_of_stream = false;
            return Ok(SeekOutcome::CacheHit);
        }

        // Search the keyframe to restart decoding from
        let mut on_keyframe = false;
        let seek_time = if self.segments.is_keyframe_at_time(reference, time_us) {
            info!(time_ms = time_us / 1000, "seeking to a keyframe");
            on_keyframe = true;
            time_us
        } else {
            match self.segments.prev_keyframe_before(reference, time_us) {
                Some(t) => t,
                None => {
                    warn!(
                        time_ms = time_us / 1000,
                        "cannot identify the keyframe before target"
                    );
                    return Err(SpliceError::NotFound(format!(
                        "no keyframe before {time_us} us in source {reference}"
                    )));
                }
            }
        };
        let frame = self
            .segments
            .frame_at_ref_time(reference, seek_time)
            .ok_or_else(|| {
                SpliceError::NotFound(format!("no frame at {seek_time} us in source {reference}"))
            })?;
        info!(frame, time_ms = seek_time / 1000, "seeking to frame");

        if dont_decode {
            self.source_mut(reference)?.last_sent_frame = frame;
            return Ok(SeekOutcome::CursorMoved);
        }

        self.decode_to_intra(reference, frame)?;
        if on_keyframe {
            return Ok(SeekOutcome::AtKeyframe);
        }

        // Now forward, one picture at a time
        loop {
            self.next_picture(reference, None, None)?;
            let vid = self.source_mut(reference)?;
            let pts = vid.last_decoded_pts;
            vid.last_read_pts = pts;
            if pts == time_us {
                info!(
                    pts_ms = pts / 1000,
                    last_sent = vid.last_sent_frame,
                    "image found"
                );
                return Ok(SeekOutcome::Scanned);
            }
            if pts > time_us {
                info!(
                    wanted_us = time_us,
                    got_us = pts,
                    "image not found, passed the target"
                );
                return Err(SpliceError::NotFound(format!(
                    "no frame at {time_us} us, decode reached {pts} us"
                )));
            }
        }
    }

    /// Re-deliver the last decoded picture from the cache.
    pub fn same_picture(&mut self, reference: usize, out: &mut DecodedFrame) -> Result<()> {
        let vid = self.source(reference)?;
        match vid.cache.get_by_pts(vid.last_decoded_pts) {
            Some(img) => {
                out.duplicate(img);
                Ok(())
            }
            None => {
                warn!(
                    pts_ms = vid.last_decoded_pts / 1000,
                    "no cached picture at the last decoded time"
                );
                vid.cache.dump();
                Err(SpliceError::NotFound(format!(
                    "no cached picture at {} us",
                    vid.last_decoded_pts
                )))
            }
        }
    }

    /// Step to the next picture in presentation order.
    ///
    /// Tries a bounded number of frames ahead: decoder lag means several
    /// inputs may be needed before the next presentation time appears in
    /// the cache. With `limit` set, an image at or past that reference
    /// time is discarded instead of delivered. When `out` is `None` the
    /// picture is located but not consumed.
    pub fn next_picture(
        &mut self,
        reference: usize,
        mut out: Option<&mut DecodedFrame>,
        limit: Option<u64>,
    ) -> Result<()> {
        for _ in 0..tuning::NEXT_PICTURE_TRIES {
            if self.end_of_stream {
                warn!("end of stream, skipping decoding the next picture");
                return Err(SpliceError::EndOfStream);
            }
            // first decode a picture, cannot hurt
            if let Err(e) = self.decode_next(reference) {
                warn!(error = %e, "next picture failed");
                continue;
            }
            // Search the lowest PTS above our current one
            let vid = self.source_mut(reference)?;
            let mut delivered = None;
            let mut found = false;
            if let Some(img) = vid.cache.next_after(vid.last_read_pts) {
                if let (Some(limit_us), Some(pts)) = (limit, img.pts) {
                    if pts >= limit_us {
                        warn!(
                            got_us = pts,
                            limit_us, "next image is out of range, discarding"
                        );
                        return Err(SpliceError::NotFound(format!(
                            "next image at {pts} us is at or past {limit_us} us"
                        )));
                    }
                }
                found = true;
                if let Some(dst) = out.as_deref_mut() {
                    dst.duplicate(img);
                    delivered = img.pts;
                }
            } else {
                debug!(
                    above_us = vid.last_read_pts,
                    "no cached picture past the read position yet"
                );
            }
            if let Some(pts) = delivered {
                vid.last_read_pts = pts;
                self.current_frame += 1;
                return Ok(());
            }
            if found {
                return Ok(());
            }
        }
        warn!(
            tries = tuning::NEXT_PICTURE_TRIES,
            "could not reach the next picture"
        );
        if let Ok(vid) = self.source(reference) {
            vid.cache.dump();
        }
        Err(SpliceError::NotFound(
            "no next picture within the try limit".into(),
        ))
    }

    /// Advance the decoder by exactly one source frame.
    ///
    /// A fetch failure flips the decoder into draining mode instead of
    /// aborting; a drained decoder with nothing left marks end of stream.
    /// The decoded presentation time is reconciled here: missing or
    /// untrusted values are synthesized from the nominal frame interval,
    /// with the demuxer's decode timestamp acting as a floor. A decoded
    /// time below the previous one is a consistency violation: the frame
    /// is dropped and counted, never delivered.
    pub(crate) fn decode_next(&mut self, reference: usize) -> Result<()> {
        let Composer {
            segments,
            comp_buffer,
            buffers,
            post,
            post_config,
            stats,
            end_of_stream,
            ..
        } = self;
        let vid = segments
            .source_mut(reference)
            .ok_or_else(|| SpliceError::Timeline(format!("no source {reference}")))?;
        if vid.decoder.end_of_stream_reached() {
            return Err(SpliceError::EndOfStream);
        }

        vid.last_sent_frame += 1;
        let frame = vid.last_sent_frame;
        comp_buffer.reset();
        debug!(frame, reference, "decoding next frame");

        let SourceVideo {
            demuxer,
            decoder,
            cache,
            last_decoded_pts,
            dont_trust_bframe_pts,
            time_increment_us,
            ..
        } = vid;

        let mut drain = decoder.is_draining();
        if !drain {
            match demuxer.get_frame(frame, comp_buffer) {
                Ok(()) => *end_of_stream = false,
                Err(e) => {
                    warn!(frame, error = %e, "frame fetch failed, draining decoder");
                    drain = true;
                    decoder.set_draining(true);
                    comp_buffer.reset();
                }
            }
        }

        let slot = cache.acquire().ok_or_else(|| {
            warn!(frame, "cache full");
            SpliceError::CacheExhausted(format!("no free slot for frame {frame}"))
        })?;

        if !decompress_into(
            decoder.as_mut(),
            buffers,
            post.as_deref(),
            *post_config,
            comp_buffer,
            cache.slot_mut(slot),
        ) {
            if !decoder.keep_feeding() {
                info!(frame, "error decoding frame");
            }
            stats.no_image += 1;
            cache.discard(slot);
            if drain {
                *end_of_stream = true;
            }
            // not an error in itself, the caller keeps stepping
            return Ok(());
        }

        let decoded_pts = cache.slot(slot).pts;
        let old = *last_decoded_pts;
        if decoded_pts.is_none() || *dont_trust_bframe_pts {
            // No usable PTS: synthesize from the nominal interval,
            // letting a known DTS crank the guess up; a frame can never
            // present before it decodes.
            debug!(frame, "no trusted pts, guessing value");
            *last_decoded_pts += *time_increment_us;
            if let Some(dts) = comp_buffer.dts {
                if (*dont_trust_bframe_pts || !demuxer.provides_pts()) && dts > *last_decoded_pts {
                    debug!(dts, "dts above guessed pts, cranking");
                    *last_decoded_pts = dts;
                }
            }
            cache.slot_mut(slot).pts = Some(*last_decoded_pts);
        } else if let Some(pts) = decoded_pts {
            *last_decoded_pts = pts;
        }
        debug!(
            frame,
            pts_us = *last_decoded_pts,
            delta_ms = (*last_decoded_pts as i64 - old as i64) / 1000,
            "decoded frame"
        );

        if old > *last_decoded_pts {
            stats.pts_going_back += 1;
            warn!(
                back_ms = (old - *last_decoded_pts) / 1000,
                "pts going backward, dropping frame"
            );
            cache.discard(slot);
            return Err(SpliceError::TimestampOrder {
                last: old,
                got: *last_decoded_pts,
            });
        }

        let flags = cache.slot(slot).flags;
        cache.commit(slot);
        match flags.frame_type() {
            FrameType::Intra => stats.i_frames += 1,
            FrameType::Bidirectional => stats.b_frames += 1,
            FrameType::Predicted => stats.p_frames += 1,
        }
        Ok(())
    }

    /// Decode from a keyframe until that keyframe's presentation time
    /// pops out of the decoder.
    ///
    /// `frame` (or `frame + 1`, for field-encoded streams where only the
    /// second field carries the flag) must be keyframe-flagged; anything
    /// else is a structural error with no silent recovery. Cache and
    /// decoder are flushed first, so the cache afterwards holds exactly
    /// the frames from the keyframe onward.
    pub(crate) fn decode_to_intra(&mut self, reference: usize, frame: u32) -> Result<()> {
        info!(frame, reference, "decoding up to intra");
        let Composer {
            segments,
            comp_buffer,
            buffers,
            post,
            post_config,
            end_of_stream,
            current_frame,
            ..
        } = self;
        let vid = segments
            .source_mut(reference)
            .ok_or_else(|| SpliceError::Timeline(format!("no source {reference}")))?;
        let SourceVideo {
            demuxer,
            decoder,
            cache,
            last_sent_frame,
            last_decoded_pts,
            last_read_pts,
            time_increment_us,
            frame_count,
            ..
        } = vid;

        // In case of field encoding, only the second field may be flagged
        // as intra
        let flags = demuxer.frame_flags(frame).unwrap_or_default();
        let flags_next = demuxer.frame_flags(frame + 1).unwrap_or_default();
        if !(flags.keyframe || flags_next.keyframe) {
            error!(
                frame,
                "neither the target frame nor the next one is flagged as intra, aborting"
            );
            return Err(SpliceError::NotOnKeyframe(format!(
                "frame {frame} of source {reference}"
            )));
        }
        let nb_frames = *frame_count;
        if nb_frames == 0 {
            return Err(SpliceError::NotFound(format!("source {reference} is empty")));
        }

        *last_sent_frame = frame;
        cache.flush();
        decoder.flush();
        decoder.set_end_of_stream(false);
        *end_of_stream = false;

        // The PTS associated with our frame is the one we are looking for
        let wanted = demuxer.estimate_pts(frame).ok_or_else(|| {
            SpliceError::NotFound(format!("no presentation time for frame {frame}"))
        })?;
        // Max reference frames for H.264, plus slack for decoder warm-up
        let mut tries = tuning::MAX_REF_FRAMES + tuning::DECODE_RECOVERY_SLACK;
        let mut sync_found = false;
        let mut found = false;
        while !found && tries > 0 {
            tries -= 1;
            if decoder.end_of_stream_reached() {
                warn!("end of stream reached");
                break;
            }
            // Last frame? if so repeat
            if *last_sent_frame >= nb_frames - 1 {
                *last_sent_frame = nb_frames - 1;
            }
            comp_buffer.reset();
            if let Err(e) = demuxer.get_frame(*last_sent_frame, comp_buffer) {
                warn!(frame = *last_sent_frame, error = %e, "frame fetch failed");
                decoder.set_draining(true);
            }
            let slot = cache.acquire().ok_or_else(|| {
                warn!(frame = *last_sent_frame, "cache full");
                SpliceError::CacheExhausted(format!(
                    "no free slot for frame {}",
                    *last_sent_frame
                ))
            })?;
            if !decompress_into(
                decoder.as_mut(),
                buffers,
                post.as_deref(),
                *post_config,
                comp_buffer,
                cache.slot_mut(slot),
            ) {
                if !decoder.keep_feeding() {
                    info!(frame = *last_sent_frame, "error decoding frame");
                }
                cache.discard(slot);
                *last_sent_frame += 1;
                continue;
            }

            let result_pts = match cache.slot(slot).pts {
                None => {
                    if !sync_found {
                        // no timebase yet, nothing to anchor a guess on
                        debug!("no timestamp yet, dropping picture");
                        cache.discard(slot);
                        None
                    } else {
                        *last_decoded_pts += *time_increment_us;
                        cache.slot_mut(slot).pts = Some(*last_decoded_pts);
                        cache.commit(slot);
                        Some(*last_decoded_pts)
                    }
                }
                Some(pts) => {
                    if !sync_found {
                        debug!(pts_us = pts, "sync found");
                        sync_found = true;
                    }
                    *last_decoded_pts = pts;
                    cache.commit(slot);
                    Some(pts)
                }
            };

            if result_pts == Some(wanted) {
                found = true;
            } else {
                *last_sent_frame += 1;
            }
        }
        if !found {
            warn!(
                wanted_ms = wanted / 1000,
                "could not find the decoded frame"
            );
            cache.dump();
            return Err(SpliceError::NotFound(format!(
                "no decoded frame at {wanted} us"
            )));
        }
        *last_read_pts = wanted;
        *current_frame = frame;
        Ok(())
    }
}

/// Push one compressed frame into the decoder and copy its current output
/// into `out`. The popped picture may belong to an earlier input; callers
/// must not assume input/output alignment.
///
/// Returns plain success: a `false` is a per-frame condition (warm-up,
/// drain exhausted, corrupt frame) the caller absorbs, not a session
/// error.
fn decompress_into(
    decoder: &mut dyn VideoDecoder,
    buffers: &mut ScratchBuffers,
    post: Option<&dyn PostProcessor>,
    config: PostProcConfig,
    input: &CompressedFrame,
    out: &mut DecodedFrame,
) -> bool {
    let ref_only = decoder.zero_copy();
    let tmp: &mut DecodedFrame = if ref_only {
        // reuse the scratch image unless the dimensions moved
        if let Some(s) = buffers.scratch.as_ref() {
            if s.width != buffers.image.width || s.height != buffers.image.height {
                buffers.scratch = None;
            }
        }
        buffers.scratch.get_or_insert_with(|| {
            DecodedFrame::new(
                buffers.image.width,
                buffers.image.height,
                buffers.image.pixel_format,
            )
        })
    } else {
        &mut buffers.image
    };

    tmp.pixel_format = PixelFormat::Yuv420P;
    if !decoder.decompress(input, tmp) {
        return false;
    }
    if tmp.no_picture && ref_only {
        info!("no picture");
        return false;
    }

    // No quantizer map, or hardware frame: nothing to post-process
    if tmp.hw_backed || (!tmp.has_quant_map() && tmp.pixel_format == PixelFormat::Yuv420P) {
        out.avg_q = 2;
        out.duplicate(tmp);
        return true;
    }

    // Average quantizer over the map, clamped to the useful range
    let avg = match tmp.quant.as_ref().filter(|m| !m.is_empty()) {
        Some(map) => {
            let mut sum: u32 = map.iter().map(|&q| q as u32).sum();
            sum += map.len() as u32 - 1;
            (sum as f32 / map.len() as f32).clamp(1.0, 31.0).floor() as u32
        }
        None => 2,
    };
    tmp.avg_q = avg;
    out.copy_info(tmp);

    if let Some(pp) = post {
        if config.enabled && config.strength > 0 && tmp.pixel_format == PixelFormat::Yuv420P {
            pp.process(tmp, out);
            return true;
        }
    }
    debug!("post-processing disabled, duplicating");
    out.duplicate(tmp);
    true
}

// ── Source lookup helpers ───────────────────────────────────────

impl Composer {
    pub(crate) fn source(&self, reference: usize) -> Result<&SourceVideo> {
        self.segments
            .source(reference)
            .ok_or_else(|| SpliceError::Timeline(format!("no source {reference}")))
    }

    pub(crate) fn source_mut(&mut self, reference: usize) -> Result<&mut SourceVideo> {
        self.segments
            .source_mut(reference)
            .ok_or_else(|| SpliceError::Timeline(format!("no source {reference}")))
    }
}
