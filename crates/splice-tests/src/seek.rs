//! Integration tests for interactive seek and playback.
//!
//! Exercises splice-compose over splice-timeline and splice-media through
//! public APIs only: seek, sequential picture reads, statistics.

use crate::fixtures::{counted_composer, init_logs, keyed_frames, INC};
use splice_compose::SeekOutcome;
use splice_core::{DecodedFrame, SpliceError};
use splice_media::SimFrame;
use std::sync::atomic::Ordering;

// ── Frame-accurate seek ─────────────────────────────────────────

#[test]
fn seek_lands_on_the_exact_presentation_time() {
    init_logs();
    let (mut composer, _) = counted_composer(
        keyed_frames(4, &[0]),
        splice_core::CodecKind::Mpeg4Asp,
        0,
    );
    let outcome = composer.seek_to_time(0, 2 * INC, false).unwrap();
    assert_eq!(outcome, SeekOutcome::Scanned);
    assert_eq!(composer.segments().source(0).unwrap().last_read_pts, 2 * INC);
}

#[test]
fn repeated_seek_is_served_from_the_cache() {
    let (mut composer, fetches) = counted_composer(
        keyed_frames(8, &[0, 4]),
        splice_core::CodecKind::Mpeg4Asp,
        0,
    );
    composer.seek_to_time(0, 3 * INC, false).unwrap();
    let before = fetches.load(Ordering::Relaxed);

    let outcome = composer.seek_to_time(0, 3 * INC, false).unwrap();
    assert_eq!(outcome, SeekOutcome::CacheHit);
    assert_eq!(fetches.load(Ordering::Relaxed), before);
}

#[test]
fn seek_into_a_gap_reports_not_found() {
    let (mut composer, _) = counted_composer(
        keyed_frames(4, &[0]),
        splice_core::CodecKind::Mpeg4Asp,
        0,
    );
    let err = composer.seek_to_time(0, INC + 1000, false).unwrap_err();
    assert!(matches!(err, SpliceError::NotFound(_)));
}

// ── Sequential playback ─────────────────────────────────────────

#[test]
fn playback_walks_all_frames_in_presentation_order() {
    init_logs();
    let (mut composer, _) = counted_composer(
        keyed_frames(8, &[0, 4]),
        splice_core::CodecKind::Mpeg4Asp,
        2,
    );
    composer.seek_to_time(0, 0, false).unwrap();

    let mut seen = Vec::new();
    let mut out = DecodedFrame::default();
    while composer.next_picture(0, Some(&mut out), None).is_ok() {
        seen.push(out.pts.unwrap());
    }
    let expected: Vec<u64> = (1..8).map(|i| i * INC).collect();
    assert_eq!(seen, expected);
    assert!(composer.end_of_stream());

    // frames read through the stepper: one keyframe, six predicted
    assert_eq!(composer.stats().i_frames, 1);
    assert_eq!(composer.stats().p_frames, 6);
    assert_eq!(composer.stats().b_frames, 0);
}

#[test]
fn reordered_sources_still_play_in_presentation_order() {
    // decode order 0, 2, 1, 4, 3, a classic one-B pattern
    let frames = vec![
        SimFrame::key(0, 0),
        SimFrame::pred(2 * INC, INC),
        SimFrame::bframe(INC, 2 * INC),
        SimFrame::pred(4 * INC, 3 * INC),
        SimFrame::bframe(3 * INC, 4 * INC),
    ];
    let (mut composer, _) = counted_composer(frames, splice_core::CodecKind::Mpeg4Asp, 1);
    composer.seek_to_time(0, 0, false).unwrap();

    let mut seen = Vec::new();
    let mut out = DecodedFrame::default();
    while composer.next_picture(0, Some(&mut out), None).is_ok() {
        seen.push(out.pts.unwrap());
    }
    assert_eq!(seen, vec![INC, 2 * INC, 3 * INC, 4 * INC]);
    assert_eq!(composer.stats().b_frames, 2);
}

#[test]
fn same_picture_redelivers_without_touching_the_container() {
    let (mut composer, fetches) = counted_composer(
        keyed_frames(4, &[0]),
        splice_core::CodecKind::Mpeg4Asp,
        0,
    );
    composer.seek_to_time(0, INC, false).unwrap();
    let before = fetches.load(Ordering::Relaxed);

    let mut out = DecodedFrame::default();
    composer.same_picture(0, &mut out).unwrap();
    assert_eq!(out.pts, Some(INC));
    assert_eq!(fetches.load(Ordering::Relaxed), before);
}

// ── Statistics ──────────────────────────────────────────────────

#[test]
fn stats_serialize_for_session_reporting() {
    let (mut composer, _) = counted_composer(
        keyed_frames(4, &[0]),
        splice_core::CodecKind::Mpeg4Asp,
        0,
    );
    composer.seek_to_time(0, 2 * INC, false).unwrap();

    let json = serde_json::to_string(composer.stats()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["pts_going_back"], 0);
    assert!(parsed["p_frames"].as_u64().unwrap() >= 1);
}
