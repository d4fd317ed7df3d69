//! Integration tests for stream-copy export.
//!
//! Full pre-flight-then-copy flows: cut validation, open-GOP delay
//! estimation, and re-timestamped frame iteration across segments.

use crate::fixtures::{init_logs, keyed_frames, source_over, table_with, INC};
use splice_compose::Composer;
use splice_core::{CodecKind, CompressedFrame, SpliceError};
use splice_media::{ScriptedConfirm, SimFrame};
use splice_timeline::Segment;

fn run_copy(composer: &mut Composer, video_delay: u64) -> Vec<(Option<u64>, Option<u64>)> {
    let mut out = Vec::new();
    let mut img = CompressedFrame::default();
    composer.start_copy(0).unwrap();
    loop {
        match composer.get_compressed_frame(video_delay, true, &mut img) {
            Ok(()) => out.push((img.pts, img.dts)),
            Err(SpliceError::EndOfStream) => break,
            Err(e) => panic!("unexpected copy error: {e}"),
        }
    }
    out
}

// ── Validate, estimate, copy ────────────────────────────────────

#[test]
fn validated_two_segment_export_is_monotonic() {
    init_logs();
    let table = table_with(
        vec![
            source_over(keyed_frames(4, &[0]), CodecKind::H264, 0),
            source_over(keyed_frames(8, &[0, 2]), CodecKind::H264, 0),
        ],
        vec![
            Segment::new(0, 0, 4 * INC, 0, Some(0)),
            Segment::new(1, 4 * INC, 4 * INC, 2 * INC, Some(2 * INC)),
        ],
    );
    let mut composer = Composer::new(table);

    composer.check_cuts_are_on_intra().unwrap();
    assert_eq!(composer.open_gop_delay(0).unwrap(), 0);

    let outputs = run_copy(&mut composer, 0);
    assert_eq!(outputs.len(), 8);
    let mut last = 0;
    for (pts, dts) in &outputs {
        let dts = dts.unwrap();
        assert!(dts >= last);
        assert!(pts.is_some());
        last = dts;
    }
    assert_eq!(outputs.last().unwrap().1, Some(7 * INC));
}

#[test]
fn open_gop_delay_keeps_early_bframes_non_negative() {
    // cutting at the keyframe leaves two trailing B-frames that present
    // before the cut; the estimated delay must keep them at or above zero
    let frames = vec![
        SimFrame::key(0, 0),
        SimFrame::pred(INC, INC),
        SimFrame::key(2 * INC, 2 * INC),
        SimFrame::bframe(INC, 3 * INC),
        SimFrame::pred(3 * INC, 4 * INC),
    ];
    let table = table_with(
        vec![source_over(frames, CodecKind::H264, 0)],
        vec![Segment::new(0, 0, 4 * INC, 2 * INC, Some(2 * INC))],
    );
    let mut composer = Composer::new(table);

    let delay = composer.open_gop_delay(0).unwrap();
    assert_eq!(delay, INC);

    let outputs = run_copy(&mut composer, delay);
    // the early B-frame survived, mapped to linear zero instead of
    // being dropped for a negative timestamp
    assert!(outputs.iter().any(|(pts, _)| *pts == Some(0)));
    let mut last = 0;
    for (pts, dts) in &outputs {
        assert!(pts.is_some());
        let dts = dts.unwrap();
        assert!(dts >= last);
        last = dts;
    }
}

#[test]
fn unvalidatable_cut_blocks_copy_mode() {
    let table = table_with(
        vec![
            source_over(keyed_frames(4, &[0]), CodecKind::H264, 0),
            source_over(keyed_frames(8, &[0]), CodecKind::H264, 0),
        ],
        vec![
            Segment::new(0, 0, 4 * INC, 0, Some(0)),
            // claims a cut at frame 5, which is not a keyframe
            Segment::new(1, 4 * INC, 3 * INC, 5 * INC, Some(5 * INC)),
        ],
    );
    let mut composer = Composer::new(table);
    let err = composer.check_cuts_are_on_intra().unwrap_err();
    assert!(matches!(err, SpliceError::BadCutPoint(_)));
}

// ── Prompt escalation ───────────────────────────────────────────

#[test]
fn repeated_collisions_escalate_to_a_silence_offer() {
    // six oversized dts collisions in a row: five prompts, then the
    // engine offers to go silent and stops asking
    let mut frames = vec![SimFrame::key(10 * INC, 10 * INC)];
    for k in 1..=6_u64 {
        frames.push(SimFrame::pred(10 * INC + k * INC, (k - 1) * INC));
    }
    frames.push(SimFrame::pred(21 * INC, 21 * INC));

    let table = table_with(
        vec![source_over(frames, CodecKind::H264, 0)],
        vec![Segment::new(0, 0, 20 * INC, 10 * INC, Some(10 * INC))],
    );
    let confirm = std::sync::Arc::new(ScriptedConfirm::new(true));
    let mut composer =
        Composer::new(table).with_confirm_policy(Box::new(std::sync::Arc::clone(&confirm)));

    let outputs = run_copy(&mut composer, 0);
    // only the keyframe and the final clean frame made it out
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].1, Some(0));
    assert_eq!(outputs[1].1, Some(11 * INC));

    // five collision prompts plus one silence offer
    let asked = confirm.asked();
    assert_eq!(asked.len(), 6);
    assert!(asked[0].contains("DTS"));
    assert!(asked[5].contains("Do not warn again"));
}
