use bytes::Bytes;

use crate::config::JitterConfig;
use crate::jitter::{EntryKind, InsertResult, JitterBuffer, PopResult};

const CLOCK_RATE: u32 = 8_000;
const FRAME_TICKS: u32 = 160;

fn media(n: u8) -> EntryKind {
    EntryKind::Media {
        payload: Bytes::from(vec![n; 4]),
        fec_recovered: false,
    }
}

fn buffer() -> JitterBuffer {
    JitterBuffer::new(&JitterConfig::default(), CLOCK_RATE)
}

#[test]
fn test_schedules_at_arrival_plus_target() {
    let mut buf = buffer();
    buf.insert(0, 0, Some(0), media(0));

    assert!(matches!(buf.pop_due(39_999), PopResult::NotReady));
    match buf.pop_due(40_000) {
        PopResult::Frame(entry) => assert_eq!(entry.due_us, 40_000),
        other => panic!("expected due frame, got {other:?}"),
    }
}

#[test]
fn test_due_times_never_regress() {
    let mut buf = buffer();
    // Reordered arrivals: the later sequence arrived first.
    buf.insert(0, 0, Some(0), media(0));
    buf.insert(1, FRAME_TICKS, Some(60_000), media(1));
    buf.insert(2, 2 * FRAME_TICKS, Some(20_000), media(2));

    let mut last_due = 0;
    let mut order = vec![];
    loop {
        match buf.pop_due(u64::MAX / 2) {
            PopResult::Frame(e) | PopResult::Late(e) => {
                assert!(e.due_us >= last_due);
                last_due = e.due_us;
                order.push(e.ext_seq);
            }
            PopResult::NotReady => break,
        }
    }
    assert_eq!(order, vec![0, 1, 2], "queue must stay in sequence order");
}

#[test]
fn test_overflow_drops_newest() {
    let config = JitterConfig {
        max_packets: 2,
        ..Default::default()
    };
    let mut buf = JitterBuffer::new(&config, CLOCK_RATE);
    assert_eq!(buf.insert(0, 0, Some(0), media(0)), InsertResult::Queued);
    assert_eq!(
        buf.insert(1, FRAME_TICKS, Some(20_000), media(1)),
        InsertResult::Queued
    );
    assert_eq!(
        buf.insert(2, 2 * FRAME_TICKS, Some(40_000), media(2)),
        InsertResult::Overflow
    );
    assert_eq!(buf.len(), 2);
}

#[test]
fn test_head_far_behind_media_time_is_late() {
    let mut buf = buffer();
    buf.insert(0, 0, Some(0), media(0));
    match buf.pop_due(40_000) {
        PopResult::Frame(_) => {}
        other => panic!("first frame on time, got {other:?}"),
    }

    // Sequence 1 shows up 200 ms after its media slot.
    buf.insert(1, FRAME_TICKS, Some(200_000), media(1));
    match buf.pop_due(240_000) {
        PopResult::Late(entry) => assert_eq!(entry.ext_seq, 1),
        other => panic!("expected late head, got {other:?}"),
    }
}

#[test]
fn test_conceal_entries_follow_media_timeline() {
    let mut buf = buffer();
    buf.insert(0, 0, Some(0), media(0));
    buf.insert(1, FRAME_TICKS, None, EntryKind::Conceal);

    match buf.pop_due(40_000) {
        PopResult::Frame(e) => assert_eq!(e.ext_seq, 0),
        other => panic!("unexpected {other:?}"),
    }
    match buf.pop_due(60_000) {
        PopResult::Frame(e) => {
            assert_eq!(e.ext_seq, 1);
            assert_eq!(e.due_us, 60_000, "one frame after the anchor");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_adaptation_grows_fast_shrinks_slow_and_clamps() {
    let mut buf = buffer();
    assert_eq!(buf.target_delay_ms(), 40.0);

    // Huge jitter: target climbs 2 ms per tick up to the 100 ms cap.
    buf.adapt(1_000.0);
    assert_eq!(buf.target_delay_ms(), 42.0);
    for _ in 0..100 {
        buf.adapt(1_000.0);
    }
    assert_eq!(buf.target_delay_ms(), 100.0);
    assert_eq!(buf.desired_delay_ms(), 100.0);

    // Calm again: shrink at 1 ms per tick, never below the base target.
    buf.adapt(0.0);
    assert_eq!(buf.target_delay_ms(), 99.0);
    for _ in 0..200 {
        buf.adapt(0.0);
        let t = buf.target_delay_ms();
        assert!((20.0..=100.0).contains(&t), "target {t} out of band");
    }
    assert_eq!(buf.target_delay_ms(), 40.0);
}
