use bytes::Bytes;

use crate::reorder::{InsertOutcome, PacketRecord, ReorderBuffer};

const FRAME_PERIOD: u32 = 160;

fn rec(ext_seq: u64, arrival_us: u64, payload: &[u8]) -> PacketRecord {
    PacketRecord {
        seq: (ext_seq & 0xFFFF) as u16,
        ext_seq,
        rtp_ts: (ext_seq as u32) * FRAME_PERIOD,
        arrival_us,
        payload: Bytes::copy_from_slice(payload),
        is_fec_recovered: false,
    }
}

fn xor5(payloads: [&[u8]; 5]) -> Bytes {
    let len = payloads.iter().map(|p| p.len()).max().unwrap();
    let mut out = vec![0u8; len];
    for p in payloads {
        for (i, b) in p.iter().enumerate() {
            out[i] ^= b;
        }
    }
    Bytes::from(out)
}

#[test]
fn test_pops_in_order_despite_misordered_inserts() {
    let mut buf = ReorderBuffer::new(16, 5, 40);
    assert_eq!(buf.insert(rec(10, 0, b"a")), InsertOutcome::Stored);
    assert_eq!(buf.insert(rec(12, 0, b"c")), InsertOutcome::Stored);
    assert_eq!(buf.insert(rec(11, 0, b"b")), InsertOutcome::Stored);

    let order: Vec<u64> = std::iter::from_fn(|| buf.pop_ready().map(|r| r.ext_seq)).collect();
    assert_eq!(order, vec![10, 11, 12]);
    assert!(buf.is_empty());
}

#[test]
fn test_duplicate_and_stale_and_full() {
    let mut buf = ReorderBuffer::new(8, 5, 40);
    assert_eq!(buf.insert(rec(100, 0, b"x")), InsertOutcome::Stored);
    assert_eq!(buf.insert(rec(100, 1, b"x")), InsertOutcome::Duplicate);

    assert!(buf.pop_ready().is_some());
    assert_eq!(buf.insert(rec(100, 2, b"x")), InsertOutcome::Stale);

    // Head is now 101; 109 falls one past the 8-slot window.
    assert_eq!(buf.insert(rec(109, 3, b"y")), InsertOutcome::Full);
    assert_eq!(buf.insert(rec(108, 3, b"y")), InsertOutcome::Stored);
}

#[test]
fn test_gap_waits_then_expires() {
    let mut buf = ReorderBuffer::new(16, 5, 40);
    buf.insert(rec(20, 0, b"a"));
    assert!(buf.pop_ready().is_some());

    // 22 arrives, 21 is missing.
    buf.insert(rec(22, 10_000, b"c"));
    assert!(buf.pop_ready().is_none());
    assert!(!buf.gap_expired(30_000), "22 has only waited 20 ms");
    assert!(buf.gap_expired(51_000), "22 has waited past the deadline");

    assert_eq!(buf.skip_head(), Some(21));
    let next = buf.pop_ready().expect("22 follows the skipped slot");
    assert_eq!(next.ext_seq, 22);
}

#[test]
fn test_recovers_single_missing_member() {
    let payloads: [&[u8]; 5] = [b"aaaa", b"bbbb", b"cccc", b"dddd", b"eeee"];
    let mut buf = ReorderBuffer::new(16, 5, 40);

    // Group 0..=4 with member 2 missing.
    for ext in [0u64, 1, 3, 4] {
        buf.insert(rec(ext, ext * 20_000, payloads[ext as usize]));
    }
    buf.insert_parity(0, xor5(payloads));

    assert_eq!(buf.pop_ready().unwrap().ext_seq, 0);
    assert_eq!(buf.pop_ready().unwrap().ext_seq, 1);
    assert!(buf.pop_ready().is_none());

    let rec = buf.recover_head(FRAME_PERIOD).expect("group is recoverable");
    assert_eq!(rec.ext_seq, 2);
    assert!(rec.is_fec_recovered);
    assert_eq!(&rec.payload[..], b"cccc");
    // Interpolated at frame period from the newest member (ext 4).
    assert_eq!(rec.rtp_ts, 2 * FRAME_PERIOD);

    assert_eq!(buf.pop_ready().unwrap().ext_seq, 3);
    assert_eq!(buf.pop_ready().unwrap().ext_seq, 4);
}

#[test]
fn test_parity_tracks_late_members() {
    let payloads: [&[u8]; 5] = [b"1111", b"2222", b"3333", b"4444", b"5555"];
    let mut buf = ReorderBuffer::new(16, 5, 40);

    buf.insert(rec(0, 0, payloads[0]));
    buf.insert(rec(1, 0, payloads[1]));
    assert!(buf.pop_ready().is_some());
    assert!(buf.pop_ready().is_some());

    // Parity lands before the tail of the group has arrived.
    buf.insert_parity(0, xor5(payloads));
    buf.insert(rec(3, 0, payloads[3]));
    assert!(
        buf.recover_head(FRAME_PERIOD).is_none(),
        "member 4 still missing, group must not recover yet"
    );

    buf.insert(rec(4, 0, payloads[4]));
    let rec = buf.recover_head(FRAME_PERIOD).expect("final parity applies");
    assert_eq!(&rec.payload[..], b"3333");
}

#[test]
fn test_two_missing_members_never_recover() {
    let payloads: [&[u8]; 5] = [b"1111", b"2222", b"3333", b"4444", b"5555"];
    let mut buf = ReorderBuffer::new(16, 5, 40);
    for ext in [0u64, 1, 4] {
        buf.insert(rec(ext, 0, payloads[ext as usize]));
    }
    buf.insert_parity(0, xor5(payloads));

    assert!(buf.pop_ready().is_some());
    assert!(buf.pop_ready().is_some());
    assert!(buf.recover_head(FRAME_PERIOD).is_none());
}

#[test]
fn test_xor_pads_to_largest_member() {
    let payloads: [&[u8]; 5] = [b"aa", b"bbbb", b"cc", b"dddd", b"ee"];
    let mut buf = ReorderBuffer::new(16, 5, 40);
    for ext in [0u64, 2, 3, 4] {
        buf.insert(rec(ext, 0, payloads[ext as usize]));
    }
    buf.insert_parity(0, xor5(payloads));

    assert!(buf.pop_ready().is_some());
    let rec = buf.recover_head(FRAME_PERIOD).expect("recoverable");
    assert_eq!(rec.ext_seq, 1);
    assert_eq!(&rec.payload[..4], b"bbbb");
}
