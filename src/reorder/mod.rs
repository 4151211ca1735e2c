#[cfg(test)]
mod reorder_test;

use std::collections::HashMap;

use bytes::Bytes;
use log::trace;

/// One staged media packet, owned by its reorder slot until playout.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub seq: u16,
    /// Extended sequence: `cycles * 65536 + seq`.
    pub ext_seq: u64,
    pub rtp_ts: u32,
    pub arrival_us: u64,
    pub payload: Bytes,
    pub is_fec_recovered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,
    Duplicate,
    /// Behind the consumed head; its slot was already played or
    /// concealed.
    Stale,
    /// No slot inside the window; the newest packet is dropped.
    Full,
}

/// Running XOR over the received members of one FEC group, plus a
/// timestamp reference for interpolating a recovered packet.
#[derive(Debug, Default)]
struct FecGroup {
    xor: Vec<u8>,
    present: u32,
    ref_ext: u64,
    ref_ts: u32,
    ref_arrival_us: u64,
}

fn xor_accumulate(acc: &mut Vec<u8>, payload: &[u8]) {
    if acc.len() < payload.len() {
        acc.resize(payload.len(), 0);
    }
    for (dst, src) in acc.iter_mut().zip(payload) {
        *dst ^= src;
    }
}

/// Fixed-size reordering window in front of the jitter buffer.
///
/// Slots are indexed by extended sequence modulo the window size; the
/// head only moves forward, via [`pop_ready`](ReorderBuffer::pop_ready),
/// [`recover_head`](ReorderBuffer::recover_head) or
/// [`skip_head`](ReorderBuffer::skip_head). Every media insert refreshes
/// the running XOR of its K-packet group, so a group with exactly one
/// missing member can be reconstructed against a wire parity packet.
pub struct ReorderBuffer {
    window: usize,
    group_size: u64,
    max_wait_us: u64,
    slots: Vec<Option<PacketRecord>>,
    groups: HashMap<u64, FecGroup>,
    parities: HashMap<u64, Bytes>,
    head: Option<u64>,
    stored: usize,
}

impl ReorderBuffer {
    pub fn new(window: usize, group_size: u16, max_wait_ms: u32) -> Self {
        ReorderBuffer {
            window,
            group_size: group_size as u64,
            max_wait_us: max_wait_ms as u64 * 1_000,
            slots: (0..window).map(|_| None).collect(),
            groups: HashMap::new(),
            parities: HashMap::new(),
            head: None,
            stored: 0,
        }
    }

    /// Next extended sequence owed to the consumer.
    pub fn head(&self) -> Option<u64> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.stored
    }

    pub fn is_empty(&self) -> bool {
        self.stored == 0
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.groups.clear();
        self.parities.clear();
        self.head = None;
        self.stored = 0;
    }

    pub fn insert(&mut self, rec: PacketRecord) -> InsertOutcome {
        let head = *self.head.get_or_insert(rec.ext_seq);
        if rec.ext_seq < head {
            trace!("reorder: late packet {} behind head {head}", rec.ext_seq);
            return InsertOutcome::Stale;
        }
        if rec.ext_seq - head >= self.window as u64 {
            return InsertOutcome::Full;
        }
        let idx = (rec.ext_seq % self.window as u64) as usize;
        if self.slots[idx].is_some() {
            return InsertOutcome::Duplicate;
        }

        let group_key = rec.ext_seq - rec.ext_seq % self.group_size;
        let group = self.groups.entry(group_key).or_default();
        xor_accumulate(&mut group.xor, &rec.payload);
        group.present |= 1 << (rec.ext_seq - group_key);
        group.ref_ext = rec.ext_seq;
        group.ref_ts = rec.rtp_ts;
        group.ref_arrival_us = rec.arrival_us;

        self.slots[idx] = Some(rec);
        self.stored += 1;
        InsertOutcome::Stored
    }

    /// Registers a wire parity packet covering the group that starts at
    /// `group_start_ext`.
    pub fn insert_parity(&mut self, group_start_ext: u64, payload: Bytes) {
        if let Some(head) = self.head {
            if group_start_ext + self.group_size <= head {
                return;
            }
        }
        self.parities.insert(group_start_ext, payload);
    }

    /// Takes the head packet if it has arrived.
    pub fn pop_ready(&mut self) -> Option<PacketRecord> {
        let head = self.head?;
        let idx = (head % self.window as u64) as usize;
        match &self.slots[idx] {
            Some(rec) if rec.ext_seq == head => {
                let rec = self.slots[idx].take();
                self.stored -= 1;
                self.advance(head);
                rec
            }
            _ => None,
        }
    }

    /// True when the head is missing but some later packet has been
    /// waiting longer than the reorder deadline.
    pub fn gap_expired(&self, now_us: u64) -> bool {
        self.stored > 0
            && self
                .slots
                .iter()
                .flatten()
                .any(|r| now_us.saturating_sub(r.arrival_us) > self.max_wait_us)
    }

    /// Reconstructs the missing head from its FEC group: possible when
    /// the group's wire parity and all other members have been seen. The
    /// synthesized packet carries a timestamp interpolated at frame
    /// period from the nearest member.
    pub fn recover_head(&mut self, frame_period: u32) -> Option<PacketRecord> {
        let head = self.head?;
        let group_key = head - head % self.group_size;
        let parity = self.parities.get(&group_key)?;
        let group = self.groups.get(&group_key)?;

        let full = ((1u64 << self.group_size) - 1) as u32;
        let missing_bit = 1u32 << (head - group_key);
        if group.present != full & !missing_bit {
            return None;
        }

        let mut payload = parity.to_vec();
        xor_accumulate(&mut payload, &group.xor);

        let ts_offset = (head as i64 - group.ref_ext as i64) * frame_period as i64;
        let rtp_ts = (group.ref_ts as i64).wrapping_add(ts_offset) as u32;

        let rec = PacketRecord {
            seq: (head & 0xFFFF) as u16,
            ext_seq: head,
            rtp_ts,
            arrival_us: group.ref_arrival_us,
            payload: Bytes::from(payload),
            is_fec_recovered: true,
        };
        self.advance(head);
        Some(rec)
    }

    /// Abandons the missing head; the caller conceals it.
    pub fn skip_head(&mut self) -> Option<u64> {
        let head = self.head?;
        self.advance(head);
        Some(head)
    }

    fn advance(&mut self, from: u64) {
        let head = from + 1;
        self.head = Some(head);
        let group_size = self.group_size;
        self.groups.retain(|g, _| g + group_size > head);
        self.parities.retain(|g, _| g + group_size > head);
    }
}
