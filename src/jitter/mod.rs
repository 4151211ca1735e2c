#[cfg(test)]
mod jitter_test;

use std::collections::VecDeque;

use bytes::Bytes;

use crate::config::JitterConfig;

/// Delay growth per playout tick while adapting upward.
const GROW_STEP_US: u64 = 2_000;
/// Delay shrink per playout tick while adapting downward.
const SHRINK_STEP_US: u64 = 1_000;

pub(crate) fn ticks_to_us(ticks: i64, clock_rate: u32) -> i64 {
    ticks * 1_000_000 / clock_rate as i64
}

/// Payload of one playout-queue entry.
#[derive(Debug, Clone)]
pub enum EntryKind {
    Media { payload: Bytes, fec_recovered: bool },
    /// Placeholder for a slot given up on in the reorder window; the
    /// stream synthesizes it at playout time.
    Conceal,
}

#[derive(Debug, Clone)]
pub struct JitterEntry {
    pub ext_seq: u64,
    pub rtp_ts: u32,
    /// Scheduled playout time.
    pub due_us: u64,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Queued,
    /// Queue at capacity; the newest packet is dropped and counted as
    /// lost.
    Overflow,
}

#[derive(Debug)]
pub enum PopResult {
    /// The head entry is due; play it.
    Frame(JitterEntry),
    /// The head entry's media time is more than `max_delay` behind the
    /// clock; drop it and conceal.
    Late(JitterEntry),
    NotReady,
}

/// Bounded, time-ordered playout queue with an adaptive target delay.
///
/// Entries are scheduled at `arrival + target_delay` and popped when
/// due. A playout-timeline anchor (first scheduled packet's timestamp)
/// maps RTP time onto the monotonic clock so that packets which missed
/// their media slot by more than `max_delay` are declared late. The
/// target grows by up to 2 ms and shrinks by at most 1 ms per tick,
/// following the smoothed jitter estimate.
pub struct JitterBuffer {
    clock_rate: u32,
    max_packets: usize,
    min_delay_us: u64,
    base_delay_us: u64,
    max_delay_us: u64,
    jitter_factor: f32,
    target_delay_us: u64,
    desired_delay_us: u64,
    entries: VecDeque<JitterEntry>,
    anchor: Option<(u64, u32)>,
    last_due_us: u64,
}

impl JitterBuffer {
    pub fn new(config: &JitterConfig, clock_rate: u32) -> Self {
        let base_delay_us = config.base_delay_ms as u64 * 1_000;
        JitterBuffer {
            clock_rate,
            max_packets: config.max_packets,
            min_delay_us: config.min_delay_ms as u64 * 1_000,
            base_delay_us,
            max_delay_us: config.max_delay_ms as u64 * 1_000,
            jitter_factor: config.jitter_factor,
            target_delay_us: base_delay_us,
            desired_delay_us: base_delay_us,
            entries: VecDeque::new(),
            anchor: None,
            last_due_us: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.anchor = None;
        self.last_due_us = 0;
    }

    /// Current applied delay, for the `buffer_size_ms` statistic.
    pub fn target_delay_ms(&self) -> f64 {
        self.target_delay_us as f64 / 1_000.0
    }

    /// Delay the adapter is steering toward, for `buffer_target_ms`.
    pub fn desired_delay_ms(&self) -> f64 {
        self.desired_delay_us as f64 / 1_000.0
    }

    /// Media time the entry should play at, per the playout anchor.
    fn media_due(&self, rtp_ts: u32) -> Option<u64> {
        self.anchor.map(|(due0, ts0)| {
            let dticks = rtp_ts.wrapping_sub(ts0) as i32 as i64;
            let due = due0 as i64 + ticks_to_us(dticks, self.clock_rate);
            due.max(0) as u64
        })
    }

    /// Queues one entry. `arrival_us` is `None` for concealment
    /// placeholders, which are scheduled purely on the media timeline.
    /// Scheduling is monotone in extended sequence: the reorder window
    /// already fixed the order, so a due time never undercuts the
    /// previous entry's.
    pub fn insert(
        &mut self,
        ext_seq: u64,
        rtp_ts: u32,
        arrival_us: Option<u64>,
        kind: EntryKind,
    ) -> InsertResult {
        if self.entries.len() >= self.max_packets {
            return InsertResult::Overflow;
        }

        let arrival_due = arrival_us.map(|a| a + self.target_delay_us);
        let media_due = self.media_due(rtp_ts);
        let due_us = arrival_due
            .unwrap_or(0)
            .max(media_due.unwrap_or(0))
            .max(self.last_due_us);

        if self.anchor.is_none() {
            self.anchor = Some((due_us, rtp_ts));
        }
        self.last_due_us = due_us;
        self.entries.push_back(JitterEntry {
            ext_seq,
            rtp_ts,
            due_us,
            kind,
        });
        InsertResult::Queued
    }

    /// Pops the head once its scheduled time has passed, flagging it
    /// late when its media slot is more than `max_delay` gone.
    pub fn pop_due(&mut self, now_us: u64) -> PopResult {
        match self.entries.front() {
            Some(head) if head.due_us <= now_us => {}
            _ => return PopResult::NotReady,
        }
        let entry = self.entries.pop_front().expect("head checked above");
        let late = self
            .media_due(entry.rtp_ts)
            .map_or(false, |due| now_us.saturating_sub(due) > self.max_delay_us);
        if late {
            PopResult::Late(entry)
        } else {
            PopResult::Frame(entry)
        }
    }

    /// Payload of the entry immediately following `ext_seq`, if it is
    /// already queued at the head. Used for in-band FEC lookahead.
    pub fn peek_next_media(&self, ext_seq: u64) -> Option<Bytes> {
        match self.entries.front() {
            Some(JitterEntry {
                ext_seq: next,
                kind: EntryKind::Media { payload, .. },
                ..
            }) if *next == ext_seq + 1 => Some(payload.clone()),
            _ => None,
        }
    }

    /// Re-targets the delay from the smoothed jitter estimate. Grows
    /// fast, shrinks slow.
    pub fn adapt(&mut self, smoothed_jitter_ms: f64) {
        let jitter_us = (smoothed_jitter_ms * self.jitter_factor as f64 * 1_000.0).max(0.0) as u64;
        self.desired_delay_us =
            (self.base_delay_us + jitter_us).clamp(self.min_delay_us, self.max_delay_us);

        if self.desired_delay_us > self.target_delay_us {
            self.target_delay_us =
                (self.target_delay_us + GROW_STEP_US).min(self.desired_delay_us);
        } else {
            self.target_delay_us = self
                .target_delay_us
                .saturating_sub(SHRINK_STEP_US)
                .max(self.desired_delay_us);
        }
    }
}
