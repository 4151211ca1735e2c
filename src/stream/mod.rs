
use std::net::SocketAddr;

use log::{trace, warn};
use media::codec::{AudioCodec, CodecConfig};
use media::plc::Concealer;
use media::FrameClass;
use rtp::packet::Packet;
use rtp::sequence::{extend, seq_less_than, RTP_SEQ_MOD};

use crate::config::{CodecParams, SessionConfig};
use crate::error::Result;
use crate::jitter::{EntryKind, InsertResult, JitterBuffer, PopResult};
use crate::registry::{Direction, FlowKey};
use crate::reorder::{InsertOutcome, PacketRecord, ReorderBuffer};
use crate::stats::{FrameKind, LastFrameType, PlayoutFrame, Stats, StreamStats};

/// Strictly sequential packets required before a new source is trusted
/// (RFC 3550 A.1).
pub(crate) const MIN_SEQUENTIAL: u16 = 2;
/// Largest forward jump still treated as in-order with loss.
pub(crate) const MAX_DROPOUT: u16 = 3000;
/// Backward window treated as reordering rather than a restart.
pub(crate) const MAX_MISORDER: u16 = 100;

/// Duplicate-detection bitmap span: 128 words x 64 bits.
const SEEN_WORDS: usize = 128;
const SEEN_SPAN: usize = SEEN_WORDS * 64;

/// What became of one arrived packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Accepted,
    OutOfOrderBuffered,
    /// This arrival completed an XOR FEC group and a missing packet was
    /// reconstructed.
    Recovered,
    DroppedStale,
    DroppedDuplicate,
    Failed,
}

enum SeqCheck {
    /// In order, possibly with a permissible gap.
    Fresh(u64),
    /// Inside the backward misorder window.
    OutOfOrder(u64),
    Duplicate,
    Stale,
    /// Source not validated yet; media still flows, statistics do not.
    Probation { ext: u64, out_of_order: bool },
}

#[derive(Debug, Default, Clone)]
struct Counters {
    packets_received: u64,
    overflow_lost: u64,
    out_of_order: u64,
    duplicates: u64,
    recovered_by_fec: u64,
    concealed_ms: u64,
    jitter_spikes: u64,
    corrected_timestamps: u64,
}

/// Per-flow state: the RFC 3550 sequence/timestamp machine plus the
/// owned reorder window, jitter buffer, codec and concealment history.
/// A stream is driven by exactly one task at a time; nothing in here is
/// shared.
pub struct Stream {
    // Identity.
    ssrc: u32,
    payload_type: u8,
    clock_rate: u32,
    frame_period: u32,
    direction: Direction,
    local: SocketAddr,
    remote: SocketAddr,

    // Sequence state.
    probation: u16,
    validated: bool,
    base_ext: u64,
    max_seq: u16,
    cycles: u32,
    bad_seq: Option<u16>,
    received: u64,
    seen: Vec<u64>,

    // Timing state.
    have_timing: bool,
    last_rtp_ts: u32,
    last_arrival_us: u64,
    have_transit: bool,
    transit: f64,
    jitter_ticks: f64,
    smoothed_jitter_ms: f64,
    max_jitter_ms: f64,

    counters: Counters,
    plc_used: bool,
    fec_used: bool,
    last_frame_type: LastFrameType,

    reorder: ReorderBuffer,
    playout: JitterBuffer,
    codec: AudioCodec,
    concealer: Concealer,
    last_enqueued_ts: Option<u32>,

    fec_payload_type: Option<u8>,
    fec_group_size: u64,
    last_activity_us: u64,
    failed: bool,
}

impl Stream {
    pub(crate) fn new(
        key: &FlowKey,
        payload_type: u8,
        params: &CodecParams,
        config: &SessionConfig,
    ) -> Result<Stream> {
        let codec = AudioCodec::new(&CodecConfig {
            kind: params.kind,
            sample_rate: params.sample_rate,
            channels: params.channels,
            min_bitrate_bps: config.min_bitrate_bps,
            max_bitrate_bps: config.max_bitrate_bps,
            bitrate_step_bps: config.bitrate_step_bps,
            speech_threshold_db: config.speech_threshold_db,
        })?;
        let concealer = Concealer::new(config.plc_mode, params.sample_rate);

        Ok(Stream {
            ssrc: key.ssrc,
            payload_type,
            clock_rate: params.clock_rate,
            frame_period: params.clock_rate / 50,
            direction: key.direction,
            local: key.local,
            remote: key.remote,

            probation: 0,
            validated: false,
            base_ext: 0,
            max_seq: 0,
            cycles: 0,
            bad_seq: None,
            received: 0,
            seen: vec![0; SEEN_WORDS],

            have_timing: false,
            last_rtp_ts: 0,
            last_arrival_us: 0,
            have_transit: false,
            transit: 0.0,
            jitter_ticks: 0.0,
            smoothed_jitter_ms: 0.0,
            max_jitter_ms: 0.0,

            counters: Counters::default(),
            plc_used: false,
            fec_used: false,
            last_frame_type: LastFrameType::default(),

            reorder: ReorderBuffer::new(
                config.reorder_window,
                config.fec_group_size,
                config.max_reorder_wait_ms,
            ),
            playout: JitterBuffer::new(&config.jitter, params.clock_rate),
            codec,
            concealer,
            last_enqueued_ts: None,

            fec_payload_type: config.fec_payload_type,
            fec_group_size: config.fec_group_size as u64,
            last_activity_us: 0,
            failed: false,
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn frame_size(&self) -> usize {
        self.codec.frame_size()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn is_inactive(&self, now_us: u64, timeout_us: u64) -> bool {
        now_us.saturating_sub(self.last_activity_us) > timeout_us
    }

    /// Feeds one parsed RTP packet through the sequence machine, the
    /// reorder window and into the playout queue. Never blocks; faults
    /// are folded into the returned outcome.
    pub fn on_packet(&mut self, now_us: u64, pkt: &Packet) -> PacketOutcome {
        if self.failed {
            return PacketOutcome::Failed;
        }
        self.last_activity_us = now_us;

        if Some(pkt.header.payload_type) == self.fec_payload_type {
            return self.on_parity(now_us, pkt);
        }

        let seq = pkt.header.sequence_number;
        let first = !self.have_timing && !self.validated && self.counters.packets_received == 0;
        if first {
            // First packet of the source: sequence adopted, probation
            // starts (RFC 3550 A.1 init).
            self.max_seq = seq.wrapping_sub(1);
            self.probation = MIN_SEQUENTIAL;
        }

        let (ext, out_of_order) = match self.update_seq(seq) {
            SeqCheck::Fresh(ext) => (ext, false),
            SeqCheck::Probation { ext, out_of_order } => (ext, out_of_order),
            SeqCheck::OutOfOrder(ext) => (ext, true),
            SeqCheck::Duplicate => {
                self.counters.duplicates += 1;
                return PacketOutcome::DroppedDuplicate;
            }
            SeqCheck::Stale => {
                trace!("ssrc {:08x}: stale sequence {seq}", self.ssrc);
                return PacketOutcome::DroppedStale;
            }
        };
        self.counters.packets_received += 1;

        let mut rtp_ts = pkt.header.timestamp;
        self.sanitize_timestamp(&mut rtp_ts, now_us);
        self.update_jitter(rtp_ts, now_us);
        self.last_rtp_ts = rtp_ts;
        self.last_arrival_us = now_us;
        self.have_timing = true;

        let rec = PacketRecord {
            seq,
            ext_seq: ext,
            rtp_ts,
            arrival_us: now_us,
            payload: pkt.payload.clone(),
            is_fec_recovered: false,
        };
        match self.reorder.insert(rec) {
            InsertOutcome::Stored => {}
            InsertOutcome::Duplicate => {
                self.counters.duplicates += 1;
                return PacketOutcome::DroppedDuplicate;
            }
            InsertOutcome::Stale => return PacketOutcome::DroppedStale,
            InsertOutcome::Full => {
                self.counters.overflow_lost += 1;
                warn!("ssrc {:08x}: reorder window full, dropping {seq}", self.ssrc);
                return PacketOutcome::Failed;
            }
        }

        let recovered = self.drain_reorder(now_us);
        if recovered {
            PacketOutcome::Recovered
        } else if out_of_order {
            PacketOutcome::OutOfOrderBuffered
        } else {
            PacketOutcome::Accepted
        }
    }

    fn on_parity(&mut self, now_us: u64, pkt: &Packet) -> PacketOutcome {
        if !self.have_timing {
            // Parity ahead of any media carries no usable group anchor.
            return PacketOutcome::Accepted;
        }
        let ext = self.ext_for(pkt.header.sequence_number);
        let group = ext - ext % self.fec_group_size;
        self.reorder.insert_parity(group, pkt.payload.clone());
        if self.drain_reorder(now_us) {
            PacketOutcome::Recovered
        } else {
            PacketOutcome::Accepted
        }
    }

    /// RFC 3550 A.1 `update_seq`, with a duplicate bitmap over the
    /// misorder window and out-of-order counting.
    fn update_seq(&mut self, seq: u16) -> SeqCheck {
        let udelta = seq.wrapping_sub(self.max_seq);

        if self.probation > 0 {
            let mut out_of_order = false;
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.init_seq(seq);
                    self.received += 1;
                    self.mark_seen(seq);
                    return SeqCheck::Fresh(extend(self.cycles, seq));
                }
            } else if udelta == 0 {
                return SeqCheck::Duplicate;
            } else {
                self.probation = MIN_SEQUENTIAL - 1;
                // A mismatch during probation adopts the new sequence,
                // backward jumps included.
                out_of_order = seq_less_than(seq, self.max_seq);
                if out_of_order {
                    self.counters.out_of_order += 1;
                }
                self.max_seq = seq;
            }
            return SeqCheck::Probation {
                ext: extend(self.cycles, seq),
                out_of_order,
            };
        }

        if udelta == 0 {
            return SeqCheck::Duplicate;
        }
        if udelta < MAX_DROPOUT {
            if seq < self.max_seq {
                // 16-bit wrap.
                self.cycles += 1;
            }
            let mut skipped = self.max_seq.wrapping_add(1);
            while skipped != seq {
                self.clear_seen(skipped);
                skipped = skipped.wrapping_add(1);
            }
            self.max_seq = seq;
            self.mark_seen(seq);
            self.received += 1;
            SeqCheck::Fresh(extend(self.cycles, seq))
        } else if udelta > u16::MAX - MAX_MISORDER {
            if self.is_seen(seq) {
                return SeqCheck::Duplicate;
            }
            self.mark_seen(seq);
            self.received += 1;
            self.counters.out_of_order += 1;
            SeqCheck::OutOfOrder(self.ext_for(seq))
        } else if self.bad_seq == Some(seq) {
            // Two sequential packets after a big jump: the source
            // restarted.
            trace!("ssrc {:08x}: source restart at {seq}", self.ssrc);
            self.init_seq(seq);
            self.received += 1;
            self.mark_seen(seq);
            self.reset_playout();
            SeqCheck::Fresh(extend(self.cycles, seq))
        } else {
            self.bad_seq = Some(seq.wrapping_add(1));
            SeqCheck::Stale
        }
    }

    fn init_seq(&mut self, seq: u16) {
        self.base_ext = seq as u64;
        self.max_seq = seq;
        self.cycles = 0;
        self.bad_seq = None;
        self.received = 0;
        self.validated = true;
        self.seen.iter_mut().for_each(|w| *w = 0);
    }

    fn reset_playout(&mut self) {
        self.reorder.reset();
        self.playout.reset();
        self.last_enqueued_ts = None;
        self.have_transit = false;
        self.have_timing = false;
    }

    /// Extended sequence nearest to the current edge, for packets that
    /// sit outside the in-order fast path (misordered media, parity).
    fn ext_for(&self, seq: u16) -> u64 {
        let max_ext = extend(self.cycles, self.max_seq);
        let udelta = seq.wrapping_sub(self.max_seq);
        if udelta < 1 << 15 {
            max_ext + udelta as u64
        } else {
            max_ext.saturating_sub(RTP_SEQ_MOD as u64 - udelta as u64)
        }
    }

    fn mark_seen(&mut self, seq: u16) {
        let pos = seq as usize % SEEN_SPAN;
        self.seen[pos / 64] |= 1 << (pos % 64);
    }

    fn clear_seen(&mut self, seq: u16) {
        let pos = seq as usize % SEEN_SPAN;
        self.seen[pos / 64] &= !(1 << (pos % 64));
    }

    fn is_seen(&self, seq: u16) -> bool {
        let pos = seq as usize % SEEN_SPAN;
        self.seen[pos / 64] & (1 << (pos % 64)) != 0
    }

    /// Repairs timestamps that fall outside a 10 ms window around the
    /// arrival-predicted value, unless the deviation is a whole number
    /// of frames (a silence gap or a dropped frame, not a broken clock).
    fn sanitize_timestamp(&mut self, rtp_ts: &mut u32, now_us: u64) {
        if !self.have_timing {
            return;
        }
        let elapsed_ms = now_us.saturating_sub(self.last_arrival_us) / 1_000;
        let expected = self
            .last_rtp_ts
            .wrapping_add((self.clock_rate as u64 / 1_000 * elapsed_ms) as u32);
        let deviation = (*rtp_ts).wrapping_sub(expected) as i32;
        let window = self.clock_rate / 100;
        if deviation.unsigned_abs() > window && deviation.unsigned_abs() % self.frame_period != 0 {
            trace!(
                "ssrc {:08x}: correcting timestamp {} -> {expected}",
                self.ssrc,
                *rtp_ts
            );
            *rtp_ts = expected;
            self.counters.corrected_timestamps += 1;
        }
    }

    /// RFC 3550 6.4.1 interarrival jitter, in timestamp ticks, with a
    /// second EWMA in milliseconds for buffer sizing.
    fn update_jitter(&mut self, rtp_ts: u32, now_us: u64) {
        let arrival_ticks = now_us as f64 * self.clock_rate as f64 / 1_000_000.0;
        let transit = arrival_ticks - rtp_ts as f64;
        if self.have_transit {
            let d = (transit - self.transit).abs();
            if d > (self.clock_rate / 100) as f64 {
                self.counters.jitter_spikes += 1;
            }
            self.jitter_ticks += (d - self.jitter_ticks) / 16.0;
            let jitter_ms = self.jitter_ticks / self.clock_rate as f64 * 1_000.0;
            self.smoothed_jitter_ms += (jitter_ms - self.smoothed_jitter_ms) / 8.0;
            if jitter_ms > self.max_jitter_ms {
                self.max_jitter_ms = jitter_ms;
            }
        }
        self.transit = transit;
        self.have_transit = true;
    }

    /// Moves everything deliverable from the reorder window into the
    /// playout queue: in-order packets directly, gaps via FEC recovery
    /// where a group is complete, and as concealment placeholders once
    /// the reorder deadline has passed. Returns whether any FEC
    /// recovery happened.
    fn drain_reorder(&mut self, now_us: u64) -> bool {
        let mut recovered_any = false;
        loop {
            if let Some(rec) = self.reorder.pop_ready() {
                self.enqueue_media(rec);
            } else if let Some(rec) = self.reorder.recover_head(self.frame_period) {
                self.counters.recovered_by_fec += 1;
                self.fec_used = true;
                recovered_any = true;
                self.enqueue_media(rec);
            } else if self.reorder.gap_expired(now_us) {
                if let Some(ext) = self.reorder.skip_head() {
                    self.enqueue_conceal(ext);
                }
            } else {
                break;
            }
        }
        recovered_any
    }

    fn enqueue_media(&mut self, rec: PacketRecord) {
        let result = self.playout.insert(
            rec.ext_seq,
            rec.rtp_ts,
            Some(rec.arrival_us),
            EntryKind::Media {
                payload: rec.payload,
                fec_recovered: rec.is_fec_recovered,
            },
        );
        match result {
            InsertResult::Queued => self.last_enqueued_ts = Some(rec.rtp_ts),
            InsertResult::Overflow => {
                self.counters.overflow_lost += 1;
                warn!("ssrc {:08x}: jitter buffer full", self.ssrc);
            }
        }
    }

    fn enqueue_conceal(&mut self, ext_seq: u64) {
        let rtp_ts = match self.last_enqueued_ts {
            Some(ts) => ts.wrapping_add(self.frame_period),
            None => return,
        };
        if self
            .playout
            .insert(ext_seq, rtp_ts, None, EntryKind::Conceal)
            == InsertResult::Queued
        {
            self.last_enqueued_ts = Some(rtp_ts);
        }
    }

    /// One playout tick: drains the reorder window, pops the due entry
    /// and decodes, FEC-synthesizes or conceals it into `out`.
    pub fn next_playout_frame(&mut self, now_us: u64, out: &mut [i16]) -> Result<PlayoutFrame> {
        if self.failed {
            return Ok(PlayoutFrame::not_ready());
        }
        if out.len() < self.codec.frame_size() {
            return Err(media::Error::ErrBufferTooSmall {
                need: self.codec.frame_size(),
                got: out.len(),
            }
            .into());
        }

        self.drain_reorder(now_us);

        let frame = match self.playout.pop_due(now_us) {
            PopResult::NotReady => PlayoutFrame::not_ready(),
            PopResult::Late(entry) => {
                trace!(
                    "ssrc {:08x}: frame {} played too late, concealing",
                    self.ssrc,
                    entry.ext_seq
                );
                self.conceal_frame(out)?
            }
            PopResult::Frame(entry) => match entry.kind {
                EntryKind::Media {
                    payload,
                    fec_recovered,
                } => match self.codec.decode(&payload, out) {
                    Ok((n, class)) => {
                        self.concealer.push_frame(&out[..n]);
                        self.last_frame_type = match class {
                            FrameClass::Voice => LastFrameType::Voice,
                            FrameClass::Dtx => LastFrameType::Dtx,
                            FrameClass::ComfortNoise => LastFrameType::ComfortNoise,
                        };
                        PlayoutFrame {
                            samples_written: n,
                            kind: if fec_recovered {
                                FrameKind::Fec
                            } else {
                                FrameKind::Decoded
                            },
                        }
                    }
                    Err(e) => {
                        warn!("ssrc {:08x}: decode failed: {e}", self.ssrc);
                        self.failed = true;
                        PlayoutFrame::not_ready()
                    }
                },
                EntryKind::Conceal => {
                    if self.codec.supports_inband_fec() {
                        if let Some(next) = self.playout.peek_next_media(entry.ext_seq) {
                            match self.codec.decode_fec(&next, out) {
                                Ok(n) => {
                                    self.fec_used = true;
                                    self.concealer.push_frame(&out[..n]);
                                    PlayoutFrame {
                                        samples_written: n,
                                        kind: FrameKind::Fec,
                                    }
                                }
                                Err(_) => self.conceal_frame(out)?,
                            }
                        } else {
                            self.conceal_frame(out)?
                        }
                    } else {
                        self.conceal_frame(out)?
                    }
                }
            },
        };

        self.playout.adapt(self.smoothed_jitter_ms);
        // Loss-rate feedback into the codec: one control-loop step per
        // tick, so the adaptive bitrate tracks what this stream really
        // loses even though the monitor never encodes.
        if self.codec.update_loss_feedback(self.loss_rate() as f32).is_err() {
            self.failed = true;
        }
        Ok(frame)
    }

    fn conceal_frame(&mut self, out: &mut [i16]) -> Result<PlayoutFrame> {
        let n = self.concealer.conceal(out, Some(&mut self.codec))?;
        self.counters.concealed_ms += 1_000 / 50;
        self.plc_used = true;
        self.last_frame_type = LastFrameType::ComfortNoise;
        Ok(PlayoutFrame {
            samples_written: n,
            kind: FrameKind::Plc,
        })
    }

    fn expected(&self) -> u64 {
        if !self.validated {
            return 0;
        }
        extend(self.cycles, self.max_seq) + 1 - self.base_ext
    }

    fn sequence_lost(&self) -> u64 {
        self.expected().saturating_sub(self.received)
    }

    /// Total loss, sequence gaps plus buffer-overflow drops.
    fn lost_packets(&self) -> u64 {
        self.sequence_lost() + self.counters.overflow_lost
    }

    fn loss_rate(&self) -> f64 {
        let expected = self.expected();
        if expected == 0 {
            return 0.0;
        }
        (self.lost_packets() as f64 / expected as f64).min(1.0)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            packets_received: self.counters.packets_received,
            packets_lost: self.lost_packets(),
            out_of_order: self.counters.out_of_order,
            duplicates: self.counters.duplicates,
            recovered_by_fec: self.counters.recovered_by_fec,
            concealed_ms: self.counters.concealed_ms,
            current_jitter_ms: self.jitter_ticks / self.clock_rate as f64 * 1_000.0,
            max_jitter_ms: self.max_jitter_ms,
            buffer_size_ms: self.playout.target_delay_ms(),
            buffer_target_ms: self.playout.desired_delay_ms(),
            packet_loss_rate: self.loss_rate(),
            current_bitrate_bps: self.codec.current_bitrate_bps(),
            plc_used: self.plc_used,
            fec_used: self.fec_used,
            last_frame_type: self.last_frame_type,
            jitter_spikes: self.counters.jitter_spikes,
            corrected_timestamps: self.counters.corrected_timestamps,
        }
    }

    pub fn stream_stats(&self) -> StreamStats {
        StreamStats {
            ssrc: self.ssrc,
            payload_type: self.payload_type,
            direction: self.direction,
            local: self.local,
            remote: self.remote,
            stats: self.stats(),
        }
    }

    /// Releases codec resources and drains the final counters.
    pub(crate) fn close(&mut self) -> StreamStats {
        let stats = self.stream_stats();
        self.codec.close();
        stats
    }
}
