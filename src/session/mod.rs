
use log::{trace, warn};
use parking_lot::Mutex;
use rtp::packet::Packet;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::registry::{FiveTuple, FlowKey, Registry, StreamId};
use crate::stats::{FinalStats, PlayoutFrame, StreamStats};
use crate::stream::PacketOutcome;

struct SessionInner {
    config: SessionConfig,
    registry: Registry,
    closed: bool,
    invalid_rtp: u64,
}

/// One monitored call: the session-open event's media parameters plus
/// the registry of live streams.
///
/// The handle is the entire API surface; there is no process-wide
/// state. All methods serialize on one internal lock. The arrival and
/// playout paths are the only entrants, so the lock is uncontended in
/// the single-capture-thread deployment.
pub struct Session {
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Validates the configuration and opens a session. Partial state
    /// is impossible: stream allocation is lazy, so a failure here
    /// leaves nothing behind.
    pub fn open(config: SessionConfig) -> Result<Session> {
        config.validate()?;
        let registry = Registry::new(config.max_streams);
        Ok(Session {
            inner: Mutex::new(SessionInner {
                config,
                registry,
                closed: false,
                invalid_rtp: 0,
            }),
        })
    }

    /// Ingests one demultiplexed UDP payload. Non-blocking; every fault
    /// is folded into the outcome and the per-stream counters.
    pub fn on_rtp_packet(&self, now_us: u64, tuple: &FiveTuple, data: &[u8]) -> PacketOutcome {
        let mut buf = data;
        let pkt = match Packet::unmarshal(&mut buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.invalid_rtp += 1;
                trace!("dropping invalid RTP packet: {e}");
                return PacketOutcome::Failed;
            }
        };

        let key = FlowKey::new(tuple, pkt.header.ssrc);
        let mut inner = self.inner.lock();
        if inner.closed {
            return PacketOutcome::Failed;
        }

        // Parity packets never allocate a stream; a group with no media
        // seen yet is unrecoverable anyway.
        if inner.config.fec_payload_type == Some(pkt.header.payload_type) {
            return match inner.registry.find_mut(&key) {
                Some(stream) => stream.on_packet(now_us, &pkt),
                None => {
                    trace!("parity for unknown flow ssrc {:08x}", pkt.header.ssrc);
                    PacketOutcome::Accepted
                }
            };
        }

        let inner = &mut *inner;
        match inner
            .registry
            .find_or_create(key, pkt.header.payload_type, &inner.config)
        {
            Ok((_, stream)) => stream.on_packet(now_us, &pkt),
            Err(e) => {
                warn!("cannot admit flow ssrc {:08x}: {e}", pkt.header.ssrc);
                PacketOutcome::Failed
            }
        }
    }

    /// Streams currently alive, newest snapshot of each.
    pub fn streams(&self) -> Vec<(StreamId, StreamStats)> {
        let inner = self.inner.lock();
        inner
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| {
                let idx = id.0 as usize;
                inner
                    .registry
                    .snapshot_at(idx)
                    .map(|stats| (id, stats))
            })
            .collect()
    }

    /// Resolves the handle for a flow, if the registry knows it.
    pub fn find_stream(&self, tuple: &FiveTuple, ssrc: u32) -> Option<StreamId> {
        self.inner.lock().registry.find(&FlowKey::new(tuple, ssrc))
    }

    /// Pulls the next 20 ms PCM frame for one stream. Returns
    /// `NotReady` when nothing is due at `now_us`.
    pub fn next_playout_frame(
        &self,
        id: StreamId,
        now_us: u64,
        out: &mut [i16],
    ) -> Result<PlayoutFrame> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::SessionClosed);
        }
        let stream = inner.registry.get_mut(id).ok_or(Error::UnknownStream)?;
        stream.next_playout_frame(now_us, out)
    }

    /// Copies every live stream's counters. Callable from any thread.
    pub fn snapshot(&self) -> Vec<StreamStats> {
        self.inner.lock().registry.snapshot()
    }

    /// Count of packets rejected before flow classification.
    pub fn invalid_rtp_packets(&self) -> u64 {
        self.inner.lock().invalid_rtp
    }

    /// Sweeps out streams silent for longer than the RTP timeout,
    /// returning their drained counters.
    pub fn evict_inactive(&self, now_us: u64) -> FinalStats {
        let mut inner = self.inner.lock();
        let timeout = inner.config.rtp_timeout_us;
        FinalStats {
            streams: inner.registry.evict_inactive(now_us, timeout),
        }
    }

    /// Destroys all streams and hands back the final counters. The
    /// session accepts nothing afterwards.
    pub fn close(&self) -> FinalStats {
        let mut inner = self.inner.lock();
        inner.closed = true;
        FinalStats {
            streams: inner.registry.close_all(),
        }
    }
}
