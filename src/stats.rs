use std::net::SocketAddr;

use serde::Serialize;

use crate::registry::Direction;

/// Classification of the most recent playout frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LastFrameType {
    #[default]
    Voice,
    Dtx,
    ComfortNoise,
}

/// Where a playout frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Decoded from a received packet.
    Decoded,
    /// Reconstructed via XOR-group or in-band FEC.
    Fec,
    /// Synthesized by packet loss concealment.
    Plc,
    /// Nothing was due at this tick.
    NotReady,
}

/// Result of one playout tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayoutFrame {
    /// PCM samples written into the caller's buffer.
    pub samples_written: usize,
    pub kind: FrameKind,
}

impl PlayoutFrame {
    pub(crate) fn not_ready() -> Self {
        PlayoutFrame {
            samples_written: 0,
            kind: FrameKind::NotReady,
        }
    }
}

/// Per-stream counter snapshot. Field names are stable; downstream
/// renderers key on them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub out_of_order: u64,
    pub duplicates: u64,
    pub recovered_by_fec: u64,
    pub concealed_ms: u64,
    pub current_jitter_ms: f64,
    pub max_jitter_ms: f64,
    pub buffer_size_ms: f64,
    pub buffer_target_ms: f64,
    pub packet_loss_rate: f64,
    pub current_bitrate_bps: i32,
    pub plc_used: bool,
    pub fec_used: bool,
    pub last_frame_type: LastFrameType,
    pub jitter_spikes: u64,
    pub corrected_timestamps: u64,
}

/// One stream's identity plus its counters, as listed by `snapshot` and
/// drained by `close_session`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub ssrc: u32,
    pub payload_type: u8,
    pub direction: Direction,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    #[serde(flatten)]
    pub stats: Stats,
}

/// Everything a closing session hands back to the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FinalStats {
    pub streams: Vec<StreamStats>,
}

impl FinalStats {
    /// Sum of concealed milliseconds across all streams, a quick
    /// call-quality indicator.
    pub fn total_concealed_ms(&self) -> u64 {
        self.streams.iter().map(|s| s.stats.concealed_ms).sum()
    }

    pub fn total_packets_received(&self) -> u64 {
        self.streams.iter().map(|s| s.stats.packets_received).sum()
    }
}
