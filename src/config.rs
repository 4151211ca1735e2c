use media::codec::{bitrate, CodecKind};
use media::plc::ConcealmentMode;

use crate::error::{Error, Result};

/// Media parameters agreed in signaling for one payload type.
#[derive(Debug, Clone)]
pub struct CodecParams {
    pub payload_type: u8,
    pub kind: CodecKind,
    /// RTP timestamp rate in Hz.
    pub clock_rate: u32,
    /// Decoder output rate in Hz. Equal to `clock_rate` for every codec
    /// the monitor handles.
    pub sample_rate: u32,
    pub channels: u8,
}

impl CodecParams {
    pub fn pcmu() -> Self {
        CodecParams {
            payload_type: 0,
            kind: CodecKind::Pcmu,
            clock_rate: 8_000,
            sample_rate: 8_000,
            channels: 1,
        }
    }

    pub fn pcma() -> Self {
        CodecParams {
            payload_type: 8,
            kind: CodecKind::Pcma,
            clock_rate: 8_000,
            sample_rate: 8_000,
            channels: 1,
        }
    }

    pub fn opus(payload_type: u8) -> Self {
        CodecParams {
            payload_type,
            kind: CodecKind::Opus,
            clock_rate: 48_000,
            sample_rate: 48_000,
            channels: 1,
        }
    }
}

/// Jitter buffer thresholds, in milliseconds of playout delay.
#[derive(Debug, Clone)]
pub struct JitterConfig {
    pub min_delay_ms: u32,
    pub base_delay_ms: u32,
    pub max_delay_ms: u32,
    /// Weight of the smoothed jitter estimate in the target delay.
    pub jitter_factor: f32,
    /// Hard cap on queued packets.
    pub max_packets: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        JitterConfig {
            min_delay_ms: 20,
            base_delay_ms: 40,
            max_delay_ms: 100,
            jitter_factor: 1.5,
            max_packets: 1000,
        }
    }
}

/// Everything `open_session` needs: the codec table from signaling plus
/// the pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Codec parameters by payload type.
    pub codecs: Vec<CodecParams>,
    pub plc_mode: ConcealmentMode,
    pub jitter: JitterConfig,
    pub min_bitrate_bps: i32,
    pub max_bitrate_bps: i32,
    pub bitrate_step_bps: i32,
    pub speech_threshold_db: f32,
    /// Reorder window size W, in packets.
    pub reorder_window: usize,
    pub max_reorder_wait_ms: u32,
    /// XOR FEC group size K: one parity covers K media packets.
    pub fec_group_size: u16,
    /// Payload type carrying XOR parity packets; `None` disables group
    /// FEC entirely.
    pub fec_payload_type: Option<u8>,
    pub max_streams: usize,
    /// Inactivity eviction threshold.
    pub rtp_timeout_us: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            codecs: vec![
                CodecParams::pcmu(),
                CodecParams::pcma(),
                CodecParams::opus(96),
            ],
            plc_mode: ConcealmentMode::default(),
            jitter: JitterConfig::default(),
            min_bitrate_bps: bitrate::MIN_BITRATE_BPS,
            max_bitrate_bps: bitrate::MAX_BITRATE_BPS,
            bitrate_step_bps: bitrate::BITRATE_STEP_BPS,
            speech_threshold_db: -30.0,
            reorder_window: 128,
            max_reorder_wait_ms: 40,
            fec_group_size: 5,
            fec_payload_type: Some(127),
            max_streams: 32,
            rtp_timeout_us: 30_000_000,
        }
    }
}

impl SessionConfig {
    pub fn codec_for(&self, payload_type: u8) -> Option<&CodecParams> {
        self.codecs.iter().find(|c| c.payload_type == payload_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.codecs.is_empty() {
            return Err(Error::InvalidConfig("no codecs configured".into()));
        }
        for codec in &self.codecs {
            if codec.payload_type > 127 {
                return Err(Error::InvalidConfig(format!(
                    "payload type {} exceeds the 7-bit field",
                    codec.payload_type
                )));
            }
            if codec.channels != 1 {
                return Err(Error::InvalidConfig(format!(
                    "payload type {}: only mono streams are monitored",
                    codec.payload_type
                )));
            }
            if codec.clock_rate == 0 || codec.clock_rate % 50 != 0 {
                return Err(Error::InvalidConfig(format!(
                    "payload type {}: clock rate {} does not cut into 20 ms frames",
                    codec.payload_type, codec.clock_rate
                )));
            }
        }
        if let Some(pt) = self.fec_payload_type {
            if pt > 127 {
                return Err(Error::InvalidConfig(format!(
                    "FEC payload type {pt} exceeds the 7-bit field"
                )));
            }
        }
        if !(2..=32).contains(&self.fec_group_size) {
            return Err(Error::InvalidConfig(
                "FEC group size must cover 2 to 32 packets".into(),
            ));
        }
        if self.reorder_window < self.fec_group_size as usize {
            return Err(Error::InvalidConfig(
                "reorder window smaller than one FEC group".into(),
            ));
        }
        if self.jitter.min_delay_ms > self.jitter.base_delay_ms
            || self.jitter.base_delay_ms > self.jitter.max_delay_ms
        {
            return Err(Error::InvalidConfig(
                "jitter delays must satisfy min <= base <= max".into(),
            ));
        }
        if self.min_bitrate_bps <= 0 || self.min_bitrate_bps > self.max_bitrate_bps {
            return Err(Error::InvalidConfig(
                "bitrate bounds must satisfy 0 < min <= max".into(),
            ));
        }
        if self.max_streams == 0 {
            return Err(Error::InvalidConfig("max_streams must be nonzero".into()));
        }
        Ok(())
    }
}
