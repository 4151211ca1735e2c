#[cfg(test)]
mod codec_test;

pub mod bitrate;
pub mod dtx;
pub mod g711;

use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::packet::Packet as OpusPacket;
use audiopus::{Application, Bitrate, Channels, MutSignals, SampleRate};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::{FrameClass, FRAMES_PER_SECOND};
use bitrate::{BitrateController, MAX_BITRATE_BPS, MIN_BITRATE_BPS};
use dtx::{VoiceGate, DEFAULT_SPEECH_THRESHOLD_DB};

/// Codec families the monitor decodes. PCMU/PCMA are the RFC 3551 static
/// payload types 0 and 8; dynamic types are bound to Opus by signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Pcmu,
    Pcma,
    Opus,
}

impl CodecKind {
    /// Maps a payload type onto a codec family: static audio types 0/8,
    /// dynamic range 96..=127 assumed Opus unless signaling overrides.
    pub fn from_payload_type(payload_type: u8) -> Option<CodecKind> {
        match payload_type {
            0 => Some(CodecKind::Pcmu),
            8 => Some(CodecKind::Pcma),
            96..=127 => Some(CodecKind::Opus),
            _ => None,
        }
    }
}

/// Codec lifecycle per stream. `Failed` is sticky: the owning stream
/// rejects packets until the session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecState {
    #[default]
    Uninitialized,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct CodecConfig {
    pub kind: CodecKind,
    pub sample_rate: u32,
    pub channels: u8,
    pub min_bitrate_bps: i32,
    pub max_bitrate_bps: i32,
    pub bitrate_step_bps: i32,
    pub speech_threshold_db: f32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            kind: CodecKind::Opus,
            sample_rate: 48_000,
            channels: 1,
            min_bitrate_bps: MIN_BITRATE_BPS,
            max_bitrate_bps: MAX_BITRATE_BPS,
            bitrate_step_bps: bitrate::BITRATE_STEP_BPS,
            speech_threshold_db: DEFAULT_SPEECH_THRESHOLD_DB,
        }
    }
}

fn opus_rate(sample_rate: u32) -> Result<SampleRate> {
    match sample_rate {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(Error::ErrUnsupportedSampleRate(other)),
    }
}

/// One stream's codec: Opus encoder/decoder pair tuned for VoIP
/// (max complexity, in-band FEC, DTX via the voice gate, loss-adaptive
/// bitrate) or a G.711 companding transcoder.
pub struct AudioCodec {
    kind: CodecKind,
    sample_rate: u32,
    frame_size: usize,
    state: CodecState,
    opus_enc: Option<OpusEncoder>,
    opus_dec: Option<OpusDecoder>,
    bitrate: BitrateController,
    gate: VoiceGate,
}

impl AudioCodec {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        if config.channels != 1 {
            return Err(Error::ErrUnsupportedChannels(config.channels));
        }
        let frame_size = (config.sample_rate / FRAMES_PER_SECOND) as usize;

        let (opus_enc, opus_dec) = match config.kind {
            CodecKind::Pcmu | CodecKind::Pcma => {
                if config.sample_rate != 8_000 {
                    return Err(Error::ErrUnsupportedSampleRate(config.sample_rate));
                }
                (None, None)
            }
            CodecKind::Opus => {
                let rate = opus_rate(config.sample_rate)?;
                let mut enc = OpusEncoder::new(rate, Channels::Mono, Application::Voip)?;
                enc.set_complexity(10)?;
                enc.set_inband_fec(true)?;
                enc.set_bitrate(Bitrate::BitsPerSecond(config.max_bitrate_bps))?;
                let dec = OpusDecoder::new(rate, Channels::Mono)?;
                (Some(enc), Some(dec))
            }
        };

        debug!(
            "codec ready: {:?} at {} Hz, frame {} samples",
            config.kind, config.sample_rate, frame_size
        );

        Ok(AudioCodec {
            kind: config.kind,
            sample_rate: config.sample_rate,
            frame_size,
            state: CodecState::Ready,
            opus_enc,
            opus_dec,
            bitrate: BitrateController::new(
                config.min_bitrate_bps,
                config.max_bitrate_bps,
                config.bitrate_step_bps,
            ),
            gate: VoiceGate::new(config.speech_threshold_db),
        })
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn state(&self) -> CodecState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per 20 ms frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Only Opus carries a redundant copy of the previous frame.
    pub fn supports_inband_fec(&self) -> bool {
        self.kind == CodecKind::Opus
    }

    pub fn current_bitrate_bps(&self) -> i32 {
        match self.kind {
            // G.711 is fixed-rate: 8 kHz x 8 bit.
            CodecKind::Pcmu | CodecKind::Pcma => 64_000,
            CodecKind::Opus => self.bitrate.current(),
        }
    }

    /// Releases codec resources; the stream is closing.
    pub fn close(&mut self) {
        self.opus_enc = None;
        self.opus_dec = None;
        self.state = CodecState::Uninitialized;
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            CodecState::Ready => Ok(()),
            CodecState::Uninitialized => Err(Error::ErrCodecNotReady("uninitialized")),
            CodecState::Failed => Err(Error::ErrCodecNotReady("failed")),
        }
    }

    fn check_out(&self, out: &[i16]) -> Result<()> {
        if out.len() < self.frame_size {
            return Err(Error::ErrBufferTooSmall {
                need: self.frame_size,
                got: out.len(),
            });
        }
        Ok(())
    }

    /// Decodes one packet payload into `out`, returning the sample count
    /// and the frame's voice/DTX classification. An empty payload is a
    /// DTX gap and decodes to silence.
    pub fn decode(&mut self, payload: &[u8], out: &mut [i16]) -> Result<(usize, FrameClass)> {
        self.ensure_ready()?;
        self.check_out(out)?;

        if payload.is_empty() {
            out[..self.frame_size].fill(0);
            return Ok((self.frame_size, FrameClass::Dtx));
        }

        let n = match self.kind {
            CodecKind::Pcmu => {
                let n = payload.len().min(out.len());
                g711::decode_ulaw(payload, out);
                n
            }
            CodecKind::Pcma => {
                let n = payload.len().min(out.len());
                g711::decode_alaw(payload, out);
                n
            }
            CodecKind::Opus => self.opus_decode(Some(payload), out, false)?,
        };

        let class = self.gate.classify(&out[..n]);
        Ok((n, class))
    }

    /// Synthesizes the frame preceding `next_payload` from its in-band
    /// FEC data.
    pub fn decode_fec(&mut self, next_payload: &[u8], out: &mut [i16]) -> Result<usize> {
        self.ensure_ready()?;
        self.check_out(out)?;
        if !self.supports_inband_fec() {
            return Err(Error::ErrFecUnsupported);
        }
        self.opus_decode(Some(next_payload), out, true)
    }

    /// Codec-internal concealment for a lost frame (Opus PLC). G.711 has
    /// none; the caller falls back to waveform substitution.
    pub fn conceal(&mut self, out: &mut [i16]) -> Result<usize> {
        self.ensure_ready()?;
        self.check_out(out)?;
        match self.kind {
            CodecKind::Pcmu | CodecKind::Pcma => {
                out[..self.frame_size].fill(0);
                Ok(self.frame_size)
            }
            CodecKind::Opus => self.opus_decode(None, out, false),
        }
    }

    fn opus_decode(&mut self, payload: Option<&[u8]>, out: &mut [i16], fec: bool) -> Result<usize> {
        let frame_size = self.frame_size;
        let dec = self
            .opus_dec
            .as_mut()
            .ok_or(Error::ErrCodecNotReady("uninitialized"))?;

        let res: Result<usize> = (|| {
            let packet = match payload {
                Some(bytes) => Some(OpusPacket::try_from(bytes)?),
                None => None,
            };
            let signals = MutSignals::try_from(&mut out[..frame_size])?;
            Ok(dec.decode(packet, signals, fec)?)
        })();

        if let Err(ref e) = res {
            warn!("opus decode failed, marking codec failed: {e}");
            self.state = CodecState::Failed;
        }
        res
    }

    /// One step of the loss-rate control loop: moves the adaptive
    /// bitrate a notch and, for Opus, refreshes the encoder's bitrate
    /// and expected-loss hint. Runs on every encode call and on every
    /// playout tick of the owning stream, so `current_bitrate_bps`
    /// follows the observed loss on receive-only streams too.
    pub fn update_loss_feedback(&mut self, loss_rate: f32) -> Result<i32> {
        self.ensure_ready()?;
        let bps = self.bitrate.update(loss_rate);
        if let Some(enc) = self.opus_enc.as_mut() {
            let loss_perc = (loss_rate * 100.0).clamp(0.0, 100.0) as u8;
            let res: Result<()> = (|| {
                enc.set_bitrate(Bitrate::BitsPerSecond(bps))?;
                enc.set_packet_loss_perc(loss_perc)?;
                Ok(())
            })();
            if let Err(ref e) = res {
                warn!("opus loss-feedback update failed, marking codec failed: {e}");
                self.state = CodecState::Failed;
            }
            res?;
        }
        Ok(bps)
    }

    /// Encodes one frame. Frames under the voice-activity threshold are
    /// suppressed (DTX): nothing is written and the class is `Dtx`. The
    /// bitrate controller and the encoder's expected-loss hint are fed
    /// from `loss_rate` on every call.
    pub fn encode(
        &mut self,
        pcm: &[i16],
        out: &mut [u8],
        loss_rate: f32,
    ) -> Result<(usize, FrameClass)> {
        self.ensure_ready()?;
        if pcm.len() != self.frame_size {
            return Err(Error::ErrBufferTooSmall {
                need: self.frame_size,
                got: pcm.len(),
            });
        }

        if self.gate.classify(pcm) == FrameClass::Dtx {
            return Ok((0, FrameClass::Dtx));
        }

        self.update_loss_feedback(loss_rate)?;

        let n = match self.kind {
            CodecKind::Pcmu => {
                if out.len() < pcm.len() {
                    return Err(Error::ErrBufferTooSmall {
                        need: pcm.len(),
                        got: out.len(),
                    });
                }
                g711::encode_ulaw(pcm, out);
                pcm.len()
            }
            CodecKind::Pcma => {
                if out.len() < pcm.len() {
                    return Err(Error::ErrBufferTooSmall {
                        need: pcm.len(),
                        got: out.len(),
                    });
                }
                g711::encode_alaw(pcm, out);
                pcm.len()
            }
            CodecKind::Opus => {
                let enc = self
                    .opus_enc
                    .as_mut()
                    .ok_or(Error::ErrCodecNotReady("uninitialized"))?;
                let res: Result<usize> = (|| Ok(enc.encode(pcm, out)?))();
                if let Err(ref e) = res {
                    warn!("opus encode failed, marking codec failed: {e}");
                    self.state = CodecState::Failed;
                }
                res?
            }
        };

        Ok((n, FrameClass::Voice))
    }
}
