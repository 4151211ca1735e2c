
use log::trace;
use rand::Rng;

use crate::codec::AudioCodec;
use crate::error::{Error, Result};
use crate::FRAMES_PER_SECOND;

/// Fade-out span applied at the tail of synthesized frames.
pub const MAX_FADE_LENGTH_MS: u32 = 20;
/// Leading-window length for the pattern cross-correlation search.
pub const ANALYSIS_WINDOW_SIZE: usize = 160;
/// How much decoded history the concealer keeps.
pub const HISTORY_WINDOW_MS: u32 = 60;

/// Comfort noise never exceeds this fraction of the history peak.
const COMFORT_NOISE_CEILING: f32 = 0.05;

/// How a lost frame is synthesized when neither FEC path can recover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcealmentMode {
    /// Zero-filled frame.
    Silence,
    /// Last good frame, faded out.
    Repeat,
    /// Waveform substitution from the history window plus comfort noise.
    Pattern,
    /// Pattern substitution with envelope-shaped comfort noise; falls
    /// back to the codec's internal PLC when there is no history yet.
    #[default]
    Advanced,
}

/// Per-stream concealment state: a rolling window of recently played
/// samples and the last fully decoded frame.
pub struct Concealer {
    mode: ConcealmentMode,
    frame_size: usize,
    fade_len: usize,
    history_cap: usize,
    history: Vec<i16>,
    last_frame: Vec<i16>,
}

impl Concealer {
    pub fn new(mode: ConcealmentMode, sample_rate: u32) -> Self {
        let frame_size = (sample_rate / FRAMES_PER_SECOND) as usize;
        Concealer {
            mode,
            frame_size,
            fade_len: (sample_rate * MAX_FADE_LENGTH_MS / 1000) as usize,
            history_cap: (sample_rate * HISTORY_WINDOW_MS / 1000) as usize,
            history: Vec::new(),
            last_frame: Vec::new(),
        }
    }

    pub fn mode(&self) -> ConcealmentMode {
        self.mode
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Feeds one good decoded frame into the history window.
    pub fn push_frame(&mut self, pcm: &[i16]) {
        self.last_frame.clear();
        self.last_frame.extend_from_slice(pcm);
        self.append_history(pcm);
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_frame.clear();
    }

    fn append_history(&mut self, pcm: &[i16]) {
        self.history.extend_from_slice(pcm);
        if self.history.len() > self.history_cap {
            let excess = self.history.len() - self.history_cap;
            self.history.drain(..excess);
        }
    }

    /// Synthesizes one concealment frame into `out`. The synthesized
    /// frame is appended to the history so that consecutive losses stay
    /// continuous. Returns the number of samples written (one frame).
    pub fn conceal(&mut self, out: &mut [i16], codec: Option<&mut AudioCodec>) -> Result<usize> {
        let n = self.frame_size;
        if out.len() < n {
            return Err(Error::ErrBufferTooSmall {
                need: n,
                got: out.len(),
            });
        }
        let out = &mut out[..n];

        match self.mode {
            ConcealmentMode::Silence => out.fill(0),
            ConcealmentMode::Repeat => self.repeat_into(out),
            ConcealmentMode::Pattern => self.pattern_into(out, false),
            ConcealmentMode::Advanced => {
                if self.history.len() >= 2 * ANALYSIS_WINDOW_SIZE {
                    self.pattern_into(out, true);
                } else if let Some(codec) = codec {
                    trace!("no PLC history, deferring to codec-internal concealment");
                    if codec.conceal(out).is_err() {
                        out.fill(0);
                    }
                } else {
                    out.fill(0);
                }
            }
        }

        self.append_history(out);
        Ok(n)
    }

    fn repeat_into(&self, out: &mut [i16]) {
        let n = out.len();
        for (i, dst) in out.iter_mut().enumerate() {
            *dst = self.last_frame.get(i).copied().unwrap_or(0);
        }
        let fade_span = self.fade_len.min(n);
        for i in (n - fade_span)..n {
            let fade = (n - i) as f32 / fade_span as f32;
            out[i] = (out[i] as f32 * fade) as i16;
        }
    }

    /// Waveform substitution: cross-correlates the most recent
    /// `ANALYSIS_WINDOW_SIZE` samples against the rest of the history,
    /// then continues the waveform periodically from the best match,
    /// fading the tail and mixing comfort noise scaled by
    /// `(1 - local_energy) * fade`.
    fn pattern_into(&self, out: &mut [i16], shaped_noise: bool) {
        let hist = &self.history;
        let len = hist.len();
        if len < 2 * ANALYSIS_WINDOW_SIZE {
            self.repeat_into(out);
            return;
        }

        let lead = &hist[len - ANALYSIS_WINDOW_SIZE..];
        let mut best_offset = 0usize;
        let mut best_score = i64::MIN;
        for offset in 0..(len - ANALYSIS_WINDOW_SIZE) {
            let mut score = 0i64;
            for i in 0..ANALYSIS_WINDOW_SIZE {
                score += lead[i] as i64 * hist[offset + i] as i64;
            }
            if score > best_score {
                best_score = score;
                best_offset = offset;
            }
        }
        // Lag between the matched segment and the live edge; continuing
        // `lag` samples behind the edge repeats the dominant period.
        let lag = len - ANALYSIS_WINDOW_SIZE - best_offset;
        debug_assert!(lag >= 1);

        let peak = hist.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0) as f32;
        let lead_rms = {
            let sum_sq: f64 = lead.iter().map(|&s| (s as f64) * (s as f64)).sum();
            (sum_sq / lead.len() as f64).sqrt()
        };
        let local_energy = (lead_rms / i16::MAX as f64).clamp(0.0, 1.0) as f32;

        let n = out.len();
        let fade_span = self.fade_len.min(n);
        let mut rng = rand::thread_rng();
        for i in 0..n {
            let src = hist[len - lag + (i % lag)] as f32;
            let fade = if i >= n - fade_span {
                (n - i) as f32 / fade_span as f32
            } else {
                1.0
            };
            let mut noise_amp = (1.0 - local_energy) * fade * COMFORT_NOISE_CEILING * peak;
            if shaped_noise {
                // Shape the noise by the local envelope so it hides under
                // the signal instead of hissing across the whole frame.
                let env = (hist[len - lag + (i % lag)] as f32).abs() / peak.max(1.0);
                noise_amp *= env.clamp(0.05, 1.0);
            }
            let noise = if noise_amp > 0.0 {
                rng.gen_range(-1.0f32..1.0) * noise_amp
            } else {
                0.0
            };
            let sample = (src * fade + noise).clamp(-peak, peak);
            out[i] = sample as i16;
        }
    }
}
