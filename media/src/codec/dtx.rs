use crate::{rms_dbfs, FrameClass};

/// Default RMS threshold separating speech from silence, in dBFS.
pub const DEFAULT_SPEECH_THRESHOLD_DB: f32 = -30.0;

/// Voice-activity gate: frames whose RMS energy stays at or below the
/// speech threshold are classified DTX and skipped by the encoder.
#[derive(Debug, Clone, Copy)]
pub struct VoiceGate {
    threshold_db: f32,
}

impl VoiceGate {
    pub fn new(threshold_db: f32) -> Self {
        VoiceGate { threshold_db }
    }

    pub fn classify(&self, pcm: &[i16]) -> FrameClass {
        if rms_dbfs(pcm) > self.threshold_db {
            FrameClass::Voice
        } else {
            FrameClass::Dtx
        }
    }
}

impl Default for VoiceGate {
    fn default() -> Self {
        VoiceGate::new(DEFAULT_SPEECH_THRESHOLD_DB)
    }
}
