/// Bounds for the adaptive encoder bitrate, in bits per second.
pub const MIN_BITRATE_BPS: i32 = 6_000;
pub const MAX_BITRATE_BPS: i32 = 64_000;
pub const BITRATE_STEP_BPS: i32 = 1_000;

/// Loss rate above which the encoder backs off.
pub const LOSS_BACKOFF_THRESHOLD: f32 = 0.10;
/// Loss rate below which the encoder probes upward again.
pub const LOSS_RECOVER_THRESHOLD: f32 = 0.01;

/// Steps the encoder bitrate against the observed loss rate: one step
/// down above 10% loss, one step up below 1%, clamped to the configured
/// band. Applied once per encode call.
#[derive(Debug, Clone)]
pub struct BitrateController {
    current: i32,
    min: i32,
    max: i32,
    step: i32,
}

impl BitrateController {
    pub fn new(min: i32, max: i32, step: i32) -> Self {
        BitrateController {
            current: max,
            min,
            max,
            step,
        }
    }

    pub fn update(&mut self, loss_rate: f32) -> i32 {
        if loss_rate > LOSS_BACKOFF_THRESHOLD {
            self.current = (self.current - self.step).max(self.min);
        } else if loss_rate < LOSS_RECOVER_THRESHOLD {
            self.current = (self.current + self.step).min(self.max);
        }
        self.current
    }

    pub fn current(&self) -> i32 {
        self.current
    }
}

impl Default for BitrateController {
    fn default() -> Self {
        BitrateController::new(MIN_BITRATE_BPS, MAX_BITRATE_BPS, BITRATE_STEP_BPS)
    }
}
