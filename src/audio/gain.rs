//! Software volume gain with a tanh soft limiter
//!
//! Applied to each newly captured chunk before it joins the recording history.

/// Samples whose scaled magnitude exceeds this are soft-limited instead of clamped.
pub const SOFT_LIMIT_THRESHOLD: f64 = 16384.0;

const FULL_SCALE: f64 = 32767.0;

/// Multiplicative volume gain, always within [`Gain::MIN`, `Gain::MAX`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain(f64);

impl Gain {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 10.0;
    pub const DEFAULT: f64 = 2.0;
    pub const UNITY: Gain = Gain(1.0);

    /// Clamp `factor` into range. Non-finite values fall back to the default.
    pub fn new(factor: f64) -> Self {
        if !factor.is_finite() {
            return Gain(Self::DEFAULT);
        }
        Gain(factor.clamp(Self::MIN, Self::MAX))
    }

    pub fn factor(self) -> f64 {
        self.0
    }

    pub fn is_unity(self) -> bool {
        self.0 == 1.0
    }
}

impl Default for Gain {
    fn default() -> Self {
        Gain(Self::DEFAULT)
    }
}

/// Apply `gain` to `samples` in place. Unity gain leaves the buffer untouched.
pub fn apply_gain(samples: &mut [i16], gain: Gain) {
    if gain.is_unity() {
        return;
    }
    let factor = gain.factor();
    for sample in samples.iter_mut() {
        *sample = gain_sample(*sample, factor);
    }
}

fn gain_sample(sample: i16, factor: f64) -> i16 {
    let scaled = sample as f64 * factor;

    let limited = if scaled.abs() > SOFT_LIMIT_THRESHOLD {
        let normalized = scaled.abs() / FULL_SCALE;
        (normalized * 2.0).tanh() * FULL_SCALE * scaled.signum()
    } else {
        scaled.clamp(i16::MIN as f64, i16::MAX as f64)
    };

    // Halves round toward +inf
    (limited + 0.5).floor() as i16
}
