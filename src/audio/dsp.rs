//! Gain, pan and saturation helpers

use std::f32::consts::FRAC_PI_2;

/// Lowest accepted gain in dB
pub const MIN_GAIN_DB: f32 = -60.0;

/// Highest accepted gain in dB
pub const MAX_GAIN_DB: f32 = 12.0;

/// Clamp a gain to [-60, 12] dB; NaN becomes 0 dB
#[must_use]
pub fn clamp_gain_db(db: f32) -> f32 {
    if db.is_nan() {
        return 0.0;
    }
    db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
}

/// Clamp a pan position to [-1, 1]; NaN becomes centre
#[must_use]
pub fn clamp_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        return 0.0;
    }
    pan.clamp(-1.0, 1.0)
}

/// Convert decibels to a linear factor
#[must_use]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert a linear factor to decibels; silence maps to `MIN_GAIN_DB`
#[must_use]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        return MIN_GAIN_DB;
    }
    (20.0 * linear.log10()).max(MIN_GAIN_DB)
}

/// Constant-power pan law, returns `(left, right)` factors
///
/// -1 is hard left, 0 centre (both at -3 dB), 1 hard right.
#[must_use]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let theta = (clamp_pan(pan) + 1.0) * 0.5 * FRAC_PI_2;
    (theta.cos(), theta.sin())
}

/// Smooth saturator
///
/// Linear below `knee`, then bends towards ±1 with a tanh curve so the
/// output never exceeds unity.
#[must_use]
pub fn soft_clip(x: f32, knee: f32) -> f32 {
    let knee = knee.clamp(0.0, 0.99);
    let mag = x.abs();
    if mag <= knee {
        return x;
    }
    let headroom = 1.0 - knee;
    let bent = knee + headroom * ((mag - knee) / headroom).tanh();
    bent.copysign(x)
}

/// Absolute peak of a block
#[must_use]
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}
