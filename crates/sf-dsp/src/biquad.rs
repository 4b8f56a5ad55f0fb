//! Biquad filters in transposed direct form II
//!
//! TDF-II keeps quantization noise low with single-precision state, which
//! matters here since these run per voice channel per block.

use std::f32::consts::PI;

/// Filter responses used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadType {
    LowPass,
    HighPass,
    Peaking,
    LowShelf,
    HighShelf,
}

/// Which of a voice path's two shelf filters are active this update.
///
/// The "low pass" slot is a high-shelf applying the HF gain, the "high
/// pass" slot a low-shelf applying the LF gain; both at unity collapse to
/// a pass-through that must not touch filter state age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterMode {
    pub low_pass: bool,
    pub high_pass: bool,
}

impl FilterMode {
    #[inline]
    pub fn is_none(self) -> bool {
        !self.low_pass && !self.high_pass
    }
}

/// One biquad section with persistent state.
#[derive(Debug, Clone, Default)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

/// 1/Q from a shelf slope, matching the RBJ cookbook identity. The gain
/// limit keeps the square root real for steep slopes.
fn rcp_q_from_slope(gain: f32, slope: f32) -> f32 {
    ((gain + 1.0 / gain) * (1.0 / slope - 1.0) + 2.0).sqrt()
}

impl Biquad {
    pub fn new() -> Self {
        Self { b0: 1.0, ..Default::default() }
    }

    /// Reset filter state, keeping coefficients.
    #[inline]
    pub fn clear(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    /// Copy coefficients (not state) from another filter. The per-channel
    /// filters of a voice share one parameter computation.
    #[inline]
    pub fn copy_params_from(&mut self, other: &Biquad) {
        self.b0 = other.b0;
        self.b1 = other.b1;
        self.b2 = other.b2;
        self.a1 = other.a1;
        self.a2 = other.a2;
    }

    /// Set parameters from a normalized frequency (f0/rate), linear gain,
    /// and Q.
    pub fn set_params(&mut self, ftype: BiquadType, f0norm: f32, gain: f32, rcp_q: f32) {
        // Limit gain to -100dB to keep the shelf math finite.
        let gain = gain.max(0.00001);

        let w0 = 2.0 * PI * f0norm;
        let sin_w0 = w0.sin();
        let cos_w0 = w0.cos();
        let alpha = sin_w0 / 2.0 * rcp_q;

        let (b, a) = match ftype {
            BiquadType::HighShelf => {
                let sqrt_gain_alpha_2 = 2.0 * gain.sqrt() * alpha;
                let b = [
                    gain * ((gain + 1.0) + (gain - 1.0) * cos_w0 + sqrt_gain_alpha_2),
                    -2.0 * gain * ((gain - 1.0) + (gain + 1.0) * cos_w0),
                    gain * ((gain + 1.0) + (gain - 1.0) * cos_w0 - sqrt_gain_alpha_2),
                ];
                let a = [
                    (gain + 1.0) - (gain - 1.0) * cos_w0 + sqrt_gain_alpha_2,
                    2.0 * ((gain - 1.0) - (gain + 1.0) * cos_w0),
                    (gain + 1.0) - (gain - 1.0) * cos_w0 - sqrt_gain_alpha_2,
                ];
                (b, a)
            }
            BiquadType::LowShelf => {
                let sqrt_gain_alpha_2 = 2.0 * gain.sqrt() * alpha;
                let b = [
                    gain * ((gain + 1.0) - (gain - 1.0) * cos_w0 + sqrt_gain_alpha_2),
                    2.0 * gain * ((gain - 1.0) - (gain + 1.0) * cos_w0),
                    gain * ((gain + 1.0) - (gain - 1.0) * cos_w0 - sqrt_gain_alpha_2),
                ];
                let a = [
                    (gain + 1.0) + (gain - 1.0) * cos_w0 + sqrt_gain_alpha_2,
                    -2.0 * ((gain - 1.0) + (gain + 1.0) * cos_w0),
                    (gain + 1.0) + (gain - 1.0) * cos_w0 - sqrt_gain_alpha_2,
                ];
                (b, a)
            }
            BiquadType::Peaking => {
                let sqrt_gain = gain.sqrt();
                let b = [1.0 + alpha * sqrt_gain, -2.0 * cos_w0, 1.0 - alpha * sqrt_gain];
                let a = [1.0 + alpha / sqrt_gain, -2.0 * cos_w0, 1.0 - alpha / sqrt_gain];
                (b, a)
            }
            BiquadType::LowPass => {
                let b = [(1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0];
                let a = [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha];
                (b, a)
            }
            BiquadType::HighPass => {
                let b = [(1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0];
                let a = [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha];
                (b, a)
            }
        };

        self.b0 = b[0] / a[0];
        self.b1 = b[1] / a[0];
        self.b2 = b[2] / a[0];
        self.a1 = a[1] / a[0];
        self.a2 = a[2] / a[0];
    }

    /// Set shelf parameters from a slope instead of a Q.
    pub fn set_params_from_slope(&mut self, ftype: BiquadType, f0norm: f32, gain: f32, slope: f32) {
        let gain = gain.max(0.001);
        self.set_params(ftype, f0norm, gain, rcp_q_from_slope(gain, slope));
    }

    #[inline(always)]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    /// Filter `src` into `dst`.
    pub fn process(&mut self, src: &[f32], dst: &mut [f32]) {
        debug_assert!(dst.len() >= src.len());
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = self.process_sample(s);
        }
    }
}

/// Two biquads processed as one pass, for the band-pass (both shelves
/// active) case.
pub struct DualBiquad<'a> {
    pub first: &'a mut Biquad,
    pub second: &'a mut Biquad,
}

impl DualBiquad<'_> {
    pub fn process(&mut self, src: &[f32], dst: &mut [f32]) {
        debug_assert!(dst.len() >= src.len());
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = self.second.process_sample(self.first.process_sample(s));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_passthrough() {
        let mut filter = Biquad::new();
        assert!((filter.process_sample(0.5) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn test_high_shelf_dc_unity() {
        // A high shelf leaves DC alone regardless of its HF gain.
        let mut filter = Biquad::new();
        filter.set_params_from_slope(BiquadType::HighShelf, 5000.0 / 48000.0, 0.25, 1.0);

        let mut out = 0.0;
        for _ in 0..2000 {
            out = filter.process_sample(1.0);
        }
        assert!((out - 1.0).abs() < 0.01, "DC gain was {out}");
    }

    #[test]
    fn test_low_shelf_attenuates_dc() {
        let mut filter = Biquad::new();
        filter.set_params_from_slope(BiquadType::LowShelf, 250.0 / 48000.0, 0.25, 1.0);

        let mut out = 0.0;
        for _ in 0..20000 {
            out = filter.process_sample(1.0);
        }
        assert!((out - 0.25).abs() < 0.01, "DC gain was {out}");
    }

    #[test]
    fn test_clear_keeps_coeffs() {
        let mut filter = Biquad::new();
        filter.set_params(BiquadType::LowPass, 1000.0 / 48000.0, 1.0, 1.0 / 0.707);
        for _ in 0..64 {
            filter.process_sample(1.0);
        }
        let coeffs = (filter.b0, filter.a1);
        filter.clear();
        assert_eq!((filter.b0, filter.a1), coeffs);
        assert_eq!(filter.z1, 0.0);
        assert_eq!(filter.z2, 0.0);
    }
}
