//! Near-field compensation filters
//!
//! Ambisonic reproduction on a real speaker array bakes in the finite
//! speaker distance as a bass boost that grows with order. These filters
//! cancel the boost for the output distance (w1) while re-applying the
//! curvature of the actual source distance (w0). A w0 of 0 models a plane
//! wave (infinitely far source).
//!
//! Each order adds a pole/zero pair derived from the Bessel polynomial of
//! that order: order 1 is one first-order section, order 2 one second-order
//! section, order 3 a first- plus a second-order section, order 4 two
//! second-order sections.

/// Bessel polynomial coefficients per order, scaled for the bilinear
/// sections below.
const B: [[f32; 4]; 5] = [
    [0.0, 0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0, 0.0],
    [3.0, 3.0, 0.0, 0.0],
    [3.6778, 6.4595, 2.3222, 0.0],
    [4.2076, 11.4877, 5.7924, 9.1401],
];

#[derive(Debug, Clone, Copy, Default)]
struct NfcFirst {
    base_gain: f32,
    gain: f32,
    b1: f32,
    a1: f32,
    z1: f32,
}

impl NfcFirst {
    fn init(&mut self, w1: f32, b0: f32) {
        self.base_gain = 1.0;
        self.gain = 1.0;
        self.b1 = 0.0;
        self.z1 = 0.0;

        // Bass-cut for the output distance.
        let r = 0.5 * w1;
        let b_00 = b0 * r;
        let g_0 = 1.0 + b_00;
        self.base_gain /= g_0;
        self.gain /= g_0;
        self.a1 = 2.0 * b_00 / g_0;
    }

    fn adjust(&mut self, w0: f32, b0: f32) {
        // Bass-boost for the source distance.
        let r = 0.5 * w0;
        let b_00 = b0 * r;
        let g_0 = 1.0 + b_00;
        self.gain = self.base_gain * g_0;
        self.b1 = 2.0 * b_00 / g_0;
    }

    #[inline(always)]
    fn process_sample(&mut self, input: f32) -> f32 {
        let y = input * self.gain - self.a1 * self.z1;
        let out = y + self.b1 * self.z1;
        self.z1 += y;
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NfcSecond {
    base_gain: f32,
    gain: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl NfcSecond {
    fn init(&mut self, w1: f32, b0: f32, b1: f32) {
        self.base_gain = 1.0;
        self.gain = 1.0;
        self.b1 = 0.0;
        self.b2 = 0.0;
        self.z1 = 0.0;
        self.z2 = 0.0;

        let r = 0.5 * w1;
        let b_10 = b0 * r;
        let b_11 = b1 * r * r;
        let g_1 = 1.0 + b_10 + b_11;
        self.base_gain /= g_1;
        self.gain /= g_1;
        self.a1 = (2.0 * b_10 + 4.0 * b_11) / g_1;
        self.a2 = 4.0 * b_11 / g_1;
    }

    fn adjust(&mut self, w0: f32, b0: f32, b1: f32) {
        let r = 0.5 * w0;
        let b_10 = b0 * r;
        let b_11 = b1 * r * r;
        let g_1 = 1.0 + b_10 + b_11;
        self.gain = self.base_gain * g_1;
        self.b1 = (2.0 * b_10 + 4.0 * b_11) / g_1;
        self.b2 = 4.0 * b_11 / g_1;
    }

    #[inline(always)]
    fn process_sample(&mut self, input: f32) -> f32 {
        let y = input * self.gain - self.a1 * self.z1 - self.a2 * self.z2;
        let out = y + self.b1 * self.z1 + self.b2 * self.z2;
        self.z2 += self.z1;
        self.z1 += y;
        out
    }
}

/// Complete per-channel NFC state covering orders 1 through 4.
///
/// The device initializes every voice channel's filter against its output
/// distance; per-update `adjust` calls then track the source distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct NfcFilter {
    first: NfcFirst,
    second: NfcSecond,
    third_f: NfcFirst,
    third_s: NfcSecond,
    fourth_a: NfcSecond,
    fourth_b: NfcSecond,
}

impl NfcFilter {
    /// Build the filter for an output control frequency
    /// `w1 = speed_of_sound / (speaker_dist * sample_rate)`.
    pub fn new(w1: f32) -> Self {
        let mut nfc = NfcFilter::default();
        nfc.init(w1);
        nfc
    }

    pub fn init(&mut self, w1: f32) {
        self.first.init(w1, B[1][0]);
        self.second.init(w1, B[2][0], B[2][1]);
        self.third_f.init(w1, B[3][2]);
        self.third_s.init(w1, B[3][0], B[3][1]);
        self.fourth_a.init(w1, B[4][0], B[4][1]);
        self.fourth_b.init(w1, B[4][2], B[4][3]);
        self.adjust(0.0);
    }

    /// Retarget the source control frequency. `w0 = 0` is a plane wave.
    pub fn adjust(&mut self, w0: f32) {
        self.first.adjust(w0, B[1][0]);
        self.second.adjust(w0, B[2][0], B[2][1]);
        self.third_f.adjust(w0, B[3][2]);
        self.third_s.adjust(w0, B[3][0], B[3][1]);
        self.fourth_a.adjust(w0, B[4][0], B[4][1]);
        self.fourth_b.adjust(w0, B[4][2], B[4][3]);
    }

    /// First-order compensation.
    pub fn process1(&mut self, src: &[f32], dst: &mut [f32]) {
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = self.first.process_sample(s);
        }
    }

    /// Second-order compensation.
    pub fn process2(&mut self, src: &[f32], dst: &mut [f32]) {
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = self.second.process_sample(s);
        }
    }

    /// Third-order compensation.
    pub fn process3(&mut self, src: &[f32], dst: &mut [f32]) {
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = self.third_s.process_sample(self.third_f.process_sample(s));
        }
    }

    /// Fourth-order compensation.
    pub fn process4(&mut self, src: &[f32], dst: &mut [f32]) {
        for (d, &s) in dst.iter_mut().zip(src.iter()) {
            *d = self.fourth_b.process_sample(self.fourth_a.process_sample(s));
        }
    }

    /// Run the compensator for the given ambisonic order.
    pub fn process_order(&mut self, order: usize, src: &[f32], dst: &mut [f32]) {
        match order {
            1 => self.process1(src, dst),
            2 => self.process2(src, dst),
            3 => self.process3(src, dst),
            4 => self.process4(src, dst),
            _ => dst[..src.len()].copy_from_slice(src),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_wave_attenuates_bass() {
        // w0=0 against a finite speaker distance cuts low frequencies.
        let mut nfc = NfcFilter::new(0.02);
        let mut out = [0.0f32; 1];
        let mut last = 0.0;
        for _ in 0..20000 {
            nfc.process1(&[1.0], &mut out);
            last = out[0];
        }
        assert!(last < 1.0, "DC should be reduced, got {last}");
    }

    #[test]
    fn test_matched_distance_is_transparent() {
        // w0 == w1 means source and speaker distance agree; the boost and
        // cut cancel.
        let mut nfc = NfcFilter::new(0.02);
        nfc.adjust(0.02);
        let mut out = [0.0f32; 1];
        let mut last = 0.0;
        for _ in 0..20000 {
            nfc.process2(&[1.0], &mut out);
            last = out[0];
        }
        assert!((last - 1.0).abs() < 0.01, "expected unity DC, got {last}");
    }
}
