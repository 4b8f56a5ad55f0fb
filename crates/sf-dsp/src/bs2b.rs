//! Bauer stereophonic-to-binaural crossfeed
//!
//! Feeds a low-passed, attenuated copy of each channel into the other,
//! approximating the interaural level and time differences a listener
//! would get from speakers. Applied to the decoded stereo output for
//! headphone listening.

use std::f32::consts::TAU;

/// Crossfeed presets: cut frequency and feed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bs2bPreset {
    /// 700 Hz, 4.5 dB: the default, subtle image.
    Default,
    /// 700 Hz, 6.0 dB: Chu Moy's crossfeeder.
    Cmoy,
    /// 650 Hz, 9.5 dB: Jan Meier's crossfeeder.
    Jmeier,
}

impl Bs2bPreset {
    fn params(self) -> (f32, f32) {
        match self {
            Bs2bPreset::Default => (700.0, 4.5),
            Bs2bPreset::Cmoy => (700.0, 6.0),
            Bs2bPreset::Jmeier => (650.0, 9.5),
        }
    }
}

/// Crossfeed processor state.
pub struct Bs2b {
    // Feed-path one-pole low-pass.
    a0_lo: f32,
    b1_lo: f32,
    // Direct-path high shelf keeping overall level flat.
    a0_hi: f32,
    a1_hi: f32,
    b1_hi: f32,
    lo: [f32; 2],
    hi: [f32; 2],
    asis: [f32; 2],
    /// Block staging for the direct stereo signal the device splits out
    /// before decoding (see the post-process driver).
    pub storage: [Vec<f32>; 2],
}

impl Bs2b {
    pub fn new(preset: Bs2bPreset, sample_rate: u32, line_size: usize) -> Self {
        let (fcut, feed_db) = preset.params();
        let mut bs2b = Self {
            a0_lo: 0.0,
            b1_lo: 0.0,
            a0_hi: 0.0,
            a1_hi: 0.0,
            b1_hi: 0.0,
            lo: [0.0; 2],
            hi: [0.0; 2],
            asis: [0.0; 2],
            storage: [vec![0.0; line_size], vec![0.0; line_size]],
        };
        bs2b.set_params(fcut, feed_db, sample_rate);
        bs2b
    }

    fn set_params(&mut self, fcut: f32, feed_db: f32, sample_rate: u32) {
        // Feed level as linear gains for the crossed and direct paths.
        let g = 10.0f32.powf(feed_db / 20.0);
        let gb_lo = 1.0 / g;
        let gb_hi = 1.0 - 1.0 / g;

        let x = (-TAU * fcut / sample_rate as f32).exp();
        self.b1_lo = x;
        self.a0_lo = gb_lo * (1.0 - x);

        self.b1_hi = x;
        self.a0_hi = gb_hi;
        self.a1_hi = -x * gb_hi;

        self.lo = [0.0; 2];
        self.hi = [0.0; 2];
        self.asis = [0.0; 2];
    }

    pub fn clear(&mut self) {
        self.lo = [0.0; 2];
        self.hi = [0.0; 2];
        self.asis = [0.0; 2];
    }

    /// Cross-feed the stereo pair in place.
    pub fn cross_feed(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let in_l = *l;
            let in_r = *r;

            // Low-pass feed of each side.
            self.lo[0] = self.lo[0] * self.b1_lo + in_l * self.a0_lo;
            self.lo[1] = self.lo[1] * self.b1_lo + in_r * self.a0_lo;

            // High-boost of the direct signal compensates the energy the
            // feed adds below the cut frequency.
            self.hi[0] =
                self.hi[0] * self.b1_hi + in_l * self.a0_hi + self.asis[0] * self.a1_hi;
            self.hi[1] =
                self.hi[1] * self.b1_hi + in_r * self.a0_hi + self.asis[1] * self.a1_hi;
            self.asis = [in_l, in_r];

            *l = self.hi[0] + self.lo[0] + self.lo[1];
            *r = self.hi[1] + self.lo[1] + self.lo[0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfeed_bleeds_left_into_right() {
        let mut bs2b = Bs2b::new(Bs2bPreset::Default, 48000, 1024);
        let mut left = vec![1.0f32; 256];
        let mut right = vec![0.0f32; 256];
        bs2b.cross_feed(&mut left, &mut right);
        // The right channel picks up the low-passed left feed.
        assert!(right[255] > 0.1, "no crossfeed bleed: {}", right[255]);
        assert!(right[255] < left[255], "feed should stay below direct");
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut bs2b = Bs2b::new(Bs2bPreset::Jmeier, 44100, 1024);
        let mut left = vec![0.0f32; 64];
        let mut right = vec![0.0f32; 64];
        bs2b.cross_feed(&mut left, &mut right);
        assert!(left.iter().chain(right.iter()).all(|&x| x == 0.0));
    }
}
