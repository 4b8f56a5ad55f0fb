//! All-pass based two-band splitter
//!
//! Splits a stream at a crossover frequency into phase-matched high and low
//! bands, so they can be scaled independently and summed back without comb
//! artifacts. The voice pipeline uses this to apply per-order HF scaling
//! when mixing lower-order ambisonic content into a higher-order bus.

use std::f32::consts::TAU;

#[derive(Debug, Clone, Copy, Default)]
pub struct BandSplitter {
    coeff: f32,
    lp_z1: f32,
    lp_z2: f32,
    ap_z1: f32,
}

impl BandSplitter {
    /// Create a splitter with the crossover at `f0norm` (f0/sample_rate).
    pub fn new(f0norm: f32) -> Self {
        let w = f0norm * TAU;
        let cw = w.cos();
        let coeff = if cw > f32::EPSILON { (w.sin() - 1.0) / cw } else { cw * -0.5 };
        Self { coeff, lp_z1: 0.0, lp_z2: 0.0, ap_z1: 0.0 }
    }

    pub fn clear(&mut self) {
        self.lp_z1 = 0.0;
        self.lp_z2 = 0.0;
        self.ap_z1 = 0.0;
    }

    #[inline(always)]
    fn split_sample(&mut self, input: f32) -> (f32, f32) {
        let ap_coeff = self.coeff;
        let lp_coeff = self.coeff * 0.5 + 0.5;

        // Two cascaded one-pole low-pass stages.
        let mut d = (input - self.lp_z1) * lp_coeff;
        let mut lp_y = self.lp_z1 + d;
        self.lp_z1 = lp_y + d;

        d = (lp_y - self.lp_z2) * lp_coeff;
        lp_y = self.lp_z2 + d;
        self.lp_z2 = lp_y + d;

        // All-pass stage to phase-match the high band.
        let ap_y = input * ap_coeff + self.ap_z1;
        self.ap_z1 = input - ap_y * ap_coeff;

        (ap_y - lp_y, lp_y)
    }

    /// Split `input` into separate high and low band buffers.
    pub fn process(&mut self, input: &[f32], hp_out: &mut [f32], lp_out: &mut [f32]) {
        for ((&s, hp), lp) in input.iter().zip(hp_out.iter_mut()).zip(lp_out.iter_mut()) {
            let (hf, lf) = self.split_sample(s);
            *hp = hf;
            *lp = lf;
        }
    }

    /// Scale the bands in place: `out = hf*hf_scale + lf*lf_scale`.
    pub fn process_scale(&mut self, samples: &mut [f32], hf_scale: f32, lf_scale: f32) {
        for s in samples.iter_mut() {
            let (hf, lf) = self.split_sample(*s);
            *s = hf * hf_scale + lf * lf_scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_scales_pass_signal() {
        let mut splitter = BandSplitter::new(400.0 / 48000.0);
        let mut samples: Vec<f32> = (0..256).map(|i| (i as f32 * 0.1).sin()).collect();
        let reference = samples.clone();
        splitter.process_scale(&mut samples, 1.0, 1.0);
        // All-pass recombination: same magnitude content, allow phase slop
        // at the block edge.
        let err: f32 = samples
            .iter()
            .zip(reference.iter())
            .skip(64)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max);
        assert!(err < 0.2, "recombined signal deviates by {err}");
    }

    #[test]
    fn test_bands_sum_to_allpass() {
        let mut splitter = BandSplitter::new(1000.0 / 48000.0);
        let input: Vec<f32> = (0..128).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
        let mut hp = vec![0.0; 128];
        let mut lp = vec![0.0; 128];
        splitter.process(&input, &mut hp, &mut lp);
        // The split is complementary: hf + lf reconstructs the all-passed
        // impulse with unit total energy (roughly).
        let sum: f32 = hp.iter().zip(lp.iter()).map(|(h, l)| h + l).map(|x| x * x).sum();
        assert!((sum - 1.0).abs() < 0.05, "energy {sum}");
    }
}
