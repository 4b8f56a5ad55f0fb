//! UHJ stereo-compatible ambisonic encoding and decoding
//!
//! UHJ folds the horizontal B-Format channels into a stereo-compatible
//! pair using a wideband +90° phase shift. The encoder produces the
//! 2-channel stream for stereo outputs; the decoders recover W/X/Y (and Z
//! for 4-channel UHJ) from UHJ-encoded voice buffers, and synthesize a
//! B-Format scene from plain stereo for the SuperStereo mode.
//!
//! The phase shift runs either as a pair of recursive all-pass cascades
//! (zero padding, cheap) or as a windowed FIR Hilbert with look-ahead (the
//! voice supplies `input_padding` extra decoded samples so the FIR adds no
//! latency).

use once_cell::sync::Lazy;
use sf_core::UhjQuality;

/// Width limit for SuperStereo; past this the side image folds back.
pub const SUPER_STEREO_WIDTH_MAX: f32 = 0.7;

// Second-order all-pass sections implementing a 90-degree phase-difference
// network (two four-section cascades). The direct cascade plus one sample
// of delay tracks the shifted cascade's phase to within a fraction of a
// degree over the audio band.
const FILTER_DIRECT: [f32; 4] = [0.4021921162426, 0.8561710882420, 0.9722909545651, 0.9952884791278];
const FILTER_SHIFT: [f32; 4] = [0.6923877778065, 0.9360654322959, 0.9882295226860, 0.9987488452737];

#[derive(Debug, Clone, Copy, Default)]
struct AllPass2 {
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl AllPass2 {
    fn new(a: f32) -> Self {
        Self { a2: a * a, ..Default::default() }
    }

    #[inline(always)]
    fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.a2 * (x + self.y2) - self.x2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// In-phase reference path: all-pass cascade plus one sample of delay.
#[derive(Debug, Clone, Default)]
struct DirectChain {
    sections: [AllPass2; 4],
    z1: f32,
}

impl DirectChain {
    fn new() -> Self {
        Self {
            sections: FILTER_DIRECT.map(AllPass2::new),
            z1: 0.0,
        }
    }

    #[inline(always)]
    fn process_sample(&mut self, x: f32) -> f32 {
        let mut v = x;
        for ap in &mut self.sections {
            v = ap.process_sample(v);
        }
        let out = self.z1;
        self.z1 = v;
        out
    }
}

/// +90 degree path.
#[derive(Debug, Clone, Default)]
struct ShiftChain {
    sections: [AllPass2; 4],
}

impl ShiftChain {
    fn new() -> Self {
        Self { sections: FILTER_SHIFT.map(AllPass2::new) }
    }

    #[inline(always)]
    fn process_sample(&mut self, x: f32) -> f32 {
        let mut v = x;
        for ap in &mut self.sections {
            v = ap.process_sample(v);
        }
        v
    }
}

// ─── FIR Hilbert, for the high-quality decode paths ─────────────────────

fn build_hilbert(len: usize) -> Vec<f32> {
    // Type-III FIR Hilbert: odd taps 2/(pi*k), Blackman windowed.
    let half = len / 2;
    let mut taps = vec![0.0f32; len + 1];
    for (i, t) in taps.iter_mut().enumerate() {
        let k = i as isize - half as isize;
        if k % 2 != 0 {
            let w = {
                let x = i as f64 / len as f64;
                0.42 - 0.5 * (std::f64::consts::TAU * x).cos()
                    + 0.08 * (2.0 * std::f64::consts::TAU * x).cos()
            };
            *t = (2.0 / (std::f64::consts::PI * k as f64) * w) as f32;
        }
    }
    taps
}

static HILBERT_256: Lazy<Vec<f32>> = Lazy::new(|| build_hilbert(256));
static HILBERT_512: Lazy<Vec<f32>> = Lazy::new(|| build_hilbert(512));

/// FIR +90 path with look-ahead; history covers the taps behind the
/// current sample, the caller's input padding covers the taps ahead.
#[derive(Debug, Clone)]
struct FirShift {
    taps: &'static [f32],
    half: usize,
    hist: Vec<f32>,
    work: Vec<f32>,
}

impl FirShift {
    fn new(taps: &'static [f32]) -> Self {
        let half = (taps.len() - 1) / 2;
        Self { taps, half, hist: vec![0.0; half], work: Vec::new() }
    }

    /// Process `todo` output samples from `input`, which must hold
    /// `todo + half` valid samples.
    fn process(&mut self, input: &[f32], output: &mut [f32], todo: usize) {
        let half = self.half;
        let last = self.taps.len() - 1;
        self.work.clear();
        self.work.extend_from_slice(&self.hist);
        self.work.extend_from_slice(&input[..todo + half]);

        for (i, out) in output[..todo].iter_mut().enumerate() {
            // Convolution: x[i - k] for tap index k sits at
            // work[half + i - k] = work[i + last - j].
            let mut acc = 0.0f32;
            for (j, &t) in self.taps.iter().enumerate() {
                if t != 0.0 {
                    acc += t * self.work[i + last - j];
                }
            }
            *out = acc;
        }

        let keep = &self.work[todo..todo + half];
        self.hist.copy_from_slice(keep);
    }
}

/// Either phase-network flavor, per configured quality.
#[derive(Debug, Clone)]
enum Shifter {
    Iir(ShiftChain),
    Fir(FirShift),
}

impl Shifter {
    fn new(quality: UhjQuality) -> Self {
        match quality {
            UhjQuality::Iir => Shifter::Iir(ShiftChain::new()),
            UhjQuality::Fir256 => Shifter::Fir(FirShift::new(&HILBERT_256)),
            UhjQuality::Fir512 => Shifter::Fir(FirShift::new(&HILBERT_512)),
        }
    }
}

/// Decoded samples of look-ahead a voice must supply per quality.
pub fn input_padding(quality: UhjQuality) -> usize {
    match quality {
        UhjQuality::Iir => 0,
        UhjQuality::Fir256 => 128,
        UhjQuality::Fir512 => 256,
    }
}

// ─── Output encoder ─────────────────────────────────────────────────────

/// Encodes the first-order W/X/Y dry mix to stereo-compatible UHJ.
///
/// Runs on the device post-process path, so it stays on the cheap
/// recursive network.
pub struct UhjEncoder {
    mid: DirectChain,
    side_y: DirectChain,
    side_j: ShiftChain,
}

impl Default for UhjEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl UhjEncoder {
    pub fn new() -> Self {
        Self {
            mid: DirectChain::new(),
            side_y: DirectChain::new(),
            side_j: ShiftChain::new(),
        }
    }

    /// Encode `todo` samples of W/X/Y into the left/right outputs.
    pub fn encode(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        w: &[f32],
        x: &[f32],
        y: &[f32],
        todo: usize,
    ) {
        for i in 0..todo {
            let s = self.mid.process_sample(0.9396926 * w[i] + 0.1855740 * x[i]);
            let d = self.side_j.process_sample(-0.3420201 * w[i] + 0.5098604 * x[i])
                + self.side_y.process_sample(0.6554516 * y[i]);
            left[i] = (s + d) * 0.5;
            right[i] = (s - d) * 0.5;
        }
    }
}

// ─── Voice decoders ─────────────────────────────────────────────────────

/// Decodes 2-, 3-, or 4-channel UHJ voice data to B-Format in place.
///
/// Channel 0/1 hold Left/Right on input and W/X on output; channel 2 is
/// synthesized (UHJ2) or carries T in (UHJ3/4); channel 3 carries Q for
/// 4-channel UHJ and becomes Z.
pub struct UhjAmbiDecoder {
    quality: UhjQuality,
    direct_s: DirectChain,
    direct_d: DirectChain,
    direct_t: DirectChain,
    shift_dt: Shifter,
    shift_s: Shifter,
}

impl UhjAmbiDecoder {
    pub fn new(quality: UhjQuality) -> Self {
        Self {
            quality,
            direct_s: DirectChain::new(),
            direct_d: DirectChain::new(),
            direct_t: DirectChain::new(),
            shift_dt: Shifter::new(quality),
            shift_s: Shifter::new(quality),
        }
    }

    pub fn input_padding(&self) -> usize {
        input_padding(self.quality)
    }

    /// Decode `todo` samples; `samples` must carry `todo + padding` valid
    /// input samples per channel.
    pub fn decode(&mut self, samples: &mut [&mut [f32]], todo: usize) {
        let nchans = samples.len();
        match (&mut self.shift_dt, &mut self.shift_s) {
            (Shifter::Iir(shift_dt), Shifter::Iir(shift_s)) => {
                for i in 0..todo {
                    let l = samples[0][i];
                    let r = samples[1][i];
                    let t = if nchans > 2 { samples[2][i] } else { 0.0 };
                    let q = if nchans > 3 { samples[3][i] } else { 0.0 };

                    let s = self.direct_s.process_sample(l + r);
                    let d = self.direct_d.process_sample(l - r);
                    let td = self.direct_t.process_sample(t);
                    let jdt = shift_dt.process_sample(0.828331 * (l - r) + 0.767820 * t);
                    let js = shift_s.process_sample(0.186633 * (l + r));

                    samples[0][i] = 0.981532 * s + 0.197484 * jdt;
                    samples[1][i] = 0.418496 * s - jdt;
                    if nchans > 2 {
                        samples[2][i] = 0.795968 * d - 0.676392 * td + js;
                    }
                    if nchans > 3 {
                        samples[3][i] = 1.023332 * q;
                    }
                }
            }
            (Shifter::Fir(shift_dt), Shifter::Fir(shift_s)) => {
                let pad = input_padding(self.quality);
                let avail = todo + pad;

                // Phase-shifted terms from the padded input.
                let mut jdt = vec![0.0f32; todo];
                let mut js = vec![0.0f32; todo];
                {
                    let dt_in: Vec<f32> = (0..avail)
                        .map(|i| {
                            let t = if nchans > 2 { samples[2][i] } else { 0.0 };
                            0.828331 * (samples[0][i] - samples[1][i]) + 0.767820 * t
                        })
                        .collect();
                    shift_dt.process(&dt_in, &mut jdt, todo);
                    let s_in: Vec<f32> =
                        (0..avail).map(|i| 0.186633 * (samples[0][i] + samples[1][i])).collect();
                    shift_s.process(&s_in, &mut js, todo);
                }

                for i in 0..todo {
                    let l = samples[0][i];
                    let r = samples[1][i];
                    let t = if nchans > 2 { samples[2][i] } else { 0.0 };
                    let q = if nchans > 3 { samples[3][i] } else { 0.0 };

                    samples[0][i] = 0.981532 * (l + r) + 0.197484 * jdt[i];
                    samples[1][i] = 0.418496 * (l + r) - jdt[i];
                    if nchans > 2 {
                        samples[2][i] = 0.795968 * (l - r) - 0.676392 * t + js[i];
                    }
                    if nchans > 3 {
                        samples[3][i] = 1.023332 * q;
                    }
                }
            }
            _ => unreachable!("mismatched shifter qualities"),
        }
    }
}

/// Synthesizes a W/X/Y scene from plain stereo with a width control.
pub struct UhjStereoDecoder {
    quality: UhjQuality,
    /// Side-image width, clamped to [`SUPER_STEREO_WIDTH_MAX`].
    pub width_control: f32,
    direct_s: DirectChain,
    direct_d: DirectChain,
    shift_d: Shifter,
    shift_s: Shifter,
}

impl UhjStereoDecoder {
    pub fn new(quality: UhjQuality) -> Self {
        Self {
            quality,
            width_control: 0.593,
            direct_s: DirectChain::new(),
            direct_d: DirectChain::new(),
            shift_d: Shifter::new(quality),
            shift_s: Shifter::new(quality),
        }
    }

    pub fn input_padding(&self) -> usize {
        input_padding(self.quality)
    }

    /// Decode stereo channels 0/1 into W/X/Y over channels 0..3.
    pub fn decode(&mut self, samples: &mut [&mut [f32]], todo: usize) {
        let width = self.width_control.min(SUPER_STEREO_WIDTH_MAX);
        match (&mut self.shift_d, &mut self.shift_s) {
            (Shifter::Iir(shift_d), Shifter::Iir(shift_s)) => {
                for i in 0..todo {
                    let l = samples[0][i];
                    let r = samples[1][i];
                    let s = self.direct_s.process_sample(l + r);
                    let d = self.direct_d.process_sample((l - r) * width);
                    let jd = shift_d.process_sample((l - r) * width);
                    let js = shift_s.process_sample(l + r);

                    samples[0][i] = 0.6098637 * s - 0.6896511 * jd;
                    samples[1][i] = 0.8624776 * s + 0.7626955 * jd;
                    samples[2][i] = 1.6822415 * d - 0.2156194 * js;
                }
            }
            (Shifter::Fir(shift_d), Shifter::Fir(shift_s)) => {
                let pad = input_padding(self.quality);
                let avail = todo + pad;

                let mut jd = vec![0.0f32; todo];
                let mut js = vec![0.0f32; todo];
                {
                    let d_in: Vec<f32> =
                        (0..avail).map(|i| (samples[0][i] - samples[1][i]) * width).collect();
                    shift_d.process(&d_in, &mut jd, todo);
                    let s_in: Vec<f32> =
                        (0..avail).map(|i| samples[0][i] + samples[1][i]).collect();
                    shift_s.process(&s_in, &mut js, todo);
                }

                for i in 0..todo {
                    let l = samples[0][i];
                    let r = samples[1][i];
                    samples[0][i] = 0.6098637 * (l + r) - 0.6896511 * jd[i];
                    samples[1][i] = 0.8624776 * (l + r) + 0.7626955 * jd[i];
                    samples[2][i] = 1.6822415 * (l - r) * width - 0.2156194 * js[i];
                }
            }
            _ => unreachable!("mismatched shifter qualities"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_centered_w_only() {
        // A W-only scene is center content: left and right should match.
        let mut enc = UhjEncoder::new();
        let w = vec![0.5f32; 64];
        let x = vec![0.0f32; 64];
        let y = vec![0.0f32; 64];
        let mut l = vec![0.0f32; 64];
        let mut r = vec![0.0f32; 64];
        enc.encode(&mut l, &mut r, &w, &x, &y, 64);
        for i in 8..64 {
            assert!((l[i] - r[i]).abs() < 1e-3, "sample {i}: {} vs {}", l[i], r[i]);
        }
    }

    #[test]
    fn test_decode_mono_yields_w_dominant() {
        // Identical L/R has no side content: Y stays near zero.
        let mut dec = UhjAmbiDecoder::new(UhjQuality::Iir);
        let mut ch0 = vec![0.25f32; 128];
        let mut ch1 = vec![0.25f32; 128];
        let mut ch2 = vec![0.0f32; 128];
        {
            let mut chans: Vec<&mut [f32]> =
                vec![ch0.as_mut_slice(), ch1.as_mut_slice(), ch2.as_mut_slice()];
            dec.decode(&mut chans, 128);
        }
        let y_peak = ch2[32..].iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        let w_level = ch0[32..].iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        assert!(w_level > 0.2, "W should carry the signal, got {w_level}");
        assert!(y_peak < w_level * 0.25, "Y should be small, got {y_peak}");
    }

    #[test]
    fn test_fir_padding_reported() {
        assert_eq!(input_padding(UhjQuality::Iir), 0);
        assert_eq!(input_padding(UhjQuality::Fir256), 128);
        assert_eq!(input_padding(UhjQuality::Fir512), 256);
    }

    #[test]
    fn test_hilbert_taps_antisymmetric() {
        let taps = build_hilbert(64);
        let n = taps.len();
        for i in 0..n / 2 {
            assert!((taps[i] + taps[n - 1 - i]).abs() < 1e-6);
        }
        // Even taps are zero.
        assert_eq!(taps[32], 0.0);
        assert_eq!(taps[30], 0.0);
    }

    #[test]
    fn test_super_stereo_width_clamped() {
        let mut dec = UhjStereoDecoder::new(UhjQuality::Iir);
        dec.width_control = 5.0;
        let mut ch0 = vec![0.1f32; 32];
        let mut ch1 = vec![-0.1f32; 32];
        let mut ch2 = vec![0.0f32; 32];
        let mut chans: Vec<&mut [f32]> =
            vec![ch0.as_mut_slice(), ch1.as_mut_slice(), ch2.as_mut_slice()];
        dec.decode(&mut chans, 32);
        assert!(ch2.iter().all(|v| v.is_finite()));
    }
}
