//! Sample rate conversion kernels
//!
//! A voice picks one resampler at init; the kernel runs over a work buffer
//! that carries `MAX_RESAMPLER_EDGE` samples of history ahead of position
//! 0, stepping a 1.12 fixed-point phase. Kernels are plain functions so the
//! selection happens once per update, never per sample.
//!
//! The band-limited sinc family interpolates a Kaiser-windowed sinc bank
//! over 16 downsampling scales and 32 phases; the "fast" variants pin the
//! scale interpolation to the nearest entry.

use once_cell::sync::Lazy;
use sf_core::{CoreError, MAX_RESAMPLER_EDGE, MAX_RESAMPLER_PADDING, MIXER_FRAC_BITS, MIXER_FRAC_ONE};

/// Resampling methods selectable per voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampler {
    Point,
    #[default]
    Linear,
    Spline,
    Gaussian,
    BSinc12,
    FastBSinc12,
    BSinc24,
    FastBSinc24,
    BSinc48,
    FastBSinc48,
}

impl Resampler {
    /// Parse a configuration name. Deprecated aliases map to their modern
    /// equivalents; the caller decides whether to warn.
    pub fn from_name(name: &str) -> Result<Resampler, CoreError> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "point" => Ok(Resampler::Point),
            "linear" => Ok(Resampler::Linear),
            "cubic" | "spline" => Ok(Resampler::Spline),
            "sinc4" | "sinc8" | "gaussian" => Ok(Resampler::Gaussian),
            "bsinc" | "bsinc12" => Ok(Resampler::BSinc12),
            "fast_bsinc12" => Ok(Resampler::FastBSinc12),
            "bsinc24" => Ok(Resampler::BSinc24),
            "fast_bsinc24" => Ok(Resampler::FastBSinc24),
            "bsinc48" => Ok(Resampler::BSinc48),
            "fast_bsinc48" => Ok(Resampler::FastBSinc48),
            _ => Err(CoreError::Resampler(name.into())),
        }
    }
}

/// Per-voice interpolator state, emplaced by [`prepare`].
#[derive(Debug, Clone, Default)]
pub enum InterpState {
    #[default]
    None,
    Cubic(CubicState),
    Bsinc(BsincState),
}

/// Resampler kernel signature. `src[MAX_RESAMPLER_EDGE]` is the sample at
/// integer position 0; `frac`/`increment` are 1.12 fixed point.
pub type ResamplerFunc = fn(&mut InterpState, &[f32], u32, u32, &mut [f32]);

// ─── Cubic (4-tap) tables ───────────────────────────────────────────────

const CUBIC_PHASE_BITS: u32 = 8;
const CUBIC_PHASE_COUNT: usize = 1 << CUBIC_PHASE_BITS;
const CUBIC_PHASE_DIFF_BITS: u32 = MIXER_FRAC_BITS - CUBIC_PHASE_BITS;
const CUBIC_PHASE_DIFF_ONE: f32 = (1 << CUBIC_PHASE_DIFF_BITS) as f32;
const CUBIC_PHASE_DIFF_MASK: u32 = (1 << CUBIC_PHASE_DIFF_BITS) - 1;

/// 4 coefficients + 4 phase deltas per phase entry.
#[derive(Debug)]
pub struct CubicTable {
    tab: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct CubicState {
    filter: &'static CubicTable,
}

fn catmull_rom(mu: f32) -> [f32; 4] {
    let mu2 = mu * mu;
    let mu3 = mu2 * mu;
    [
        -0.5 * mu3 + mu2 - 0.5 * mu,
        1.5 * mu3 - 2.5 * mu2 + 1.0,
        -1.5 * mu3 + 2.0 * mu2 + 0.5 * mu,
        0.5 * mu3 - 0.5 * mu2,
    ]
}

fn gaussian4(mu: f32) -> [f32; 4] {
    // Sigma chosen so the tap weight hits -60dB two samples out.
    const SIGMA2: f32 = 0.2895;
    let mut coeffs = [0.0f32; 4];
    for (j, c) in coeffs.iter_mut().enumerate() {
        let x = (j as f32 - 1.0) - mu;
        *c = (-(x * x) / (2.0 * SIGMA2)).exp();
    }
    let sum: f32 = coeffs.iter().sum();
    coeffs.map(|c| c / sum)
}

fn build_cubic_table(basis: fn(f32) -> [f32; 4]) -> CubicTable {
    let mut tab = Vec::with_capacity(CUBIC_PHASE_COUNT * 8);
    for pi in 0..CUBIC_PHASE_COUNT {
        let mu0 = pi as f32 / CUBIC_PHASE_COUNT as f32;
        let mu1 = (pi + 1) as f32 / CUBIC_PHASE_COUNT as f32;
        let c0 = basis(mu0);
        let c1 = basis(mu1);
        tab.extend_from_slice(&c0);
        tab.extend(c0.iter().zip(c1.iter()).map(|(a, b)| b - a));
    }
    CubicTable { tab }
}

static SPLINE_FILTER: Lazy<CubicTable> = Lazy::new(|| build_cubic_table(catmull_rom));
static GAUSSIAN_FILTER: Lazy<CubicTable> = Lazy::new(|| build_cubic_table(gaussian4));

// ─── Band-limited sinc tables ───────────────────────────────────────────

const BSINC_SCALE_COUNT: usize = 16;
const BSINC_PHASE_BITS: u32 = 5;
const BSINC_PHASE_COUNT: usize = 1 << BSINC_PHASE_BITS;
const BSINC_PHASE_DIFF_BITS: u32 = MIXER_FRAC_BITS - BSINC_PHASE_BITS;
const BSINC_PHASE_DIFF_ONE: f32 = (1 << BSINC_PHASE_DIFF_BITS) as f32;
const BSINC_PHASE_DIFF_MASK: u32 = (1 << BSINC_PHASE_DIFF_BITS) - 1;

pub struct BSincTable {
    scale_base: f32,
    scale_range: f32,
    m: [usize; BSINC_SCALE_COUNT],
    filter_offset: [usize; BSINC_SCALE_COUNT],
    tab: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct BsincState {
    /// Scale interpolation factor, 0 for the fast variants.
    sf: f32,
    /// Tap count of the selected scale.
    m: usize,
    /// Taps before the interpolation point.
    l: isize,
    filter: &'static [f32],
}

fn bessel_i0(x: f64) -> f64 {
    // Series expansion, converges quickly for the beta range used here.
    let mut term = 1.0;
    let mut sum = 1.0;
    let x2 = x / 2.0;
    for k in 1..50 {
        term *= (x2 / k as f64) * (x2 / k as f64);
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    sum
}

fn kaiser(beta: f64, x: f64) -> f64 {
    if !(-1.0..=1.0).contains(&x) {
        return 0.0;
    }
    bessel_i0(beta * (1.0 - x * x).sqrt()) / bessel_i0(beta)
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

/// One windowed-sinc tap: cutoff `q`, tap index `j` of `m`, phase `p`.
fn bsinc_tap(q: f64, m: usize, l: isize, beta: f64, p: f64, j: usize) -> f32 {
    let x = (j as isize - l) as f64 - p;
    (q * sinc(q * x) * kaiser(beta, 2.0 * x / m as f64)) as f32
}

fn generate_bsinc_table(points: usize, beta: f64) -> BSincTable {
    let scale_base = 0.125f32;
    let scale_range = 1.0 / (1.0 - scale_base);

    let mut m = [0usize; BSINC_SCALE_COUNT];
    let mut filter_offset = [0usize; BSINC_SCALE_COUNT];
    let mut tab = Vec::new();

    for si in 0..BSINC_SCALE_COUNT {
        let q = scale_base as f64
            + (1.0 - scale_base as f64) * (si + 1) as f64 / BSINC_SCALE_COUNT as f64;
        // More taps at lower cutoff, rounded to a multiple of 4 for the
        // work buffer alignment, capped by the history the voice keeps.
        let mi = (((points as f64 / q).ceil() as usize + 3) & !3).min(MAX_RESAMPLER_PADDING);
        let l = (mi / 2 - 1) as isize;
        m[si] = mi;
        filter_offset[si] = tab.len();

        let q_next = if si + 1 < BSINC_SCALE_COUNT {
            scale_base as f64
                + (1.0 - scale_base as f64) * (si + 2) as f64 / BSINC_SCALE_COUNT as f64
        } else {
            q
        };

        for pi in 0..BSINC_PHASE_COUNT {
            let p0 = pi as f64 / BSINC_PHASE_COUNT as f64;
            let p1 = (pi + 1) as f64 / BSINC_PHASE_COUNT as f64;

            let f: Vec<f32> = (0..mi).map(|j| bsinc_tap(q, mi, l, beta, p0, j)).collect();
            let fp: Vec<f32> = (0..mi).map(|j| bsinc_tap(q, mi, l, beta, p1, j)).collect();
            let fs: Vec<f32> = (0..mi).map(|j| bsinc_tap(q_next, mi, l, beta, p0, j)).collect();
            let fsp: Vec<f32> = (0..mi).map(|j| bsinc_tap(q_next, mi, l, beta, p1, j)).collect();

            // Layout per phase: filter, scale delta, phase delta,
            // scale-phase delta.
            tab.extend_from_slice(&f);
            tab.extend(f.iter().zip(fs.iter()).map(|(a, b)| b - a));
            tab.extend(f.iter().zip(fp.iter()).map(|(a, b)| b - a));
            tab.extend(
                f.iter()
                    .zip(fp.iter())
                    .zip(fs.iter().zip(fsp.iter()))
                    .map(|((f0, f0p), (f1, f1p))| (f1p - f1) - (f0p - f0)),
            );
        }
    }

    BSincTable { scale_base, scale_range, m, filter_offset, tab }
}

static BSINC12: Lazy<BSincTable> = Lazy::new(|| generate_bsinc_table(12, 7.0));
static BSINC24: Lazy<BSincTable> = Lazy::new(|| generate_bsinc_table(24, 9.0));
static BSINC48: Lazy<BSincTable> = Lazy::new(|| generate_bsinc_table(48, 11.0));

fn bsinc_prepare(increment: u32, table: &'static BSincTable) -> BsincState {
    let mut si = BSINC_SCALE_COUNT - 1;
    let mut sf = 0.0f32;

    if increment > MIXER_FRAC_ONE {
        sf = MIXER_FRAC_ONE as f32 / increment as f32 - table.scale_base;
        sf = (BSINC_SCALE_COUNT as f32 * sf * table.scale_range - 1.0).max(0.0);
        si = (sf as usize).min(BSINC_SCALE_COUNT - 1);
        // Fit the interpolation factor to a diagonally-symmetric curve to
        // reduce transition ripple between scales.
        sf -= si as f32;
        sf = 1.0 - (1.0 - sf * sf).sqrt();
    }

    let m = table.m[si];
    BsincState {
        sf,
        m,
        l: (m / 2 - 1) as isize,
        filter: &table.tab[table.filter_offset[si]..],
    }
}

// ─── Kernels ────────────────────────────────────────────────────────────

fn resample_point(_state: &mut InterpState, src: &[f32], frac: u32, increment: u32, dst: &mut [f32]) {
    let mut pos = 0usize;
    let mut frac = frac;
    for d in dst.iter_mut() {
        *d = src[MAX_RESAMPLER_EDGE + pos];
        frac += increment;
        pos += (frac >> MIXER_FRAC_BITS) as usize;
        frac &= sf_core::MIXER_FRAC_MASK;
    }
}

fn resample_linear(_state: &mut InterpState, src: &[f32], frac: u32, increment: u32, dst: &mut [f32]) {
    let mut pos = 0usize;
    let mut frac = frac;
    for d in dst.iter_mut() {
        let s0 = src[MAX_RESAMPLER_EDGE + pos];
        let s1 = src[MAX_RESAMPLER_EDGE + pos + 1];
        *d = s0 + (s1 - s0) * (frac as f32 / MIXER_FRAC_ONE as f32);
        frac += increment;
        pos += (frac >> MIXER_FRAC_BITS) as usize;
        frac &= sf_core::MIXER_FRAC_MASK;
    }
}

fn resample_cubic(state: &mut InterpState, src: &[f32], frac: u32, increment: u32, dst: &mut [f32]) {
    let InterpState::Cubic(cstate) = state else { unreachable!("cubic kernel without state") };
    let tab = &cstate.filter.tab;

    let mut pos = 0usize;
    let mut frac = frac;
    for d in dst.iter_mut() {
        let pi = (frac >> CUBIC_PHASE_DIFF_BITS) as usize;
        let pf = (frac & CUBIC_PHASE_DIFF_MASK) as f32 / CUBIC_PHASE_DIFF_ONE;
        let row = &tab[pi * 8..pi * 8 + 8];

        let base = MAX_RESAMPLER_EDGE + pos - 1;
        let mut out = 0.0f32;
        for j in 0..4 {
            out += (row[j] + pf * row[4 + j]) * src[base + j];
        }
        *d = out;

        frac += increment;
        pos += (frac >> MIXER_FRAC_BITS) as usize;
        frac &= sf_core::MIXER_FRAC_MASK;
    }
}

fn resample_bsinc(state: &mut InterpState, src: &[f32], frac: u32, increment: u32, dst: &mut [f32]) {
    let InterpState::Bsinc(bstate) = state else { unreachable!("bsinc kernel without state") };
    let (sf, m, l) = (bstate.sf, bstate.m, bstate.l);
    let filter = bstate.filter;

    let mut pos = 0isize;
    let mut frac = frac;
    for d in dst.iter_mut() {
        let pi = (frac >> BSINC_PHASE_DIFF_BITS) as usize;
        let pf = (frac & BSINC_PHASE_DIFF_MASK) as f32 / BSINC_PHASE_DIFF_ONE;

        let off = pi * m * 4;
        let fil = &filter[off..off + m];
        let scd = &filter[off + m..off + 2 * m];
        let phd = &filter[off + 2 * m..off + 3 * m];
        let spd = &filter[off + 3 * m..off + 4 * m];

        let base = (MAX_RESAMPLER_EDGE as isize + pos - l) as usize;
        let mut out = 0.0f32;
        for j in 0..m {
            let c = fil[j] + sf * scd[j] + pf * (phd[j] + sf * spd[j]);
            out += c * src[base + j];
        }
        *d = out;

        frac += increment;
        pos += (frac >> MIXER_FRAC_BITS) as isize;
        frac &= sf_core::MIXER_FRAC_MASK;
    }
}

fn resample_fast_bsinc(state: &mut InterpState, src: &[f32], frac: u32, increment: u32, dst: &mut [f32]) {
    let InterpState::Bsinc(bstate) = state else { unreachable!("bsinc kernel without state") };
    let (m, l) = (bstate.m, bstate.l);
    let filter = bstate.filter;

    let mut pos = 0isize;
    let mut frac = frac;
    for d in dst.iter_mut() {
        let pi = (frac >> BSINC_PHASE_DIFF_BITS) as usize;
        let pf = (frac & BSINC_PHASE_DIFF_MASK) as f32 / BSINC_PHASE_DIFF_ONE;

        let off = pi * m * 4;
        let fil = &filter[off..off + m];
        let phd = &filter[off + 2 * m..off + 3 * m];

        let base = (MAX_RESAMPLER_EDGE as isize + pos - l) as usize;
        let mut out = 0.0f32;
        for j in 0..m {
            out += (fil[j] + pf * phd[j]) * src[base + j];
        }
        *d = out;

        frac += increment;
        pos += (frac >> MIXER_FRAC_BITS) as isize;
        frac &= sf_core::MIXER_FRAC_MASK;
    }
}

/// Emplace the interpolator state for the given method and step, and pick
/// the kernel. BSinc falls back to its fast kernel when not downsampling,
/// where the scale factor is pinned anyway.
pub fn prepare(kind: Resampler, increment: u32, state: &mut InterpState) -> ResamplerFunc {
    match kind {
        Resampler::Point => {
            *state = InterpState::None;
            resample_point
        }
        Resampler::Linear => {
            *state = InterpState::None;
            resample_linear
        }
        Resampler::Spline => {
            *state = InterpState::Cubic(CubicState { filter: &SPLINE_FILTER });
            resample_cubic
        }
        Resampler::Gaussian => {
            *state = InterpState::Cubic(CubicState { filter: &GAUSSIAN_FILTER });
            resample_cubic
        }
        Resampler::BSinc12 | Resampler::FastBSinc12 => {
            *state = InterpState::Bsinc(bsinc_prepare(increment, &BSINC12));
            if kind == Resampler::BSinc12 && increment > MIXER_FRAC_ONE {
                resample_bsinc
            } else {
                resample_fast_bsinc
            }
        }
        Resampler::BSinc24 | Resampler::FastBSinc24 => {
            *state = InterpState::Bsinc(bsinc_prepare(increment, &BSINC24));
            if kind == Resampler::BSinc24 && increment > MIXER_FRAC_ONE {
                resample_bsinc
            } else {
                resample_fast_bsinc
            }
        }
        Resampler::BSinc48 | Resampler::FastBSinc48 => {
            *state = InterpState::Bsinc(bsinc_prepare(increment, &BSINC48));
            if kind == Resampler::BSinc48 && increment > MIXER_FRAC_ONE {
                resample_bsinc
            } else {
                resample_fast_bsinc
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_src(len: usize) -> Vec<f32> {
        // DC source with full edge padding on both sides.
        vec![1.0; MAX_RESAMPLER_PADDING + len]
    }

    #[test]
    fn test_point_passthrough() {
        let src = make_src(64);
        let mut dst = vec![0.0f32; 32];
        let mut state = InterpState::None;
        let func = prepare(Resampler::Point, MIXER_FRAC_ONE, &mut state);
        func(&mut state, &src, 0, MIXER_FRAC_ONE, &mut dst);
        assert!(dst.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_linear_interpolates_ramp() {
        let mut src = vec![0.0f32; MAX_RESAMPLER_PADDING + 64];
        for (i, s) in src.iter_mut().enumerate() {
            *s = i as f32;
        }
        let mut dst = vec![0.0f32; 8];
        let mut state = InterpState::None;
        let func = prepare(Resampler::Linear, MIXER_FRAC_ONE / 2, &mut state);
        func(&mut state, &src, MIXER_FRAC_ONE / 2, MIXER_FRAC_ONE / 2, &mut dst);
        // Starting half a sample in, stepping half a sample.
        let base = MAX_RESAMPLER_EDGE as f32;
        for (i, &d) in dst.iter().enumerate() {
            let expect = base + 0.5 + i as f32 * 0.5;
            assert!((d - expect).abs() < 1e-4, "sample {i}: {d} vs {expect}");
        }
    }

    #[test]
    fn test_cubic_dc_preservation() {
        let src = make_src(64);
        let mut dst = vec![0.0f32; 32];
        let mut state = InterpState::None;
        let func = prepare(Resampler::Spline, 3000, &mut state);
        func(&mut state, &src, 1234, 3000, &mut dst);
        for &d in &dst {
            assert!((d - 1.0).abs() < 1e-3, "DC not preserved: {d}");
        }
    }

    #[test]
    fn test_gaussian_dc_preservation() {
        let src = make_src(64);
        let mut dst = vec![0.0f32; 32];
        let mut state = InterpState::None;
        let func = prepare(Resampler::Gaussian, 5000, &mut state);
        func(&mut state, &src, 99, 5000, &mut dst);
        for &d in &dst {
            assert!((d - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_bsinc_dc_preservation() {
        let src = make_src(256);
        let mut dst = vec![0.0f32; 64];
        let mut state = InterpState::None;
        // Unity rate uses the fast path.
        let func = prepare(Resampler::BSinc12, MIXER_FRAC_ONE, &mut state);
        func(&mut state, &src, 0, MIXER_FRAC_ONE, &mut dst);
        for &d in &dst {
            assert!((d - 1.0).abs() < 0.02, "DC not preserved: {d}");
        }
    }

    #[test]
    fn test_bsinc_downsample_state() {
        let mut state = InterpState::None;
        let _ = prepare(Resampler::BSinc24, MIXER_FRAC_ONE * 2, &mut state);
        let InterpState::Bsinc(b) = state else { panic!("expected bsinc state") };
        assert!(b.m > 24, "downsampling should widen the filter, m={}", b.m);
        assert!(b.m <= MAX_RESAMPLER_PADDING);
    }

    #[test]
    fn test_resampler_names() {
        assert_eq!(Resampler::from_name("point").unwrap(), Resampler::Point);
        assert_eq!(Resampler::from_name("cubic").unwrap(), Resampler::Spline);
        assert_eq!(Resampler::from_name("fast_bsinc48").unwrap(), Resampler::FastBSinc48);
        assert!(Resampler::from_name("nearest").is_err());
    }
}
