//! Higher-order ambisonic rotation
//!
//! First-order B-Format rotates with a plain 3x3 matrix. Higher orders are
//! built recursively from it: the band-l rotation derives from band l-1
//! through the u/v/w recurrence of Ivanic & Ruedenberg as formulated by
//! Politis, with the constant terms precomputed per (l, m, n).

use once_cell::sync::Lazy;
use sf_core::{MAX_AMBI_CHANNELS, MAX_AMBI_ORDER};

/// An ACN-ordered rotation matrix over all mixing channels.
pub type AmbiRotateMatrix = [[f32; MAX_AMBI_CHANNELS]; MAX_AMBI_CHANNELS];

#[derive(Debug, Clone, Copy, Default)]
struct CoeffValues {
    u: f32,
    v: f32,
    w: f32,
}

const fn rotator_size(l: usize) -> usize {
    if l >= 2 {
        (l * 2 + 1) * (l * 2 + 1) + rotator_size(l - 1)
    } else {
        0
    }
}

const ROTATOR_COEFFS: usize = rotator_size(MAX_AMBI_ORDER);

static ROTATOR_COEFF_ARRAY: Lazy<[CoeffValues; ROTATOR_COEFFS]> = Lazy::new(|| {
    let mut coeffs = [CoeffValues::default(); ROTATOR_COEFFS];
    let mut idx = 0;

    for l in 2..=(MAX_AMBI_ORDER as i32) {
        for n in -l..=l {
            for m in -l..=l {
                let denom = if n.abs() == l {
                    ((2 * l) * (2 * l - 1)) as f64
                } else {
                    (l * l - n * n) as f64
                };

                let c = &mut coeffs[idx];
                if m == 0 {
                    c.u = ((l * l) as f64 / denom).sqrt() as f32;
                    c.v = -((((l - 1) * l) as f64 / denom).sqrt()) as f32;
                    c.w = 0.0;
                } else {
                    let abs_m = m.abs();
                    c.u = (((l * l - m * m) as f64) / denom).sqrt() as f32;
                    c.v = ((((l + abs_m - 1) * (l + abs_m)) as f64 / denom).sqrt() * 0.5) as f32;
                    c.w = ((((l - abs_m - 1) * (l - abs_m)) as f64 / denom).sqrt() * -0.5) as f32;
                }
                idx += 1;
            }
        }
    }
    coeffs
});

/// The P recurrence term: products of the first-order band with the
/// previous band's elements.
fn p_term(i: i32, l: i32, a: i32, n: i32, last_band: usize, r: &AmbiRotateMatrix) -> f32 {
    let ri1 = r[3][(i + 2) as usize];
    let rim1 = r[1][(i + 2) as usize];
    let ri0 = r[2][(i + 2) as usize];

    let y = last_band + (a + l - 1) as usize;
    if n == -l {
        ri1 * r[last_band][y] + rim1 * r[last_band + (l as usize - 1) * 2][y]
    } else if n == l {
        ri1 * r[last_band + (l as usize - 1) * 2][y] - rim1 * r[last_band][y]
    } else {
        ri0 * r[last_band + (l - 1 + n) as usize][y]
    }
}

fn u_term(l: i32, m: i32, n: i32, last_band: usize, r: &AmbiRotateMatrix) -> f32 {
    p_term(0, l, m, n, last_band, r)
}

fn v_term(l: i32, m: i32, n: i32, last_band: usize, r: &AmbiRotateMatrix) -> f32 {
    use std::f32::consts::SQRT_2;
    if m > 0 {
        let d = m == 1;
        let p0 = p_term(1, l, m - 1, n, last_band, r);
        let p1 = p_term(-1, l, -m + 1, n, last_band, r);
        if d {
            p0 * SQRT_2
        } else {
            p0 - p1
        }
    } else {
        let d = m == -1;
        let p0 = p_term(1, l, m + 1, n, last_band, r);
        let p1 = p_term(-1, l, -m - 1, n, last_band, r);
        if d {
            p1 * SQRT_2
        } else {
            p0 + p1
        }
    }
}

fn w_term(l: i32, m: i32, n: i32, last_band: usize, r: &AmbiRotateMatrix) -> f32 {
    debug_assert!(m != 0);
    if m > 0 {
        let p0 = p_term(1, l, m + 1, n, last_band, r);
        let p1 = p_term(-1, l, -m - 1, n, last_band, r);
        p0 + p1
    } else {
        let p0 = p_term(1, l, m - 1, n, last_band, r);
        let p1 = p_term(-1, l, -m + 1, n, last_band, r);
        p0 - p1
    }
}

/// Fill the higher-order blocks of `matrix`, whose zeroth- and first-order
/// elements must already hold the base rotation, up to and including
/// `order`.
pub fn ambi_rotator(matrix: &mut AmbiRotateMatrix, order: usize) {
    if order < 2 {
        return;
    }

    let coeffs = &*ROTATOR_COEFF_ARRAY;
    let mut coeff_idx = 0usize;
    let mut band_idx = 4usize;
    let mut last_band = 1usize;

    for l in 2..=(order as i32) {
        let mut y = band_idx;
        for n in -l..=l {
            let mut x = band_idx;
            for m in -l..=l {
                let mut r = 0.0f32;

                let cv = coeffs[coeff_idx];
                if cv.u != 0.0 {
                    r += cv.u * u_term(l, m, n, last_band, matrix);
                }
                if cv.v != 0.0 {
                    r += cv.v * v_term(l, m, n, last_band, matrix);
                }
                if cv.w != 0.0 {
                    r += cv.w * w_term(l, m, n, last_band, matrix);
                }

                matrix[y][x] = r;
                coeff_idx += 1;
                x += 1;
            }
            y += 1;
        }
        last_band = band_idx;
        band_idx += l as usize * 2 + 1;
    }

    // Skip the coefficients of unrotated bands when the order is below
    // maximum; nothing reads them this pass.
    let _ = coeff_idx;
}

/// Compose an upsampler with a rotation: behaves as if the input was
/// decoded at its own order, re-encoded at the device order, then rotated.
pub fn upsample_transform(
    output: &mut AmbiRotateMatrix,
    upsampler: &[super::ambidefs::AmbiCoeffs],
    rotator: &AmbiRotateMatrix,
    ambi_order: usize,
) {
    let num_chans = sf_core::ambi_channels_from_order(ambi_order);
    for row in output.iter_mut().take(upsampler.len()) {
        row.fill(0.0);
    }
    for (i, up_row) in upsampler.iter().enumerate() {
        for (k, rot_row) in rotator.iter().enumerate().take(num_chans) {
            let a = up_row[k];
            if a != 0.0 {
                for (out, &rot) in output[i].iter_mut().zip(rot_row.iter()) {
                    *out += rot * a;
                }
            }
        }
    }
}

/// Seed the zeroth/first order of a rotation matrix from the listener
/// basis vectors (right, up, forward), as used for B-Format voices.
pub fn base_rotation(
    u: super::position::Vec3,
    v: super::position::Vec3,
    n: super::position::Vec3,
) -> AmbiRotateMatrix {
    let mut m = [[0.0f32; MAX_AMBI_CHANNELS]; MAX_AMBI_CHANNELS];
    m[0][0] = 1.0;
    m[1][1] = u.x;
    m[1][2] = -u.y;
    m[1][3] = u.z;
    m[2][1] = -v.x;
    m[2][2] = v.y;
    m[2][3] = -v.z;
    m[3][1] = -n.x;
    m[3][2] = n.y;
    m[3][3] = -n.z;
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambidefs::sh_coeffs;
    use crate::position::Vec3;

    fn rotation_for_yaw(yaw: f32) -> AmbiRotateMatrix {
        // Listener looking along -Z rotated by yaw around +Y.
        let n = Vec3::new(-yaw.sin(), 0.0, -yaw.cos());
        let v = Vec3::new(0.0, 1.0, 0.0);
        let mut u = n.cross(v);
        u.normalize();
        let mut m = base_rotation(u, v, n);
        ambi_rotator(&mut m, MAX_AMBI_ORDER);
        m
    }

    fn apply(m: &AmbiRotateMatrix, c: &[f32; MAX_AMBI_CHANNELS]) -> [f32; MAX_AMBI_CHANNELS] {
        let mut out = [0.0f32; MAX_AMBI_CHANNELS];
        for (i, o) in out.iter_mut().enumerate() {
            for (j, &cj) in c.iter().enumerate() {
                *o += m[i][j] * cj;
            }
        }
        out
    }

    #[test]
    fn test_identity_rotation() {
        let m = rotation_for_yaw(0.0);
        let c = sh_coeffs(0.7, 0.3, 0.648);
        let r = apply(&m, &c);
        for (i, (&a, &b)) in r.iter().zip(c.iter()).enumerate() {
            assert!((a - b).abs() < 1e-4, "channel {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_rotation_preserves_energy_per_band() {
        let m = rotation_for_yaw(0.73);
        let c = sh_coeffs(0.6, 0.64, 0.48);
        let r = apply(&m, &c);
        for (band, range) in [(1, 1..4), (2, 4..9), (3, 9..16), (4, 16..25)] {
            let e_in: f32 = c[range.clone()].iter().map(|x| x * x).sum();
            let e_out: f32 = r[range.clone()].iter().map(|x| x * x).sum();
            assert!(
                (e_in - e_out).abs() < e_in * 0.01 + 1e-4,
                "band {band}: {e_in} vs {e_out}"
            );
        }
    }

    #[test]
    fn test_quarter_turn_moves_front_to_side() {
        // Rotating the listener 90 degrees counter-clockwise turns a front
        // source into a right-side source.
        use std::f32::consts::FRAC_PI_2;
        let m = rotation_for_yaw(FRAC_PI_2);

        // Scene content straight ahead (ambisonic +X).
        let c = sh_coeffs(1.0, 0.0, 0.0);
        let r = apply(&m, &c);
        // Expect the energy on the Y axis (ACN 1) with the sign of "right"
        // (ambisonic -Y).
        assert!(r[1] < -1.0, "expected strong -Y, got {}", r[1]);
        assert!(r[3].abs() < 1e-3, "X should vanish, got {}", r[3]);
    }
}
