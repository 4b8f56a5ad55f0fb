//! Direction encoding and pan-gain application

use crate::ambidefs::{sh_coeffs, AmbiChanMap, AmbiCoeffs};

/// Encode a listener-space direction (+X right, +Y up, +Z back) into
/// per-ACN coefficients, with an angular `spread` in radians widening the
/// source.
///
/// The spread follows the spherical-cap zonal-harmonic weighting: higher
/// orders roll off as the cap widens, and the total level rises by up to
/// +3dB at full coverage.
pub fn calc_direction_coeffs(dir: [f32; 3], spread: f32) -> AmbiCoeffs {
    // Listener frame to ambisonic frame: x=front, y=left, z=up.
    let mut coeffs = sh_coeffs(-dir[2], -dir[0], dir[1]);

    if spread > 0.0 {
        let ca = (spread * 0.5).cos();
        // Increase the source volume by up to +3dB for a full spread.
        let scale = (1.0 + spread / std::f32::consts::TAU).sqrt();

        let zh0 = scale;
        let zh1 = scale * 0.5 * (ca + 1.0);
        let zh2 = scale * 0.5 * (ca + 1.0) * ca;
        let zh3 = scale * 0.125 * (ca + 1.0) * (5.0 * ca * ca - 1.0);
        let zh4 = scale * 0.25 * (ca + 1.0) * (7.0 * ca * ca - 3.0) * ca;

        let zh = [zh0, zh1, zh2, zh3, zh4];
        for (i, c) in coeffs.iter_mut().enumerate() {
            *c *= zh[crate::ambidefs::ORDER_FROM_CHANNEL[i] as usize];
        }
    }

    coeffs
}

/// Accumulate coefficient gains for a bus: `out[i]` gets the encoded gain
/// of the bus's i'th line. Lines beyond the bus's channel count are left
/// untouched (they were zeroed when the update began).
pub fn compute_pan_gains(map: &AmbiChanMap, coeffs: &AmbiCoeffs, in_gain: f32, out: &mut [f32]) {
    for i in 0..map.count.min(out.len()) {
        out[i] = coeffs[map.index[i] as usize] * map.scale[i] * in_gain;
    }
}

/// Triple the azimuth of a front-facing direction, clamping past the ±30
/// degree arc to ±90. Used to widen channel positions for pairwise stereo
/// panning.
pub fn scale_azimuth_front3(mut pos: [f32; 3]) -> [f32; 3] {
    if pos[2] < 0.0 {
        let len2d = (pos[0] * pos[0] + pos[2] * pos[2]).sqrt();
        let x = pos[0] / len2d;
        let z = -pos[2] / len2d;

        // z > cos(pi/6): -30 < azimuth < 30 degrees.
        if z > 0.866025403785 {
            // Triple the angle represented by x,z.
            let x3 = x * 3.0 - x * x * x * 4.0;
            let z3 = z * z * z * 4.0 - z * 3.0;
            pos[0] = x3 * len2d;
            pos[2] = -z3 * len2d;
        } else {
            pos[0] = len2d.copysign(pos[0]);
            pos[2] = 0.0;
        }
    }
    pos
}

/// Scale a front azimuth by 3/2: halve the angle, then triple it. Used
/// for mono directions in pairwise mode.
pub fn scale_azimuth_front3_2(mut pos: [f32; 3]) -> [f32; 3] {
    if pos[2] < 0.0 {
        let len2d = (pos[0] * pos[0] + pos[2] * pos[2]).sqrt();
        let mut x = pos[0] / len2d;
        let mut z = -pos[2] / len2d;

        // z > cos(pi/3): -60 < azimuth < 60 degrees.
        if z > 0.5 {
            // Halve the angle.
            x = ((1.0 - z) * 0.5).sqrt().copysign(x);
            z = ((1.0 + z) * 0.5).sqrt();

            // Then triple it.
            let x3 = x * 3.0 - x * x * x * 4.0;
            let z3 = z * z * z * 4.0 - z * 3.0;

            pos[0] = x3 * len2d;
            pos[2] = -z3 * len2d;
        } else {
            pos[0] = len2d.copysign(pos[0]);
            pos[2] = 0.0;
        }
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambidefs::AmbiChanMap;

    #[test]
    fn test_front_encoding() {
        let coeffs = calc_direction_coeffs([0.0, 0.0, -1.0], 0.0);
        assert!((coeffs[0] - 1.0).abs() < 1e-6);
        assert!(coeffs[3] > 1.7, "front maps to +X, got {}", coeffs[3]);
        assert!(coeffs[1].abs() < 1e-6);
    }

    #[test]
    fn test_left_encoding() {
        let coeffs = calc_direction_coeffs([-1.0, 0.0, 0.0], 0.0);
        assert!(coeffs[1] > 1.7, "left maps to +Y, got {}", coeffs[1]);
    }

    #[test]
    fn test_full_spread_drops_directionality() {
        let tight = calc_direction_coeffs([0.0, 0.0, -1.0], 0.0);
        let wide = calc_direction_coeffs([0.0, 0.0, -1.0], std::f32::consts::TAU);
        // Full spread boosts W and suppresses the directional channels.
        assert!(wide[0] > tight[0]);
        assert!(wide[3].abs() < tight[3] * 0.05, "X residue {}", wide[3]);
    }

    #[test]
    fn test_pan_gains_respect_map() {
        let map = AmbiChanMap::full_3d(1);
        let coeffs = calc_direction_coeffs([0.0, 0.0, -1.0], 0.0);
        let mut out = [0.0f32; 8];
        compute_pan_gains(&map, &coeffs, 0.5, &mut out);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[3] - coeffs[3] * 0.5).abs() < 1e-6);
        assert_eq!(out[4], 0.0);
    }

    #[test]
    fn test_azimuth_warp_clamps_wide_angles() {
        // 45 degrees front-right is outside the ±30 arc: clamps to 90.
        let pos = scale_azimuth_front3([0.707, 0.0, -0.707]);
        assert!(pos[2].abs() < 1e-6);
        assert!(pos[0] > 0.9);
    }

    #[test]
    fn test_azimuth_warp_preserves_center() {
        let pos = scale_azimuth_front3([0.0, 0.0, -1.0]);
        assert!((pos[2] - -1.0).abs() < 1e-5);
        assert!(pos[0].abs() < 1e-5);

        let pos = scale_azimuth_front3_2([0.0, 0.0, -1.0]);
        assert!((pos[2] - -1.0).abs() < 1e-5);
    }
}
