//! Ambisonic channel definitions, scalings, and order upsampling
//!
//! Internal mixing is ACN-ordered and N3D-normalized; everything else
//! (FuMa, SN3D, UHJ input) converts on the way in via the scale and index
//! tables here.
//!
//! The upsampler matrices encode a lower-order signal into a higher-order
//! mix by composing a reference speaker decode at the source order with a
//! max-order re-encode of those speaker feeds. The reference arrays (cube,
//! icosahedron points, pentakis-style sets for 3D; regular polygons for
//! 2D) match what the HF order-scale tables below were derived from.

use once_cell::sync::Lazy;
use sf_core::{MAX_AMBI2D_CHANNELS, MAX_AMBI_CHANNELS, MAX_AMBI_ORDER};

/// A full set of per-ACN coefficients.
pub type AmbiCoeffs = [f32; MAX_AMBI_CHANNELS];

/// Per-bus ambisonic channel mapping: which ACN each bus line carries and
/// the scale to apply when encoding into it.
#[derive(Debug, Clone)]
pub struct AmbiChanMap {
    pub count: usize,
    pub index: [u8; MAX_AMBI_CHANNELS],
    pub scale: [f32; MAX_AMBI_CHANNELS],
}

impl AmbiChanMap {
    /// Identity map over a full 3D mix of the given order.
    pub fn full_3d(order: usize) -> Self {
        let count = sf_core::ambi_channels_from_order(order);
        let mut index = [0u8; MAX_AMBI_CHANNELS];
        for (i, idx) in index.iter_mut().enumerate() {
            *idx = i as u8;
        }
        Self { count, index, scale: [1.0; MAX_AMBI_CHANNELS] }
    }

    /// Horizontal-only map of the given order.
    pub fn full_2d(order: usize) -> Self {
        let count = sf_core::ambi2d_channels_from_order(order);
        let mut index = [0u8; MAX_AMBI_CHANNELS];
        for (i, idx) in index.iter_mut().enumerate().take(count) {
            *idx = FROM_ACN_2D[i];
        }
        Self { count, index, scale: [1.0; MAX_AMBI_CHANNELS] }
    }
}

/// ACN index of each 2D (m = ±l) channel.
pub const FROM_ACN_2D: [u8; MAX_AMBI2D_CHANNELS] = [0, 1, 3, 4, 8, 9, 15, 16, 24];

/// ACN index for each FuMa-ordered channel (W X Y Z R S T U V K L M N O P
/// Q); FuMa does not define fourth order, those pass through.
pub const FROM_FUMA: [u8; MAX_AMBI_CHANNELS] = [
    0, 3, 1, 2, 6, 7, 5, 8, 4, 12, 13, 11, 14, 10, 15, 9, 16, 17, 18, 19, 20, 21, 22, 23, 24,
];

/// ACN index for each 2D FuMa-ordered channel (W X Y U V P Q), extended
/// with the fourth-order cosine/sine pair.
pub const FROM_FUMA_2D: [u8; MAX_AMBI2D_CHANNELS] = [0, 3, 1, 8, 4, 15, 9, 24, 16];

/// Ordering maps for a voice's B-Format channels.
pub fn layout_map(fuma: bool, two_d: bool) -> &'static [u8] {
    match (fuma, two_d) {
        (true, true) => &FROM_FUMA_2D,
        (true, false) => &FROM_FUMA,
        (false, true) => &FROM_ACN_2D,
        (false, false) => {
            static IDENTITY: [u8; MAX_AMBI_CHANNELS] = {
                let mut map = [0u8; MAX_AMBI_CHANNELS];
                let mut i = 0;
                while i < MAX_AMBI_CHANNELS {
                    map[i] = i as u8;
                    i += 1;
                }
                map
            };
            &IDENTITY
        }
    }
}

/// N3D input needs no conversion.
pub const FROM_N3D: AmbiCoeffs = [1.0; MAX_AMBI_CHANNELS];

/// SN3D to N3D: sqrt(2l+1) per order.
pub const FROM_SN3D: AmbiCoeffs = [
    1.0,
    1.732050808, 1.732050808, 1.732050808,
    2.236067977, 2.236067977, 2.236067977, 2.236067977, 2.236067977,
    2.645751311, 2.645751311, 2.645751311, 2.645751311, 2.645751311, 2.645751311, 2.645751311,
    3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0,
];

/// FuMa (MaxN) to N3D, per ACN channel.
pub const FROM_FUMA_SCALE: AmbiCoeffs = [
    1.414213562, // ACN  0 (W), sqrt(2)
    1.732050808, // ACN  1 (Y), sqrt(3)
    1.732050808, // ACN  2 (Z)
    1.732050808, // ACN  3 (X)
    1.936491673, // ACN  4 (V), sqrt(15)/2
    1.936491673, // ACN  5 (T)
    2.236067977, // ACN  6 (R), sqrt(5)
    1.936491673, // ACN  7 (S)
    1.936491673, // ACN  8 (U)
    2.091650066, // ACN  9 (Q), sqrt(35/8)
    1.972026594, // ACN 10 (O), sqrt(35)/3
    2.231093404, // ACN 11 (M), sqrt(224/45)
    2.645751311, // ACN 12 (K), sqrt(7)
    2.231093404, // ACN 13 (L)
    1.972026594, // ACN 14 (N)
    2.091650066, // ACN 15 (P)
    1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
];

/// UHJ-decoded input sits close to SN3D levels on its first-order
/// channels and carries nothing above.
pub const FROM_UHJ: AmbiCoeffs = [
    1.0,
    1.224744871, 1.224744871, 1.224744871,
    1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
    1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
];

/// Input conversion scales for a voice's declared normalization.
pub fn scale_table(scaling: sf_core::AmbiScaling) -> &'static AmbiCoeffs {
    match scaling {
        sf_core::AmbiScaling::N3D => &FROM_N3D,
        sf_core::AmbiScaling::SN3D => &FROM_SN3D,
        sf_core::AmbiScaling::FuMa => &FROM_FUMA_SCALE,
        sf_core::AmbiScaling::Uhj => &FROM_UHJ,
    }
}

/// Ambisonic order of each ACN channel.
pub const ORDER_FROM_CHANNEL: [u8; MAX_AMBI_CHANNELS] = [
    0, 1, 1, 1, 2, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 4,
];

/// Ambisonic order of each 2D channel slot.
pub const ORDER_FROM_2D_CHANNEL: [u8; MAX_AMBI2D_CHANNELS] = [0, 1, 1, 2, 2, 3, 3, 4, 4];

/// Real spherical harmonic coefficients (ACN order, N3D normalization) in
/// the ambisonic frame: x forward, y left, z up.
pub fn sh_coeffs(ax: f32, ay: f32, az: f32) -> AmbiCoeffs {
    let (x, y, z) = (ax, ay, az);
    let mut c = [0.0f32; MAX_AMBI_CHANNELS];
    // Zeroth-order
    c[0] = 1.0;
    // First-order
    c[1] = 1.732050808 * y;
    c[2] = 1.732050808 * z;
    c[3] = 1.732050808 * x;
    // Second-order
    c[4] = 3.872983346 * x * y;
    c[5] = 3.872983346 * y * z;
    c[6] = 1.118033989 * (3.0 * z * z - 1.0);
    c[7] = 3.872983346 * x * z;
    c[8] = 1.936491673 * (x * x - y * y);
    // Third-order
    c[9] = 2.091650066 * y * (3.0 * x * x - y * y);
    c[10] = 10.246950766 * z * x * y;
    c[11] = 1.620185175 * y * (5.0 * z * z - 1.0);
    c[12] = 1.322875656 * z * (5.0 * z * z - 3.0);
    c[13] = 1.620185175 * x * (5.0 * z * z - 1.0);
    c[14] = 5.123475383 * z * (x * x - y * y);
    c[15] = 2.091650066 * x * (x * x - 3.0 * y * y);
    // Fourth-order
    c[16] = 8.874119675 * x * y * (x * x - y * y);
    c[17] = 6.274950199 * y * z * (3.0 * x * x - y * y);
    c[18] = 3.354101966 * x * y * (7.0 * z * z - 1.0);
    c[19] = 2.371708245 * y * z * (7.0 * z * z - 3.0);
    c[20] = 0.375 * (z * z * (35.0 * z * z - 30.0) + 3.0);
    c[21] = 2.371708245 * x * z * (7.0 * z * z - 3.0);
    c[22] = 1.677050983 * (x * x - y * y) * (7.0 * z * z - 1.0);
    c[23] = 6.274950199 * x * z * (x * x - 3.0 * y * y);
    c[24] = 2.218529919 * (x * x * (x * x - 3.0 * y * y) - y * y * (3.0 * x * x - y * y));
    c
}

// ─── HF order scales ────────────────────────────────────────────────────

/// HF gains of a 32-point reference speaker array at each decode order.
/// The ratio between rows gives the shelf scaling that makes a low-order
/// signal decode correctly through a higher-order decoder.
const HF_SCALES: [[f32; MAX_AMBI_ORDER + 1]; MAX_AMBI_ORDER + 1] = [
    [4.000000000, 2.309401077, 1.192569588, 0.718949585, 0.478448274],
    [4.000000000, 2.309401077, 1.192569588, 0.718949585, 0.478448274],
    [2.981423970, 2.309401077, 1.192569588, 0.718949585, 0.478448274],
    [2.359168820, 2.031565936, 1.444598386, 0.718949585, 0.478448274],
    [1.947005434, 1.764337084, 1.424707344, 0.975510413, 0.478448274],
];

/// Same, from a 10-point horizontal-only array, for 2D mixing devices.
const HF_SCALES_2D: [[f32; MAX_AMBI_ORDER + 1]; MAX_AMBI_ORDER + 1] = [
    [2.236067977, 1.581138830, 0.912870929, 0.605075635, 0.437016024],
    [2.236067977, 1.581138830, 0.912870929, 0.605075635, 0.437016024],
    [1.825741858, 1.581138830, 0.912870929, 0.605075635, 0.437016024],
    [1.581138830, 1.460781803, 1.118033989, 0.605075635, 0.437016024],
    [1.414213562, 1.344997024, 1.144122806, 0.831253876, 0.437016024],
];

/// Per-order HF scale factors for mixing `src_order` content into a
/// `dev_order` bus.
pub fn hf_order_scales(
    src_order: usize,
    dev_order: usize,
    horizontal_only: bool,
) -> [f32; MAX_AMBI_ORDER + 1] {
    let scales = if horizontal_only { &HF_SCALES_2D } else { &HF_SCALES };
    let mut res = [0.0f32; MAX_AMBI_ORDER + 1];
    for (i, r) in res.iter_mut().enumerate() {
        *r = scales[src_order][i] / scales[dev_order][i];
    }
    res
}

// ─── Upsampler matrices ─────────────────────────────────────────────────

/// A first-order decode over a cube of speakers.
const FIRST_ORDER_DECODER: [[f32; 4]; 8] = [
    [0.125, 0.125, 0.125, 0.125],
    [0.125, 0.125, 0.125, -0.125],
    [0.125, -0.125, 0.125, 0.125],
    [0.125, -0.125, 0.125, -0.125],
    [0.125, 0.125, -0.125, 0.125],
    [0.125, 0.125, -0.125, -0.125],
    [0.125, -0.125, -0.125, 0.125],
    [0.125, -0.125, -0.125, -0.125],
];
/// The cube's directions (y, z, x), re-encoded at max order.
const FIRST_ORDER_ENCODER_DIRS: [[f32; 3]; 8] = {
    const P: f32 = 0.577350269; // 1/sqrt(3)
    [
        [P, P, P],
        [P, P, -P],
        [-P, P, P],
        [-P, P, -P],
        [P, -P, P],
        [P, -P, -P],
        [-P, -P, P],
        [-P, -P, -P],
    ]
};

const FIRST_ORDER_2D_DECODER: [[f32; 4]; 6] = [
    [0.166666667, -0.096225045, 0.0, 0.166666667],
    [0.166666667, -0.192450090, 0.0, 0.000000000],
    [0.166666667, -0.096225045, 0.0, -0.166666667],
    [0.166666667, 0.096225045, 0.0, -0.166666667],
    [0.166666667, 0.192450090, 0.0, 0.000000000],
    [0.166666667, 0.096225045, 0.0, 0.166666667],
];
const FIRST_ORDER_2D_ENCODER_DIRS: [[f32; 3]; 6] = [
    [-0.50000000000, 0.0, 0.86602540379],
    [-1.00000000000, 0.0, 0.00000000000],
    [-0.50000000000, 0.0, -0.86602540379],
    [0.50000000000, 0.0, -0.86602540379],
    [1.00000000000, 0.0, 0.00000000000],
    [0.50000000000, 0.0, 0.86602540379],
];

/// Second-order decode over an icosahedral array.
const SECOND_ORDER_DECODER: [[f32; 9]; 12] = [
    [0.083333333, 0.000000000, -0.075882750, 0.122780868, 0.000000000, 0.000000000, -0.015915250, -0.144337567, 0.116771545],
    [0.083333333, -0.122780868, 0.000000000, 0.075882750, -0.144337567, 0.000000000, -0.093169499, 0.000000000, -0.072168784],
    [0.083333333, -0.075882750, 0.122780868, 0.000000000, 0.000000000, -0.144337567, 0.109084749, 0.000000000, -0.044602761],
    [0.083333333, 0.000000000, 0.075882750, 0.122780868, 0.000000000, 0.000000000, -0.015915250, 0.144337567, 0.116771545],
    [0.083333333, -0.122780868, 0.000000000, -0.075882750, 0.144337567, 0.000000000, -0.093169499, 0.000000000, -0.072168784],
    [0.083333333, 0.075882750, -0.122780868, 0.000000000, 0.000000000, -0.144337567, 0.109084749, 0.000000000, -0.044602761],
    [0.083333333, 0.000000000, -0.075882750, -0.122780868, 0.000000000, 0.000000000, -0.015915250, 0.144337567, 0.116771545],
    [0.083333333, 0.122780868, 0.000000000, -0.075882750, -0.144337567, 0.000000000, -0.093169499, 0.000000000, -0.072168784],
    [0.083333333, 0.075882750, 0.122780868, 0.000000000, 0.000000000, 0.144337567, 0.109084749, 0.000000000, -0.044602761],
    [0.083333333, 0.000000000, 0.075882750, -0.122780868, 0.000000000, 0.000000000, -0.015915250, -0.144337567, 0.116771545],
    [0.083333333, 0.122780868, 0.000000000, 0.075882750, 0.144337567, 0.000000000, -0.093169499, 0.000000000, -0.072168784],
    [0.083333333, -0.075882750, -0.122780868, 0.000000000, 0.000000000, 0.144337567, 0.109084749, 0.000000000, -0.044602761],
];
const SECOND_ORDER_ENCODER_DIRS: [[f32; 3]; 12] = [
    [0.000000000, -0.525731112, 0.850650808],
    [-0.850650808, 0.000000000, 0.525731112],
    [-0.525731112, 0.850650808, 0.000000000],
    [0.000000000, 0.525731112, 0.850650808],
    [-0.850650808, 0.000000000, -0.525731112],
    [0.525731112, -0.850650808, 0.000000000],
    [0.000000000, -0.525731112, -0.850650808],
    [0.850650808, 0.000000000, -0.525731112],
    [0.525731112, 0.850650808, 0.000000000],
    [0.000000000, 0.525731112, -0.850650808],
    [0.850650808, 0.000000000, 0.525731112],
    [-0.525731112, -0.850650808, 0.000000000],
];

const SECOND_ORDER_2D_DECODER: [[f32; 9]; 6] = [
    [0.166666667, -0.096225045, 0.0, 0.166666667, -0.149071198, 0.0, 0.0, 0.0, 0.086066297],
    [0.166666667, -0.192450090, 0.0, 0.000000000, 0.000000000, 0.0, 0.0, 0.0, -0.172132593],
    [0.166666667, -0.096225045, 0.0, -0.166666667, 0.149071198, 0.0, 0.0, 0.0, 0.086066297],
    [0.166666667, 0.096225045, 0.0, -0.166666667, -0.149071198, 0.0, 0.0, 0.0, 0.086066297],
    [0.166666667, 0.192450090, 0.0, 0.000000000, 0.000000000, 0.0, 0.0, 0.0, -0.172132593],
    [0.166666667, 0.096225045, 0.0, 0.166666667, 0.149071198, 0.0, 0.0, 0.0, 0.086066297],
];
const SECOND_ORDER_2D_ENCODER_DIRS: [[f32; 3]; 6] = FIRST_ORDER_2D_ENCODER_DIRS;

/// Third-order decode over a pentakis-dodecahedral array.
const THIRD_ORDER_DECODER: [[f32; 16]; 20] = [
    [0.050000000, 0.030901699, 0.080901699, 0.000000000, 0.000000000, 0.064549722, 0.090450850, 0.000000000, -0.012327900, -0.125611822, 0.000000000, 0.112611206, 0.079443892, 0.000000000, 0.024211515, 0.000000000],
    [0.050000000, -0.030901699, 0.080901699, 0.000000000, 0.000000000, -0.064549722, 0.090450850, 0.000000000, -0.012327900, 0.125611822, 0.000000000, -0.112611206, 0.079443892, 0.000000000, 0.024211515, 0.000000000],
    [0.050000000, 0.030901699, -0.080901699, 0.000000000, 0.000000000, -0.064549722, 0.090450850, 0.000000000, -0.012327900, -0.125611822, 0.000000000, 0.112611206, -0.079443892, 0.000000000, -0.024211515, 0.000000000],
    [0.050000000, -0.030901699, -0.080901699, 0.000000000, 0.000000000, 0.064549722, 0.090450850, 0.000000000, -0.012327900, 0.125611822, 0.000000000, -0.112611206, -0.079443892, 0.000000000, -0.024211515, 0.000000000],
    [0.050000000, 0.080901699, 0.000000000, 0.030901699, 0.064549722, 0.000000000, -0.055901699, 0.000000000, -0.072168784, -0.077632375, 0.000000000, -0.029508366, 0.000000000, -0.149775925, 0.000000000, -0.077632375],
    [0.050000000, 0.080901699, 0.000000000, -0.030901699, -0.064549722, 0.000000000, -0.055901699, 0.000000000, -0.072168784, -0.077632375, 0.000000000, -0.029508366, 0.000000000, 0.149775925, 0.000000000, 0.077632375],
    [0.050000000, -0.080901699, 0.000000000, 0.030901699, -0.064549722, 0.000000000, -0.055901699, 0.000000000, -0.072168784, 0.077632375, 0.000000000, 0.029508366, 0.000000000, -0.149775925, 0.000000000, -0.077632375],
    [0.050000000, -0.080901699, 0.000000000, -0.030901699, 0.064549722, 0.000000000, -0.055901699, 0.000000000, -0.072168784, 0.077632375, 0.000000000, 0.029508366, 0.000000000, 0.149775925, 0.000000000, 0.077632375],
    [0.050000000, 0.000000000, 0.030901699, 0.080901699, 0.000000000, 0.000000000, -0.034549150, 0.064549722, 0.084496684, 0.000000000, 0.000000000, 0.000000000, 0.030344866, -0.067790133, 0.165948192, 0.047979447],
    [0.050000000, 0.000000000, 0.030901699, -0.080901699, 0.000000000, 0.000000000, -0.034549150, -0.064549722, 0.084496684, 0.000000000, 0.000000000, 0.000000000, 0.030344866, 0.067790133, 0.165948192, -0.047979447],
    [0.050000000, 0.000000000, -0.030901699, 0.080901699, 0.000000000, 0.000000000, -0.034549150, -0.064549722, 0.084496684, 0.000000000, 0.000000000, 0.000000000, -0.030344866, -0.067790133, -0.165948192, 0.047979447],
    [0.050000000, 0.000000000, -0.030901699, -0.080901699, 0.000000000, 0.000000000, -0.034549150, 0.064549722, 0.084496684, 0.000000000, 0.000000000, 0.000000000, -0.030344866, 0.067790133, -0.165948192, -0.047979447],
    [0.050000000, 0.050000000, 0.050000000, 0.050000000, 0.064549722, 0.064549722, 0.000000000, 0.064549722, 0.000000000, 0.101622099, 0.063386569, -0.010926006, -0.073648538, 0.101126676, -0.070868339, -0.014826464],
    [0.050000000, 0.050000000, 0.050000000, -0.050000000, -0.064549722, 0.064549722, 0.000000000, -0.064549722, 0.000000000, 0.101622099, -0.063386569, -0.010926006, -0.073648538, -0.101126676, -0.070868339, 0.014826464],
    [0.050000000, -0.050000000, 0.050000000, 0.050000000, -0.064549722, -0.064549722, 0.000000000, 0.064549722, 0.000000000, -0.101622099, -0.063386569, 0.010926006, -0.073648538, 0.101126676, -0.070868339, -0.014826464],
    [0.050000000, -0.050000000, 0.050000000, -0.050000000, 0.064549722, -0.064549722, 0.000000000, -0.064549722, 0.000000000, -0.101622099, 0.063386569, 0.010926006, -0.073648538, -0.101126676, -0.070868339, 0.014826464],
    [0.050000000, 0.050000000, -0.050000000, 0.050000000, 0.064549722, -0.064549722, 0.000000000, -0.064549722, 0.000000000, 0.101622099, -0.063386569, -0.010926006, 0.073648538, 0.101126676, 0.070868339, -0.014826464],
    [0.050000000, 0.050000000, -0.050000000, -0.050000000, -0.064549722, -0.064549722, 0.000000000, 0.064549722, 0.000000000, 0.101622099, 0.063386569, -0.010926006, 0.073648538, -0.101126676, 0.070868339, 0.014826464],
    [0.050000000, -0.050000000, -0.050000000, 0.050000000, -0.064549722, 0.064549722, 0.000000000, -0.064549722, 0.000000000, -0.101622099, 0.063386569, 0.010926006, 0.073648538, 0.101126676, 0.070868339, -0.014826464],
    [0.050000000, -0.050000000, -0.050000000, -0.050000000, 0.064549722, 0.064549722, 0.000000000, 0.064549722, 0.000000000, -0.101622099, -0.063386569, 0.010926006, 0.073648538, -0.101126676, 0.070868339, 0.014826464],
];
const THIRD_ORDER_ENCODER_DIRS: [[f32; 3]; 20] = {
    const P: f32 = 0.577350269;
    [
        [0.35682208976, 0.93417235897, 0.00000000000],
        [-0.35682208976, 0.93417235897, 0.00000000000],
        [0.35682208976, -0.93417235897, 0.00000000000],
        [-0.35682208976, -0.93417235897, 0.00000000000],
        [0.93417235897, 0.00000000000, 0.35682208976],
        [0.93417235897, 0.00000000000, -0.35682208976],
        [-0.93417235897, 0.00000000000, 0.35682208976],
        [-0.93417235897, 0.00000000000, -0.35682208976],
        [0.00000000000, 0.35682208976, 0.93417235897],
        [0.00000000000, 0.35682208976, -0.93417235897],
        [0.00000000000, -0.35682208976, 0.93417235897],
        [0.00000000000, -0.35682208976, -0.93417235897],
        [P, P, P],
        [P, P, -P],
        [-P, P, P],
        [-P, P, -P],
        [P, -P, P],
        [P, -P, -P],
        [-P, -P, P],
        [-P, -P, -P],
    ]
};

const THIRD_ORDER_2D_DECODER: [[f32; 16]; 8] = [
    [0.125000000, -0.055235596, 0.0, 0.133350524, -0.091287093, 0.0, 0.0, 0.0, 0.091287093, -0.110424725, 0.0, 0.0, 0.0, 0.0, 0.0, 0.045739419],
    [0.125000000, -0.133350524, 0.0, 0.055235596, -0.091287093, 0.0, 0.0, 0.0, -0.091287093, 0.045739419, 0.0, 0.0, 0.0, 0.0, 0.0, -0.110424725],
    [0.125000000, -0.133350524, 0.0, -0.055235596, 0.091287093, 0.0, 0.0, 0.0, -0.091287093, 0.045739419, 0.0, 0.0, 0.0, 0.0, 0.0, 0.110424725],
    [0.125000000, -0.055235596, 0.0, -0.133350524, 0.091287093, 0.0, 0.0, 0.0, 0.091287093, -0.110424725, 0.0, 0.0, 0.0, 0.0, 0.0, -0.045739419],
    [0.125000000, 0.055235596, 0.0, -0.133350524, -0.091287093, 0.0, 0.0, 0.0, 0.091287093, 0.110424725, 0.0, 0.0, 0.0, 0.0, 0.0, -0.045739419],
    [0.125000000, 0.133350524, 0.0, -0.055235596, -0.091287093, 0.0, 0.0, 0.0, -0.091287093, -0.045739419, 0.0, 0.0, 0.0, 0.0, 0.0, 0.110424725],
    [0.125000000, 0.133350524, 0.0, 0.055235596, 0.091287093, 0.0, 0.0, 0.0, -0.091287093, -0.045739419, 0.0, 0.0, 0.0, 0.0, 0.0, -0.110424725],
    [0.125000000, 0.055235596, 0.0, 0.133350524, 0.091287093, 0.0, 0.0, 0.0, 0.091287093, 0.110424725, 0.0, 0.0, 0.0, 0.0, 0.0, 0.045739419],
];
const THIRD_ORDER_2D_ENCODER_DIRS: [[f32; 3]; 8] = [
    [-0.38268343237, 0.0, 0.92387953251],
    [-0.92387953251, 0.0, 0.38268343237],
    [-0.92387953251, 0.0, -0.38268343237],
    [-0.38268343237, 0.0, -0.92387953251],
    [0.38268343237, 0.0, -0.92387953251],
    [0.92387953251, 0.0, -0.38268343237],
    [0.92387953251, 0.0, 0.38268343237],
    [0.38268343237, 0.0, 0.92387953251],
];

/// Horizontal-only fourth order over a decagon; there is no 3D
/// fourth-order upsampler since fourth order is the mixing maximum.
const FOURTH_ORDER_2D_DECODER: [[f32; 25]; 10] = [
    [0.100000000, 0.035682209, 0.0, 0.109818547, 0.060706200, 0.0, 0.0, 0.0, 0.083554916, 0.077356821, 0.0, 0.0, 0.0, 0.0, 0.0, 0.056203020, 0.085737543, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.027857816],
    [0.100000000, 0.093417236, 0.0, 0.067871595, 0.098224695, 0.0, 0.0, 0.0, -0.031915138, 0.029547676, 0.0, 0.0, 0.0, 0.0, 0.0, -0.090938397, -0.052988715, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.072932710],
    [0.100000000, 0.115470054, 0.0, 0.000000000, 0.000000000, 0.0, 0.0, 0.0, -0.103279556, -0.095618289, 0.0, 0.0, 0.0, 0.0, 0.0, 0.000000000, 0.000000000, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.090149787],
    [0.100000000, 0.093417236, 0.0, -0.067871595, -0.098224695, 0.0, 0.0, 0.0, -0.031915138, 0.029547676, 0.0, 0.0, 0.0, 0.0, 0.0, 0.090938397, 0.052988715, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.072932710],
    [0.100000000, 0.035682209, 0.0, -0.109818547, -0.060706200, 0.0, 0.0, 0.0, 0.083554916, 0.077356821, 0.0, 0.0, 0.0, 0.0, 0.0, -0.056203020, -0.085737543, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.027857816],
    [0.100000000, -0.035682209, 0.0, -0.109818547, 0.060706200, 0.0, 0.0, 0.0, 0.083554916, -0.077356821, 0.0, 0.0, 0.0, 0.0, 0.0, -0.056203020, 0.085737543, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.027857816],
    [0.100000000, -0.093417236, 0.0, -0.067871595, 0.098224695, 0.0, 0.0, 0.0, -0.031915138, -0.029547676, 0.0, 0.0, 0.0, 0.0, 0.0, 0.090938397, -0.052988715, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.072932710],
    [0.100000000, -0.115470054, 0.0, 0.000000000, 0.000000000, 0.0, 0.0, 0.0, -0.103279556, 0.095618289, 0.0, 0.0, 0.0, 0.0, 0.0, 0.000000000, 0.000000000, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.090149787],
    [0.100000000, -0.093417236, 0.0, 0.067871595, -0.098224695, 0.0, 0.0, 0.0, -0.031915138, -0.029547676, 0.0, 0.0, 0.0, 0.0, 0.0, -0.090938397, 0.052988715, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.072932710],
    [0.100000000, -0.035682209, 0.0, 0.109818547, -0.060706200, 0.0, 0.0, 0.0, 0.083554916, -0.077356821, 0.0, 0.0, 0.0, 0.0, 0.0, 0.056203020, -0.085737543, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.027857816],
];
const FOURTH_ORDER_2D_ENCODER_DIRS: [[f32; 3]; 10] = [
    [0.309016994, 0.0, 0.951056516],
    [0.809016994, 0.0, 0.587785252],
    [1.000000000, 0.0, 0.000000000],
    [0.809016994, 0.0, -0.587785252],
    [0.309016994, 0.0, -0.951056516],
    [-0.309016994, 0.0, -0.951056516],
    [-0.809016994, 0.0, -0.587785252],
    [-1.000000000, 0.0, 0.000000000],
    [-0.809016994, 0.0, 0.587785252],
    [-0.309016994, 0.0, 0.951056516],
];

/// Compose a decoder (rows per speaker, columns per input ACN) with the
/// max-order re-encode of the speaker directions. Directions are stored
/// (y, z, x) in the ambisonic frame.
fn calc_upsampler<const N: usize>(
    decoder: &[[f32; N]],
    dirs: &[[f32; 3]],
) -> Vec<AmbiCoeffs> {
    let encoder: Vec<AmbiCoeffs> =
        dirs.iter().map(|d| sh_coeffs(d[2], d[0], d[1])).collect();

    let mut res = vec![[0.0f32; MAX_AMBI_CHANNELS]; N];
    for (i, row) in res.iter_mut().enumerate() {
        for (j, out) in row.iter_mut().enumerate() {
            let mut sum = 0.0f64;
            for (k, dec) in decoder.iter().enumerate() {
                sum += dec[i] as f64 * encoder[k][j] as f64;
            }
            *out = sum as f32;
        }
    }
    res
}

pub static FIRST_ORDER_UP: Lazy<Vec<AmbiCoeffs>> =
    Lazy::new(|| calc_upsampler(&FIRST_ORDER_DECODER, &FIRST_ORDER_ENCODER_DIRS));
pub static FIRST_ORDER_2D_UP: Lazy<Vec<AmbiCoeffs>> =
    Lazy::new(|| calc_upsampler(&FIRST_ORDER_2D_DECODER, &FIRST_ORDER_2D_ENCODER_DIRS));
pub static SECOND_ORDER_UP: Lazy<Vec<AmbiCoeffs>> =
    Lazy::new(|| calc_upsampler(&SECOND_ORDER_DECODER, &SECOND_ORDER_ENCODER_DIRS));
pub static SECOND_ORDER_2D_UP: Lazy<Vec<AmbiCoeffs>> =
    Lazy::new(|| calc_upsampler(&SECOND_ORDER_2D_DECODER, &SECOND_ORDER_2D_ENCODER_DIRS));
pub static THIRD_ORDER_UP: Lazy<Vec<AmbiCoeffs>> =
    Lazy::new(|| calc_upsampler(&THIRD_ORDER_DECODER, &THIRD_ORDER_ENCODER_DIRS));
pub static THIRD_ORDER_2D_UP: Lazy<Vec<AmbiCoeffs>> =
    Lazy::new(|| calc_upsampler(&THIRD_ORDER_2D_DECODER, &THIRD_ORDER_2D_ENCODER_DIRS));
pub static FOURTH_ORDER_2D_UP: Lazy<Vec<AmbiCoeffs>> =
    Lazy::new(|| calc_upsampler(&FOURTH_ORDER_2D_DECODER, &FOURTH_ORDER_2D_ENCODER_DIRS));

/// Pick the upsampler for a voice's order and dimensionality.
pub fn upsampler_for(voice_order: usize, two_d: bool) -> &'static [AmbiCoeffs] {
    match (voice_order, two_d) {
        (1, false) => &FIRST_ORDER_UP,
        (1, true) => &FIRST_ORDER_2D_UP,
        (2, false) => &SECOND_ORDER_UP,
        (2, true) => &SECOND_ORDER_2D_UP,
        (3, false) => &THIRD_ORDER_UP,
        (3, true) => &THIRD_ORDER_2D_UP,
        _ => &FOURTH_ORDER_2D_UP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh_front_direction() {
        // Ambisonic +X is front: W constant, X channel at full first-order
        // weight, Y and Z silent.
        let c = sh_coeffs(1.0, 0.0, 0.0);
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert!((c[3] - 1.732050808).abs() < 1e-5);
        assert!(c[1].abs() < 1e-6 && c[2].abs() < 1e-6);
    }

    #[test]
    fn test_sh_pole_values() {
        // At the pole only the m=0 channels are non-zero, at sqrt(2l+1).
        let c = sh_coeffs(0.0, 0.0, 1.0);
        assert!((c[2] - 3.0f32.sqrt()).abs() < 1e-5);
        assert!((c[6] - 5.0f32.sqrt()).abs() < 1e-5);
        assert!((c[12] - 7.0f32.sqrt()).abs() < 1e-5);
        assert!((c[20] - 3.0).abs() < 1e-5);
        for acn in [1, 3, 4, 5, 7, 8, 9, 16, 24] {
            assert!(c[acn].abs() < 1e-5, "ACN {acn} = {}", c[acn]);
        }
    }

    #[test]
    fn test_fuma_map_roundtrip() {
        // Every ACN channel appears exactly once in the FuMa map.
        let mut seen = [false; MAX_AMBI_CHANNELS];
        for &acn in FROM_FUMA.iter() {
            assert!(!seen[acn as usize]);
            seen[acn as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_upsampler_w_preservation() {
        // Upsampling preserves the omnidirectional component: row 0 of the
        // first-order upsampler should be ~[1, 0, 0, 0, ...].
        let up = &FIRST_ORDER_UP;
        assert!((up[0][0] - 1.0).abs() < 1e-4, "W->W was {}", up[0][0]);
        for j in 1..4 {
            assert!(up[0][j].abs() < 1e-4);
        }
    }

    #[test]
    fn test_upsampler_first_order_identity() {
        // Within the first-order block the upsampler is near-identity.
        let up = &FIRST_ORDER_UP;
        for i in 0..4 {
            for j in 0..4 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (up[i][j] - expect).abs() < 0.05,
                    "up[{i}][{j}] = {}",
                    up[i][j]
                );
            }
        }
    }

    #[test]
    fn test_hf_order_scales_identity() {
        let scales = hf_order_scales(2, 2, false);
        for s in scales {
            assert!((s - 1.0).abs() < 1e-6);
        }
        let up = hf_order_scales(1, 3, false);
        assert!(up[0] > 1.0, "low orders gain HF energy when upsampled");
    }
}
