//! sf-spatial: soundfield math for the Soundfield engine
//!
//! - `position` - listener-space vectors and rotation bases
//! - `ambidefs` - channel orderings, normalization scales, spherical
//!   harmonic encoding, order-upsampling matrices
//! - `rotator` - recursive higher-order rotation matrices
//! - `panning` - direction coefficients, spread coverage, pan-gain
//!   application, pairwise azimuth warps
//! - `hrtf` - HRIR storage, direction lookup, convolution mixers
//! - `decoder` - B-Format to speaker-feed decoding

pub mod ambidefs;
pub mod decoder;
pub mod error;
pub mod hrtf;
pub mod panning;
pub mod position;
pub mod rotator;

pub use ambidefs::{AmbiChanMap, AmbiCoeffs};
pub use decoder::BFormatDec;
pub use error::SpatialError;
pub use hrtf::{HrtfFilter, HrtfStore, MixHrtfFilter, HRIR_LENGTH, HRTF_HISTORY_LENGTH};
pub use panning::{calc_direction_coeffs, compute_pan_gains};
pub use position::{Mat3, Vec3};
pub use rotator::{ambi_rotator, AmbiRotateMatrix};
