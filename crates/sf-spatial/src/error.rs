//! Spatial processing errors

use thiserror::Error;

use crate::hrtf::HRIR_LENGTH;

/// Errors from constructing spatial processing state. The render-path
/// functions themselves are infallible.
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("HRTF fields must be ordered far to near")]
    HrtfFieldOrder,

    #[error("HRTF field holds no impulse responses")]
    HrtfEmptyField,

    #[error("HRTF IR size {0} exceeds the {HRIR_LENGTH}-tap window")]
    HrtfIrLength(usize),
}
