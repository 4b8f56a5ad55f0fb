//! Error types shared across the engine crates

use thiserror::Error;

/// Errors raised while configuring or opening the mixing core.
///
/// The render path itself never returns errors; everything here comes from
/// setup and control-thread calls.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported ambisonic order {0} (max {max})", max = crate::MAX_AMBI_ORDER)]
    AmbiOrder(usize),

    #[error("invalid resampler name: {0}")]
    Resampler(String),

    #[error("send index {0} out of range (device offers {1})")]
    SendIndex(usize, usize),

    #[error("buffer loop bounds invalid: start {start} >= end {end}")]
    LoopBounds { start: usize, end: usize },

    #[error("effect slot target would create a cycle")]
    SlotCycle,

    #[error("device has no channel {0:?}")]
    MissingChannel(crate::Channel),
}
