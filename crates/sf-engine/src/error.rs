//! Engine-level errors

use thiserror::Error;

/// Errors raised while opening or configuring the mixing engine. The
/// render path itself is infallible by construction; everything here
/// comes from `Device` setup and the control-thread publication surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A shared-type validation failed (formats, orders, graph rules).
    #[error(transparent)]
    Core(#[from] sf_core::CoreError),

    #[error("invalid device sample rate {0}")]
    SampleRate(u32),
}
