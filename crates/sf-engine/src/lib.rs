//! sf-engine: the real-time mixing core of Soundfield
//!
//! Produces blocks of output PCM from any number of 3D-positioned voices:
//! per-voice resampling, filtering and panning; per-context listener
//! parameter recomputation; auxiliary effect slots run in dependency
//! order; ambisonic/HRTF/UHJ/crossfeed post-processing; and a fully
//! lock-free control/mixer hand-off.
//!
//! Threading: exactly one mixer thread calls [`Device::render_samples`];
//! control threads publish property objects, queue voice changes, and
//! drain the async event channel. The mixer never blocks, allocates
//! unboundedly, or frees control-owned state.

pub mod buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod lockfree;
pub mod mix;
pub mod params;
pub mod props;
pub mod ring;
pub mod slot;
pub mod voice;

pub use buffer::{BufferCallback, VoiceBufferItem};
pub use context::{Context, ContextParams, ContextShared, VChangeState, VoiceChangeQueue};
pub use device::{Device, DistanceComp, GainLimiter, Limiter, OutputBuffer, VoicePrepareInfo};
pub use error::EngineError;
pub use events::{AsyncEvent, AsyncSrcState, EventChannel};
pub use props::{ContextProps, DirectMode, EffectSlotProps, VoiceProps};
pub use slot::{EffectProps, EffectSlot, EffectState, EffectTarget, ReverbProps};
pub use voice::{PlayState, Voice, VoiceShared};

use once_cell::sync::OnceCell;

/// Environment switch that halves cone angles, kept for compatibility
/// with content authored against the half-angle behavior.
const HALF_ANGLE_CONES_ENV: &str = "__ALSOFT_HALF_ANGLE_CONES";

/// Axis-flip compatibility flags applied to source positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompatFlags {
    pub reverse_x: bool,
    pub reverse_y: bool,
    pub reverse_z: bool,
}

#[derive(Debug, Clone, Copy)]
struct EngineGlobals {
    cone_scale: f32,
    x_scale: f32,
    y_scale: f32,
    z_scale: f32,
    nfc_scale: f32,
}

impl Default for EngineGlobals {
    fn default() -> Self {
        Self {
            cone_scale: cone_scale_from_env(),
            x_scale: 1.0,
            y_scale: 1.0,
            z_scale: 1.0,
            nfc_scale: 1.0,
        }
    }
}

fn cone_scale_from_env() -> f32 {
    match std::env::var(HALF_ANGLE_CONES_ENV) {
        Ok(val) if val.eq_ignore_ascii_case("true") || val == "1" => 0.5,
        _ => 1.0,
    }
}

static GLOBALS: OnceCell<EngineGlobals> = OnceCell::new();

/// One-time engine initialization: compatibility axis flips and the NFC
/// distance scale. Later calls have no effect; rendering without calling
/// this uses the defaults.
pub fn init(flags: CompatFlags, nfc_scale: f32) {
    let _ = GLOBALS.set(EngineGlobals {
        cone_scale: cone_scale_from_env(),
        x_scale: if flags.reverse_x { -1.0 } else { 1.0 },
        y_scale: if flags.reverse_y { -1.0 } else { 1.0 },
        z_scale: if flags.reverse_z { -1.0 } else { 1.0 },
        nfc_scale: nfc_scale.clamp(0.0001, 10000.0),
    });
}

#[inline]
pub(crate) fn cone_scale() -> f32 {
    GLOBALS.get_or_init(EngineGlobals::default).cone_scale
}

#[inline]
pub(crate) fn axis_scales() -> (f32, f32, f32) {
    let g = GLOBALS.get_or_init(EngineGlobals::default);
    (g.x_scale, g.y_scale, g.z_scale)
}

#[inline]
pub(crate) fn nfc_scale() -> f32 {
    GLOBALS.get_or_init(EngineGlobals::default).nfc_scale
}

/// Resolve a configured resampler name. Unknown names log an error and
/// keep the default; deprecated aliases map to their replacements with a
/// warning.
pub fn resampler_from_config(name: &str) -> sf_dsp::Resampler {
    match name.to_ascii_lowercase().as_str() {
        "cubic" => log::warn!("resampler option \"{name}\" is deprecated, using spline"),
        "sinc4" | "sinc8" => {
            log::warn!("resampler option \"{name}\" is deprecated, using gaussian")
        }
        "bsinc" => log::warn!("resampler option \"{name}\" is deprecated, using bsinc12"),
        _ => {}
    }
    match sf_dsp::Resampler::from_name(name) {
        Ok(resampler) => resampler,
        Err(err) => {
            log::error!("{err}");
            sf_dsp::Resampler::default()
        }
    }
}
