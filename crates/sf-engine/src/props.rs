//! Property objects published from control threads
//!
//! Each updatable object (voice, context, effect slot) receives a fully
//! populated property struct through its atomic update slot. The mixer
//! copies what it needs during parameter recomputation; the carcass is
//! recycled. Nothing here is read while being written.

use sf_core::{DistanceModel, SpatializeMode, MAX_SEND_COUNT};
use sf_dsp::Resampler;

use crate::slot::{EffectProps, EffectState};

/// How a multichannel voice maps to outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectMode {
    /// Normal panning.
    #[default]
    Off,
    /// Write inputs to name-matched outputs, dropping mismatches.
    DropMismatch,
    /// Write inputs to name-matched outputs, folding mismatches through
    /// the device remix map.
    RemixMismatch,
}

/// Gain and filter settings of the direct path.
#[derive(Debug, Clone, Copy)]
pub struct DirectPathProps {
    pub gain: f32,
    pub gain_hf: f32,
    pub gain_lf: f32,
    pub hf_reference: f32,
    pub lf_reference: f32,
}

impl Default for DirectPathProps {
    fn default() -> Self {
        Self {
            gain: 1.0,
            gain_hf: 1.0,
            gain_lf: 1.0,
            hf_reference: 5000.0,
            lf_reference: 250.0,
        }
    }
}

/// Per-send settings: target slot (by index) plus gains and filters.
#[derive(Debug, Clone, Copy)]
pub struct SendPathProps {
    pub slot: Option<usize>,
    pub gain: f32,
    pub gain_hf: f32,
    pub gain_lf: f32,
    pub hf_reference: f32,
    pub lf_reference: f32,
    /// Added to the target slot's own room rolloff for the wet distance
    /// attenuation.
    pub room_rolloff_factor: f32,
}

impl Default for SendPathProps {
    fn default() -> Self {
        Self {
            slot: None,
            gain: 1.0,
            gain_hf: 1.0,
            gain_lf: 1.0,
            hf_reference: 5000.0,
            lf_reference: 250.0,
            room_rolloff_factor: 0.0,
        }
    }
}

/// Everything a control thread can set on a voice.
#[derive(Debug, Clone)]
pub struct VoiceProps {
    pub pitch: f32,
    pub gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,

    pub direct: DirectPathProps,
    pub send: [SendPathProps; MAX_SEND_COUNT],

    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub direction: [f32; 3],
    pub orient_at: [f32; 3],
    pub orient_up: [f32; 3],

    pub inner_angle: f32,
    pub outer_angle: f32,
    pub outer_gain: f32,
    pub outer_gain_hf: f32,

    pub ref_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
    pub radius: f32,

    /// Left/right bias for mono-as-stereo voices, in [-1, +1].
    pub panning: f32,
    /// Per-channel stereo re-aim angles, counter-clockwise radians.
    pub stereo_pan: [f32; 2],

    pub doppler_factor: f32,
    pub air_absorption_factor: f32,

    pub head_relative: bool,
    pub dry_gain_hf_auto: bool,
    pub wet_gain_auto: bool,
    pub wet_gain_hf_auto: bool,

    pub direct_channels: DirectMode,
    pub spatialize_mode: SpatializeMode,
    pub distance_model: DistanceModel,
    pub resampler: Resampler,
    pub panning_enabled: bool,
    /// SuperStereo width.
    pub enh_width: f32,
}

impl Default for VoiceProps {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            direct: DirectPathProps::default(),
            send: [SendPathProps::default(); MAX_SEND_COUNT],
            position: [0.0; 3],
            velocity: [0.0; 3],
            direction: [0.0; 3],
            orient_at: [0.0, 0.0, -1.0],
            orient_up: [0.0, 1.0, 0.0],
            inner_angle: 360.0,
            outer_angle: 360.0,
            outer_gain: 0.0,
            outer_gain_hf: 1.0,
            ref_distance: 1.0,
            max_distance: f32::MAX,
            rolloff_factor: 1.0,
            radius: 0.0,
            panning: 0.0,
            stereo_pan: [std::f32::consts::FRAC_PI_6, -std::f32::consts::FRAC_PI_6],
            doppler_factor: 1.0,
            air_absorption_factor: 0.0,
            head_relative: false,
            dry_gain_hf_auto: true,
            wet_gain_auto: true,
            wet_gain_hf_auto: true,
            direct_channels: DirectMode::Off,
            spatialize_mode: SpatializeMode::Auto,
            distance_model: DistanceModel::InverseClamped,
            resampler: Resampler::default(),
            panning_enabled: true,
            enh_width: 0.593,
        }
    }
}

/// Listener and global state published per context.
#[derive(Debug, Clone)]
pub struct ContextProps {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub orient_at: [f32; 3],
    pub orient_up: [f32; 3],
    pub gain: f32,
    pub meters_per_unit: f32,
    pub air_absorption_gain_hf: f32,
    pub doppler_factor: f32,
    pub doppler_velocity: f32,
    pub speed_of_sound: f32,
    /// Use each source's own distance model instead of the context's.
    pub source_distance_model: bool,
    pub distance_model: DistanceModel,
}

impl Default for ContextProps {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            velocity: [0.0; 3],
            orient_at: [0.0, 0.0, -1.0],
            orient_up: [0.0, 1.0, 0.0],
            gain: 1.0,
            meters_per_unit: 1.0,
            air_absorption_gain_hf: sf_core::AIR_ABSORB_GAIN_HF,
            doppler_factor: 1.0,
            doppler_velocity: 1.0,
            speed_of_sound: sf_core::SPEED_OF_SOUND_METERS_PER_SEC,
            source_distance_model: false,
            distance_model: DistanceModel::InverseClamped,
        }
    }
}

/// Effect-slot settings, including the replacement effect state. The old
/// state rides back out through the async release event.
pub struct EffectSlotProps {
    pub gain: f32,
    pub aux_send_auto: bool,
    pub target: Option<usize>,
    pub props: EffectProps,
    pub state: Option<Box<dyn EffectState>>,
}

impl Default for EffectSlotProps {
    fn default() -> Self {
        Self {
            gain: 1.0,
            aux_send_auto: true,
            target: None,
            props: EffectProps::None,
            state: None,
        }
    }
}
