//! Device and rendering configuration

use serde::{Deserialize, Serialize};

use crate::channels::DeviceChannels;
use crate::format::DevFmtType;

/// Distance attenuation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceModel {
    Disable,
    Inverse,
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
}

impl Default for DistanceModel {
    fn default() -> Self {
        DistanceModel::InverseClamped
    }
}

/// How the dry mix reaches the physical outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    /// Ambisonic mix decoded to the speaker layout.
    Normal,
    /// Stereo pair panning with front-arc widening.
    Pairwise,
    /// Binaural rendering through the HRTF state.
    Hrtf,
}

/// Per-source spatialization override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatializeMode {
    Off,
    On,
    /// Spatialize only mono sources.
    Auto,
}

/// Stereo output encodings selectable at device open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StereoEncoding {
    Basic,
    Uhj,
    Crossfeed,
    Hrtf,
}

/// Quality of the UHJ encode/decode filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UhjQuality {
    Iir,
    Fir256,
    Fir512,
}

impl Default for UhjQuality {
    fn default() -> Self {
        UhjQuality::Iir
    }
}

/// Everything needed to open a mixing device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Physical channel layout.
    pub channels: DeviceChannels,
    /// Output sample type.
    pub sample_type: DevFmtType,
    /// Ambisonic order of the dry bus.
    pub ambi_order: usize,
    /// Mix horizontal-only B-Format (height channels dropped).
    pub horizontal_only: bool,
    /// Render mode for the final decode.
    pub render_mode: RenderMode,
    /// Stereo encoding, when `channels` is Stereo.
    pub stereo_encoding: StereoEncoding,
    /// Number of auxiliary sends offered to voices.
    pub num_aux_sends: usize,
    /// Dither quantization depth as a scale (0 disables).
    pub dither_depth_bits: u32,
    /// Average speaker distance in meters; 0 disables NFC.
    pub avg_speaker_dist: f32,
    /// UHJ filter quality for encode and voice decode.
    pub uhj_quality: UhjQuality,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: DeviceChannels::Stereo,
            sample_type: DevFmtType::F32,
            ambi_order: 1,
            horizontal_only: false,
            render_mode: RenderMode::Normal,
            stereo_encoding: StereoEncoding::Basic,
            num_aux_sends: 2,
            dither_depth_bits: 0,
            avg_speaker_dist: 0.0,
            uhj_quality: UhjQuality::Iir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.sample_rate, 48_000);
        assert!(cfg.num_aux_sends <= crate::MAX_SEND_COUNT);
    }
}
