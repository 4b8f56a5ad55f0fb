//! sf-core: shared types for the Soundfield spatial audio engine
//!
//! Leaf crate holding the sample/channel/format vocabulary and the fixed
//! mixer constants everything else is sized by. No DSP lives here.

pub mod channels;
pub mod config;
pub mod error;
pub mod format;

pub use channels::{Channel, DeviceChannels, InputRemixMap, INVALID_CHANNEL_INDEX};
pub use config::{
    DeviceConfig, DistanceModel, RenderMode, SpatializeMode, StereoEncoding, UhjQuality,
};
pub use error::CoreError;
pub use format::{AmbiLayout, AmbiScaling, DevFmtType, FmtChannels, FmtType, SampleData};

/// Mixing sample type. All buses and voice pipelines mix in 32-bit float.
pub type Sample = f32;

/// Fractional bits of the fixed-point resampler step.
pub const MIXER_FRAC_BITS: u32 = 12;
/// One, in 1.MIXER_FRAC_BITS fixed point.
pub const MIXER_FRAC_ONE: u32 = 1 << MIXER_FRAC_BITS;
/// Mask covering the fractional bits.
pub const MIXER_FRAC_MASK: u32 = MIXER_FRAC_ONE - 1;
/// Half of one, in fixed point.
pub const MIXER_FRAC_HALF: u32 = MIXER_FRAC_ONE >> 1;

/// Maximum pitch multiplier a voice can step by.
pub const MAX_PITCH: u32 = 255;

/// Number of samples in a mixing bus line. Must stay a multiple of 4 and
/// satisfy the pitch overflow invariants asserted below.
pub const BUFFER_LINE_SIZE: usize = 1024;

/// One mixing bus line.
pub type BufferLine = [Sample; BUFFER_LINE_SIZE];

/// Total resampler history a voice keeps per channel.
pub const MAX_RESAMPLER_PADDING: usize = 48;
/// Half the padding: the leading edge a resample kernel may read behind.
pub const MAX_RESAMPLER_EDGE: usize = MAX_RESAMPLER_PADDING / 2;

/// Highest supported ambisonic order.
pub const MAX_AMBI_ORDER: usize = 4;
/// Channel count of a full 3D mix at `MAX_AMBI_ORDER`.
pub const MAX_AMBI_CHANNELS: usize = (MAX_AMBI_ORDER + 1) * (MAX_AMBI_ORDER + 1);
/// Channel count of a horizontal-only mix at `MAX_AMBI_ORDER`.
pub const MAX_AMBI2D_CHANNELS: usize = MAX_AMBI_ORDER * 2 + 1;

/// Number of addressable output channels (named + aux).
pub const MAX_OUTPUT_CHANNELS: usize = 32;

/// Maximum auxiliary sends per voice.
pub const MAX_SEND_COUNT: usize = 6;

/// Most buffer channels a single voice will mix.
pub const MIXER_CHANNELS_MAX: usize = 16;

/// Upper clamp applied to every computed mixing gain.
pub const GAIN_MIX_MAX: f32 = 16.0;
/// Gains below this never mix audibly and may be skipped.
pub const GAIN_SILENCE_THRESHOLD: f32 = 0.00001;

/// Speed of sound in air, meters per second, for NFC and doppler defaults.
pub const SPEED_OF_SOUND_METERS_PER_SEC: f32 = 343.3;
/// Default air absorption gain at the HF reference.
pub const AIR_ABSORB_GAIN_HF: f32 = 0.99426;
/// Target gain a reverb decays to after its decay time (-60 dB).
pub const REVERB_DECAY_GAIN: f32 = 0.001;

/// Length of a voice channel's inter-block sample history.
pub type HistoryLine = [Sample; MAX_RESAMPLER_PADDING];

const _: () = assert!(BUFFER_LINE_SIZE % 4 == 0, "BufferLine must be a multiple of 4");
const _: () = assert!(MAX_RESAMPLER_PADDING % 2 == 0 && MAX_RESAMPLER_PADDING % 4 == 0);
const _: () = assert!(MAX_RESAMPLER_EDGE % 4 == 0);
const _: () = assert!((BUFFER_LINE_SIZE - 1) / MAX_PITCH as usize > 0,
    "MAX_PITCH too large for BUFFER_LINE_SIZE");
const _: () = assert!((i32::MAX as usize >> MIXER_FRAC_BITS) / MAX_PITCH as usize
    > BUFFER_LINE_SIZE, "pitch stepping would overflow the fixed-point position");

/// Number of ambisonic channels for a 3D mix of the given order.
#[inline]
pub const fn ambi_channels_from_order(order: usize) -> usize {
    (order + 1) * (order + 1)
}

/// Number of ambisonic channels for a 2D (horizontal-only) mix of the
/// given order.
#[inline]
pub const fn ambi2d_channels_from_order(order: usize) -> usize {
    order * 2 + 1
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambi_channel_counts() {
        assert_eq!(ambi_channels_from_order(1), 4);
        assert_eq!(ambi_channels_from_order(4), MAX_AMBI_CHANNELS);
        assert_eq!(ambi2d_channels_from_order(4), MAX_AMBI2D_CHANNELS);
    }

    #[test]
    fn test_frac_constants() {
        assert_eq!(MIXER_FRAC_ONE, 4096);
        assert_eq!(MIXER_FRAC_MASK, 0xFFF);
    }
}
