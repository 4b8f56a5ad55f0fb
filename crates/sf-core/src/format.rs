//! Device output sample types and voice buffer storage formats

use serde::{Deserialize, Serialize};

/// Sample types the device can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevFmtType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl DevFmtType {
    /// Size of one output sample in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            DevFmtType::I8 | DevFmtType::U8 => 1,
            DevFmtType::I16 | DevFmtType::U16 => 2,
            DevFmtType::I32 | DevFmtType::U32 | DevFmtType::F32 => 4,
        }
    }
}

/// Largest float exactly representable below 2^31. Clamping the s32
/// conversion here avoids the wrap a plain 2147483647.0 bound would hit.
const I32_MAX_FLOAT: f32 = 2147483520.0;

#[inline]
pub fn sample_conv_f32(val: f32) -> f32 {
    val
}

#[inline]
pub fn sample_conv_i32(val: f32) -> i32 {
    (val * 2147483648.0).clamp(-2147483648.0, I32_MAX_FLOAT).round() as i32
}

#[inline]
pub fn sample_conv_i16(val: f32) -> i16 {
    (val * 32768.0).clamp(-32768.0, 32767.0).round() as i16
}

#[inline]
pub fn sample_conv_i8(val: f32) -> i8 {
    (val * 128.0).clamp(-128.0, 127.0).round() as i8
}

#[inline]
pub fn sample_conv_u32(val: f32) -> u32 {
    (sample_conv_i32(val) as u32).wrapping_add(2147483648)
}

#[inline]
pub fn sample_conv_u16(val: f32) -> u16 {
    (sample_conv_i16(val) as i32 + 32768) as u16
}

#[inline]
pub fn sample_conv_u8(val: f32) -> u8 {
    (sample_conv_i8(val) as i16 + 128) as u8
}

/// Storage sample formats a voice buffer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FmtType {
    U8,
    I8,
    I16,
    /// Packed little-endian 24-bit signed.
    I24,
    I32,
    F32,
    Ima4,
    Msadpcm,
}

impl FmtType {
    /// Bytes per sample point (per channel). ADPCM formats are
    /// block-compressed; see the block helpers below.
    pub const fn bytes(self) -> usize {
        match self {
            FmtType::U8 | FmtType::I8 => 1,
            FmtType::I16 => 2,
            FmtType::I24 => 3,
            FmtType::I32 | FmtType::F32 => 4,
            FmtType::Ima4 | FmtType::Msadpcm => 1,
        }
    }

    /// Bytes of one compressed block covering `samples_per_block` samples
    /// across `channels` interleaved channels. PCM formats treat a "block"
    /// as a single frame.
    pub const fn block_bytes(self, samples_per_block: usize, channels: usize) -> usize {
        match self {
            FmtType::Ima4 => ((samples_per_block - 1) / 2 + 4) * channels,
            FmtType::Msadpcm => ((samples_per_block - 2) / 2 + 7) * channels,
            _ => self.bytes() * channels,
        }
    }
}

/// Channel configurations a voice buffer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FmtChannels {
    Mono,
    Stereo,
    Rear,
    Quad,
    X51,
    X61,
    X71,
    BFormat2D,
    BFormat3D,
    Uhj2,
    Uhj3,
    Uhj4,
    SuperStereo,
}

impl FmtChannels {
    /// Number of stored channels. B-Format counts depend on the order it
    /// was encoded at.
    pub fn count(self, ambi_order: usize) -> usize {
        match self {
            FmtChannels::Mono => 1,
            FmtChannels::Stereo | FmtChannels::Uhj2 | FmtChannels::SuperStereo => 2,
            FmtChannels::Rear => 2,
            FmtChannels::Uhj3 => 3,
            FmtChannels::Quad | FmtChannels::Uhj4 => 4,
            FmtChannels::X51 => 6,
            FmtChannels::X61 => 7,
            FmtChannels::X71 => 8,
            FmtChannels::BFormat2D => crate::ambi2d_channels_from_order(ambi_order),
            FmtChannels::BFormat3D => crate::ambi_channels_from_order(ambi_order),
        }
    }

    /// Whether this format carries an ambisonic scene (B-Format or UHJ).
    pub const fn is_ambisonic(self) -> bool {
        matches!(
            self,
            FmtChannels::BFormat2D
                | FmtChannels::BFormat3D
                | FmtChannels::Uhj2
                | FmtChannels::Uhj3
                | FmtChannels::Uhj4
        )
    }

    /// Whether the ambisonic scene is horizontal-only.
    pub const fn is_2d_ambisonic(self) -> bool {
        matches!(self, FmtChannels::BFormat2D | FmtChannels::Uhj2 | FmtChannels::Uhj3)
    }

    /// Whether this is one of the UHJ-encoded stereo-compatible formats.
    pub const fn is_uhj(self) -> bool {
        matches!(self, FmtChannels::Uhj2 | FmtChannels::Uhj3 | FmtChannels::Uhj4)
    }
}

/// Ambisonic channel ordering of a B-Format buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmbiLayout {
    Acn,
    FuMa,
}

/// Ambisonic normalization of a B-Format buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmbiScaling {
    N3D,
    SN3D,
    FuMa,
    Uhj,
}

/// Owned, format-tagged sample storage for a voice buffer.
///
/// ADPCM and 24-bit data stay as raw bytes; the loaders decode on the fly.
#[derive(Debug, Clone)]
pub enum SampleData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I24(Vec<u8>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    Ima4(Vec<u8>),
    Msadpcm(Vec<u8>),
}

impl SampleData {
    pub const fn fmt_type(&self) -> FmtType {
        match self {
            SampleData::U8(_) => FmtType::U8,
            SampleData::I8(_) => FmtType::I8,
            SampleData::I16(_) => FmtType::I16,
            SampleData::I24(_) => FmtType::I24,
            SampleData::I32(_) => FmtType::I32,
            SampleData::F32(_) => FmtType::F32,
            SampleData::Ima4(_) => FmtType::Ima4,
            SampleData::Msadpcm(_) => FmtType::Msadpcm,
        }
    }

    /// Raw byte view, for callback sources that stream encoded blocks in.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            SampleData::U8(v) | SampleData::I24(v) | SampleData::Ima4(v)
            | SampleData::Msadpcm(v) => v.as_mut_slice(),
            SampleData::I8(v) => bytemuck::cast_slice_mut(v.as_mut_slice()),
            SampleData::I16(v) => bytemuck::cast_slice_mut(v.as_mut_slice()),
            SampleData::I32(v) => bytemuck::cast_slice_mut(v.as_mut_slice()),
            SampleData::F32(v) => bytemuck::cast_slice_mut(v.as_mut_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conv_roundtrip() {
        // SampleConv<T>(SampleConv<float>(x)) == x for representable values.
        for x in [-32768i16, -12345, -1, 0, 1, 9999, 32767] {
            let f = x as f32 / 32768.0;
            assert_eq!(sample_conv_i16(f), x);
        }
        for x in [-128i8, -64, 0, 63, 127] {
            let f = x as f32 / 128.0;
            assert_eq!(sample_conv_i8(f), x);
        }
    }

    #[test]
    fn test_sample_conv_clamps() {
        assert_eq!(sample_conv_i16(2.0), 32767);
        assert_eq!(sample_conv_i16(-2.0), -32768);
        assert_eq!(sample_conv_i32(1.0), 2147483520);
        assert_eq!(sample_conv_u8(-2.0), 0);
        assert_eq!(sample_conv_u8(2.0), 255);
        assert_eq!(sample_conv_u16(0.0), 32768);
    }

    #[test]
    fn test_adpcm_block_sizes() {
        // 65-sample IMA4 blocks over stereo: ((65-1)/2 + 4) * 2.
        assert_eq!(FmtType::Ima4.block_bytes(65, 2), 72);
        // 64-sample MSADPCM blocks over mono: ((64-2)/2 + 7).
        assert_eq!(FmtType::Msadpcm.block_bytes(64, 1), 38);
    }

    #[test]
    fn test_bformat_counts() {
        assert_eq!(FmtChannels::BFormat3D.count(1), 4);
        assert_eq!(FmtChannels::BFormat2D.count(2), 5);
        assert!(FmtChannels::Uhj2.is_2d_ambisonic());
        assert!(!FmtChannels::BFormat3D.is_2d_ambisonic());
    }
}
