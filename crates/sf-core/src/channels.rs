//! Output channel names and device channel layouts

use serde::{Deserialize, Serialize};

/// Marker for "channel not present on this device".
pub const INVALID_CHANNEL_INDEX: u8 = u8::MAX;

/// Named speaker-feed channels, plus auxiliary slots for ambisonic and
/// custom layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    BackLeft,
    BackRight,
    BackCenter,
    SideLeft,
    SideRight,
    TopCenter,
    TopFrontLeft,
    TopFrontCenter,
    TopFrontRight,
    TopBackLeft,
    TopBackCenter,
    TopBackRight,
    Aux0,
    Aux1,
    Aux2,
    Aux3,
    Aux4,
    Aux5,
    Aux6,
    Aux7,
    Aux8,
    Aux9,
    Aux10,
    Aux11,
    Aux12,
    Aux13,
    Aux14,
    Aux15,
}

impl Channel {
    /// Index into the device's channel-by-name table.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Aux channel for the given ambisonic channel number.
    pub const fn aux(acn: usize) -> Channel {
        match acn {
            0 => Channel::Aux0,
            1 => Channel::Aux1,
            2 => Channel::Aux2,
            3 => Channel::Aux3,
            4 => Channel::Aux4,
            5 => Channel::Aux5,
            6 => Channel::Aux6,
            7 => Channel::Aux7,
            8 => Channel::Aux8,
            9 => Channel::Aux9,
            10 => Channel::Aux10,
            11 => Channel::Aux11,
            12 => Channel::Aux12,
            13 => Channel::Aux13,
            14 => Channel::Aux14,
            _ => Channel::Aux15,
        }
    }
}

/// Physical output layouts a device can be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceChannels {
    Mono,
    Stereo,
    Quad,
    X51,
    X61,
    X71,
    /// Raw ambisonic output; the decode happens downstream.
    Ambi3D,
}

impl DeviceChannels {
    /// Number of physical output channels, including LFE.
    pub fn count(self, ambi_order: usize) -> usize {
        match self {
            DeviceChannels::Mono => 1,
            DeviceChannels::Stereo => 2,
            DeviceChannels::Quad => 4,
            DeviceChannels::X51 => 6,
            DeviceChannels::X61 => 7,
            DeviceChannels::X71 => 8,
            DeviceChannels::Ambi3D => crate::ambi_channels_from_order(ambi_order),
        }
    }

    /// Channel names in output order. Ambi3D has no named channels.
    pub fn names(self) -> &'static [Channel] {
        use Channel::*;
        match self {
            DeviceChannels::Mono => &[FrontCenter],
            DeviceChannels::Stereo => &[FrontLeft, FrontRight],
            DeviceChannels::Quad => &[FrontLeft, FrontRight, BackLeft, BackRight],
            DeviceChannels::X51 => &[FrontLeft, FrontRight, FrontCenter, Lfe, SideLeft, SideRight],
            DeviceChannels::X61 => {
                &[FrontLeft, FrontRight, FrontCenter, Lfe, BackCenter, SideLeft, SideRight]
            }
            DeviceChannels::X71 => &[
                FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight, SideLeft, SideRight,
            ],
            DeviceChannels::Ambi3D => &[],
        }
    }
}

/// A remix-map entry: where to fold an input channel the device lacks.
#[derive(Debug, Clone)]
pub struct InputRemixMap {
    /// The input channel with no matching output.
    pub channel: Channel,
    /// Output targets and their mix weights.
    pub targets: Vec<(Channel, f32)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_counts() {
        assert_eq!(DeviceChannels::Stereo.count(1), 2);
        assert_eq!(DeviceChannels::X71.count(1), 8);
        assert_eq!(DeviceChannels::Ambi3D.count(3), 16);
        assert_eq!(DeviceChannels::X51.names().len(), 6);
    }

    #[test]
    fn test_aux_mapping() {
        assert_eq!(Channel::aux(0), Channel::Aux0);
        assert_eq!(Channel::aux(15), Channel::Aux15);
        assert_eq!(Channel::aux(99), Channel::Aux15);
    }
}
