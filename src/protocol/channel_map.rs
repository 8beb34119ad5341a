//! Defines mappings from stream channels to speaker positions.

use std::fmt;

use super::sample_spec::CHANNELS_MAX;
use super::serde::*;
use super::ProtocolError;

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive as _;

/// Channel position labels.
#[allow(missing_docs)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum ChannelPosition {
    #[default]
    Mono = 0,
    FrontLeft = 1,
    FrontRight = 2,
    FrontCenter = 3,
    RearCenter = 4,
    RearLeft = 5,
    RearRight = 6,
    Lfe = 7,
    FrontLeftOfCenter = 8,
    FrontRightOfCenter = 9,
    SideLeft = 10,
    SideRight = 11,
    Aux0 = 12,
    Aux1 = 13,
    Aux2 = 14,
    Aux3 = 15,
    Aux4 = 16,
    Aux5 = 17,
    Aux6 = 18,
    Aux7 = 19,
    Aux8 = 20,
    Aux9 = 21,
    Aux10 = 22,
    Aux11 = 23,
    Aux12 = 24,
    Aux13 = 25,
    Aux14 = 26,
    Aux15 = 27,
    Aux16 = 28,
    Aux17 = 29,
    Aux18 = 30,
    Aux19 = 31,
    Aux20 = 32,
    Aux21 = 33,
    Aux22 = 34,
    Aux23 = 35,
    Aux24 = 36,
    Aux25 = 37,
    Aux26 = 38,
    Aux27 = 39,
    Aux28 = 40,
    Aux29 = 41,
    Aux30 = 42,
    Aux31 = 43,
    TopCenter = 44,
    TopFrontLeft = 45,
    TopFrontRight = 46,
    TopFrontCenter = 47,
    TopRearLeft = 48,
    TopRearRight = 49,
    TopRearCenter = 50,
}

/// A map from stream channels to speaker positions.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    channels: u8,
    map: [ChannelPosition; CHANNELS_MAX as usize],
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::mono()
    }
}

impl ChannelMap {
    /// Creates an empty channel map.
    pub fn empty() -> Self {
        ChannelMap {
            channels: 0,
            map: [Default::default(); CHANNELS_MAX as usize],
        }
    }

    /// Creates a channel map with a single mono channel.
    pub fn mono() -> Self {
        Self {
            channels: 1,
            map: [Default::default(); CHANNELS_MAX as usize],
        }
    }

    /// Creates a channel map with two channels in the standard stereo positions.
    pub fn stereo() -> Self {
        let mut map = Self::empty();
        map.push(ChannelPosition::FrontLeft);
        map.push(ChannelPosition::FrontRight);
        map
    }

    /// Creates a default map for the given channel count: mono for one
    /// channel, stereo for two, and front positions plus aux channels beyond
    /// that.
    pub fn auto(channels: u8) -> Option<Self> {
        match channels {
            0 => None,
            1 => Some(Self::mono()),
            2 => Some(Self::stereo()),
            n if n <= CHANNELS_MAX => {
                let mut map = Self::stereo();
                for aux in 0..(n - 2) {
                    map.push(ChannelPosition::from_u8(ChannelPosition::Aux0 as u8 + aux)?);
                }
                Some(map)
            }
            _ => None,
        }
    }

    /// Appends another position to the end of this map.
    ///
    /// Panics if the map already has [`CHANNELS_MAX`] channels.
    pub fn push(&mut self, position: ChannelPosition) {
        if self.channels < CHANNELS_MAX {
            self.map[self.channels as usize] = position;
            self.channels += 1;
        } else {
            panic!("channel map full");
        }
    }

    /// Returns the number of channel mappings stored in this map.
    pub fn num_channels(&self) -> u8 {
        self.channels
    }

    /// Returns the mapped positions.
    pub fn positions(&self) -> &[ChannelPosition] {
        &self.map[..self.channels as usize]
    }
}

impl fmt::Debug for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only print the occupied part of the backing storage.
        self.positions().fmt(f)
    }
}

impl TagStructRead for ChannelMap {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        use byteorder::ReadBytesExt;

        ts.expect_tag(Tag::ChannelMap)?;

        let channels = ts.inner().read_u8()?;
        if channels > CHANNELS_MAX {
            return Err(ProtocolError::Invalid(format!(
                "channel map too large (max is {} channels, got {})",
                CHANNELS_MAX, channels
            )));
        }

        let mut map = ChannelMap::empty();
        for _ in 0..channels {
            let raw = ts.inner().read_u8()?;
            map.push(ChannelPosition::from_u8(raw).ok_or_else(|| {
                ProtocolError::Invalid(format!("invalid channel position {}", raw))
            })?)
        }

        Ok(map)
    }
}

impl TagStructWrite for ChannelMap {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        use byteorder::WriteBytesExt;

        w.inner().write_u8(Tag::ChannelMap as u8)?;
        w.inner().write_u8(self.num_channels())?;
        for position in self.positions() {
            w.inner().write_u8(*position as u8)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::{test_util::test_serde_version, MAX_VERSION};

    use super::*;

    #[test]
    fn roundtrip() -> anyhow::Result<()> {
        let mut map = ChannelMap::empty();
        map.push(ChannelPosition::FrontLeft);
        map.push(ChannelPosition::FrontRight);
        map.push(ChannelPosition::RearLeft);
        map.push(ChannelPosition::RearRight);

        test_serde_version(&map, MAX_VERSION)
    }

    #[test]
    fn auto_maps() {
        assert!(ChannelMap::auto(0).is_none());
        assert_eq!(ChannelMap::auto(1).unwrap(), ChannelMap::mono());
        assert_eq!(ChannelMap::auto(2).unwrap(), ChannelMap::stereo());

        let map = ChannelMap::auto(4).unwrap();
        assert_eq!(map.num_channels(), 4);
        assert_eq!(map.positions()[3], ChannelPosition::Aux1);
    }
}
