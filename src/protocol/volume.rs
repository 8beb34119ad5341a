//! Defines volume specification data types.

use std::fmt;

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use super::sample_spec::CHANNELS_MAX;
use super::serde::*;
use super::ProtocolError;

const VOLUME_NORM: u32 = 0x10000;
const VOLUME_MUTED: u32 = 0;
const VOLUME_MAX: u32 = u32::MAX / 2;

/// Volume specification for a single channel.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Volume(u32);

impl Volume {
    /// The normal volume (100%, 0 dB, no attenuation, no amplification).
    pub const NORM: Self = Volume(VOLUME_NORM);

    /// The muted volume (0%, -Inf dB).
    pub const MUTED: Self = Volume(VOLUME_MUTED);

    /// Gets the raw volume value as a `u32`.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Creates a volume specification from a raw `u32` sent over the wire.
    ///
    /// If the raw value is out of the valid range, it will be clamped.
    pub fn from_u32_clamped(raw: u32) -> Self {
        Volume(raw.min(VOLUME_MAX))
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Volume({}/{})", self.0, VOLUME_NORM)
    }
}

impl TagStructRead for Volume {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::Volume)?;
        Ok(Volume::from_u32_clamped(
            ts.inner().read_u32::<NetworkEndian>()?,
        ))
    }
}

impl TagStructWrite for Volume {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.inner().write_u8(Tag::Volume as u8)?;
        w.inner().write_u32::<NetworkEndian>(self.as_u32())?;
        Ok(())
    }
}

/// Per-channel volume setting.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChannelVolume {
    channels: u8,
    volumes: [Volume; CHANNELS_MAX as usize],
}

impl Default for ChannelVolume {
    fn default() -> Self {
        Self::norm(1)
    }
}

impl ChannelVolume {
    /// Creates an empty `ChannelVolume` specifying no volumes for any channel.
    pub fn empty() -> Self {
        Self {
            channels: 0,
            volumes: [Volume::MUTED; CHANNELS_MAX as usize],
        }
    }

    /// Creates a `ChannelVolume` with N channels, all muted.
    pub fn muted(channels: u8) -> ChannelVolume {
        Self {
            channels,
            volumes: [Volume::MUTED; CHANNELS_MAX as usize],
        }
    }

    /// Creates a `ChannelVolume` with N channels, all at full volume.
    pub fn norm(channels: u8) -> ChannelVolume {
        Self {
            channels,
            volumes: [Volume::NORM; CHANNELS_MAX as usize],
        }
    }

    /// Appends a volume to the list. Full maps ignore the push.
    pub fn push(&mut self, volume: Volume) {
        if self.channels < CHANNELS_MAX {
            self.volumes[self.channels as usize] = volume;
            self.channels += 1;
        }
    }

    /// Returns the per-channel volumes.
    pub fn channels(&self) -> &[Volume] {
        &self.volumes[..self.channels as usize]
    }
}

impl fmt::Debug for ChannelVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.channels().fmt(f)
    }
}

impl TagStructRead for ChannelVolume {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        ts.expect_tag(Tag::CVolume)?;
        let n_channels = ts.inner().read_u8()?;
        if n_channels == 0 || n_channels > CHANNELS_MAX {
            return Err(ProtocolError::Invalid(format!(
                "invalid cvolume channel count {}, must be between 1 and {}",
                n_channels, CHANNELS_MAX
            )));
        }

        let mut cvolume = ChannelVolume::empty();
        for _ in 0..n_channels {
            let raw = ts.inner().read_u32::<NetworkEndian>()?;
            cvolume.push(Volume::from_u32_clamped(raw))
        }

        Ok(cvolume)
    }
}

impl TagStructWrite for ChannelVolume {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.inner().write_u8(Tag::CVolume as u8)?;

        w.inner().write_u8(self.channels().len() as u8)?;
        for volume in self.channels() {
            w.inner().write_u32::<NetworkEndian>(volume.as_u32())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::{test_util::test_serde_version, MAX_VERSION};

    use super::*;

    #[test]
    fn volume_serde() -> anyhow::Result<()> {
        let v = Volume::from_u32_clamped(0x8000);
        test_serde_version(&v, MAX_VERSION)
    }

    #[test]
    fn cvolume_serde() -> anyhow::Result<()> {
        let mut cv = ChannelVolume::empty();
        cv.push(Volume::NORM);
        cv.push(Volume::from_u32_clamped(0x4000));
        test_serde_version(&cv, MAX_VERSION)
    }
}
