//! Sample specification data type.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive as _;

use super::serde::*;
use super::ProtocolError;

/// Maximum number of channels.
pub const CHANNELS_MAX: u8 = 32;

/// Maximum sample rate accepted from clients and servers.
pub const RATE_MAX: u32 = 48000 * 4;

/// Describes how individual samples are encoded.
#[derive(Debug, Copy, Clone, Primitive, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Unsigned 8 bit PCM.
    U8 = 0,
    /// 8 bit a-Law.
    Alaw = 1,
    /// 8 bit mu-Law.
    Ulaw = 2,
    /// Signed 16 bit PCM, little endian (PC).
    #[default]
    S16Le = 3,
    /// Signed 16 bit PCM, big endian.
    S16Be = 4,
    /// 32 bit IEEE floating point, little endian (PC), range -1.0 to 1.0.
    Float32Le = 5,
    /// 32 bit IEEE floating point, big endian, range -1.0 to 1.0.
    Float32Be = 6,
    /// Signed 32 bit PCM, little endian (PC).
    S32Le = 7,
    /// Signed 32 bit PCM, big endian.
    S32Be = 8,
}

impl SampleFormat {
    /// Returns the number of bytes used to store a single sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::Alaw | SampleFormat::Ulaw => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::Float32Le
            | SampleFormat::Float32Be
            | SampleFormat::S32Le
            | SampleFormat::S32Be => 4,
        }
    }

    /// Returns true if this is one of the signed 32 bit PCM formats, which
    /// require protocol version 12 or newer.
    pub fn is_s32(&self) -> bool {
        matches!(self, SampleFormat::S32Le | SampleFormat::S32Be)
    }
}

/// A sample specification that fully describes the format of a sample stream
/// between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    /// Format / encoding of individual samples.
    pub format: SampleFormat,
    /// Number of independent channels.
    pub channels: u8,
    /// Number of samples per second (and per channel).
    pub sample_rate: u32,
}

impl SampleSpec {
    /// Returns true if the spec describes a usable stream format.
    pub fn valid(&self) -> bool {
        self.channels >= 1
            && self.channels <= CHANNELS_MAX
            && self.sample_rate > 0
            && self.sample_rate <= RATE_MAX
    }

    /// The size of a single frame (one sample for every channel), in bytes.
    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Converts a byte count into the duration in microseconds it represents
    /// at this spec's rate. Partial frames are truncated.
    pub fn bytes_to_usec(&self, bytes: u64) -> u64 {
        (bytes / self.frame_size() as u64) * 1_000_000 / self.sample_rate as u64
    }

    /// Converts a duration in microseconds into the equivalent whole number
    /// of frames, expressed in bytes.
    pub fn usec_to_bytes(&self, usec: u64) -> u64 {
        (usec * self.sample_rate as u64 / 1_000_000) * self.frame_size() as u64
    }
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            format: SampleFormat::default(),
            channels: 1,
            sample_rate: 44100,
        }
    }
}

impl TagStructRead for SampleSpec {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        use byteorder::{NetworkEndian, ReadBytesExt};

        ts.expect_tag(Tag::SampleSpec)?;
        let format = ts.inner().read_u8()?;
        let format = SampleFormat::from_u8(format)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid sample format {}", format)))?;
        let channels = ts.inner().read_u8()?;
        let sample_rate = ts.inner().read_u32::<NetworkEndian>()?;

        Ok(Self {
            format,
            channels,
            sample_rate,
        })
    }
}

impl TagStructWrite for SampleSpec {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        use byteorder::{NetworkEndian, WriteBytesExt};

        w.inner().write_u8(Tag::SampleSpec as u8)?;
        w.inner().write_u8(self.format as u8)?;
        w.inner().write_u8(self.channels)?;
        w.inner().write_u32::<NetworkEndian>(self.sample_rate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::test_util::test_serde;

    use super::*;

    #[test]
    fn sample_spec_serde() -> anyhow::Result<()> {
        let spec = SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            sample_rate: 44100,
        };

        test_serde(&spec)
    }

    #[test]
    fn conversions() {
        let spec = SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            sample_rate: 44100,
        };

        assert_eq!(spec.frame_size(), 4);
        assert_eq!(spec.bytes_to_usec(44100 * 4), 1_000_000);
        assert_eq!(spec.usec_to_bytes(1_000_000), 44100 * 4);
        assert_eq!(spec.bytes_to_usec(0), 0);
    }

    #[test]
    fn validity() {
        let mut spec = SampleSpec::default();
        assert!(spec.valid());

        spec.channels = 0;
        assert!(!spec.valid());

        spec.channels = 2;
        spec.sample_rate = RATE_MAX + 1;
        assert!(!spec.valid());
    }
}
