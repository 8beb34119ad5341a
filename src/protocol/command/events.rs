//! Server-initiated stream events.

use std::ffi::CString;

use crate::protocol::serde::*;
use crate::protocol::stream::BufferAttr;
use crate::protocol::ProtocolError;

/// Sent by the server to request a chunk from a playback stream.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// The channel ID.
    pub channel: u32,

    /// The number of bytes requested.
    pub length: u32,
}

impl TagStructRead for Request {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            length: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for Request {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.length)?;
        Ok(())
    }
}

/// Sent by the server when a playback stream is moved to a different sink.
/// Supported since version 12; version 13 added the refreshed buffer metrics
/// and the configured device latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStreamMovedParams {
    /// The channel of the stream.
    pub channel: u32,

    /// The index of the new device.
    pub device_index: u32,

    /// The name of the new device.
    pub device_name: CString,

    /// Whether the destination device is suspended.
    pub device_suspended: bool,

    /// The buffer metrics after the move. `fragment_size` is unused. Version
    /// 13 and newer.
    pub buffer_attr: BufferAttr,

    /// The configured sink latency, in microseconds. Version 13 and newer.
    pub configured_sink_usec: u64,
}

impl TagStructRead for PlaybackStreamMovedParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let channel = ts.read_u32()?;
        let device_index = ts
            .read_index()?
            .ok_or_else(|| ProtocolError::Invalid("invalid device index".into()))?;
        let device_name = ts.read_string_non_null()?;
        let device_suspended = ts.read_bool()?;

        let (mut buffer_attr, mut configured_sink_usec) = (BufferAttr::default(), 0);
        if protocol_version >= 13 {
            buffer_attr = BufferAttr {
                max_length: ts.read_u32()?,
                target_length: ts.read_u32()?,
                pre_buffering: ts.read_u32()?,
                minimum_request_length: ts.read_u32()?,
                ..Default::default()
            };
            configured_sink_usec = ts.read_usec()?;
        }

        Ok(Self {
            channel,
            device_index,
            device_name,
            device_suspended,
            buffer_attr,
            configured_sink_usec,
        })
    }
}

impl TagStructWrite for PlaybackStreamMovedParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        ts.write_index(Some(self.device_index))?;
        ts.write_string(Some(&self.device_name))?;
        ts.write_bool(self.device_suspended)?;

        if protocol_version >= 13 {
            ts.write_u32(self.buffer_attr.max_length)?;
            ts.write_u32(self.buffer_attr.target_length)?;
            ts.write_u32(self.buffer_attr.pre_buffering)?;
            ts.write_u32(self.buffer_attr.minimum_request_length)?;
            ts.write_usec(self.configured_sink_usec)?;
        }

        Ok(())
    }
}

/// Sent by the server when a record stream is moved to a different source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStreamMovedParams {
    /// The channel of the stream.
    pub channel: u32,

    /// The index of the new device.
    pub device_index: u32,

    /// The name of the new device.
    pub device_name: CString,

    /// Whether the destination device is suspended.
    pub device_suspended: bool,

    /// The buffer metrics after the move. Only `max_length` and
    /// `fragment_size` are used. Version 13 and newer.
    pub buffer_attr: BufferAttr,

    /// The configured source latency, in microseconds. Version 13 and newer.
    pub configured_source_usec: u64,
}

impl TagStructRead for RecordStreamMovedParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let channel = ts.read_u32()?;
        let device_index = ts
            .read_index()?
            .ok_or_else(|| ProtocolError::Invalid("invalid device index".into()))?;
        let device_name = ts.read_string_non_null()?;
        let device_suspended = ts.read_bool()?;

        let (mut buffer_attr, mut configured_source_usec) = (BufferAttr::default(), 0);
        if protocol_version >= 13 {
            buffer_attr = BufferAttr {
                max_length: ts.read_u32()?,
                fragment_size: ts.read_u32()?,
                ..Default::default()
            };
            configured_source_usec = ts.read_usec()?;
        }

        Ok(Self {
            channel,
            device_index,
            device_name,
            device_suspended,
            buffer_attr,
            configured_source_usec,
        })
    }
}

impl TagStructWrite for RecordStreamMovedParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        ts.write_index(Some(self.device_index))?;
        ts.write_string(Some(&self.device_name))?;
        ts.write_bool(self.device_suspended)?;

        if protocol_version >= 13 {
            ts.write_u32(self.buffer_attr.max_length)?;
            ts.write_u32(self.buffer_attr.fragment_size)?;
            ts.write_usec(self.configured_source_usec)?;
        }

        Ok(())
    }
}

/// Sent by the server when the device a stream is attached to is suspended
/// or resumed. Supported since version 12.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StreamSuspendedParams {
    /// The channel of the stream.
    pub channel: u32,

    /// The suspended state of the device.
    pub suspended: bool,
}

impl TagStructRead for StreamSuspendedParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            suspended: ts.read_bool()?,
        })
    }
}

impl TagStructWrite for StreamSuspendedParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        ts.write_bool(self.suspended)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::test_util::{test_serde, test_serde_version};
    use crate::protocol::MAX_VERSION;

    use super::*;

    #[test]
    fn request_serde() -> anyhow::Result<()> {
        let ev = Request {
            channel: 1,
            length: 2,
        };

        test_serde(&ev)
    }

    #[test]
    fn playback_stream_moved_params_serde() -> anyhow::Result<()> {
        let ev = PlaybackStreamMovedParams {
            channel: 1,
            device_index: 2,
            device_name: CString::new("foo").unwrap(),
            device_suspended: false,
            buffer_attr: BufferAttr {
                max_length: 1 << 20,
                target_length: 4096,
                pre_buffering: 4096,
                minimum_request_length: 1024,
                ..Default::default()
            },
            configured_sink_usec: 3000,
        };

        test_serde_version(&ev, MAX_VERSION)
    }

    #[test]
    fn record_stream_moved_params_serde() -> anyhow::Result<()> {
        let ev = RecordStreamMovedParams {
            channel: 1,
            device_index: 2,
            device_name: CString::new("foo").unwrap(),
            device_suspended: true,
            buffer_attr: BufferAttr {
                max_length: 1 << 20,
                fragment_size: 1024,
                ..Default::default()
            },
            configured_source_usec: 3000,
        };

        test_serde_version(&ev, MAX_VERSION)
    }

    #[test]
    fn stream_suspended_params_serde() -> anyhow::Result<()> {
        let params = StreamSuspendedParams {
            channel: 0,
            suspended: true,
        };

        test_serde(&params)
    }
}
