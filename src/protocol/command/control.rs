//! Stream control operations: cork, rename, buffer metrics, sample rate and
//! property list updates.

use std::ffi::CString;

use crate::protocol::stream::BufferAttr;
use crate::protocol::{serde::*, ProtocolError};
use crate::protocol::{Props, PropsUpdateMode};

use super::CommandReply;

/// Parameters for a cork/uncork command.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct CorkStreamParams {
    /// The channel to cork or uncork.
    pub channel: u32,

    /// Whether to cork or uncork the stream.
    pub cork: bool,
}

impl TagStructRead for CorkStreamParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            cork: ts.read_bool()?,
        })
    }
}

impl TagStructWrite for CorkStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        ts.write_bool(self.cork)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::SetPlaybackStreamName`] and
/// [`super::Command::SetRecordStreamName`], the legacy rename path for
/// protocol versions before 13.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStreamNameParams {
    /// The channel of the stream to rename.
    pub channel: u32,

    /// The new name.
    pub name: CString,
}

impl TagStructRead for SetStreamNameParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            name: ts.read_string_non_null()?,
        })
    }
}

impl TagStructWrite for SetStreamNameParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_string(Some(&self.name))?;

        Ok(())
    }
}

/// Parameters for [`super::Command::SetPlaybackStreamBufferAttr`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetPlaybackStreamBufferAttrParams {
    /// The channel of the stream to update.
    pub channel: u32,

    /// The new buffer metrics. `fragment_size` is ignored.
    pub buffer_attr: BufferAttr,

    /// Whether the device latency should be adjusted to the new metrics.
    /// Sent on version 13 and newer.
    pub adjust_latency: bool,
}

impl TagStructRead for SetPlaybackStreamBufferAttrParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            buffer_attr: BufferAttr {
                max_length: ts.read_u32()?,
                target_length: ts.read_u32()?,
                pre_buffering: ts.read_u32()?,
                minimum_request_length: ts.read_u32()?,
                ..Default::default()
            },
            adjust_latency: if protocol_version >= 13 {
                ts.read_bool()?
            } else {
                false
            },
        })
    }
}

impl TagStructWrite for SetPlaybackStreamBufferAttrParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.buffer_attr.max_length)?;
        w.write_u32(self.buffer_attr.target_length)?;
        w.write_u32(self.buffer_attr.pre_buffering)?;
        w.write_u32(self.buffer_attr.minimum_request_length)?;
        if protocol_version >= 13 {
            w.write_bool(self.adjust_latency)?;
        }
        Ok(())
    }
}

/// The reply to [`super::Command::SetPlaybackStreamBufferAttr`].
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetPlaybackStreamBufferAttrReply {
    /// The metrics the server actually chose. `fragment_size` is always 0.
    pub buffer_attr: BufferAttr,
}

impl CommandReply for SetPlaybackStreamBufferAttrReply {}

impl TagStructRead for SetPlaybackStreamBufferAttrReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            buffer_attr: BufferAttr {
                max_length: ts.read_u32()?,
                target_length: ts.read_u32()?,
                pre_buffering: ts.read_u32()?,
                minimum_request_length: ts.read_u32()?,
                ..Default::default()
            },
        })
    }
}

impl TagStructWrite for SetPlaybackStreamBufferAttrReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.buffer_attr.max_length)?;
        w.write_u32(self.buffer_attr.target_length)?;
        w.write_u32(self.buffer_attr.pre_buffering)?;
        w.write_u32(self.buffer_attr.minimum_request_length)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::SetRecordStreamBufferAttr`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetRecordStreamBufferAttrParams {
    /// The channel of the stream to update.
    pub channel: u32,

    /// The new buffer metrics. Only `max_length` and `fragment_size` are
    /// used.
    pub buffer_attr: BufferAttr,

    /// Whether the device latency should be adjusted to the new metrics.
    /// Sent on version 13 and newer.
    pub adjust_latency: bool,
}

impl TagStructRead for SetRecordStreamBufferAttrParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            buffer_attr: BufferAttr {
                max_length: ts.read_u32()?,
                fragment_size: ts.read_u32()?,
                ..Default::default()
            },
            adjust_latency: if protocol_version >= 13 {
                ts.read_bool()?
            } else {
                false
            },
        })
    }
}

impl TagStructWrite for SetRecordStreamBufferAttrParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.buffer_attr.max_length)?;
        w.write_u32(self.buffer_attr.fragment_size)?;
        if protocol_version >= 13 {
            w.write_bool(self.adjust_latency)?;
        }
        Ok(())
    }
}

/// The reply to [`super::Command::SetRecordStreamBufferAttr`].
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetRecordStreamBufferAttrReply {
    /// The metrics the server actually chose. Only `max_length` and
    /// `fragment_size` are used.
    pub buffer_attr: BufferAttr,
}

impl CommandReply for SetRecordStreamBufferAttrReply {}

impl TagStructRead for SetRecordStreamBufferAttrReply {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            buffer_attr: BufferAttr {
                max_length: ts.read_u32()?,
                fragment_size: ts.read_u32()?,
                ..Default::default()
            },
        })
    }
}

impl TagStructWrite for SetRecordStreamBufferAttrReply {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.buffer_attr.max_length)?;
        w.write_u32(self.buffer_attr.fragment_size)?;
        Ok(())
    }
}

/// Parameters for [`super::Command::UpdatePlaybackStreamSampleRate`] and
/// [`super::Command::UpdateRecordStreamSampleRate`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UpdateSampleRateParams {
    /// The channel of the stream to update.
    pub channel: u32,

    /// The new sample rate.
    pub sample_rate: u32,
}

impl TagStructRead for UpdateSampleRateParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            sample_rate: ts.read_u32()?,
        })
    }
}

impl TagStructWrite for UpdateSampleRateParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.sample_rate)?;

        Ok(())
    }
}

/// Parameters for [`super::Command::UpdatePlaybackStreamProplist`] and
/// [`super::Command::UpdateRecordStreamProplist`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePropsParams {
    /// The channel of the stream to update.
    pub channel: u32,

    /// The type of update being performed.
    pub mode: PropsUpdateMode,

    /// The new props.
    pub props: Props,
}

impl TagStructRead for UpdatePropsParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            mode: ts.read_enum()?,
            props: ts.read()?,
        })
    }
}

impl TagStructWrite for UpdatePropsParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_u32(self.mode as u32)?;
        w.write(&self.props)?;

        Ok(())
    }
}

/// Parameters for [`super::Command::RemovePlaybackStreamProplist`] and
/// [`super::Command::RemoveRecordStreamProplist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovePropsParams {
    /// The channel of the stream to update.
    pub channel: u32,

    /// The keys to remove, sent as a null-terminated sequence of strings.
    pub keys: Vec<CString>,
}

impl TagStructRead for RemovePropsParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let channel = ts.read_u32()?;

        let mut keys = Vec::new();
        while let Some(key) = ts.read_string()? {
            keys.push(key);
        }

        Ok(Self { channel, keys })
    }
}

impl TagStructWrite for RemovePropsParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        for key in &self.keys {
            w.write_string(Some(key))?;
        }
        w.write_null_string()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_util::test_serde;

    #[test]
    fn cork_params_serde() -> anyhow::Result<()> {
        let params = CorkStreamParams {
            channel: 0,
            cork: true,
        };

        test_serde(&params)
    }

    #[test]
    fn set_stream_name_params_serde() -> anyhow::Result<()> {
        let params = SetStreamNameParams {
            channel: 0,
            name: CString::new("name").unwrap(),
        };

        test_serde(&params)
    }

    #[test]
    fn set_buffer_attr_params_serde() -> anyhow::Result<()> {
        let params = SetPlaybackStreamBufferAttrParams {
            channel: 1,
            buffer_attr: BufferAttr {
                max_length: 1 << 20,
                target_length: 4096,
                pre_buffering: 4096,
                minimum_request_length: 1024,
                ..Default::default()
            },
            adjust_latency: true,
        };

        // adjust_latency is only carried on version 13.
        crate::protocol::test_util::test_serde_version(&params, 13)?;

        let params = SetRecordStreamBufferAttrParams {
            channel: 1,
            buffer_attr: BufferAttr {
                max_length: 1 << 20,
                fragment_size: 1024,
                ..Default::default()
            },
            adjust_latency: false,
        };
        test_serde(&params)
    }

    #[test]
    fn update_sample_rate_params_serde() -> anyhow::Result<()> {
        let params = UpdateSampleRateParams {
            channel: 0,
            sample_rate: 48000,
        };

        test_serde(&params)
    }

    #[test]
    fn update_props_params_serde() -> anyhow::Result<()> {
        let params = UpdatePropsParams {
            channel: 0,
            mode: PropsUpdateMode::Replace,
            props: Props::new(),
        };

        test_serde(&params)
    }

    #[test]
    fn remove_props_params_serde() -> anyhow::Result<()> {
        let params = RemovePropsParams {
            channel: 0,
            keys: vec![
                CString::new("media.name").unwrap(),
                CString::new("media.role").unwrap(),
            ],
        };

        test_serde(&params)
    }
}
