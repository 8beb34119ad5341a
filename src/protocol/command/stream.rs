//! Stream creation commands and their replies.
//!
//! The create payloads are the most heavily version-gated part of the
//! protocol: version 9 added the negotiated buffer metrics to the reply,
//! version 12 added the boolean option block and the negotiated sample
//! format, and version 13 moved the stream name into the property list and
//! added latency adjustment.

use std::ffi::CString;

use crate::protocol::stream::{BufferAttr, StreamFlags};
use crate::protocol::{serde::*, ProtocolError};
use crate::protocol::{ChannelMap, ChannelVolume, Props, SampleSpec};

use super::CommandReply;

/// Parameters for [`super::Command::CreatePlaybackStream`].
#[derive(Default, Debug, Clone, PartialEq)]
pub struct PlaybackStreamParams {
    /// Stream name, sent as a leading string on protocol versions before 13.
    /// Newer versions carry it in `props` instead.
    pub name: Option<CString>,

    /// Sample format for the stream.
    pub sample_spec: SampleSpec,

    /// Channel map for the stream. The number of channels should match
    /// `sample_spec.channels`.
    pub channel_map: ChannelMap,

    /// Name of the sink to connect to, or None for the server default.
    pub sink_name: Option<CString>,

    /// Requested buffer metrics.
    pub buffer_attr: BufferAttr,

    /// Sync group id. Streams sharing an id are started atomically.
    pub sync_id: u32,

    /// Initial volume of the stream. The number of channels should match
    /// `sample_spec.channels`.
    pub volume: ChannelVolume,

    /// Stream options. `start_corked` and `start_muted` are taken from here.
    pub flags: StreamFlags,

    /// Properties of the stream.
    pub props: Props,
}

impl TagStructRead for PlaybackStreamParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let name = if protocol_version < 13 {
            ts.read_string()?
        } else {
            None
        };

        let sample_spec = ts.read()?;
        let channel_map = ts.read()?;
        let _sink_index = ts.read_index()?;
        let sink_name = ts.read_string()?;

        let mut buffer_attr = BufferAttr {
            max_length: ts.read_u32()?,
            ..Default::default()
        };

        let mut flags = StreamFlags {
            start_corked: ts.read_bool()?,
            ..Default::default()
        };

        buffer_attr.target_length = ts.read_u32()?;
        buffer_attr.pre_buffering = ts.read_u32()?;
        buffer_attr.minimum_request_length = ts.read_u32()?;

        let sync_id = ts.read_u32()?;
        let volume = ts.read()?;

        if protocol_version >= 12 {
            flags.no_remap_channels = ts.read_bool()?;
            flags.no_remix_channels = ts.read_bool()?;
            flags.fix_format = ts.read_bool()?;
            flags.fix_rate = ts.read_bool()?;
            flags.fix_channels = ts.read_bool()?;
            flags.dont_move = ts.read_bool()?;
            flags.variable_rate = ts.read_bool()?;
        }

        let mut props = Props::new();
        if protocol_version >= 13 {
            flags.start_muted = ts.read_bool()?;
            flags.adjust_latency = ts.read_bool()?;
            props = ts.read()?;
        }

        Ok(Self {
            name,
            sample_spec,
            channel_map,
            sink_name,
            buffer_attr,
            sync_id,
            volume,
            flags,
            props,
        })
    }
}

impl TagStructWrite for PlaybackStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        if protocol_version < 13 {
            ts.write_string(self.name.as_ref())?;
        }

        ts.write(self.sample_spec)?;
        ts.write(self.channel_map)?;
        ts.write_index(None)?;
        ts.write_string(self.sink_name.as_ref())?;
        ts.write_u32(self.buffer_attr.max_length)?;
        ts.write_bool(self.flags.start_corked)?;
        ts.write_u32(self.buffer_attr.target_length)?;
        ts.write_u32(self.buffer_attr.pre_buffering)?;
        ts.write_u32(self.buffer_attr.minimum_request_length)?;
        ts.write_u32(self.sync_id)?;
        ts.write(self.volume)?;

        if protocol_version >= 12 {
            ts.write_bool(self.flags.no_remap_channels)?;
            ts.write_bool(self.flags.no_remix_channels)?;
            ts.write_bool(self.flags.fix_format)?;
            ts.write_bool(self.flags.fix_rate)?;
            ts.write_bool(self.flags.fix_channels)?;
            ts.write_bool(self.flags.dont_move)?;
            ts.write_bool(self.flags.variable_rate)?;
        }

        if protocol_version >= 13 {
            ts.write_bool(self.flags.start_muted)?;
            ts.write_bool(self.flags.adjust_latency)?;
            ts.write(&self.props)?;
        }

        Ok(())
    }
}

/// The server response to [`super::Command::CreatePlaybackStream`].
#[derive(Default, Debug, Clone, PartialEq)]
pub struct CreatePlaybackStreamReply {
    /// Channel ID, used in other commands to refer to this stream. Unlike
    /// the stream index, it is scoped to the connection.
    pub channel: u32,

    /// Server-internal stream ID.
    pub stream_index: u32,

    /// The number of bytes that can be written to the playback buffer right
    /// away.
    pub requested_bytes: u32,

    /// The negotiated buffer metrics. Version 9 and newer.
    pub buffer_attr: BufferAttr,

    /// The negotiated sample format. Version 12 and newer.
    pub sample_spec: Option<SampleSpec>,

    /// The negotiated channel map. Version 12 and newer.
    pub channel_map: Option<ChannelMap>,

    /// The index of the sink the stream was attached to. Version 12 and
    /// newer.
    pub sink_index: Option<u32>,

    /// The name of the sink the stream was attached to. Version 12 and
    /// newer.
    pub sink_name: Option<CString>,

    /// Whether the sink is currently suspended. Version 12 and newer.
    pub suspended: bool,

    /// The configured latency of the sink, in microseconds. Version 13 and
    /// newer.
    pub configured_sink_usec: Option<u64>,
}

impl CommandReply for CreatePlaybackStreamReply {}

impl TagStructRead for CreatePlaybackStreamReply {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut reply = Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            stream_index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid stream index".into()))?,
            requested_bytes: ts.read_u32()?,
            ..Default::default()
        };

        if protocol_version >= 9 {
            reply.buffer_attr = BufferAttr {
                max_length: ts.read_u32()?,
                target_length: ts.read_u32()?,
                pre_buffering: ts.read_u32()?,
                minimum_request_length: ts.read_u32()?,
                ..Default::default()
            };
        }

        if protocol_version >= 12 {
            reply.sample_spec = Some(ts.read()?);
            reply.channel_map = Some(ts.read()?);
            reply.sink_index = ts.read_index()?;
            reply.sink_name = ts.read_string()?;
            reply.suspended = ts.read_bool()?;
        }

        if protocol_version >= 13 {
            reply.configured_sink_usec = Some(ts.read_usec()?);
        }

        Ok(reply)
    }
}

impl TagStructWrite for CreatePlaybackStreamReply {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        ts.write_u32(self.stream_index)?;
        ts.write_u32(self.requested_bytes)?;

        if protocol_version >= 9 {
            ts.write_u32(self.buffer_attr.max_length)?;
            ts.write_u32(self.buffer_attr.target_length)?;
            ts.write_u32(self.buffer_attr.pre_buffering)?;
            ts.write_u32(self.buffer_attr.minimum_request_length)?;
        }

        if protocol_version >= 12 {
            ts.write(self.sample_spec.unwrap_or_default())?;
            ts.write(self.channel_map.unwrap_or_default())?;
            ts.write_index(self.sink_index)?;
            ts.write_string(self.sink_name.as_ref())?;
            ts.write_bool(self.suspended)?;
        }

        if protocol_version >= 13 {
            ts.write_usec(self.configured_sink_usec.unwrap_or(0))?;
        }

        Ok(())
    }
}

/// Parameters for [`super::Command::CreateRecordStream`].
#[derive(Default, Debug, Clone, PartialEq)]
pub struct RecordStreamParams {
    /// Stream name, sent as a leading string on protocol versions before 13.
    pub name: Option<CString>,

    /// Sample format for the stream.
    pub sample_spec: SampleSpec,

    /// Channel map for the stream.
    pub channel_map: ChannelMap,

    /// Name of the source to connect to, or None for the server default.
    pub source_name: Option<CString>,

    /// Requested buffer metrics. Only `max_length` and `fragment_size` are
    /// used.
    pub buffer_attr: BufferAttr,

    /// Stream options. `start_corked` and `peak_detect` are taken from here.
    pub flags: StreamFlags,

    /// Properties of the stream.
    pub props: Props,

    /// Sink input index to monitor directly, for version 13 and newer.
    pub direct_on_input: Option<u32>,
}

impl TagStructRead for RecordStreamParams {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let name = if protocol_version < 13 {
            ts.read_string()?
        } else {
            None
        };

        let sample_spec = ts.read()?;
        let channel_map = ts.read()?;
        let _source_index = ts.read_index()?;
        let source_name = ts.read_string()?;

        let mut buffer_attr = BufferAttr {
            max_length: ts.read_u32()?,
            ..Default::default()
        };

        let mut flags = StreamFlags {
            start_corked: ts.read_bool()?,
            ..Default::default()
        };

        buffer_attr.fragment_size = ts.read_u32()?;

        if protocol_version >= 12 {
            flags.no_remap_channels = ts.read_bool()?;
            flags.no_remix_channels = ts.read_bool()?;
            flags.fix_format = ts.read_bool()?;
            flags.fix_rate = ts.read_bool()?;
            flags.fix_channels = ts.read_bool()?;
            flags.dont_move = ts.read_bool()?;
            flags.variable_rate = ts.read_bool()?;
        }

        let mut props = Props::new();
        let mut direct_on_input = None;
        if protocol_version >= 13 {
            flags.peak_detect = ts.read_bool()?;
            flags.adjust_latency = ts.read_bool()?;
            props = ts.read()?;
            direct_on_input = ts.read_index()?;
        }

        Ok(Self {
            name,
            sample_spec,
            channel_map,
            source_name,
            buffer_attr,
            flags,
            props,
            direct_on_input,
        })
    }
}

impl TagStructWrite for RecordStreamParams {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        if protocol_version < 13 {
            ts.write_string(self.name.as_ref())?;
        }

        ts.write(self.sample_spec)?;
        ts.write(self.channel_map)?;
        ts.write_index(None)?;
        ts.write_string(self.source_name.as_ref())?;
        ts.write_u32(self.buffer_attr.max_length)?;
        ts.write_bool(self.flags.start_corked)?;
        ts.write_u32(self.buffer_attr.fragment_size)?;

        if protocol_version >= 12 {
            ts.write_bool(self.flags.no_remap_channels)?;
            ts.write_bool(self.flags.no_remix_channels)?;
            ts.write_bool(self.flags.fix_format)?;
            ts.write_bool(self.flags.fix_rate)?;
            ts.write_bool(self.flags.fix_channels)?;
            ts.write_bool(self.flags.dont_move)?;
            ts.write_bool(self.flags.variable_rate)?;
        }

        if protocol_version >= 13 {
            ts.write_bool(self.flags.peak_detect)?;
            ts.write_bool(self.flags.adjust_latency)?;
            ts.write(&self.props)?;
            ts.write_index(self.direct_on_input)?;
        }

        Ok(())
    }
}

/// The server response to [`super::Command::CreateRecordStream`].
#[derive(Default, Debug, Clone, PartialEq)]
pub struct CreateRecordStreamReply {
    /// Channel ID, used in other commands to refer to this stream.
    pub channel: u32,

    /// Server-internal stream ID.
    pub stream_index: u32,

    /// The negotiated buffer metrics. Version 9 and newer; only `max_length`
    /// and `fragment_size` are used.
    pub buffer_attr: BufferAttr,

    /// The negotiated sample format. Version 12 and newer.
    pub sample_spec: Option<SampleSpec>,

    /// The negotiated channel map. Version 12 and newer.
    pub channel_map: Option<ChannelMap>,

    /// The index of the source the stream was attached to. Version 12 and
    /// newer.
    pub source_index: Option<u32>,

    /// The name of the source the stream was attached to. Version 12 and
    /// newer.
    pub source_name: Option<CString>,

    /// Whether the source is currently suspended. Version 12 and newer.
    pub suspended: bool,

    /// The configured latency of the source, in microseconds. Version 13 and
    /// newer.
    pub configured_source_usec: Option<u64>,
}

impl CommandReply for CreateRecordStreamReply {}

impl TagStructRead for CreateRecordStreamReply {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut reply = Self {
            channel: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?,
            stream_index: ts
                .read_index()?
                .ok_or_else(|| ProtocolError::Invalid("invalid stream index".into()))?,
            ..Default::default()
        };

        if protocol_version >= 9 {
            reply.buffer_attr = BufferAttr {
                max_length: ts.read_u32()?,
                fragment_size: ts.read_u32()?,
                ..Default::default()
            };
        }

        if protocol_version >= 12 {
            reply.sample_spec = Some(ts.read()?);
            reply.channel_map = Some(ts.read()?);
            reply.source_index = ts.read_index()?;
            reply.source_name = ts.read_string()?;
            reply.suspended = ts.read_bool()?;
        }

        if protocol_version >= 13 {
            reply.configured_source_usec = Some(ts.read_usec()?);
        }

        Ok(reply)
    }
}

impl TagStructWrite for CreateRecordStreamReply {
    fn write(
        &self,
        ts: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        ts.write_u32(self.channel)?;
        ts.write_u32(self.stream_index)?;

        if protocol_version >= 9 {
            ts.write_u32(self.buffer_attr.max_length)?;
            ts.write_u32(self.buffer_attr.fragment_size)?;
        }

        if protocol_version >= 12 {
            ts.write(self.sample_spec.unwrap_or_default())?;
            ts.write(self.channel_map.unwrap_or_default())?;
            ts.write_index(self.source_index)?;
            ts.write_string(self.source_name.as_ref())?;
            ts.write_bool(self.suspended)?;
        }

        if protocol_version >= 13 {
            ts.write_usec(self.configured_source_usec.unwrap_or(0))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::test_util::test_serde_version;
    use crate::protocol::SampleFormat;

    use super::*;

    #[test]
    fn playback_params_serde() -> anyhow::Result<()> {
        let params = PlaybackStreamParams {
            name: Some(CString::new("music").unwrap()),
            sample_spec: SampleSpec {
                format: SampleFormat::S16Le,
                sample_rate: 44100,
                channels: 2,
            },
            channel_map: ChannelMap::stereo(),
            volume: ChannelVolume::norm(2),
            flags: StreamFlags {
                start_corked: true,
                ..Default::default()
            },
            ..Default::default()
        };

        // The name string only survives a round trip on legacy versions; the
        // proplist only on 13.
        test_serde_version(&params, 12)?;

        let params = PlaybackStreamParams {
            name: None,
            ..params
        };
        test_serde_version(&params, 13)
    }

    #[test]
    fn record_params_serde() -> anyhow::Result<()> {
        let params = RecordStreamParams {
            sample_spec: SampleSpec {
                format: SampleFormat::Float32Le,
                sample_rate: 48000,
                channels: 1,
            },
            channel_map: ChannelMap::mono(),
            buffer_attr: BufferAttr {
                fragment_size: 1024,
                ..Default::default()
            },
            direct_on_input: Some(42),
            ..Default::default()
        };

        test_serde_version(&params, 13)
    }

    #[test]
    fn playback_reply_serde() -> anyhow::Result<()> {
        let reply = CreatePlaybackStreamReply {
            channel: 0,
            stream_index: 1,
            requested_bytes: 4096,
            sample_spec: Some(SampleSpec::default()),
            channel_map: Some(ChannelMap::mono()),
            sink_index: Some(2),
            sink_name: Some(CString::new("sink").unwrap()),
            configured_sink_usec: Some(20_000),
            ..Default::default()
        };

        test_serde_version(&reply, 13)
    }

    #[test]
    fn record_reply_serde() -> anyhow::Result<()> {
        let reply = CreateRecordStreamReply {
            channel: 3,
            stream_index: 4,
            buffer_attr: BufferAttr {
                max_length: 1 << 20,
                fragment_size: 1024,
                ..Default::default()
            },
            sample_spec: Some(SampleSpec::default()),
            channel_map: Some(ChannelMap::mono()),
            source_index: Some(0),
            source_name: Some(CString::new("source").unwrap()),
            configured_source_usec: Some(10_000),
            ..Default::default()
        };

        test_serde_version(&reply, 13)
    }

    #[test]
    fn legacy_reply_drops_negotiated_format() -> anyhow::Result<()> {
        // On version 9 the reply carries the buffer metrics but none of the
        // negotiated format fields.
        let reply = CreatePlaybackStreamReply {
            channel: 0,
            stream_index: 1,
            requested_bytes: 4096,
            buffer_attr: BufferAttr {
                max_length: 1 << 20,
                target_length: 4096,
                pre_buffering: 4096,
                minimum_request_length: 1024,
                ..Default::default()
            },
            ..Default::default()
        };

        test_serde_version(&reply, 9)
    }
}
