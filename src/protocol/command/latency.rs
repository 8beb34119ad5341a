//! The latency query and its replies, the raw material of the timing model.

use std::time::SystemTime;

use crate::protocol::{serde::*, ProtocolError};

use super::CommandReply;

/// Parameters for [`super::Command::GetPlaybackLatency`] and
/// [`super::Command::GetRecordLatency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyParams {
    /// The channel to get latency for.
    pub channel: u32,
    /// The client's wall clock at the time of the query. The server echoes
    /// it back, which is what makes the clock-sync heuristic possible.
    pub now: SystemTime,
}

impl TagStructRead for LatencyParams {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel: ts.read_u32()?,
            now: ts.read_timeval()?,
        })
    }
}

impl TagStructWrite for LatencyParams {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(self.channel)?;
        w.write_timeval(self.now)?;
        Ok(())
    }
}

/// The server reply to [`super::Command::GetPlaybackLatency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackLatency {
    /// The latency of the sink device buffer, in microseconds.
    pub sink_usec: u64,

    /// The latency of the source device buffer, in microseconds.
    pub source_usec: u64,

    /// Whether the stream is currently playing.
    pub playing: bool,

    /// The client timestamp from the query, echoed back.
    pub local_time: SystemTime,

    /// The server's wall clock when it answered.
    pub remote_time: SystemTime,

    /// The server-side write index of the playback buffer.
    pub write_index: i64,

    /// The server-side read index of the playback buffer.
    pub read_index: i64,

    /// How many bytes the stream has been underrunning for. Version 13 and
    /// newer.
    pub underrun_for: u64,

    /// How many bytes the stream has been playing for since the last
    /// underrun. Version 13 and newer.
    pub playing_for: u64,
}

impl Default for PlaybackLatency {
    fn default() -> Self {
        Self {
            sink_usec: 0,
            source_usec: 0,
            playing: false,
            local_time: SystemTime::UNIX_EPOCH,
            remote_time: SystemTime::UNIX_EPOCH,
            write_index: 0,
            read_index: 0,
            underrun_for: 0,
            playing_for: 0,
        }
    }
}

impl CommandReply for PlaybackLatency {}

impl TagStructRead for PlaybackLatency {
    fn read(ts: &mut TagStructReader<'_>, protocol_version: u16) -> Result<Self, ProtocolError> {
        let mut latency = Self {
            sink_usec: ts.read_usec()?,
            source_usec: ts.read_usec()?,
            playing: ts.read_bool()?,
            local_time: ts.read_timeval()?,
            remote_time: ts.read_timeval()?,
            write_index: ts.read_i64()?,
            read_index: ts.read_i64()?,
            ..Default::default()
        };

        if protocol_version >= 13 {
            latency.underrun_for = ts.read_u64()?;
            latency.playing_for = ts.read_u64()?;
        }

        Ok(latency)
    }
}

impl TagStructWrite for PlaybackLatency {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_usec(self.sink_usec)?;
        w.write_usec(self.source_usec)?;
        w.write_bool(self.playing)?;
        w.write_timeval(self.local_time)?;
        w.write_timeval(self.remote_time)?;
        w.write_i64(self.write_index)?;
        w.write_i64(self.read_index)?;

        if protocol_version >= 13 {
            w.write_u64(self.underrun_for)?;
            w.write_u64(self.playing_for)?;
        }

        Ok(())
    }
}

/// The server reply to [`super::Command::GetRecordLatency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLatency {
    /// The latency of the monitored sink device buffer, in microseconds.
    pub sink_usec: u64,

    /// The latency of the source device buffer, in microseconds.
    pub source_usec: u64,

    /// Whether the stream is currently running.
    pub playing: bool,

    /// The client timestamp from the query, echoed back.
    pub local_time: SystemTime,

    /// The server's wall clock when it answered.
    pub remote_time: SystemTime,

    /// The server-side write index of the record buffer.
    pub write_index: i64,

    /// The server-side read index of the record buffer.
    pub read_index: i64,
}

impl Default for RecordLatency {
    fn default() -> Self {
        Self {
            sink_usec: 0,
            source_usec: 0,
            playing: false,
            local_time: SystemTime::UNIX_EPOCH,
            remote_time: SystemTime::UNIX_EPOCH,
            write_index: 0,
            read_index: 0,
        }
    }
}

impl CommandReply for RecordLatency {}

impl TagStructRead for RecordLatency {
    fn read(ts: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        Ok(Self {
            sink_usec: ts.read_usec()?,
            source_usec: ts.read_usec()?,
            playing: ts.read_bool()?,
            local_time: ts.read_timeval()?,
            remote_time: ts.read_timeval()?,
            write_index: ts.read_i64()?,
            read_index: ts.read_i64()?,
        })
    }
}

impl TagStructWrite for RecordLatency {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_usec(self.sink_usec)?;
        w.write_usec(self.source_usec)?;
        w.write_bool(self.playing)?;
        w.write_timeval(self.local_time)?;
        w.write_timeval(self.remote_time)?;
        w.write_i64(self.write_index)?;
        w.write_i64(self.read_index)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{test_util::*, MAX_VERSION};
    use std::time::{Duration, SystemTime};

    #[test]
    fn latency_params_serde() -> anyhow::Result<()> {
        let params = LatencyParams {
            channel: 1,
            now: SystemTime::UNIX_EPOCH + Duration::from_micros(123_456_789),
        };

        test_serde(&params)
    }

    #[test]
    fn playback_latency_serde() -> anyhow::Result<()> {
        let latency = PlaybackLatency {
            sink_usec: 1,
            source_usec: 2,
            playing: true,
            local_time: SystemTime::UNIX_EPOCH,
            remote_time: SystemTime::UNIX_EPOCH + Duration::from_micros(10),
            write_index: 3,
            read_index: 4,
            underrun_for: 5,
            playing_for: 6,
        };

        test_serde_version(&latency, MAX_VERSION)
    }

    #[test]
    fn playback_latency_serde_pre_13() -> anyhow::Result<()> {
        let latency = PlaybackLatency {
            sink_usec: 1,
            source_usec: 2,
            write_index: -3,
            read_index: 4,
            ..Default::default()
        };

        test_serde_version(&latency, 12)
    }

    #[test]
    fn record_latency_serde() -> anyhow::Result<()> {
        let latency = RecordLatency {
            sink_usec: 1,
            source_usec: 2,
            playing: true,
            local_time: SystemTime::UNIX_EPOCH,
            remote_time: SystemTime::UNIX_EPOCH,
            write_index: 3,
            read_index: -4,
        };

        test_serde_version(&latency, MAX_VERSION)
    }
}
