//! Commands are the top-level IPC structure used in the protocol.

use std::io::{BufRead, Write};

mod control;
mod events;
mod latency;
mod stream;

pub use control::*;
pub use events::*;
pub use latency::*;
pub use stream::*;

use super::{serde::*, ProtocolError};

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive as _;

/// The full table of command opcodes, including ones this library does not
/// send or accept.
#[allow(missing_docs)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum CommandTag {
    /* Generic commands */
    Error = 0,
    Timeout = 1, /* pseudo command */
    Reply = 2,   /* actually used for command replies */

    /* CLIENT->SERVER */
    CreatePlaybackStream = 3, /* Payload changed in v9, v12 (0.9.0, 0.9.8) */
    DeletePlaybackStream = 4,
    CreateRecordStream = 5, /* Payload changed in v9, v12 (0.9.0, 0.9.8) */
    DeleteRecordStream = 6,
    Exit = 7,
    Auth = 8,
    SetClientName = 9,
    LookupSink = 10,
    LookupSource = 11,
    DrainPlaybackStream = 12,
    Stat = 13,
    GetPlaybackLatency = 14,
    CreateUploadStream = 15,
    DeleteUploadStream = 16,
    FinishUploadStream = 17,
    PlaySample = 18,
    RemoveSample = 19,

    GetServerInfo = 20,
    GetSinkInfo = 21,
    GetSinkInfoList = 22,
    GetSourceInfo = 23,
    GetSourceInfoList = 24,
    GetModuleInfo = 25,
    GetModuleInfoList = 26,
    GetClientInfo = 27,
    GetClientInfoList = 28,
    GetSinkInputInfo = 29,     /* Payload changed in v11 (0.9.7) */
    GetSinkInputInfoList = 30, /* Payload changed in v11 (0.9.7) */
    GetSourceOutputInfo = 31,
    GetSourceOutputInfoList = 32,
    GetSampleInfo = 33,
    GetSampleInfoList = 34,
    Subscribe = 35,

    SetSinkVolume = 36,
    SetSinkInputVolume = 37,
    SetSourceVolume = 38,

    SetSinkMute = 39,
    SetSourceMute = 40,

    CorkPlaybackStream = 41,
    FlushPlaybackStream = 42,
    TriggerPlaybackStream = 43,

    SetDefaultSink = 44,
    SetDefaultSource = 45,

    SetPlaybackStreamName = 46,
    SetRecordStreamName = 47,

    KillClient = 48,
    KillSinkInput = 49,
    KillSourceOutput = 50,

    LoadModule = 51,
    UnloadModule = 52,

    /* Obsolete */
    AddAutoloadObsolete = 53,
    RemoveAutoloadObsolete = 54,
    GetAutoloadInfoObsolete = 55,
    GetAutoloadInfoListObsolete = 56,

    GetRecordLatency = 57,
    CorkRecordStream = 58,
    FlushRecordStream = 59,
    PrebufPlaybackStream = 60,

    /* SERVER->CLIENT */
    Request = 61,
    Overflow = 62,
    Underflow = 63,
    PlaybackStreamKilled = 64,
    RecordStreamKilled = 65,
    SubscribeEvent = 66,

    /* A few more client->server commands */

    /* Supported since protocol v10 (0.9.5) */
    MoveSinkInput = 67,
    MoveSourceOutput = 68,

    /* Supported since protocol v11 (0.9.7) */
    SetSinkInputMute = 69,

    SuspendSink = 70,
    SuspendSource = 71,

    /* Supported since protocol v12 (0.9.8) */
    SetPlaybackStreamBufferAttr = 72,
    SetRecordStreamBufferAttr = 73,

    UpdatePlaybackStreamSampleRate = 74,
    UpdateRecordStreamSampleRate = 75,

    /* SERVER->CLIENT */
    PlaybackStreamSuspended = 76,
    RecordStreamSuspended = 77,
    PlaybackStreamMoved = 78,
    RecordStreamMoved = 79,

    /* Supported since protocol v13 (0.9.11) */
    UpdateRecordStreamProplist = 80,
    UpdatePlaybackStreamProplist = 81,
    UpdateClientProplist = 82,
    RemoveRecordStreamProplist = 83,
    RemovePlaybackStreamProplist = 84,
    RemoveClientProplist = 85,

    /* SERVER->CLIENT */
    Started = 86,
}

impl TagStructRead for CommandTag {
    fn read(r: &mut TagStructReader<'_>, _protocol_version: u16) -> Result<Self, ProtocolError> {
        let v = r.read_u32()?;

        CommandTag::from_u32(v)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid command tag: {}", v)))
    }
}

impl TagStructWrite for CommandTag {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        w.write_u32(*self as u32)?;

        Ok(())
    }
}

/// A marker trait for reply data.
pub trait CommandReply: TagStructRead + TagStructWrite {}

/// A command sent or received by the stream engine, along with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A reply to some other command. If this is returned by
    /// [`Command::read_tag_prefixed`], the payload has yet to be read.
    Reply,

    /// Create a playback stream.
    CreatePlaybackStream(PlaybackStreamParams),
    /// Tear down a playback stream.
    DeletePlaybackStream(u32),
    /// Create a record stream.
    CreateRecordStream(RecordStreamParams),
    /// Tear down a record stream.
    DeleteRecordStream(u32),
    /// Tear down an upload stream.
    DeleteUploadStream(u32),

    /// Play buffered data to the end, then ack.
    DrainPlaybackStream(u32),
    /// Fetch a timing snapshot for a playback stream.
    GetPlaybackLatency(LatencyParams),
    /// Fetch a timing snapshot for a record stream.
    GetRecordLatency(LatencyParams),

    /// Pause or resume a playback stream.
    CorkPlaybackStream(CorkStreamParams),
    /// Pause or resume a record stream.
    CorkRecordStream(CorkStreamParams),
    /// Discard buffered data from a playback stream.
    FlushPlaybackStream(u32),
    /// Discard buffered data from a record stream.
    FlushRecordStream(u32),
    /// Re-enter the pre-buffering state.
    PrebufPlaybackStream(u32),
    /// Start playback immediately, ignoring the pre-buffering threshold.
    TriggerPlaybackStream(u32),

    /// Rename a playback stream (protocol versions before 13).
    SetPlaybackStreamName(SetStreamNameParams),
    /// Rename a record stream (protocol versions before 13).
    SetRecordStreamName(SetStreamNameParams),

    /// Reconfigure the buffer metrics of a playback stream.
    SetPlaybackStreamBufferAttr(SetPlaybackStreamBufferAttrParams),
    /// Reconfigure the buffer metrics of a record stream.
    SetRecordStreamBufferAttr(SetRecordStreamBufferAttrParams),

    /// Change the sample rate of a playback stream.
    UpdatePlaybackStreamSampleRate(UpdateSampleRateParams),
    /// Change the sample rate of a record stream.
    UpdateRecordStreamSampleRate(UpdateSampleRateParams),

    /// Update the property list of a playback stream.
    UpdatePlaybackStreamProplist(UpdatePropsParams),
    /// Update the property list of a record stream.
    UpdateRecordStreamProplist(UpdatePropsParams),
    /// Remove entries from the property list of a playback stream.
    RemovePlaybackStreamProplist(RemovePropsParams),
    /// Remove entries from the property list of a record stream.
    RemoveRecordStreamProplist(RemovePropsParams),

    /// Sent by the server to ask for more data on a playback stream.
    Request(Request),
    /// Sent by the server when a playback buffer overruns.
    Overflow(u32),
    /// Sent by the server when a playback buffer underruns.
    Underflow(u32),
    /// Sent by the server when a playback stream is killed.
    PlaybackStreamKilled(u32),
    /// Sent by the server when a record stream is killed.
    RecordStreamKilled(u32),
    /// Sent by the server when a playback stream moves between devices.
    PlaybackStreamMoved(PlaybackStreamMovedParams),
    /// Sent by the server when a record stream moves between devices.
    RecordStreamMoved(RecordStreamMovedParams),
    /// Sent by the server when a playback stream's device suspends/resumes.
    PlaybackStreamSuspended(StreamSuspendedParams),
    /// Sent by the server when a record stream's device suspends/resumes.
    RecordStreamSuspended(StreamSuspendedParams),
    /// Sent by the server when a playback stream leaves the pre-buffering
    /// state and starts to play.
    Started(u32),
}

impl Command {
    /// Reads a command preceded by its opcode and sequence number.
    pub fn read_tag_prefixed<R: BufRead>(
        r: &mut R,
        protocol_version: u16,
    ) -> Result<(u32, Self), ProtocolError> {
        let mut ts = TagStructReader::new(r, protocol_version);
        let (command, seq) = (ts.read_enum()?, ts.read_u32()?);

        let cmd = match command {
            CommandTag::Error => Err(ProtocolError::ServerError(ts.read_enum()?)),
            CommandTag::Timeout => Err(ProtocolError::Timeout),
            CommandTag::Reply => Ok(Command::Reply),

            CommandTag::CreatePlaybackStream => Ok(Command::CreatePlaybackStream(ts.read()?)),
            CommandTag::DeletePlaybackStream => Ok(Command::DeletePlaybackStream(ts.read_u32()?)),
            CommandTag::CreateRecordStream => Ok(Command::CreateRecordStream(ts.read()?)),
            CommandTag::DeleteRecordStream => Ok(Command::DeleteRecordStream(ts.read_u32()?)),
            CommandTag::DeleteUploadStream => Ok(Command::DeleteUploadStream(ts.read_u32()?)),

            CommandTag::DrainPlaybackStream => Ok(Command::DrainPlaybackStream(ts.read_u32()?)),
            CommandTag::GetPlaybackLatency => Ok(Command::GetPlaybackLatency(ts.read()?)),
            CommandTag::GetRecordLatency => Ok(Command::GetRecordLatency(ts.read()?)),

            CommandTag::CorkPlaybackStream => Ok(Command::CorkPlaybackStream(ts.read()?)),
            CommandTag::CorkRecordStream => Ok(Command::CorkRecordStream(ts.read()?)),
            CommandTag::FlushPlaybackStream => Ok(Command::FlushPlaybackStream(ts.read_u32()?)),
            CommandTag::FlushRecordStream => Ok(Command::FlushRecordStream(ts.read_u32()?)),
            CommandTag::PrebufPlaybackStream => Ok(Command::PrebufPlaybackStream(ts.read_u32()?)),
            CommandTag::TriggerPlaybackStream => {
                Ok(Command::TriggerPlaybackStream(ts.read_u32()?))
            }

            CommandTag::SetPlaybackStreamName => Ok(Command::SetPlaybackStreamName(ts.read()?)),
            CommandTag::SetRecordStreamName => Ok(Command::SetRecordStreamName(ts.read()?)),

            CommandTag::SetPlaybackStreamBufferAttr => {
                Ok(Command::SetPlaybackStreamBufferAttr(ts.read()?))
            }
            CommandTag::SetRecordStreamBufferAttr => {
                Ok(Command::SetRecordStreamBufferAttr(ts.read()?))
            }

            CommandTag::UpdatePlaybackStreamSampleRate => {
                Ok(Command::UpdatePlaybackStreamSampleRate(ts.read()?))
            }
            CommandTag::UpdateRecordStreamSampleRate => {
                Ok(Command::UpdateRecordStreamSampleRate(ts.read()?))
            }

            CommandTag::UpdatePlaybackStreamProplist => {
                Ok(Command::UpdatePlaybackStreamProplist(ts.read()?))
            }
            CommandTag::UpdateRecordStreamProplist => {
                Ok(Command::UpdateRecordStreamProplist(ts.read()?))
            }
            CommandTag::RemovePlaybackStreamProplist => {
                Ok(Command::RemovePlaybackStreamProplist(ts.read()?))
            }
            CommandTag::RemoveRecordStreamProplist => {
                Ok(Command::RemoveRecordStreamProplist(ts.read()?))
            }

            CommandTag::Request => Ok(Command::Request(ts.read()?)),
            CommandTag::Overflow => Ok(Command::Overflow(ts.read_u32()?)),
            CommandTag::Underflow => Ok(Command::Underflow(ts.read_u32()?)),
            CommandTag::PlaybackStreamKilled => Ok(Command::PlaybackStreamKilled(ts.read_u32()?)),
            CommandTag::RecordStreamKilled => Ok(Command::RecordStreamKilled(ts.read_u32()?)),
            CommandTag::PlaybackStreamMoved => Ok(Command::PlaybackStreamMoved(ts.read()?)),
            CommandTag::RecordStreamMoved => Ok(Command::RecordStreamMoved(ts.read()?)),
            CommandTag::PlaybackStreamSuspended => {
                Ok(Command::PlaybackStreamSuspended(ts.read()?))
            }
            CommandTag::RecordStreamSuspended => Ok(Command::RecordStreamSuspended(ts.read()?)),
            CommandTag::Started => Ok(Command::Started(ts.read_u32()?)),

            _ => Err(ProtocolError::Unimplemented(command)),
        }?;

        Ok((seq, cmd))
    }

    /// Writes the command preceded by its opcode and sequence number.
    pub fn write_tag_prefixed<W: Write>(
        &self,
        seq: u32,
        w: &mut W,
        protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        let mut ts = TagStructWriter::new(w, protocol_version);

        ts.write_u32(self.tag() as u32)?;
        ts.write_u32(seq)?;
        ts.write(self)?;

        Ok(())
    }

    /// Returns the opcode for the command.
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Reply => CommandTag::Reply,

            Command::CreatePlaybackStream(_) => CommandTag::CreatePlaybackStream,
            Command::DeletePlaybackStream(_) => CommandTag::DeletePlaybackStream,
            Command::CreateRecordStream(_) => CommandTag::CreateRecordStream,
            Command::DeleteRecordStream(_) => CommandTag::DeleteRecordStream,
            Command::DeleteUploadStream(_) => CommandTag::DeleteUploadStream,

            Command::DrainPlaybackStream(_) => CommandTag::DrainPlaybackStream,
            Command::GetPlaybackLatency(_) => CommandTag::GetPlaybackLatency,
            Command::GetRecordLatency(_) => CommandTag::GetRecordLatency,

            Command::CorkPlaybackStream(_) => CommandTag::CorkPlaybackStream,
            Command::CorkRecordStream(_) => CommandTag::CorkRecordStream,
            Command::FlushPlaybackStream(_) => CommandTag::FlushPlaybackStream,
            Command::FlushRecordStream(_) => CommandTag::FlushRecordStream,
            Command::PrebufPlaybackStream(_) => CommandTag::PrebufPlaybackStream,
            Command::TriggerPlaybackStream(_) => CommandTag::TriggerPlaybackStream,

            Command::SetPlaybackStreamName(_) => CommandTag::SetPlaybackStreamName,
            Command::SetRecordStreamName(_) => CommandTag::SetRecordStreamName,

            Command::SetPlaybackStreamBufferAttr(_) => CommandTag::SetPlaybackStreamBufferAttr,
            Command::SetRecordStreamBufferAttr(_) => CommandTag::SetRecordStreamBufferAttr,

            Command::UpdatePlaybackStreamSampleRate(_) => {
                CommandTag::UpdatePlaybackStreamSampleRate
            }
            Command::UpdateRecordStreamSampleRate(_) => CommandTag::UpdateRecordStreamSampleRate,

            Command::UpdatePlaybackStreamProplist(_) => CommandTag::UpdatePlaybackStreamProplist,
            Command::UpdateRecordStreamProplist(_) => CommandTag::UpdateRecordStreamProplist,
            Command::RemovePlaybackStreamProplist(_) => CommandTag::RemovePlaybackStreamProplist,
            Command::RemoveRecordStreamProplist(_) => CommandTag::RemoveRecordStreamProplist,

            Command::Request(_) => CommandTag::Request,
            Command::Overflow(_) => CommandTag::Overflow,
            Command::Underflow(_) => CommandTag::Underflow,
            Command::PlaybackStreamKilled(_) => CommandTag::PlaybackStreamKilled,
            Command::RecordStreamKilled(_) => CommandTag::RecordStreamKilled,
            Command::PlaybackStreamMoved(_) => CommandTag::PlaybackStreamMoved,
            Command::RecordStreamMoved(_) => CommandTag::RecordStreamMoved,
            Command::PlaybackStreamSuspended(_) => CommandTag::PlaybackStreamSuspended,
            Command::RecordStreamSuspended(_) => CommandTag::RecordStreamSuspended,
            Command::Started(_) => CommandTag::Started,
        }
    }
}

impl TagStructWrite for Command {
    fn write(
        &self,
        w: &mut TagStructWriter<'_>,
        _protocol_version: u16,
    ) -> Result<(), ProtocolError> {
        match self {
            Command::Reply => Ok(()),

            Command::CreatePlaybackStream(ref p) => w.write(p),
            Command::CreateRecordStream(ref p) => w.write(p),
            Command::GetPlaybackLatency(ref p) | Command::GetRecordLatency(ref p) => w.write(p),
            Command::CorkPlaybackStream(ref p) | Command::CorkRecordStream(ref p) => w.write(p),
            Command::SetPlaybackStreamName(ref p) | Command::SetRecordStreamName(ref p) => {
                w.write(p)
            }
            Command::SetPlaybackStreamBufferAttr(ref p) => w.write(p),
            Command::SetRecordStreamBufferAttr(ref p) => w.write(p),
            Command::UpdatePlaybackStreamSampleRate(ref p)
            | Command::UpdateRecordStreamSampleRate(ref p) => w.write(p),
            Command::UpdatePlaybackStreamProplist(ref p)
            | Command::UpdateRecordStreamProplist(ref p) => w.write(p),
            Command::RemovePlaybackStreamProplist(ref p)
            | Command::RemoveRecordStreamProplist(ref p) => w.write(p),

            Command::Request(ref p) => w.write(p),
            Command::PlaybackStreamMoved(ref p) => w.write(p),
            Command::RecordStreamMoved(ref p) => w.write(p),
            Command::PlaybackStreamSuspended(ref p) | Command::RecordStreamSuspended(ref p) => {
                w.write(p)
            }

            Command::DeletePlaybackStream(chan)
            | Command::DeleteRecordStream(chan)
            | Command::DeleteUploadStream(chan)
            | Command::DrainPlaybackStream(chan)
            | Command::FlushPlaybackStream(chan)
            | Command::FlushRecordStream(chan)
            | Command::PrebufPlaybackStream(chan)
            | Command::TriggerPlaybackStream(chan)
            | Command::Overflow(chan)
            | Command::Underflow(chan)
            | Command::PlaybackStreamKilled(chan)
            | Command::RecordStreamKilled(chan)
            | Command::Started(chan) => w.write_u32(*chan),
        }
    }
}
