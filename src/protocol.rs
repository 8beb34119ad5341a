//! An implementation of the PulseAudio IPC protocol, as seen by a client.

pub mod command;
mod error;
pub mod serde;

mod channel_map;
mod props;
mod sample_spec;
mod stream;
mod volume;

use std::io::{BufRead, Read, Write};

use bitflags::bitflags;
use byteorder::NetworkEndian;

pub use channel_map::*;
pub use command::*;
pub use error::*;
pub use props::*;
pub use sample_spec::*;
pub use serde::{Tag, TagStructRead, TagStructReader, TagStructWrite, TagStructWriter};
pub use stream::*;
pub use volume::*;

/// Minimum protocol version understood by the library.
pub const MIN_VERSION: u16 = 8;

/// PulseAudio protocol version implemented by this library.
///
/// Servers speaking a higher version are still usable; features added after
/// this version are simply never negotiated.
pub const MAX_VERSION: u16 = 13;

/// The size of a message header.
pub const DESCRIPTOR_SIZE: usize = 5 * 4;

bitflags! {
    /// Special message types, carried in the flags field of a [`Descriptor`].
    ///
    /// For memblock packets the lowest byte of the flags field carries the
    /// [`SeekMode`] instead.
    #[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DescriptorFlags: u32 {
        /// Indicates a SHMRELEASE message.
        const FLAG_SHMRELEASE = 0x40000000;

        /// Indicates a SHMREVOKE message.
        const FLAG_SHMREVOKE = 0xC0000000;
    }
}

/// Packet descriptor / header.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// Payload length in bytes.
    pub length: u32,
    /// The channel this packet belongs to, or -1 for a control packet.
    pub channel: u32,
    /// Seek offset for memblock packets, in bytes.
    pub offset: i64,
    /// [`DescriptorFlags`], or the seek mode in the lowest byte for memblock
    /// packets.
    pub flags: u32,
}

impl Descriptor {
    /// Returns the seek mode encoded in the flags, for memblock packets.
    pub fn seek_mode(&self) -> Option<SeekMode> {
        use num_traits::FromPrimitive as _;
        SeekMode::from_u32(self.flags & 0xFF)
    }
}

/// Reads a message header from an input stream.
pub fn read_descriptor<R: Read>(r: &mut R) -> Result<Descriptor, ProtocolError> {
    use byteorder::ReadBytesExt;

    let length = r.read_u32::<NetworkEndian>()?;
    let channel = r.read_u32::<NetworkEndian>()?;
    let offset = r.read_i64::<NetworkEndian>()?;
    let flags = r.read_u32::<NetworkEndian>()?;

    Ok(Descriptor {
        length,
        channel,
        offset,
        flags,
    })
}

/// Writes a message header to an output stream.
pub fn write_descriptor<W: Write>(w: &mut W, desc: &Descriptor) -> Result<(), ProtocolError> {
    use byteorder::WriteBytesExt;

    w.write_u32::<NetworkEndian>(desc.length)?;
    w.write_u32::<NetworkEndian>(desc.channel)?;
    w.write_i64::<NetworkEndian>(desc.offset)?;
    w.write_u32::<NetworkEndian>(desc.flags)?;

    Ok(())
}

/// Reads a command message from an input stream. If the result is
/// [`Command::Reply`], the payload is command-specific and must be read
/// immediately afterwards.
pub fn read_command_message<R: BufRead>(
    r: &mut R,
    protocol_version: u16,
) -> Result<(u32, Command), ProtocolError> {
    let desc = read_descriptor(r)?;
    Command::read_tag_prefixed(&mut r.take(desc.length as u64), protocol_version)
}

/// Writes a command message to an output stream. This allocates a temporary
/// buffer to encode the command payload.
pub fn write_command_message<W: Write>(
    w: &mut W,
    seq: u32,
    command: &Command,
    protocol_version: u16,
) -> Result<(), ProtocolError> {
    let mut buf = Vec::new();
    command.write_tag_prefixed(seq, &mut buf, protocol_version)?;

    let length = buf
        .len()
        .try_into()
        .map_err(|_| ProtocolError::Invalid("message payload greater than 4gb".to_string()))?;

    let desc = Descriptor {
        length,
        channel: u32::MAX,
        offset: 0,
        flags: 0,
    };

    write_descriptor(w, &desc)?;
    w.write_all(&buf)?;

    Ok(())
}

/// Writes a stream chunk, with the seek mode encoded in the descriptor flags.
pub fn write_memblock<W: Write>(
    w: &mut W,
    channel: u32,
    offset: i64,
    seek: SeekMode,
    chunk: &[u8],
) -> Result<(), ProtocolError> {
    let desc = Descriptor {
        length: chunk.len() as u32,
        channel,
        offset,
        flags: seek as u32,
    };

    write_descriptor(w, &desc)?;
    w.write_all(chunk)?;

    Ok(())
}

/// Reads reply data from the server.
pub fn read_reply_message<T: CommandReply>(
    r: &mut impl BufRead,
    protocol_version: u16,
) -> Result<(u32, T), ProtocolError> {
    let desc = read_descriptor(r)?;

    let mut r = r.take(desc.length as u64);
    let mut ts = TagStructReader::new(&mut r, protocol_version);
    let (cmd, seq) = (ts.read_enum()?, ts.read_u32()?);

    match cmd {
        CommandTag::Error => {
            let error = ts.read_enum()?;
            Err(ProtocolError::ServerError(error))
        }
        CommandTag::Reply => Ok((seq, T::read(&mut ts, protocol_version)?)),
        _ => Err(ProtocolError::UnexpectedCommand(cmd)),
    }
}

/// Reads an ack (an empty reply) from the server.
pub fn read_ack_message(r: &mut impl BufRead) -> Result<u32, ProtocolError> {
    let desc = read_descriptor(r)?;

    let mut r = r.take(desc.length as u64);

    // Protocol version doesn't matter for this.
    let mut ts = TagStructReader::new(&mut r, MAX_VERSION);
    let (cmd, seq) = (ts.read_enum()?, ts.read_u32()?);

    match cmd {
        CommandTag::Error => {
            let error = ts.read_enum()?;
            Err(ProtocolError::ServerError(error))
        }
        CommandTag::Reply => Ok(seq),
        _ => Err(ProtocolError::UnexpectedCommand(cmd)),
    }
}
