//! The framed transport abstraction the engine sends through.

use std::time::Duration;

use crate::protocol::{Command, ProtocolError, PulseError, SeekMode, TagStructReader};

use super::memblock::MemChunk;

/// A command sequence number. Tags are allocated by the
/// [`Context`](super::Context) and increase monotonically; the timing model
/// leans on that ordering.
pub type Tag = u32;

/// Identifies the owner of a set of reply registrations, so they can be
/// dropped in bulk when a stream unlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyOwner(pub u64);

/// How long the transport should wait for a reply before synthesizing a
/// timeout error.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// A handler for a command reply.
///
/// On success the handler is given a tagstruct positioned at the start of
/// the reply payload. The closure is invoked at most once; if the
/// registration is dropped instead (stream unlink, transport teardown), the
/// closure is dropped unharmed, releasing whatever it captured.
pub type ReplyHandler = Box<dyn for<'a, 'b> FnOnce(Result<&'a mut TagStructReader<'b>, PulseError>)>;

/// Wraps a closure as a [`ReplyHandler`] trait object.
pub fn reply_handler<F>(f: F) -> ReplyHandler
where
    F: for<'a, 'b> FnOnce(Result<&'a mut TagStructReader<'b>, PulseError>) + 'static,
{
    Box::new(f)
}

/// The contract a framed packet transport implements for the engine.
///
/// Implementations frame and queue outbound messages, dispatch inbound
/// replies by tag, and hand everything else (server events, stream data) to
/// the context. All calls are made from the event loop thread.
pub trait Transport {
    /// Sends a tagged command message.
    fn send_command(&self, tag: Tag, command: &Command) -> Result<(), ProtocolError>;

    /// Sends a chunk of sample data on a stream channel.
    fn send_chunk(
        &self,
        channel: u32,
        offset: i64,
        seek: SeekMode,
        chunk: &MemChunk,
    ) -> Result<(), ProtocolError>;

    /// Registers a handler for the reply to the command sent with `tag`.
    fn register_reply(&self, tag: Tag, owner: ReplyOwner, timeout: Duration, handler: ReplyHandler);

    /// Drops every registered reply handler belonging to `owner`. The
    /// handlers are not invoked.
    fn unregister_replies(&self, owner: ReplyOwner);

    /// Whether the transport shares memory with the server. When it does,
    /// pool blocks are visible to the server without a copy, and caller
    /// buffers have to be copied into the pool; when it does not, caller
    /// buffers can be referenced directly while the data is streamed out.
    fn shm_enabled(&self) -> bool;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transport")
    }
}
