//! The parent object streams hang off.
//!
//! The connection handshake and authentication happen elsewhere; by the time
//! a context exists it knows the negotiated protocol version and holds the
//! transport, the event loop, and the memory pool. What lives here is the
//! bookkeeping shared between streams: the command tag counter, the
//! per-direction channel tables, the stream and operation lists, and the
//! last error code. Server-initiated events and inbound record data enter
//! the engine through the context and are routed to the right stream.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::protocol::{Command, PulseError, StreamDirection};

use super::mainloop::Mainloop;
use super::memblock::{MemChunk, MemPool};
use super::operation::{Operation, SuccessCallback};
use super::stream::{Stream, StreamState};
use super::transport::{Tag, Transport};

struct ContextShared {
    ctag: Tag,
    next_stream_id: u64,
    next_sync_id: u32,
    error: Option<PulseError>,
    failed: bool,
    streams: Vec<Stream>,
    playback_channels: HashMap<u32, Stream>,
    record_channels: HashMap<u32, Stream>,
    operations: Vec<Operation>,
}

/// A handle to the shared client state. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    version: u16,
    transport: Rc<dyn Transport>,
    mainloop: Rc<dyn Mainloop>,
    mempool: MemPool,
    shared: Rc<RefCell<ContextShared>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("version", &self.version)
            .field("failed", &self.shared.borrow().failed)
            .finish()
    }
}

impl Context {
    /// Creates a context over an established connection.
    ///
    /// `version` is the protocol version negotiated during the handshake,
    /// capped at [`crate::protocol::MAX_VERSION`].
    pub fn new(
        transport: Rc<dyn Transport>,
        mainloop: Rc<dyn Mainloop>,
        mempool: MemPool,
        version: u16,
    ) -> Self {
        Self {
            version,
            transport,
            mainloop,
            mempool,
            shared: Rc::new(RefCell::new(ContextShared {
                ctag: 0,
                next_stream_id: 0,
                next_sync_id: 0,
                error: None,
                failed: false,
                streams: Vec::new(),
                playback_channels: HashMap::new(),
                record_channels: HashMap::new(),
                operations: Vec::new(),
            })),
        }
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// The transport commands and sample data are sent through.
    pub fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    /// The event loop the engine runs on.
    pub fn mainloop(&self) -> &Rc<dyn Mainloop> {
        &self.mainloop
    }

    /// The memory pool sample data is staged in.
    pub fn mempool(&self) -> &MemPool {
        &self.mempool
    }

    /// Allocates the next command sequence number.
    pub fn next_tag(&self) -> Tag {
        let mut shared = self.shared.borrow_mut();
        let tag = shared.ctag;
        shared.ctag += 1;
        tag
    }

    /// The next sequence number that will be allocated. Used as an
    /// invalidation barrier by the timing model.
    pub fn current_tag(&self) -> Tag {
        self.shared.borrow().ctag
    }

    pub(crate) fn next_sync_id(&self) -> u32 {
        let mut shared = self.shared.borrow_mut();
        let id = shared.next_sync_id;
        shared.next_sync_id += 1;
        id
    }

    pub(crate) fn next_stream_id(&self) -> u64 {
        let mut shared = self.shared.borrow_mut();
        let id = shared.next_stream_id;
        shared.next_stream_id += 1;
        id
    }

    /// The most recent error code recorded on this context.
    pub fn last_error(&self) -> Option<PulseError> {
        self.shared.borrow().error
    }

    /// Records an error code without failing the context.
    pub fn set_error(&self, error: PulseError) {
        self.shared.borrow_mut().error = Some(error);
    }

    /// Whether the context is still usable.
    pub fn is_ready(&self) -> bool {
        !self.shared.borrow().failed
    }

    /// Fails the whole context: records the error and moves every stream to
    /// the failed state. Used for unrecoverable conditions, in particular
    /// protocol violations.
    pub fn fail(&self, error: PulseError) {
        let streams = {
            let mut shared = self.shared.borrow_mut();
            if shared.failed {
                return;
            }

            shared.error = Some(error);
            shared.failed = true;
            shared.streams.clone()
        };

        log::error!("context failed: {:?}", error);

        for stream in streams {
            stream.set_state(StreamState::Failed);
        }
    }

    pub(crate) fn register_stream(&self, stream: &Stream) {
        self.shared.borrow_mut().streams.push(stream.clone());
    }

    pub(crate) fn remove_stream(&self, stream_id: u64) {
        self.shared
            .borrow_mut()
            .streams
            .retain(|s| s.id() != stream_id);
    }

    pub(crate) fn linked_stream_count(&self) -> usize {
        self.shared.borrow().streams.len()
    }

    pub(crate) fn insert_channel(&self, direction: StreamDirection, channel: u32, stream: Stream) {
        let mut shared = self.shared.borrow_mut();
        let table = match direction {
            StreamDirection::Record => &mut shared.record_channels,
            _ => &mut shared.playback_channels,
        };
        table.insert(channel, stream);
    }

    pub(crate) fn remove_channel(&self, direction: StreamDirection, channel: u32) {
        let mut shared = self.shared.borrow_mut();
        let table = match direction {
            StreamDirection::Record => &mut shared.record_channels,
            _ => &mut shared.playback_channels,
        };
        table.remove(&channel);
    }

    /// Looks up the stream registered for a channel.
    pub fn stream_by_channel(&self, direction: StreamDirection, channel: u32) -> Option<Stream> {
        let shared = self.shared.borrow();
        let table = match direction {
            StreamDirection::Record => &shared.record_channels,
            _ => &shared.playback_channels,
        };
        table.get(&channel).cloned()
    }

    pub(crate) fn new_operation(
        &self,
        stream: &Stream,
        callback: Option<SuccessCallback>,
    ) -> Operation {
        let operation = Operation::new(self.clone(), stream.id(), callback);
        self.shared.borrow_mut().operations.push(operation.clone());
        operation
    }

    pub(crate) fn forget_operation(&self, operation: &Operation) {
        self.shared
            .borrow_mut()
            .operations
            .retain(|o| !o.same_as(operation));
    }

    pub(crate) fn cancel_stream_operations(&self, stream_id: u64) {
        let doomed: Vec<Operation> = self
            .shared
            .borrow()
            .operations
            .iter()
            .filter(|o| o.stream_id() == stream_id)
            .cloned()
            .collect();

        for operation in doomed {
            operation.cancel();
        }
    }

    pub(crate) fn pending_operation_count(&self) -> usize {
        self.shared.borrow().operations.len()
    }

    /// Routes a server-initiated command to the stream it addresses.
    ///
    /// The transport driver calls this for every inbound command that is not
    /// a reply. Events for unknown channels are logged and dropped; events
    /// that require a newer protocol version than was negotiated fail the
    /// context.
    pub fn dispatch_event(&self, command: Command) {
        use StreamDirection::{Playback, Record};

        log::debug!("SERVER: {:?}", command);

        match command {
            Command::Request(req) => {
                if let Some(s) = self.stream_by_channel(Playback, req.channel) {
                    s.handle_request(req.length as usize);
                } else {
                    log::warn!("REQUEST for unknown playback stream {}", req.channel);
                }
            }

            Command::Overflow(channel) => {
                if let Some(s) = self.stream_by_channel(Playback, channel) {
                    s.handle_overflow();
                }
            }

            Command::Underflow(channel) => {
                if let Some(s) = self.stream_by_channel(Playback, channel) {
                    s.handle_underflow();
                }
            }

            Command::PlaybackStreamKilled(channel) => {
                if let Some(s) = self.stream_by_channel(Playback, channel) {
                    s.handle_killed();
                }
            }

            Command::RecordStreamKilled(channel) => {
                if let Some(s) = self.stream_by_channel(Record, channel) {
                    s.handle_killed();
                }
            }

            Command::PlaybackStreamMoved(params) => {
                if self.version < 12 {
                    self.fail(PulseError::Protocol);
                    return;
                }

                if let Some(s) = self.stream_by_channel(Playback, params.channel) {
                    s.handle_moved(
                        params.device_index,
                        params.device_name,
                        params.device_suspended,
                        params.buffer_attr,
                        params.configured_sink_usec,
                    );
                }
            }

            Command::RecordStreamMoved(params) => {
                if self.version < 12 {
                    self.fail(PulseError::Protocol);
                    return;
                }

                if let Some(s) = self.stream_by_channel(Record, params.channel) {
                    s.handle_moved(
                        params.device_index,
                        params.device_name,
                        params.device_suspended,
                        params.buffer_attr,
                        params.configured_source_usec,
                    );
                }
            }

            Command::PlaybackStreamSuspended(params) => {
                if self.version < 12 {
                    self.fail(PulseError::Protocol);
                    return;
                }

                if let Some(s) = self.stream_by_channel(Playback, params.channel) {
                    s.handle_suspended(params.suspended);
                }
            }

            Command::RecordStreamSuspended(params) => {
                if self.version < 12 {
                    self.fail(PulseError::Protocol);
                    return;
                }

                if let Some(s) = self.stream_by_channel(Record, params.channel) {
                    s.handle_suspended(params.suspended);
                }
            }

            Command::Started(channel) => {
                if self.version < 13 {
                    self.fail(PulseError::Protocol);
                    return;
                }

                if let Some(s) = self.stream_by_channel(Playback, channel) {
                    s.handle_started();
                }
            }

            other => {
                log::warn!("ignoring unexpected command: {:?}", other);
            }
        }
    }

    /// Feeds a chunk of inbound sample data to the record stream on
    /// `channel`. Called by the transport driver for memblock packets.
    pub fn deliver_record(&self, channel: u32, chunk: MemChunk) {
        match self.stream_by_channel(StreamDirection::Record, channel) {
            Some(stream) => stream.handle_record_data(chunk),
            None => log::warn!("sample data for unknown record stream {}", channel),
        }
    }
}
