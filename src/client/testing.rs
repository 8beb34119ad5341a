//! In-process doubles for the engine's collaborators, used by the unit
//! tests: a transport that records what was sent and completes replies on
//! demand, and a mainloop with hand-cranked clocks.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Cursor;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::protocol::{
    Command, CommandTag, ProtocolError, PulseError, SeekMode, TagStructReader, TagStructWrite,
    TagStructWriter, MAX_VERSION,
};

use super::mainloop::{Mainloop, TimerCallback, TimerHandle};
use super::memblock::{MemChunk, MemPool};
use super::transport::{ReplyHandler, ReplyOwner, Tag, Transport};
use super::Context;

/// A chunk as seen by the transport.
#[derive(Debug, Clone)]
pub(crate) struct SentChunk {
    pub(crate) channel: u32,
    pub(crate) offset: i64,
    pub(crate) seek: SeekMode,
    pub(crate) bytes: Vec<u8>,
}

/// A [`Transport`] that records everything and lets tests play the server.
#[derive(Default)]
pub(crate) struct MockTransport {
    shm: Cell<bool>,
    commands: RefCell<Vec<(Tag, Command)>>,
    chunks: RefCell<Vec<SentChunk>>,
    handlers: RefCell<HashMap<Tag, (ReplyOwner, ReplyHandler)>>,
}

impl MockTransport {
    pub(crate) fn new(shm: bool) -> Rc<Self> {
        let transport = Rc::new(Self::default());
        transport.shm.set(shm);
        transport
    }

    pub(crate) fn sent_commands(&self) -> Vec<(Tag, Command)> {
        self.commands.borrow().clone()
    }

    pub(crate) fn sent_chunks(&self) -> Vec<SentChunk> {
        self.chunks.borrow().clone()
    }

    /// The tag of the most recently sent command with the given opcode.
    pub(crate) fn last_tag_of(&self, tag: CommandTag) -> Tag {
        self.commands
            .borrow()
            .iter()
            .rev()
            .find(|(_, c)| c.tag() == tag)
            .map(|(t, _)| *t)
            .unwrap_or_else(|| panic!("no {:?} command was sent", tag))
    }

    pub(crate) fn count_of(&self, tag: CommandTag) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|(_, c)| c.tag() == tag)
            .count()
    }

    pub(crate) fn pending_reply_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    fn take_handler(&self, tag: Tag) -> ReplyHandler {
        self.handlers
            .borrow_mut()
            .remove(&tag)
            .map(|(_, handler)| handler)
            .unwrap_or_else(|| panic!("no reply handler registered for tag {}", tag))
    }

    /// Completes the command sent with `tag` with the given reply payload.
    pub(crate) fn complete<R: TagStructWrite>(&self, tag: Tag, version: u16, reply: &R) {
        let handler = self.take_handler(tag);

        let mut buf = Vec::new();
        {
            let mut w = TagStructWriter::new(&mut buf, version);
            w.write(reply).unwrap();
        }

        let mut cursor = Cursor::new(buf);
        let mut ts = TagStructReader::new(&mut cursor, version);
        handler(Ok(&mut ts));
    }

    /// Completes the command sent with `tag` with an empty (ack) reply.
    pub(crate) fn ack(&self, tag: Tag) {
        let handler = self.take_handler(tag);

        let mut cursor = Cursor::new(Vec::new());
        let mut ts = TagStructReader::new(&mut cursor, MAX_VERSION);
        handler(Ok(&mut ts));
    }

    /// Fails the command sent with `tag` with a server error.
    pub(crate) fn fail_reply(&self, tag: Tag, error: PulseError) {
        let handler = self.take_handler(tag);
        handler(Err(error));
    }
}

impl Transport for MockTransport {
    fn send_command(&self, tag: Tag, command: &Command) -> Result<(), ProtocolError> {
        self.commands.borrow_mut().push((tag, command.clone()));
        Ok(())
    }

    fn send_chunk(
        &self,
        channel: u32,
        offset: i64,
        seek: SeekMode,
        chunk: &MemChunk,
    ) -> Result<(), ProtocolError> {
        self.chunks.borrow_mut().push(SentChunk {
            channel,
            offset,
            seek,
            bytes: chunk.bytes().to_vec(),
        });
        Ok(())
    }

    fn register_reply(
        &self,
        tag: Tag,
        owner: ReplyOwner,
        _timeout: Duration,
        handler: ReplyHandler,
    ) {
        self.handlers.borrow_mut().insert(tag, (owner, handler));
    }

    fn unregister_replies(&self, owner: ReplyOwner) {
        self.handlers.borrow_mut().retain(|_, (o, _)| *o != owner);
    }

    fn shm_enabled(&self) -> bool {
        self.shm.get()
    }
}

struct MockTimer {
    deadline: u64,
    armed: bool,
    callback: Option<TimerCallback>,
}

/// A [`Mainloop`] with manually advanced clocks.
pub(crate) struct MockMainloop {
    now: Cell<u64>,
    wall_usec: Cell<u64>,
    next_id: Cell<u64>,
    timers: RefCell<HashMap<u64, MockTimer>>,
}

impl MockMainloop {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(1_000_000),
            // An arbitrary but stable wall clock epoch.
            wall_usec: Cell::new(1_000_000_000_000_000),
            next_id: Cell::new(1),
            timers: RefCell::new(HashMap::new()),
        })
    }

    pub(crate) fn wall_usec(&self) -> u64 {
        self.wall_usec.get()
    }

    pub(crate) fn wallclock_at(&self, usec: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(usec)
    }

    pub(crate) fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Advances both clocks and fires due timers.
    pub(crate) fn advance(&self, usec: u64) {
        let target = self.now.get() + usec;
        self.now.set(target);
        self.wall_usec.set(self.wall_usec.get() + usec);

        loop {
            let due = self
                .timers
                .borrow()
                .iter()
                .find(|(_, t)| t.armed && t.deadline <= target && t.callback.is_some())
                .map(|(id, _)| *id);
            let Some(id) = due else {
                break;
            };

            let callback = {
                let mut timers = self.timers.borrow_mut();
                let timer = timers.get_mut(&id).unwrap();
                timer.armed = false;
                timer.callback.take()
            };

            let Some(mut callback) = callback else {
                continue;
            };
            callback();

            let mut timers = self.timers.borrow_mut();
            if let Some(timer) = timers.get_mut(&id) {
                if timer.callback.is_none() {
                    timer.callback = Some(callback);
                }
            }
        }
    }
}

impl Mainloop for MockMainloop {
    fn monotonic_usec(&self) -> u64 {
        self.now.get()
    }

    fn wallclock(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(self.wall_usec.get())
    }

    fn timer_new(&self, at_usec: u64, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        self.timers.borrow_mut().insert(
            id,
            MockTimer {
                deadline: at_usec,
                armed: true,
                callback: Some(callback),
            },
        );

        TimerHandle(id)
    }

    fn timer_restart(&self, handle: TimerHandle, at_usec: u64) {
        if let Some(timer) = self.timers.borrow_mut().get_mut(&handle.0) {
            timer.deadline = at_usec;
            timer.armed = true;
        }
    }

    fn timer_free(&self, handle: TimerHandle) {
        self.timers.borrow_mut().remove(&handle.0);
    }
}

/// Everything a stream test needs, wired together.
pub(crate) struct TestRig {
    pub(crate) context: Context,
    pub(crate) transport: Rc<MockTransport>,
    pub(crate) mainloop: Rc<MockMainloop>,
}

pub(crate) fn rig(version: u16) -> TestRig {
    rig_with(version, false, 64 * 1024)
}

pub(crate) fn rig_with(version: u16, shm: bool, max_block: usize) -> TestRig {
    let transport = MockTransport::new(shm);
    let mainloop = MockMainloop::new();
    let context = Context::new(
        transport.clone(),
        mainloop.clone(),
        MemPool::new(max_block),
        version,
    );

    TestRig {
        context,
        transport,
        mainloop,
    }
}
