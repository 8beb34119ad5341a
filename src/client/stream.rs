//! The per-stream engine.
//!
//! A [`Stream`] is the client's handle on one playback, record, or upload
//! channel. It owns the lifecycle state machine, the credit accounting for
//! playback data, the local queue for record data, and the timing model that
//! turns asynchronous latency snapshots into an accurate "where is playback
//! right now" estimate.
//!
//! All of it runs cooperatively on one event loop: methods return
//! immediately, completions arrive through reply callbacks, and callbacks
//! never run concurrently with each other.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use crate::protocol::{
    BufferAttr, ChannelMap, ChannelVolume, Command, CorkStreamParams, LatencyParams,
    PlaybackStreamParams, Prop, Props, PropsUpdateMode, ProtocolError, PulseError,
    RecordStreamParams, RemovePropsParams, SampleSpec, SeekMode, SetPlaybackStreamBufferAttrParams,
    SetPlaybackStreamBufferAttrReply, SetRecordStreamBufferAttrParams,
    SetRecordStreamBufferAttrReply, SetStreamNameParams, StreamDirection, StreamFlags,
    TagStructReader, UpdatePropsParams, UpdateSampleRateParams, RATE_MAX,
};

use super::context::Context;
use super::mainloop::TimerHandle;
use super::memblock::{MemBlock, MemChunk};
use super::memblockq::MemBlockQ;
use super::operation::{Operation, SuccessCallback};
use super::smoother::{
    Smoother, SMOOTHER_ADJUST_TIME, SMOOTHER_HISTORY_TIME, SMOOTHER_MIN_HISTORY,
};
use super::transport::{reply_handler, ReplyOwner, Tag, DEFAULT_REPLY_TIMEOUT};
use super::{Error, Result};

/// The interval of the automatic timing refresh timer.
const AUTO_TIMING_INTERVAL_USEC: u64 = 333_000;

/// The number of latency queries that may be outstanding at once.
pub const MAX_WRITE_INDEX_CORRECTIONS: usize = 10;

/// The lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// The stream is not yet connected to a channel.
    Unconnected,
    /// A create command has been sent and the reply is pending.
    Creating,
    /// The stream is live: data and control operations are accepted.
    Ready,
    /// The stream failed, either at creation or later (e.g. killed by the
    /// server).
    Failed,
    /// The stream was cleanly disconnected.
    Terminated,
}

impl StreamState {
    /// Returns true for the states a stream can never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Failed | StreamState::Terminated)
    }
}

/// A timing snapshot, assembled from the server's latency replies and
/// corrected for local activity that the server has not seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    /// The reference moment the snapshot describes.
    pub timestamp: SystemTime,

    /// Whether the client's and server's wall clocks agreed well enough for
    /// direct comparison when the snapshot was taken.
    pub synchronized_clocks: bool,

    /// Device-side buffer latency of the sink, in microseconds.
    pub sink_usec: u64,

    /// Device-side buffer latency of the source, in microseconds.
    pub source_usec: u64,

    /// Estimated one-way transport delay at snapshot time, in microseconds.
    pub transport_usec: u64,

    /// Whether the stream was playing (or capturing) at snapshot time.
    pub playing: bool,

    /// The byte position writes go to, server-authoritative but corrected
    /// for writes and seeks issued since the query.
    pub write_index: i64,

    /// Set when `write_index` cannot currently be trusted.
    pub write_index_corrupt: bool,

    /// The byte position of the sample currently leaving the buffer.
    pub read_index: i64,

    /// Set when `read_index` cannot currently be trusted.
    pub read_index_corrupt: bool,

    /// The sink latency configured for the stream, in microseconds.
    /// Protocol version 13 and newer.
    pub configured_sink_usec: u64,

    /// The source latency configured for the stream, in microseconds.
    /// Protocol version 13 and newer.
    pub configured_source_usec: u64,

    /// Bytes played since the last underrun, or the length of the current
    /// underrun. Protocol version 13 and newer.
    pub since_underrun: u64,
}

impl Default for TimingInfo {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::UNIX_EPOCH,
            synchronized_clocks: false,
            sink_usec: 0,
            source_usec: 0,
            transport_usec: 0,
            playing: false,
            write_index: 0,
            write_index_corrupt: false,
            read_index: 0,
            read_index_corrupt: false,
            configured_sink_usec: 0,
            configured_source_usec: 0,
            since_underrun: 0,
        }
    }
}

/// One slot of the write-index correction ring. Each outstanding latency
/// query owns a slot that accumulates the writes and seeks issued while the
/// query is in flight.
#[derive(Debug, Default, Clone, Copy)]
struct WriteIndexCorrection {
    valid: bool,
    tag: Tag,
    value: i64,
    absolute: bool,
    corrupt: bool,
}

/// A callback reporting a state change or server event.
pub type NotifyCallback = Box<dyn FnMut(&Stream)>;

/// A callback reporting that data can be written or read, with the byte
/// count.
pub type RequestCallback = Box<dyn FnMut(&Stream, usize)>;

#[derive(Default)]
struct Callbacks {
    state: Option<NotifyCallback>,
    write: Option<RequestCallback>,
    read: Option<RequestCallback>,
    overflow: Option<NotifyCallback>,
    underflow: Option<NotifyCallback>,
    latency_update: Option<NotifyCallback>,
    moved: Option<NotifyCallback>,
    suspended: Option<NotifyCallback>,
    started: Option<NotifyCallback>,
}

struct StreamInner {
    id: u64,
    context: Option<Context>,

    state: StreamState,
    direction: StreamDirection,
    flags: StreamFlags,

    sample_spec: SampleSpec,
    channel_map: ChannelMap,
    props: Props,
    direct_on_input: Option<u32>,

    channel: u32,
    channel_valid: bool,
    stream_index: Option<u32>,
    sync_id: u32,

    buffer_attr: BufferAttr,
    requested_bytes: usize,

    device_index: Option<u32>,
    device_name: Option<CString>,
    suspended: bool,
    corked: bool,

    record_queue: Option<MemBlockQ>,
    peek_chunk: Option<MemChunk>,

    timing_info: TimingInfo,
    timing_info_valid: bool,
    previous_time: u64,

    read_index_not_before: Tag,
    write_index_not_before: Tag,
    write_index_corrections: [WriteIndexCorrection; MAX_WRITE_INDEX_CORRECTIONS],
    current_write_index_correction: usize,

    auto_timing_event: Option<TimerHandle>,
    auto_timing_requested: bool,

    smoother: Option<Smoother>,

    callbacks: Callbacks,
}

/// A handle on one audio stream. Cheap to clone; all clones refer to the
/// same stream.
#[derive(Clone)]
pub struct Stream {
    inner: Rc<RefCell<StreamInner>>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Stream")
            .field("state", &inner.state)
            .field("direction", &inner.direction)
            .field("channel", &inner.channel)
            .finish()
    }
}

/// Validates a condition, recording the matching error code on the context
/// and bailing out when it does not hold.
macro_rules! check {
    ($ctx:expr, $cond:expr, $err:expr) => {
        if !($cond) {
            let err = $err;
            $ctx.set_error(err.code());
            return Err(err);
        }
    };
}

enum WriteData<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl WriteData<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            WriteData::Borrowed(data) => data,
            WriteData::Owned(data) => data,
        }
    }
}

impl Stream {
    /// Creates a new, unconnected stream.
    ///
    /// `name` is stored as the stream's media name property. The channel map
    /// defaults to a standard map for the spec's channel count.
    pub fn new(
        context: &Context,
        name: &CStr,
        sample_spec: &SampleSpec,
        channel_map: Option<&ChannelMap>,
    ) -> Result<Self> {
        Self::new_with_proplist(context, Some(name), sample_spec, channel_map, Props::new())
    }

    /// Creates a new, unconnected stream with an initial property list.
    ///
    /// At least one of `name` and a `media.name` entry in `props` must be
    /// given.
    pub fn new_with_proplist(
        context: &Context,
        name: Option<&CStr>,
        sample_spec: &SampleSpec,
        channel_map: Option<&ChannelMap>,
        mut props: Props,
    ) -> Result<Self> {
        check!(context, sample_spec.valid(), Error::InvalidArgument);

        // S32 sample formats only exist on the wire from version 12 on.
        check!(
            context,
            context.version() >= 12 || !sample_spec.format.is_s32(),
            Error::NotSupported
        );

        if let Some(map) = channel_map {
            check!(
                context,
                map.num_channels() == sample_spec.channels,
                Error::InvalidArgument
            );
        }

        check!(
            context,
            name.is_some() || props.contains(Prop::MediaName),
            Error::InvalidArgument
        );

        let channel_map = match channel_map {
            Some(map) => *map,
            None => {
                let Some(map) = ChannelMap::auto(sample_spec.channels) else {
                    context.set_error(PulseError::Invalid);
                    return Err(Error::InvalidArgument);
                };
                map
            }
        };

        if let Some(name) = name {
            props.set(Prop::MediaName, name);
        }

        let mut buffer_attr = BufferAttr::default();

        // If the caller never passes explicit buffer metrics, default to
        // 250ms of buffering, similar to what older servers provided.
        buffer_attr.target_length = sample_spec.usec_to_bytes(250_000) as u32;

        let stream = Stream {
            inner: Rc::new(RefCell::new(StreamInner {
                id: context.next_stream_id(),
                context: Some(context.clone()),

                state: StreamState::Unconnected,
                direction: StreamDirection::None,
                flags: StreamFlags::default(),

                sample_spec: *sample_spec,
                channel_map,
                props,
                direct_on_input: None,

                channel: 0,
                channel_valid: false,
                stream_index: None,
                sync_id: context.next_sync_id(),

                buffer_attr,
                requested_bytes: 0,

                device_index: None,
                device_name: None,
                suspended: false,
                corked: false,

                record_queue: None,
                peek_chunk: None,

                timing_info: TimingInfo::default(),
                timing_info_valid: false,
                previous_time: 0,

                read_index_not_before: 0,
                write_index_not_before: 0,
                write_index_corrections: [WriteIndexCorrection::default();
                    MAX_WRITE_INDEX_CORRECTIONS],
                current_write_index_correction: 0,

                auto_timing_event: None,
                auto_timing_requested: false,

                smoother: None,

                callbacks: Callbacks::default(),
            })),
        };

        // The context's stream list keeps the stream alive until it unlinks.
        context.register_stream(&stream);

        Ok(stream)
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// The context this stream belongs to, or None once it has unlinked.
    pub fn context(&self) -> Option<Context> {
        self.inner.borrow().context.clone()
    }

    fn linked_context(&self) -> Result<Context> {
        self.context().ok_or(Error::BadState)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.inner.borrow().state
    }

    /// The direction the stream was connected with.
    pub fn direction(&self) -> StreamDirection {
        self.inner.borrow().direction
    }

    /// The sync group id of this stream.
    pub fn sync_id(&self) -> u32 {
        self.inner.borrow().sync_id
    }

    /// The server-side stream index, available once the stream is ready.
    pub fn index(&self) -> Result<u32> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        inner.stream_index.ok_or(Error::BadState)
    }

    /// The sample spec of the stream. After connecting, this is the
    /// negotiated spec, which can differ from the requested one when fix
    /// flags are set.
    pub fn sample_spec(&self) -> SampleSpec {
        self.inner.borrow().sample_spec
    }

    /// The channel map of the stream.
    pub fn channel_map(&self) -> ChannelMap {
        self.inner.borrow().channel_map
    }

    /// The buffer metrics in effect, as negotiated with the server.
    pub fn buffer_attr(&self) -> Result<BufferAttr> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Upload,
            Error::BadState
        );
        check!(context, context.version() >= 9, Error::NotSupported);
        Ok(inner.buffer_attr)
    }

    /// The index of the device the stream is attached to.
    pub fn device_index(&self) -> Result<u32> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Upload,
            Error::BadState
        );
        check!(context, context.version() >= 12, Error::NotSupported);
        inner.device_index.ok_or(Error::BadState)
    }

    /// The name of the device the stream is attached to.
    pub fn device_name(&self) -> Result<CString> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Upload,
            Error::BadState
        );
        check!(context, context.version() >= 12, Error::NotSupported);
        inner.device_name.clone().ok_or(Error::BadState)
    }

    /// Whether the device the stream is attached to is suspended.
    pub fn is_suspended(&self) -> Result<bool> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Upload,
            Error::BadState
        );
        check!(context, context.version() >= 12, Error::NotSupported);
        Ok(inner.suspended)
    }

    /// Whether the stream is corked.
    pub fn is_corked(&self) -> Result<bool> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Upload,
            Error::BadState
        );
        Ok(inner.corked)
    }

    /// The most recent timing snapshot.
    pub fn timing_info(&self) -> Result<TimingInfo> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Upload,
            Error::BadState
        );
        check!(context, inner.timing_info_valid, Error::NoData);
        Ok(inner.timing_info)
    }

    /// Binds a record stream to capture directly from one sink input rather
    /// than the whole device. Must be called before connecting.
    pub fn set_monitor_stream(&self, sink_input_index: u32) -> Result<()> {
        let context = self.linked_context()?;
        check!(context, sink_input_index != u32::MAX, Error::InvalidArgument);
        check!(
            context,
            self.state() == StreamState::Unconnected,
            Error::BadState
        );
        check!(context, context.version() >= 13, Error::NotSupported);

        self.inner.borrow_mut().direct_on_input = Some(sink_input_index);
        Ok(())
    }

    /// The sink input a record stream is bound to, if any.
    pub fn monitor_stream(&self) -> Option<u32> {
        self.inner.borrow().direct_on_input
    }

    // Callback setters. Terminal streams silently refuse new callbacks so a
    // callback installed from within a teardown notification cannot leak.

    /// Sets the callback invoked on every lifecycle state change.
    pub fn set_state_callback(&self, callback: Option<NotifyCallback>) {
        self.set_callback(|c| &mut c.state, callback);
    }

    /// Sets the callback invoked when the server requests playback data.
    pub fn set_write_callback(&self, callback: Option<RequestCallback>) {
        let mut inner = self.inner.borrow_mut();
        if !inner.state.is_terminal() {
            inner.callbacks.write = callback;
        }
    }

    /// Sets the callback invoked when captured data becomes readable.
    pub fn set_read_callback(&self, callback: Option<RequestCallback>) {
        let mut inner = self.inner.borrow_mut();
        if !inner.state.is_terminal() {
            inner.callbacks.read = callback;
        }
    }

    /// Sets the callback invoked on playback buffer overflow.
    pub fn set_overflow_callback(&self, callback: Option<NotifyCallback>) {
        self.set_callback(|c| &mut c.overflow, callback);
    }

    /// Sets the callback invoked on playback buffer underflow.
    pub fn set_underflow_callback(&self, callback: Option<NotifyCallback>) {
        self.set_callback(|c| &mut c.underflow, callback);
    }

    /// Sets the callback invoked whenever a fresh timing snapshot arrives.
    pub fn set_latency_update_callback(&self, callback: Option<NotifyCallback>) {
        self.set_callback(|c| &mut c.latency_update, callback);
    }

    /// Sets the callback invoked when the stream is moved to a different
    /// device.
    pub fn set_moved_callback(&self, callback: Option<NotifyCallback>) {
        self.set_callback(|c| &mut c.moved, callback);
    }

    /// Sets the callback invoked when the stream's device is suspended or
    /// resumed.
    pub fn set_suspended_callback(&self, callback: Option<NotifyCallback>) {
        self.set_callback(|c| &mut c.suspended, callback);
    }

    /// Sets the callback invoked when playback actually starts after
    /// pre-buffering.
    pub fn set_started_callback(&self, callback: Option<NotifyCallback>) {
        self.set_callback(|c| &mut c.started, callback);
    }

    fn set_callback(
        &self,
        select: fn(&mut Callbacks) -> &mut Option<NotifyCallback>,
        callback: Option<NotifyCallback>,
    ) {
        let mut inner = self.inner.borrow_mut();
        if !inner.state.is_terminal() {
            *select(&mut inner.callbacks) = callback;
        }
    }

    fn fire_notify(&self, select: fn(&mut Callbacks) -> &mut Option<NotifyCallback>) {
        let callback = select(&mut self.inner.borrow_mut().callbacks).take();
        let Some(mut callback) = callback else {
            return;
        };

        callback(self);

        // Reinstall unless the callback replaced itself or tore the stream
        // down.
        let mut inner = self.inner.borrow_mut();
        if inner.context.is_some() {
            let slot = select(&mut inner.callbacks);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    fn fire_request(&self, select: fn(&mut Callbacks) -> &mut Option<RequestCallback>, n: usize) {
        let callback = select(&mut self.inner.borrow_mut().callbacks).take();
        let Some(mut callback) = callback else {
            return;
        };

        callback(self, n);

        let mut inner = self.inner.borrow_mut();
        if inner.context.is_some() {
            let slot = select(&mut inner.callbacks);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }

    /// Moves the stream to a new lifecycle state, notifying the application
    /// and unlinking on terminal transitions.
    pub(crate) fn set_state(&self, state: StreamState) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state == state {
                return;
            }
            inner.state = state;
        }

        log::debug!("stream {:?} now {:?}", self.inner.borrow().channel, state);

        self.fire_notify(|c| &mut c.state);

        if state.is_terminal() {
            self.unlink();
        }
    }

    /// Detaches the stream from its context: cancels its operations, drops
    /// its pending replies, clears its channel registration and callbacks,
    /// and releases the reference the context held.
    fn unlink(&self) {
        let context = self.inner.borrow_mut().context.take();
        let Some(context) = context else {
            return;
        };

        let id = self.id();
        context.cancel_stream_operations(id);
        context.transport().unregister_replies(ReplyOwner(id));

        let timer = {
            let mut inner = self.inner.borrow_mut();
            if inner.channel_valid {
                context.remove_channel(inner.direction, inner.channel);
                inner.channel = 0;
                inner.channel_valid = false;
            }

            inner.callbacks = Callbacks::default();
            inner.auto_timing_event.take()
        };

        if let Some(timer) = timer {
            context.mainloop().timer_free(timer);
        }

        context.remove_stream(id);
    }

    // ---- Connect / negotiate ----

    /// Connects the stream for playback.
    ///
    /// `device` selects the sink by name, defaulting to the server's choice.
    /// `volume` defaults to full volume, and `sync_with` joins this stream
    /// to another playback stream's sync group so they start atomically.
    pub fn connect_playback(
        &self,
        device: Option<&CStr>,
        attr: Option<&BufferAttr>,
        flags: StreamFlags,
        volume: Option<ChannelVolume>,
        sync_with: Option<&Stream>,
    ) -> Result<()> {
        self.create_stream(StreamDirection::Playback, device, attr, flags, volume, sync_with)
    }

    /// Connects the stream for recording.
    pub fn connect_record(
        &self,
        device: Option<&CStr>,
        attr: Option<&BufferAttr>,
        flags: StreamFlags,
    ) -> Result<()> {
        self.create_stream(StreamDirection::Record, device, attr, flags, None, None)
    }

    fn create_stream(
        &self,
        direction: StreamDirection,
        device: Option<&CStr>,
        attr: Option<&BufferAttr>,
        flags: StreamFlags,
        volume: Option<ChannelVolume>,
        sync_with: Option<&Stream>,
    ) -> Result<()> {
        use StreamDirection::{Playback, Record};

        let context = self.linked_context()?;

        {
            let inner = self.inner.borrow();
            check!(
                context,
                inner.state == StreamState::Unconnected,
                Error::BadState
            );
            check!(
                context,
                inner.direct_on_input.is_none() || direction == Record,
                Error::BadState
            );
            check!(
                context,
                context.version() >= 12 || !flags.variable_rate,
                Error::NotSupported
            );
            check!(
                context,
                context.version() >= 13 || !flags.peak_detect,
                Error::NotSupported
            );
            check!(
                context,
                direction == Playback || !flags.start_muted,
                Error::InvalidArgument
            );
            check!(
                context,
                direction == Record || !flags.peak_detect,
                Error::InvalidArgument
            );
            check!(
                context,
                volume
                    .as_ref()
                    .map_or(true, |v| v.channels().len() == inner.sample_spec.channels as usize),
                Error::InvalidArgument
            );
            check!(
                context,
                sync_with.map_or(true, |other| direction == Playback
                    && other.direction() == Playback),
                Error::InvalidArgument
            );
        }

        let command = {
            let mut inner = self.inner.borrow_mut();

            inner.direction = direction;
            inner.flags = flags;
            inner.corked = flags.start_corked;

            if let Some(other) = sync_with {
                inner.sync_id = other.sync_id();
            }

            if let Some(attr) = attr {
                inner.buffer_attr = *attr;
            }

            if context.version() < 13 {
                let sample_spec = inner.sample_spec;
                automatic_buffer_attr(&mut inner.buffer_attr, &sample_spec);
            }

            if flags.interpolate_timing {
                let x = context.mainloop().monotonic_usec();
                let mut smoother = Smoother::new(
                    SMOOTHER_ADJUST_TIME,
                    SMOOTHER_HISTORY_TIME,
                    !flags.not_monotonic,
                    SMOOTHER_MIN_HISTORY,
                );
                smoother.set_time_offset(x);
                smoother.pause(x);
                inner.smoother = Some(smoother);
            }

            // Legacy servers take the stream name as a leading string; newer
            // ones read it from the property list.
            let name = if context.version() < 13 {
                inner
                    .props
                    .get(Prop::MediaName)
                    .and_then(|bytes| CString::from_vec_with_nul(bytes.to_vec()).ok())
            } else {
                None
            };

            match direction {
                Playback => Command::CreatePlaybackStream(PlaybackStreamParams {
                    name,
                    sample_spec: inner.sample_spec,
                    channel_map: inner.channel_map,
                    sink_name: device.map(|d| d.to_owned()),
                    buffer_attr: inner.buffer_attr,
                    sync_id: inner.sync_id,
                    volume: volume
                        .unwrap_or_else(|| ChannelVolume::norm(inner.sample_spec.channels)),
                    flags,
                    props: inner.props.clone(),
                }),
                _ => Command::CreateRecordStream(RecordStreamParams {
                    name,
                    sample_spec: inner.sample_spec,
                    channel_map: inner.channel_map,
                    source_name: device.map(|d| d.to_owned()),
                    buffer_attr: inner.buffer_attr,
                    flags,
                    props: inner.props.clone(),
                    direct_on_input: inner.direct_on_input,
                }),
            }
        };

        let tag = context.next_tag();
        context
            .transport()
            .send_command(tag, &command)
            .map_err(Error::Protocol)?;

        let stream = self.clone();
        context.transport().register_reply(
            tag,
            ReplyOwner(self.id()),
            DEFAULT_REPLY_TIMEOUT,
            reply_handler(move |res| stream.on_create_reply(res)),
        );

        self.set_state(StreamState::Creating);
        Ok(())
    }

    fn on_create_reply(
        &self,
        res: std::result::Result<&mut TagStructReader<'_>, PulseError>,
    ) {
        let Some(context) = self.context() else {
            return;
        };

        let ts = match res {
            Err(err) => {
                context.set_error(err);
                self.set_state(StreamState::Failed);
                return;
            }
            Ok(ts) => ts,
        };

        if let Err(err) = self.apply_create_reply(&context, ts) {
            log::warn!("malformed stream create reply: {}", err);
            context.fail(PulseError::Protocol);
            return;
        }

        let (direction, channel, requested, auto_timing) = {
            let mut inner = self.inner.borrow_mut();
            inner.channel_valid = true;
            (
                inner.direction,
                inner.channel,
                inner.requested_bytes,
                inner.flags.auto_timing_update,
            )
        };
        context.insert_channel(direction, channel, self.clone());

        self.set_state(StreamState::Ready);
        if self.state() != StreamState::Ready {
            // The state callback tore the stream down.
            return;
        }

        if requested > 0 {
            self.fire_request(|c| &mut c.write, requested);
        }

        if auto_timing {
            let handle = {
                let mainloop = context.mainloop();
                let weak = Rc::downgrade(&self.inner);
                mainloop.timer_new(
                    mainloop.monotonic_usec() + AUTO_TIMING_INTERVAL_USEC,
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            Stream { inner }.request_auto_timing_update(false);
                        }
                    }),
                )
            };
            self.inner.borrow_mut().auto_timing_event = Some(handle);

            self.request_auto_timing_update(true);
        }
    }

    fn apply_create_reply(
        &self,
        context: &Context,
        ts: &mut TagStructReader<'_>,
    ) -> std::result::Result<(), ProtocolError> {
        use StreamDirection::{Playback, Record, Upload};

        let version = context.version();
        let mut inner = self.inner.borrow_mut();
        let direction = inner.direction;

        let channel = ts
            .read_index()?
            .ok_or_else(|| ProtocolError::Invalid("invalid channel".into()))?;

        if direction != Upload {
            inner.stream_index = Some(
                ts.read_index()?
                    .ok_or_else(|| ProtocolError::Invalid("invalid stream index".into()))?,
            );
        }

        if direction != Record {
            inner.requested_bytes = ts.read_u32()? as usize;
        }

        if version >= 9 {
            match direction {
                Playback => {
                    inner.buffer_attr.max_length = ts.read_u32()?;
                    inner.buffer_attr.target_length = ts.read_u32()?;
                    inner.buffer_attr.pre_buffering = ts.read_u32()?;
                    inner.buffer_attr.minimum_request_length = ts.read_u32()?;
                }
                Record => {
                    inner.buffer_attr.max_length = ts.read_u32()?;
                    inner.buffer_attr.fragment_size = ts.read_u32()?;
                }
                _ => {}
            }
        }

        if version >= 12 && direction != Upload {
            let sample_spec: SampleSpec = ts.read()?;
            let channel_map: ChannelMap = ts.read()?;
            let device_index = ts.read_index()?;
            let device_name = ts.read_string()?;
            let suspended = ts.read_bool()?;

            let invalid = |what: &str| ProtocolError::Invalid(what.into());

            if device_index.is_none() || device_name.is_none() {
                return Err(invalid("missing device in create reply"));
            }
            if !sample_spec.valid() || channel_map.num_channels() != sample_spec.channels {
                return Err(invalid("invalid negotiated format"));
            }

            // Unless a fix flag allowed the server to pick, the negotiated
            // format must match what we asked for.
            if (!inner.flags.fix_format && sample_spec.format != inner.sample_spec.format)
                || (!inner.flags.fix_rate
                    && sample_spec.sample_rate != inner.sample_spec.sample_rate)
                || (!inner.flags.fix_channels && channel_map != inner.channel_map)
            {
                return Err(invalid("negotiated format does not match request"));
            }

            inner.device_index = device_index;
            inner.device_name = device_name;
            inner.suspended = suspended;
            inner.sample_spec = sample_spec;
            inner.channel_map = channel_map;
        }

        if version >= 13 && direction != Upload {
            let usec = ts.read_usec()?;
            if direction == Record {
                inner.timing_info.configured_source_usec = usec;
            } else {
                inner.timing_info.configured_sink_usec = usec;
            }
        }

        ts.eof()?;

        if direction == Record {
            debug_assert!(inner.record_queue.is_none());
            inner.record_queue = Some(MemBlockQ::new(
                inner.buffer_attr.max_length as usize,
                inner.sample_spec.frame_size(),
            ));
        }

        inner.channel = channel;
        Ok(())
    }

    /// Tears the stream down cleanly. Completion arrives via the state
    /// callback, with the stream ending up terminated (or failed, if the
    /// server objected).
    pub fn disconnect(&self) -> Result<()> {
        use StreamDirection::{Playback, Record};

        let context = self.linked_context()?;

        let (direction, channel) = {
            let inner = self.inner.borrow();
            check!(context, inner.channel_valid, Error::BadState);
            check!(context, context.is_ready(), Error::BadState);
            (inner.direction, inner.channel)
        };

        let command = match direction {
            Playback => Command::DeletePlaybackStream(channel),
            Record => Command::DeleteRecordStream(channel),
            _ => Command::DeleteUploadStream(channel),
        };

        let tag = context.next_tag();
        context
            .transport()
            .send_command(tag, &command)
            .map_err(Error::Protocol)?;

        let stream = self.clone();
        context.transport().register_reply(
            tag,
            ReplyOwner(self.id()),
            DEFAULT_REPLY_TIMEOUT,
            reply_handler(move |res| stream.on_disconnect_reply(res)),
        );

        Ok(())
    }

    fn on_disconnect_reply(
        &self,
        res: std::result::Result<&mut TagStructReader<'_>, PulseError>,
    ) {
        let Some(context) = self.context() else {
            return;
        };

        match res {
            Err(err) => {
                context.set_error(err);
                self.set_state(StreamState::Failed);
            }
            Ok(ts) => match ts.eof() {
                Ok(()) => self.set_state(StreamState::Terminated),
                Err(_) => context.fail(PulseError::Protocol),
            },
        }
    }

    // ---- Write pipeline ----

    /// Writes sample data to a playback (or upload) stream, copying it into
    /// pool blocks.
    ///
    /// `offset` and `seek` position the data in the stream; a plain
    /// sequential write is `(0, SeekMode::Relative)`.
    pub fn write(&self, data: &[u8], offset: i64, seek: SeekMode) -> Result<()> {
        self.write_impl(WriteData::Borrowed(data), offset, seek)
    }

    /// Writes sample data the stream may take ownership of, avoiding a copy
    /// when the transport streams from client memory.
    pub fn write_owned(&self, data: Vec<u8>, offset: i64, seek: SeekMode) -> Result<()> {
        self.write_impl(WriteData::Owned(data), offset, seek)
    }

    fn write_impl(&self, data: WriteData<'_>, offset: i64, seek: SeekMode) -> Result<()> {
        use StreamDirection::{Playback, Upload};

        let context = self.linked_context()?;

        let (direction, channel) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                matches!(inner.direction, Playback | Upload),
                Error::BadState
            );
            check!(
                context,
                inner.direction == Playback || (seek == SeekMode::Relative && offset == 0),
                Error::InvalidArgument
            );
            (inner.direction, inner.channel)
        };

        let length = data.as_slice().len();
        if length == 0 {
            return Ok(());
        }

        let transport = context.transport().clone();
        match data {
            WriteData::Owned(buffer) if !transport.shm_enabled() => {
                // Without shared memory the transport streams from client
                // memory anyway, so the caller's buffer can be referenced
                // directly as a single user block.
                let chunk = MemChunk::from_block(MemBlock::from_vec(buffer));
                transport
                    .send_chunk(channel, offset, seek, &chunk)
                    .map_err(Error::Protocol)?;
            }
            data => {
                // Copy into pool blocks, splitting at the pool's block size.
                // Only the first piece carries the caller's seek; the rest
                // follow sequentially.
                let max = context.mempool().block_size_max();
                let (mut piece_offset, mut piece_seek) = (offset, seek);
                for piece in data.as_slice().chunks(max) {
                    let chunk = context.mempool().alloc_chunk(piece);
                    transport
                        .send_chunk(channel, piece_offset, piece_seek, &chunk)
                        .map_err(Error::Protocol)?;

                    piece_offset = 0;
                    piece_seek = SeekMode::Relative;
                }

                // An owned buffer is dropped here, after the last copy.
            }
        }

        let mut needs_refresh = false;
        {
            let mut inner = self.inner.borrow_mut();
            inner.requested_bytes = inner.requested_bytes.saturating_sub(length);

            if direction == Playback {
                let advance = offset + length as i64;

                // Account the write against the correction slot of the
                // latency query currently in flight.
                let current = inner.current_write_index_correction;
                let correction = &mut inner.write_index_corrections[current];
                if correction.valid {
                    match seek {
                        SeekMode::Absolute => {
                            correction.corrupt = false;
                            correction.absolute = true;
                            correction.value = advance;
                        }
                        SeekMode::Relative => {
                            if !correction.corrupt {
                                correction.value += advance;
                            }
                        }
                        _ => correction.corrupt = true,
                    }
                }

                // And against the snapshot we already have.
                if inner.timing_info_valid {
                    let info = &mut inner.timing_info;
                    match seek {
                        SeekMode::Absolute => {
                            info.write_index_corrupt = false;
                            info.write_index = advance;
                        }
                        SeekMode::Relative => {
                            if !info.write_index_corrupt {
                                info.write_index += advance;
                            }
                        }
                        _ => info.write_index_corrupt = true,
                    }
                }

                needs_refresh =
                    !inner.timing_info_valid || inner.timing_info.write_index_corrupt;
            }
        }

        if needs_refresh {
            self.request_auto_timing_update(true);
        }

        Ok(())
    }

    /// How many bytes the server has invited us to write.
    pub fn writable_size(&self) -> Result<usize> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Record,
            Error::BadState
        );
        Ok(inner.requested_bytes)
    }

    // ---- Read pipeline ----

    /// Returns the chunk at the head of the record queue without consuming
    /// it, or None if nothing is buffered. Repeated peeks return the same
    /// chunk until [`Stream::discard`] is called.
    pub fn peek(&self) -> Result<Option<MemChunk>> {
        let context = self.linked_context()?;
        let mut inner = self.inner.borrow_mut();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction == StreamDirection::Record,
            Error::BadState
        );

        if inner.peek_chunk.is_none() {
            let inner = &mut *inner;
            inner.peek_chunk = inner.record_queue.as_ref().and_then(|q| q.peek());
        }

        Ok(inner.peek_chunk.clone())
    }

    /// Consumes the chunk returned by the last [`Stream::peek`].
    pub fn discard(&self) -> Result<()> {
        let context = self.linked_context()?;
        let mut inner = self.inner.borrow_mut();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction == StreamDirection::Record,
            Error::BadState
        );
        check!(context, inner.peek_chunk.is_some(), Error::BadState);

        let inner = &mut *inner;
        let length = inner.peek_chunk.take().unwrap().len();
        if let Some(queue) = inner.record_queue.as_mut() {
            queue.drop_bytes(length);
        }

        // Advance the simulated local read index.
        if inner.timing_info_valid && !inner.timing_info.read_index_corrupt {
            inner.timing_info.read_index += length as i64;
        }

        Ok(())
    }

    /// How many bytes are buffered locally for reading.
    pub fn readable_size(&self) -> Result<usize> {
        let context = self.linked_context()?;
        let inner = self.inner.borrow();
        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction == StreamDirection::Record,
            Error::BadState
        );
        Ok(inner.record_queue.as_ref().map_or(0, |q| q.len()))
    }

    // ---- Timing model ----

    /// Requests a fresh latency snapshot from the server.
    ///
    /// For playback streams a correction slot is reserved so writes issued
    /// while the query is in flight are accounted for; with too many queries
    /// outstanding this fails with [`Error::Internal`].
    pub fn update_timing_info(&self, callback: Option<SuccessCallback>) -> Result<Operation> {
        use StreamDirection::Playback;

        let context = self.linked_context()?;

        let (direction, channel, slot) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );

            let slot = (inner.current_write_index_correction + 1) % MAX_WRITE_INDEX_CORRECTIONS;
            if inner.direction == Playback {
                check!(
                    context,
                    !inner.write_index_corrections[slot].valid,
                    Error::Internal
                );
            }

            (inner.direction, inner.channel, slot)
        };

        let tag = context.next_tag();
        let params = LatencyParams {
            channel,
            now: context.mainloop().wallclock(),
        };
        let command = if direction == Playback {
            Command::GetPlaybackLatency(params)
        } else {
            Command::GetRecordLatency(params)
        };
        context
            .transport()
            .send_command(tag, &command)
            .map_err(Error::Protocol)?;

        let operation = context.new_operation(self, callback);

        let stream = self.clone();
        let op = operation.clone();
        context.transport().register_reply(
            tag,
            ReplyOwner(self.id()),
            DEFAULT_REPLY_TIMEOUT,
            reply_handler(move |res| stream.on_timing_reply(&op, tag, res)),
        );

        if direction == Playback {
            let mut inner = self.inner.borrow_mut();
            inner.current_write_index_correction = slot;
            inner.write_index_corrections[slot] = WriteIndexCorrection {
                valid: true,
                tag,
                value: 0,
                absolute: false,
                corrupt: false,
            };
        }

        Ok(operation)
    }

    fn on_timing_reply(
        &self,
        operation: &Operation,
        tag: Tag,
        res: std::result::Result<&mut TagStructReader<'_>, PulseError>,
    ) {
        if operation.is_cancelled() {
            return;
        }

        let Some(context) = self.context() else {
            operation.finish_silently();
            return;
        };

        {
            let mut inner = self.inner.borrow_mut();
            inner.timing_info_valid = false;
            inner.timing_info.write_index_corrupt = false;
            inner.timing_info.read_index_corrupt = false;
        }

        match res {
            Err(err) => context.set_error(err),
            Ok(ts) => {
                if let Err(err) = self.apply_timing_reply(&context, tag, ts) {
                    log::warn!("malformed latency reply: {}", err);
                    context.fail(PulseError::Protocol);
                    operation.finish_silently();
                    return;
                }
            }
        }

        self.inner.borrow_mut().auto_timing_requested = false;

        self.fire_notify(|c| &mut c.latency_update);

        let (ready, valid) = {
            let inner = self.inner.borrow();
            (inner.state == StreamState::Ready, inner.timing_info_valid)
        };
        if ready {
            operation.complete(self, valid);
        } else {
            operation.finish_silently();
        }
    }

    fn apply_timing_reply(
        &self,
        context: &Context,
        tag: Tag,
        ts: &mut TagStructReader<'_>,
    ) -> std::result::Result<(), ProtocolError> {
        use StreamDirection::{Playback, Record};

        let version = context.version();
        let now = context.mainloop().wallclock();
        let monotonic_now = context.mainloop().monotonic_usec();

        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        let direction = inner.direction;

        let sink_usec = ts.read_usec()?;
        let source_usec = ts.read_usec()?;
        let playing = ts.read_bool()?;
        let local = ts.read_timeval()?;
        let remote = ts.read_timeval()?;
        let write_index = ts.read_i64()?;
        let read_index = ts.read_i64()?;

        let (mut underrun_for, mut playing_for) = (0u64, 0u64);
        if version >= 13 && direction == Playback {
            underrun_for = ts.read_u64()?;
            playing_for = ts.read_u64()?;
        }

        ts.eof()?;

        inner.timing_info_valid = true;
        {
            let info = &mut inner.timing_info;
            info.sink_usec = sink_usec;
            info.source_usec = source_usec;
            info.playing = playing;
            info.write_index = write_index;
            info.read_index = read_index;
            info.since_underrun = if playing { playing_for } else { underrun_for };

            // If our clock and the server's agree (the reply timestamp lies
            // between when we asked and now), transport latency can be read
            // off directly. Otherwise assume the round trip was symmetric.
            if local <= remote && remote <= now {
                info.transport_usec = if direction == Playback {
                    usec_between(local, remote)
                } else {
                    usec_between(remote, now)
                };
                info.synchronized_clocks = true;
                info.timestamp = remote;
            } else {
                info.transport_usec = usec_between(local, now) / 2;
                info.synchronized_clocks = false;
                info.timestamp = local + Duration::from_micros(info.transport_usec);
            }

            // Replies older than the barriers describe a world before some
            // operation that moved the indexes unpredictably.
            if tag < inner.read_index_not_before {
                info.read_index_corrupt = true;
            }
            if tag < inner.write_index_not_before {
                info.write_index_corrupt = true;
            }

            if direction == Playback {
                // Fold in the writes and seeks the server had not seen when
                // it took this snapshot, in tag order.
                let mut ctag = tag;
                let mut j = (inner.current_write_index_correction + 1)
                    % MAX_WRITE_INDEX_CORRECTIONS;
                for _ in 0..MAX_WRITE_INDEX_CORRECTIONS {
                    let correction = inner.write_index_corrections[j];
                    if correction.valid && correction.tag >= ctag {
                        ctag = correction.tag + 1;

                        if correction.corrupt {
                            info.write_index = 0;
                            info.write_index_corrupt = true;
                        } else if correction.absolute {
                            info.write_index = correction.value;
                            info.write_index_corrupt = false;
                        } else if !info.write_index_corrupt {
                            info.write_index += correction.value;
                        }
                    }

                    j = (j + 1) % MAX_WRITE_INDEX_CORRECTIONS;
                }

                // Slots up to this reply's tag have been consumed.
                for correction in inner.write_index_corrections.iter_mut() {
                    if correction.valid && correction.tag <= tag {
                        correction.valid = false;
                    }
                }
            }

            if direction == Record && !info.read_index_corrupt {
                // Data sitting in the local queue has left the server but
                // not yet reached the application.
                info.read_index -= inner.record_queue.as_ref().map_or(0, |q| q.len()) as i64;
            }
        }

        if inner.smoother.is_some() {
            let info = inner.timing_info;
            let u = monotonic_now.saturating_sub(info.transport_usec);
            let mut x = u;

            if direction == Playback && version >= 13 {
                // If the device buffer has not refilled since an underrun,
                // sound will only come out once it has; shift the reference
                // time accordingly.
                let since = inner.sample_spec.bytes_to_usec(info.since_underrun);
                if since < info.sink_usec {
                    x += info.sink_usec - since;
                }
            }

            let feed = match direction {
                Playback => !info.read_index_corrupt,
                Record => !info.write_index_corrupt,
                _ => false,
            };
            let y = if feed {
                Some(calc_time(inner, true))
            } else {
                None
            };

            let smoother = inner.smoother.as_mut().unwrap();
            if !info.playing {
                smoother.pause(x);
            }
            if let Some(y) = y {
                smoother.put(u, y);
            }
            if info.playing {
                smoother.resume(x);
            }
        }

        Ok(())
    }

    /// The stream time: the time value of the sample currently being played
    /// (or captured), in microseconds.
    ///
    /// Uses the smoother when interpolation was requested, and is clamped to
    /// run monotonically unless that was disabled.
    pub fn time(&self) -> Result<u64> {
        use StreamDirection::{Playback, Record};

        let context = self.linked_context()?;
        let mut inner = self.inner.borrow_mut();

        check!(context, inner.state == StreamState::Ready, Error::BadState);
        check!(
            context,
            inner.direction != StreamDirection::Upload,
            Error::BadState
        );
        check!(context, inner.timing_info_valid, Error::NoData);
        check!(
            context,
            inner.direction != Playback || !inner.timing_info.read_index_corrupt,
            Error::NoData
        );
        check!(
            context,
            inner.direction != Record || !inner.timing_info.write_index_corrupt,
            Error::NoData
        );

        let inner = &mut *inner;
        let mut usec = match inner.smoother.as_mut() {
            Some(smoother) => smoother.get(context.mainloop().monotonic_usec()),
            None => calc_time(inner, false),
        };

        // Never report time running backwards.
        if !inner.flags.not_monotonic {
            if usec < inner.previous_time {
                usec = inner.previous_time;
            } else {
                inner.previous_time = usec;
            }
        }

        Ok(usec)
    }

    /// The total latency of the stream, and whether it is negative (which
    /// can happen for record streams when the read side runs ahead).
    pub fn latency(&self) -> Result<(u64, bool)> {
        use StreamDirection::{Playback, Record};

        let context = self.linked_context()?;

        {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            check!(context, inner.timing_info_valid, Error::NoData);
            check!(
                context,
                inner.direction != Playback || !inner.timing_info.write_index_corrupt,
                Error::NoData
            );
            check!(
                context,
                inner.direction != Record || !inner.timing_info.read_index_corrupt,
                Error::NoData
            );
        }

        let t = self.time()?;

        let inner = self.inner.borrow();
        let counter = if inner.direction == Playback {
            inner.timing_info.write_index
        } else {
            inner.timing_info.read_index
        };
        let c = inner.sample_spec.bytes_to_usec(counter.max(0) as u64);

        Ok(if inner.direction == Playback {
            (c.saturating_sub(t), false)
        } else if t >= c {
            (t - c, false)
        } else {
            (c - t, true)
        })
    }

    /// Marks the given counters as untrustworthy until a reply to a query
    /// issued after this moment arrives.
    fn invalidate_indexes(&self, read: bool, write: bool) {
        let Some(context) = self.context() else {
            return;
        };

        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != StreamState::Ready {
                return;
            }

            if write {
                inner.write_index_not_before = context.current_tag();
                if inner.timing_info_valid {
                    inner.timing_info.write_index_corrupt = true;
                }
            }

            if read {
                inner.read_index_not_before = context.current_tag();
                if inner.timing_info_valid {
                    inner.timing_info.read_index_corrupt = true;
                }
            }
        }

        self.request_auto_timing_update(true);
    }

    fn request_auto_timing_update(&self, force: bool) {
        let Some(context) = self.context() else {
            return;
        };

        let want_query = {
            let inner = self.inner.borrow();
            if !inner.flags.auto_timing_update {
                return;
            }
            inner.state == StreamState::Ready && (force || !inner.auto_timing_requested)
        };

        if want_query && self.update_timing_info(None).is_ok() {
            self.inner.borrow_mut().auto_timing_requested = true;
        }

        let handle = self.inner.borrow().auto_timing_event;
        if let Some(handle) = handle {
            let mainloop = context.mainloop();
            mainloop.timer_restart(
                handle,
                mainloop.monotonic_usec() + AUTO_TIMING_INTERVAL_USEC,
            );
        }
    }

    // ---- Control operations ----

    fn send_simple_command(
        &self,
        context: &Context,
        command: Command,
        callback: Option<SuccessCallback>,
    ) -> Result<Operation> {
        let tag = context.next_tag();
        context
            .transport()
            .send_command(tag, &command)
            .map_err(Error::Protocol)?;

        let operation = context.new_operation(self, callback);

        let stream = self.clone();
        let op = operation.clone();
        context.transport().register_reply(
            tag,
            ReplyOwner(self.id()),
            DEFAULT_REPLY_TIMEOUT,
            reply_handler(move |res| stream.on_simple_ack(&op, res)),
        );

        Ok(operation)
    }

    fn on_simple_ack(
        &self,
        operation: &Operation,
        res: std::result::Result<&mut TagStructReader<'_>, PulseError>,
    ) {
        if operation.is_cancelled() {
            return;
        }

        let Some(context) = self.context() else {
            operation.finish_silently();
            return;
        };

        let success = match res {
            Err(err) => {
                context.set_error(err);
                false
            }
            Ok(ts) => match ts.eof() {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("malformed ack: {}", err);
                    context.fail(PulseError::Protocol);
                    operation.finish_silently();
                    return;
                }
            },
        };

        operation.complete(self, success);
    }

    /// Pauses (`true`) or resumes (`false`) the stream.
    pub fn cork(&self, pause: bool, callback: Option<SuccessCallback>) -> Result<Operation> {
        use StreamDirection::Playback;

        let context = self.linked_context()?;

        let (direction, channel) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            (inner.direction, inner.channel)
        };

        self.inner.borrow_mut().corked = pause;

        let params = CorkStreamParams {
            channel,
            cork: pause,
        };
        let command = if direction == Playback {
            Command::CorkPlaybackStream(params)
        } else {
            Command::CorkRecordStream(params)
        };
        let operation = self.send_simple_command(&context, command, callback)?;

        {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            if let Some(smoother) = inner.smoother.as_mut() {
                let mut x = context.mainloop().monotonic_usec();
                if inner.timing_info_valid {
                    x += inner.timing_info.transport_usec;
                }

                if inner.suspended || inner.corked {
                    smoother.pause(x);
                }
            }
        }

        if direction == Playback {
            self.invalidate_indexes(false, true);
        }

        Ok(operation)
    }

    /// Discards all data buffered for the stream, server-side.
    pub fn flush(&self, callback: Option<SuccessCallback>) -> Result<Operation> {
        use StreamDirection::Playback;

        let context = self.linked_context()?;

        let (direction, channel, pre_buffering) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            (
                inner.direction,
                inner.channel,
                inner.buffer_attr.pre_buffering,
            )
        };

        let command = if direction == Playback {
            Command::FlushPlaybackStream(channel)
        } else {
            Command::FlushRecordStream(channel)
        };
        let operation = self.send_simple_command(&context, command, callback)?;

        if direction == Playback {
            {
                let mut inner = self.inner.borrow_mut();
                let inner = &mut *inner;

                let current = inner.current_write_index_correction;
                if inner.write_index_corrections[current].valid {
                    inner.write_index_corrections[current].corrupt = true;
                }
                if inner.timing_info_valid {
                    inner.timing_info.write_index_corrupt = true;
                }

                if pre_buffering > 0 {
                    if let Some(smoother) = inner.smoother.as_mut() {
                        let mut x = context.mainloop().monotonic_usec();
                        if inner.timing_info_valid {
                            x += inner.timing_info.transport_usec;
                        }
                        smoother.pause(x);
                    }
                }
            }

            if pre_buffering > 0 {
                // The flush puts the stream back into pre-buffering, so the
                // write index is about to move unpredictably.
                self.invalidate_indexes(false, true);
            } else {
                self.request_auto_timing_update(true);
            }
        } else {
            self.invalidate_indexes(true, false);
        }

        Ok(operation)
    }

    /// Re-enters the pre-buffering state: playback pauses until the prebuf
    /// threshold fills up again. Requires a nonzero prebuf.
    pub fn prebuf(&self, callback: Option<SuccessCallback>) -> Result<Operation> {
        let context = self.linked_context()?;

        let channel = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction == StreamDirection::Playback,
                Error::BadState
            );
            check!(context, inner.buffer_attr.pre_buffering > 0, Error::BadState);
            inner.channel
        };

        let operation =
            self.send_simple_command(&context, Command::PrebufPlaybackStream(channel), callback)?;
        self.invalidate_indexes(false, true);

        Ok(operation)
    }

    /// Starts playback immediately, even if less than prebuf bytes are
    /// buffered. Requires a nonzero prebuf.
    pub fn trigger(&self, callback: Option<SuccessCallback>) -> Result<Operation> {
        let context = self.linked_context()?;

        let channel = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction == StreamDirection::Playback,
                Error::BadState
            );
            check!(context, inner.buffer_attr.pre_buffering > 0, Error::BadState);
            inner.channel
        };

        let operation =
            self.send_simple_command(&context, Command::TriggerPlaybackStream(channel), callback)?;
        self.invalidate_indexes(false, true);

        Ok(operation)
    }

    /// Asks the server to play everything that is buffered and then
    /// acknowledge.
    pub fn drain(&self, callback: Option<SuccessCallback>) -> Result<Operation> {
        let context = self.linked_context()?;

        let channel = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction == StreamDirection::Playback,
                Error::BadState
            );
            inner.channel
        };

        self.send_simple_command(&context, Command::DrainPlaybackStream(channel), callback)
    }

    /// Renames the stream.
    pub fn set_name(&self, name: &CStr, callback: Option<SuccessCallback>) -> Result<Operation> {
        let context = self.linked_context()?;

        let (direction, channel) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            (inner.direction, inner.channel)
        };

        if context.version() >= 13 {
            let mut props = Props::new();
            props.set(Prop::ApplicationName, name);
            return self.proplist_update(PropsUpdateMode::Replace, props, callback);
        }

        let params = SetStreamNameParams {
            channel,
            name: name.to_owned(),
        };
        let command = if direction == StreamDirection::Record {
            Command::SetRecordStreamName(params)
        } else {
            Command::SetPlaybackStreamName(params)
        };
        self.send_simple_command(&context, command, callback)
    }

    /// Asks the server for new buffer metrics. The locally stored metrics
    /// are replaced with whatever the server picks.
    pub fn set_buffer_attr(
        &self,
        attr: &BufferAttr,
        callback: Option<SuccessCallback>,
    ) -> Result<Operation> {
        let context = self.linked_context()?;

        let (direction, channel, adjust_latency) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            check!(context, context.version() >= 12, Error::NotSupported);
            (inner.direction, inner.channel, inner.flags.adjust_latency)
        };

        let command = if direction == StreamDirection::Record {
            Command::SetRecordStreamBufferAttr(SetRecordStreamBufferAttrParams {
                channel,
                buffer_attr: *attr,
                adjust_latency,
            })
        } else {
            Command::SetPlaybackStreamBufferAttr(SetPlaybackStreamBufferAttrParams {
                channel,
                buffer_attr: *attr,
                adjust_latency,
            })
        };

        let tag = context.next_tag();
        context
            .transport()
            .send_command(tag, &command)
            .map_err(Error::Protocol)?;

        let operation = context.new_operation(self, callback);

        let stream = self.clone();
        let op = operation.clone();
        context.transport().register_reply(
            tag,
            ReplyOwner(self.id()),
            DEFAULT_REPLY_TIMEOUT,
            reply_handler(move |res| stream.on_set_buffer_attr_reply(&op, res)),
        );

        Ok(operation)
    }

    fn on_set_buffer_attr_reply(
        &self,
        operation: &Operation,
        res: std::result::Result<&mut TagStructReader<'_>, PulseError>,
    ) {
        if operation.is_cancelled() {
            return;
        }

        let Some(context) = self.context() else {
            operation.finish_silently();
            return;
        };

        let success = match res {
            Err(err) => {
                context.set_error(err);
                false
            }
            Ok(ts) => {
                let direction = self.inner.borrow().direction;
                let parsed: std::result::Result<BufferAttr, ProtocolError> = (|| {
                    let attr = if direction == StreamDirection::Record {
                        ts.read::<SetRecordStreamBufferAttrReply>()?.buffer_attr
                    } else {
                        ts.read::<SetPlaybackStreamBufferAttrReply>()?.buffer_attr
                    };
                    ts.eof()?;
                    Ok(attr)
                })();

                match parsed {
                    Ok(attr) => {
                        let mut inner = self.inner.borrow_mut();
                        if direction == StreamDirection::Record {
                            inner.buffer_attr.max_length = attr.max_length;
                            inner.buffer_attr.fragment_size = attr.fragment_size;
                        } else {
                            inner.buffer_attr.max_length = attr.max_length;
                            inner.buffer_attr.target_length = attr.target_length;
                            inner.buffer_attr.pre_buffering = attr.pre_buffering;
                            inner.buffer_attr.minimum_request_length =
                                attr.minimum_request_length;
                        }
                        true
                    }
                    Err(err) => {
                        log::warn!("malformed buffer attr reply: {}", err);
                        context.fail(PulseError::Protocol);
                        operation.finish_silently();
                        return;
                    }
                }
            }
        };

        operation.complete(self, success);
    }

    /// Changes the stream's sample rate on the fly. Requires the
    /// variable-rate flag.
    pub fn update_sample_rate(
        &self,
        rate: u32,
        callback: Option<SuccessCallback>,
    ) -> Result<Operation> {
        let context = self.linked_context()?;

        check!(context, rate > 0 && rate <= RATE_MAX, Error::InvalidArgument);

        let (direction, channel) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            check!(context, inner.flags.variable_rate, Error::BadState);
            check!(context, context.version() >= 12, Error::NotSupported);
            (inner.direction, inner.channel)
        };

        let params = UpdateSampleRateParams {
            channel,
            sample_rate: rate,
        };
        let command = if direction == StreamDirection::Record {
            Command::UpdateRecordStreamSampleRate(params)
        } else {
            Command::UpdatePlaybackStreamSampleRate(params)
        };

        let tag = context.next_tag();
        context
            .transport()
            .send_command(tag, &command)
            .map_err(Error::Protocol)?;

        let operation = context.new_operation(self, callback);

        let stream = self.clone();
        let op = operation.clone();
        context.transport().register_reply(
            tag,
            ReplyOwner(self.id()),
            DEFAULT_REPLY_TIMEOUT,
            reply_handler(move |res| stream.on_update_sample_rate_reply(&op, rate, res)),
        );

        Ok(operation)
    }

    fn on_update_sample_rate_reply(
        &self,
        operation: &Operation,
        rate: u32,
        res: std::result::Result<&mut TagStructReader<'_>, PulseError>,
    ) {
        if operation.is_cancelled() {
            return;
        }

        let Some(context) = self.context() else {
            operation.finish_silently();
            return;
        };

        let success = match res {
            Err(err) => {
                context.set_error(err);
                false
            }
            Ok(ts) => match ts.eof() {
                Ok(()) => {
                    self.inner.borrow_mut().sample_spec.sample_rate = rate;
                    true
                }
                Err(err) => {
                    log::warn!("malformed ack: {}", err);
                    context.fail(PulseError::Protocol);
                    operation.finish_silently();
                    return;
                }
            },
        };

        operation.complete(self, success);
    }

    /// Updates the stream's server-side property list.
    ///
    /// The local copy is deliberately left untouched: the server owns the
    /// externally visible view, and mirroring it here would invite drift.
    pub fn proplist_update(
        &self,
        mode: PropsUpdateMode,
        props: Props,
        callback: Option<SuccessCallback>,
    ) -> Result<Operation> {
        let context = self.linked_context()?;

        let (direction, channel) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            check!(context, context.version() >= 13, Error::NotSupported);
            (inner.direction, inner.channel)
        };

        let params = UpdatePropsParams {
            channel,
            mode,
            props,
        };
        let command = if direction == StreamDirection::Record {
            Command::UpdateRecordStreamProplist(params)
        } else {
            Command::UpdatePlaybackStreamProplist(params)
        };

        self.send_simple_command(&context, command, callback)
    }

    /// Removes keys from the stream's server-side property list.
    pub fn proplist_remove(
        &self,
        keys: &[CString],
        callback: Option<SuccessCallback>,
    ) -> Result<Operation> {
        let context = self.linked_context()?;

        check!(
            context,
            !keys.is_empty() && keys.iter().all(|k| !k.as_bytes().is_empty()),
            Error::InvalidArgument
        );

        let (direction, channel) = {
            let inner = self.inner.borrow();
            check!(context, inner.state == StreamState::Ready, Error::BadState);
            check!(
                context,
                inner.direction != StreamDirection::Upload,
                Error::BadState
            );
            check!(context, context.version() >= 13, Error::NotSupported);
            (inner.direction, inner.channel)
        };

        let params = RemovePropsParams {
            channel,
            keys: keys.to_vec(),
        };
        let command = if direction == StreamDirection::Record {
            Command::RemoveRecordStreamProplist(params)
        } else {
            Command::RemovePlaybackStreamProplist(params)
        };

        self.send_simple_command(&context, command, callback)
    }

    // ---- Server event handlers, invoked by the context ----

    pub(crate) fn handle_killed(&self) {
        let Some(context) = self.context() else {
            return;
        };
        if self.state() != StreamState::Ready {
            return;
        }

        context.set_error(PulseError::Killed);
        self.set_state(StreamState::Failed);
    }

    pub(crate) fn handle_moved(
        &self,
        device_index: u32,
        device_name: CString,
        suspended: bool,
        attr: BufferAttr,
        configured_usec: u64,
    ) {
        let Some(context) = self.context() else {
            return;
        };
        if self.state() != StreamState::Ready {
            return;
        }

        {
            let mut inner = self.inner.borrow_mut();

            if context.version() >= 13 {
                if inner.direction == StreamDirection::Record {
                    inner.timing_info.configured_source_usec = configured_usec;
                } else {
                    inner.timing_info.configured_sink_usec = configured_usec;
                }
                inner.buffer_attr = attr;
            }

            inner.device_index = Some(device_index);
            inner.device_name = Some(device_name);
            inner.suspended = suspended;
        }

        self.request_auto_timing_update(true);
        self.fire_notify(|c| &mut c.moved);
    }

    pub(crate) fn handle_suspended(&self, suspended: bool) {
        let Some(context) = self.context() else {
            return;
        };
        if self.state() != StreamState::Ready {
            return;
        }

        {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            inner.suspended = suspended;

            if let Some(smoother) = inner.smoother.as_mut() {
                let mut x = context.mainloop().monotonic_usec();
                if inner.timing_info_valid {
                    x = x.saturating_sub(inner.timing_info.transport_usec);
                }

                if inner.suspended || inner.corked {
                    smoother.pause(x);
                } else {
                    smoother.resume(x);
                }
            }
        }

        self.request_auto_timing_update(true);
        self.fire_notify(|c| &mut c.suspended);
    }

    pub(crate) fn handle_started(&self) {
        if self.context().is_none() || self.state() != StreamState::Ready {
            return;
        }

        self.request_auto_timing_update(true);
        self.fire_notify(|c| &mut c.started);
    }

    pub(crate) fn handle_request(&self, bytes: usize) {
        if self.state() != StreamState::Ready {
            return;
        }

        let requested = {
            let mut inner = self.inner.borrow_mut();
            inner.requested_bytes += bytes;
            inner.requested_bytes
        };

        if requested > 0 {
            self.fire_request(|c| &mut c.write, requested);
        }
    }

    pub(crate) fn handle_overflow(&self) {
        self.handle_over_or_underflow(|c| &mut c.overflow);
    }

    pub(crate) fn handle_underflow(&self) {
        self.handle_over_or_underflow(|c| &mut c.underflow);
    }

    fn handle_over_or_underflow(&self, select: fn(&mut Callbacks) -> &mut Option<NotifyCallback>) {
        let Some(context) = self.context() else {
            return;
        };
        if self.state() != StreamState::Ready {
            return;
        }

        {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;

            // With a prebuf in effect, playback has stopped; freeze the
            // interpolated clock until the server reports progress again.
            if inner.direction == StreamDirection::Playback
                && inner.buffer_attr.pre_buffering > 0
            {
                if let Some(smoother) = inner.smoother.as_mut() {
                    let mut x = context.mainloop().monotonic_usec();
                    if inner.timing_info_valid {
                        x = x.saturating_sub(inner.timing_info.transport_usec);
                    }
                    smoother.pause(x);
                }
            }
        }

        self.request_auto_timing_update(true);
        self.fire_notify(select);
    }

    pub(crate) fn handle_record_data(&self, chunk: MemChunk) {
        if self.state() != StreamState::Ready {
            return;
        }

        let readable = {
            let mut inner = self.inner.borrow_mut();
            let length = chunk.len();
            let Some(queue) = inner.record_queue.as_mut() else {
                return;
            };

            if !queue.push(chunk) {
                log::warn!("record queue overrun, dropping {} bytes", length);
            }
            queue.len()
        };

        if readable > 0 {
            self.fire_request(|c| &mut c.read, readable);
        }
    }
}

/// Computes the raw stream time from the current snapshot, without the
/// smoother.
fn calc_time(inner: &StreamInner, ignore_transport: bool) -> u64 {
    let info = &inner.timing_info;

    match inner.direction {
        StreamDirection::Playback => {
            // The last byte that left the buffer had this time value.
            let mut usec = inner.sample_spec.bytes_to_usec(info.read_index.max(0) as u64);

            if !inner.corked && !inner.suspended {
                if !ignore_transport {
                    // The snapshot took a while to reach us; real playback
                    // is a little further along.
                    usec += info.transport_usec;
                }

                // The device buffers too, so the sample actually audible is
                // a little behind.
                usec = usec.saturating_sub(info.sink_usec);
            }

            usec
        }
        StreamDirection::Record => {
            let mut usec = inner.sample_spec.bytes_to_usec(info.write_index.max(0) as u64);

            if !inner.corked && !inner.suspended {
                if !ignore_transport {
                    usec += info.transport_usec;
                }

                usec += info.source_usec;

                // A monitor source trails its sink's device buffer.
                usec = usec.saturating_sub(info.sink_usec);
            }

            usec
        }
        _ => 0,
    }
}

/// Fills in client-side buffer metric defaults for servers older than
/// protocol 13, which did no server-side selection. A zero field means the
/// caller wants the default.
fn automatic_buffer_attr(attr: &mut BufferAttr, spec: &SampleSpec) {
    if attr.max_length == 0 {
        attr.max_length = 4 * 1024 * 1024;
    }
    if attr.target_length == 0 {
        attr.target_length = spec.usec_to_bytes(250_000) as u32;
    }
    if attr.minimum_request_length == 0 {
        attr.minimum_request_length = attr.target_length / 5;
    }
    if attr.pre_buffering == 0 {
        attr.pre_buffering = attr.target_length;
    }
    if attr.fragment_size == 0 {
        attr.fragment_size = attr.target_length;
    }
}

/// The distance between two wall clock readings, in microseconds.
fn usec_between(a: SystemTime, b: SystemTime) -> u64 {
    match b.duration_since(a) {
        Ok(d) => d.as_micros() as u64,
        Err(e) => e.duration().as_micros() as u64,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::client::testing::{rig, rig_with, TestRig};
    use crate::protocol::{
        CommandTag, CreatePlaybackStreamReply, CreateRecordStreamReply, PlaybackLatency,
        PlaybackStreamMovedParams, RecordLatency, Request, SampleFormat, StreamSuspendedParams,
    };

    const SPEC: SampleSpec = SampleSpec {
        format: SampleFormat::S16Le,
        channels: 2,
        sample_rate: 44100,
    };

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn new_stream(rig: &TestRig) -> Stream {
        Stream::new(
            &rig.context,
            &cstr("test stream"),
            &SPEC,
            Some(&ChannelMap::stereo()),
        )
        .unwrap()
    }

    fn playback_reply(requested: u32) -> CreatePlaybackStreamReply {
        CreatePlaybackStreamReply {
            channel: 7,
            stream_index: 99,
            requested_bytes: requested,
            buffer_attr: BufferAttr {
                max_length: 1 << 22,
                target_length: 8192,
                pre_buffering: 8192,
                minimum_request_length: 1024,
                ..Default::default()
            },
            sample_spec: Some(SPEC),
            channel_map: Some(ChannelMap::stereo()),
            sink_index: Some(0),
            sink_name: Some(cstr("sink")),
            suspended: false,
            configured_sink_usec: Some(25_000),
        }
    }

    fn record_reply(max_length: u32) -> CreateRecordStreamReply {
        CreateRecordStreamReply {
            channel: 7,
            stream_index: 98,
            buffer_attr: BufferAttr {
                max_length,
                fragment_size: 1024,
                ..Default::default()
            },
            sample_spec: Some(SPEC),
            channel_map: Some(ChannelMap::stereo()),
            source_index: Some(1),
            source_name: Some(cstr("source")),
            suspended: false,
            configured_source_usec: Some(10_000),
        }
    }

    fn ready_playback(rig: &TestRig, flags: StreamFlags, requested: u32) -> Stream {
        let stream = new_stream(rig);
        stream
            .connect_playback(None, None, flags, None, None)
            .unwrap();

        let tag = rig.transport.last_tag_of(CommandTag::CreatePlaybackStream);
        rig.transport
            .complete(tag, rig.context.version(), &playback_reply(requested));

        assert_eq!(stream.state(), StreamState::Ready);
        stream
    }

    fn ready_record(rig: &TestRig, max_length: u32) -> Stream {
        let stream = new_stream(rig);
        stream
            .connect_record(None, None, StreamFlags::default())
            .unwrap();

        let tag = rig.transport.last_tag_of(CommandTag::CreateRecordStream);
        rig.transport
            .complete(tag, rig.context.version(), &record_reply(max_length));

        assert_eq!(stream.state(), StreamState::Ready);
        stream
    }

    /// A latency query issued and its tag, for driving the timing model.
    fn issue_timing_query(rig: &TestRig, stream: &Stream) -> Tag {
        stream.update_timing_info(None).unwrap();
        rig.transport.last_tag_of(CommandTag::GetPlaybackLatency)
    }

    /// A latency reply with both timestamps equal to the test wall clock, so
    /// the clocks count as synchronized and transport latency is zero.
    fn zero_latency_reply(rig: &TestRig) -> PlaybackLatency {
        let now = rig.mainloop.wallclock_at(rig.mainloop.wall_usec());
        PlaybackLatency {
            local_time: now,
            remote_time: now,
            ..Default::default()
        }
    }

    #[test_log::test]
    fn create_negotiates_and_fires_write_callback() {
        let rig = rig(13);
        let stream = new_stream(&rig);

        let requested = Rc::new(Cell::new(0));
        let hook = requested.clone();
        stream.set_write_callback(Some(Box::new(move |_, n| hook.set(n))));

        stream
            .connect_playback(None, None, StreamFlags::default(), None, None)
            .unwrap();
        assert_eq!(stream.state(), StreamState::Creating);

        let tag = rig.transport.last_tag_of(CommandTag::CreatePlaybackStream);
        rig.transport.complete(tag, 13, &playback_reply(4096));

        assert_eq!(stream.state(), StreamState::Ready);
        assert_eq!(requested.get(), 4096);
        assert_eq!(stream.writable_size().unwrap(), 4096);
        assert_eq!(stream.index().unwrap(), 99);
        assert_eq!(stream.device_name().unwrap(), cstr("sink"));
        assert_eq!(stream.buffer_attr().unwrap().target_length, 8192);
    }

    #[test_log::test]
    fn create_error_fails_stream() {
        let rig = rig(13);
        let stream = new_stream(&rig);
        stream
            .connect_playback(None, None, StreamFlags::default(), None, None)
            .unwrap();

        let tag = rig.transport.last_tag_of(CommandTag::CreatePlaybackStream);
        rig.transport.fail_reply(tag, PulseError::AccessDenied);

        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(rig.context.last_error(), Some(PulseError::AccessDenied));
        assert_eq!(rig.context.linked_stream_count(), 0);
    }

    #[test_log::test]
    fn create_reply_format_mismatch_fails_context() {
        let rig = rig(13);
        let stream = new_stream(&rig);
        stream
            .connect_playback(None, None, StreamFlags::default(), None, None)
            .unwrap();

        // The server hands back a different rate without fix_rate set.
        let mut reply = playback_reply(1024);
        reply.sample_spec = Some(SampleSpec {
            sample_rate: 48000,
            ..SPEC
        });

        let tag = rig.transport.last_tag_of(CommandTag::CreatePlaybackStream);
        rig.transport.complete(tag, 13, &reply);

        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(rig.context.last_error(), Some(PulseError::Protocol));
        assert!(!rig.context.is_ready());
    }

    #[test_log::test]
    fn write_decrements_credit() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        stream
            .write(&[0u8; 1000], 0, SeekMode::Relative)
            .unwrap();
        assert_eq!(stream.writable_size().unwrap(), 3096);

        // Writing more than was requested clamps the credit at zero.
        stream
            .write(&[0u8; 5000], 0, SeekMode::Relative)
            .unwrap();
        assert_eq!(stream.writable_size().unwrap(), 0);
    }

    #[test_log::test]
    fn write_chunks_at_pool_block_size() {
        let rig = rig_with(13, false, 100);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        stream
            .write(&[0xabu8; 250], 42, SeekMode::Absolute)
            .unwrap();

        let chunks = rig.transport.sent_chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.bytes.len()).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        assert_eq!(
            chunks.iter().map(|c| c.bytes.len()).sum::<usize>(),
            250
        );

        // Only the first piece carries the caller's position.
        assert_eq!((chunks[0].offset, chunks[0].seek), (42, SeekMode::Absolute));
        assert_eq!((chunks[1].offset, chunks[1].seek), (0, SeekMode::Relative));
        assert_eq!((chunks[2].offset, chunks[2].seek), (0, SeekMode::Relative));
        assert!(chunks.iter().all(|c| c.channel == 7));
    }

    #[test_log::test]
    fn write_owned_without_shm_is_a_single_block() {
        let rig = rig_with(13, false, 100);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        stream
            .write_owned(vec![1u8; 250], 0, SeekMode::Relative)
            .unwrap();

        let chunks = rig.transport.sent_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].bytes.len(), 250);
    }

    #[test_log::test]
    fn write_owned_with_shm_is_copied_and_chunked() {
        let rig = rig_with(13, true, 100);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        stream
            .write_owned(vec![1u8; 250], 0, SeekMode::Relative)
            .unwrap();

        assert_eq!(rig.transport.sent_chunks().len(), 3);
    }

    #[test_log::test]
    fn absolute_seek_corrects_stale_snapshot() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let tag = issue_timing_query(&rig, &stream);
        stream
            .write(&[0u8; 500], 1000, SeekMode::Absolute)
            .unwrap();

        // The snapshot predates the write; the correction slot fixes it up.
        rig.transport.complete(tag, 13, &zero_latency_reply(&rig));

        let info = stream.timing_info().unwrap();
        assert_eq!(info.write_index, 1500);
        assert!(!info.write_index_corrupt);
    }

    #[test_log::test]
    fn unaccountable_seek_corrupts_write_index() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let tag = issue_timing_query(&rig, &stream);
        stream
            .write(&[0u8; 100], 200, SeekMode::RelativeOnRead)
            .unwrap();

        let reply = PlaybackLatency {
            write_index: 9000,
            ..zero_latency_reply(&rig)
        };
        rig.transport.complete(tag, 13, &reply);

        assert!(stream.timing_info().unwrap().write_index_corrupt);
    }

    #[test_log::test]
    fn cork_sets_barrier_invalidating_older_replies() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let tag = issue_timing_query(&rig, &stream);
        stream.cork(true, None).unwrap();

        // The reply to the query issued before the cork is stale.
        rig.transport.complete(tag, 13, &zero_latency_reply(&rig));

        assert!(stream.timing_info().unwrap().write_index_corrupt);
    }

    #[test_log::test]
    fn corrections_apply_in_tag_order_and_are_consumed_once() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 65536);

        let tag1 = issue_timing_query(&rig, &stream);
        stream.write(&[0u8; 100], 0, SeekMode::Relative).unwrap();
        let tag2 = issue_timing_query(&rig, &stream);
        stream.write(&[0u8; 200], 0, SeekMode::Relative).unwrap();

        // The first snapshot predates both writes.
        rig.transport.complete(tag1, 13, &zero_latency_reply(&rig));
        assert_eq!(stream.timing_info().unwrap().write_index, 300);

        // The second predates only the second write; the first write's slot
        // was consumed above.
        rig.transport.complete(tag2, 13, &zero_latency_reply(&rig));
        assert_eq!(stream.timing_info().unwrap().write_index, 200);
    }

    #[test_log::test]
    fn correction_ring_exhaustion_is_an_internal_error() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        for _ in 0..MAX_WRITE_INDEX_CORRECTIONS {
            stream.update_timing_info(None).unwrap();
        }

        assert_matches!(stream.update_timing_info(None), Err(Error::Internal));
        assert_eq!(rig.context.last_error(), Some(PulseError::Internal));
    }

    #[test_log::test]
    fn reported_time_is_monotonic() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let tag = issue_timing_query(&rig, &stream);
        let reply = PlaybackLatency {
            read_index: SPEC.usec_to_bytes(500_000) as i64,
            ..zero_latency_reply(&rig)
        };
        rig.transport.complete(tag, 13, &reply);
        assert_eq!(stream.time().unwrap(), 500_000);

        // A snapshot that would step time backwards is clamped.
        let tag = issue_timing_query(&rig, &stream);
        let reply = PlaybackLatency {
            read_index: SPEC.usec_to_bytes(490_000) as i64,
            ..zero_latency_reply(&rig)
        };
        rig.transport.complete(tag, 13, &reply);
        assert_eq!(stream.time().unwrap(), 500_000);
    }

    #[test_log::test]
    fn not_monotonic_flag_reports_raw_time() {
        let rig = rig(13);
        let flags = StreamFlags {
            not_monotonic: true,
            ..Default::default()
        };
        let stream = ready_playback(&rig, flags, 4096);

        for (usec, expected) in [(500_000u64, 500_000u64), (490_000, 490_000)] {
            let tag = issue_timing_query(&rig, &stream);
            let reply = PlaybackLatency {
                read_index: SPEC.usec_to_bytes(usec) as i64,
                ..zero_latency_reply(&rig)
            };
            rig.transport.complete(tag, 13, &reply);
            assert_eq!(stream.time().unwrap(), expected);
        }
    }

    #[test_log::test]
    fn synchronized_clocks_use_server_timestamp() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let now = rig.mainloop.wall_usec();
        let tag = issue_timing_query(&rig, &stream);
        let reply = PlaybackLatency {
            local_time: rig.mainloop.wallclock_at(now - 10_000),
            remote_time: rig.mainloop.wallclock_at(now - 5_000),
            ..Default::default()
        };
        rig.transport.complete(tag, 13, &reply);

        let info = stream.timing_info().unwrap();
        assert!(info.synchronized_clocks);
        assert_eq!(info.transport_usec, 5_000);
        assert_eq!(info.timestamp, rig.mainloop.wallclock_at(now - 5_000));
    }

    #[test_log::test]
    fn unsynchronized_clocks_assume_symmetric_delay() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let now = rig.mainloop.wall_usec();
        let tag = issue_timing_query(&rig, &stream);

        // The server clock runs ahead of ours.
        let reply = PlaybackLatency {
            local_time: rig.mainloop.wallclock_at(now - 10_000),
            remote_time: rig.mainloop.wallclock_at(now + 50_000),
            ..Default::default()
        };
        rig.transport.complete(tag, 13, &reply);

        let info = stream.timing_info().unwrap();
        assert!(!info.synchronized_clocks);
        assert_eq!(info.transport_usec, 5_000);
        assert_eq!(info.timestamp, rig.mainloop.wallclock_at(now - 5_000));
    }

    #[test_log::test]
    fn playback_latency_is_buffered_time() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let tag = issue_timing_query(&rig, &stream);
        let reply = PlaybackLatency {
            write_index: SPEC.usec_to_bytes(300_000) as i64,
            read_index: SPEC.usec_to_bytes(100_000) as i64,
            ..zero_latency_reply(&rig)
        };
        rig.transport.complete(tag, 13, &reply);

        assert_eq!(stream.latency().unwrap(), (200_000, false));
    }

    #[test_log::test]
    fn record_latency_can_be_negative() {
        let rig = rig(13);
        let stream = ready_record(&rig, 1 << 20);

        stream.update_timing_info(None).unwrap();
        let tag = rig.transport.last_tag_of(CommandTag::GetRecordLatency);

        let now = rig.mainloop.wallclock_at(rig.mainloop.wall_usec());
        let reply = RecordLatency {
            local_time: now,
            remote_time: now,
            write_index: SPEC.usec_to_bytes(100_000) as i64,
            read_index: SPEC.usec_to_bytes(200_000) as i64,
            ..Default::default()
        };
        rig.transport.complete(tag, 13, &reply);

        assert_eq!(stream.latency().unwrap(), (100_000, true));
    }

    #[test_log::test]
    fn record_data_flows_through_queue_and_peek() {
        let rig = rig(13);
        let stream = ready_record(&rig, 1 << 20);

        let readable = Rc::new(RefCell::new(Vec::new()));
        let hook = readable.clone();
        stream.set_read_callback(Some(Box::new(move |_, n| hook.borrow_mut().push(n))));

        rig.context
            .deliver_record(7, MemChunk::from_block(MemBlock::from_slice(&[1u8; 60])));
        rig.context
            .deliver_record(7, MemChunk::from_block(MemBlock::from_slice(&[2u8; 40])));

        assert_eq!(*readable.borrow(), vec![60, 100]);
        assert_eq!(stream.readable_size().unwrap(), 100);

        // Peeks are idempotent until the chunk is dropped.
        let first = stream.peek().unwrap().unwrap();
        let second = stream.peek().unwrap().unwrap();
        assert_eq!(first.bytes(), &[1u8; 60]);
        assert_eq!(second.bytes(), &[1u8; 60]);

        stream.discard().unwrap();
        assert_eq!(stream.readable_size().unwrap(), 40);
        assert_eq!(stream.peek().unwrap().unwrap().bytes(), &[2u8; 40]);
    }

    #[test_log::test]
    fn record_timing_subtracts_queued_bytes_and_drop_restores() {
        let rig = rig(13);
        let stream = ready_record(&rig, 1 << 20);

        rig.context
            .deliver_record(7, MemChunk::from_block(MemBlock::from_slice(&[0u8; 40])));

        stream.update_timing_info(None).unwrap();
        let tag = rig.transport.last_tag_of(CommandTag::GetRecordLatency);
        let now = rig.mainloop.wallclock_at(rig.mainloop.wall_usec());
        let reply = RecordLatency {
            local_time: now,
            remote_time: now,
            read_index: 1000,
            ..Default::default()
        };
        rig.transport.complete(tag, 13, &reply);

        // Locally queued bytes have not reached the application yet.
        assert_eq!(stream.timing_info().unwrap().read_index, 960);

        stream.peek().unwrap().unwrap();
        stream.discard().unwrap();
        assert_eq!(stream.timing_info().unwrap().read_index, 1000);
    }

    #[test_log::test]
    fn record_queue_overrun_drops_data() {
        let rig = rig(13);
        let stream = ready_record(&rig, 64);

        rig.context
            .deliver_record(7, MemChunk::from_block(MemBlock::from_slice(&[0u8; 64])));
        rig.context
            .deliver_record(7, MemChunk::from_block(MemBlock::from_slice(&[0u8; 8])));

        assert_eq!(stream.readable_size().unwrap(), 64);
    }

    #[test_log::test]
    fn kill_unlinks_stream_and_cancels_everything() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let states = Rc::new(RefCell::new(Vec::new()));
        let hook = states.clone();
        stream.set_state_callback(Some(Box::new(move |s: &Stream| {
            hook.borrow_mut().push(s.state());
        })));

        let fired = Rc::new(Cell::new(0));
        let (h1, h2) = (fired.clone(), fired.clone());
        let op_a = stream
            .drain(Some(Box::new(move |_, _| {
                h1.set(h1.get() + 1);
            })))
            .unwrap();
        let op_b = stream
            .drain(Some(Box::new(move |_, _| {
                h2.set(h2.get() + 1);
            })))
            .unwrap();
        stream.update_timing_info(None).unwrap();

        rig.context
            .dispatch_event(Command::PlaybackStreamKilled(7));

        assert_eq!(stream.state(), StreamState::Failed);
        assert_eq!(*states.borrow(), vec![StreamState::Failed]);
        assert_eq!(rig.context.last_error(), Some(PulseError::Killed));

        // Operations were cancelled without firing, pending replies were
        // dropped, and the stream is gone from the context.
        assert_eq!(fired.get(), 0);
        assert_matches!(op_a.state(), super::super::OperationState::Cancelled);
        assert_matches!(op_b.state(), super::super::OperationState::Cancelled);
        assert_eq!(rig.transport.pending_reply_count(), 0);
        assert_eq!(rig.context.pending_operation_count(), 0);
        assert!(rig
            .context
            .stream_by_channel(StreamDirection::Playback, 7)
            .is_none());
        assert_eq!(rig.context.linked_stream_count(), 0);
    }

    #[test_log::test]
    fn disconnect_terminates_cleanly() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        stream.disconnect().unwrap();
        let tag = rig.transport.last_tag_of(CommandTag::DeletePlaybackStream);
        rig.transport.ack(tag);

        assert_eq!(stream.state(), StreamState::Terminated);
        assert_eq!(rig.context.linked_stream_count(), 0);
    }

    #[test_log::test]
    fn auto_timing_updates_are_scheduled_and_deduplicated() {
        let rig = rig(13);
        let flags = StreamFlags {
            auto_timing_update: true,
            ..Default::default()
        };
        let stream = ready_playback(&rig, flags, 4096);

        // Reaching the ready state kicks off the first query and the timer.
        assert_eq!(rig.transport.count_of(CommandTag::GetPlaybackLatency), 1);
        assert_eq!(rig.mainloop.timer_count(), 1);

        // While a query is outstanding, the timer does not issue another.
        rig.mainloop.advance(400_000);
        assert_eq!(rig.transport.count_of(CommandTag::GetPlaybackLatency), 1);

        let tag = rig.transport.last_tag_of(CommandTag::GetPlaybackLatency);
        rig.transport.complete(tag, 13, &zero_latency_reply(&rig));

        rig.mainloop.advance(400_000);
        assert_eq!(rig.transport.count_of(CommandTag::GetPlaybackLatency), 2);

        let _ = stream;
    }

    #[test_log::test]
    fn underflow_forces_timing_refresh() {
        let rig = rig(13);
        let flags = StreamFlags {
            auto_timing_update: true,
            ..Default::default()
        };
        let stream = ready_playback(&rig, flags, 4096);

        let underflowed = Rc::new(Cell::new(false));
        let hook = underflowed.clone();
        stream.set_underflow_callback(Some(Box::new(move |_| hook.set(true))));

        let tag = rig.transport.last_tag_of(CommandTag::GetPlaybackLatency);
        rig.transport.complete(tag, 13, &zero_latency_reply(&rig));

        rig.context.dispatch_event(Command::Underflow(7));

        assert!(underflowed.get());
        assert_eq!(rig.transport.count_of(CommandTag::GetPlaybackLatency), 2);
    }

    #[test_log::test]
    fn request_event_raises_credit_and_notifies() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 1000);

        let requested = Rc::new(Cell::new(0));
        let hook = requested.clone();
        stream.set_write_callback(Some(Box::new(move |_, n| hook.set(n))));

        rig.context.dispatch_event(Command::Request(Request {
            channel: 7,
            length: 500,
        }));

        assert_eq!(requested.get(), 1500);
        assert_eq!(stream.writable_size().unwrap(), 1500);
    }

    #[test_log::test]
    fn moved_event_updates_device_and_metrics() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let moved = Rc::new(Cell::new(false));
        let hook = moved.clone();
        stream.set_moved_callback(Some(Box::new(move |_| hook.set(true))));

        let attr = BufferAttr {
            max_length: 999,
            target_length: 111,
            pre_buffering: 222,
            minimum_request_length: 33,
            ..Default::default()
        };
        rig.context
            .dispatch_event(Command::PlaybackStreamMoved(PlaybackStreamMovedParams {
                channel: 7,
                device_index: 5,
                device_name: cstr("other"),
                device_suspended: true,
                buffer_attr: attr,
                configured_sink_usec: 4242,
            }));

        assert!(moved.get());
        assert_eq!(stream.device_index().unwrap(), 5);
        assert_eq!(stream.device_name().unwrap(), cstr("other"));
        assert!(stream.is_suspended().unwrap());
        assert_eq!(stream.buffer_attr().unwrap(), attr);
    }

    #[test_log::test]
    fn suspended_event_toggles_flag() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let events = Rc::new(RefCell::new(Vec::new()));
        let hook = events.clone();
        stream.set_suspended_callback(Some(Box::new(move |s: &Stream| {
            hook.borrow_mut().push(s.is_suspended().unwrap());
        })));

        rig.context
            .dispatch_event(Command::PlaybackStreamSuspended(StreamSuspendedParams {
                channel: 7,
                suspended: true,
            }));
        rig.context
            .dispatch_event(Command::PlaybackStreamSuspended(StreamSuspendedParams {
                channel: 7,
                suspended: false,
            }));

        assert_eq!(*events.borrow(), vec![true, false]);
    }

    #[test_log::test]
    fn started_event_fires_callback() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let started = Rc::new(Cell::new(false));
        let hook = started.clone();
        stream.set_started_callback(Some(Box::new(move |_| hook.set(true))));

        rig.context.dispatch_event(Command::Started(7));
        assert!(started.get());
    }

    #[test_log::test]
    fn interpolated_time_advances_and_cork_freezes_it() {
        let rig = rig(13);
        let flags = StreamFlags {
            interpolate_timing: true,
            ..Default::default()
        };
        let stream = ready_playback(&rig, flags, 4096);

        let tag = issue_timing_query(&rig, &stream);
        let reply = PlaybackLatency {
            playing: true,
            ..zero_latency_reply(&rig)
        };
        rig.transport.complete(tag, 13, &reply);

        rig.mainloop.advance(100_000);
        assert_eq!(stream.time().unwrap(), 100_000);

        stream.cork(true, None).unwrap();
        rig.mainloop.advance(100_000);
        assert_eq!(stream.time().unwrap(), 100_000);
    }

    #[test_log::test]
    fn flush_corrupts_the_write_index() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let tag = issue_timing_query(&rig, &stream);
        stream.flush(None).unwrap();

        let reply = PlaybackLatency {
            write_index: 7777,
            ..zero_latency_reply(&rig)
        };
        rig.transport.complete(tag, 13, &reply);

        let info = stream.timing_info().unwrap();
        assert!(info.write_index_corrupt);
        assert_eq!(info.write_index, 0);
    }

    #[test_log::test]
    fn legacy_versions_fill_buffer_attr_defaults() {
        let rig = rig(12);
        let stream = new_stream(&rig);
        stream
            .connect_playback(None, None, StreamFlags::default(), None, None)
            .unwrap();

        let (_, command) = rig.transport.sent_commands().pop().unwrap();
        let params = match command {
            Command::CreatePlaybackStream(params) => params,
            other => panic!("unexpected command {:?}", other),
        };

        // 250ms of S16 stereo at 44.1kHz.
        let tlength = SPEC.usec_to_bytes(250_000) as u32;
        assert_eq!(params.buffer_attr.max_length, 4 * 1024 * 1024);
        assert_eq!(params.buffer_attr.target_length, tlength);
        assert_eq!(params.buffer_attr.minimum_request_length, tlength / 5);
        assert_eq!(params.buffer_attr.pre_buffering, tlength);
        assert_eq!(params.buffer_attr.fragment_size, tlength);

        // Legacy versions carry the stream name in the command itself.
        assert_eq!(params.name, Some(cstr("test stream")));
    }

    #[test_log::test]
    fn s32_formats_require_version_12() {
        let spec = SampleSpec {
            format: SampleFormat::S32Le,
            ..SPEC
        };

        let old = rig(11);
        assert_matches!(
            Stream::new(&old.context, &cstr("s"), &spec, None),
            Err(Error::NotSupported)
        );

        let new = rig(12);
        assert!(Stream::new(&new.context, &cstr("s"), &spec, None).is_ok());
    }

    #[test_log::test]
    fn connect_flags_are_validated_per_direction() {
        let rig = rig(13);

        let stream = new_stream(&rig);
        let flags = StreamFlags {
            start_muted: true,
            ..Default::default()
        };
        assert_matches!(
            stream.connect_record(None, None, flags),
            Err(Error::InvalidArgument)
        );

        let stream = new_stream(&rig);
        let flags = StreamFlags {
            peak_detect: true,
            ..Default::default()
        };
        assert_matches!(
            stream.connect_playback(None, None, flags, None, None),
            Err(Error::InvalidArgument)
        );

        let old = super::super::testing::rig(11);
        let stream = new_stream(&old);
        let flags = StreamFlags {
            variable_rate: true,
            ..Default::default()
        };
        assert_matches!(
            stream.connect_playback(None, None, flags, None, None),
            Err(Error::NotSupported)
        );
    }

    #[test_log::test]
    fn update_sample_rate_requires_the_flag() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);
        assert_matches!(stream.update_sample_rate(48000, None), Err(Error::BadState));

        let flags = StreamFlags {
            variable_rate: true,
            ..Default::default()
        };
        let rig2 = super::super::testing::rig(13);
        let stream = ready_playback(&rig2, flags, 4096);

        let success = Rc::new(Cell::new(false));
        let hook = success.clone();
        stream
            .update_sample_rate(48000, Some(Box::new(move |_, ok| hook.set(ok))))
            .unwrap();

        let tag = rig2
            .transport
            .last_tag_of(CommandTag::UpdatePlaybackStreamSampleRate);
        rig2.transport.ack(tag);

        assert!(success.get());
        assert_eq!(stream.sample_spec().sample_rate, 48000);
    }

    #[test_log::test]
    fn proplist_updates_require_version_13() {
        let rig = rig(12);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        assert_matches!(
            stream.proplist_update(PropsUpdateMode::Merge, Props::new(), None),
            Err(Error::NotSupported)
        );

        // The legacy rename path still works.
        stream.set_name(&cstr("renamed"), None).unwrap();
        rig.transport.last_tag_of(CommandTag::SetPlaybackStreamName);
    }

    #[test_log::test]
    fn direction_checks_on_data_paths() {
        let rig = rig(13);
        let record = ready_record(&rig, 1 << 20);
        assert_matches!(
            record.write(&[0u8; 4], 0, SeekMode::Relative),
            Err(Error::BadState)
        );
        assert_matches!(record.writable_size(), Err(Error::BadState));

        let rig2 = super::super::testing::rig(13);
        let playback = ready_playback(&rig2, StreamFlags::default(), 4096);
        assert_matches!(playback.peek(), Err(Error::BadState));
        assert_matches!(playback.readable_size(), Err(Error::BadState));
    }

    #[test_log::test]
    fn peek_and_discard_edge_cases() {
        let rig = rig(13);
        let stream = ready_record(&rig, 1 << 20);

        // Nothing buffered yet.
        assert!(stream.peek().unwrap().is_none());

        // Dropping without a peek is a state error.
        assert_matches!(stream.discard(), Err(Error::BadState));
    }

    #[test_log::test]
    fn cancelled_operation_never_fires() {
        let rig = rig(13);
        let stream = ready_playback(&rig, StreamFlags::default(), 4096);

        let fired = Rc::new(Cell::new(false));
        let hook = fired.clone();
        let operation = stream
            .drain(Some(Box::new(move |_, _| hook.set(true))))
            .unwrap();

        operation.cancel();

        let tag = rig.transport.last_tag_of(CommandTag::DrainPlaybackStream);
        rig.transport.ack(tag);

        assert!(!fired.get());
        assert_matches!(
            operation.state(),
            super::super::OperationState::Cancelled
        );
    }
}
