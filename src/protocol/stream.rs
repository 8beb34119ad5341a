//! Shared definitions for playback and record streams.

use enum_primitive_derive::Primitive;

/// The direction of a stream.
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum StreamDirection {
    /// No direction assigned yet.
    #[default]
    None = 0,
    /// Playback stream.
    Playback = 1,
    /// Record stream.
    Record = 2,
    /// Sample upload stream.
    Upload = 3,
}

/// How the write offset of a stream write is to be interpreted.
#[repr(u32)]
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Primitive)]
pub enum SeekMode {
    /// Seek relative to the current write index.
    #[default]
    Relative = 0,
    /// Seek to an absolute byte position in the stream.
    Absolute = 1,
    /// Seek relative to the current read index, i.e. what is about to be
    /// played next.
    RelativeOnRead = 2,
    /// Seek relative to the current end of the buffered data.
    RelativeEnd = 3,
}

/// Stream configuration flags.
///
/// A mix of wire-visible options (sent in the create command) and client-side
/// behavior switches for the timing machinery.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct StreamFlags {
    /// Create the stream in the corked (paused) state.
    pub start_corked: bool,

    /// Run a smoother over the latency snapshots so that time queries can be
    /// answered between server replies.
    pub interpolate_timing: bool,

    /// Don't force the reported stream time to be monotonic.
    pub not_monotonic: bool,

    /// Periodically request fresh latency information from the server.
    pub auto_timing_update: bool,

    /// Don't remap channels by their name, instead map them simply by their
    /// index.
    pub no_remap_channels: bool,

    /// When remapping channels by name, don't upmix or downmix them to
    /// related channels.
    pub no_remix_channels: bool,

    /// Use the sample format of the device the stream is connected to, and
    /// ignore the format in the passed sample spec.
    pub fix_format: bool,

    /// Use the sample rate of the device, and ignore the rate in the passed
    /// sample spec.
    pub fix_rate: bool,

    /// Use the channel count and map of the device, and ignore the passed
    /// map.
    pub fix_channels: bool,

    /// Don't allow moving this stream to another device.
    pub dont_move: bool,

    /// Allow dynamic changing of the sampling rate during playback, via the
    /// update-sample-rate operation.
    pub variable_rate: bool,

    /// Find peaks instead of resampling. Record streams only.
    pub peak_detect: bool,

    /// Create the stream in a muted state. Playback streams only.
    pub start_muted: bool,

    /// Try to adjust the latency of the device based on the requested buffer
    /// metrics, and adjust the buffer metrics accordingly.
    pub adjust_latency: bool,
}

/// Playback and record buffer metrics.
///
/// A zero value in any field means "pick a default": on protocol version 13
/// and newer the server chooses, on older versions conservative defaults are
/// filled in client-side before the stream is created.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct BufferAttr {
    /// Maximum length of the server-side buffer in bytes.
    pub max_length: u32,

    /// The target fill level of the playback buffer. The server sends
    /// requests for more data whenever less than this is buffered.
    ///
    /// Only valid for playback.
    pub target_length: u32,

    /// Pre-buffering: playback does not start before this many bytes are
    /// available in the buffer. Zero disables automatic start and stop, for
    /// manual control via cork and trigger.
    ///
    /// Only valid for playback.
    pub pre_buffering: u32,

    /// The minimum number of bytes the server requests from the client at a
    /// time.
    ///
    /// Only valid for playback.
    pub minimum_request_length: u32,

    /// The granularity in which the server sends captured data to the
    /// client.
    ///
    /// Only valid for recording.
    pub fragment_size: u32,
}
