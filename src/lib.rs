//! A pure Rust implementation of the client side of the PulseAudio protocol,
//! centered on the per-stream engine: opening playback and record channels,
//! exchanging samples and control commands over the framed transport, and
//! maintaining a low-latency estimate of where audio "really is" right now.
//!
//! The crate is split in two layers:
//!
//!  - [`protocol`] holds the wire types: the tagstruct codec, the command
//!    table, and the version-gated parameter and reply structs.
//!  - [`client`] holds the stream engine itself: the lifecycle state machine,
//!    the timing model, the write and read pipelines, and the control
//!    operations, all driven from a single event loop.
//!
//! The framed transport, the event loop, and the connection handshake are
//! consumed as interfaces ([`client::Transport`], [`client::Mainloop`]) so
//! the engine can sit on top of any packet stream.

#![warn(
    anonymous_parameters,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_extern_crates,
    unused_qualifications
)]

pub mod client;
pub mod protocol;
