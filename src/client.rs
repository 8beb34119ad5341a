//! The client-side stream engine.
//!
//! Everything here runs single-threaded on one event loop: operations return
//! immediately, and their completion is delivered later through reply
//! callbacks on the same loop. The engine borrows its collaborators (the
//! framed [`Transport`], the [`Mainloop`], the memory pool) and owns the
//! per-stream state: lifecycle, timing, credit, and queues.

use crate::protocol::{ProtocolError, PulseError};

mod context;
mod mainloop;
mod memblock;
mod memblockq;
mod operation;
mod smoother;
mod stream;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use context::*;
pub use mainloop::*;
pub use memblock::*;
pub use memblockq::*;
pub use operation::*;
pub use smoother::*;
pub use stream::*;
pub use transport::*;

/// An error encountered by a stream or context operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An argument was out of range or inconsistent.
    #[error("invalid argument")]
    InvalidArgument,
    /// The stream or context is in the wrong state for the operation.
    #[error("bad state")]
    BadState,
    /// The negotiated protocol version is too old for the operation.
    #[error("not supported by the server")]
    NotSupported,
    /// A malformed message was sent or received.
    #[error("protocol error")]
    Protocol(#[from] ProtocolError),
    /// No timing data has been received yet, or the relevant counter is
    /// currently invalidated.
    #[error("no timing data available")]
    NoData,
    /// An internal limit was hit, e.g. too many outstanding timing queries.
    #[error("internal error")]
    Internal,
    /// The server removed the entity the stream was attached to.
    #[error("killed by server")]
    Killed,
    /// An error code reported by the server.
    #[error("server error: {0:?}")]
    Server(PulseError),
}

impl Error {
    /// The wire error code recorded on the context when this error is
    /// raised.
    pub(crate) fn code(&self) -> PulseError {
        match self {
            Error::InvalidArgument => PulseError::Invalid,
            Error::BadState => PulseError::BadState,
            Error::NotSupported => PulseError::NotSupported,
            Error::Protocol(_) => PulseError::Protocol,
            Error::NoData => PulseError::NoData,
            Error::Internal => PulseError::Internal,
            Error::Killed => PulseError::Killed,
            Error::Server(e) => *e,
        }
    }
}

/// The result of a client operation.
pub type Result<T> = std::result::Result<T, Error>;
