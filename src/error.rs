//! Error types for splitpt.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for splitpt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the packet connections.
///
/// Once a packet connection terminates, the error that terminated it is
/// stored and handed out (cloned) to every later caller, which is why I/O
/// errors are kept behind an [`Arc`].
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Operation on a connection that was closed with [`close`](crate::PacketConn::close).
    #[error("operation on closed connection")]
    Closed,

    /// `close` was called on a connection that is already closed.
    #[error("connection already closed")]
    AlreadyClosed,

    /// Deadlines are not supported; cancellation is only through `close`.
    #[error("not implemented")]
    NotImplemented,

    /// The session identifier could not be written on a fresh stream.
    #[error("failed to send session identifier: {0}")]
    Setup(Arc<io::Error>),

    /// A new underlying stream could not be obtained.
    #[error("dial to {addr} failed: {cause}")]
    Dial {
        /// Address that was being dialed.
        addr: String,
        /// Error reported by the dialer.
        cause: Arc<io::Error>,
    },

    /// Invalid adapter configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other I/O failure.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    pub(crate) fn setup(err: io::Error) -> Self {
        Error::Setup(Arc::new(err))
    }

    pub(crate) fn dial(addr: impl ToString, err: io::Error) -> Self {
        Error::Dial {
            addr: addr.to_string(),
            cause: Arc::new(err),
        }
    }

    /// True for the plain "closed by the user" error.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed | Error::AlreadyClosed)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Closed | Error::AlreadyClosed => io::ErrorKind::NotConnected,
            Error::NotImplemented => io::ErrorKind::Unsupported,
            Error::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            Error::Setup(e) | Error::Io(e) => e.kind(),
            Error::Dial { cause, .. } => cause.kind(),
        };
        io::Error::new(kind, err)
    }
}
