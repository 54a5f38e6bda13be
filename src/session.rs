//! Session identifiers and the addresses packets are tagged with.

use std::fmt;
use std::io::{Read, Result as IoResult, Write};
use std::net::SocketAddr;

use uuid::Uuid;

/// Length in bytes of a [`SessionId`] on the wire.
pub const SESSION_ID_LEN: usize = 16;

/// Identifies one logical session across any number of underlying streams.
///
/// The raw bytes are the first thing written on every stream that belongs
/// to the session, ahead of any framed packet. This lets the accepting side
/// group streams by session rather than by source address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Creates a fresh random identifier.
    pub fn new() -> SessionId {
        SessionId(Uuid::new_v4().to_bytes_le())
    }

    /// Wraps raw identifier bytes.
    pub fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> SessionId {
        SessionId(bytes)
    }

    /// The raw identifier bytes, as sent on the wire.
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }

    /// Reads the identifier that opens a stream.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> IoResult<SessionId> {
        let mut buf = [0u8; SESSION_ID_LEN];
        reader.read_exact(&mut buf)?;
        Ok(SessionId(buf))
    }

    /// Writes the identifier at the start of a stream and flushes it.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> IoResult<()> {
        writer.write_all(&self.0)?;
        writer.flush()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        SessionId::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes_le(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

/// Address-like value a packet is sent to or received from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    /// A logical session, used by the session-keyed server side and as the
    /// local address of client-side connections.
    Session(SessionId),
    /// A socket address of an underlying stream.
    Socket(SocketAddr),
    /// A fixed descriptive name, for streams without a socket address.
    Named(String),
}

impl PeerAddr {
    /// Name of the address family, in the style of `net.Addr.Network`.
    pub fn network(&self) -> &'static str {
        match self {
            PeerAddr::Session(_) => "session",
            PeerAddr::Socket(_) => "tcp",
            PeerAddr::Named(_) => "stream",
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Session(id) => write!(f, "{id}"),
            PeerAddr::Socket(addr) => write!(f, "{addr}"),
            PeerAddr::Named(name) => f.write_str(name),
        }
    }
}

impl From<SessionId> for PeerAddr {
    fn from(id: SessionId) -> Self {
        PeerAddr::Session(id)
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        PeerAddr::Socket(addr)
    }
}
