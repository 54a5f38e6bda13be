//! The packet-connection capability shared by every adapter.

use std::time::Instant;

use crate::error::{Error, Result};
use crate::session::PeerAddr;

/// An unreliable, datagram-style connection.
///
/// This is the surface a reliable session protocol runs on. Writes never
/// block: packets are copied into a bounded queue and dropped if it is
/// full. Reads block until a packet arrives or the connection is closed.
/// After closing, every operation fails immediately with the error that
/// terminated the connection.
pub trait PacketConn: Send + Sync {
    /// Receives one packet into `buf`, returning its length and source.
    /// Packets longer than `buf` are truncated.
    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, PeerAddr)>;

    /// Queues a copy of `buf` for `addr`. Returns `buf.len()` even if the
    /// packet was dropped because the queue is full.
    fn send_to(&self, buf: &[u8], addr: &PeerAddr) -> Result<usize>;

    /// Unblocks pending operations and makes future ones fail. A second
    /// call returns [`Error::AlreadyClosed`].
    fn close(&self) -> Result<()>;

    /// Local address; the session identifier on the client side.
    fn local_addr(&self) -> PeerAddr;

    /// Remote address, for connections that have a single remote.
    fn remote_addr(&self) -> Option<PeerAddr>;

    /// Unsupported.
    fn set_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Unsupported.
    fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Unsupported.
    fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::NotImplemented)
    }
}

// Copies a queued packet into the caller's buffer, truncating like a
// datagram socket would.
pub(crate) fn copy_packet(packet: &[u8], buf: &mut [u8]) -> usize {
    let n = packet.len().min(buf.len());
    buf[..n].copy_from_slice(&packet[..n]);
    n
}
