//! A packet connection backed purely by queues, for a process that talks to
//! many remote peers.

use std::sync::Arc;
use std::time::Duration;

use crate::conn::{PacketConn, copy_packet};
use crate::error::Result;
use crate::queue::{CloseLatch, PacketQueue, QUEUE_SIZE};
use crate::remote_map::RemoteTable;
use crate::session::PeerAddr;

/// Implements [`PacketConn`] over one shared incoming queue and one
/// outgoing queue per recently seen peer.
///
/// Whatever moves bytes on the real network calls
/// [`queue_incoming`](QueuePacketConn::queue_incoming) for every packet it
/// receives, and drains [`outgoing_queue`](QueuePacketConn::outgoing_queue)
/// for every peer it serves. Idle peers are forgotten after the timeout
/// given at construction.
pub struct QueuePacketConn {
    remotes: Arc<RemoteTable>,
    local_addr: PeerAddr,
    recv_queue: PacketQueue<(Vec<u8>, PeerAddr)>,
    closed: CloseLatch,
}

impl QueuePacketConn {
    /// Creates a connection that tracks peers for at least `timeout`, with
    /// the default queue size.
    pub fn new(local_addr: PeerAddr, timeout: Duration) -> Result<QueuePacketConn> {
        QueuePacketConn::with_capacity(local_addr, timeout, QUEUE_SIZE)
    }

    /// Like [`new`](QueuePacketConn::new) with queues of `capacity` packets.
    pub fn with_capacity(
        local_addr: PeerAddr,
        timeout: Duration,
        capacity: usize,
    ) -> Result<QueuePacketConn> {
        let remotes = Arc::new(RemoteTable::new(timeout, capacity));
        let closed = CloseLatch::new();
        remotes.spawn_sweeper(closed.signal().clone())?;
        Ok(QueuePacketConn {
            remotes,
            local_addr,
            recv_queue: PacketQueue::new(capacity),
            closed,
        })
    }

    /// Queues a copy of an incoming packet from `addr`, to be returned by a
    /// later `recv_from`. Dropped silently if closed or the queue is full.
    pub fn queue_incoming(&self, packet: &[u8], addr: PeerAddr) {
        self.push_incoming(packet.to_vec(), addr);
    }

    pub(crate) fn push_incoming(&self, packet: Vec<u8>, addr: PeerAddr) {
        if self.closed.is_closed() {
            return;
        }
        let len = packet.len();
        if !self.recv_queue.push((packet, addr)) {
            log::debug!("Incoming queue full, dropping {len} byte packet");
        }
    }

    /// The queue of packets written to `addr`, created if necessary. The
    /// queue is kept alive while the returned handle is held.
    pub fn outgoing_queue(&self, addr: &PeerAddr) -> Arc<PacketQueue> {
        self.remotes.queue_for(addr)
    }

    /// Receives one whole packet and its source.
    pub fn recv_packet(&self) -> Result<(Vec<u8>, PeerAddr)> {
        self.recv_queue.pop_or_closed(&self.closed)
    }

    /// True once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    /// Number of peers with a live outgoing queue.
    pub fn peer_count(&self) -> usize {
        self.remotes.len()
    }

    pub(crate) fn close_latch(&self) -> &CloseLatch {
        &self.closed
    }
}

impl PacketConn for QueuePacketConn {
    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, PeerAddr)> {
        let (packet, addr) = self.recv_packet()?;
        Ok((copy_packet(&packet, buf), addr))
    }

    fn send_to(&self, buf: &[u8], addr: &PeerAddr) -> Result<usize> {
        if let Some(err) = self.closed.error() {
            return Err(err);
        }
        if !self.remotes.push(addr, buf.to_vec()) {
            log::debug!("Outgoing queue for {addr} full, dropping packet");
        }
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        self.closed.close_with(None)
    }

    fn local_addr(&self) -> PeerAddr {
        self.local_addr.clone()
    }

    fn remote_addr(&self) -> Option<PeerAddr> {
        None
    }
}

impl Drop for QueuePacketConn {
    fn drop(&mut self) {
        let _ = self.closed.close_with(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::SessionId;
    use std::thread;
    use std::time::Instant;

    fn conn() -> QueuePacketConn {
        QueuePacketConn::new(PeerAddr::Named("test".into()), Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn incoming_packets_come_out_in_order() {
        let c = conn();
        let from = PeerAddr::Session(SessionId::new());
        for p in [b"A", b"B", b"C"] {
            c.queue_incoming(p, from.clone());
        }
        let mut buf = [0u8; 16];
        for want in [b"A", b"B", b"C"] {
            let (n, addr) = c.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..n], want);
            assert_eq!(addr, from);
        }
    }

    #[test]
    fn incoming_overflow_keeps_queue_capacity() {
        let c = conn();
        let from = PeerAddr::Named("peer".into());
        for i in 0..40u8 {
            c.queue_incoming(&[i], from.clone());
        }
        assert_eq!(c.recv_queue.len(), QUEUE_SIZE);
        for i in 0..QUEUE_SIZE as u8 {
            assert_eq!(c.recv_packet().unwrap().0, vec![i]);
        }
        assert!(c.recv_queue.is_empty());
    }

    #[test]
    fn writes_are_copied() {
        let c = conn();
        let to = PeerAddr::Session(SessionId::new());
        let mut buf = b"original".to_vec();
        assert_eq!(c.send_to(&buf, &to).unwrap(), buf.len());
        buf.copy_from_slice(b"mutated!");
        assert_eq!(c.outgoing_queue(&to).try_pop().unwrap(), b"original");

        let mut incoming = b"inbound".to_vec();
        c.queue_incoming(&incoming, to.clone());
        incoming[0] = b'X';
        assert_eq!(c.recv_packet().unwrap().0, b"inbound");
    }

    #[test]
    fn outgoing_queues_are_per_address() {
        let c = conn();
        let (a, b) = (PeerAddr::Named("a".into()), PeerAddr::Named("b".into()));
        c.send_to(b"to a", &a).unwrap();
        c.send_to(b"to b", &b).unwrap();
        assert_eq!(c.peer_count(), 2);
        assert_eq!(c.outgoing_queue(&a).try_pop().unwrap(), b"to a");
        assert_eq!(c.outgoing_queue(&b).try_pop().unwrap(), b"to b");
    }

    #[test]
    fn short_buffer_truncates() {
        let c = conn();
        c.queue_incoming(b"0123456789", PeerAddr::Named("p".into()));
        let mut buf = [0u8; 4];
        let (n, _) = c.recv_from(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn close_is_idempotent() {
        let c = conn();
        c.close().unwrap();
        assert!(matches!(c.close(), Err(Error::AlreadyClosed)));
        assert!(matches!(c.recv_packet(), Err(Error::Closed)));
        assert!(matches!(
            c.send_to(b"x", &PeerAddr::Named("p".into())),
            Err(Error::Closed)
        ));
        c.queue_incoming(b"ignored", PeerAddr::Named("p".into()));
        assert!(c.recv_queue.is_empty());
    }

    #[test]
    fn close_unblocks_reader() {
        let c = Arc::new(conn());
        let reader = {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                c.recv_from(&mut buf)
            })
        };
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        c.close().unwrap();
        assert!(matches!(reader.join().unwrap(), Err(Error::Closed)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn deadlines_are_not_implemented() {
        let c = conn();
        assert!(matches!(c.set_deadline(None), Err(Error::NotImplemented)));
        assert!(matches!(c.set_read_deadline(None), Err(Error::NotImplemented)));
        assert!(matches!(c.set_write_deadline(None), Err(Error::NotImplemented)));
        assert!(c.remote_addr().is_none());
    }
}
