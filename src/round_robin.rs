//! A packet connection that splits traffic over a fixed set of streams.

use std::io::BufWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select};

use crate::config::{AdapterConfig, SplitAlgorithm};
use crate::conn::{PacketConn, copy_packet};
use crate::error::{Error, Result};
use crate::exchange;
use crate::queue::{CloseLatch, PacketQueue};
use crate::session::{PeerAddr, SessionId};
use crate::stream::{Dialer, Preconnected, Stream};

/// Implements [`PacketConn`] over N streams at once.
///
/// Outgoing packets are spread over the streams, by default in strict
/// cyclic order, and incoming packets from all streams are merged into one
/// queue. Packets sent on different streams may arrive in any relative
/// order; the session layer above has to cope with that.
///
/// The streams live and die together: if any one of them fails, every
/// stream is shut down and the whole set is dialed again after the redial
/// delay. Failing to dial any stream, or to send the session identifier on
/// any stream, terminates the connection.
pub struct RoundRobinPacketConn {
    shared: Arc<Shared>,
}

struct Shared {
    session_id: SessionId,
    remote_addrs: Vec<PeerAddr>,
    recv_queue: PacketQueue,
    send_queue: PacketQueue,
    closed: CloseLatch,
    split: SplitAlgorithm,
    next: AtomicUsize,
    redial_delay: Duration,
}

impl RoundRobinPacketConn {
    /// Starts a connection over `dialers` with the default configuration.
    pub fn new(
        session_id: SessionId,
        dialers: Vec<Box<dyn Dialer>>,
    ) -> Result<RoundRobinPacketConn> {
        RoundRobinPacketConn::with_config(session_id, dialers, &AdapterConfig::default())
    }

    /// Starts a connection over streams that are already established. The
    /// connection terminates once any of them breaks.
    pub fn from_streams(
        session_id: SessionId,
        streams: Vec<Box<dyn Stream>>,
        config: &AdapterConfig,
    ) -> Result<RoundRobinPacketConn> {
        let dialers = streams
            .into_iter()
            .map(|s| Box::new(Preconnected::from_boxed(s)) as Box<dyn Dialer>)
            .collect();
        RoundRobinPacketConn::with_config(session_id, dialers, config)
    }

    /// Starts a connection over `dialers` using `config`.
    pub fn with_config(
        session_id: SessionId,
        dialers: Vec<Box<dyn Dialer>>,
        config: &AdapterConfig,
    ) -> Result<RoundRobinPacketConn> {
        config.validate()?;
        if dialers.is_empty() {
            return Err(Error::InvalidConfig("at least one connection is required".into()));
        }
        let shared = Arc::new(Shared {
            session_id,
            remote_addrs: dialers.iter().map(|d| d.remote_addr()).collect(),
            recv_queue: PacketQueue::new(config.queue_capacity),
            send_queue: PacketQueue::new(config.queue_capacity),
            closed: CloseLatch::new(),
            split: config.split,
            next: AtomicUsize::new(0),
            redial_delay: config.redial_delay,
        });
        let supervisor = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("splitpt-rr-{session_id}"))
            .spawn(move || {
                let result = supervisor.run(&dialers);
                if let Err(e) = &result {
                    log::warn!("[RR] Session {}: terminated: {e}", supervisor.session_id);
                }
                let _ = supervisor.closed.close_with(result.err());
            })?;
        Ok(RoundRobinPacketConn { shared })
    }

    /// The session this connection carries.
    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
    }

    /// Addresses of all underlying streams, in selection order.
    pub fn remote_addrs(&self) -> &[PeerAddr] {
        &self.shared.remote_addrs
    }

    /// Receives one whole packet.
    pub fn recv_packet(&self) -> Result<Vec<u8>> {
        self.shared.recv_queue.pop_or_closed(&self.shared.closed)
    }

    /// True once the connection has terminated.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_closed()
    }
}

impl Shared {
    fn run(&self, dialers: &[Box<dyn Dialer>]) -> Result<()> {
        let mut cycles = 0u64;
        loop {
            if cycles > 0 && !exchange::wait_redial(&self.closed, self.redial_delay) {
                return Ok(());
            }
            if self.closed.is_closed() {
                return Ok(());
            }
            log::debug!(
                "[RR] Session {}: dialing {} streams",
                self.session_id,
                dialers.len()
            );
            let mut streams = Vec::with_capacity(dialers.len());
            for dialer in dialers {
                let stream = dialer
                    .dial()
                    .map_err(|e| Error::dial(dialer.remote_addr(), e))?;
                streams.push(stream);
            }
            cycles += 1;
            self.exchange(streams)?;
        }
    }

    /// Index of the stream the next packet goes to.
    fn next_stream(&self, n: usize) -> usize {
        match self.split {
            SplitAlgorithm::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % n,
            SplitAlgorithm::Random => {
                let last = n - 1;
                let index: usize = random_number::random!(0, last);
                index
            }
        }
    }

    fn exchange(&self, mut streams: Vec<Box<dyn Stream>>) -> Result<()> {
        // Every stream opens with the session identifier. There is no
        // partial redial, so one failure here ends the connection.
        let failed = streams
            .iter_mut()
            .enumerate()
            .find_map(|(i, stream)| self.session_id.write_to(stream).err().map(|e| (i, e)));
        if let Some((i, e)) = failed {
            log::warn!("[RR] Session {}: error writing to stream {i}: {e}", self.session_id);
            for s in &streams {
                let _ = s.shutdown_stream();
            }
            return Err(Error::setup(e));
        }
        let mut readers = Vec::with_capacity(streams.len());
        let mut controls = Vec::with_capacity(streams.len());
        for (i, stream) in streams.iter().enumerate() {
            match (stream.try_clone_stream(), stream.try_clone_stream()) {
                (Ok(reader), Ok(control)) => {
                    readers.push(reader);
                    controls.push(control);
                }
                (Err(e), _) | (_, Err(e)) => {
                    // Counts as a broken stream: redial the set.
                    log::warn!("[RR] Session {}: cannot clone stream {i}: {e}", self.session_id);
                    for s in &streams {
                        let _ = s.shutdown_stream();
                    }
                    return Ok(());
                }
            }
        }
        let n = streams.len();

        // One report per worker; only this thread acts on them.
        let (done_tx, done_rx) = bounded::<()>(n + 1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        thread::scope(|s| {
            for (i, reader) in readers.into_iter().enumerate() {
                let done = done_tx.clone();
                let label = format!("[RR] session {} stream {i}", self.session_id);
                s.spawn(move || {
                    exchange::pump_inbound(
                        reader,
                        &self.closed,
                        &label,
                        exchange::deliver_to(&self.recv_queue, &label),
                    );
                    let _ = done.send(());
                });
            }
            s.spawn(move || {
                let label = format!("[RR] session {}", self.session_id);
                let mut writers: Vec<_> = streams.into_iter().map(BufWriter::new).collect();
                while let Some(packet) =
                    exchange::next_outbound(&self.send_queue, &self.closed, &stop_rx)
                {
                    let index = self.next_stream(n);
                    if !exchange::send_frame(&mut writers[index], &packet, &label) {
                        break;
                    }
                }
                let _ = done_tx.send(());
            });

            select! {
                recv(done_rx) -> _ => {}
                recv(self.closed.signal()) -> _ => {}
            }
            for control in &controls {
                let _ = control.shutdown_stream();
            }
            drop(stop_tx);
        });
        log::debug!("[RR] Session {}: exchange finished", self.session_id);
        Ok(())
    }
}

impl PacketConn for RoundRobinPacketConn {
    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, PeerAddr)> {
        let packet = self.recv_packet()?;
        Ok((copy_packet(&packet, buf), self.shared.remote_addrs[0].clone()))
    }

    fn send_to(&self, buf: &[u8], _addr: &PeerAddr) -> Result<usize> {
        if let Some(err) = self.shared.closed.error() {
            return Err(err);
        }
        if !self.shared.send_queue.push(buf.to_vec()) {
            log::debug!(
                "[RR] Session {}: outgoing queue full, dropping packet",
                self.shared.session_id
            );
        }
        Ok(buf.len())
    }

    fn close(&self) -> Result<()> {
        self.shared.closed.close_with(None)
    }

    fn local_addr(&self) -> PeerAddr {
        PeerAddr::Session(self.shared.session_id)
    }

    fn remote_addr(&self) -> Option<PeerAddr> {
        self.shared.remote_addrs.first().cloned()
    }
}

impl Drop for RoundRobinPacketConn {
    fn drop(&mut self) {
        let _ = self.shared.closed.close_with(None);
    }
}
