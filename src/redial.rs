//! A packet connection over a single stream that is redialed whenever it
//! breaks.

use std::io::BufWriter;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select};

use crate::config::AdapterConfig;
use crate::conn::{PacketConn, copy_packet};
use crate::error::{Error, Result};
use crate::exchange;
use crate::queue::{CloseLatch, PacketQueue};
use crate::session::{PeerAddr, SessionId};
use crate::stream::{Dialer, Stream};

/// Implements [`PacketConn`] by encapsulating packets on a stream obtained
/// from a [`Dialer`], dialing a new stream each time the current one ends.
///
/// Each exchange cycle starts by sending the session identifier, after
/// which one thread decodes incoming frames and another encodes queued
/// outgoing packets. When either side of the stream fails, the stream is
/// shut down and, after the configured redial delay, a new one is dialed.
/// A failed dial or a failure to send the session identifier terminates
/// the connection; the error is then returned by every later call.
pub struct RedialPacketConn {
    shared: Arc<Shared>,
}

struct Shared {
    session_id: SessionId,
    remote_addr: PeerAddr,
    recv_queue: PacketQueue,
    send_queue: PacketQueue,
    closed: CloseLatch,
    redial_delay: Duration,
}

impl RedialPacketConn {
    /// Starts a connection for `session_id` with the default configuration.
    pub fn new<D: Dialer + 'static>(session_id: SessionId, dialer: D) -> Result<RedialPacketConn> {
        RedialPacketConn::with_config(session_id, Box::new(dialer), &AdapterConfig::default())
    }

    /// Starts a connection for `session_id` using `config`.
    pub fn with_config(
        session_id: SessionId,
        dialer: Box<dyn Dialer>,
        config: &AdapterConfig,
    ) -> Result<RedialPacketConn> {
        config.validate()?;
        let shared = Arc::new(Shared {
            session_id,
            remote_addr: dialer.remote_addr(),
            recv_queue: PacketQueue::new(config.queue_capacity),
            send_queue: PacketQueue::new(config.queue_capacity),
            closed: CloseLatch::new(),
            redial_delay: config.redial_delay,
        });
        let supervisor = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("splitpt-redial-{session_id}"))
            .spawn(move || {
                let result = supervisor.run(&*dialer);
                if let Err(e) = &result {
                    log::warn!("Session {}: terminated: {e}", supervisor.session_id);
                }
                let _ = supervisor.closed.close_with(result.err());
            })?;
        Ok(RedialPacketConn { shared })
    }

    /// The session this connection carries.
    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
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
    // Only a dial failure, a failed session identifier write, or close end
    // this loop.
    fn run(&self, dialer: &dyn Dialer) -> Result<()> {
        let mut cycles = 0u64;
        loop {
            if cycles > 0 && !exchange::wait_redial(&self.closed, self.redial_delay) {
                return Ok(());
            }
            if self.closed.is_closed() {
                return Ok(());
            }
            log::debug!("Session {}: dialing {}", self.session_id, self.remote_addr);
            let stream = dialer
                .dial()
                .map_err(|e| Error::dial(&self.remote_addr, e))?;
            cycles += 1;
            self.exchange(stream)?;
        }
    }

    fn exchange(&self, mut stream: Box<dyn Stream>) -> Result<()> {
        // Everything after the session identifier is encapsulated packets.
        if let Err(e) = self.session_id.write_to(&mut stream) {
            let _ = stream.shutdown_stream();
            return Err(Error::setup(e));
        }
        let label = format!("session {} via {}", self.session_id, self.remote_addr);
        let (reader, control) = match (stream.try_clone_stream(), stream.try_clone_stream()) {
            (Ok(reader), Ok(control)) => (reader, control),
            (Err(e), _) | (_, Err(e)) => {
                // Counts as a broken stream: redial.
                log::warn!("{label}: cannot clone stream: {e}");
                let _ = stream.shutdown_stream();
                return Ok(());
            }
        };

        let (done_tx, done_rx) = bounded::<()>(2);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        thread::scope(|s| {
            let inbound_done = done_tx.clone();
            let label = label.as_str();
            s.spawn(move || {
                exchange::pump_inbound(
                    reader,
                    &self.closed,
                    label,
                    exchange::deliver_to(&self.recv_queue, label),
                );
                let _ = inbound_done.send(());
            });
            s.spawn(move || {
                let mut writer = BufWriter::new(stream);
                while let Some(packet) =
                    exchange::next_outbound(&self.send_queue, &self.closed, &stop_rx)
                {
                    if !exchange::send_frame(&mut writer, &packet, label) {
                        break;
                    }
                }
                let _ = done_tx.send(());
            });

            select! {
                recv(done_rx) -> _ => {}
                recv(self.closed.signal()) -> _ => {}
            }
            // Unblocks whichever worker is still running.
            let _ = control.shutdown_stream();
            drop(stop_tx);
        });
        log::debug!("{label}: exchange finished");
        Ok(())
    }
}

impl PacketConn for RedialPacketConn {
    fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, PeerAddr)> {
        let packet = self.recv_packet()?;
        Ok((copy_packet(&packet, buf), self.shared.remote_addr.clone()))
    }

    fn send_to(&self, buf: &[u8], _addr: &PeerAddr) -> Result<usize> {
        if let Some(err) = self.shared.closed.error() {
            return Err(err);
        }
        if !self.shared.send_queue.push(buf.to_vec()) {
            log::debug!(
                "Session {}: outgoing queue full, dropping packet",
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
        Some(self.shared.remote_addr.clone())
    }
}

impl Drop for RedialPacketConn {
    fn drop(&mut self) {
        let _ = self.shared.closed.close_with(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fakes::ReportingDialer;
    use crossbeam_channel::unbounded;

    #[test]
    fn clone_failure_redials_instead_of_terminating() {
        let (dialed_tx, dialed_rx) = unbounded();
        let config = AdapterConfig::default().with_redial_delay(Duration::from_millis(1));
        let conn = RedialPacketConn::with_config(
            SessionId::new(),
            Box::new(ReportingDialer(dialed_tx)),
            &config,
        )
        .unwrap();

        for _ in 0..3 {
            dialed_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(!conn.is_closed());
    }
}
