//! Server side: accepts streams and groups them by session.

use std::io::BufWriter;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select};

use crate::config::AdapterConfig;
use crate::error::Result;
use crate::exchange;
use crate::queue_conn::QueuePacketConn;
use crate::session::{PeerAddr, SessionId};
use crate::stream::Stream;

/// How long a new stream has to deliver its session identifier.
const SESSION_ID_TIMEOUT: Duration = Duration::from_secs(10);

/// A TCP listener that demultiplexes streams by session.
///
/// Every accepted stream must start with a [`SessionId`]. Packets decoded
/// from any stream of a session show up on the shared [`QueuePacketConn`]
/// tagged with `PeerAddr::Session(id)`, and packets written to that address
/// are sent out over whichever of the session's streams picks them up
/// first. A client may therefore open any number of streams, from any
/// source addresses, and they all feed the same session.
///
/// # Example
///
/// ```rust,no_run
/// use splitpt::{AdapterConfig, PacketConn, SessionListener};
///
/// let listener = SessionListener::bind("127.0.0.1:8080", &AdapterConfig::default())?;
/// let conn = listener.packet_conn();
/// std::thread::spawn(move || listener.serve());
///
/// // Echo every packet back to the session it came from.
/// let mut buf = [0u8; 65535];
/// loop {
///     let (n, from) = conn.recv_from(&mut buf)?;
///     conn.send_to(&buf[..n], &from)?;
/// }
/// # Ok::<(), splitpt::Error>(())
/// ```
pub struct SessionListener {
    listener: TcpListener,
    conn: Arc<QueuePacketConn>,
}

impl SessionListener {
    /// Binds to `addr`. Sessions whose streams have all gone away are
    /// forgotten after the configured idle timeout.
    pub fn bind<A: ToSocketAddrs>(addr: A, config: &AdapterConfig) -> Result<SessionListener> {
        config.validate()?;
        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        let conn = QueuePacketConn::with_capacity(
            PeerAddr::Socket(local),
            config.idle_timeout,
            config.queue_capacity,
        )?;
        log::info!("Listening for sessions on {local}");
        Ok(SessionListener {
            listener,
            conn: Arc::new(conn),
        })
    }

    /// Returns the local address that this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The packet connection all accepted sessions feed.
    pub fn packet_conn(&self) -> Arc<QueuePacketConn> {
        Arc::clone(&self.conn)
    }

    /// Accepts one stream, reads its session identifier and starts moving
    /// packets between it and the packet connection.
    ///
    /// Blocks until the new stream has sent its identifier. [`serve`]
    /// reads identifiers on the per-stream threads instead.
    ///
    /// [`serve`]: SessionListener::serve
    pub fn accept(&self) -> Result<(SessionId, SocketAddr)> {
        let (mut stream, addr) = self.listener.accept()?;
        log::debug!("Accepted connection from: {addr}");
        let session_id = read_session_id(&mut stream)?;
        log::debug!("Connection from {addr} joins session {session_id}");
        self.spawn_handler(addr, move |conn| serve_stream(conn, session_id, stream))?;
        Ok((session_id, addr))
    }

    /// Accepts streams until the packet connection is closed. Failures on
    /// individual streams are logged and skipped, and a stream that never
    /// sends its identifier only ties up its own thread.
    ///
    /// Closing the packet connection wakes the accept loop, so this returns
    /// promptly after [`close`](crate::PacketConn::close).
    pub fn serve(&self) -> Result<()> {
        let local = self.listener.local_addr()?;
        let closed = self.conn.close_latch().signal().clone();
        let (done_tx, done_rx) = bounded::<()>(0);
        thread::scope(|s| {
            s.spawn(move || {
                select! {
                    recv(closed) -> _ => wake(local),
                    recv(done_rx) -> _ => {}
                }
            });
            let result = self.accept_loop();
            drop(done_tx);
            result
        })
    }

    fn accept_loop(&self) -> Result<()> {
        while !self.conn.is_closed() {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Failed to accept connection: {e}");
                    continue;
                }
            };
            if self.conn.is_closed() {
                break;
            }
            log::debug!("Accepted connection from: {addr}");
            let spawned = self.spawn_handler(addr, move |conn| match read_session_id(&mut stream) {
                Ok(session_id) => {
                    log::debug!("Connection from {addr} joins session {session_id}");
                    serve_stream(conn, session_id, stream);
                }
                Err(e) => log::debug!("Connection from {addr} sent no session id: {e}"),
            });
            if let Err(e) = spawned {
                log::warn!("Cannot serve connection from {addr}: {e}");
            }
        }
        Ok(())
    }

    fn spawn_handler<F>(&self, addr: SocketAddr, handler: F) -> Result<()>
    where
        F: FnOnce(&QueuePacketConn) + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        thread::Builder::new()
            .name(format!("splitpt-stream-{addr}"))
            .spawn(move || handler(&conn))?;
        Ok(())
    }
}

fn read_session_id(stream: &mut TcpStream) -> Result<SessionId> {
    stream.set_read_timeout(Some(SESSION_ID_TIMEOUT))?;
    let session_id = SessionId::read_from(stream)?;
    stream.set_read_timeout(None)?;
    Ok(session_id)
}

/// Unblocks a thread parked in `accept` on `local`.
fn wake(mut local: SocketAddr) {
    if local.ip().is_unspecified() {
        local.set_ip(match local {
            SocketAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        });
    }
    if let Err(e) = TcpStream::connect_timeout(&local, SESSION_ID_TIMEOUT) {
        log::debug!("Cannot wake accept loop on {local}: {e}");
    }
}

fn serve_stream(conn: &QueuePacketConn, session_id: SessionId, stream: TcpStream) {
    let label = format!("session {session_id} from {}", stream.peer());
    let (reader, control) = match (stream.try_clone_stream(), stream.try_clone_stream()) {
        (Ok(reader), Ok(control)) => (reader, control),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("{label}: cannot clone stream: {e}");
            return;
        }
    };
    let addr = PeerAddr::Session(session_id);
    // Holding the queue keeps the session from being evicted while this
    // stream is alive.
    let queue = conn.outgoing_queue(&addr);
    let closed = conn.close_latch();

    let (done_tx, done_rx) = bounded::<()>(2);
    let (stop_tx, stop_rx) = bounded::<()>(0);
    thread::scope(|s| {
        let inbound_done = done_tx.clone();
        let label = label.as_str();
        s.spawn(move || {
            exchange::pump_inbound(reader, closed, label, |packet| {
                conn.push_incoming(packet, addr.clone());
            });
            let _ = inbound_done.send(());
        });
        s.spawn(move || {
            let mut writer = BufWriter::new(stream);
            while let Some(packet) = exchange::next_outbound(&queue, closed, &stop_rx) {
                if !exchange::send_frame(&mut writer, &packet, label) {
                    break;
                }
            }
            let _ = done_tx.send(());
        });

        select! {
            recv(done_rx) -> _ => {}
            recv(closed.signal()) -> _ => {}
        }
        let _ = control.shutdown_stream();
        drop(stop_tx);
    });
    log::debug!("{label}: stream finished");
}
