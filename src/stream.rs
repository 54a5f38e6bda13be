//! Underlying byte streams and the dialers that produce them.
//!
//! Packet connections treat their streams as opaque ordered byte pipes; any
//! obfuscation or encryption lives inside the stream implementation.

use std::io::{self, Read, Result as IoResult, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::session::PeerAddr;

/// An ordered, reliable byte stream a packet connection can run over.
pub trait Stream: Read + Write + Send {
    /// Creates another handle to the same stream, used to read and write
    /// from different threads.
    fn try_clone_stream(&self) -> IoResult<Box<dyn Stream>>;

    /// Shuts down both directions. Blocked reads on any handle return.
    fn shutdown_stream(&self) -> IoResult<()>;

    /// Address of the remote end.
    fn peer(&self) -> PeerAddr;
}

impl Stream for TcpStream {
    fn try_clone_stream(&self) -> IoResult<Box<dyn Stream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown_stream(&self) -> IoResult<()> {
        self.shutdown(Shutdown::Both)
    }

    fn peer(&self) -> PeerAddr {
        match self.peer_addr() {
            Ok(addr) => PeerAddr::Socket(addr),
            Err(_) => PeerAddr::Named("tcp".to_string()),
        }
    }
}

#[cfg(unix)]
impl Stream for std::os::unix::net::UnixStream {
    fn try_clone_stream(&self) -> IoResult<Box<dyn Stream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown_stream(&self) -> IoResult<()> {
        self.shutdown(Shutdown::Both)
    }

    fn peer(&self) -> PeerAddr {
        let name = self
            .peer_addr()
            .ok()
            .and_then(|a| a.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "unix".to_string());
        PeerAddr::Named(name)
    }
}

/// Produces fresh underlying streams, once per exchange cycle.
pub trait Dialer: Send + Sync {
    /// Opens a new stream to the remote end.
    fn dial(&self) -> IoResult<Box<dyn Stream>>;

    /// Address this dialer connects to.
    fn remote_addr(&self) -> PeerAddr;
}

/// Dials a TCP address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: SocketAddr,
    connect_timeout: Option<Duration>,
    nodelay: bool,
}

impl TcpDialer {
    /// A dialer for `addr` with no connect timeout and `TCP_NODELAY` set.
    pub fn new(addr: SocketAddr) -> TcpDialer {
        TcpDialer {
            addr,
            connect_timeout: None,
            nodelay: true,
        }
    }

    /// Resolves `addr` and uses the first address it yields.
    pub fn resolve<A: ToSocketAddrs>(addr: A) -> IoResult<TcpDialer> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        })?;
        Ok(TcpDialer::new(addr))
    }

    /// Gives up connecting after `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> TcpDialer {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets whether `TCP_NODELAY` is enabled on dialed streams.
    pub fn with_nodelay(mut self, nodelay: bool) -> TcpDialer {
        self.nodelay = nodelay;
        self
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> IoResult<Box<dyn Stream>> {
        let stream = match self.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&self.addr, timeout)?,
            None => TcpStream::connect(self.addr)?,
        };
        stream.set_nodelay(self.nodelay)?;
        log::debug!("Dialed {}", self.addr);
        Ok(Box::new(stream))
    }

    fn remote_addr(&self) -> PeerAddr {
        PeerAddr::Socket(self.addr)
    }
}

/// Hands out one already-established stream, then refuses.
///
/// Wrapping a stream this way lets a packet connection run over a
/// connection set up elsewhere; once that stream breaks, the next dial
/// fails and the packet connection terminates instead of reusing a broken
/// stream.
pub struct Preconnected {
    stream: Mutex<Option<Box<dyn Stream>>>,
    remote: PeerAddr,
}

impl Preconnected {
    /// Wraps `stream`; its peer address becomes the remote address.
    pub fn new<S: Stream + 'static>(stream: S) -> Preconnected {
        let remote = stream.peer();
        Preconnected {
            stream: Mutex::new(Some(Box::new(stream))),
            remote,
        }
    }

    /// Wraps an already boxed stream.
    pub fn from_boxed(stream: Box<dyn Stream>) -> Preconnected {
        let remote = stream.peer();
        Preconnected {
            stream: Mutex::new(Some(stream)),
            remote,
        }
    }
}

impl Dialer for Preconnected {
    fn dial(&self) -> IoResult<Box<dyn Stream>> {
        self.stream.lock().take().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                "preconnected stream already used",
            )
        })
    }

    fn remote_addr(&self) -> PeerAddr {
        self.remote.clone()
    }
}
