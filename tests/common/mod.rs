//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use splitpt::SessionId;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Two ends of a loopback TCP connection: (client, server).
pub fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    server.set_read_timeout(Some(WAIT)).unwrap();
    (client, server)
}

/// Runs `f` on its own thread and fails the test if it takes longer than
/// [`WAIT`].
pub fn within<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(WAIT).expect("timed out")
}

/// Reads the session identifier a packet connection opens its streams with.
pub fn read_session_id(stream: &mut TcpStream) -> SessionId {
    SessionId::read_from(stream).unwrap()
}
