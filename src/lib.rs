//! # splitpt - Packet Connections over Split Streams
//!
//! splitpt adapts reliable byte streams into unreliable, message-oriented
//! packet connections, following the Turbo Tunnel pattern: a session layer
//! that does its own retransmission and ordering runs on top, and the
//! streams underneath can come and go without the session noticing.
//!
//! ## Key Features
//!
//! - **Packet Framing**: Every packet travels as a 4-byte little-endian
//!   length prefix followed by its payload
//! - **Session Identity**: Each stream opens with the 16-byte identifier of
//!   the session it belongs to, so the server can regroup streams that come
//!   from different connections or source addresses
//! - **Transparent Redial**: A broken stream is replaced by a freshly
//!   dialed one while the packet connection stays open
//! - **Traffic Splitting**: Outgoing packets can be spread over several
//!   streams at once, in round-robin or random order
//! - **Best Effort**: Queues are bounded and never block the sender; when a
//!   queue is full the packet is dropped, as a datagram would be
//!
//! ## How It Works
//!
//! A client chooses one [`SessionId`] and builds a [`PacketConn`] from one
//! or more [`Dialer`]s. With a single dialer it gets a [`RedialPacketConn`];
//! with several it gets a [`RoundRobinPacketConn`] that fans packets out
//! over all of them and merges whatever comes back.
//!
//! On the server a [`SessionListener`] accepts streams, reads the session
//! identifier from each one and feeds every session into one shared
//! [`QueuePacketConn`], where packets are tagged with
//! [`PeerAddr::Session`]. Writing to that address sends the packet back
//! over one of the session's streams.
//!
//! ## Basic Usage
//!
//! ### Server Side
//!
//! ```rust,no_run
//! use splitpt::{AdapterConfig, PacketConn, SessionListener};
//!
//! let listener = SessionListener::bind("127.0.0.1:8080", &AdapterConfig::default())?;
//! let conn = listener.packet_conn();
//! std::thread::spawn(move || listener.serve());
//!
//! let mut buf = vec![0u8; 65535];
//! loop {
//!     let (n, from) = conn.recv_from(&mut buf)?;
//!     println!("{n} bytes from {from}");
//!     conn.send_to(&buf[..n], &from)?;
//! }
//! # Ok::<(), splitpt::Error>(())
//! ```
//!
//! ### Client Side
//!
//! ```rust,no_run
//! use splitpt::{AdapterConfig, Dialer, PacketConn, SessionId, TcpDialer};
//!
//! // Three streams to the same server, all carrying one session
//! let dialers = (0..3)
//!     .map(|_| TcpDialer::resolve("127.0.0.1:8080").map(|d| Box::new(d) as Box<dyn Dialer>))
//!     .collect::<std::io::Result<Vec<_>>>()?;
//! let conn = splitpt::dial_packet_conn(&AdapterConfig::default(), SessionId::new(), dialers)?;
//!
//! conn.send_to(b"hello", &conn.local_addr())?;
//! let mut buf = [0u8; 1500];
//! let (n, _) = conn.recv_from(&mut buf)?;
//! println!("Response: {}", String::from_utf8_lossy(&buf[..n]));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration
//!
//! [`AdapterConfig`] holds the queue capacity, the delay between redials,
//! how long the server remembers an idle session and how outgoing packets
//! are split across streams.
//!
//! ## Delivery Guarantees
//!
//! - Packets sent on one stream arrive in order
//! - Packets sent on different streams may arrive in any relative order
//! - Packets may be lost when a queue is full or a stream breaks
//! - Deadlines are not supported; the deadline setters always fail

#![warn(missing_docs)]

mod config;
mod conn;
mod error;
mod exchange;
pub mod framing;
mod listener;
mod queue;
mod queue_conn;
mod redial;
mod remote_map;
mod round_robin;
mod session;
mod stream;

pub use config::{AdapterConfig, SplitAlgorithm, dial_packet_conn};
pub use conn::PacketConn;
pub use error::{Error, Result};
pub use listener::SessionListener;
pub use queue::{PacketQueue, QUEUE_SIZE};
pub use queue_conn::QueuePacketConn;
pub use redial::RedialPacketConn;
pub use remote_map::RemoteTable;
pub use round_robin::RoundRobinPacketConn;
pub use session::{PeerAddr, SESSION_ID_LEN, SessionId};
pub use stream::{Dialer, Preconnected, Stream, TcpDialer};
