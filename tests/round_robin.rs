//! Round-robin packet connection over sets of loopback streams.

mod common;

use std::collections::HashSet;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use splitpt::framing::{self, FrameError};
use splitpt::{
    AdapterConfig, Dialer, Error, PacketConn, RoundRobinPacketConn, SessionId, SplitAlgorithm,
    Stream, TcpDialer,
};

use common::{WAIT, read_session_id, tcp_pair, within};

fn open(n: usize, config: &AdapterConfig) -> (SessionId, RoundRobinPacketConn, Vec<TcpStream>) {
    let id = SessionId::new();
    let (clients, servers): (Vec<_>, Vec<_>) = (0..n).map(|_| tcp_pair()).unzip();
    let streams = clients
        .into_iter()
        .map(|c| Box::new(c) as Box<dyn Stream>)
        .collect();
    let conn = RoundRobinPacketConn::from_streams(id, streams, config).unwrap();
    (id, conn, servers)
}

#[test]
fn packets_fan_out_in_cyclic_order() {
    let (id, conn, mut servers) = open(3, &AdapterConfig::default());
    for server in &mut servers {
        assert_eq!(read_session_id(server), id);
    }

    for k in 0..9u8 {
        conn.send_to(&[k], &conn.local_addr()).unwrap();
    }
    for (j, server) in servers.iter_mut().enumerate() {
        let got: Vec<u8> = (0..3).map(|_| framing::decode(server).unwrap()[0]).collect();
        let j = j as u8;
        assert_eq!(got, [j, j + 3, j + 6]);
    }
}

#[test]
fn packets_from_every_stream_are_merged() {
    let (_, conn, mut servers) = open(3, &AdapterConfig::default());
    for (j, server) in servers.iter_mut().enumerate() {
        read_session_id(server);
        framing::write_packet(server, format!("from {j}").as_bytes()).unwrap();
    }

    let conn = Arc::new(conn);
    let reader = Arc::clone(&conn);
    let (got, sources) = within(move || {
        let mut buf = [0u8; 64];
        let mut got = HashSet::new();
        let mut sources = HashSet::new();
        for _ in 0..3 {
            let (n, from) = reader.recv_from(&mut buf).unwrap();
            got.insert(String::from_utf8_lossy(&buf[..n]).into_owned());
            sources.insert(from);
        }
        (got, sources)
    });
    let want: HashSet<_> = (0..3).map(|j| format!("from {j}")).collect();
    assert_eq!(got, want);
    assert_eq!(sources.len(), 1);
    assert_eq!(conn.remote_addr().as_ref(), sources.iter().next());
    assert_eq!(conn.remote_addrs().len(), 3);
}

#[test]
fn random_split_delivers_every_packet_once() {
    let config = AdapterConfig::default().with_split(SplitAlgorithm::Random);
    let (_, conn, servers) = open(4, &config);

    let (tx, rx) = unbounded();
    for mut server in servers {
        let tx = tx.clone();
        thread::spawn(move || {
            read_session_id(&mut server);
            while let Ok(packet) = framing::decode(&mut server) {
                let _ = tx.send(packet[0]);
            }
        });
    }

    for k in 0..30u8 {
        conn.send_to(&[k], &conn.local_addr()).unwrap();
        // Stay well below the queue capacity.
        if k % 10 == 9 {
            thread::sleep(Duration::from_millis(20));
        }
    }
    let got: HashSet<u8> = (0..30).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(got, (0..30).collect());
}

#[test]
fn one_broken_stream_takes_down_the_set() {
    let config = AdapterConfig::default().with_redial_delay(Duration::from_millis(10));
    let (_, conn, mut servers) = open(3, &config);
    for server in &mut servers {
        read_session_id(server);
    }

    drop(servers.remove(1));
    for server in &mut servers {
        assert!(matches!(framing::decode(server), Err(FrameError::Eof)));
    }

    // The handed-in streams cannot be dialed again.
    let conn = Arc::new(conn);
    let reader = Arc::clone(&conn);
    assert!(matches!(within(move || reader.recv_packet()), Err(Error::Dial { .. })));
    assert!(conn.is_closed());
}

#[test]
fn broken_stream_redials_the_whole_set() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let dialers = (0..3)
        .map(|_| Box::new(TcpDialer::new(addr)) as Box<dyn Dialer>)
        .collect();
    let config = AdapterConfig::default().with_redial_delay(Duration::from_millis(10));
    let id = SessionId::new();
    let conn = RoundRobinPacketConn::with_config(id, dialers, &config).unwrap();

    let accept = |listener: &TcpListener| {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();
        assert_eq!(read_session_id(&mut stream), id);
        stream
    };
    let mut first: Vec<_> = (0..3).map(|_| accept(&listener)).collect();
    drop(first.remove(0));
    for stream in &mut first {
        assert!(matches!(framing::decode(stream), Err(FrameError::Eof)));
    }

    // Streams are dialed in order, so the i-th accepted one is stream i.
    let mut second: Vec<_> = (0..3).map(|_| accept(&listener)).collect();
    for k in 0..3u8 {
        conn.send_to(&[k], &conn.local_addr()).unwrap();
    }
    for (k, stream) in second.iter_mut().enumerate() {
        assert_eq!(framing::decode(stream).unwrap(), [k as u8]);
    }
    assert!(!conn.is_closed());
}

#[test]
fn session_id_write_failure_terminates() {
    let (good, _good_server) = tcp_pair();
    let (bad, _bad_server) = tcp_pair();
    bad.shutdown(Shutdown::Write).unwrap();

    let streams: Vec<Box<dyn Stream>> = vec![Box::new(good), Box::new(bad)];
    let config = AdapterConfig::default();
    let conn = RoundRobinPacketConn::from_streams(SessionId::new(), streams, &config).unwrap();
    let conn = Arc::new(conn);
    let reader = Arc::clone(&conn);
    assert!(matches!(within(move || reader.recv_packet()), Err(Error::Setup(_))));
}

#[test]
fn close_unblocks_reader_and_is_idempotent() {
    let (_, conn, _servers) = open(2, &AdapterConfig::default());
    let conn = Arc::new(conn);

    let reader = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || conn.recv_packet())
    };
    thread::sleep(Duration::from_millis(50));
    conn.close().unwrap();

    assert!(matches!(within(move || reader.join().unwrap()), Err(Error::Closed)));
    assert!(matches!(conn.close(), Err(Error::AlreadyClosed)));
    assert!(matches!(conn.send_to(b"x", &conn.local_addr()), Err(Error::Closed)));
}
