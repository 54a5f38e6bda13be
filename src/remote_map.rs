//! Per-peer outgoing queues with idle eviction.

use std::io::Result as IoResult;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, select};
use dashmap::DashMap;

use crate::queue::PacketQueue;
use crate::session::PeerAddr;

/// Shortest interval between two idle sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

struct RemoteEntry {
    queue: Arc<PacketQueue>,
    last_seen: Instant,
}

impl RemoteEntry {
    fn new(capacity: usize) -> Self {
        RemoteEntry {
            queue: Arc::new(PacketQueue::new(capacity)),
            last_seen: Instant::now(),
        }
    }

    // Held means someone outside the table is draining this queue.
    fn is_evictable(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_seen) > timeout && Arc::strong_count(&self.queue) == 1
    }
}

/// Maps peer addresses to their outgoing packet queues.
///
/// Queues are created on first use and reclaimed once a peer has been idle
/// for longer than the timeout. Every access refreshes the peer's activity
/// time while holding the entry lock that eviction also needs, and a queue
/// handed out by [`queue_for`](RemoteTable::queue_for) is never evicted
/// while that handle is alive. A packet pushed into the table therefore
/// always lands in the queue a reader is draining.
pub struct RemoteTable {
    entries: DashMap<PeerAddr, RemoteEntry>,
    timeout: Duration,
    capacity: usize,
}

impl RemoteTable {
    /// Creates a table that keeps idle peers for at least `timeout`, with
    /// queues of `capacity` packets.
    pub fn new(timeout: Duration, capacity: usize) -> RemoteTable {
        RemoteTable {
            entries: DashMap::new(),
            timeout,
            capacity,
        }
    }

    /// Returns the queue for `addr`, creating it if necessary. Concurrent
    /// callers for the same address get the same queue.
    pub fn queue_for(&self, addr: &PeerAddr) -> Arc<PacketQueue> {
        let mut entry = self
            .entries
            .entry(addr.clone())
            .or_insert_with(|| RemoteEntry::new(self.capacity));
        entry.last_seen = Instant::now();
        Arc::clone(&entry.queue)
    }

    /// Queues `packet` for `addr`. Returns false if the queue was full and
    /// the packet was dropped.
    pub fn push(&self, addr: &PeerAddr, packet: Vec<u8>) -> bool {
        let mut entry = self
            .entries
            .entry(addr.clone())
            .or_insert_with(|| RemoteEntry::new(self.capacity));
        entry.last_seen = Instant::now();
        entry.queue.push(packet)
    }

    /// Drops the queues of peers that have gone idle. Returns how many were
    /// removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.entries.retain(|addr, entry| {
            if entry.is_evictable(now, self.timeout) {
                log::debug!(
                    "Evicting idle peer {addr} ({} undelivered packets)",
                    entry.queue.len()
                );
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no peer is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The idle timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a thread that evicts idle peers until `stop` disconnects.
    pub(crate) fn spawn_sweeper(self: &Arc<Self>, stop: Receiver<()>) -> IoResult<JoinHandle<()>> {
        let table = Arc::clone(self);
        let interval = (self.timeout / 2).max(MIN_SWEEP_INTERVAL);
        thread::Builder::new()
            .name("splitpt-sweeper".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop) -> _ => break,
                        default(interval) => {
                            let evicted = table.evict_idle();
                            if evicted > 0 {
                                log::debug!("Evicted {evicted} idle peers, {} remain", table.len());
                            }
                        }
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QUEUE_SIZE;
    use crate::session::SessionId;
    use crossbeam_channel::bounded;

    fn addr() -> PeerAddr {
        PeerAddr::Session(SessionId::new())
    }

    #[test]
    fn same_address_same_queue() {
        let table = Arc::new(RemoteTable::new(Duration::from_secs(60), QUEUE_SIZE));
        let a = addr();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (table, a) = (Arc::clone(&table), a.clone());
                thread::spawn(move || table.queue_for(&a))
            })
            .collect();
        let queues: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for q in &queues {
            assert!(Arc::ptr_eq(q, &queues[0]));
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn push_reaches_the_handed_out_queue() {
        let table = RemoteTable::new(Duration::from_secs(60), 2);
        let a = addr();
        let q = table.queue_for(&a);
        assert!(table.push(&a, b"one".to_vec()));
        assert!(table.push(&a, b"two".to_vec()));
        assert!(!table.push(&a, b"three".to_vec()));
        assert_eq!(q.try_pop().unwrap(), b"one");
        assert_eq!(q.try_pop().unwrap(), b"two");
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn idle_unheld_queues_are_evicted() {
        let table = RemoteTable::new(Duration::from_millis(20), QUEUE_SIZE);
        let (idle, active) = (addr(), addr());
        table.push(&idle, b"stale".to_vec());
        table.push(&active, b"x".to_vec());
        thread::sleep(Duration::from_millis(40));
        table.push(&active, b"y".to_vec());

        assert_eq!(table.evict_idle(), 1);
        assert_eq!(table.len(), 1);
        // A later write recreates the queue, empty of the evicted contents.
        assert_eq!(table.queue_for(&idle).len(), 0);
    }

    #[test]
    fn held_queues_survive_eviction() {
        let table = RemoteTable::new(Duration::from_millis(10), QUEUE_SIZE);
        let a = addr();
        let held = table.queue_for(&a);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(table.evict_idle(), 0);

        table.push(&a, b"still delivered".to_vec());
        assert_eq!(held.try_pop().unwrap(), b"still delivered");

        drop(held);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(table.evict_idle(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn sweeper_runs_until_stopped() {
        let table = Arc::new(RemoteTable::new(Duration::from_millis(10), QUEUE_SIZE));
        table.push(&addr(), b"p".to_vec());
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let sweeper = table.spawn_sweeper(stop_rx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !table.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(table.is_empty());

        drop(stop_tx);
        sweeper.join().unwrap();
    }
}
