//! Bounded best-effort packet queues and the one-shot close latch shared by
//! every packet connection.

use std::sync::OnceLock;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Default number of packets a queue holds before it starts dropping.
pub const QUEUE_SIZE: usize = 32;

/// A bounded FIFO that drops the newest item when full.
///
/// The queue owns both channel ends, so it never disconnects; any number of
/// threads may push and pop concurrently.
#[derive(Debug)]
pub struct PacketQueue<T = Vec<u8>> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> PacketQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> PacketQueue<T> {
        let (tx, rx) = bounded(capacity);
        PacketQueue { tx, rx, capacity }
    }

    /// Enqueues without blocking. Returns false when the item was dropped
    /// because the queue is full.
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Dequeues without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Receiving end, for use in `select!` by the drain loops.
    pub fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until an item is available or `closed` trips.
    pub(crate) fn pop_or_closed(&self, closed: &CloseLatch) -> Result<T> {
        if let Some(err) = closed.error() {
            return Err(err);
        }
        select! {
            recv(self.rx) -> item => item.map_err(|_| closed.terminal_error()),
            recv(closed.signal()) -> _ => Err(closed.terminal_error()),
        }
    }
}

/// One-shot closed state plus the terminal error.
///
/// The error cell is set exactly once; whichever caller wins the set is the
/// one that performs the transition. Waiters observe the transition through
/// [`signal`](CloseLatch::signal), a channel that is never sent on and
/// disconnects when the latch trips.
#[derive(Debug)]
pub(crate) struct CloseLatch {
    err: OnceLock<Error>,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CloseLatch {
    pub(crate) fn new() -> CloseLatch {
        let (tx, rx) = bounded(0);
        CloseLatch {
            err: OnceLock::new(),
            trigger: Mutex::new(Some(tx)),
            signal: rx,
        }
    }

    /// Trips the latch, storing `err` (or [`Error::Closed`]) for all future
    /// operations. Only the first call succeeds.
    pub(crate) fn close_with(&self, err: Option<Error>) -> Result<()> {
        if self.err.set(err.unwrap_or(Error::Closed)).is_err() {
            return Err(Error::AlreadyClosed);
        }
        drop(self.trigger.lock().take());
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.err.get().is_some()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.err.get().cloned()
    }

    pub(crate) fn terminal_error(&self) -> Error {
        self.error().unwrap_or(Error::Closed)
    }

    /// Becomes ready (disconnected) once the latch has tripped.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}
