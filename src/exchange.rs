//! Pieces shared by the exchange cycles of the stream-backed connections.

use std::io::{BufReader, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, select};

use crate::framing::{self, FrameError};
use crate::queue::{CloseLatch, PacketQueue};
use crate::stream::Stream;

/// Decodes frames from `stream` and hands each packet to `deliver` until
/// the stream ends, fails, or `closed` trips.
pub(crate) fn pump_inbound<F>(
    stream: Box<dyn Stream>,
    closed: &CloseLatch,
    label: &str,
    mut deliver: F,
) where
    F: FnMut(Vec<u8>),
{
    let mut reader = BufReader::new(stream);
    loop {
        match framing::decode(&mut reader) {
            Ok(packet) => {
                if closed.is_closed() {
                    return;
                }
                deliver(packet);
            }
            Err(FrameError::Eof) => {
                log::debug!("{label}: stream closed by peer");
                return;
            }
            Err(e) => {
                log::debug!("{label}: read ended: {e}");
                return;
            }
        }
    }
}

/// Pushes into `queue`, logging when the packet is dropped.
pub(crate) fn deliver_to<'a>(queue: &'a PacketQueue, label: &str) -> impl FnMut(Vec<u8>) + 'a {
    let label = label.to_string();
    move |packet| {
        if !queue.push(packet) {
            log::debug!("{label}: incoming queue full, dropping packet");
        }
    }
}

/// Waits for the next outgoing packet. Returns `None` once the connection
/// closes or the cycle is stopped.
pub(crate) fn next_outbound(
    queue: &PacketQueue,
    closed: &CloseLatch,
    stop: &Receiver<()>,
) -> Option<Vec<u8>> {
    select! {
        recv(queue.receiver()) -> packet => packet.ok(),
        recv(closed.signal()) -> _ => None,
        recv(stop) -> _ => None,
    }
}

/// Frames and flushes `packet` onto `writer`. Oversized packets are
/// skipped; returns false when the stream failed.
pub(crate) fn send_frame<W: Write + ?Sized>(writer: &mut W, packet: &[u8], label: &str) -> bool {
    match framing::write_packet(writer, packet) {
        Ok(()) => true,
        Err(e @ FrameError::TooLarge { .. }) => {
            log::warn!("{label}: dropping outgoing packet: {e}");
            true
        }
        Err(e) => {
            log::debug!("{label}: write ended: {e}");
            false
        }
    }
}

/// Sleeps for `delay` before the next dial. Returns false if the connection
/// was closed in the meantime.
pub(crate) fn wait_redial(closed: &CloseLatch, delay: Duration) -> bool {
    if closed.is_closed() {
        return false;
    }
    select! {
        recv(closed.signal()) -> _ => false,
        default(delay) => !closed.is_closed(),
    }
}
