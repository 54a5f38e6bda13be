//! Length-prefixed packet framing.
//!
//! Each packet travels as a 4 byte little-endian length followed by exactly
//! that many payload bytes. Packets larger than [`MAX_PACKET_SIZE`] are
//! rejected on both sides.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Width of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload a single frame may carry.
pub const MAX_PACKET_SIZE: usize = 65_535;

/// Failure to encode or decode a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The stream ended cleanly between two frames.
    #[error("end of stream")]
    Eof,

    /// The stream ended inside a length prefix or a payload.
    #[error("stream ended mid-frame: expected {expected} bytes, got {got}")]
    Truncated {
        /// Bytes the frame still needed.
        expected: usize,
        /// Bytes that were actually available.
        got: usize,
    },

    /// The length prefix announces a packet larger than [`MAX_PACKET_SIZE`].
    #[error("packet length {len} exceeds maximum {max}")]
    TooLarge {
        /// Announced or attempted length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Writes `packet` as one frame. The caller is responsible for flushing.
pub fn encode<W: Write + ?Sized>(writer: &mut W, packet: &[u8]) -> Result<(), FrameError> {
    if packet.len() > MAX_PACKET_SIZE {
        return Err(FrameError::TooLarge {
            len: packet.len(),
            max: MAX_PACKET_SIZE,
        });
    }
    let len_bs = (packet.len() as u32).to_le_bytes();
    writer.write_all(&len_bs)?;
    writer.write_all(packet)?;
    Ok(())
}

/// Writes `packet` as one frame and flushes the writer.
pub fn write_packet<W: Write + ?Sized>(writer: &mut W, packet: &[u8]) -> Result<(), FrameError> {
    encode(writer, packet)?;
    writer.flush()?;
    Ok(())
}

/// Reads the next frame and returns its payload.
pub fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_bs = [0u8; LENGTH_PREFIX_LEN];
    match read_full(reader, &mut len_bs)? {
        0 => return Err(FrameError::Eof),
        LENGTH_PREFIX_LEN => {}
        got => {
            return Err(FrameError::Truncated {
                expected: LENGTH_PREFIX_LEN,
                got,
            });
        }
    }
    let len = u32::from_le_bytes(len_bs) as usize;
    if len > MAX_PACKET_SIZE {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_PACKET_SIZE,
        });
    }
    let mut packet = vec![0u8; len];
    let got = read_full(reader, &mut packet)?;
    if got < len {
        return Err(FrameError::Truncated { expected: len, got });
    }
    Ok(packet)
}

// Like read_exact, but reports how much was read before EOF.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match reader.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}
