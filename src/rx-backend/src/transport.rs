// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Byte transports underneath the device protocols.
//!
//! A device session owns one read half (used only by the producer thread)
//! and shares one write half with whoever issues commands.

pub mod mock;
pub mod tcp;
pub mod udp;
#[cfg(feature = "usb")]
pub mod usb;

use crate::error::TransportError;

/// Read half of a stream transport.
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes, waiting at most the transport's read
    /// timeout. `Ok(0)` means the timeout expired with nothing to read; a
    /// closed peer is reported as [`TransportError::Disconnected`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Bytes readable right now without waiting on the device.
    fn bytes_pending(&mut self) -> Result<usize, TransportError>;

    /// Fill `buf` completely.
    ///
    /// Idle before the first byte is [`TransportError::Timeout`]; a timeout
    /// part way through is [`TransportError::ShortRead`]. Bytes read before
    /// a failure are lost.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut got = 0;
        while got < buf.len() {
            let n = self.read(&mut buf[got..])?;
            if n == 0 {
                return Err(if got == 0 {
                    TransportError::Timeout
                } else {
                    TransportError::ShortRead {
                        expected: buf.len(),
                        got,
                    }
                });
            }
            got += n;
        }
        Ok(())
    }
}

/// Write half of a transport. Shared between the command thread and the
/// session, hence `&self`.
pub trait CommandWriter: Send + Sync {
    /// Write `buf`, returning how many bytes the transport accepted.
    fn write(&self, buf: &[u8]) -> Result<usize, TransportError>;
}

/// Datagram source for devices that stream samples over UDP.
pub trait DatagramSource: Send {
    /// Receive one datagram into `buf`. `Ok(0)` on timeout.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}
