// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::{ByteStream, CommandWriter};
use crate::error::TransportError;

/// Read timeout used while probing for pending bytes.
const PENDING_PROBE_TIMEOUT: Duration = Duration::from_millis(1);
const PROBE_LEN: usize = 512;

/// Connect to `addr` and split the stream into read and write halves.
pub fn connect(addr: &str, timeout: Duration) -> Result<(TcpReader, TcpWriter), TransportError> {
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                let writer = stream.try_clone()?;
                debug!("connected to {}", sock_addr);
                return Ok((
                    TcpReader {
                        stream,
                        timeout,
                        probe: [0u8; PROBE_LEN],
                    },
                    TcpWriter { stream: writer },
                ));
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .map(TransportError::Io)
        .unwrap_or(TransportError::Disconnected))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

pub struct TcpReader {
    stream: TcpStream,
    timeout: Duration,
    probe: [u8; PROBE_LEN],
}

impl ByteStream for TcpReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.read(buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn bytes_pending(&mut self) -> Result<usize, TransportError> {
        // std exposes no FIONREAD; peek with a near-zero timeout instead.
        self.stream.set_read_timeout(Some(PENDING_PROBE_TIMEOUT))?;
        let peeked = self.stream.peek(&mut self.probe);
        self.stream.set_read_timeout(Some(self.timeout))?;
        match peeked {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct TcpWriter {
    stream: TcpStream,
}

impl CommandWriter for TcpWriter {
    fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        match (&self.stream).write(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
