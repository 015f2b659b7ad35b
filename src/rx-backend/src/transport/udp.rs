// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use tracing::debug;

use super::DatagramSource;
use crate::error::TransportError;

/// Bound UDP socket receiving sample datagrams.
pub struct UdpReceiver {
    socket: UdpSocket,
}

impl UdpReceiver {
    pub fn bind(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(timeout))?;
        debug!("listening for sample datagrams on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16, TransportError> {
        Ok(self.socket.local_addr()?.port())
    }
}

impl DatagramSource for UdpReceiver {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}
