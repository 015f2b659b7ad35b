// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! FTDI bulk transport for USB-attached receivers.
//!
//! The FTDI bridge prefixes every 64-byte IN packet with two modem status
//! bytes; they are stripped here so callers see the raw device stream.

use std::sync::Arc;
use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};
use tracing::{debug, warn};

use super::{ByteStream, CommandWriter};
use crate::error::TransportError;

pub const FTDI_VID: u16 = 0x0403;
pub const FTDI_PID: u16 = 0x6001;

const EP_IN: u8 = 0x81;
const EP_OUT: u8 = 0x02;
const PACKET_LEN: usize = 64;
const STATUS_LEN: usize = 2;
const READ_CHUNK: usize = PACKET_LEN * 64;

const FTDI_REQ_OUT: u8 = 0x40;
const SIO_RESET: u8 = 0x00;
const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;
const SIO_SET_LATENCY_TIMER: u8 = 0x09;
const LATENCY_MS: u16 = 2;
const FTDI_INTERFACE_A: u16 = 1;

type Handle = Arc<DeviceHandle<Context>>;

/// Open the `index`-th FTDI device and split it into read and write halves.
pub fn open(index: usize, timeout: Duration) -> Result<(UsbReader, UsbWriter), TransportError> {
    let context = Context::new()?;
    let mut seen = 0usize;
    for device in context.devices()?.iter() {
        let desc = device.device_descriptor()?;
        if desc.vendor_id() != FTDI_VID || desc.product_id() != FTDI_PID {
            continue;
        }
        if seen != index {
            seen += 1;
            continue;
        }

        let handle = device.open()?;
        #[cfg(target_os = "linux")]
        {
            if handle.kernel_driver_active(0).unwrap_or(false) {
                debug!("detaching kernel driver from interface 0");
                if let Err(e) = handle.detach_kernel_driver(0) {
                    warn!("failed to detach kernel driver: {}", e);
                }
            }
        }
        handle.claim_interface(0)?;
        init_ftdi(&handle, timeout)?;
        debug!(
            "opened FTDI device on bus {:03} address {:03}",
            device.bus_number(),
            device.address()
        );

        let handle = Arc::new(handle);
        return Ok((
            UsbReader {
                handle: Arc::clone(&handle),
                timeout,
                packet: vec![0u8; READ_CHUNK],
                staged: Vec::with_capacity(READ_CHUNK),
                staged_pos: 0,
            },
            UsbWriter { handle, timeout },
        ));
    }
    Err(TransportError::Usb(format!(
        "no FTDI device at index {} ({} found)",
        index, seen
    )))
}

fn init_ftdi(handle: &DeviceHandle<Context>, timeout: Duration) -> Result<(), TransportError> {
    let ctrl = |request: u8, value: u16| {
        handle.write_control(FTDI_REQ_OUT, request, value, FTDI_INTERFACE_A, &[], timeout)
    };
    ctrl(SIO_RESET, SIO_RESET_SIO)?;
    ctrl(SIO_RESET, SIO_RESET_PURGE_RX)?;
    ctrl(SIO_RESET, SIO_RESET_PURGE_TX)?;
    ctrl(SIO_SET_LATENCY_TIMER, LATENCY_MS)?;
    Ok(())
}

/// Copy the payload of each 64-byte packet, skipping its status prefix.
fn strip_status(raw: &[u8], out: &mut Vec<u8>) {
    for packet in raw.chunks(PACKET_LEN) {
        if packet.len() > STATUS_LEN {
            out.extend_from_slice(&packet[STATUS_LEN..]);
        }
    }
}

pub struct UsbReader {
    handle: Handle,
    timeout: Duration,
    packet: Vec<u8>,
    staged: Vec<u8>,
    staged_pos: usize,
}

impl UsbReader {
    fn refill(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let n = match self.handle.read_bulk(EP_IN, &mut self.packet, timeout) {
            Ok(n) => n,
            Err(rusb::Error::Timeout) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.staged.clear();
        self.staged_pos = 0;
        strip_status(&self.packet[..n], &mut self.staged);
        Ok(())
    }

    fn staged_len(&self) -> usize {
        self.staged.len() - self.staged_pos
    }
}

impl ByteStream for UsbReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.staged_len() == 0 {
            self.refill(self.timeout)?;
        }
        let n = buf.len().min(self.staged_len());
        buf[..n].copy_from_slice(&self.staged[self.staged_pos..self.staged_pos + n]);
        self.staged_pos += n;
        Ok(n)
    }

    fn bytes_pending(&mut self) -> Result<usize, TransportError> {
        if self.staged_len() == 0 {
            self.refill(Duration::from_millis(1))?;
        }
        Ok(self.staged_len())
    }
}

pub struct UsbWriter {
    handle: Handle,
    timeout: Duration,
}

impl CommandWriter for UsbWriter {
    fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        Ok(self.handle.write_bulk(EP_OUT, buf, self.timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_status_bytes() {
        let mut raw = vec![0u8; PACKET_LEN + 10];
        raw[0] = 0x31;
        raw[1] = 0x60;
        for (i, b) in raw[STATUS_LEN..PACKET_LEN].iter_mut().enumerate() {
            *b = i as u8;
        }
        raw[PACKET_LEN] = 0x31;
        raw[PACKET_LEN + 1] = 0x60;
        raw[PACKET_LEN + 2] = 0xAA;

        let mut out = Vec::new();
        strip_status(&raw, &mut out);
        assert_eq!(out.len(), (PACKET_LEN - STATUS_LEN) + 8);
        assert_eq!(out[0], 0);
        assert_eq!(out[PACKET_LEN - STATUS_LEN], 0xAA);
    }
}
