// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Framed control protocol shared by the SDR-IQ and NetSDR families.
//!
//! Every message starts with a two-byte header:
//! `length = byte0 | (byte1 & 0x1f) << 8`, `type = byte1 >> 5`.
//! A header of type 4 with length 0 introduces an 8192-byte bulk sample
//! block; anything else is a control message of `length` bytes total.

use std::time::Duration;

use rx_core::{Freq, SessionGate, SlotProducer};
use tracing::trace;

use crate::device::{fill_slot, Cycle};
use crate::error::TransportError;
use crate::state::DeviceState;
use crate::transport::ByteStream;

pub const HEADER_LEN: usize = 2;
pub const BULK_PAYLOAD_LEN: usize = 8192;
pub const MAX_CONTROL_FRAME_LEN: usize = 128;
pub const MAX_COMMAND_LEN: usize = 16;
const MAX_COMMAND_PARAMS: usize = MAX_COMMAND_LEN - HEADER_LEN - 2;

/// Message type field values.
pub mod msg {
    /// Host to device: set an item. Device to host: response.
    pub const SET: u8 = 0;
    pub const RESPONSE: u8 = 0;
    /// Host to device: request an item. Device to host: unsolicited update.
    pub const REQUEST: u8 = 1;
    pub const UNSOLICITED: u8 = 1;
    pub const RANGE: u8 = 2;
    pub const DATA_ACK: u8 = 3;
    pub const DATA_ITEM0: u8 = 4;
}

/// Control item codes.
pub mod item {
    pub const TARGET_NAME: u16 = 0x0001;
    pub const SERIAL_NUMBER: u16 = 0x0002;
    pub const INTERFACE_VERSION: u16 = 0x0003;
    pub const FIRMWARE_VERSION: u16 = 0x0004;
    pub const STATUS: u16 = 0x0005;
    pub const RECEIVER_STATE: u16 = 0x0018;
    pub const FREQUENCY: u16 = 0x0020;
    pub const RF_GAIN: u16 = 0x0038;
    pub const IF_GAIN: u16 = 0x0040;
    pub const SAMPLE_RATE: u16 = 0x00B8;
}

/// Receiver-state run/stop parameter.
pub const RECEIVER_IDLE: u8 = 0x01;
pub const RECEIVER_RUN: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u8,
    pub length: u16,
}

impl FrameHeader {
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Self {
        Self {
            kind: bytes[1] >> 5,
            length: u16::from(bytes[0]) | (u16::from(bytes[1] & 0x1f) << 8),
        }
    }

    pub fn encode(self) -> [u8; HEADER_LEN] {
        [
            (self.length & 0xff) as u8,
            (self.kind << 5) | ((self.length >> 8) as u8 & 0x1f),
        ]
    }

    pub fn is_bulk(self) -> bool {
        self.kind == msg::DATA_ITEM0 && self.length == 0
    }

    pub fn is_valid(self) -> bool {
        self.is_bulk() || (HEADER_LEN..=MAX_CONTROL_FRAME_LEN).contains(&usize::from(self.length))
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Encoded control command in a fixed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    item: u16,
    buf: [u8; MAX_COMMAND_LEN],
    len: usize,
}

impl Command {
    /// Encode `[header, item_lo, item_hi, params...]`. Parameters beyond the
    /// fixed buffer are dropped.
    pub fn new(kind: u8, item_code: u16, params: &[u8]) -> Self {
        debug_assert!(params.len() <= MAX_COMMAND_PARAMS);
        let params = &params[..params.len().min(MAX_COMMAND_PARAMS)];
        let len = HEADER_LEN + 2 + params.len();
        let mut buf = [0u8; MAX_COMMAND_LEN];
        let header = FrameHeader {
            kind,
            length: len as u16,
        };
        buf[..HEADER_LEN].copy_from_slice(&header.encode());
        buf[2..4].copy_from_slice(&item_code.to_le_bytes());
        buf[4..len].copy_from_slice(params);
        Self {
            item: item_code,
            buf,
            len,
        }
    }

    pub fn request(item_code: u16) -> Self {
        Self::new(msg::REQUEST, item_code, &[])
    }

    pub fn request_with(item_code: u16, params: &[u8]) -> Self {
        Self::new(msg::REQUEST, item_code, params)
    }

    pub fn set_frequency(channel: u8, freq: Freq) -> Self {
        let hz = freq.to_le_40();
        Self::new(
            msg::SET,
            item::FREQUENCY,
            &[channel, hz[0], hz[1], hz[2], hz[3], hz[4]],
        )
    }

    pub fn set_rf_gain(channel: u8, db: i8) -> Self {
        Self::new(msg::SET, item::RF_GAIN, &[channel, db as u8])
    }

    pub fn set_if_gain(channel: u8, db: i8) -> Self {
        Self::new(msg::SET, item::IF_GAIN, &[channel, db as u8])
    }

    pub fn set_sample_rate(channel: u8, hz: u32) -> Self {
        let b = hz.to_le_bytes();
        Self::new(msg::SET, item::SAMPLE_RATE, &[channel, b[0], b[1], b[2], b[3]])
    }

    /// Receiver start/stop. `data_type` selects the stream flavour and is
    /// device specific.
    pub fn receiver_state(data_type: u8, run: bool) -> Self {
        let state = if run { RECEIVER_RUN } else { RECEIVER_IDLE };
        Self::new(msg::SET, item::RECEIVER_STATE, &[data_type, state, 0, 0])
    }

    pub fn item(&self) -> u16 {
        self.item
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

// ---------------------------------------------------------------------------
// Frame reader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Looking for a plausible header.
    SyncSeek,
    /// Header accepted; the body has not been consumed yet.
    HeaderOk(FrameHeader),
}

/// Resynchronizing reader for the framed stream.
///
/// One call to [`step`](FrameReader::step) does at most one unit of work:
/// discard one byte, or consume one complete frame.
pub struct FrameReader {
    state: ReaderState,
    window: [u8; HEADER_LEN],
    window_len: usize,
    payload: [u8; MAX_CONTROL_FRAME_LEN],
    scratch: Vec<u8>,
    discarded_bytes: u64,
    acquire_timeout: Duration,
}

impl FrameReader {
    /// `acquire_timeout` bounds the wait for a free ring slot so the caller
    /// can observe a stop request.
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            state: ReaderState::SyncSeek,
            window: [0; HEADER_LEN],
            window_len: 0,
            payload: [0; MAX_CONTROL_FRAME_LEN],
            scratch: vec![0u8; BULK_PAYLOAD_LEN],
            discarded_bytes: 0,
            acquire_timeout,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Bytes dropped while hunting for a header.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    pub fn reset(&mut self) {
        self.state = ReaderState::SyncSeek;
        self.window_len = 0;
    }

    /// Advance by one unit. Any transport error drops back to `SyncSeek`.
    ///
    /// Bulk blocks go to `ring` when given and the gate is running;
    /// otherwise they are read and discarded to keep the framing.
    pub fn step(
        &mut self,
        stream: &mut dyn ByteStream,
        ring: Option<&SlotProducer<Vec<u8>>>,
        gate: &SessionGate,
        device: &DeviceState,
    ) -> Result<Cycle, TransportError> {
        let result = self.advance(stream, ring, gate, device);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn advance(
        &mut self,
        stream: &mut dyn ByteStream,
        ring: Option<&SlotProducer<Vec<u8>>>,
        gate: &SessionGate,
        device: &DeviceState,
    ) -> Result<Cycle, TransportError> {
        let header = match self.state {
            ReaderState::HeaderOk(header) => header,
            ReaderState::SyncSeek => {
                while self.window_len < HEADER_LEN {
                    let n = stream.read(&mut self.window[self.window_len..])?;
                    if n == 0 {
                        return Ok(Cycle::Idle);
                    }
                    self.window_len += n;
                }
                let header = FrameHeader::decode(self.window);
                if !header.is_valid() {
                    trace!(
                        "discarding byte {:#04x} (type {} length {})",
                        self.window[0],
                        header.kind,
                        header.length
                    );
                    self.window[0] = self.window[1];
                    self.window_len = 1;
                    self.discarded_bytes += 1;
                    return Ok(Cycle::Resync);
                }
                self.window_len = 0;
                self.state = ReaderState::HeaderOk(header);
                header
            }
        };

        if header.is_bulk() {
            let cycle = self.read_bulk(stream, ring, gate)?;
            if cycle != Cycle::AwaitingSlot {
                self.state = ReaderState::SyncSeek;
            }
            return Ok(cycle);
        }

        let len = usize::from(header.length) - HEADER_LEN;
        stream.read_exact(&mut self.payload[..len])?;
        self.state = ReaderState::SyncSeek;

        if len < 2 {
            return Ok(Cycle::Control {
                kind: header.kind,
                item: 0,
            });
        }
        let item_code = u16::from_le_bytes([self.payload[0], self.payload[1]]);
        device.apply_reply(header.kind, item_code, &self.payload[2..len]);
        Ok(Cycle::Control {
            kind: header.kind,
            item: item_code,
        })
    }

    fn read_bulk(
        &mut self,
        stream: &mut dyn ByteStream,
        ring: Option<&SlotProducer<Vec<u8>>>,
        gate: &SessionGate,
    ) -> Result<Cycle, TransportError> {
        match ring {
            Some(ring) => fill_slot(
                ring,
                gate,
                &mut self.scratch,
                self.acquire_timeout,
                |buf| stream.read_exact(&mut buf[..BULK_PAYLOAD_LEN]),
            ),
            None => {
                stream.read_exact(&mut self.scratch)?;
                gate.note_discarded();
                Ok(Cycle::Discarded)
            }
        }
    }
}
