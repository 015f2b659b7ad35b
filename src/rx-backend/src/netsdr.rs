// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! RFSPACE NetSDR: framed control over TCP, I/Q over UDP datagrams.

use std::sync::Arc;
use std::time::Duration;

use rx_core::{Freq, FreqRange, SampleFormat, SessionGate, SlotProducer};
use tracing::{debug, info, warn};

use crate::device::{
    await_identity, fill_slot, nearest_rate, send_command, BlockProducer, Cycle, DeviceAccess,
    DeviceInfo, DeviceOptions, SdrDevice,
};
use crate::error::{DeviceError, TransportError};
use crate::protocol::{
    item, msg, Command, FrameReader, BULK_PAYLOAD_LEN, RECEIVER_IDLE, RECEIVER_RUN,
};
use crate::sdriq::snap_gain;
use crate::state::DeviceState;
use crate::transport::udp::UdpReceiver;
use crate::transport::{tcp, ByteStream, CommandWriter, DatagramSource};

pub const NETSDR_SAMPLE_RATES: [u32; 7] = [
    32_000, 62_500, 200_000, 250_000, 500_000, 1_250_000, 2_000_000,
];
pub const NETSDR_DEFAULT_RATE: u32 = 250_000;
pub const NETSDR_FREQ_RANGE: FreqRange = FreqRange::new(10_000, 34_000_000);
pub const NETSDR_RF_GAINS: [i32; 4] = [0, -10, -20, -30];
pub const NETSDR_DEFAULT_DATA_PORT: u16 = 50_000;

/// `[0x04, 0x84]`: 1028-byte data item 0 with 16-bit I/Q.
const DATAGRAM_HEADER: [u8; 2] = [0x04, 0x84];
const DATAGRAM_PAYLOAD: usize = 1024;
const DATAGRAM_LEN: usize = 4 + DATAGRAM_PAYLOAD;
const DATAGRAMS_PER_SLOT: usize = BULK_PAYLOAD_LEN / DATAGRAM_PAYLOAD;

const DATA_TYPE_COMPLEX: u8 = 0x80;
const CAPTURE_CONTIGUOUS: u8 = 0x00;
const CHANNEL: u8 = 0;

pub struct NetSdr {
    access: DeviceAccess,
    options: DeviceOptions,
    state: Arc<DeviceState>,
    writer: Option<Box<dyn CommandWriter>>,
    sample_rate: u32,
}

impl NetSdr {
    pub fn new(access: DeviceAccess, options: DeviceOptions) -> Result<Self, DeviceError> {
        if !matches!(
            access,
            DeviceAccess::Tcp { .. } | DeviceAccess::TcpUdp { .. }
        ) {
            return Err(DeviceError::Unsupported(format!(
                "NetSDR needs TCP access, got {:?}",
                access
            )));
        }
        let sample_rate = match options.sample_rate_hz {
            Some(hz) => nearest_rate(&NETSDR_SAMPLE_RATES, hz).unwrap_or(NETSDR_DEFAULT_RATE),
            None => NETSDR_DEFAULT_RATE,
        };
        Ok(Self {
            access,
            options,
            state: Arc::new(DeviceState::new()),
            writer: None,
            sample_rate,
        })
    }

    /// Identify the device over already open control and data transports.
    pub fn connect_with(
        &mut self,
        mut stream: Box<dyn ByteStream>,
        writer: Box<dyn CommandWriter>,
        datagrams: Box<dyn DatagramSource>,
    ) -> Result<Box<dyn BlockProducer>, DeviceError> {
        for cmd in [
            Command::request(item::TARGET_NAME),
            Command::request(item::SERIAL_NUMBER),
            Command::request(item::INTERFACE_VERSION),
            Command::request_with(item::FIRMWARE_VERSION, &[1]),
            Command::request_with(item::FIRMWARE_VERSION, &[0]),
            Command::request(item::STATUS),
        ] {
            send_command(writer.as_ref(), &cmd)?;
        }

        let mut frames = FrameReader::new(self.options.io_timeout);
        let deadline = self.options.io_timeout * 4;
        await_identity(stream.as_mut(), &mut frames, &self.state, deadline)?;
        info!(
            "connected to {} (serial {})",
            self.state.name().unwrap_or_default(),
            self.state.serial().unwrap_or_else(|| "?".into())
        );

        self.writer = Some(writer);
        let rate = self.sample_rate;
        self.set_sample_rate(rate)?;
        if let Some(gain) = self.options.gain_db {
            self.set_gain(gain)?;
        }

        Ok(Box::new(NetSdrProducer {
            stream,
            datagrams,
            frames,
            state: Arc::clone(&self.state),
            datagram: [0u8; DATAGRAM_LEN],
            scratch: vec![0u8; BULK_PAYLOAD_LEN],
            expected_seq: None,
            wait: self.options.io_timeout,
        }))
    }

    fn writer(&self) -> Result<&dyn CommandWriter, DeviceError> {
        self.writer.as_deref().ok_or(DeviceError::NotConnected)
    }
}

impl SdrDevice for NetSdr {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            model: "NetSDR",
            sample_format: SampleFormat::I16Le,
            block_frames: BULK_PAYLOAD_LEN / 4,
            freq_range: NETSDR_FREQ_RANGE,
            sample_rates: NETSDR_SAMPLE_RATES.to_vec(),
        }
    }

    fn state(&self) -> Arc<DeviceState> {
        Arc::clone(&self.state)
    }

    fn connect(&mut self) -> Result<Box<dyn BlockProducer>, DeviceError> {
        let (addr, data_port) = match &self.access {
            DeviceAccess::Tcp { addr } => (addr.clone(), NETSDR_DEFAULT_DATA_PORT),
            DeviceAccess::TcpUdp { addr, data_port } => (addr.clone(), *data_port),
            other => return Err(DeviceError::Unsupported(format!("{:?}", other))),
        };
        let (reader, writer) = tcp::connect(&addr, self.options.io_timeout)?;
        let datagrams =
            UdpReceiver::bind(&format!("0.0.0.0:{}", data_port), self.options.io_timeout)?;
        self.connect_with(Box::new(reader), Box::new(writer), Box::new(datagrams))
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        if self.writer.take().is_some() {
            debug!("NetSDR disconnected");
        }
        self.state.set_running(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn start_stream(&mut self) -> Result<(), DeviceError> {
        let cmd = Command::new(
            msg::SET,
            item::RECEIVER_STATE,
            &[DATA_TYPE_COMPLEX, RECEIVER_RUN, CAPTURE_CONTIGUOUS, 0],
        );
        send_command(self.writer()?, &cmd)
    }

    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        let cmd = Command::new(
            msg::SET,
            item::RECEIVER_STATE,
            &[0x00, RECEIVER_IDLE, CAPTURE_CONTIGUOUS, 0],
        );
        send_command(self.writer()?, &cmd)
    }

    fn set_frequency(&mut self, freq: Freq) -> Result<Freq, DeviceError> {
        let applied = NETSDR_FREQ_RANGE.clamp(freq);
        send_command(self.writer()?, &Command::set_frequency(CHANNEL, applied))?;
        Ok(applied)
    }

    fn set_gain(&mut self, gain_db: i32) -> Result<i32, DeviceError> {
        let applied = snap_gain(&NETSDR_RF_GAINS, gain_db);
        send_command(self.writer()?, &Command::set_rf_gain(CHANNEL, applied as i8))?;
        Ok(applied)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<u32, DeviceError> {
        let applied = nearest_rate(&NETSDR_SAMPLE_RATES, hz)
            .ok_or_else(|| DeviceError::InvalidParameter(format!("rate {} Hz", hz)))?;
        send_command(self.writer()?, &Command::set_sample_rate(CHANNEL, applied))?;
        self.sample_rate = applied;
        self.state.set_sample_rate_hz(applied);
        Ok(applied)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Datagrams missing between `expected` and `seq`.
///
/// Sequence numbers run 1..=65535 and wrap to 1; 0 marks a fresh stream.
fn sequence_gap(expected: u16, seq: u16) -> u64 {
    if seq >= expected {
        u64::from(seq - expected)
    } else {
        u64::from(seq) + 65_535 - u64::from(expected)
    }
}

fn next_sequence(seq: u16) -> u16 {
    if seq == u16::MAX {
        1
    } else {
        seq + 1
    }
}

struct NetSdrProducer {
    stream: Box<dyn ByteStream>,
    datagrams: Box<dyn DatagramSource>,
    frames: FrameReader,
    state: Arc<DeviceState>,
    datagram: [u8; DATAGRAM_LEN],
    scratch: Vec<u8>,
    expected_seq: Option<u16>,
    wait: Duration,
}

impl BlockProducer for NetSdrProducer {
    fn produce_cycle(
        &mut self,
        ring: &SlotProducer<Vec<u8>>,
        gate: &SessionGate,
    ) -> Result<Cycle, TransportError> {
        // Control replies share nothing with the data path; only touch the
        // TCP side when something is waiting.
        if self.stream.bytes_pending()? > 0 {
            let cycle = self
                .frames
                .step(self.stream.as_mut(), None, gate, &self.state)?;
            if matches!(cycle, Cycle::Control { .. }) {
                return Ok(cycle);
            }
        }

        let datagrams = &mut self.datagrams;
        let datagram = &mut self.datagram;
        let expected_seq = &mut self.expected_seq;
        fill_slot(ring, gate, &mut self.scratch, self.wait, |buf| {
            for (index, chunk) in buf.chunks_exact_mut(DATAGRAM_PAYLOAD).enumerate() {
                loop {
                    let n = datagrams.recv(&mut datagram[..])?;
                    if n == 0 {
                        return Err(if index == 0 {
                            TransportError::Timeout
                        } else {
                            TransportError::ShortRead {
                                expected: DATAGRAMS_PER_SLOT * DATAGRAM_PAYLOAD,
                                got: index * DATAGRAM_PAYLOAD,
                            }
                        });
                    }
                    if n != DATAGRAM_LEN || datagram[..2] != DATAGRAM_HEADER {
                        debug!("ignoring {}-byte datagram", n);
                        continue;
                    }
                    let seq = u16::from_le_bytes([datagram[2], datagram[3]]);
                    match *expected_seq {
                        Some(expected) if seq != 0 && seq != expected => {
                            let lost = sequence_gap(expected, seq);
                            warn!("lost {} datagram(s) before sequence {}", lost, seq);
                            gate.note_dropped_packets(lost);
                        }
                        _ => {}
                    }
                    *expected_seq = Some(next_sequence(seq));
                    chunk.copy_from_slice(&datagram[4..]);
                    break;
                }
            }
            Ok(())
        })
    }
}
