// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! `rtl_tcp` network bridge for RTL2832U dongles.

use std::sync::Arc;
use std::time::Duration;

use rx_core::{Freq, FreqRange, SampleFormat, SessionGate, SlotProducer};
use tracing::{debug, info};

use crate::device::{
    fill_slot, nearest_rate, BlockProducer, Cycle, DeviceAccess, DeviceInfo, DeviceOptions,
    SdrDevice,
};
use crate::error::{DeviceError, TransportError};
use crate::state::DeviceState;
use crate::transport::{tcp, ByteStream, CommandWriter};

pub const RTL_SAMPLE_RATES: [u32; 7] = [
    250_000, 1_024_000, 1_536_000, 1_792_000, 1_920_000, 2_048_000, 2_400_000,
];
pub const RTL_DEFAULT_RATE: u32 = 2_048_000;
pub const RTL_FREQ_RANGE: FreqRange = FreqRange::new(24_000_000, 1_766_000_000);

const GREETING_LEN: usize = 12;
const GREETING_MAGIC: &[u8; 4] = b"RTL0";

const CMD_SET_FREQ: u8 = 0x01;
const CMD_SET_SAMPLE_RATE: u8 = 0x02;
const CMD_SET_GAIN_MODE: u8 = 0x03;
const CMD_SET_GAIN: u8 = 0x04;
const CMD_SET_AGC_MODE: u8 = 0x08;

const GAIN_MODE_MANUAL: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtlTuner {
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820t,
    R828d,
}

impl RtlTuner {
    fn from_code(code: u32) -> Self {
        match code {
            1 => RtlTuner::E4000,
            2 => RtlTuner::Fc0012,
            3 => RtlTuner::Fc0013,
            4 => RtlTuner::Fc2580,
            5 => RtlTuner::R820t,
            6 => RtlTuner::R828d,
            _ => RtlTuner::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RtlTuner::Unknown => "unknown",
            RtlTuner::E4000 => "E4000",
            RtlTuner::Fc0012 => "FC0012",
            RtlTuner::Fc0013 => "FC0013",
            RtlTuner::Fc2580 => "FC2580",
            RtlTuner::R820t => "R820T",
            RtlTuner::R828d => "R828D",
        }
    }
}

/// Parse the 12-byte server greeting into tuner type and gain count.
pub fn parse_greeting(bytes: &[u8; GREETING_LEN]) -> Result<(RtlTuner, u32), DeviceError> {
    if &bytes[..4] != GREETING_MAGIC {
        return Err(DeviceError::Protocol(format!(
            "bad rtl_tcp greeting {:02x?}",
            &bytes[..4]
        )));
    }
    let tuner = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let gains = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Ok((RtlTuner::from_code(tuner), gains))
}

fn command(cmd: u8, param: u32) -> [u8; 5] {
    let p = param.to_be_bytes();
    [cmd, p[0], p[1], p[2], p[3]]
}

pub struct RtlTcp {
    access: DeviceAccess,
    options: DeviceOptions,
    state: Arc<DeviceState>,
    writer: Option<Box<dyn CommandWriter>>,
    sample_rate: u32,
    tuner: Option<RtlTuner>,
}

impl RtlTcp {
    pub fn new(access: DeviceAccess, options: DeviceOptions) -> Result<Self, DeviceError> {
        if !matches!(access, DeviceAccess::Tcp { .. }) {
            return Err(DeviceError::Unsupported(format!(
                "rtl_tcp needs TCP access, got {:?}",
                access
            )));
        }
        let sample_rate = match options.sample_rate_hz {
            Some(hz) => nearest_rate(&RTL_SAMPLE_RATES, hz).unwrap_or(RTL_DEFAULT_RATE),
            None => RTL_DEFAULT_RATE,
        };
        Ok(Self {
            access,
            options,
            state: Arc::new(DeviceState::new()),
            writer: None,
            sample_rate,
            tuner: None,
        })
    }

    pub fn tuner(&self) -> Option<RtlTuner> {
        self.tuner
    }

    /// Read the greeting and configure the dongle over an open transport.
    pub fn connect_with(
        &mut self,
        mut stream: Box<dyn ByteStream>,
        writer: Box<dyn CommandWriter>,
    ) -> Result<Box<dyn BlockProducer>, DeviceError> {
        let mut greeting = [0u8; GREETING_LEN];
        stream.read_exact(&mut greeting)?;
        let (tuner, gain_count) = parse_greeting(&greeting)?;
        info!(
            "rtl_tcp connected: tuner {} with {} gain steps",
            tuner.as_str(),
            gain_count
        );
        self.tuner = Some(tuner);
        self.state.set_name(format!("RTL-SDR ({})", tuner.as_str()));
        self.writer = Some(writer);

        let rate = self.sample_rate;
        self.set_sample_rate(rate)?;
        match self.options.gain_db {
            Some(gain) => {
                self.send(CMD_SET_GAIN_MODE, GAIN_MODE_MANUAL)?;
                self.set_gain(gain)?;
            }
            None => self.send(CMD_SET_AGC_MODE, 1)?,
        }

        let block_bytes = self.info().block_bytes();
        Ok(Box::new(RtlTcpProducer {
            stream,
            scratch: vec![0u8; block_bytes],
            wait: self.options.io_timeout,
            realign: 0,
        }))
    }

    fn send(&self, cmd: u8, param: u32) -> Result<(), DeviceError> {
        let writer = self.writer.as_deref().ok_or(DeviceError::NotConnected)?;
        let bytes = command(cmd, param);
        let written = writer.write(&bytes)?;
        if written != bytes.len() {
            return Err(DeviceError::CommandFailed {
                item: u16::from(cmd),
                expected: bytes.len(),
                written,
            });
        }
        Ok(())
    }
}

impl SdrDevice for RtlTcp {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            model: "rtl_tcp",
            sample_format: SampleFormat::U8Offset,
            block_frames: self.options.frames_per_buffer.max(1),
            freq_range: RTL_FREQ_RANGE,
            sample_rates: RTL_SAMPLE_RATES.to_vec(),
        }
    }

    fn state(&self) -> Arc<DeviceState> {
        Arc::clone(&self.state)
    }

    fn connect(&mut self) -> Result<Box<dyn BlockProducer>, DeviceError> {
        let DeviceAccess::Tcp { addr } = self.access.clone() else {
            return Err(DeviceError::Unsupported(format!("{:?}", self.access)));
        };
        let (reader, writer) = tcp::connect(&addr, self.options.io_timeout)?;
        self.connect_with(Box::new(reader), Box::new(writer))
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        if self.writer.take().is_some() {
            debug!("rtl_tcp disconnected");
        }
        self.state.set_running(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    // rtl_tcp streams from accept until close; start/stop only gate the
    // session.
    fn start_stream(&mut self) -> Result<(), DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::NotConnected);
        }
        self.state.set_running(true);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        self.state.set_running(false);
        Ok(())
    }

    fn set_frequency(&mut self, freq: Freq) -> Result<Freq, DeviceError> {
        let applied = RTL_FREQ_RANGE.clamp(freq);
        let hz = u32::try_from(applied.hz)
            .map_err(|_| DeviceError::InvalidParameter(applied.to_string()))?;
        self.send(CMD_SET_FREQ, hz)?;
        self.state.set_frequency(applied);
        Ok(applied)
    }

    fn set_gain(&mut self, gain_db: i32) -> Result<i32, DeviceError> {
        let tenths = gain_db.clamp(0, 50) * 10;
        self.send(CMD_SET_GAIN, tenths as u32)?;
        self.state.set_rf_gain_db(tenths / 10);
        Ok(tenths / 10)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<u32, DeviceError> {
        let applied = nearest_rate(&RTL_SAMPLE_RATES, hz)
            .ok_or_else(|| DeviceError::InvalidParameter(format!("rate {} Hz", hz)))?;
        self.send(CMD_SET_SAMPLE_RATE, applied)?;
        self.sample_rate = applied;
        self.state.set_sample_rate_hz(applied);
        Ok(applied)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

const RTL_FRAME_BYTES: usize = SampleFormat::U8Offset.bytes_per_frame();

struct RtlTcpProducer {
    stream: Box<dyn ByteStream>,
    scratch: Vec<u8>,
    wait: Duration,
    /// Bytes still to skip before the stream is back on an I byte.
    realign: usize,
}

impl RtlTcpProducer {
    fn skip_to_frame_boundary(&mut self) -> Result<(), TransportError> {
        let mut sink = [0u8; RTL_FRAME_BYTES];
        while self.realign > 0 {
            let n = self.stream.read(&mut sink[..self.realign])?;
            if n == 0 {
                return Err(TransportError::Timeout);
            }
            self.realign -= n;
        }
        Ok(())
    }
}

impl BlockProducer for RtlTcpProducer {
    fn produce_cycle(
        &mut self,
        ring: &SlotProducer<Vec<u8>>,
        gate: &SessionGate,
    ) -> Result<Cycle, TransportError> {
        self.skip_to_frame_boundary()?;
        let stream = &mut self.stream;
        let result = fill_slot(ring, gate, &mut self.scratch, self.wait, |buf| {
            stream.read_exact(buf)
        });
        if let Err(TransportError::ShortRead { got, .. }) = result {
            let partial = got % RTL_FRAME_BYTES;
            if partial != 0 {
                self.realign = RTL_FRAME_BYTES - partial;
                debug!(
                    "rtl_tcp short read of {} bytes, skipping {} to realign",
                    got, self.realign
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockLink;
    use rx_core::{ring_buffer, RunState};

    fn greeting(tuner: u32, gains: u32) -> Vec<u8> {
        let mut bytes = GREETING_MAGIC.to_vec();
        bytes.extend_from_slice(&tuner.to_be_bytes());
        bytes.extend_from_slice(&gains.to_be_bytes());
        bytes
    }

    fn options(frames: usize, gain: Option<i32>) -> DeviceOptions {
        DeviceOptions {
            gain_db: gain,
            frames_per_buffer: frames,
            ..DeviceOptions::default()
        }
    }

    #[test]
    fn test_parse_greeting() {
        let bytes: [u8; 12] = greeting(5, 29).try_into().unwrap();
        assert_eq!(parse_greeting(&bytes).unwrap(), (RtlTuner::R820t, 29));
        let mut bad = bytes;
        bad[0] = b'X';
        assert!(matches!(
            parse_greeting(&bad),
            Err(DeviceError::Protocol(_))
        ));
    }

    #[test]
    fn test_connect_configures_rate_and_gain() {
        let link = MockLink::new();
        link.push_bytes(&greeting(1, 14));
        let mut dev = RtlTcp::new(
            DeviceAccess::Tcp {
                addr: "mock".into(),
            },
            options(16, Some(20)),
        )
        .unwrap();
        dev.connect_with(Box::new(link.reader()), Box::new(link.writer()))
            .unwrap();
        assert_eq!(dev.tuner(), Some(RtlTuner::E4000));
        assert_eq!(dev.state().name().as_deref(), Some("RTL-SDR (E4000)"));
        let written = link.written();
        assert_eq!(written[0], vec![0x02, 0x00, 0x1F, 0x40, 0x00]);
        assert_eq!(written[1], vec![0x03, 0, 0, 0, 1]);
        assert_eq!(written[2], vec![0x04, 0, 0, 0, 200]);
    }

    #[test]
    fn test_set_frequency_command() {
        let link = MockLink::new();
        link.push_bytes(&greeting(5, 29));
        let mut dev = RtlTcp::new(
            DeviceAccess::Tcp {
                addr: "mock".into(),
            },
            options(16, None),
        )
        .unwrap();
        dev.connect_with(Box::new(link.reader()), Box::new(link.writer()))
            .unwrap();
        let applied = dev.set_frequency(Freq::new(100_000_000)).unwrap();
        assert_eq!(applied.hz, 100_000_000);
        assert_eq!(
            link.written().last().unwrap(),
            &vec![0x01, 0x05, 0xF5, 0xE1, 0x00]
        );
        assert_eq!(dev.set_frequency(Freq::new(1_000)).unwrap().hz, 24_000_000);
    }

    #[test]
    fn test_producer_reads_one_slot_per_cycle() {
        let link = MockLink::new();
        link.push_bytes(&greeting(5, 29));
        let mut dev = RtlTcp::new(
            DeviceAccess::Tcp {
                addr: "mock".into(),
            },
            options(4, None),
        )
        .unwrap();
        let mut producer = dev
            .connect_with(Box::new(link.reader()), Box::new(link.writer()))
            .unwrap();
        let block = dev.info().block_bytes();
        assert_eq!(block, 8);

        let (ring, consumer) = ring_buffer(2, 1, || vec![0u8; block]);
        let gate = SessionGate::new();
        gate.set_state(RunState::Running);
        link.push_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(
            producer.produce_cycle(&ring, &gate).unwrap(),
            Cycle::Published
        );
        assert_eq!(&consumer.acquire_filled().unwrap()[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(link.pending_len(), 2);
    }

    #[test]
    fn test_odd_short_read_keeps_iq_alignment() {
        let link = MockLink::new();
        link.push_bytes(&greeting(5, 29));
        let mut dev = RtlTcp::new(
            DeviceAccess::Tcp {
                addr: "mock".into(),
            },
            options(4, None),
        )
        .unwrap();
        let mut producer = dev
            .connect_with(Box::new(link.reader()), Box::new(link.writer()))
            .unwrap();
        let (ring, consumer) = ring_buffer(2, 1, || vec![0u8; 8]);
        let gate = SessionGate::new();
        gate.set_state(RunState::Running);

        link.push_bytes(b"IQI");
        assert!(matches!(
            producer.produce_cycle(&ring, &gate),
            Err(TransportError::ShortRead { expected: 8, got: 3 })
        ));

        // The Q that completes the lost frame is dropped.
        link.push_bytes(b"QIQIQIQIQ");
        assert_eq!(
            producer.produce_cycle(&ring, &gate).unwrap(),
            Cycle::Published
        );
        assert_eq!(&consumer.acquire_filled().unwrap()[..], b"IQIQIQIQ");
    }

    #[test]
    fn test_realign_waits_for_missing_byte() {
        let link = MockLink::new();
        link.push_bytes(&greeting(5, 29));
        let mut dev = RtlTcp::new(
            DeviceAccess::Tcp {
                addr: "mock".into(),
            },
            options(4, None),
        )
        .unwrap();
        let mut producer = dev
            .connect_with(Box::new(link.reader()), Box::new(link.writer()))
            .unwrap();
        let (ring, consumer) = ring_buffer(2, 1, || vec![0u8; 8]);
        let gate = SessionGate::new();
        gate.set_state(RunState::Running);

        link.push_bytes(b"IQIQI");
        assert!(producer.produce_cycle(&ring, &gate).is_err());
        assert!(matches!(
            producer.produce_cycle(&ring, &gate),
            Err(TransportError::Timeout)
        ));
        link.push_bytes(b"QIQIQIQIQ");
        assert_eq!(
            producer.produce_cycle(&ring, &gate).unwrap(),
            Cycle::Published
        );
        assert_eq!(&consumer.acquire_filled().unwrap()[..], b"IQIQIQIQ");
    }
}
