// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! RFSPACE SDR-IQ over USB (FTDI bulk) or a TCP bridge.

use std::sync::Arc;

use rx_core::{Freq, FreqRange, SampleFormat, SessionGate, SlotProducer};
use tracing::{debug, info};

use crate::device::{
    await_identity, send_command, BlockProducer, Cycle, DeviceAccess, DeviceInfo, DeviceOptions,
    SdrDevice,
};
use crate::error::{DeviceError, TransportError};
use crate::protocol::{item, Command, FrameReader, BULK_PAYLOAD_LEN};
use crate::state::DeviceState;
use crate::transport::{tcp, ByteStream, CommandWriter};

pub const SDRIQ_SAMPLE_RATE: u32 = 196_078;
pub const SDRIQ_FREQ_RANGE: FreqRange = FreqRange::new(500, 30_000_000);
/// RF attenuator steps in dB.
pub const SDRIQ_RF_GAINS: [i32; 4] = [0, -10, -20, -30];

/// Receiver-state data type selecting complex contiguous 16-bit samples.
const DATA_TYPE_CONTIGUOUS: u8 = 0x81;
const CHANNEL: u8 = 0;
const BLOCK_FRAMES: usize = BULK_PAYLOAD_LEN / 4;

pub struct SdrIq {
    access: DeviceAccess,
    options: DeviceOptions,
    state: Arc<DeviceState>,
    writer: Option<Box<dyn CommandWriter>>,
}

impl SdrIq {
    pub fn new(access: DeviceAccess, options: DeviceOptions) -> Result<Self, DeviceError> {
        match access {
            DeviceAccess::Usb { .. } | DeviceAccess::Tcp { .. } => {}
            other => {
                return Err(DeviceError::Unsupported(format!(
                    "SDR-IQ needs USB or TCP access, got {:?}",
                    other
                )))
            }
        }
        if let Some(rate) = options.sample_rate_hz {
            if rate != SDRIQ_SAMPLE_RATE {
                return Err(DeviceError::InvalidParameter(format!(
                    "SDR-IQ runs at {} Hz only",
                    SDRIQ_SAMPLE_RATE
                )));
            }
        }
        Ok(Self {
            access,
            options,
            state: Arc::new(DeviceState::new()),
            writer: None,
        })
    }

    /// Identify the device over an already open transport.
    pub fn connect_with(
        &mut self,
        mut stream: Box<dyn ByteStream>,
        writer: Box<dyn CommandWriter>,
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
        self.state.set_sample_rate_hz(SDRIQ_SAMPLE_RATE);
        if let Some(gain) = self.options.gain_db {
            self.set_gain(gain)?;
        }

        Ok(Box::new(FramedProducer {
            stream,
            frames,
            state: Arc::clone(&self.state),
        }))
    }

    fn writer(&self) -> Result<&dyn CommandWriter, DeviceError> {
        self.writer.as_deref().ok_or(DeviceError::NotConnected)
    }
}

impl SdrDevice for SdrIq {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            model: "SDR-IQ",
            sample_format: SampleFormat::I16Le,
            block_frames: BLOCK_FRAMES,
            freq_range: SDRIQ_FREQ_RANGE,
            sample_rates: vec![SDRIQ_SAMPLE_RATE],
        }
    }

    fn state(&self) -> Arc<DeviceState> {
        Arc::clone(&self.state)
    }

    fn connect(&mut self) -> Result<Box<dyn BlockProducer>, DeviceError> {
        match self.access.clone() {
            DeviceAccess::Tcp { addr } => {
                let (reader, writer) = tcp::connect(&addr, self.options.io_timeout)?;
                self.connect_with(Box::new(reader), Box::new(writer))
            }
            #[cfg(feature = "usb")]
            DeviceAccess::Usb { index } => {
                let (reader, writer) =
                    crate::transport::usb::open(index, self.options.io_timeout)?;
                self.connect_with(Box::new(reader), Box::new(writer))
            }
            #[cfg(not(feature = "usb"))]
            DeviceAccess::Usb { .. } => Err(DeviceError::Unsupported(
                "built without the `usb` feature".into(),
            )),
            other => Err(DeviceError::Unsupported(format!("{:?}", other))),
        }
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        if self.writer.take().is_some() {
            debug!("SDR-IQ disconnected");
        }
        self.state.set_running(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn start_stream(&mut self) -> Result<(), DeviceError> {
        send_command(
            self.writer()?,
            &Command::receiver_state(DATA_TYPE_CONTIGUOUS, true),
        )
    }

    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        send_command(
            self.writer()?,
            &Command::receiver_state(DATA_TYPE_CONTIGUOUS, false),
        )
    }

    fn set_frequency(&mut self, freq: Freq) -> Result<Freq, DeviceError> {
        let applied = SDRIQ_FREQ_RANGE.clamp(freq);
        send_command(self.writer()?, &Command::set_frequency(CHANNEL, applied))?;
        Ok(applied)
    }

    fn set_gain(&mut self, gain_db: i32) -> Result<i32, DeviceError> {
        let applied = snap_gain(&SDRIQ_RF_GAINS, gain_db);
        send_command(self.writer()?, &Command::set_rf_gain(CHANNEL, applied as i8))?;
        Ok(applied)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<u32, DeviceError> {
        if hz == SDRIQ_SAMPLE_RATE {
            return Ok(hz);
        }
        Err(DeviceError::Unsupported(format!(
            "SDR-IQ rate changes need a filter upload; fixed at {} Hz",
            SDRIQ_SAMPLE_RATE
        )))
    }

    fn sample_rate(&self) -> u32 {
        SDRIQ_SAMPLE_RATE
    }
}

/// Nearest supported attenuator step.
pub(crate) fn snap_gain(steps: &[i32], gain_db: i32) -> i32 {
    steps
        .iter()
        .copied()
        .min_by_key(|&g| (g - gain_db).abs())
        .unwrap_or(gain_db)
}

/// Producer for devices that interleave bulk blocks with control replies
/// on a single framed stream.
struct FramedProducer {
    stream: Box<dyn ByteStream>,
    frames: FrameReader,
    state: Arc<DeviceState>,
}

impl BlockProducer for FramedProducer {
    fn produce_cycle(
        &mut self,
        ring: &SlotProducer<Vec<u8>>,
        gate: &SessionGate,
    ) -> Result<Cycle, TransportError> {
        self.frames
            .step(self.stream.as_mut(), Some(ring), gate, &self.state)
    }
}
