// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Synthetic receiver for development and testing.
//!
//! Produces a constant tone 1 kHz above the tuned frequency as I16 LE
//! blocks. No hardware required.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rx_core::{Freq, FreqRange, SampleFormat, SessionGate, SlotProducer};
use tracing::debug;

use crate::device::{fill_slot, BlockProducer, Cycle, DeviceInfo, DeviceOptions, SdrDevice};
use crate::error::{DeviceError, TransportError};
use crate::state::DeviceState;

pub const DUMMY_SAMPLE_RATE: u32 = 192_000;
pub const DUMMY_TONE_OFFSET_HZ: f64 = 1_000.0;
const DUMMY_AMPLITUDE: f64 = 0.5 * 32_767.0;
const IDLE_SLEEP: Duration = Duration::from_millis(5);

pub struct DummyDevice {
    options: DeviceOptions,
    state: Arc<DeviceState>,
    streaming: Arc<AtomicBool>,
    connected: bool,
    paced: bool,
    sample_rate: u32,
}

impl DummyDevice {
    pub fn new(options: DeviceOptions) -> Self {
        let sample_rate = options.sample_rate_hz.unwrap_or(DUMMY_SAMPLE_RATE);
        Self {
            options,
            state: Arc::new(DeviceState::new()),
            streaming: Arc::new(AtomicBool::new(false)),
            connected: false,
            paced: true,
            sample_rate,
        }
    }

    /// Produce blocks as fast as the consumer takes them.
    pub fn unpaced(options: DeviceOptions) -> Self {
        Self {
            paced: false,
            ..Self::new(options)
        }
    }
}

impl SdrDevice for DummyDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            model: "dummy",
            sample_format: SampleFormat::I16Le,
            block_frames: self.options.frames_per_buffer.max(1),
            freq_range: FreqRange::new(0, 6_000_000_000),
            sample_rates: vec![48_000, 96_000, DUMMY_SAMPLE_RATE, 250_000],
        }
    }

    fn state(&self) -> Arc<DeviceState> {
        Arc::clone(&self.state)
    }

    fn connect(&mut self) -> Result<Box<dyn BlockProducer>, DeviceError> {
        self.connected = true;
        self.state.set_name("Dummy SDR");
        self.state.set_serial("0000");
        self.state.set_sample_rate_hz(self.sample_rate);
        debug!("dummy device connected at {} Hz", self.sample_rate);

        let block_frames = self.info().block_frames;
        let block_period =
            Duration::from_secs_f64(block_frames as f64 / f64::from(self.sample_rate));
        Ok(Box::new(ToneProducer {
            streaming: Arc::clone(&self.streaming),
            phase: 0.0,
            step: TAU * DUMMY_TONE_OFFSET_HZ / f64::from(self.sample_rate),
            paced: self.paced,
            block_period,
            next_due: None,
            scratch: vec![0u8; SampleFormat::I16Le.block_bytes(block_frames)],
            wait: self.options.io_timeout,
        }))
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.connected = false;
        self.streaming.store(false, Ordering::Release);
        self.state.set_running(false);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn start_stream(&mut self) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        self.streaming.store(true, Ordering::Release);
        self.state.set_running(true);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), DeviceError> {
        self.streaming.store(false, Ordering::Release);
        self.state.set_running(false);
        Ok(())
    }

    fn set_frequency(&mut self, freq: Freq) -> Result<Freq, DeviceError> {
        let applied = self.info().freq_range.clamp(freq);
        self.state.set_frequency(applied);
        Ok(applied)
    }

    fn set_gain(&mut self, gain_db: i32) -> Result<i32, DeviceError> {
        self.state.set_rf_gain_db(gain_db);
        Ok(gain_db)
    }

    fn set_sample_rate(&mut self, hz: u32) -> Result<u32, DeviceError> {
        if hz == 0 {
            return Err(DeviceError::InvalidParameter("rate 0 Hz".into()));
        }
        self.sample_rate = hz;
        self.state.set_sample_rate_hz(hz);
        Ok(hz)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

struct ToneProducer {
    streaming: Arc<AtomicBool>,
    phase: f64,
    step: f64,
    paced: bool,
    block_period: Duration,
    next_due: Option<Instant>,
    scratch: Vec<u8>,
    wait: Duration,
}

impl ToneProducer {
    fn pace(&mut self) {
        if !self.paced {
            return;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Do not try to catch up after a long stall.
        self.next_due = Some(due.max(now) + self.block_period);
    }
}

impl BlockProducer for ToneProducer {
    fn produce_cycle(
        &mut self,
        ring: &SlotProducer<Vec<u8>>,
        gate: &SessionGate,
    ) -> Result<Cycle, TransportError> {
        if !self.streaming.load(Ordering::Acquire) {
            self.next_due = None;
            std::thread::sleep(IDLE_SLEEP);
            return Ok(Cycle::Idle);
        }
        self.pace();

        let phase = &mut self.phase;
        let step = self.step;
        fill_slot(ring, gate, &mut self.scratch, self.wait, |buf| {
            for frame in buf.chunks_exact_mut(4) {
                let i = (DUMMY_AMPLITUDE * phase.cos()).round() as i16;
                let q = (DUMMY_AMPLITUDE * phase.sin()).round() as i16;
                frame[..2].copy_from_slice(&i.to_le_bytes());
                frame[2..].copy_from_slice(&q.to_le_bytes());
                *phase = (*phase + step) % TAU;
            }
            Ok(())
        })
    }
}
