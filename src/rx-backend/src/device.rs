// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::sync::Arc;
use std::time::{Duration, Instant};

use rx_core::{Freq, FreqRange, RingError, SampleFormat, SessionGate, SlotProducer};

use crate::error::{DeviceError, TransportError};
use crate::protocol::{Command, FrameReader};
use crate::state::DeviceState;
use crate::transport::{ByteStream, CommandWriter};

/// How to reach a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAccess {
    /// No transport (synthetic sources).
    None,
    /// USB bulk; `index` selects among matching devices.
    Usb { index: usize },
    /// Control and data over one TCP stream.
    Tcp { addr: String },
    /// Control over TCP, samples over UDP on `data_port`.
    TcpUdp { addr: String, data_port: u16 },
}

/// Options applied when a device is built.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    pub sample_rate_hz: Option<u32>,
    pub gain_db: Option<i32>,
    /// Bound on every blocking transport call.
    pub io_timeout: Duration,
    /// Frames per ring slot, for devices without a fixed block size.
    pub frames_per_buffer: usize,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            sample_rate_hz: None,
            gain_db: None,
            io_timeout: Duration::from_millis(500),
            frames_per_buffer: 2048,
        }
    }
}

/// Static description of a built device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub model: &'static str,
    pub sample_format: SampleFormat,
    /// I/Q frames per ring slot.
    pub block_frames: usize,
    pub freq_range: FreqRange,
    pub sample_rates: Vec<u32>,
}

impl DeviceInfo {
    pub fn block_bytes(&self) -> usize {
        self.sample_format.block_bytes(self.block_frames)
    }
}

/// Outcome of one producer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Nothing arrived within the transport timeout.
    Idle,
    /// One byte dropped while hunting for a header.
    Resync,
    /// A control frame was consumed.
    Control { kind: u8, item: u16 },
    /// A block went to the consumer.
    Published,
    /// A block was read while the session was not running and dropped.
    Discarded,
    /// A block header is pending but no free slot became available.
    AwaitingSlot,
}

/// Producer half of a connected device, owned by the producer thread.
pub trait BlockProducer: Send {
    /// Do one bounded unit of work: fill at most one slot.
    ///
    /// Transport errors abort only this cycle; the caller decides whether
    /// to keep going.
    fn produce_cycle(
        &mut self,
        ring: &SlotProducer<Vec<u8>>,
        gate: &SessionGate,
    ) -> Result<Cycle, TransportError>;
}

/// Capability interface of a receiver front-end.
///
/// Control calls write a command and return without waiting for the
/// reply; replies land in [`DeviceState`] as the producer reads them.
pub trait SdrDevice: Send {
    fn info(&self) -> DeviceInfo;

    fn state(&self) -> Arc<DeviceState>;

    /// Open the transport and identify the device. Returns the producer half.
    fn connect(&mut self) -> Result<Box<dyn BlockProducer>, DeviceError>;

    fn disconnect(&mut self) -> Result<(), DeviceError>;

    fn is_connected(&self) -> bool;

    fn start_stream(&mut self) -> Result<(), DeviceError>;

    fn stop_stream(&mut self) -> Result<(), DeviceError>;

    /// Tune. Returns the frequency actually requested from the device.
    fn set_frequency(&mut self, freq: Freq) -> Result<Freq, DeviceError>;

    /// Returns the gain actually applied, after snapping to a supported step.
    fn set_gain(&mut self, gain_db: i32) -> Result<i32, DeviceError>;

    fn set_sample_rate(&mut self, hz: u32) -> Result<u32, DeviceError>;

    fn sample_rate(&self) -> u32;
}

/// Write one command in full. Partial writes are failures.
pub(crate) fn send_command(writer: &dyn CommandWriter, cmd: &Command) -> Result<(), DeviceError> {
    let bytes = cmd.as_bytes();
    let written = writer.write(bytes)?;
    if written != bytes.len() {
        return Err(DeviceError::CommandFailed {
            item: cmd.item(),
            expected: bytes.len(),
            written,
        });
    }
    Ok(())
}

/// Fill one ring slot with `fill`, or read into `scratch` and drop the block
/// when the gate is not running.
///
/// A slot is held only for the duration of `fill`; on error it goes back
/// to the free pool unpublished.
pub(crate) fn fill_slot<F>(
    ring: &SlotProducer<Vec<u8>>,
    gate: &SessionGate,
    scratch: &mut [u8],
    wait: Duration,
    mut fill: F,
) -> Result<Cycle, TransportError>
where
    F: FnMut(&mut [u8]) -> Result<(), TransportError>,
{
    if !gate.accepting_blocks() {
        fill(scratch)?;
        gate.note_discarded();
        return Ok(Cycle::Discarded);
    }
    let mut slot = match ring.acquire_free_timeout(wait) {
        Ok(Some(slot)) => slot,
        Ok(None) => return Ok(Cycle::AwaitingSlot),
        Err(RingError::Disconnected) => return Err(TransportError::Disconnected),
    };
    fill(&mut slot[..])?;
    slot.publish().map_err(|_| TransportError::Disconnected)?;
    Ok(Cycle::Published)
}

/// Drive `frames` until the device has answered the name query.
pub(crate) fn await_identity(
    stream: &mut dyn ByteStream,
    frames: &mut FrameReader,
    state: &DeviceState,
    deadline: Duration,
) -> Result<(), DeviceError> {
    // Nothing is streaming yet, so any bulk data is dropped.
    let gate = SessionGate::new();
    let started = Instant::now();
    while !state.identified() {
        if started.elapsed() >= deadline {
            return Err(DeviceError::NoResponse(deadline));
        }
        match frames.step(stream, None, &gate, state) {
            Ok(_) => {}
            Err(e) if e.is_transient() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Pick the supported rate closest to `hz`.
pub(crate) fn nearest_rate(rates: &[u32], hz: u32) -> Option<u32> {
    rates
        .iter()
        .copied()
        .min_by_key(|&r| (i64::from(r) - i64::from(hz)).unsigned_abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockLink;
    use rx_core::{ring_buffer, RunState};

    #[test]
    fn test_send_command_partial_write_fails() {
        let link = MockLink::new();
        let writer = link.writer();
        let cmd = Command::set_frequency(0, Freq::new(7_074_000));
        send_command(&writer, &cmd).unwrap();
        link.fail_writes(true);
        let err = send_command(&writer, &cmd).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::CommandFailed {
                item: 0x0020,
                expected: 10,
                written: 0
            }
        ));
    }

    #[test]
    fn test_fill_slot_discards_before_running() {
        let (producer, _consumer) = ring_buffer(2, 1, || vec![0u8; 4]);
        let gate = SessionGate::new();
        gate.set_state(RunState::Starting);
        let mut scratch = [0u8; 4];
        let cycle = fill_slot(&producer, &gate, &mut scratch, Duration::ZERO, |buf| {
            buf.fill(7);
            Ok(())
        })
        .unwrap();
        assert_eq!(cycle, Cycle::Discarded);
        assert_eq!(scratch, [7; 4]);
        assert_eq!(gate.discarded_blocks(), 1);
        assert_eq!(producer.filled_count(), 0);
    }

    #[test]
    fn test_fill_slot_error_returns_slot() {
        let (producer, _consumer) = ring_buffer(2, 1, || vec![0u8; 4]);
        let gate = SessionGate::new();
        gate.set_state(RunState::Running);
        let mut scratch = [0u8; 4];
        let err = fill_slot(&producer, &gate, &mut scratch, Duration::from_millis(5), |_| {
            Err(TransportError::Timeout)
        })
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(producer.free_count(), 2);
    }

    #[test]
    fn test_nearest_rate() {
        let rates = [62_500, 250_000, 2_000_000];
        assert_eq!(nearest_rate(&rates, 240_000), Some(250_000));
        assert_eq!(nearest_rate(&rates, 1), Some(62_500));
        assert_eq!(nearest_rate(&[], 1), None);
    }
}
