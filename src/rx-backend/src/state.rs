// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device facts learned from control replies.
//!
//! The producer thread writes while it parses replies; the command thread
//! and status readers only read. Numeric fields are plain atomics with a
//! sentinel for "not yet reported".

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use rx_core::Freq;
use tracing::{debug, trace};

use crate::protocol::{item, msg};

const UNSET_U32: u32 = u32::MAX;
const UNSET_U64: u64 = u64::MAX;
const UNSET_I32: i32 = i32::MIN;

/// Receiver-state param values for item 0x0018.
const RECEIVER_RUN: u8 = 0x02;

/// Plain copy of [`DeviceState`] for display and logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub name: Option<String>,
    pub serial: Option<String>,
    pub interface_version: Option<u32>,
    pub firmware_version: Option<u32>,
    pub bootcode_version: Option<u32>,
    pub status: Option<u32>,
    pub frequency: Option<Freq>,
    pub sample_rate_hz: Option<u32>,
    pub rf_gain_db: Option<i32>,
    pub if_gain_db: Option<i32>,
    pub running: bool,
    pub replies: u64,
}

#[derive(Debug)]
pub struct DeviceState {
    name: Mutex<Option<String>>,
    serial: Mutex<Option<String>>,
    interface_version: AtomicU32,
    firmware_version: AtomicU32,
    bootcode_version: AtomicU32,
    status: AtomicU32,
    frequency_hz: AtomicU64,
    sample_rate_hz: AtomicU32,
    rf_gain_db: AtomicI32,
    if_gain_db: AtomicI32,
    running: AtomicBool,
    replies: AtomicU64,
}

fn load_u32(v: &AtomicU32) -> Option<u32> {
    Some(v.load(Ordering::Acquire)).filter(|&x| x != UNSET_U32)
}

fn load_i32(v: &AtomicI32) -> Option<i32> {
    Some(v.load(Ordering::Acquire)).filter(|&x| x != UNSET_I32)
}

fn read_text(slot: &Mutex<Option<String>>) -> Option<String> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn write_text(slot: &Mutex<Option<String>>, value: String) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
}

/// Decode a NUL-terminated ASCII reply parameter.
fn reply_text(params: &[u8]) -> String {
    let end = params.iter().position(|&b| b == 0).unwrap_or(params.len());
    String::from_utf8_lossy(&params[..end]).trim().to_string()
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            name: Mutex::new(None),
            serial: Mutex::new(None),
            interface_version: AtomicU32::new(UNSET_U32),
            firmware_version: AtomicU32::new(UNSET_U32),
            bootcode_version: AtomicU32::new(UNSET_U32),
            status: AtomicU32::new(UNSET_U32),
            frequency_hz: AtomicU64::new(UNSET_U64),
            sample_rate_hz: AtomicU32::new(UNSET_U32),
            rf_gain_db: AtomicI32::new(UNSET_I32),
            if_gain_db: AtomicI32::new(UNSET_I32),
            running: AtomicBool::new(false),
            replies: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> Option<String> {
        read_text(&self.name)
    }

    pub fn set_name(&self, name: impl Into<String>) {
        write_text(&self.name, name.into());
    }

    pub fn serial(&self) -> Option<String> {
        read_text(&self.serial)
    }

    pub fn set_serial(&self, serial: impl Into<String>) {
        write_text(&self.serial, serial.into());
    }

    pub fn frequency(&self) -> Option<Freq> {
        Some(self.frequency_hz.load(Ordering::Acquire))
            .filter(|&hz| hz != UNSET_U64)
            .map(Freq::new)
    }

    pub fn set_frequency(&self, freq: Freq) {
        self.frequency_hz.store(freq.hz, Ordering::Release);
    }

    pub fn sample_rate_hz(&self) -> Option<u32> {
        load_u32(&self.sample_rate_hz)
    }

    pub fn set_sample_rate_hz(&self, hz: u32) {
        self.sample_rate_hz.store(hz, Ordering::Release);
    }

    pub fn rf_gain_db(&self) -> Option<i32> {
        load_i32(&self.rf_gain_db)
    }

    pub fn set_rf_gain_db(&self, db: i32) {
        self.rf_gain_db.store(db, Ordering::Release);
    }

    pub fn if_gain_db(&self) -> Option<i32> {
        load_i32(&self.if_gain_db)
    }

    pub fn set_if_gain_db(&self, db: i32) {
        self.if_gain_db.store(db, Ordering::Release);
    }

    pub fn set_firmware_version(&self, version: u32) {
        self.firmware_version.store(version, Ordering::Release);
    }

    pub fn set_interface_version(&self, version: u32) {
        self.interface_version.store(version, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Control replies applied since construction.
    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    /// True once the device has answered the name query.
    pub fn identified(&self) -> bool {
        self.name.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            name: self.name(),
            serial: self.serial(),
            interface_version: load_u32(&self.interface_version),
            firmware_version: load_u32(&self.firmware_version),
            bootcode_version: load_u32(&self.bootcode_version),
            status: load_u32(&self.status),
            frequency: self.frequency(),
            sample_rate_hz: self.sample_rate_hz(),
            rf_gain_db: self.rf_gain_db(),
            if_gain_db: self.if_gain_db(),
            running: self.is_running(),
            replies: self.replies(),
        }
    }

    /// Fold one control reply into the state.
    ///
    /// Only response and unsolicited messages carry state; everything else
    /// is ignored. Returns true when the reply was recognized.
    pub fn apply_reply(&self, kind: u8, item_code: u16, params: &[u8]) -> bool {
        if kind != msg::RESPONSE && kind != msg::UNSOLICITED {
            trace!("ignoring control message type {} item {:#06x}", kind, item_code);
            return false;
        }
        let applied = match item_code {
            item::TARGET_NAME => {
                let name = reply_text(params);
                debug!("device name: {}", name);
                self.set_name(name);
                true
            }
            item::SERIAL_NUMBER => {
                self.set_serial(reply_text(params));
                true
            }
            item::INTERFACE_VERSION => match params {
                [lo, hi, ..] => {
                    self.set_interface_version(u32::from(u16::from_le_bytes([*lo, *hi])));
                    true
                }
                _ => false,
            },
            item::FIRMWARE_VERSION => match params {
                [which, lo, hi, ..] => {
                    let version = u32::from(u16::from_le_bytes([*lo, *hi]));
                    if *which == 0 {
                        self.bootcode_version.store(version, Ordering::Release);
                    } else {
                        self.set_firmware_version(version);
                    }
                    true
                }
                _ => false,
            },
            item::STATUS => match params {
                [code, ..] => {
                    self.status.store(u32::from(*code), Ordering::Release);
                    true
                }
                _ => false,
            },
            item::RECEIVER_STATE => match params {
                [_, run, ..] => {
                    self.set_running(*run == RECEIVER_RUN);
                    true
                }
                _ => false,
            },
            item::FREQUENCY => match params {
                [_chan, b0, b1, b2, b3, b4, ..] => {
                    self.set_frequency(Freq::from_le_40([*b0, *b1, *b2, *b3, *b4]));
                    true
                }
                _ => false,
            },
            item::RF_GAIN => match params {
                [_chan, gain, ..] => {
                    self.set_rf_gain_db(i32::from(*gain as i8));
                    true
                }
                _ => false,
            },
            item::IF_GAIN => match params {
                [_chan, gain, ..] => {
                    self.set_if_gain_db(i32::from(*gain as i8));
                    true
                }
                _ => false,
            },
            item::SAMPLE_RATE => match params {
                [_chan, b0, b1, b2, b3, ..] => {
                    self.set_sample_rate_hz(u32::from_le_bytes([*b0, *b1, *b2, *b3]));
                    true
                }
                _ => false,
            },
            other => {
                trace!("unhandled control item {:#06x}", other);
                false
            }
        };
        if applied {
            self.replies.fetch_add(1, Ordering::Relaxed);
        }
        applied
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}
