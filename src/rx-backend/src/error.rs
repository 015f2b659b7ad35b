// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::Duration;

use thiserror::Error;

/// Failure of a single transport operation. Producers treat these as
/// aborting the current cycle only.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("transport timed out")]
    Timeout,

    #[error("transport disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("USB error: {0}")]
    Usb(String),
}

impl TransportError {
    /// Timeouts and short reads are expected while a device idles.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ShortRead { .. } | TransportError::Timeout
        )
    }
}

#[cfg(feature = "usb")]
impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::Disconnected,
            other => TransportError::Usb(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A control command could not be written in full.
    #[error("command {item:#06x} failed: wrote {written} of {expected} bytes")]
    CommandFailed {
        item: u16,
        expected: usize,
        written: usize,
    },

    #[error("device is not connected")]
    NotConnected,

    #[error("no identification reply within {0:?}")]
    NoResponse(Duration),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
