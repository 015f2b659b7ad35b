// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest value representable by the 40-bit frequency field.
pub const FREQ_40BIT_MAX: u64 = (1 << 40) - 1;

/// Tunable range of a front-end in Hz (inclusive on both ends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreqRange {
    pub low_hz: u64,
    pub high_hz: u64,
}

impl FreqRange {
    #[must_use]
    pub const fn new(low_hz: u64, high_hz: u64) -> Self {
        Self { low_hz, high_hz }
    }

    /// Midpoint frequency of the range in Hz.
    #[must_use]
    pub fn center_hz(&self) -> u64 {
        u64::midpoint(self.low_hz, self.high_hz)
    }

    pub fn contains(&self, freq: Freq) -> bool {
        freq.hz >= self.low_hz && freq.hz <= self.high_hz
    }

    /// Pull a requested frequency into the range.
    #[must_use]
    pub fn clamp(&self, freq: Freq) -> Freq {
        Freq::new(freq.hz.clamp(self.low_hz, self.high_hz))
    }
}

/// Frequency wrapper (Hz).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Freq {
    pub hz: u64,
}

impl Freq {
    #[must_use]
    pub const fn new(hz: u64) -> Self {
        Self { hz }
    }

    /// Little-endian 40-bit encoding used by the frequency control item.
    /// Values above 2^40-1 saturate.
    #[must_use]
    pub fn to_le_40(self) -> [u8; 5] {
        let hz = self.hz.min(FREQ_40BIT_MAX);
        let bytes = hz.to_le_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
    }

    #[must_use]
    pub fn from_le_40(bytes: [u8; 5]) -> Self {
        let mut wide = [0u8; 8];
        wide[..5].copy_from_slice(&bytes);
        Self::new(u64::from_le_bytes(wide))
    }
}

impl fmt::Display for Freq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mhz = self.hz / 1_000_000;
        let rem = self.hz % 1_000_000;
        write!(f, "{mhz}.{rem:06} MHz")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_clamp() {
        let range = FreqRange::new(100_000, 30_000_000);
        assert_eq!(range.clamp(Freq::new(50)).hz, 100_000);
        assert_eq!(range.clamp(Freq::new(7_074_000)).hz, 7_074_000);
        assert_eq!(range.clamp(Freq::new(50_000_000)).hz, 30_000_000);
        assert!(range.contains(Freq::new(30_000_000)));
        assert!(!range.contains(Freq::new(30_000_001)));
    }

    #[test]
    fn test_40bit_encoding() {
        let freq = Freq::new(14_074_000);
        let bytes = freq.to_le_40();
        assert_eq!(bytes, [0x90, 0xC0, 0xD6, 0x00, 0x00]);
        assert_eq!(Freq::from_le_40(bytes), freq);
        assert_eq!(Freq::new(u64::MAX).to_le_40(), [0xFF; 5]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Freq::new(7_074_000).to_string(), "7.074000 MHz");
        assert_eq!(Freq::new(500).to_string(), "0.000500 MHz");
    }
}
