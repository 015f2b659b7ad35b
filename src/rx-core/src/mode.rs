// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Demodulation mode of the receive chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum RxMode {
    LSB,
    #[default]
    USB,
    CW,
    CWR,
    AM,
    SAM,
    DSB,
    FM,
    WFM,
    /// Wideband FM with stereo pilot decoding.
    WFMS,
    DIG,
}

impl RxMode {
    pub const ALL: [RxMode; 11] = [
        RxMode::LSB,
        RxMode::USB,
        RxMode::CW,
        RxMode::CWR,
        RxMode::AM,
        RxMode::SAM,
        RxMode::DSB,
        RxMode::FM,
        RxMode::WFM,
        RxMode::WFMS,
        RxMode::DIG,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RxMode::LSB => "LSB",
            RxMode::USB => "USB",
            RxMode::CW => "CW",
            RxMode::CWR => "CWR",
            RxMode::AM => "AM",
            RxMode::SAM => "SAM",
            RxMode::DSB => "DSB",
            RxMode::FM => "FM",
            RxMode::WFM => "WFM",
            RxMode::WFMS => "WFMS",
            RxMode::DIG => "DIG",
        }
    }

    /// Broadcast FM modes skip the narrowband channel stages.
    pub fn is_wideband(&self) -> bool {
        matches!(self, RxMode::WFM | RxMode::WFMS)
    }

    pub fn is_cw(&self) -> bool {
        matches!(self, RxMode::CW | RxMode::CWR)
    }

    /// Offset the mixer applies on top of the channel offset so that a CW
    /// carrier lands on the audible pitch.
    pub fn bfo_offset_hz(&self, cw_pitch_hz: f32) -> f32 {
        match self {
            RxMode::CW => -cw_pitch_hz,
            RxMode::CWR => cw_pitch_hz,
            _ => 0.0,
        }
    }

    /// Default passband `(low, high)` in Hz relative to the mixed-down carrier.
    pub fn default_passband_hz(&self, cw_pitch_hz: f32) -> (f32, f32) {
        match self {
            RxMode::LSB => (-2_800.0, -200.0),
            RxMode::USB => (200.0, 2_800.0),
            RxMode::DIG => (100.0, 3_000.0),
            RxMode::CW => (cw_pitch_hz - 250.0, cw_pitch_hz + 250.0),
            RxMode::CWR => (-cw_pitch_hz - 250.0, -cw_pitch_hz + 250.0),
            RxMode::AM | RxMode::SAM | RxMode::DSB => (-4_500.0, 4_500.0),
            RxMode::FM => (-6_250.0, 6_250.0),
            RxMode::WFM | RxMode::WFMS => (-100_000.0, 100_000.0),
        }
    }

    /// One-sided bandwidth the decimation chain has to preserve for this mode.
    pub fn decimation_bandwidth_hz(&self) -> f64 {
        match self {
            RxMode::WFM | RxMode::WFMS => 100_000.0,
            RxMode::FM => 12_500.0,
            RxMode::AM | RxMode::SAM | RxMode::DSB => 10_000.0,
            RxMode::LSB | RxMode::USB | RxMode::DIG => 5_000.0,
            RxMode::CW | RxMode::CWR => 2_000.0,
        }
    }
}

impl fmt::Display for RxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        RxMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == upper)
            .ok_or_else(|| format!("unknown mode '{}'", s))
    }
}
