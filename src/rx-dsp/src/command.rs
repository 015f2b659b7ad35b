// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use rx_core::RxMode;

use crate::agc::AgcSettings;
use crate::iq_balance::IqBalanceSettings;
use crate::noise::{NoiseBlankerSettings, NoiseReductionSettings};

/// Runtime changes to a running pipeline, applied between blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCommand {
    /// Switch demodulation mode; rebuilds the channel chain.
    SetMode(RxMode),
    /// Channel offset from the hardware centre frequency, in Hz.
    SetOffset(f64),
    /// Channel passband edges relative to the carrier, in Hz.
    SetFilter { low_hz: f32, high_hz: f32 },
    SetAgc(AgcSettings),
    /// Squelch threshold in dBFS, `None` to open.
    SetSquelch(Option<f32>),
    SetNoiseBlanker(NoiseBlankerSettings),
    SetNoiseReduction(NoiseReductionSettings),
    SetIqBalance(IqBalanceSettings),
    /// Linear output gain.
    SetVolume(f32),
}
