// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Mode-specific detectors turning channel baseband into audio.

mod am;
mod filters;
mod fm;
mod math;
mod ssb;
mod wfm;

use num_complex::Complex;
use rx_core::RxMode;

pub use am::{AmDemod, SamDemod};
pub use fm::{FmDemod, NFM_DEVIATION_HZ};
pub use wfm::{WfmDecoder, DEFAULT_DEEMPHASIS_US, WFM_DEVIATION_HZ};

/// Detector selected by the receive mode.
#[derive(Debug, Clone)]
pub enum Demodulator {
    /// USB, LSB, CW, CWR, DSB and DIG: the real part of the filtered channel.
    Real,
    Am(AmDemod),
    Sam(SamDemod),
    Fm(FmDemod),
    Wfm(WfmDecoder),
}

impl Demodulator {
    pub fn for_mode(mode: RxMode, sample_rate: f32) -> Self {
        match mode {
            RxMode::LSB
            | RxMode::USB
            | RxMode::CW
            | RxMode::CWR
            | RxMode::DSB
            | RxMode::DIG => Self::Real,
            RxMode::AM => Self::Am(AmDemod::new()),
            RxMode::SAM => Self::Sam(SamDemod::new(sample_rate)),
            RxMode::FM => Self::Fm(FmDemod::new(sample_rate)),
            RxMode::WFM => Self::Wfm(WfmDecoder::new(sample_rate, false, DEFAULT_DEEMPHASIS_US)),
            RxMode::WFMS => Self::Wfm(WfmDecoder::new(sample_rate, true, DEFAULT_DEEMPHASIS_US)),
        }
    }

    /// Interleaved channels produced per input sample.
    pub fn channels(&self) -> usize {
        match self {
            Self::Wfm(dec) => dec.channels(),
            _ => 1,
        }
    }

    /// Append `samples.len() * channels()` audio values to `out`.
    pub fn demodulate_into(&mut self, samples: &[Complex<f32>], out: &mut Vec<f32>) {
        match self {
            Self::Real => ssb::demod_real_into(samples, out),
            Self::Am(d) => d.demodulate_into(samples, out),
            Self::Sam(d) => d.demodulate_into(samples, out),
            Self::Fm(d) => d.demodulate_into(samples, out),
            Self::Wfm(d) => d.demodulate_into(samples, out),
        }
    }
}
