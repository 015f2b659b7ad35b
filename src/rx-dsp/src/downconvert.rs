// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f64::consts::TAU;

use num_complex::Complex;

use crate::decimate::DecimationChain;
use crate::error::DspError;

/// Numerically controlled oscillator that shifts a signal by `-offset_hz`.
///
/// Recursive rotation with per-block amplitude renormalization; the phase
/// carries across calls.
#[derive(Debug, Clone)]
pub struct Nco {
    sample_rate: f64,
    offset_hz: f64,
    phasor: Complex<f64>,
    step: Complex<f64>,
}

impl Nco {
    pub fn new(sample_rate: f64, offset_hz: f64) -> Self {
        let mut nco = Self {
            sample_rate: sample_rate.max(1.0),
            offset_hz: 0.0,
            phasor: Complex::new(1.0, 0.0),
            step: Complex::new(1.0, 0.0),
        };
        nco.set_offset(offset_hz);
        nco
    }

    pub fn set_offset(&mut self, offset_hz: f64) {
        self.offset_hz = offset_hz;
        self.step = Complex::from_polar(1.0, -TAU * offset_hz / self.sample_rate);
    }

    pub fn offset_hz(&self) -> f64 {
        self.offset_hz
    }

    pub fn mix(&mut self, buf: &mut [Complex<f32>]) {
        if self.offset_hz == 0.0 {
            return;
        }
        let mut phasor = self.phasor;
        for sample in buf.iter_mut() {
            let lo = Complex::new(phasor.re as f32, phasor.im as f32);
            *sample *= lo;
            phasor *= self.step;
        }
        self.phasor = phasor / phasor.norm();
    }
}

/// Mixer followed by the decimation chain.
pub struct DownConverter {
    nco: Nco,
    chain: DecimationChain,
}

impl DownConverter {
    pub fn new(input_rate: f64, bw_max: f64, offset_hz: f64) -> Result<Self, DspError> {
        Ok(Self {
            nco: Nco::new(input_rate, offset_hz),
            chain: DecimationChain::new(input_rate, bw_max)?,
        })
    }

    pub fn set_offset(&mut self, offset_hz: f64) {
        self.nco.set_offset(offset_hz);
    }

    pub fn offset_hz(&self) -> f64 {
        self.nco.offset_hz()
    }

    pub fn output_rate(&self) -> f64 {
        self.chain.output_rate()
    }

    pub fn factor(&self) -> usize {
        self.chain.factor()
    }

    /// Shift and decimate in place; returns the number of valid output samples.
    pub fn process(&mut self, buf: &mut [Complex<f32>]) -> usize {
        self.nco.mix(buf);
        self.chain.process(buf)
    }

    pub fn reset(&mut self) {
        self.chain.reset();
    }
}
