// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::num_complex::Complex as FftComplex;
use rustfft::{Fft, FftPlanner};

/// Default number of FFT bins for both spectrum taps.
pub const SPECTRUM_FFT_SIZE: usize = 1024;

/// Default decimation of spectrum updates, in processed blocks.
pub const SPECTRUM_UPDATE_BLOCKS: usize = 4;

/// Windowed FFT magnitude in dBFS, DC centred, computed every N blocks.
pub struct SpectrumAnalyzer {
    hann_window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    every_n_blocks: usize,
    counter: usize,
    buf: Vec<FftComplex<f32>>,
    bins: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, every_n_blocks: usize) -> Self {
        let fft_size = fft_size.max(2);
        let hann_window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (fft_size - 1) as f32).cos()))
            .collect();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        Self {
            hann_window,
            fft,
            every_n_blocks: every_n_blocks.max(1),
            counter: 0,
            buf: Vec::with_capacity(fft_size),
            bins: vec![0.0; fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.hann_window.len()
    }

    /// Feed one block; returns fresh bins once every `every_n_blocks` calls.
    /// Short blocks are zero padded, long ones truncated.
    pub fn analyze(&mut self, samples: &[Complex<f32>]) -> Option<&[f32]> {
        self.counter += 1;
        if self.counter < self.every_n_blocks {
            return None;
        }
        self.counter = 0;

        let size = self.fft_size();
        let take = samples.len().min(size);
        self.buf.clear();
        self.buf.extend(
            samples[..take]
                .iter()
                .zip(&self.hann_window)
                .map(|(sample, w)| FftComplex::new(sample.re * w, sample.im * w)),
        );
        self.buf.resize(size, FftComplex::new(0.0, 0.0));
        self.fft.process(&mut self.buf);

        let half = size / 2;
        let shifted = self.buf[half..].iter().chain(self.buf[..half].iter());
        for (bin, value) in self.bins.iter_mut().zip(shifted) {
            let mag = (value.re * value.re + value.im * value.im).sqrt() / size as f32;
            *bin = 20.0 * mag.max(1e-10_f32).log10();
        }
        Some(&self.bins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complex_tone(freq_norm: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| Complex::from_polar(1.0, 2.0 * PI * freq_norm * n as f32))
            .collect()
    }

    fn peak_bin(bins: &[f32]) -> usize {
        bins.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_updates_every_n_blocks() {
        let mut sa = SpectrumAnalyzer::new(64, 3);
        let block = complex_tone(0.1, 64);
        assert!(sa.analyze(&block).is_none());
        assert!(sa.analyze(&block).is_none());
        assert!(sa.analyze(&block).is_some());
        assert!(sa.analyze(&block).is_none());
    }

    #[test]
    fn test_tone_lands_in_shifted_bin() {
        let mut sa = SpectrumAnalyzer::new(256, 1);
        let bins = sa.analyze(&complex_tone(0.125, 256)).unwrap();
        assert_eq!(bins.len(), 256);
        assert_eq!(peak_bin(bins), 128 + 32);

        let bins = sa.analyze(&complex_tone(-0.25, 256)).unwrap();
        assert_eq!(peak_bin(bins), 128 - 64);
    }

    #[test]
    fn test_silence_hits_floor() {
        let mut sa = SpectrumAnalyzer::new(128, 1);
        let bins = sa.analyze(&vec![Complex::new(0.0, 0.0); 100]).unwrap();
        assert!(bins.iter().all(|&b| (b + 200.0).abs() < 1e-3));
    }
}
