// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex;
use rustfft::num_complex::Complex as FftComplex;
use rustfft::{Fft, FftPlanner};

use crate::command::PipelineCommand;
use crate::stage::{BlockContext, Stage};

/// Hann-windowed sinc lowpass, normalized to unity DC gain.
pub fn windowed_sinc_coeffs(cutoff_norm: f32, taps: usize) -> Vec<f32> {
    let taps = taps.max(1);
    let m = (taps - 1) as f32;
    let mut coeffs = Vec::with_capacity(taps);
    for i in 0..taps {
        let x = i as f32 - m / 2.0;
        let sinc = if x == 0.0 {
            2.0 * cutoff_norm
        } else {
            (2.0 * PI * cutoff_norm * x).sin() / (PI * x)
        };
        let window = if taps == 1 {
            1.0
        } else {
            0.5 * (1.0 - (2.0 * PI * i as f32 / m).cos())
        };
        coeffs.push(sinc * window);
    }
    let sum: f32 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        let inv = 1.0 / sum;
        for coeff in &mut coeffs {
            *coeff *= inv;
        }
    }
    coeffs
}

/// Complex kernel passing `low_hz..high_hz` (either side of zero) only.
pub fn bandpass_kernel(low_hz: f32, high_hz: f32, sample_rate: f32, taps: usize) -> Vec<Complex<f32>> {
    let sr = sample_rate.max(1.0);
    let (low, high) = if low_hz <= high_hz {
        (low_hz, high_hz)
    } else {
        (high_hz, low_hz)
    };
    let limit = 0.49 * sr;
    let low = low.clamp(-limit, limit);
    let high = high.clamp(-limit, limit);
    let half_width = ((high - low) / 2.0).max(1.0);
    let center = (high + low) / 2.0;

    let proto = windowed_sinc_coeffs(half_width / sr, taps);
    let m = (proto.len() - 1) as f32;
    proto
        .iter()
        .enumerate()
        .map(|(i, &c)| Complex::from_polar(c, 2.0 * PI * center / sr * (i as f32 - m / 2.0)))
        .collect()
}

/// FFT overlap-save convolution with a complex kernel.
pub struct OverlapSaveFilter {
    h_freq: Vec<FftComplex<f32>>,
    overlap: Vec<FftComplex<f32>>,
    n_taps: usize,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<FftComplex<f32>>,
}

impl OverlapSaveFilter {
    pub fn new(kernel: &[Complex<f32>], block_size: usize) -> Self {
        let taps = kernel.len().max(1);
        let fft_size = (block_size.max(1) + taps - 1).next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);
        let mut filter = Self {
            h_freq: Vec::with_capacity(fft_size),
            overlap: vec![FftComplex::new(0.0, 0.0); taps - 1],
            n_taps: taps,
            fft_size,
            fft,
            ifft,
            scratch: Vec::with_capacity(fft_size),
        };
        filter.set_kernel(kernel);
        filter
    }

    /// Swap in a kernel of the same length; filter memory is kept.
    pub fn set_kernel(&mut self, kernel: &[Complex<f32>]) {
        self.h_freq.clear();
        self.h_freq
            .extend(kernel.iter().take(self.n_taps).map(|c| FftComplex::new(c.re, c.im)));
        self.h_freq.resize(self.fft_size, FftComplex::new(0.0, 0.0));
        self.fft.process(&mut self.h_freq);
    }

    pub fn taps(&self) -> usize {
        self.n_taps
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Filter `block` in place. Blocks longer than one FFT frame are
    /// processed in consecutive chunks.
    pub fn filter_in_place(&mut self, block: &mut [Complex<f32>]) {
        let n_overlap = self.n_taps - 1;
        let max_chunk = self.fft_size - n_overlap;
        let scale = 1.0 / self.fft_size as f32;
        for chunk in block.chunks_mut(max_chunk) {
            let n_new = chunk.len();
            let buf = &mut self.scratch;
            buf.clear();
            buf.extend_from_slice(&self.overlap);
            buf.extend(chunk.iter().map(|s| FftComplex::new(s.re, s.im)));
            buf.resize(self.fft_size, FftComplex::new(0.0, 0.0));

            if n_overlap > 0 {
                if n_new >= n_overlap {
                    for (dst, src) in self.overlap.iter_mut().zip(&chunk[n_new - n_overlap..]) {
                        *dst = FftComplex::new(src.re, src.im);
                    }
                } else {
                    self.overlap.copy_within(n_new..n_overlap, 0);
                    for (dst, src) in self.overlap[n_overlap - n_new..].iter_mut().zip(chunk.iter()) {
                        *dst = FftComplex::new(src.re, src.im);
                    }
                }
            }

            self.fft.process(buf);
            for (x, h) in buf.iter_mut().zip(self.h_freq.iter()) {
                *x = *x * *h * scale;
            }
            self.ifft.process(buf);

            for (dst, src) in chunk.iter_mut().zip(&buf[n_overlap..n_overlap + n_new]) {
                *dst = Complex::new(src.re, src.im);
            }
        }
    }

    pub fn reset(&mut self) {
        self.overlap.fill(FftComplex::new(0.0, 0.0));
    }
}

/// Channel bandpass stage.
pub struct BandpassFilter {
    low_hz: f32,
    high_hz: f32,
    sample_rate: f32,
    filter: OverlapSaveFilter,
}

impl BandpassFilter {
    pub fn new(low_hz: f32, high_hz: f32, sample_rate: f32, taps: usize, block_size: usize) -> Self {
        let kernel = bandpass_kernel(low_hz, high_hz, sample_rate, taps | 1);
        Self {
            low_hz,
            high_hz,
            sample_rate,
            filter: OverlapSaveFilter::new(&kernel, block_size),
        }
    }

    pub fn passband(&self) -> (f32, f32) {
        (self.low_hz, self.high_hz)
    }

    pub fn set_passband(&mut self, low_hz: f32, high_hz: f32) {
        self.low_hz = low_hz;
        self.high_hz = high_hz;
        let kernel = bandpass_kernel(low_hz, high_hz, self.sample_rate, self.filter.taps());
        self.filter.set_kernel(&kernel);
    }
}

impl Stage for BandpassFilter {
    fn name(&self) -> &'static str {
        "bandpass"
    }

    fn process(&mut self, block: &mut [Complex<f32>], _ctx: &mut BlockContext) {
        self.filter.filter_in_place(block);
    }

    fn reset(&mut self) {
        self.filter.reset();
    }

    fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        match *cmd {
            PipelineCommand::SetFilter { low_hz, high_hz } => {
                self.set_passband(low_hz, high_hz);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complex_tone(freq_norm: f32, len: usize) -> Vec<Complex<f32>> {
        use std::f32::consts::TAU;

        (0..len)
            .map(|n| Complex::from_polar(1.0, TAU * freq_norm * n as f32))
            .collect()
    }

    fn settled_level(filter: &mut BandpassFilter, freq_hz: f32, sr: f32) -> f32 {
        let tone = complex_tone(freq_hz / sr, 4096);
        let mut block = tone.clone();
        let mut ctx = BlockContext::new(sr as f64);
        filter.process(&mut block, &mut ctx);
        let tail = &block[2048..];
        tail.iter().map(|s| s.norm()).sum::<f32>() / tail.len() as f32
    }

    #[test]
    fn test_windowed_sinc_unity_dc() {
        let coeffs = windowed_sinc_coeffs(0.1, 63);
        let sum: f32 = coeffs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum {sum}");
    }

    #[test]
    fn test_usb_passband_selects_upper_side() {
        let sr = 24_000.0;
        let mut f = BandpassFilter::new(200.0, 2_800.0, sr, 255, 512);
        let upper = settled_level(&mut f, 1_500.0, sr);
        let mut f = BandpassFilter::new(200.0, 2_800.0, sr, 255, 512);
        let lower = settled_level(&mut f, -1_500.0, sr);
        assert!((upper - 1.0).abs() < 0.05, "in-band level {upper}");
        assert!(lower < 0.01, "opposite sideband level {lower}");
    }

    #[test]
    fn test_long_block_is_chunked() {
        let sr = 24_000.0;
        let mut f = BandpassFilter::new(-3_000.0, 3_000.0, sr, 127, 256);
        assert!(f.filter.fft_size() < 4096);
        let level = settled_level(&mut f, 1_000.0, sr);
        assert!((level - 1.0).abs() < 0.05, "chunked level {level}");
    }

    #[test]
    fn test_block_split_matches_whole() {
        let sr = 24_000.0;
        let tone = complex_tone(700.0 / sr, 1024);
        let mut whole = tone.clone();
        let mut f = BandpassFilter::new(300.0, 1_100.0, sr, 101, 1024);
        f.process(&mut whole, &mut BlockContext::new(sr as f64));

        let mut f = BandpassFilter::new(300.0, 1_100.0, sr, 101, 1024);
        let mut parts = tone.clone();
        let (a, b) = parts.split_at_mut(300);
        f.process(a, &mut BlockContext::new(sr as f64));
        f.process(b, &mut BlockContext::new(sr as f64));
        for (idx, (x, y)) in whole.iter().zip(parts.iter()).enumerate() {
            assert!((x - y).norm() < 1e-3, "sample {idx}: {x} vs {y}");
        }
    }

    #[test]
    fn test_set_filter_moves_passband() {
        let sr = 24_000.0;
        let mut f = BandpassFilter::new(200.0, 2_800.0, sr, 255, 512);
        assert!(f.configure(&PipelineCommand::SetFilter {
            low_hz: -2_800.0,
            high_hz: -200.0
        }));
        assert_eq!(f.passband(), (-2_800.0, -200.0));
        f.reset();
        let lower = settled_level(&mut f, -1_500.0, sr);
        assert!((lower - 1.0).abs() < 0.05, "new passband level {lower}");
    }
}
