// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Arbitrary-ratio audio resampling with a polyphase windowed-sinc bank.

use std::f64::consts::PI;

use crate::error::DspError;

/// Sub-sample positions tabulated in the filter bank.
const PHASES: usize = 64;
/// Taps per phase when upsampling; scaled by the ratio when decimating.
const BASE_TAPS: usize = 16;
const MAX_TAPS: usize = 256;
/// Cutoff as a fraction of the lower Nyquist frequency.
const CUTOFF: f64 = 0.94;

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// `PHASES + 1` rows of `taps` coefficients; each row sums to 1.
fn design_bank(taps: usize, cutoff: f64) -> Vec<f32> {
    let centre = (taps as f64 - 1.0) / 2.0;
    let half_window = (taps as f64 + 1.0) / 2.0;
    let mut bank = Vec::with_capacity((PHASES + 1) * taps);
    for p in 0..=PHASES {
        let frac = p as f64 / PHASES as f64;
        let row: Vec<f64> = (0..taps)
            .map(|k| {
                let x = k as f64 - centre + frac;
                let window = 0.5 * (1.0 + (PI * x / half_window).cos());
                cutoff * sinc(cutoff * x) * window
            })
            .collect();
        let sum: f64 = row.iter().sum();
        let norm = if sum.abs() > 1e-12 { 1.0 / sum } else { 1.0 };
        bank.extend(row.iter().map(|&h| (h * norm) as f32));
    }
    bank
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Converts interleaved real audio from one rate to another.
///
/// Output frame `j` is the input interpolated at time `j * in/out` minus a
/// fixed latency of half the filter length.
#[derive(Debug, Clone)]
pub struct FractionalResampler {
    in_rate: f64,
    out_rate: f64,
    channels: usize,
    step: f64,
    taps: usize,
    bank: Vec<f32>,
    /// Per channel, a ring of `taps` samples stored twice so the newest
    /// window is always contiguous.
    history: Vec<f32>,
    pos: usize,
    next: f64,
    passthrough: bool,
}

impl FractionalResampler {
    pub fn new(in_rate: f64, out_rate: f64, channels: usize) -> Result<Self, DspError> {
        if !(in_rate.is_finite() && in_rate > 0.0 && out_rate.is_finite() && out_rate > 0.0) {
            return Err(DspError::Configuration(format!(
                "resampler rates must be positive, got {} -> {}",
                in_rate, out_rate
            )));
        }
        if channels == 0 {
            return Err(DspError::Configuration(
                "resampler needs at least one channel".into(),
            ));
        }
        let ratio = out_rate / in_rate;
        let taps = if ratio < 1.0 {
            ((BASE_TAPS as f64 / ratio).ceil() as usize).min(MAX_TAPS)
        } else {
            BASE_TAPS
        };
        let cutoff = CUTOFF * ratio.min(1.0);
        Ok(Self {
            in_rate,
            out_rate,
            channels,
            step: in_rate / out_rate,
            taps,
            bank: design_bank(taps, cutoff),
            history: vec![0.0; channels * 2 * taps],
            pos: 0,
            next: 1.0,
            passthrough: in_rate == out_rate,
        })
    }

    pub fn in_rate(&self) -> f64 {
        self.in_rate
    }

    pub fn out_rate(&self) -> f64 {
        self.out_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn taps(&self) -> usize {
        self.taps
    }

    /// Resample interleaved frames from `input`, appending to `out`.
    /// A trailing partial frame is ignored.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.passthrough {
            let whole = input.len() - input.len() % self.channels;
            out.extend_from_slice(&input[..whole]);
            return;
        }
        let taps = self.taps;
        let ring_len = 2 * taps;
        for frame in input.chunks_exact(self.channels) {
            for (c, &x) in frame.iter().enumerate() {
                let ring = &mut self.history[c * ring_len..(c + 1) * ring_len];
                ring[self.pos] = x;
                ring[self.pos + taps] = x;
            }
            self.pos = (self.pos + 1) % taps;

            self.next -= 1.0;
            while self.next <= 0.0 {
                let scaled = -self.next * PHASES as f64;
                let p = (scaled.floor() as usize).min(PHASES - 1);
                let mix = (scaled - p as f64) as f32;
                let row0 = &self.bank[p * taps..(p + 1) * taps];
                let row1 = &self.bank[(p + 1) * taps..(p + 2) * taps];
                for c in 0..self.channels {
                    let start = c * ring_len + self.pos;
                    let window = &self.history[start..start + taps];
                    let a = dot(row0, window);
                    let b = dot(row1, window);
                    out.push(a + (b - a) * mix);
                }
                self.next += self.step;
            }
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
        self.next = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn tone(freq_hz: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (TAU * freq_hz * n as f32 / sample_rate).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len().max(1) as f32).sqrt()
    }

    #[test]
    fn test_upsample_follows_waveform() {
        let input = tone(1_000.0, 12_000.0, 1_200);
        let mut rs = FractionalResampler::new(12_000.0, 48_000.0, 1).unwrap();
        let mut out = Vec::new();
        rs.process(&input, &mut out);
        assert_eq!(out.len(), 4 * (input.len() - 1) + 1);

        let latency = (rs.taps() as f32 - 1.0) / 2.0;
        for (j, v) in out.iter().enumerate().skip(200).take(4_000) {
            let t = j as f32 * 0.25 - latency;
            let expected = (TAU * 1_000.0 * t / 12_000.0).sin();
            assert!((v - expected).abs() < 0.02, "sample {j}: {v} vs {expected}");
        }
    }

    #[test]
    fn test_split_input_matches_whole() {
        let input = tone(700.0, 12_000.0, 999);
        let mut whole = Vec::new();
        FractionalResampler::new(12_000.0, 44_100.0, 1)
            .unwrap()
            .process(&input, &mut whole);

        let mut rs = FractionalResampler::new(12_000.0, 44_100.0, 1).unwrap();
        let mut split = Vec::new();
        for chunk in input.chunks(37) {
            rs.process(chunk, &mut split);
        }
        assert_eq!(whole, split);
    }

    #[test]
    fn test_downsample_rejects_above_nyquist() {
        let mut rs = FractionalResampler::new(48_000.0, 12_000.0, 1).unwrap();
        assert!(rs.taps() > BASE_TAPS);

        let mut low = Vec::new();
        rs.process(&tone(1_000.0, 48_000.0, 9_600), &mut low);
        assert!((rms(&low[500..]) - 0.707).abs() < 0.03, "passband rms {}", rms(&low[500..]));

        rs.reset();
        let mut high = Vec::new();
        rs.process(&tone(8_000.0, 48_000.0, 9_600), &mut high);
        assert!(rms(&high[500..]) < 0.05, "alias rms {}", rms(&high[500..]));
    }

    #[test]
    fn test_channels_stay_separate() {
        let left = tone(500.0, 24_000.0, 480);
        let interleaved: Vec<f32> = left.iter().flat_map(|&l| [l, 0.0]).collect();
        let mut rs = FractionalResampler::new(24_000.0, 48_000.0, 2).unwrap();
        let mut out = Vec::new();
        rs.process(&interleaved, &mut out);
        assert_eq!(out.len() % 2, 0);
        assert!(out.iter().skip(1).step_by(2).all(|&r| r == 0.0));
        assert!(out.iter().step_by(2).any(|&l| l.abs() > 0.5));
    }

    #[test]
    fn test_equal_rates_pass_through() {
        let input = tone(440.0, 48_000.0, 100);
        let mut rs = FractionalResampler::new(48_000.0, 48_000.0, 1).unwrap();
        let mut out = Vec::new();
        rs.process(&input, &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn test_rejects_bad_rates() {
        assert!(FractionalResampler::new(0.0, 48_000.0, 1).is_err());
        assert!(FractionalResampler::new(48_000.0, f64::NAN, 1).is_err());
        assert!(FractionalResampler::new(48_000.0, 48_000.0, 0).is_err());
    }
}
