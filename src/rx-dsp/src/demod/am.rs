// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::{PI, TAU};

use num_complex::Complex;

use super::filters::DcBlocker;
use super::math::fast_atan2;

/// Carrier loop bandwidth of the synchronous detector.
const SAM_LOOP_BW_HZ: f32 = 100.0;
const SAM_DAMPING: f32 = 0.707;
/// Largest carrier offset the loop will follow.
const SAM_MAX_OFFSET_HZ: f32 = 1_000.0;

/// Envelope detector with carrier DC removed.
#[derive(Debug, Clone)]
pub struct AmDemod {
    dc: DcBlocker,
}

impl AmDemod {
    pub fn new() -> Self {
        Self {
            dc: DcBlocker::new(0.999),
        }
    }

    pub fn demodulate_into(&mut self, samples: &[Complex<f32>], out: &mut Vec<f32>) {
        out.extend(samples.iter().map(|s| self.dc.process(s.norm())));
    }
}

impl Default for AmDemod {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronous AM: a second-order PLL locks onto the carrier and the
/// in-phase component of the derotated signal is the audio.
#[derive(Debug, Clone)]
pub struct SamDemod {
    phase: f32,
    freq: f32,
    alpha: f32,
    beta: f32,
    max_freq: f32,
    dc: DcBlocker,
}

impl SamDemod {
    pub fn new(sample_rate: f32) -> Self {
        let sr = sample_rate.max(1.0);
        let wn = TAU * SAM_LOOP_BW_HZ / sr;
        Self {
            phase: 0.0,
            freq: 0.0,
            alpha: 2.0 * SAM_DAMPING * wn,
            beta: wn * wn,
            max_freq: TAU * SAM_MAX_OFFSET_HZ / sr,
            dc: DcBlocker::new(0.999),
        }
    }

    pub fn demodulate_into(&mut self, samples: &[Complex<f32>], out: &mut Vec<f32>) {
        for &s in samples {
            let y = s * Complex::from_polar(1.0, -self.phase);
            let err = fast_atan2(y.im, y.re);
            self.freq = (self.freq + self.beta * err).clamp(-self.max_freq, self.max_freq);
            self.phase += self.freq + self.alpha * err;
            if self.phase > PI {
                self.phase -= TAU;
            } else if self.phase < -PI {
                self.phase += TAU;
            }
            out.push(self.dc.process(y.re));
        }
    }

    /// Current carrier frequency estimate in radians per sample.
    pub fn carrier_step(&self) -> f32 {
        self.freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn am_signal(carrier_hz: f32, audio_hz: f32, sr: f32, len: usize) -> Vec<Complex<f32>> {
        (0..len)
            .map(|n| {
                let t = n as f32 / sr;
                let env = 0.5 * (1.0 + 0.5 * (TAU * audio_hz * t).sin());
                Complex::from_polar(env, TAU * carrier_hz * t + 0.3)
            })
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_envelope_follows_modulation() {
        let sr = 12_000.0;
        let input = am_signal(0.0, 500.0, sr, 24_000);
        let mut am = AmDemod::new();
        let mut out = Vec::new();
        am.demodulate_into(&input, &mut out);
        assert_eq!(out.len(), input.len());
        // 0.5 * 0.5 peak modulation, DC removed
        let level = rms(&out[12_000..]);
        assert!((level - 0.25 / 2f32.sqrt()).abs() < 0.02, "rms {level}");
    }

    #[test]
    fn test_am_constant_carrier_has_no_audio() {
        let mut am = AmDemod::default();
        let mut out = Vec::new();
        am.demodulate_into(&vec![Complex::new(0.3f32, 0.4); 20_000], &mut out);
        assert!(out[19_999].abs() < 1e-3);
    }

    #[test]
    fn test_sam_locks_to_offset_carrier() {
        let sr = 12_000.0;
        let input = am_signal(150.0, 500.0, sr, 36_000);
        let mut sam = SamDemod::new(sr);
        let mut out = Vec::new();
        sam.demodulate_into(&input, &mut out);
        let expected_step = TAU * 150.0 / sr;
        assert!(
            (sam.carrier_step() - expected_step).abs() < 0.1 * expected_step,
            "step {} vs {}",
            sam.carrier_step(),
            expected_step
        );
        let level = rms(&out[24_000..]);
        assert!((level - 0.25 / 2f32.sqrt()).abs() < 0.02, "rms {level}");
    }
}
