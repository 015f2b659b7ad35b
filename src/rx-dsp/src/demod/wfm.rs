// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Broadcast FM: mono and pilot-tone stereo decoding at the composite rate.

use num_complex::Complex;

use super::filters::{Biquad, DcBlocker, Deemphasis, OnePoleLowPass};
use super::math::discriminate_into;

const PILOT_HZ: f32 = 19_000.0;
const PILOT_BPF_Q: f32 = 20.0;
const PILOT_NOTCH_Q: f32 = 5.0;
/// Audio bandwidth of both matrix paths.
const AUDIO_BW_HZ: f32 = 15_000.0;
/// Butterworth 4th-order section Qs.
const BW4_Q1: f32 = 0.5412;
const BW4_Q2: f32 = 1.3066;
/// Smoothing of the pilot power estimate.
const PILOT_POWER_LP_HZ: f32 = 50.0;
/// Pilot amplitude (full deviation = 1.0) that switches stereo on / off.
const PILOT_ON_LEVEL: f32 = 0.04;
const PILOT_OFF_LEVEL: f32 = 0.02;
pub const WFM_DEVIATION_HZ: f32 = 75_000.0;
pub const DEFAULT_DEEMPHASIS_US: f32 = 50.0;

/// Mono or stereo broadcast FM decoder. Stereo output is interleaved L/R.
#[derive(Debug, Clone)]
pub struct WfmDecoder {
    stereo: bool,
    prev: Option<Complex<f32>>,
    fm_gain: f32,
    composite: Vec<f32>,

    pilot_bpf: Biquad,
    pilot_power: OnePoleLowPass,
    pilot_detected: bool,

    sum_lpf1: Biquad,
    sum_lpf2: Biquad,
    sum_notch: Biquad,
    diff_lpf1: Biquad,
    diff_lpf2: Biquad,
    diff_dc: DcBlocker,

    deemph_m: Deemphasis,
    deemph_l: Deemphasis,
    deemph_r: Deemphasis,
    dc_m: DcBlocker,
    dc_l: DcBlocker,
    dc_r: DcBlocker,
}

impl WfmDecoder {
    pub fn new(composite_rate: f32, stereo: bool, deemphasis_us: f32) -> Self {
        let sr = composite_rate.max(1.0);
        Self {
            stereo,
            prev: None,
            fm_gain: sr / (2.0 * WFM_DEVIATION_HZ),
            composite: Vec::new(),
            pilot_bpf: Biquad::band_pass(sr, PILOT_HZ, PILOT_BPF_Q),
            pilot_power: OnePoleLowPass::new(sr, PILOT_POWER_LP_HZ),
            pilot_detected: false,
            sum_lpf1: Biquad::low_pass(sr, AUDIO_BW_HZ, BW4_Q1),
            sum_lpf2: Biquad::low_pass(sr, AUDIO_BW_HZ, BW4_Q2),
            sum_notch: Biquad::notch(sr, PILOT_HZ, PILOT_NOTCH_Q),
            diff_lpf1: Biquad::low_pass(sr, AUDIO_BW_HZ, BW4_Q1),
            diff_lpf2: Biquad::low_pass(sr, AUDIO_BW_HZ, BW4_Q2),
            diff_dc: DcBlocker::new(0.9995),
            deemph_m: Deemphasis::new(sr, deemphasis_us),
            deemph_l: Deemphasis::new(sr, deemphasis_us),
            deemph_r: Deemphasis::new(sr, deemphasis_us),
            dc_m: DcBlocker::new(0.9999),
            dc_l: DcBlocker::new(0.9999),
            dc_r: DcBlocker::new(0.9999),
        }
    }

    pub fn channels(&self) -> usize {
        if self.stereo {
            2
        } else {
            1
        }
    }

    /// True while a pilot tone strong enough for stereo is present.
    pub fn pilot_detected(&self) -> bool {
        self.pilot_detected
    }

    pub fn demodulate_into(&mut self, samples: &[Complex<f32>], out: &mut Vec<f32>) {
        self.composite.clear();
        discriminate_into(samples, &mut self.prev, self.fm_gain, &mut self.composite);

        for i in 0..self.composite.len() {
            let x = self.composite[i];
            let sum = self.sum_lpf2.process(self.sum_lpf1.process(x));
            if !self.stereo {
                let mono = self.sum_notch.process(sum);
                out.push(self.dc_m.process(self.deemph_m.process(mono)).clamp(-1.0, 1.0));
                continue;
            }

            // Regenerate the 38 kHz subcarrier by squaring the normalized
            // pilot: cos 2θ = p² / mean(p²) − 1.
            let pilot = self.pilot_bpf.process(x);
            let p2 = pilot * pilot;
            let mean_p2 = self.pilot_power.process(p2);
            let amplitude = (2.0 * mean_p2).sqrt();
            if self.pilot_detected {
                self.pilot_detected = amplitude >= PILOT_OFF_LEVEL;
            } else {
                self.pilot_detected = amplitude > PILOT_ON_LEVEL;
            }
            let carrier = if mean_p2 > 1e-9 { p2 / mean_p2 - 1.0 } else { 0.0 };

            let diff_in = if self.pilot_detected { x * carrier * 2.0 } else { 0.0 };
            let diff = self
                .diff_dc
                .process(self.diff_lpf2.process(self.diff_lpf1.process(diff_in)));

            let left = self.dc_l.process(self.deemph_l.process(sum + diff));
            let right = self.dc_r.process(self.deemph_r.process(sum - diff));
            out.push(left.clamp(-1.0, 1.0));
            out.push(right.clamp(-1.0, 1.0));
        }
    }
}
