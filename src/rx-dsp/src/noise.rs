// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Impulse blankers and adaptive noise reduction.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::command::PipelineCommand;
use crate::stage::{BlockContext, Stage};

/// Time constant of the reference magnitude average.
const BLANKER_AVG_TAU_S: f32 = 0.02;
/// Time constant of the complex average that replaces outliers.
const AVERAGING_TAU_S: f32 = 0.001;
const NLMS_EPSILON: f32 = 1e-6;

fn one_pole_alpha(sample_rate: f64, tau_s: f32) -> f32 {
    let sr = sample_rate.max(1.0) as f32;
    1.0 - (-1.0 / (sr * tau_s)).exp()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseBlankerSettings {
    /// Impulse blanker with lookahead.
    pub enabled: bool,
    /// Trigger level as a multiple of the average magnitude.
    pub threshold: f32,
    /// Width of the blanked window around an impulse, in microseconds.
    pub width_us: f32,
    /// Averaging blanker.
    pub averaging: bool,
    pub averaging_threshold: f32,
}

impl Default for NoiseBlankerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 10.0,
            width_us: 100.0,
            averaging: false,
            averaging_threshold: 4.0,
        }
    }
}

impl NoiseBlankerSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold <= 1.0 || self.averaging_threshold <= 1.0 {
            return Err("[dsp.noise_blanker] thresholds must be greater than 1".into());
        }
        if !(1.0..=10_000.0).contains(&self.width_us) {
            return Err("[dsp.noise_blanker].width_us must be in 1..=10000".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Impulse blanker
// ---------------------------------------------------------------------------

/// Zeroes a window around every impulse. The output is delayed by half the
/// window so samples leading up to the impulse are blanked as well.
pub struct NoiseBlanker {
    settings: NoiseBlankerSettings,
    sample_rate: f64,
    delay: Vec<Complex<f32>>,
    pos: usize,
    avg_mag: Option<f32>,
    alpha: f32,
    remaining: usize,
    blanked: u64,
}

impl NoiseBlanker {
    pub fn new(settings: NoiseBlankerSettings, sample_rate: f64) -> Self {
        let mut nb = Self {
            settings,
            sample_rate,
            delay: Vec::new(),
            pos: 0,
            avg_mag: None,
            alpha: one_pole_alpha(sample_rate, BLANKER_AVG_TAU_S),
            remaining: 0,
            blanked: 0,
        };
        nb.apply(settings);
        nb
    }

    fn apply(&mut self, settings: NoiseBlankerSettings) {
        self.settings = settings;
        let half = (f64::from(settings.width_us) * 1e-6 * self.sample_rate / 2.0).ceil() as usize;
        let half = half.max(1);
        if half != self.delay.len() {
            self.delay = vec![Complex::new(0.0, 0.0); half];
            self.pos = 0;
            self.remaining = 0;
        }
    }

    /// Output delay in samples.
    pub fn lookahead(&self) -> usize {
        self.delay.len()
    }

    pub fn blanked_samples(&self) -> u64 {
        self.blanked
    }
}

impl Stage for NoiseBlanker {
    fn name(&self) -> &'static str {
        "noise_blanker"
    }

    fn process(&mut self, block: &mut [Complex<f32>], _ctx: &mut BlockContext) {
        if !self.settings.enabled {
            return;
        }
        let window = 2 * self.delay.len() + 1;
        for s in block.iter_mut() {
            let x = *s;
            let mag = x.norm();
            match self.avg_mag {
                Some(avg) if avg > 0.0 && mag > self.settings.threshold * avg => {
                    self.remaining = window;
                }
                Some(avg) => self.avg_mag = Some(avg + self.alpha * (mag - avg)),
                None => self.avg_mag = Some(mag),
            }

            let mut out = self.delay[self.pos];
            self.delay[self.pos] = x;
            self.pos = (self.pos + 1) % self.delay.len();
            if self.remaining > 0 {
                self.remaining -= 1;
                self.blanked += 1;
                out = Complex::new(0.0, 0.0);
            }
            *s = out;
        }
    }

    fn reset(&mut self) {
        self.delay.fill(Complex::new(0.0, 0.0));
        self.pos = 0;
        self.avg_mag = None;
        self.remaining = 0;
    }

    fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        match cmd {
            PipelineCommand::SetNoiseBlanker(settings) => {
                self.apply(*settings);
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Averaging blanker
// ---------------------------------------------------------------------------

/// Replaces outliers by the running complex average of the signal.
pub struct AveragingBlanker {
    settings: NoiseBlankerSettings,
    avg: Complex<f32>,
    avg_mag: Option<f32>,
    fast_alpha: f32,
    slow_alpha: f32,
    replaced: u64,
}

impl AveragingBlanker {
    pub fn new(settings: NoiseBlankerSettings, sample_rate: f64) -> Self {
        Self {
            settings,
            avg: Complex::new(0.0, 0.0),
            avg_mag: None,
            fast_alpha: one_pole_alpha(sample_rate, AVERAGING_TAU_S),
            slow_alpha: one_pole_alpha(sample_rate, BLANKER_AVG_TAU_S),
            replaced: 0,
        }
    }

    pub fn replaced_samples(&self) -> u64 {
        self.replaced
    }
}

impl Stage for AveragingBlanker {
    fn name(&self) -> &'static str {
        "averaging_blanker"
    }

    fn process(&mut self, block: &mut [Complex<f32>], _ctx: &mut BlockContext) {
        if !self.settings.averaging {
            return;
        }
        for s in block.iter_mut() {
            let mag = s.norm();
            match self.avg_mag {
                Some(avg) if avg > 0.0 && mag > self.settings.averaging_threshold * avg => {
                    *s = self.avg;
                    self.replaced += 1;
                }
                Some(avg) => {
                    self.avg_mag = Some(avg + self.slow_alpha * (mag - avg));
                    self.avg += (*s - self.avg) * self.fast_alpha;
                }
                None => {
                    self.avg_mag = Some(mag);
                    self.avg = *s;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.avg = Complex::new(0.0, 0.0);
        self.avg_mag = None;
    }

    fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        match cmd {
            PipelineCommand::SetNoiseBlanker(settings) => {
                self.settings = *settings;
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// NLMS noise reduction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReductionSettings {
    pub enabled: bool,
    /// Predictor length.
    pub taps: usize,
    /// Decorrelation delay in samples.
    pub delay: usize,
    /// Normalized step size.
    pub mu: f32,
}

impl Default for NoiseReductionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            taps: 64,
            delay: 16,
            mu: 0.05,
        }
    }
}

impl NoiseReductionSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(8..=512).contains(&self.taps) {
            return Err("[dsp.noise_reduction].taps must be in 8..=512".into());
        }
        if !(1..=512).contains(&self.delay) {
            return Err("[dsp.noise_reduction].delay must be in 1..=512".into());
        }
        if !(self.mu > 0.0 && self.mu < 1.0) {
            return Err("[dsp.noise_reduction].mu must be in (0, 1)".into());
        }
        Ok(())
    }
}

/// Complex NLMS adaptive line enhancer.
///
/// Predicts the current sample from a delayed copy of the input; the
/// prediction keeps the correlated part of the signal and drops the noise.
pub struct NoiseReduction {
    settings: NoiseReductionSettings,
    weights: Vec<Complex<f32>>,
    /// Decorrelation delay line.
    delay: Vec<Complex<f32>>,
    delay_pos: usize,
    /// Reference history, stored twice so the window is always contiguous.
    hist: Vec<Complex<f32>>,
    hist_pos: usize,
    power: f32,
}

impl NoiseReduction {
    pub fn new(settings: NoiseReductionSettings) -> Self {
        let mut nr = Self {
            settings,
            weights: Vec::new(),
            delay: Vec::new(),
            delay_pos: 0,
            hist: Vec::new(),
            hist_pos: 0,
            power: 0.0,
        };
        nr.apply(settings);
        nr
    }

    fn apply(&mut self, settings: NoiseReductionSettings) {
        let resized = settings.taps != self.settings.taps
            || settings.delay != self.settings.delay
            || self.weights.is_empty();
        self.settings = settings;
        if resized {
            let taps = settings.taps.max(1);
            self.weights = vec![Complex::new(0.0, 0.0); taps];
            self.delay = vec![Complex::new(0.0, 0.0); settings.delay.max(1)];
            self.hist = vec![Complex::new(0.0, 0.0); 2 * taps];
            self.delay_pos = 0;
            self.hist_pos = 0;
            self.power = 0.0;
        }
    }

    fn push_reference(&mut self, x: Complex<f32>) {
        let taps = self.weights.len();
        let old = self.hist[self.hist_pos];
        self.power = (self.power - old.norm_sqr() + x.norm_sqr()).max(0.0);
        self.hist[self.hist_pos] = x;
        self.hist[self.hist_pos + taps] = x;
        self.hist_pos = (self.hist_pos + 1) % taps;
    }
}

impl Stage for NoiseReduction {
    fn name(&self) -> &'static str {
        "noise_reduction"
    }

    fn process(&mut self, block: &mut [Complex<f32>], _ctx: &mut BlockContext) {
        if !self.settings.enabled {
            return;
        }
        let taps = self.weights.len();
        let mu = self.settings.mu;
        for s in block.iter_mut() {
            let x = *s;
            let reference = self.delay[self.delay_pos];
            self.delay[self.delay_pos] = x;
            self.delay_pos = (self.delay_pos + 1) % self.delay.len();
            self.push_reference(reference);

            let window = &self.hist[self.hist_pos..self.hist_pos + taps];
            let y: Complex<f32> = self
                .weights
                .iter()
                .zip(window)
                .map(|(w, h)| w * h)
                .sum();
            let err = x - y;
            let step = err * (mu / (NLMS_EPSILON + self.power));
            for (w, h) in self.weights.iter_mut().zip(window) {
                *w += step * h.conj();
            }
            *s = y;
        }
    }

    fn reset(&mut self) {
        self.weights.fill(Complex::new(0.0, 0.0));
        self.delay.fill(Complex::new(0.0, 0.0));
        self.hist.fill(Complex::new(0.0, 0.0));
        self.power = 0.0;
    }

    fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        match cmd {
            PipelineCommand::SetNoiseReduction(settings) => {
                self.apply(*settings);
                true
            }
            _ => false,
        }
    }
}
