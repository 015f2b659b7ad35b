// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Log-domain AGC with lookahead delay, sliding peak window and optional hang.

use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::PipelineCommand;
use crate::stage::{BlockContext, Stage};

const ATTACK_RISE_S: f64 = 0.002;
const ATTACK_FALL_S: f64 = 0.005;
const DECAY_RISEFALL_RATIO: f64 = 0.3;
const RELEASE_S: f64 = 0.05;
const DELAY_S: f64 = 0.015;
const WINDOW_S: f64 = 0.018;
const MAX_BUFFER: usize = 2048;
const OUT_SCALE: f64 = 0.7;
const MIN_CONSTANT: f64 = 1e-8;
/// log10 of [`MIN_CONSTANT`].
const MIN_LOG: f64 = -8.0;
const INITIAL_AVERAGE: f64 = -5.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgcMode {
    Off,
    Fast,
    #[default]
    Med,
    Slow,
    Long,
}

impl AgcMode {
    pub fn decay_ms(&self) -> u32 {
        match self {
            AgcMode::Off | AgcMode::Fast => 100,
            AgcMode::Med => 500,
            AgcMode::Slow => 1000,
            AgcMode::Long => 2000,
        }
    }

    pub fn uses_hang(&self) -> bool {
        matches!(self, AgcMode::Slow | AgcMode::Long)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgcSettings {
    pub mode: AgcMode,
    /// Knee in dB relative to full scale.
    pub threshold_db: i32,
    /// Output rise above the knee, in percent of the input rise.
    pub slope: i32,
    /// Gain used when the AGC is off.
    pub manual_gain_db: i32,
    /// Overrides the mode's decay time.
    pub decay_ms: Option<u32>,
}

impl Default for AgcSettings {
    fn default() -> Self {
        Self {
            mode: AgcMode::Med,
            threshold_db: -100,
            slope: 0,
            manual_gain_db: 30,
            decay_ms: None,
        }
    }
}

impl AgcSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(-160..=0).contains(&self.threshold_db) {
            return Err("[dsp.agc].threshold_db must be in -160..=0".into());
        }
        if !(0..=100).contains(&self.slope) {
            return Err("[dsp.agc].slope must be in 0..=100".into());
        }
        if !(-20..=120).contains(&self.manual_gain_db) {
            return Err("[dsp.agc].manual_gain_db must be in -20..=120".into());
        }
        if matches!(self.decay_ms, Some(ms) if !(20..=5000).contains(&ms)) {
            return Err("[dsp.agc].decay_ms must be in 20..=5000".into());
        }
        Ok(())
    }
}

fn alpha(sample_rate: f64, tau_s: f64) -> f64 {
    1.0 - (-1.0 / (sample_rate * tau_s)).exp()
}

pub struct Agc {
    settings: AgcSettings,
    sample_rate: f64,
    enabled: bool,

    use_hang: bool,
    knee: f64,
    gain_slope: f64,
    fixed_gain: f64,
    manual_gain: f32,
    attack_rise_alpha: f64,
    attack_fall_alpha: f64,
    decay_rise_alpha: f64,
    decay_fall_alpha: f64,
    hang_samples: usize,

    attack_ave: f64,
    decay_ave: f64,
    peak: f64,
    hang_timer: usize,
    sig_delay: Vec<Complex<f32>>,
    delay_pos: usize,
    mag_buf: Vec<f64>,
    mag_pos: usize,
}

impl Agc {
    pub fn new(settings: AgcSettings, sample_rate: f64) -> Self {
        let mut agc = Self {
            settings,
            sample_rate,
            enabled: false,
            use_hang: false,
            knee: 0.0,
            gain_slope: 0.0,
            fixed_gain: 0.0,
            manual_gain: 1.0,
            attack_rise_alpha: 0.0,
            attack_fall_alpha: 0.0,
            decay_rise_alpha: 0.0,
            decay_fall_alpha: 0.0,
            hang_samples: 0,
            attack_ave: INITIAL_AVERAGE,
            decay_ave: INITIAL_AVERAGE,
            peak: MIN_LOG,
            hang_timer: 0,
            sig_delay: Vec::new(),
            delay_pos: 0,
            mag_buf: Vec::new(),
            mag_pos: 0,
        };
        agc.reconfigure(settings, sample_rate);
        agc
    }

    pub fn settings(&self) -> AgcSettings {
        self.settings
    }

    pub fn delay_samples(&self) -> usize {
        self.sig_delay.len()
    }

    /// Re-derive every constant. Live averages are kept unless the buffer
    /// lengths change.
    pub fn reconfigure(&mut self, settings: AgcSettings, sample_rate: f64) {
        self.enabled = false;
        self.settings = settings;
        self.sample_rate = sample_rate.max(1.0);
        let sr = self.sample_rate;

        let decay_s = f64::from(settings.decay_ms.unwrap_or_else(|| settings.mode.decay_ms())) * 1e-3;
        self.use_hang = settings.mode.uses_hang();
        self.knee = f64::from(settings.threshold_db) / 20.0;
        self.gain_slope = f64::from(settings.slope) / 100.0;
        self.fixed_gain = OUT_SCALE * 10f64.powf(self.knee * (self.gain_slope - 1.0));
        self.manual_gain = (OUT_SCALE * 10f64.powf(f64::from(settings.manual_gain_db) / 20.0)) as f32;
        self.attack_rise_alpha = alpha(sr, ATTACK_RISE_S);
        self.attack_fall_alpha = alpha(sr, ATTACK_FALL_S);
        self.decay_rise_alpha = alpha(sr, decay_s * DECAY_RISEFALL_RATIO);
        self.decay_fall_alpha = if self.use_hang {
            alpha(sr, RELEASE_S)
        } else {
            alpha(sr, decay_s)
        };
        self.hang_samples = (sr * decay_s) as usize;

        let delay = ((sr * DELAY_S) as usize).clamp(1, MAX_BUFFER);
        let window = ((sr * WINDOW_S) as usize).clamp(1, MAX_BUFFER);
        if delay != self.sig_delay.len() || window != self.mag_buf.len() {
            self.sig_delay = vec![Complex::new(0.0, 0.0); delay];
            self.mag_buf = vec![MIN_LOG; window];
            self.clear_live();
        }

        debug!(
            "agc {:?} at {} Hz: knee {} slope {} delay {} window {}",
            settings.mode, sr, self.knee, self.gain_slope, delay, window
        );
        self.enabled = settings.mode != AgcMode::Off;
    }

    fn clear_live(&mut self) {
        self.attack_ave = INITIAL_AVERAGE;
        self.decay_ave = INITIAL_AVERAGE;
        self.peak = MIN_LOG;
        self.hang_timer = 0;
        self.delay_pos = 0;
        self.mag_pos = 0;
        self.sig_delay.fill(Complex::new(0.0, 0.0));
        self.mag_buf.fill(MIN_LOG);
    }

    fn next_gain(&mut self, input: Complex<f32>) -> f64 {
        let mag = f64::from(input.re.abs().max(input.im.abs()));
        let mag = (mag + MIN_CONSTANT).log10();

        let expiring = self.mag_buf[self.mag_pos];
        self.mag_buf[self.mag_pos] = mag;
        self.mag_pos = (self.mag_pos + 1) % self.mag_buf.len();
        if mag > self.peak {
            self.peak = mag;
        } else if expiring == self.peak {
            self.peak = self.mag_buf.iter().copied().fold(MIN_LOG, f64::max);
        }
        let peak = self.peak;

        let attack = if peak > self.attack_ave {
            self.attack_rise_alpha
        } else {
            self.attack_fall_alpha
        };
        self.attack_ave += attack * (peak - self.attack_ave);

        if peak > self.decay_ave {
            self.decay_ave += self.decay_rise_alpha * (peak - self.decay_ave);
            self.hang_timer = 0;
        } else if self.use_hang && self.hang_timer < self.hang_samples {
            self.hang_timer += 1;
        } else {
            self.decay_ave += self.decay_fall_alpha * (peak - self.decay_ave);
        }

        let level = self.attack_ave.max(self.decay_ave);
        if level <= self.knee {
            self.fixed_gain
        } else {
            OUT_SCALE * 10f64.powf(level * (self.gain_slope - 1.0))
        }
    }
}

impl Stage for Agc {
    fn name(&self) -> &'static str {
        "agc"
    }

    fn process(&mut self, block: &mut [Complex<f32>], ctx: &mut BlockContext) {
        if ctx.sample_rate != self.sample_rate {
            self.reconfigure(self.settings, ctx.sample_rate);
        }
        if !self.enabled {
            for s in block.iter_mut() {
                *s *= self.manual_gain;
            }
            return;
        }
        for s in block.iter_mut() {
            let input = *s;
            let delayed = self.sig_delay[self.delay_pos];
            self.sig_delay[self.delay_pos] = input;
            self.delay_pos = (self.delay_pos + 1) % self.sig_delay.len();
            let gain = self.next_gain(input);
            *s = delayed * gain as f32;
        }
    }

    fn reset(&mut self) {
        self.clear_live();
    }

    fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        match cmd {
            PipelineCommand::SetAgc(settings) => {
                self.reconfigure(*settings, self.sample_rate);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 8_000.0;

    fn run(agc: &mut Agc, input: Complex<f32>, blocks: usize) -> Vec<Vec<Complex<f32>>> {
        let mut ctx = BlockContext::new(SR);
        (0..blocks)
            .map(|_| {
                let mut block = vec![input; 1024];
                agc.process(&mut block, &mut ctx);
                block
            })
            .collect()
    }

    fn settings(mode: AgcMode) -> AgcSettings {
        AgcSettings {
            mode,
            ..AgcSettings::default()
        }
    }

    #[test]
    fn test_steady_state_is_bit_identical() {
        for mode in [AgcMode::Fast, AgcMode::Med, AgcMode::Slow] {
            let mut agc = Agc::new(settings(mode), SR);
            let out = run(&mut agc, Complex::new(0.1, 0.05), 128);
            assert_eq!(out[126], out[127], "{mode:?} did not settle");
        }
    }

    #[test]
    fn test_level_converges_to_out_scale() {
        let mut agc = Agc::new(settings(AgcMode::Fast), SR);
        let out = run(&mut agc, Complex::new(0.1, 0.05), 64);
        let last = out[63][1023];
        assert!((last.re - 0.7).abs() < 1e-3, "re {}", last.re);
        assert!((last.im - 0.35).abs() < 1e-3, "im {}", last.im);
    }

    #[test]
    fn test_fixed_gain_below_knee() {
        let mut agc = Agc::new(
            AgcSettings {
                mode: AgcMode::Fast,
                threshold_db: -20,
                ..AgcSettings::default()
            },
            SR,
        );
        let out = run(&mut agc, Complex::new(0.01, 0.0), 64);
        // 0.7 * 10^(knee * (0 - 1)) with knee = -1
        assert!((out[63][0].re - 0.07).abs() < 1e-4, "re {}", out[63][0].re);
    }

    #[test]
    fn test_off_applies_manual_gain_without_delay() {
        let mut agc = Agc::new(
            AgcSettings {
                mode: AgcMode::Off,
                manual_gain_db: 20,
                ..AgcSettings::default()
            },
            SR,
        );
        let out = run(&mut agc, Complex::new(0.01, -0.02), 1);
        assert!((out[0][0].re - 0.07).abs() < 1e-6);
        assert!((out[0][0].im + 0.14).abs() < 1e-6);
    }

    #[test]
    fn test_output_is_delayed() {
        let mut agc = Agc::new(settings(AgcMode::Fast), SR);
        let delay = agc.delay_samples();
        assert_eq!(delay, 120);
        let mut block = vec![Complex::new(0.0f32, 0.0); 512];
        block[10] = Complex::new(0.5, 0.0);
        agc.process(&mut block, &mut BlockContext::new(SR));
        let nonzero: Vec<usize> = block
            .iter()
            .enumerate()
            .filter(|(_, s)| s.re != 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(nonzero, vec![10 + delay]);
    }

    #[test]
    fn test_rate_change_resizes_buffers() {
        let mut agc = Agc::new(settings(AgcMode::Med), SR);
        assert_eq!(agc.delay_samples(), 120);
        let mut block = vec![Complex::new(0.1f32, 0.0); 64];
        agc.process(&mut block, &mut BlockContext::new(48_000.0));
        assert_eq!(agc.delay_samples(), 720);
        assert!(agc.configure(&PipelineCommand::SetAgc(settings(AgcMode::Long))));
        assert_eq!(agc.settings().mode, AgcMode::Long);
        assert_eq!(agc.delay_samples(), 720);
    }

    #[test]
    fn test_validate() {
        assert!(AgcSettings::default().validate().is_ok());
        let bad = AgcSettings {
            slope: 150,
            ..AgcSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
