// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::command::PipelineCommand;
use crate::stage::{BlockContext, Stage};

/// Measured front-end imbalance to undo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IqBalanceSettings {
    pub enabled: bool,
    /// Q amplitude relative to I.
    pub gain: f32,
    /// Q phase error in degrees.
    pub phase_deg: f32,
}

impl Default for IqBalanceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            gain: 1.0,
            phase_deg: 0.0,
        }
    }
}

impl IqBalanceSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.5..=2.0).contains(&self.gain) {
            return Err("[dsp.iq_balance].gain must be in 0.5..=2.0".into());
        }
        if self.phase_deg.abs() > 30.0 {
            return Err("[dsp.iq_balance].phase_deg must be within ±30".into());
        }
        Ok(())
    }
}

/// Gain and phase correction of the Q branch.
///
/// With `i = cos θ` and `q = g·sin(θ + φ)`, the corrected branch is
/// `(q/g − i·sin φ) / cos φ`.
pub struct IqBalance {
    settings: IqBalanceSettings,
    inv_gain: f32,
    sin_phi: f32,
    inv_cos_phi: f32,
}

impl IqBalance {
    pub fn new(settings: IqBalanceSettings) -> Self {
        let mut stage = Self {
            settings,
            inv_gain: 1.0,
            sin_phi: 0.0,
            inv_cos_phi: 1.0,
        };
        stage.apply(settings);
        stage
    }

    fn apply(&mut self, settings: IqBalanceSettings) {
        self.settings = settings;
        self.inv_gain = 1.0 / settings.gain.max(1e-3);
        let (sin_phi, cos_phi) = settings.phase_deg.to_radians().sin_cos();
        self.sin_phi = sin_phi;
        self.inv_cos_phi = 1.0 / cos_phi.max(1e-3);
    }
}

impl Stage for IqBalance {
    fn name(&self) -> &'static str {
        "iq_balance"
    }

    fn process(&mut self, block: &mut [Complex<f32>], _ctx: &mut BlockContext) {
        if !self.settings.enabled {
            return;
        }
        for s in block.iter_mut() {
            s.im = (s.im * self.inv_gain - s.re * self.sin_phi) * self.inv_cos_phi;
        }
    }

    fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        match cmd {
            PipelineCommand::SetIqBalance(settings) => {
                self.apply(*settings);
                true
            }
            _ => false,
        }
    }
}
