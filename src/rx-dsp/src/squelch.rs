// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

use crate::command::PipelineCommand;
use crate::stage::{BlockContext, Stage};

/// Reading reported for an all-zero block.
pub const SIGNAL_FLOOR_DB: f32 = -200.0;

/// Average power of a block in dBFS (full scale = unit magnitude).
pub fn block_power_db(block: &[Complex<f32>]) -> f32 {
    if block.is_empty() {
        return SIGNAL_FLOOR_DB;
    }
    let power = block.iter().map(|s| s.norm_sqr()).sum::<f32>() / block.len() as f32;
    if power <= 0.0 {
        SIGNAL_FLOOR_DB
    } else {
        (10.0 * power.log10()).max(SIGNAL_FLOOR_DB)
    }
}

/// S-meter and squelch gate.
///
/// Always records the block level in the context; with a threshold set,
/// blocks below it are zeroed and flagged as muted.
pub struct Squelch {
    threshold_db: Option<f32>,
    last_db: f32,
}

impl Squelch {
    pub fn new(threshold_db: Option<f32>) -> Self {
        Self {
            threshold_db,
            last_db: SIGNAL_FLOOR_DB,
        }
    }

    pub fn threshold_db(&self) -> Option<f32> {
        self.threshold_db
    }

    pub fn last_db(&self) -> f32 {
        self.last_db
    }
}

impl Stage for Squelch {
    fn name(&self) -> &'static str {
        "squelch"
    }

    fn process(&mut self, block: &mut [Complex<f32>], ctx: &mut BlockContext) {
        let level = block_power_db(block);
        self.last_db = level;
        ctx.signal_db = level;
        if let Some(threshold) = self.threshold_db {
            if level < threshold {
                block.fill(Complex::new(0.0, 0.0));
                ctx.muted = true;
            }
        }
    }

    fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        match cmd {
            PipelineCommand::SetSquelch(threshold) => {
                self.threshold_db = *threshold;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_full_scale_is_zero_db() {
        let block = vec![Complex::new(1.0f32, 0.0); 32];
        assert!(block_power_db(&block).abs() < 1e-5);
        let block = vec![Complex::new(0.1f32, 0.0); 32];
        assert!((block_power_db(&block) + 20.0).abs() < 1e-3);
        assert_eq!(block_power_db(&[Complex::new(0.0, 0.0); 4]), SIGNAL_FLOOR_DB);
    }

    #[test]
    fn test_mutes_below_threshold() {
        let mut sq = Squelch::new(Some(-30.0));
        let mut ctx = BlockContext::new(12_000.0);
        let mut block = vec![Complex::new(0.01f32, 0.01); 64];
        sq.process(&mut block, &mut ctx);
        assert!(ctx.muted);
        assert!(block.iter().all(|s| *s == Complex::new(0.0, 0.0)));
        assert!(ctx.signal_db < -30.0);
    }

    #[test]
    fn test_opens_above_threshold() {
        let mut sq = Squelch::new(Some(-30.0));
        let mut ctx = BlockContext::new(12_000.0);
        let mut block = vec![Complex::new(0.5f32, 0.0); 64];
        sq.process(&mut block, &mut ctx);
        assert!(!ctx.muted);
        assert_eq!(block[0], Complex::new(0.5, 0.0));
    }

    #[test]
    fn test_meter_only_without_threshold() {
        let mut sq = Squelch::new(Some(0.0));
        assert!(sq.configure(&PipelineCommand::SetSquelch(None)));
        let mut ctx = BlockContext::new(12_000.0);
        let mut block = vec![Complex::new(0.001f32, 0.0); 8];
        sq.process(&mut block, &mut ctx);
        assert!(!ctx.muted);
        assert!((sq.last_db() + 60.0).abs() < 1e-3);
    }
}
