// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use tracing::debug;

use crate::error::DspError;
use crate::halfband::{HalfbandDecimator, HalfbandSpec, HALFBAND_TABLE, WIDEST_PASSBAND};

/// The chain never decimates below this rate.
pub const MIN_OUTPUT_RATE: f64 = 15_800.0;

/// Cascade of halfband stages, each halving the rate.
pub struct DecimationChain {
    input_rate: f64,
    output_rate: f64,
    stages: Vec<HalfbandDecimator>,
}

impl DecimationChain {
    /// Pick the stage sequence that brings `input_rate` down as far as
    /// possible while keeping `bw_max` Hz inside every stage's passband.
    ///
    /// Each step takes the cheapest design that still carries the bandwidth
    /// at the current rate. Deterministic for a given input.
    pub fn plan(input_rate: f64, bw_max: f64) -> Result<Vec<HalfbandSpec>, DspError> {
        if !bw_max.is_finite() || bw_max <= 0.0 {
            return Err(DspError::Configuration(format!(
                "bandwidth must be positive, got {bw_max} Hz"
            )));
        }
        // Not even the widest stage carries the bandwidth at the input rate.
        if !input_rate.is_finite() || input_rate < bw_max / WIDEST_PASSBAND {
            return Err(DspError::Configuration(format!(
                "input rate {input_rate} Hz cannot carry {bw_max} Hz of bandwidth"
            )));
        }

        let mut stages = Vec::new();
        let mut rate = input_rate;
        while rate > MIN_OUTPUT_RATE {
            let Some(spec) = HALFBAND_TABLE
                .iter()
                .find(|spec| rate >= bw_max / spec.passband)
            else {
                break;
            };
            stages.push(*spec);
            rate /= 2.0;
        }
        Ok(stages)
    }

    pub fn new(input_rate: f64, bw_max: f64) -> Result<Self, DspError> {
        let plan = Self::plan(input_rate, bw_max)?;
        let output_rate = input_rate / f64::from(1u32 << plan.len());
        debug!(
            "decimation {} Hz -> {} Hz for {} Hz bandwidth, taps {:?}",
            input_rate,
            output_rate,
            bw_max,
            plan.iter().map(|s| s.taps).collect::<Vec<_>>()
        );
        Ok(Self {
            input_rate,
            output_rate,
            stages: plan.into_iter().map(HalfbandDecimator::new).collect(),
        })
    }

    pub fn input_rate(&self) -> f64 {
        self.input_rate
    }

    pub fn output_rate(&self) -> f64 {
        self.output_rate
    }

    pub fn factor(&self) -> usize {
        1 << self.stages.len()
    }

    pub fn stage_taps(&self) -> Vec<usize> {
        self.stages.iter().map(HalfbandDecimator::taps).collect()
    }

    /// Run every stage over `buf` in place and return the output length.
    pub fn process(&mut self, buf: &mut [Complex<f32>]) -> usize {
        let mut len = buf.len();
        for stage in &mut self.stages {
            len = stage.decimate_in_place(&mut buf[..len]);
        }
        len
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_sdriq_ssb() {
        let plan = DecimationChain::plan(196_078.0, 5_000.0).unwrap();
        let taps: Vec<usize> = plan.iter().map(|s| s.taps).collect();
        assert_eq!(taps, vec![11, 11, 19]);
    }

    #[test]
    fn test_plan_wideband_fm() {
        let chain = DecimationChain::new(2_048_000.0, 100_000.0).unwrap();
        assert_eq!(chain.stage_taps(), vec![11, 19]);
        assert_eq!(chain.output_rate(), 512_000.0);
        assert_eq!(chain.factor(), 4);
    }

    #[test]
    fn test_plan_is_deterministic() {
        for &(fs, bw) in &[(250_000.0, 2_000.0), (2_000_000.0, 12_500.0), (62_500.0, 10_000.0)] {
            assert_eq!(
                DecimationChain::plan(fs, bw).unwrap(),
                DecimationChain::plan(fs, bw).unwrap()
            );
        }
    }

    #[test]
    fn test_plan_respects_rate_floor() {
        let chain = DecimationChain::new(196_078.0, 500.0).unwrap();
        // 196078 / 8 = 24509.75 > floor, / 16 = 12254.875 <= floor.
        assert_eq!(chain.factor(), 16);
        assert!(chain.output_rate() / 2.0 < MIN_OUTPUT_RATE);
    }

    #[test]
    fn test_plan_every_stage_carries_bandwidth() {
        let fs = 1_250_000.0;
        let bw = 10_000.0;
        let mut rate = fs;
        for spec in DecimationChain::plan(fs, bw).unwrap() {
            assert!(rate * spec.passband >= bw, "{} taps at {} Hz", spec.taps, rate);
            rate /= 2.0;
        }
    }

    #[test]
    fn test_plan_fails_below_widest_passband() {
        // 10 kHz needs at least 10000 / 0.1664 = 60096 Hz for the first stage.
        assert!(matches!(
            DecimationChain::plan(32_000.0, 10_000.0),
            Err(DspError::Configuration(_))
        ));
        assert!(DecimationChain::plan(60_000.0, 10_000.0).is_err());
        assert_eq!(DecimationChain::plan(60_100.0, 10_000.0).unwrap().len(), 1);
        assert_eq!(DecimationChain::plan(60_100.0, 10_000.0).unwrap()[0].taps, 51);
    }

    #[test]
    fn test_plan_no_stages_at_rate_floor() {
        assert!(DecimationChain::plan(14_000.0, 2_000.0).unwrap().is_empty());
    }

    #[test]
    fn test_plan_rejects_unreachable_bandwidth() {
        assert!(matches!(
            DecimationChain::plan(48_000.0, 100_000.0),
            Err(DspError::Configuration(_))
        ));
        assert!(matches!(
            DecimationChain::plan(48_000.0, 0.0),
            Err(DspError::Configuration(_))
        ));
        assert!(DecimationChain::new(48_000.0, -1.0).is_err());
    }

    #[test]
    fn test_process_divides_length() {
        let mut chain = DecimationChain::new(196_078.0, 5_000.0).unwrap();
        let mut buf = vec![Complex::new(0.25f32, 0.0); 2048];
        assert_eq!(chain.process(&mut buf), 2048 / 8);
        assert_eq!(chain.process(&mut buf), 2048 / 8);
    }

    #[test]
    fn test_process_short_block_is_safety_noop() {
        let mut chain = DecimationChain::new(196_078.0, 5_000.0).unwrap();
        let mut buf = vec![Complex::new(0.25f32, 0.0); 8];
        // Every stage refuses the block but still reports half its length.
        assert_eq!(chain.process(&mut buf), 1);
    }
}
