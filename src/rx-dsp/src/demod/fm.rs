// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

use super::filters::DcBlocker;
use super::math::discriminate_into;

/// Peak deviation of narrowband FM that maps to full-scale audio.
pub const NFM_DEVIATION_HZ: f32 = 5_000.0;

/// Narrowband FM discriminator.
#[derive(Debug, Clone)]
pub struct FmDemod {
    prev: Option<Complex<f32>>,
    gain: f32,
    dc: DcBlocker,
}

impl FmDemod {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            prev: None,
            gain: sample_rate.max(1.0) / (2.0 * NFM_DEVIATION_HZ),
            dc: DcBlocker::new(0.9995),
        }
    }

    pub fn demodulate_into(&mut self, samples: &[Complex<f32>], out: &mut Vec<f32>) {
        let start = out.len();
        discriminate_into(samples, &mut self.prev, self.gain, out);
        for v in &mut out[start..] {
            *v = self.dc.process(*v);
        }
    }
}
