// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Halfband decimate-by-2 filters.
//!
//! Every filter in [`HALFBAND_TABLE`] has `4m + 3` taps, so the centre tap
//! sits on an odd index and all other non-zero taps sit on even indices.

use std::f64::consts::PI;

use num_complex::Complex;

/// Tap count and usable passband (fraction of the input rate) of one design.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfbandSpec {
    pub taps: usize,
    pub passband: f64,
}

/// Available designs, cheapest first.
pub const HALFBAND_TABLE: [HalfbandSpec; 11] = [
    HalfbandSpec { taps: 11, passband: 0.0567 },
    HalfbandSpec { taps: 15, passband: 0.0902 },
    HalfbandSpec { taps: 19, passband: 0.1134 },
    HalfbandSpec { taps: 23, passband: 0.1289 },
    HalfbandSpec { taps: 27, passband: 0.1383 },
    HalfbandSpec { taps: 31, passband: 0.1468 },
    HalfbandSpec { taps: 35, passband: 0.1526 },
    HalfbandSpec { taps: 39, passband: 0.1569 },
    HalfbandSpec { taps: 43, passband: 0.1611 },
    HalfbandSpec { taps: 47, passband: 0.1641 },
    HalfbandSpec { taps: 51, passband: 0.1664 },
];

/// Widest passband any single stage can carry.
pub const WIDEST_PASSBAND: f64 = HALFBAND_TABLE[HALFBAND_TABLE.len() - 1].passband;

/// Full coefficient vector for a `taps`-long halfband lowpass.
///
/// Windowed sinc at a quarter of the input rate. Even offsets from the
/// centre are forced to exactly zero, the centre tap is 0.5 and the
/// remaining taps are scaled so the DC gain is 1.
pub fn halfband_coeffs(taps: usize) -> Vec<f32> {
    let taps = taps.max(3) | 1;
    let center = (taps - 1) / 2;
    // Window spans taps + 2 points so the outermost taps stay non-zero.
    let span = (taps + 1) as f64;
    let mut coeffs: Vec<f64> = (0..taps)
        .map(|i| {
            let k = i as isize - center as isize;
            if k == 0 || k % 2 == 0 {
                return 0.0;
            }
            let x = k as f64;
            let sinc = (PI * x / 2.0).sin() / (PI * x);
            let pos = (i + 1) as f64 / span;
            let window = 0.42 - 0.5 * (2.0 * PI * pos).cos() + 0.08 * (4.0 * PI * pos).cos();
            sinc * window
        })
        .collect();

    let side_sum: f64 = coeffs.iter().sum();
    if side_sum.abs() > 1e-12 {
        let scale = 0.5 / side_sum;
        for coeff in &mut coeffs {
            *coeff *= scale;
        }
    }
    coeffs[center] = 0.5;
    coeffs.into_iter().map(|c| c as f32).collect()
}

/// One decimate-by-2 stage with its own delay line.
pub struct HalfbandDecimator {
    spec: HalfbandSpec,
    center: usize,
    /// Coefficients on even indices; symmetric, so only the first half is used.
    even: Vec<f32>,
    /// `taps - 1` samples of history, then at most one input held back from
    /// an odd-length call, then the current input.
    work: Vec<Complex<f32>>,
}

impl HalfbandDecimator {
    pub fn new(spec: HalfbandSpec) -> Self {
        let coeffs = halfband_coeffs(spec.taps);
        let taps = coeffs.len();
        let even: Vec<f32> = coeffs.iter().step_by(2).copied().collect();
        let mut work = Vec::with_capacity(taps - 1 + 4096);
        work.resize(taps - 1, Complex::new(0.0, 0.0));
        Self {
            spec: HalfbandSpec { taps, ..spec },
            center: (taps - 1) / 2,
            even,
            work,
        }
    }

    pub fn spec(&self) -> HalfbandSpec {
        self.spec
    }

    pub fn taps(&self) -> usize {
        self.spec.taps
    }

    /// Filter and decimate `buf` in place and return the output count.
    ///
    /// Inputs pair up across calls: an odd sample left over is held and
    /// becomes the first of the next call's pairs, so outputs stay on one
    /// phase of the input. Inputs shorter than the filter are left untouched
    /// and `n / 2` is returned.
    pub fn decimate_in_place(&mut self, buf: &mut [Complex<f32>]) -> usize {
        let n = buf.len();
        let taps = self.spec.taps;
        if n < taps {
            return n / 2;
        }

        let hist = taps - 1;
        self.work.extend_from_slice(buf);

        let half = self.even.len() / 2;
        let out_len = (self.work.len() - hist) / 2;
        for (k, out) in buf.iter_mut().take(out_len).enumerate() {
            let window = &self.work[2 * k..2 * k + taps];
            let mut acc = window[self.center] * 0.5;
            for (j, &c) in self.even[..half].iter().enumerate() {
                acc += (window[2 * j] + window[taps - 1 - 2 * j]) * c;
            }
            *out = acc;
        }

        self.work.drain(..2 * out_len);
        out_len
    }

    pub fn reset(&mut self) {
        self.work.truncate(self.spec.taps - 1);
        self.work.fill(Complex::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(a: f32, b: f32, tol: f32, label: &str) {
        assert!(
            (a - b).abs() <= tol,
            "{}: expected {} ≈ {} (tol {})",
            label,
            a,
            b,
            tol
        );
    }

    fn complex_tone(freq_norm: f32, len: usize) -> Vec<Complex<f32>> {
        use std::f32::consts::TAU;

        (0..len)
            .map(|n| Complex::from_polar(1.0, TAU * freq_norm * n as f32))
            .collect()
    }

    #[test]
    fn test_coefficients_are_halfband() {
        for spec in HALFBAND_TABLE {
            let coeffs = halfband_coeffs(spec.taps);
            let center = (spec.taps - 1) / 2;
            assert_eq!(coeffs.len(), spec.taps);
            assert_eq!(coeffs[center], 0.5, "{} taps: centre", spec.taps);
            for (i, &c) in coeffs.iter().enumerate() {
                let offset = i.abs_diff(center);
                if offset != 0 && offset % 2 == 0 {
                    assert_eq!(c, 0.0, "{} taps: tap {} must be zero", spec.taps, i);
                }
                assert_eq!(c, coeffs[spec.taps - 1 - i], "{} taps: symmetry", spec.taps);
            }
            let sum: f32 = coeffs.iter().sum();
            assert_approx_eq(sum, 1.0, 1e-5, &format!("{} taps: DC gain", spec.taps));
        }
    }

    #[test]
    fn test_output_length_is_half() {
        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[0]);
        let mut buf = complex_tone(0.01, 100);
        assert_eq!(dec.decimate_in_place(&mut buf), 50);
        let mut buf = complex_tone(0.01, 101);
        assert_eq!(dec.decimate_in_place(&mut buf), 50);
    }

    #[test]
    fn test_odd_lengths_keep_phase() {
        let tone = complex_tone(0.02, 512);
        let mut whole = tone.clone();
        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[3]);
        let n = dec.decimate_in_place(&mut whole);
        assert_eq!(n, 256);

        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[3]);
        let mut first = tone[..255].to_vec();
        let mut second = tone[255..].to_vec();
        let n1 = dec.decimate_in_place(&mut first);
        let n2 = dec.decimate_in_place(&mut second);
        assert_eq!((n1, n2), (127, 129), "held sample joins the next call");

        let split: Vec<_> = first[..n1].iter().chain(&second[..n2]).copied().collect();
        for (i, (a, b)) in whole[..n].iter().zip(&split).enumerate() {
            assert_approx_eq(a.re, b.re, 1e-5, &format!("re {i}"));
            assert_approx_eq(a.im, b.im, 1e-5, &format!("im {i}"));
        }
    }

    #[test]
    fn test_short_input_is_left_alone() {
        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[10]);
        let original = complex_tone(0.1, 20);
        let mut buf = original.clone();
        assert_eq!(dec.decimate_in_place(&mut buf), 10);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_dc_passes_with_unity_gain() {
        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[4]);
        for _ in 0..4 {
            let mut buf = vec![Complex::new(1.0f32, -0.5); 256];
            let n = dec.decimate_in_place(&mut buf);
            assert_eq!(n, 128);
            for (idx, s) in buf[..n].iter().enumerate().skip(dec.taps()) {
                assert_approx_eq(s.re, 1.0, 1e-4, &format!("re {idx}"));
                assert_approx_eq(s.im, -0.5, 1e-4, &format!("im {idx}"));
            }
        }
    }

    #[test]
    fn test_stopband_tone_is_attenuated() {
        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[10]);
        let mut buf = complex_tone(0.4, 1024);
        let n = dec.decimate_in_place(&mut buf);
        let peak = buf[dec.taps()..n]
            .iter()
            .map(|s| s.norm())
            .fold(0.0f32, f32::max);
        assert!(peak < 0.01, "0.4 fs tone leaked with magnitude {peak}");
    }

    #[test]
    fn test_history_carries_across_calls() {
        let tone = complex_tone(0.02, 512);
        let mut whole = tone.clone();
        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[2]);
        let n = dec.decimate_in_place(&mut whole);

        let mut dec = HalfbandDecimator::new(HALFBAND_TABLE[2]);
        let mut first = tone[..256].to_vec();
        let mut second = tone[256..].to_vec();
        let n1 = dec.decimate_in_place(&mut first);
        let n2 = dec.decimate_in_place(&mut second);
        assert_eq!(n1 + n2, n);
        for (idx, (a, b)) in whole[..n]
            .iter()
            .zip(first[..n1].iter().chain(second[..n2].iter()))
            .enumerate()
        {
            assert_approx_eq(a.re, b.re, 1e-5, &format!("split re {idx}"));
            assert_approx_eq(a.im, b.im, 1e-5, &format!("split im {idx}"));
        }
    }
}
