// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::f32::consts::{FRAC_1_PI, FRAC_PI_2, FRAC_PI_4, PI};

use num_complex::Complex;

/// Polynomial atan2, accurate to about 0.004 rad.
#[inline]
pub(crate) fn fast_atan2(y: f32, x: f32) -> f32 {
    #[inline]
    fn fast_atan(z: f32) -> f32 {
        let abs_z = z.abs();
        if abs_z <= 1.0 {
            z * (FRAC_PI_4 + 0.273 * (1.0 - abs_z))
        } else {
            let inv = 1.0 / z;
            let base = inv * (FRAC_PI_4 + 0.273 * (1.0 - inv.abs()));
            if z > 0.0 {
                FRAC_PI_2 - base
            } else {
                -FRAC_PI_2 - base
            }
        }
    }

    if x > 0.0 {
        fast_atan(y / x)
    } else if x < 0.0 {
        if y >= 0.0 {
            fast_atan(y / x) + PI
        } else {
            fast_atan(y / x) - PI
        }
    } else if y > 0.0 {
        FRAC_PI_2
    } else if y < 0.0 {
        -FRAC_PI_2
    } else {
        0.0
    }
}

/// Quadrature discriminator: `arg(s[n] * conj(s[n-1])) / π * gain`, appended
/// to `out`. `prev` carries the last sample across blocks; the very first
/// output of a stream is 0.
pub(crate) fn discriminate_into(
    samples: &[Complex<f32>],
    prev: &mut Option<Complex<f32>>,
    gain: f32,
    out: &mut Vec<f32>,
) {
    let scale = FRAC_1_PI * gain;
    let mut last = *prev;
    for &sample in samples {
        let value = match last {
            Some(p) => {
                let product = sample * p.conj();
                fast_atan2(product.im, product.re) * scale
            }
            None => 0.0,
        };
        out.push(value);
        last = Some(sample);
    }
    *prev = last;
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
    fn test_fast_atan2_quadrants() {
        for &(y, x) in &[(1.0f32, 2.0f32), (2.0, -1.0), (-0.5, -3.0), (-4.0, 0.5), (0.0, -1.0)] {
            assert_approx_eq(fast_atan2(y, x), y.atan2(x), 0.005, &format!("atan2({y}, {x})"));
        }
        assert_eq!(fast_atan2(0.0, 0.0), 0.0);
        assert_eq!(fast_atan2(1.0, 0.0), FRAC_PI_2);
    }

    #[test]
    fn test_discriminator_tone() {
        let input = complex_tone(0.25, 16);
        let mut prev = None;
        let mut out = Vec::new();
        discriminate_into(&input, &mut prev, 1.0, &mut out);
        assert_eq!(out.len(), 16);
        assert_approx_eq(out[0], 0.0, 1e-6, "first sample");
        for (idx, &v) in out.iter().enumerate().skip(1) {
            assert_approx_eq(v, 0.5, 0.01, &format!("sample {idx}"));
        }
    }

    #[test]
    fn test_discriminator_carries_phase() {
        let input = complex_tone(-0.125, 32);
        let mut prev = None;
        let mut out = Vec::new();
        discriminate_into(&input[..16], &mut prev, 2.0, &mut out);
        discriminate_into(&input[16..], &mut prev, 2.0, &mut out);
        assert_eq!(out.len(), 32);
        assert_approx_eq(out[16], -0.5, 0.01, "block boundary");
    }
}
