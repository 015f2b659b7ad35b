// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;

/// Sideband, DSB and CW detector: the channel bandpass has already removed
/// the unwanted side, so the audio is the real part of the baseband signal.
pub(crate) fn demod_real_into(samples: &[Complex<f32>], out: &mut Vec<f32>) {
    out.extend(samples.iter().map(|sample| sample.re));
}
