// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Small real-valued IIR sections used by the audio demodulators.

use std::f32::consts::PI;

#[derive(Debug, Clone)]
pub(crate) struct OnePoleLowPass {
    alpha: f32,
    y: f32,
}

impl OnePoleLowPass {
    pub(crate) fn new(sample_rate: f32, cutoff_hz: f32) -> Self {
        let sr = sample_rate.max(1.0);
        let cutoff = cutoff_hz.clamp(1.0, sr * 0.49);
        let dt = 1.0 / sr;
        let rc = 1.0 / (2.0 * PI * cutoff);
        Self {
            alpha: dt / (rc + dt),
            y: 0.0,
        }
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        self.y += self.alpha * (x - self.y);
        self.y
    }
}

/// Direct form I biquad; the designs below follow the RBJ cookbook.
#[derive(Debug, Clone)]
pub(crate) struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    fn from_coeffs(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        let inv_a0 = 1.0 / a0;
        Self {
            b0: b0 * inv_a0,
            b1: b1 * inv_a0,
            b2: b2 * inv_a0,
            a1: a1 * inv_a0,
            a2: a2 * inv_a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn omega(sample_rate: f32, freq_hz: f32, q: f32, min_q: f32) -> (f32, f32) {
        let sr = sample_rate.max(1.0);
        let f = freq_hz.clamp(1.0, sr * 0.45);
        let w0 = 2.0 * PI * f / sr;
        (w0.cos(), w0.sin() / (2.0 * q.max(min_q)))
    }

    /// Band-pass with constant 0 dB peak gain.
    pub(crate) fn band_pass(sample_rate: f32, center_hz: f32, q: f32) -> Self {
        let (cos_w0, alpha) = Self::omega(sample_rate, center_hz, q, 0.2);
        Self::from_coeffs(alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    pub(crate) fn low_pass(sample_rate: f32, cutoff_hz: f32, q: f32) -> Self {
        let (cos_w0, alpha) = Self::omega(sample_rate, cutoff_hz, q, 0.1);
        let b1 = 1.0 - cos_w0;
        Self::from_coeffs(b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    pub(crate) fn notch(sample_rate: f32, center_hz: f32, q: f32) -> Self {
        let (cos_w0, alpha) = Self::omega(sample_rate, center_hz, q, 0.1);
        Self::from_coeffs(1.0, -2.0 * cos_w0, 1.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DcBlocker {
    r: f32,
    x1: f32,
    y1: f32,
}

impl DcBlocker {
    pub(crate) fn new(r: f32) -> Self {
        Self {
            r: r.clamp(0.9, 0.9999),
            x1: 0.0,
            y1: 0.0,
        }
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        let y = x - self.x1 + self.r * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

/// Single-pole FM de-emphasis with time constant `tau_us`.
#[derive(Debug, Clone)]
pub(crate) struct Deemphasis {
    alpha: f32,
    y: f32,
}

impl Deemphasis {
    pub(crate) fn new(sample_rate: f32, tau_us: f32) -> Self {
        let sr = sample_rate.max(1.0);
        let tau = tau_us.max(1.0) * 1e-6;
        Self {
            alpha: 1.0 - (-1.0 / (sr * tau)).exp(),
            y: 0.0,
        }
    }

    pub(crate) fn process(&mut self, x: f32) -> f32 {
        self.y += self.alpha * (x - self.y);
        self.y
    }
}
