// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// On-the-wire layout of one I/Q frame inside a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian I then Q.
    I16Le,
    /// Unsigned 8-bit offset-binary I then Q (rtl_tcp).
    U8Offset,
}

impl SampleFormat {
    pub const fn bytes_per_frame(self) -> usize {
        match self {
            SampleFormat::I16Le => 4,
            SampleFormat::U8Offset => 2,
        }
    }

    /// Slot size needed to carry `frames` I/Q frames.
    pub const fn block_bytes(self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    /// Decode raw payload into samples normalized to +-1.0.
    ///
    /// Returns the number of frames written, bounded by both buffers.
    pub fn decode(self, raw: &[u8], out: &mut [Complex<f32>]) -> usize {
        let frames = (raw.len() / self.bytes_per_frame()).min(out.len());
        match self {
            SampleFormat::I16Le => {
                const SCALE: f32 = 1.0 / 32_768.0;
                for (dst, chunk) in out.iter_mut().zip(raw.chunks_exact(4)).take(frames) {
                    let i = i16::from_le_bytes([chunk[0], chunk[1]]);
                    let q = i16::from_le_bytes([chunk[2], chunk[3]]);
                    *dst = Complex::new(f32::from(i) * SCALE, f32::from(q) * SCALE);
                }
            }
            SampleFormat::U8Offset => {
                const SCALE: f32 = 1.0 / 127.5;
                for (dst, chunk) in out.iter_mut().zip(raw.chunks_exact(2)).take(frames) {
                    *dst = Complex::new(
                        (f32::from(chunk[0]) - 127.5) * SCALE,
                        (f32::from(chunk[1]) - 127.5) * SCALE,
                    );
                }
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_decode_scales_full_range() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&i16::MIN.to_le_bytes());
        raw.extend_from_slice(&16_384i16.to_le_bytes());
        raw.extend_from_slice(&0i16.to_le_bytes());
        raw.extend_from_slice(&(-16_384i16).to_le_bytes());
        let mut out = vec![Complex::new(9.0_f32, 9.0); 4];
        let n = SampleFormat::I16Le.decode(&raw, &mut out);
        assert_eq!(n, 2);
        assert_eq!(out[0], Complex::new(-1.0, 0.5));
        assert_eq!(out[1], Complex::new(0.0, -0.5));
        assert_eq!(out[2], Complex::new(9.0, 9.0), "untouched beyond decoded frames");
    }

    #[test]
    fn test_u8_decode_centres_on_midscale() {
        let raw = [0u8, 255, 127, 128];
        let mut out = vec![Complex::new(0.0_f32, 0.0); 2];
        assert_eq!(SampleFormat::U8Offset.decode(&raw, &mut out), 2);
        assert!((out[0].re + 1.0).abs() < 1e-6);
        assert!((out[0].im - 1.0).abs() < 1e-6);
        assert!(out[1].re.abs() < 0.01 && out[1].im.abs() < 0.01);
    }

    #[test]
    fn test_decode_bounded_by_output() {
        let raw = vec![0u8; 64];
        let mut out = vec![Complex::new(0.0_f32, 0.0); 3];
        assert_eq!(SampleFormat::I16Le.decode(&raw, &mut out), 3);
        assert_eq!(SampleFormat::I16Le.block_bytes(2048), 8192);
        assert_eq!(SampleFormat::U8Offset.block_bytes(2048), 4096);
    }
}
