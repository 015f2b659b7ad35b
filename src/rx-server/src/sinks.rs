// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use rx_dsp::AudioSink;
use tracing::warn;

/// Writes audio as raw interleaved f32 little-endian samples.
///
/// The first write error is logged and the sink goes quiet; the pipeline
/// keeps running.
pub struct PcmFileSink<W: Write + Send = BufWriter<File>> {
    out: Option<W>,
    written: u64,
}

impl PcmFileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> PcmFileSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Some(out),
            written: 0,
        }
    }

    /// Samples written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> Option<W> {
        self.out
    }
}

impl<W: Write + Send> AudioSink for PcmFileSink<W> {
    fn send_block(&mut self, samples: &[f32], gain: f32, muted: bool) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for &s in samples {
            let v = if muted { 0.0 } else { (s * gain).clamp(-1.0, 1.0) };
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        match out.write_all(&bytes) {
            Ok(()) => self.written += samples.len() as u64,
            Err(e) => {
                warn!("PCM output failed, dropping further audio: {}", e);
                self.out = None;
            }
        }
    }
}
