// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Output collaborators of the pipeline: audio playback, spectrum display
//! and the digital-mode decoder queue.

use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;
use tokio::sync::broadcast;

use crate::stage::TapBlock;

/// Receives audio-rate output, one call per processed block.
pub trait AudioSink: Send {
    /// `samples` are interleaved at the configured channel count. `gain` is
    /// the linear volume; a muted block carries squelched audio.
    fn send_block(&mut self, samples: &[f32], gain: f32, muted: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectrumKind {
    /// Full device bandwidth, before down-conversion.
    Raw,
    /// Channel bandwidth after decimation.
    Zoom,
}

/// Receives spectrum frames. Implementations must not block the caller.
pub trait SpectrumSink: Send {
    fn publish(&mut self, kind: SpectrumKind, bins: &[f32], sample_rate: f64);
}

/// Everything the pipeline writes to, handed over at construction and
/// returned when the pipeline is torn down.
pub struct Sinks {
    pub audio: Box<dyn AudioSink>,
    pub spectrum: Option<Box<dyn SpectrumSink>>,
    pub digital: Option<Sender<TapBlock>>,
}

impl Sinks {
    pub fn new(audio: impl AudioSink + 'static) -> Self {
        Self {
            audio: Box::new(audio),
            spectrum: None,
            digital: None,
        }
    }

    pub fn with_spectrum(mut self, spectrum: impl SpectrumSink + 'static) -> Self {
        self.spectrum = Some(Box::new(spectrum));
        self
    }

    pub fn with_digital(mut self, tx: Sender<TapBlock>) -> Self {
        self.digital = Some(tx);
        self
    }
}

// ---------------------------------------------------------------------------
// Audio sinks
// ---------------------------------------------------------------------------

/// Discards audio, counting what it was given.
#[derive(Debug, Default)]
pub struct NullAudioSink {
    samples: u64,
    blocks: u64,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}

impl AudioSink for NullAudioSink {
    fn send_block(&mut self, samples: &[f32], _gain: f32, _muted: bool) {
        self.samples += samples.len() as u64;
        self.blocks += 1;
    }
}

/// Regroups audio into fixed-size frames and broadcasts them to any number
/// of subscribers. Muted blocks become silence so frame timing is kept.
pub struct BroadcastAudioSink {
    tx: broadcast::Sender<Vec<f32>>,
    frame_size: usize,
    frame_buf: Vec<f32>,
    frame_buf_offset: usize,
}

impl BroadcastAudioSink {
    pub fn new(tx: broadcast::Sender<Vec<f32>>, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            tx,
            frame_size,
            frame_buf: Vec::with_capacity(frame_size * 2),
            frame_buf_offset: 0,
        }
    }

    /// Interleaved samples in one frame of `frame_duration_ms`.
    pub fn frame_size_for(sample_rate: u32, channels: usize, frame_duration_ms: u16) -> usize {
        if sample_rate == 0 || frame_duration_ms == 0 {
            960 * channels.max(1)
        } else {
            (sample_rate as usize * frame_duration_ms as usize * channels.max(1)) / 1000
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<f32>> {
        self.tx.subscribe()
    }
}

impl AudioSink for BroadcastAudioSink {
    fn send_block(&mut self, samples: &[f32], gain: f32, muted: bool) {
        if muted {
            self.frame_buf
                .resize(self.frame_buf.len() + samples.len(), 0.0);
        } else {
            self.frame_buf
                .extend(samples.iter().map(|s| (s * gain).clamp(-1.0, 1.0)));
        }

        while self.frame_buf.len().saturating_sub(self.frame_buf_offset) >= self.frame_size {
            let start = self.frame_buf_offset;
            let end = start + self.frame_size;
            let frame = self.frame_buf[start..end].to_vec();
            self.frame_buf_offset = end;
            let _ = self.tx.send(frame);
        }
        if self.frame_buf_offset > 0 && self.frame_buf_offset * 2 >= self.frame_buf.len() {
            self.frame_buf.copy_within(self.frame_buf_offset.., 0);
            self.frame_buf
                .truncate(self.frame_buf.len() - self.frame_buf_offset);
            self.frame_buf_offset = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub sample_rate: f64,
    pub bins: Vec<f32>,
}

#[derive(Debug, Default)]
struct SpectrumSlots {
    revision: u64,
    raw: Option<SpectrumFrame>,
    zoom: Option<SpectrumFrame>,
}

/// Latest spectrum frames, shared between the pipeline and readers.
/// Publishing skips the update instead of waiting when a reader holds the
/// lock.
#[derive(Debug, Clone, Default)]
pub struct SharedSpectrum {
    inner: Arc<Mutex<SpectrumSlots>>,
}

impl SharedSpectrum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, kind: SpectrumKind) -> Option<SpectrumFrame> {
        let guard = self.inner.lock().ok()?;
        match kind {
            SpectrumKind::Raw => guard.raw.clone(),
            SpectrumKind::Zoom => guard.zoom.clone(),
        }
    }

    /// Bumped on every accepted publish.
    pub fn revision(&self) -> u64 {
        self.inner.lock().map(|guard| guard.revision).unwrap_or(0)
    }
}

impl SpectrumSink for SharedSpectrum {
    fn publish(&mut self, kind: SpectrumKind, bins: &[f32], sample_rate: f64) {
        let Ok(mut guard) = self.inner.try_lock() else {
            return;
        };
        let slot = match kind {
            SpectrumKind::Raw => &mut guard.raw,
            SpectrumKind::Zoom => &mut guard.zoom,
        };
        match slot {
            Some(frame) => {
                frame.sample_rate = sample_rate;
                frame.bins.clear();
                frame.bins.extend_from_slice(bins);
            }
            None => {
                *slot = Some(SpectrumFrame {
                    sample_rate,
                    bins: bins.to_vec(),
                });
            }
        }
        guard.revision = guard.revision.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_regroups_into_frames() {
        let (tx, _) = broadcast::channel::<Vec<f32>>(16);
        let mut sink = BroadcastAudioSink::new(tx, 4);
        let mut rx = sink.subscribe();
        sink.send_block(&[0.1, 0.2, 0.3], 1.0, false);
        assert!(rx.try_recv().is_err(), "no full frame yet");
        sink.send_block(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9], 2.0, false);
        assert_eq!(rx.try_recv().unwrap(), vec![0.1, 0.2, 0.3, 0.8]);
        assert_eq!(rx.try_recv().unwrap(), vec![1.0, 1.0, 1.0, 1.0], "clamped");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_muted_block_is_silence() {
        let (tx, _) = broadcast::channel::<Vec<f32>>(4);
        let mut sink = BroadcastAudioSink::new(tx, 3);
        let mut rx = sink.subscribe();
        sink.send_block(&[0.5, 0.5, 0.5], 1.0, true);
        assert_eq!(rx.try_recv().unwrap(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_frame_size_for_duration() {
        assert_eq!(BroadcastAudioSink::frame_size_for(48_000, 2, 20), 1920);
        assert_eq!(BroadcastAudioSink::frame_size_for(0, 1, 20), 960);
    }

    #[test]
    fn test_shared_spectrum_keeps_latest_per_kind() {
        let shared = SharedSpectrum::new();
        let mut publisher = shared.clone();
        assert!(shared.latest(SpectrumKind::Raw).is_none());
        publisher.publish(SpectrumKind::Raw, &[1.0, 2.0], 192_000.0);
        publisher.publish(SpectrumKind::Zoom, &[3.0], 12_000.0);
        publisher.publish(SpectrumKind::Raw, &[4.0, 5.0], 192_000.0);

        let raw = shared.latest(SpectrumKind::Raw).unwrap();
        assert_eq!(raw.bins, vec![4.0, 5.0]);
        assert_eq!(shared.latest(SpectrumKind::Zoom).unwrap().sample_rate, 12_000.0);
        assert_eq!(shared.revision(), 3);
    }

    #[test]
    fn test_null_sink_counts() {
        let mut sink = NullAudioSink::new();
        sink.send_block(&[0.0; 10], 1.0, false);
        sink.send_block(&[0.0; 5], 1.0, true);
        assert_eq!(sink.samples(), 15);
        assert_eq!(sink.blocks(), 2);
    }
}
