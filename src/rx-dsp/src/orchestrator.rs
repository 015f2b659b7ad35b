// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! One acquisition-to-audio cycle per consumed sample block.

use num_complex::Complex;
use rx_core::RxMode;
use tracing::debug;

use crate::agc::{Agc, AgcSettings};
use crate::command::PipelineCommand;
use crate::decimate::DecimationChain;
use crate::demod::Demodulator;
use crate::downconvert::DownConverter;
use crate::error::DspError;
use crate::filter::BandpassFilter;
use crate::iq_balance::{IqBalance, IqBalanceSettings};
use crate::noise::{
    AveragingBlanker, NoiseBlanker, NoiseBlankerSettings, NoiseReduction, NoiseReductionSettings,
};
use crate::resample::FractionalResampler;
use crate::sink::{Sinks, SpectrumKind};
use crate::spectrum::{SpectrumAnalyzer, SPECTRUM_FFT_SIZE, SPECTRUM_UPDATE_BLOCKS};
use crate::squelch::Squelch;
use crate::stage::{BlockContext, DigitalTap, StageChain};

/// Everything needed to build a pipeline for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Device sample rate in Hz.
    pub input_rate: f64,
    /// Frames per device block.
    pub block_size: usize,
    /// Samples per channel-chain block after decimation.
    pub dsp_block_size: usize,
    pub audio_rate: f64,
    /// 1 (mono) or 2 (interleaved stereo).
    pub audio_channels: usize,
    pub mode: RxMode,
    /// Channel offset from the tuned centre frequency.
    pub offset_hz: f64,
    /// Passband override; `None` uses the mode default.
    pub passband_hz: Option<(f32, f32)>,
    pub cw_pitch_hz: f32,
    pub volume: f32,
    pub squelch_db: Option<f32>,
    pub agc: AgcSettings,
    pub noise_blanker: NoiseBlankerSettings,
    pub noise_reduction: NoiseReductionSettings,
    pub iq_balance: IqBalanceSettings,
    pub filter_taps: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            input_rate: 192_000.0,
            block_size: 2048,
            dsp_block_size: 512,
            audio_rate: 48_000.0,
            audio_channels: 1,
            mode: RxMode::USB,
            offset_hz: 0.0,
            passband_hz: None,
            cw_pitch_hz: 600.0,
            volume: 1.0,
            squelch_db: None,
            agc: AgcSettings::default(),
            noise_blanker: NoiseBlankerSettings::default(),
            noise_reduction: NoiseReductionSettings::default(),
            iq_balance: IqBalanceSettings::default(),
            filter_taps: 255,
        }
    }
}

impl OrchestratorConfig {
    /// Check the config without building anything. A config that passes
    /// builds a pipeline.
    pub fn validate(&self) -> Result<(), DspError> {
        let fail = |msg: String| Err(DspError::Configuration(msg));
        if !(self.input_rate.is_finite() && self.input_rate > 0.0) {
            return fail(format!("input rate must be positive, got {}", self.input_rate));
        }
        if !(self.audio_rate.is_finite() && self.audio_rate > 0.0) {
            return fail(format!("audio rate must be positive, got {}", self.audio_rate));
        }
        if self.block_size == 0 || self.dsp_block_size == 0 {
            return fail("block sizes must be non-zero".into());
        }
        if !(1..=2).contains(&self.audio_channels) {
            return fail(format!(
                "audio channels must be 1 or 2, got {}",
                self.audio_channels
            ));
        }
        DecimationChain::plan(self.input_rate, self.mode.decimation_bandwidth_hz())?;
        Ok(())
    }

    /// Fold a command into the stored settings, as a rebuilt pipeline
    /// should see it. A mode change restores the mode's default passband.
    pub fn apply_command(&mut self, cmd: &PipelineCommand) {
        match *cmd {
            PipelineCommand::SetMode(mode) => {
                self.mode = mode;
                self.passband_hz = None;
            }
            PipelineCommand::SetOffset(offset_hz) => self.offset_hz = offset_hz,
            PipelineCommand::SetVolume(volume) => self.volume = volume.max(0.0),
            PipelineCommand::SetFilter { low_hz, high_hz } => {
                self.passband_hz = Some((low_hz, high_hz));
            }
            PipelineCommand::SetAgc(settings) => self.agc = settings,
            PipelineCommand::SetSquelch(threshold) => self.squelch_db = threshold,
            PipelineCommand::SetNoiseBlanker(settings) => self.noise_blanker = settings,
            PipelineCommand::SetNoiseReduction(settings) => self.noise_reduction = settings,
            PipelineCommand::SetIqBalance(settings) => self.iq_balance = settings,
        }
    }

    fn passband(&self) -> (f32, f32) {
        self.passband_hz
            .unwrap_or_else(|| self.mode.default_passband_hz(self.cw_pitch_hz))
    }

    /// Mixer offset: channel offset plus the CW pitch shift.
    fn mixer_offset_hz(&self) -> f64 {
        self.offset_hz + f64::from(self.mode.bfo_offset_hz(self.cw_pitch_hz))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrchestratorStats {
    pub input_blocks: u64,
    pub dsp_blocks: u64,
    pub muted_blocks: u64,
    pub audio_samples: u64,
    /// Channel level from the last processed block, dBFS.
    pub signal_db: f32,
    pub dsp_rate: f64,
    pub decimation: usize,
}

/// Mode-dependent part of the pipeline, rebuilt as a unit on mode switch.
struct ChannelPath {
    downconverter: DownConverter,
    chain: StageChain,
    demod: Demodulator,
    resampler: FractionalResampler,
}

/// Front chain, down-conversion, channel chain, detector and resampler for
/// one receive channel.
pub struct ReceiveOrchestrator {
    config: OrchestratorConfig,
    sinks: Sinks,
    front: StageChain,
    path: ChannelPath,
    raw_spectrum: SpectrumAnalyzer,
    zoom_spectrum: SpectrumAnalyzer,

    work: Vec<Complex<f32>>,
    pending: Vec<Complex<f32>>,
    pending_offset: usize,
    channel_block: Vec<Complex<f32>>,
    demod_out: Vec<f32>,
    resampled: Vec<f32>,
    audio: Vec<f32>,
    stats: OrchestratorStats,
}

impl ReceiveOrchestrator {
    pub fn new(config: OrchestratorConfig, sinks: Sinks) -> Result<Self, DspError> {
        config.validate()?;
        let path = Self::build_path(&config, &sinks)?;
        let front = StageChain::new()
            .with(IqBalance::new(config.iq_balance))
            .with(NoiseBlanker::new(config.noise_blanker, config.input_rate))
            .with(AveragingBlanker::new(config.noise_blanker, config.input_rate));
        let stats = OrchestratorStats {
            signal_db: f32::NEG_INFINITY,
            dsp_rate: path.downconverter.output_rate(),
            decimation: path.downconverter.factor(),
            ..OrchestratorStats::default()
        };
        debug!(
            "pipeline {} at {} Hz: dsp {} Hz, audio {} Hz x{}",
            config.mode,
            config.input_rate,
            stats.dsp_rate,
            config.audio_rate,
            config.audio_channels
        );
        Ok(Self {
            work: Vec::with_capacity(config.block_size),
            pending: Vec::with_capacity(config.dsp_block_size * 2),
            pending_offset: 0,
            channel_block: Vec::with_capacity(config.dsp_block_size),
            demod_out: Vec::new(),
            resampled: Vec::new(),
            audio: Vec::new(),
            raw_spectrum: SpectrumAnalyzer::new(SPECTRUM_FFT_SIZE, SPECTRUM_UPDATE_BLOCKS),
            zoom_spectrum: SpectrumAnalyzer::new(SPECTRUM_FFT_SIZE, SPECTRUM_UPDATE_BLOCKS),
            front,
            path,
            sinks,
            config,
            stats,
        })
    }

    fn build_path(config: &OrchestratorConfig, sinks: &Sinks) -> Result<ChannelPath, DspError> {
        let mode = config.mode;
        let downconverter = DownConverter::new(
            config.input_rate,
            mode.decimation_bandwidth_hz(),
            config.mixer_offset_hz(),
        )?;
        let dsp_rate = downconverter.output_rate();

        let mut chain = StageChain::new();
        if !mode.is_wideband() {
            let (low, high) = config.passband();
            chain.push(Box::new(BandpassFilter::new(
                low,
                high,
                dsp_rate as f32,
                config.filter_taps,
                config.dsp_block_size,
            )));
        }
        chain.push(Box::new(Squelch::new(config.squelch_db)));
        if !mode.is_wideband() {
            chain.push(Box::new(NoiseReduction::new(config.noise_reduction)));
            chain.push(Box::new(Agc::new(config.agc, dsp_rate)));
        }
        if let Some(tx) = &sinks.digital {
            chain.push(Box::new(DigitalTap::new(tx.clone())));
        }

        let demod = Demodulator::for_mode(mode, dsp_rate as f32);
        let resampler = FractionalResampler::new(dsp_rate, config.audio_rate, demod.channels())?;
        Ok(ChannelPath {
            downconverter,
            chain,
            demod,
            resampler,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn mode(&self) -> RxMode {
        self.config.mode
    }

    /// Rate of the channel chain after decimation.
    pub fn dsp_rate(&self) -> f64 {
        self.path.downconverter.output_rate()
    }

    pub fn mixer_offset_hz(&self) -> f64 {
        self.path.downconverter.offset_hz()
    }

    /// Names of the channel stages, in processing order.
    pub fn channel_stages(&self) -> Vec<&'static str> {
        self.path.chain.names()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats
    }

    /// Tear down the pipeline and give the sinks back.
    pub fn into_sinks(self) -> Sinks {
        self.sinks
    }

    /// Run one device block through the whole pipeline. Audio is emitted
    /// once per full channel block, so a call may produce zero or more
    /// `send_block` calls.
    pub fn process_block(&mut self, block: &[Complex<f32>]) {
        self.stats.input_blocks += 1;
        if block.is_empty() {
            return;
        }
        self.work.clear();
        self.work.extend_from_slice(block);

        let mut front_ctx = BlockContext::new(self.config.input_rate);
        self.front.process(&mut self.work, &mut front_ctx);

        if let Some(spectrum) = self.sinks.spectrum.as_mut() {
            if let Some(bins) = self.raw_spectrum.analyze(&self.work) {
                spectrum.publish(SpectrumKind::Raw, bins, self.config.input_rate);
            }
        }

        let produced = self.path.downconverter.process(&mut self.work);
        self.pending.extend_from_slice(&self.work[..produced]);

        let size = self.config.dsp_block_size;
        while self.pending.len() - self.pending_offset >= size {
            let start = self.pending_offset;
            self.channel_block.clear();
            self.channel_block
                .extend_from_slice(&self.pending[start..start + size]);
            self.pending_offset += size;
            self.process_channel_block();
        }
        if self.pending_offset > 0 && self.pending_offset * 2 >= self.pending.len() {
            self.pending.copy_within(self.pending_offset.., 0);
            self.pending.truncate(self.pending.len() - self.pending_offset);
            self.pending_offset = 0;
        }
    }

    fn process_channel_block(&mut self) {
        let dsp_rate = self.path.downconverter.output_rate();
        if let Some(spectrum) = self.sinks.spectrum.as_mut() {
            if let Some(bins) = self.zoom_spectrum.analyze(&self.channel_block) {
                spectrum.publish(SpectrumKind::Zoom, bins, dsp_rate);
            }
        }

        let mut ctx = BlockContext::new(dsp_rate);
        self.path.chain.process(&mut self.channel_block, &mut ctx);

        self.demod_out.clear();
        self.path
            .demod
            .demodulate_into(&self.channel_block, &mut self.demod_out);
        self.resampled.clear();
        self.path.resampler.process(&self.demod_out, &mut self.resampled);

        self.audio.clear();
        remix(
            &self.resampled,
            self.path.resampler.channels(),
            self.config.audio_channels,
            &mut self.audio,
        );
        self.sinks
            .audio
            .send_block(&self.audio, self.config.volume, ctx.muted);

        self.stats.dsp_blocks += 1;
        self.stats.audio_samples += self.audio.len() as u64;
        self.stats.signal_db = ctx.signal_db;
        if ctx.muted {
            self.stats.muted_blocks += 1;
        }
    }

    /// Apply a runtime command between blocks. A failed mode switch leaves
    /// the previous pipeline running.
    pub fn apply(&mut self, cmd: PipelineCommand) -> Result<(), DspError> {
        match cmd {
            PipelineCommand::SetMode(mode) => self.set_mode(mode)?,
            PipelineCommand::SetOffset(_) => {
                self.config.apply_command(&cmd);
                self.path
                    .downconverter
                    .set_offset(self.config.mixer_offset_hz());
            }
            PipelineCommand::SetVolume(_) => self.config.apply_command(&cmd),
            other => {
                self.config.apply_command(&other);
                let front = self.front.configure(&other);
                let channel = self.path.chain.configure(&other);
                if !front && !channel {
                    debug!("{:?} has no stage in the {} pipeline", other, self.config.mode);
                }
            }
        }
        Ok(())
    }

    fn set_mode(&mut self, mode: RxMode) -> Result<(), DspError> {
        let mut next = self.config.clone();
        next.apply_command(&PipelineCommand::SetMode(mode));
        let path = Self::build_path(&next, &self.sinks)?;
        let rate_changed = path.downconverter.output_rate() != self.dsp_rate();
        self.config = next;
        self.path = path;
        self.pending.clear();
        self.pending_offset = 0;
        if rate_changed {
            self.zoom_spectrum = SpectrumAnalyzer::new(SPECTRUM_FFT_SIZE, SPECTRUM_UPDATE_BLOCKS);
        }
        self.stats.dsp_rate = self.path.downconverter.output_rate();
        self.stats.decimation = self.path.downconverter.factor();
        debug!(
            "mode {} : dsp {} Hz, stages {:?}",
            mode,
            self.stats.dsp_rate,
            self.path.chain.names()
        );
        Ok(())
    }
}

/// Convert interleaved audio between mono and stereo.
fn remix(input: &[f32], in_channels: usize, out_channels: usize, out: &mut Vec<f32>) {
    match (in_channels, out_channels) {
        (1, 2) => out.extend(input.iter().flat_map(|&s| [s, s])),
        (2, 1) => out.extend(input.chunks_exact(2).map(|lr| 0.5 * (lr[0] + lr[1]))),
        _ => out.extend_from_slice(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{AudioSink, SharedSpectrum};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CaptureSink(Arc<Mutex<Vec<(Vec<f32>, bool)>>>);

    impl AudioSink for CaptureSink {
        fn send_block(&mut self, samples: &[f32], _gain: f32, muted: bool) {
            self.0.lock().unwrap().push((samples.to_vec(), muted));
        }
    }

    fn complex_tone(freq_norm: f32, amplitude: f32, len: usize) -> Vec<Complex<f32>> {
        use std::f32::consts::TAU;
        (0..len)
            .map(|n| Complex::from_polar(amplitude, TAU * freq_norm * n as f32))
            .collect()
    }

    fn orchestrator(config: OrchestratorConfig) -> (ReceiveOrchestrator, CaptureSink) {
        let capture = CaptureSink::default();
        let orch = ReceiveOrchestrator::new(config, Sinks::new(capture.clone())).unwrap();
        (orch, capture)
    }

    #[test]
    fn test_processes_silence() {
        let (mut orch, capture) = orchestrator(OrchestratorConfig::default());
        let block = vec![Complex::new(0.0_f32, 0.0); 2048];
        for _ in 0..16 {
            orch.process_block(&block);
        }
        let stats = orch.stats();
        assert_eq!(stats.input_blocks, 16);
        assert!(stats.dsp_blocks > 0);
        let blocks = capture.0.lock().unwrap();
        assert_eq!(blocks.len() as u64, stats.dsp_blocks);
        for (audio, _) in blocks.iter() {
            assert!(!audio.is_empty());
            assert!(audio.iter().all(|s| s.is_finite() && s.abs() < 1e-6));
        }
    }

    #[test]
    fn test_mode_switch_rebuilds_chain() {
        let (mut orch, _) = orchestrator(OrchestratorConfig {
            input_rate: 1_024_000.0,
            ..OrchestratorConfig::default()
        });
        assert_eq!(
            orch.channel_stages(),
            vec!["bandpass", "squelch", "noise_reduction", "agc"]
        );
        let narrow_rate = orch.dsp_rate();

        orch.apply(PipelineCommand::SetMode(RxMode::FM)).unwrap();
        assert_eq!(orch.mode(), RxMode::FM);
        assert_eq!(orch.channel_stages().len(), 4);
        assert!(orch.dsp_rate() >= narrow_rate);

        orch.apply(PipelineCommand::SetMode(RxMode::WFM)).unwrap();
        assert_eq!(orch.channel_stages(), vec!["squelch"], "wideband bypass");
        assert!(orch.dsp_rate() >= 100_000.0);
    }

    #[test]
    fn test_digital_tap_is_last_stage() {
        let (tx, rx) = crossbeam_channel::bounded(64);
        let sinks = Sinks::new(CaptureSink::default()).with_digital(tx);
        let mut orch = ReceiveOrchestrator::new(OrchestratorConfig::default(), sinks).unwrap();
        assert_eq!(orch.channel_stages().last(), Some(&"digital_tap"));

        let block = complex_tone(1_000.0 / 192_000.0, 0.5, 2048);
        for _ in 0..8 {
            orch.process_block(&block);
        }
        let tapped = rx.try_recv().expect("tap received a block");
        assert_eq!(tapped.samples.len(), 512);
        assert_eq!(tapped.sample_rate, orch.dsp_rate());

        let (tx, _rx) = crossbeam_channel::bounded(64);
        let sinks = Sinks::new(CaptureSink::default()).with_digital(tx);
        let wide = OrchestratorConfig {
            input_rate: 1_024_000.0,
            ..OrchestratorConfig::default()
        };
        let mut orch = ReceiveOrchestrator::new(wide, sinks).unwrap();
        orch.apply(PipelineCommand::SetMode(RxMode::WFMS)).unwrap();
        assert_eq!(orch.channel_stages(), vec!["squelch", "digital_tap"]);
    }

    #[test]
    fn test_squelch_mutes_silence_and_opens_on_signal() {
        let config = OrchestratorConfig {
            squelch_db: Some(-20.0),
            ..OrchestratorConfig::default()
        };
        let (mut orch, capture) = orchestrator(config);
        let silence = vec![Complex::new(0.0_f32, 0.0); 2048];
        for _ in 0..8 {
            orch.process_block(&silence);
        }
        {
            let blocks = capture.0.lock().unwrap();
            assert!(!blocks.is_empty());
            for (audio, muted) in blocks.iter() {
                assert!(*muted);
                assert!(audio.iter().all(|&s| s == 0.0));
            }
        }
        assert_eq!(orch.stats().muted_blocks, orch.stats().dsp_blocks);

        let tone = complex_tone(1_000.0 / 192_000.0, 0.5, 2048);
        for _ in 0..16 {
            orch.process_block(&tone);
        }
        let blocks = capture.0.lock().unwrap();
        let (audio, muted) = blocks.last().unwrap();
        assert!(!muted, "tone opens the squelch");
        assert!(audio.iter().any(|s| s.abs() > 0.05));
        assert!(orch.stats().signal_db > -20.0);
    }

    #[test]
    fn test_usb_tone_reaches_audio() {
        let (mut orch, capture) = orchestrator(OrchestratorConfig::default());
        let tone = complex_tone(1_000.0 / 192_000.0, 0.1, 2048);
        for _ in 0..48 {
            orch.process_block(&tone);
        }
        let blocks = capture.0.lock().unwrap();
        let (audio, muted) = blocks.last().unwrap();
        assert!(!muted);
        let rms = (audio.iter().map(|s| s * s).sum::<f32>() / audio.len() as f32).sqrt();
        assert!(rms > 0.1, "audio rms {rms}");
    }

    #[test]
    fn test_stereo_output_duplicates_mono() {
        let config = OrchestratorConfig {
            audio_channels: 2,
            ..OrchestratorConfig::default()
        };
        let (mut orch, capture) = orchestrator(config);
        let tone = complex_tone(1_000.0 / 192_000.0, 0.1, 2048);
        for _ in 0..8 {
            orch.process_block(&tone);
        }
        let blocks = capture.0.lock().unwrap();
        for (audio, _) in blocks.iter() {
            assert_eq!(audio.len() % 2, 0);
            for frame in audio.chunks_exact(2) {
                assert_eq!(frame[0], frame[1]);
            }
        }
    }

    #[test]
    fn test_cw_pitch_moves_mixer() {
        let config = OrchestratorConfig {
            mode: RxMode::CW,
            offset_hz: 1_000.0,
            cw_pitch_hz: 600.0,
            ..OrchestratorConfig::default()
        };
        let (mut orch, _) = orchestrator(config);
        assert_eq!(orch.mixer_offset_hz(), 400.0);
        orch.apply(PipelineCommand::SetMode(RxMode::CWR)).unwrap();
        assert_eq!(orch.mixer_offset_hz(), 1_600.0);
        orch.apply(PipelineCommand::SetOffset(0.0)).unwrap();
        assert_eq!(orch.mixer_offset_hz(), 600.0);
    }

    #[test]
    fn test_settings_survive_mode_switch() {
        let (mut orch, _) = orchestrator(OrchestratorConfig::default());
        orch.apply(PipelineCommand::SetSquelch(Some(-50.0))).unwrap();
        orch.apply(PipelineCommand::SetFilter {
            low_hz: 300.0,
            high_hz: 2_400.0,
        })
        .unwrap();
        orch.apply(PipelineCommand::SetMode(RxMode::LSB)).unwrap();
        assert_eq!(orch.config().squelch_db, Some(-50.0));
        assert_eq!(orch.config().passband_hz, None, "mode switch restores default passband");
    }

    #[test]
    fn test_spectrum_published() {
        let shared = SharedSpectrum::new();
        let sinks = Sinks::new(CaptureSink::default()).with_spectrum(shared.clone());
        let mut orch = ReceiveOrchestrator::new(OrchestratorConfig::default(), sinks).unwrap();
        let tone = complex_tone(1_000.0 / 192_000.0, 0.5, 2048);
        for _ in 0..32 {
            orch.process_block(&tone);
        }
        let raw = shared.latest(SpectrumKind::Raw).expect("raw spectrum");
        assert_eq!(raw.bins.len(), SPECTRUM_FFT_SIZE);
        assert_eq!(raw.sample_rate, 192_000.0);
        let zoom = shared.latest(SpectrumKind::Zoom).expect("zoom spectrum");
        assert_eq!(zoom.sample_rate, orch.dsp_rate());
    }

    #[test]
    fn test_validate_matches_construction() {
        let wfm_at_48k = OrchestratorConfig {
            input_rate: 48_000.0,
            mode: RxMode::WFM,
            ..OrchestratorConfig::default()
        };
        assert!(wfm_at_48k.validate().is_err());
        let wfm_at_192k = OrchestratorConfig {
            mode: RxMode::WFM,
            ..OrchestratorConfig::default()
        };
        assert!(wfm_at_192k.validate().is_err());
        assert!(OrchestratorConfig::default().validate().is_ok());

        let mut config = OrchestratorConfig::default();
        config.apply_command(&PipelineCommand::SetFilter {
            low_hz: 100.0,
            high_hz: 2_000.0,
        });
        config.apply_command(&PipelineCommand::SetVolume(-1.0));
        assert_eq!(config.passband_hz, Some((100.0, 2_000.0)));
        assert_eq!(config.volume, 0.0);
        config.apply_command(&PipelineCommand::SetMode(RxMode::AM));
        assert_eq!(config.passband_hz, None);
    }

    #[test]
    fn test_configuration_errors() {
        let bad_block = OrchestratorConfig {
            dsp_block_size: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            ReceiveOrchestrator::new(bad_block, Sinks::new(CaptureSink::default())),
            Err(DspError::Configuration(_))
        ));

        let too_slow = OrchestratorConfig {
            input_rate: 50_000.0,
            mode: RxMode::WFM,
            ..OrchestratorConfig::default()
        };
        assert!(ReceiveOrchestrator::new(too_slow.clone(), Sinks::new(CaptureSink::default())).is_err());

        let (mut orch, _) = orchestrator(OrchestratorConfig {
            mode: RxMode::USB,
            ..too_slow
        });
        assert!(orch.apply(PipelineCommand::SetMode(RxMode::WFM)).is_err());
        assert_eq!(orch.mode(), RxMode::USB, "failed switch keeps the old pipeline");
        assert_eq!(orch.channel_stages()[0], "bandpass");
    }
}
