// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Real-time receive DSP: halfband decimation, channel stages, demodulation
//! and resampling, driven one sample block at a time.

pub mod agc;
pub mod command;
pub mod decimate;
pub mod demod;
pub mod downconvert;
pub mod error;
pub mod filter;
pub mod halfband;
pub mod iq_balance;
pub mod noise;
pub mod orchestrator;
pub mod resample;
pub mod sink;
pub mod spectrum;
pub mod squelch;
pub mod stage;

pub use agc::{Agc, AgcMode, AgcSettings};
pub use command::PipelineCommand;
pub use decimate::DecimationChain;
pub use demod::Demodulator;
pub use downconvert::{DownConverter, Nco};
pub use error::DspError;
pub use iq_balance::IqBalanceSettings;
pub use noise::{NoiseBlankerSettings, NoiseReductionSettings};
pub use orchestrator::{OrchestratorConfig, OrchestratorStats, ReceiveOrchestrator};
pub use resample::FractionalResampler;
pub use sink::{
    AudioSink, BroadcastAudioSink, NullAudioSink, SharedSpectrum, Sinks, SpectrumFrame,
    SpectrumKind, SpectrumSink,
};
pub use stage::{BlockContext, DigitalTap, Stage, StageChain, TapBlock};
