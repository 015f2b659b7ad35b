// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-block processing stages and the ordered chain that runs them.

use crossbeam_channel::{Sender, TrySendError};
use num_complex::Complex;
use tracing::debug;

use crate::command::PipelineCommand;

/// Per-block values shared between the stages of one chain pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockContext {
    pub sample_rate: f64,
    /// Set by the squelch when the block was silenced.
    pub muted: bool,
    /// Average block power in dBFS, as last measured.
    pub signal_db: f32,
}

impl BlockContext {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            muted: false,
            signal_db: f32::NEG_INFINITY,
        }
    }
}

/// One real-time DSP step over a block of complex samples.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    fn process(&mut self, block: &mut [Complex<f32>], ctx: &mut BlockContext);

    /// Clear filter memories and running averages.
    fn reset(&mut self) {}

    /// Apply a runtime command between blocks. Returns true when the stage
    /// took the command.
    fn configure(&mut self, _cmd: &PipelineCommand) -> bool {
        false
    }
}

/// Ordered list of stages.
#[derive(Default)]
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
}

impl StageChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn with(mut self, stage: impl Stage + 'static) -> Self {
        self.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn process(&mut self, block: &mut [Complex<f32>], ctx: &mut BlockContext) {
        for stage in &mut self.stages {
            stage.process(block, ctx);
        }
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Offer a command to every stage; true if any stage took it.
    pub fn configure(&mut self, cmd: &PipelineCommand) -> bool {
        let mut taken = false;
        for stage in &mut self.stages {
            taken |= stage.configure(cmd);
        }
        taken
    }
}

// ---------------------------------------------------------------------------
// Digital-mode tap
// ---------------------------------------------------------------------------

/// Copy of one channel block handed to an external decoder.
#[derive(Debug, Clone)]
pub struct TapBlock {
    pub sample_rate: f64,
    pub samples: Vec<Complex<f32>>,
}

/// Hands a copy of each block to a decoder without ever blocking the chain.
/// Blocks are dropped while the decoder's queue is full.
pub struct DigitalTap {
    tx: Sender<TapBlock>,
    dropped: u64,
}

impl DigitalTap {
    pub fn new(tx: Sender<TapBlock>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Stage for DigitalTap {
    fn name(&self) -> &'static str {
        "digital_tap"
    }

    fn process(&mut self, block: &mut [Complex<f32>], ctx: &mut BlockContext) {
        if ctx.muted {
            return;
        }
        let copy = TapBlock {
            sample_rate: ctx.sample_rate,
            samples: block.to_vec(),
        };
        match self.tx.try_send(copy) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    debug!("digital tap full, {} blocks dropped", self.dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
