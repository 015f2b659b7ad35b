// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Receiver session: one device, one pipeline and the two worker threads
//! that connect them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver as CommandReceiver, Sender as CommandSender};
use num_complex::Complex;
use rx_backend::{
    BlockProducer, DeviceAccess, DeviceError, DeviceOptions, DeviceRegistry, DeviceSnapshot,
    SdrDevice, TransportError,
};
use rx_core::{
    ring_buffer, Freq, RingError, RingStats, RunState, RxMode, SampleFormat, SessionGate,
    SlotConsumer, SlotProducer,
};
use rx_dsp::{
    DspError, OrchestratorConfig, OrchestratorStats, PipelineCommand, ReceiveOrchestrator, Sinks,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::settings::{SettingsError, SettingsStore};

/// Consumer wait per iteration; bounds how long a stop takes to be seen.
const CONSUMER_WAIT: Duration = Duration::from_millis(100);
/// Producer pause after the transport reported a disconnect.
const DISCONNECT_BACKOFF: Duration = Duration::from_millis(100);
const WATERMARK_WARN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("receiver is not initialized")]
    NotInitialized,
    #[error("device is not connected")]
    NotConnected,
    #[error("operation not allowed while {0:?}")]
    InvalidState(RunState),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Dsp(#[from] DspError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

/// Settings addressable through [`Receiver::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    SampleRate,
    Gain,
    Bandwidth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    SampleRate(u32),
    Gain(i32),
    /// Channel passband edges relative to the carrier.
    Bandwidth { low_hz: f32, high_hz: f32 },
}

/// Everything a [`Receiver`] needs to build its device and pipeline.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub device_model: String,
    pub access: DeviceAccess,
    pub device_options: DeviceOptions,
    pub ring_slots: usize,
    pub ring_high_watermark: usize,
    /// Rates and device block size are filled in at start.
    pub pipeline: OrchestratorConfig,
    pub initial_freq: Freq,
    /// Hardware centre sits this far below the dial frequency.
    pub center_offset_hz: i64,
}

impl ReceiverConfig {
    pub fn from_server_config(cfg: &ServerConfig) -> Self {
        Self {
            device_model: cfg.device.model.clone().unwrap_or_default(),
            access: cfg.device.access.to_access(),
            device_options: cfg.device_options(),
            ring_slots: cfg.ring.slots,
            ring_high_watermark: cfg.ring.high_watermark,
            pipeline: cfg.pipeline(),
            initial_freq: Freq::new(cfg.device.initial_freq_hz),
            center_offset_hz: cfg.device.center_offset_hz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiverStats {
    pub state: RunState,
    /// Ring accounting as last seen by the consumer.
    pub ring: Option<RingStats>,
    pub pipeline: OrchestratorStats,
    /// Blocks read while the session was not running.
    pub discarded_blocks: u64,
    pub dropped_packets: u64,
    pub transport_errors: u64,
}

#[derive(Debug, Default)]
struct Telemetry {
    snapshot: Mutex<(Option<RingStats>, OrchestratorStats)>,
    transport_errors: AtomicU64,
}

struct Workers {
    producer: JoinHandle<Box<dyn BlockProducer>>,
    consumer: JoinHandle<ReceiveOrchestrator>,
    commands: CommandSender<PipelineCommand>,
}

/// Owns one device session and its pipeline. All methods are called from
/// the command thread; samples flow on the producer and consumer threads.
pub struct Receiver {
    config: ReceiverConfig,
    registry: DeviceRegistry,
    store: Option<Box<dyn SettingsStore>>,
    gate: Arc<SessionGate>,
    device: Option<Box<dyn SdrDevice>>,
    producer: Option<Box<dyn BlockProducer>>,
    sinks: Option<Sinks>,
    workers: Option<Workers>,
    telemetry: Arc<Telemetry>,
    /// Dial frequency.
    frequency: Freq,
    restored: bool,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, registry: DeviceRegistry) -> Self {
        let frequency = config.initial_freq;
        Self {
            config,
            registry,
            store: None,
            gate: Arc::new(SessionGate::new()),
            device: None,
            producer: None,
            sinks: None,
            workers: None,
            telemetry: Arc::new(Telemetry::default()),
            frequency,
            restored: false,
        }
    }

    /// Persist tuning and device settings across sessions.
    pub fn with_settings_store(mut self, store: impl SettingsStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Build the device and take ownership of the sinks. Replaces any
    /// device from an earlier call.
    pub fn initialize(&mut self, sinks: Sinks, frames_per_buffer: usize) -> Result<(), ReceiverError> {
        let state = self.gate.state();
        if state != RunState::Stopped {
            return Err(ReceiverError::InvalidState(state));
        }
        if let Some(mut old) = self.device.take() {
            self.producer = None;
            if old.is_connected() {
                old.disconnect()?;
            }
        }

        self.config.device_options.frames_per_buffer = frames_per_buffer.max(1);
        let device = self.registry.build_device(
            &self.config.device_model,
            self.config.access.clone(),
            self.config.device_options.clone(),
        )?;
        let info = device.info();
        info!(
            "Initialized {} device ({} frames per block, {} Hz)",
            info.model,
            info.block_frames,
            device.sample_rate()
        );
        self.device = Some(device);
        self.sinks = Some(sinks);
        Ok(())
    }

    pub fn connect(&mut self) -> Result<(), ReceiverError> {
        let device = self.device.as_mut().ok_or(ReceiverError::NotInitialized)?;
        if device.is_connected() {
            return Ok(());
        }
        let producer = match device.connect() {
            Ok(producer) => producer,
            Err(e) => {
                error!("Connecting to {} failed: {}", self.config.device_model, e);
                return Err(e.into());
            }
        };
        self.producer = Some(producer);
        let snapshot = device.state().snapshot();
        info!(
            "Connected to {} (serial {})",
            snapshot.name.as_deref().unwrap_or("unknown"),
            snapshot.serial.as_deref().unwrap_or("unknown")
        );
        self.set_frequency(self.frequency.hz)?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), ReceiverError> {
        if self.workers.is_some() {
            self.stop()?;
        }
        self.producer = None;
        if let Some(device) = self.device.as_mut() {
            if device.is_connected() {
                device.disconnect()?;
                info!("Disconnected from {}", self.config.device_model);
            }
        }
        Ok(())
    }

    /// Start streaming. On failure nothing is left running and the session
    /// is back in `Stopped`.
    pub fn start(&mut self) -> Result<(), ReceiverError> {
        if !self.device.as_ref().is_some_and(|d| d.is_connected()) || self.producer.is_none() {
            return Err(ReceiverError::NotConnected);
        }
        if self.sinks.is_none() {
            return Err(ReceiverError::NotInitialized);
        }
        if !self.gate.begin_start() {
            return Err(ReceiverError::InvalidState(self.gate.state()));
        }
        match self.launch() {
            Ok(()) => {
                self.gate.set_state(RunState::Running);
                info!(
                    "Receiver running: {} at {} Hz",
                    self.config.pipeline.mode, self.frequency.hz
                );
                Ok(())
            }
            Err(e) => {
                error!("Receiver start failed: {}", e);
                self.gate.set_state(RunState::Stopped);
                Err(e)
            }
        }
    }

    fn launch(&mut self) -> Result<(), ReceiverError> {
        self.restore_settings();

        let device = self.device.as_ref().ok_or(ReceiverError::NotInitialized)?;
        let info = device.info();
        let pipeline = OrchestratorConfig {
            input_rate: f64::from(device.sample_rate()),
            block_size: info.block_frames,
            ..self.config.pipeline.clone()
        };
        pipeline.validate()?;

        let sinks = self.sinks.take().ok_or(ReceiverError::NotInitialized)?;
        let orchestrator = ReceiveOrchestrator::new(pipeline, sinks)?;
        let producer = self.producer.take().ok_or(ReceiverError::NotConnected)?;

        let block_bytes = info.block_bytes();
        let (ring_tx, ring_rx) = ring_buffer(
            self.config.ring_slots,
            self.config.ring_high_watermark,
            || vec![0u8; block_bytes],
        );
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();

        let consumer = {
            let gate = Arc::clone(&self.gate);
            let telemetry = Arc::clone(&self.telemetry);
            let format = info.sample_format;
            let frames = info.block_frames;
            thread::Builder::new()
                .name("rx-consumer".to_string())
                .spawn(move || {
                    consumer_loop(orchestrator, ring_rx, gate, cmd_rx, format, frames, telemetry)
                })
                .map_err(|e| ReceiverError::Spawn("rx-consumer", e))?
        };
        let producer = {
            let gate = Arc::clone(&self.gate);
            let telemetry = Arc::clone(&self.telemetry);
            thread::Builder::new()
                .name("rx-producer".to_string())
                .spawn(move || producer_loop(producer, ring_tx, gate, telemetry))
        };
        let producer = match producer {
            Ok(handle) => handle,
            Err(e) => {
                self.gate.set_state(RunState::Stopping);
                if let Ok(orchestrator) = consumer.join() {
                    self.sinks = Some(orchestrator.into_sinks());
                }
                return Err(ReceiverError::Spawn("rx-producer", e));
            }
        };
        self.workers = Some(Workers {
            producer,
            consumer,
            commands: cmd_tx,
        });

        let streamed = match self.device.as_mut() {
            Some(device) => device.start_stream(),
            None => Err(DeviceError::NotConnected),
        };
        if let Err(e) = streamed {
            self.gate.set_state(RunState::Stopping);
            self.join_workers()?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Stop streaming, join the workers and persist the session settings.
    pub fn stop(&mut self) -> Result<(), ReceiverError> {
        match self.gate.state() {
            RunState::Running => {}
            RunState::Stopped => return Ok(()),
            other => return Err(ReceiverError::InvalidState(other)),
        }
        self.gate.set_state(RunState::Stopping);
        let streamed = match self.device.as_mut() {
            Some(device) => device.stop_stream(),
            None => Ok(()),
        };
        if let Err(e) = &streamed {
            warn!("Device did not acknowledge stop: {}", e);
        }
        let joined = self.join_workers();
        self.gate.set_state(RunState::Stopped);
        self.persist_settings();
        info!("Receiver stopped");
        joined?;
        streamed?;
        Ok(())
    }

    /// Join both workers, taking back the producer and the sinks.
    fn join_workers(&mut self) -> Result<(), ReceiverError> {
        let Some(workers) = self.workers.take() else {
            return Ok(());
        };
        drop(workers.commands);
        let producer = workers.producer.join();
        let consumer = workers.consumer.join();
        match producer {
            Ok(producer) => self.producer = Some(producer),
            Err(_) => return Err(ReceiverError::WorkerPanicked("rx-producer")),
        }
        match consumer {
            Ok(orchestrator) => self.sinks = Some(orchestrator.into_sinks()),
            Err(_) => return Err(ReceiverError::WorkerPanicked("rx-consumer")),
        }
        Ok(())
    }

    /// Tune to a dial frequency. Returns the dial frequency the device
    /// actually accepted. Before connect the value is only remembered.
    pub fn set_frequency(&mut self, hz: u64) -> Result<Freq, ReceiverError> {
        let offset = self.config.center_offset_hz;
        let device = match self.device.as_mut() {
            Some(device) if device.is_connected() => device,
            _ => {
                self.frequency = Freq::new(hz);
                return Ok(self.frequency);
            }
        };
        let centre = Freq::new(hz.saturating_add_signed(-offset));
        let applied = device.set_frequency(centre)?;
        self.frequency = Freq::new(applied.hz.saturating_add_signed(offset));
        debug!("Tuned to {} Hz (centre {} Hz)", self.frequency.hz, applied.hz);
        Ok(self.frequency)
    }

    pub fn frequency(&self) -> Freq {
        self.frequency
    }

    /// Switch demodulator. A mode the device rate cannot carry is refused
    /// and the current mode stays in effect.
    pub fn set_mode(&mut self, mode: RxMode) -> Result<(), ReceiverError> {
        self.pipeline_command(PipelineCommand::SetMode(mode))
    }

    pub fn mode(&self) -> RxMode {
        self.config.pipeline.mode
    }

    /// Queue a pipeline change. It applies between blocks when running and
    /// is kept for the next start either way.
    pub fn pipeline_command(&mut self, cmd: PipelineCommand) -> Result<(), ReceiverError> {
        if let PipelineCommand::SetMode(_) = cmd {
            self.check_pipeline(&cmd)?;
        }
        self.config.pipeline.apply_command(&cmd);
        if let Some(workers) = &self.workers {
            if workers.commands.send(cmd).is_err() {
                warn!("Pipeline command dropped: consumer has exited");
            }
        }
        Ok(())
    }

    /// Validate the pipeline `cmd` would leave behind at the device's rate.
    /// Without a device the check waits until `start`.
    fn check_pipeline(&self, cmd: &PipelineCommand) -> Result<(), ReceiverError> {
        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };
        let mut next = OrchestratorConfig {
            input_rate: f64::from(device.sample_rate()),
            block_size: device.info().block_frames,
            ..self.config.pipeline.clone()
        };
        next.apply_command(cmd);
        next.validate()?;
        Ok(())
    }

    pub fn get(&self, key: SettingKey) -> Option<Setting> {
        match key {
            SettingKey::SampleRate => self
                .device
                .as_ref()
                .map(|d| Setting::SampleRate(d.sample_rate())),
            SettingKey::Gain => self
                .device
                .as_ref()
                .and_then(|d| d.state().rf_gain_db())
                .or(self.config.device_options.gain_db)
                .map(Setting::Gain),
            SettingKey::Bandwidth => {
                let pipeline = &self.config.pipeline;
                let (low_hz, high_hz) = pipeline
                    .passband_hz
                    .unwrap_or_else(|| pipeline.mode.default_passband_hz(pipeline.cw_pitch_hz));
                Some(Setting::Bandwidth { low_hz, high_hz })
            }
        }
    }

    /// Apply a setting and return the value in effect. The sample rate can
    /// only change while stopped.
    pub fn set(&mut self, setting: Setting) -> Result<Setting, ReceiverError> {
        match setting {
            Setting::SampleRate(hz) => {
                let state = self.gate.state();
                if state != RunState::Stopped {
                    return Err(ReceiverError::InvalidState(state));
                }
                let device = self.device.as_mut().ok_or(ReceiverError::NotInitialized)?;
                let applied = device.set_sample_rate(hz)?;
                self.config.device_options.sample_rate_hz = Some(applied);
                Ok(Setting::SampleRate(applied))
            }
            Setting::Gain(db) => {
                let device = self.device.as_mut().ok_or(ReceiverError::NotInitialized)?;
                let applied = device.set_gain(db)?;
                self.config.device_options.gain_db = Some(applied);
                Ok(Setting::Gain(applied))
            }
            Setting::Bandwidth { low_hz, high_hz } => {
                if !(low_hz < high_hz) {
                    return Err(DspError::Configuration(format!(
                        "passband {low_hz}..{high_hz} Hz is empty"
                    ))
                    .into());
                }
                self.pipeline_command(PipelineCommand::SetFilter { low_hz, high_hz })?;
                Ok(setting)
            }
        }
    }

    pub fn state(&self) -> RunState {
        self.gate.state()
    }

    pub fn device_snapshot(&self) -> Option<DeviceSnapshot> {
        self.device.as_ref().map(|d| d.state().snapshot())
    }

    pub fn stats(&self) -> ReceiverStats {
        let (ring, pipeline) = self
            .telemetry
            .snapshot
            .lock()
            .map(|guard| *guard)
            .unwrap_or_default();
        ReceiverStats {
            state: self.gate.state(),
            ring,
            pipeline,
            discarded_blocks: self.gate.discarded_blocks(),
            dropped_packets: self.gate.dropped_packets(),
            transport_errors: self.telemetry.transport_errors.load(Ordering::Relaxed),
        }
    }

    /// Pick up the previous session's tuning on the first start.
    fn restore_settings(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let settings = match store.load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring saved session settings: {}", e);
                return;
            }
        };
        if let Some(device) = self.device.as_mut() {
            if let Some(saved) = settings.device(&self.config.device_model) {
                if let Some(rate) = saved.sample_rate {
                    if let Err(e) = device.set_sample_rate(rate) {
                        warn!("Saved sample rate {} Hz not applied: {}", rate, e);
                    }
                }
                if let Some(gain) = saved.gain_db {
                    if let Err(e) = device.set_gain(gain) {
                        warn!("Saved gain {} dB not applied: {}", gain, e);
                    }
                }
            }
        }
        // After the saved rate, which decides whether the mode can run.
        if let Some(mode) = settings.last_mode {
            if let Err(e) = self.set_mode(mode) {
                warn!("Saved mode {} not applied: {}", mode, e);
            }
        }
        if let Some(hz) = settings.last_freq_hz {
            if let Err(e) = self.set_frequency(hz) {
                warn!("Saved frequency {} Hz not applied: {}", hz, e);
            }
        }
        debug!("Restored session settings");
    }

    fn persist_settings(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let mut settings = match store.load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Replacing unreadable session settings: {}", e);
                Default::default()
            }
        };
        settings.last_freq_hz = Some(self.frequency.hz);
        settings.last_mode = Some(self.config.pipeline.mode);
        if let Some(device) = self.device.as_ref() {
            let entry = settings.device_mut(&self.config.device_model);
            entry.sample_rate = Some(device.sample_rate());
            entry.gain_db = device.state().rf_gain_db().or(entry.gain_db);
        }
        if let Err(e) = store.save(&settings) {
            warn!("Failed to save session settings: {}", e);
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if self.workers.is_some() {
            if let Err(e) = self.stop() {
                warn!("Receiver stop on drop failed: {}", e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker loops
// ---------------------------------------------------------------------------

fn producer_loop(
    mut producer: Box<dyn BlockProducer>,
    ring: SlotProducer<Vec<u8>>,
    gate: Arc<SessionGate>,
    telemetry: Arc<Telemetry>,
) -> Box<dyn BlockProducer> {
    let mut last_warn: Option<Instant> = None;
    while gate.should_run() {
        if ring.near_full() && last_warn.map_or(true, |t| t.elapsed() >= WATERMARK_WARN_INTERVAL) {
            let stats = ring.stats();
            warn!(
                "Sample ring near full: {}/{} slots filled",
                stats.filled, stats.capacity
            );
            last_warn = Some(Instant::now());
        }
        match producer.produce_cycle(&ring, &gate) {
            Ok(_) => {}
            Err(TransportError::Disconnected) => {
                telemetry.transport_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Transport disconnected; backing off");
                thread::sleep(DISCONNECT_BACKOFF);
            }
            Err(e) => {
                telemetry.transport_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Producer cycle aborted: {}", e);
            }
        }
    }
    debug!("Producer exiting");
    producer
}

fn consumer_loop(
    mut orchestrator: ReceiveOrchestrator,
    ring: SlotConsumer<Vec<u8>>,
    gate: Arc<SessionGate>,
    commands: CommandReceiver<PipelineCommand>,
    format: SampleFormat,
    frames: usize,
    telemetry: Arc<Telemetry>,
) -> ReceiveOrchestrator {
    let mut samples = vec![Complex::new(0.0_f32, 0.0); frames];
    while gate.should_run() {
        for cmd in commands.try_iter() {
            if let Err(e) = orchestrator.apply(cmd) {
                warn!("Pipeline command rejected: {}", e);
            }
        }
        match ring.acquire_filled_timeout(CONSUMER_WAIT) {
            Ok(Some(slot)) => {
                let n = format.decode(&slot, &mut samples);
                slot.release();
                orchestrator.process_block(&samples[..n]);
                if let Ok(mut snapshot) = telemetry.snapshot.lock() {
                    *snapshot = (Some(ring.stats()), orchestrator.stats());
                }
            }
            Ok(None) => {}
            Err(RingError::Disconnected) => break,
        }
    }
    debug!("Consumer exiting");
    orchestrator
}
