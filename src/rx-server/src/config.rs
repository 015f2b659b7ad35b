// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for rx-server.
//!
//! Config is loaded from the `[rx-server]` section of `rx-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./rx-rs.toml`
//! 3. `~/.config/rx-rs/rx-rs.toml`
//! 4. `/etc/rx-rs/rx-rs.toml`

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use rx_app::ConfigFile;
use rx_backend::{DeviceAccess, DeviceOptions};
use rx_core::RxMode;
use rx_dsp::{
    AgcSettings, IqBalanceSettings, NoiseBlankerSettings, NoiseReductionSettings,
    OrchestratorConfig,
};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Receiver front-end selection and initial tuning
    pub device: DeviceConfig,
    /// Sample buffer pool between the producer and consumer threads
    pub ring: RingConfig,
    /// Receive pipeline
    pub dsp: DspConfig,
    /// Persisted session state
    pub settings: SettingsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device family (e.g., "sdriq", "netsdr", "rtltcp", "dummy")
    pub model: Option<String>,
    /// Dial frequency (Hz) tuned on connect
    pub initial_freq_hz: u64,
    pub initial_mode: RxMode,
    /// Requested sample rate; the device snaps it to a supported value
    pub sample_rate: Option<u32>,
    pub gain_db: Option<i32>,
    /// Hardware centre sits this far below the dial frequency so the
    /// channel is kept off the DC spike.
    pub center_offset_hz: i64,
    /// Bound on every blocking transport call
    pub io_timeout_ms: u64,
    /// Access method configuration
    pub access: AccessConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: None,
            initial_freq_hz: 7_074_000,
            initial_mode: RxMode::USB,
            sample_rate: None,
            gain_db: None,
            center_offset_hz: 0,
            io_timeout_ms: 500,
            access: AccessConfig::default(),
        }
    }
}

/// Access method configuration for reaching the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Access type: "usb", "tcp", "tcp-udp" or "none"
    #[serde(rename = "type")]
    pub access_type: Option<String>,
    /// Host address (for tcp and tcp-udp access)
    pub host: Option<String>,
    /// Control port (for tcp and tcp-udp access)
    pub port: Option<u16>,
    /// Local UDP port receiving samples (for tcp-udp access)
    pub data_port: Option<u16>,
    /// Index among matching USB devices
    pub usb_index: Option<usize>,
}

impl AccessConfig {
    /// Translate into the backend's access description. Call after
    /// [`ServerConfig::validate`].
    pub fn to_access(&self) -> DeviceAccess {
        let addr = || {
            format!(
                "{}:{}",
                self.host.as_deref().unwrap_or("127.0.0.1"),
                self.port.unwrap_or(0)
            )
        };
        match self.access_type.as_deref() {
            Some("usb") => DeviceAccess::Usb {
                index: self.usb_index.unwrap_or(0),
            },
            Some("tcp") => DeviceAccess::Tcp { addr: addr() },
            Some("tcp-udp") => DeviceAccess::TcpUdp {
                addr: addr(),
                data_port: self.data_port.or(self.port).unwrap_or(0),
            },
            _ => DeviceAccess::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of sample buffers allocated up front
    pub slots: usize,
    /// Filled count at which a near-full warning is logged
    pub high_watermark: usize,
    /// I/Q frames per buffer for devices without a fixed block size
    pub frames_per_buffer: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            slots: 16,
            high_watermark: 12,
            frames_per_buffer: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    /// Samples per channel-chain block after decimation
    pub block_size: usize,
    pub audio_sample_rate: u32,
    /// Number of audio channels (1 = mono, 2 = stereo)
    pub audio_channels: u8,
    /// Audio frame duration in milliseconds
    pub frame_duration_ms: u16,
    /// Linear output gain
    pub volume: f32,
    pub cw_pitch_hz: f32,
    /// Squelch threshold in dBFS; omitted means open
    pub squelch_db: Option<f32>,
    /// Bandpass FIR length
    pub filter_taps: usize,
    pub noise_reduction: NoiseReductionSettings,
    pub agc: AgcSettings,
    pub noise_blanker: NoiseBlankerSettings,
    pub iq_balance: IqBalanceSettings,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            audio_sample_rate: 48_000,
            audio_channels: 1,
            frame_duration_ms: 20,
            volume: 1.0,
            cw_pitch_hz: 600.0,
            squelch_db: None,
            filter_taps: 255,
            noise_reduction: NoiseReductionSettings::default(),
            agc: AgcSettings::default(),
            noise_blanker: NoiseBlankerSettings::default(),
            iq_balance: IqBalanceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Session state file; defaults to the user data directory
    pub path: Option<PathBuf>,
}

impl SettingsConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join("rx-rs").join("session.toml")))
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.device.initial_freq_hz == 0 {
            return Err("[device].initial_freq_hz must be > 0".to_string());
        }
        if self.device.sample_rate == Some(0) {
            return Err("[device].sample_rate must be > 0 when set".to_string());
        }
        if self.device.io_timeout_ms == 0 {
            return Err("[device].io_timeout_ms must be > 0".to_string());
        }
        validate_access(&self.device.access)?;

        if self.ring.slots < 2 {
            return Err("[ring].slots must be >= 2".to_string());
        }
        if self.ring.high_watermark == 0 || self.ring.high_watermark > self.ring.slots {
            return Err("[ring].high_watermark must be in 1..=[ring].slots".to_string());
        }
        if self.ring.frames_per_buffer == 0 {
            return Err("[ring].frames_per_buffer must be > 0".to_string());
        }

        validate_dsp(&self.dsp)?;
        Ok(())
    }

    /// Device options derived from `[device]` and `[ring]`.
    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            sample_rate_hz: self.device.sample_rate,
            gain_db: self.device.gain_db,
            io_timeout: Duration::from_millis(self.device.io_timeout_ms),
            frames_per_buffer: self.ring.frames_per_buffer,
        }
    }

    /// Pipeline settings derived from `[dsp]`. Rates and block size are
    /// filled in from the device when a session starts.
    pub fn pipeline(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            dsp_block_size: self.dsp.block_size,
            audio_rate: f64::from(self.dsp.audio_sample_rate),
            audio_channels: usize::from(self.dsp.audio_channels),
            mode: self.device.initial_mode,
            offset_hz: self.device.center_offset_hz as f64,
            cw_pitch_hz: self.dsp.cw_pitch_hz,
            volume: self.dsp.volume,
            squelch_db: self.dsp.squelch_db,
            agc: self.dsp.agc,
            noise_blanker: self.dsp.noise_blanker,
            noise_reduction: self.dsp.noise_reduction,
            iq_balance: self.dsp.iq_balance,
            filter_taps: self.dsp.filter_taps,
            ..OrchestratorConfig::default()
        }
    }

    /// Generate an example configuration wrapped under the `[rx-server]`
    /// section header, suitable for use in a combined `rx-rs.toml` file.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "rx-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            device: DeviceConfig {
                model: Some("netsdr".to_string()),
                initial_freq_hz: 7_074_000,
                initial_mode: RxMode::USB,
                sample_rate: Some(192_000),
                gain_db: Some(0),
                center_offset_hz: 10_000,
                io_timeout_ms: 500,
                access: AccessConfig {
                    access_type: Some("tcp-udp".to_string()),
                    host: Some("192.168.1.50".to_string()),
                    port: Some(50000),
                    data_port: Some(50000),
                    usb_index: None,
                },
            },
            ring: RingConfig::default(),
            dsp: DspConfig::default(),
            settings: SettingsConfig::default(),
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

fn validate_access(access: &AccessConfig) -> Result<(), String> {
    match access.access_type.as_deref().unwrap_or("none") {
        "none" | "usb" => {}
        kind @ ("tcp" | "tcp-udp") => {
            if access.host.as_deref().unwrap_or("").trim().is_empty() {
                return Err(format!(
                    "[device.access].host must be set for {kind} access ([device.access].type='{kind}')"
                ));
            }
            if access.port.unwrap_or(0) == 0 {
                return Err(format!(
                    "[device.access].port must be > 0 for {kind} access ([device.access].type='{kind}')"
                ));
            }
            if kind == "tcp-udp" && access.data_port == Some(0) {
                return Err("[device.access].data_port must be > 0 when set".to_string());
            }
        }
        other => {
            return Err(format!(
                "[device.access].type '{}' is invalid (expected 'usb', 'tcp', 'tcp-udp', or 'none')",
                other
            ))
        }
    }
    Ok(())
}

fn validate_dsp(dsp: &DspConfig) -> Result<(), String> {
    if dsp.block_size == 0 {
        return Err("[dsp].block_size must be > 0".to_string());
    }
    if !(8_000..=192_000).contains(&dsp.audio_sample_rate) {
        return Err("[dsp].audio_sample_rate must be in 8000..=192000".to_string());
    }
    if !(1..=2).contains(&dsp.audio_channels) {
        return Err("[dsp].audio_channels must be 1 or 2".to_string());
    }
    if dsp.frame_duration_ms == 0 {
        return Err("[dsp].frame_duration_ms must be > 0".to_string());
    }
    if !(0.0..=10.0).contains(&dsp.volume) {
        return Err("[dsp].volume must be in 0..=10".to_string());
    }
    if !(100.0..=2_000.0).contains(&dsp.cw_pitch_hz) {
        return Err("[dsp].cw_pitch_hz must be in 100..=2000".to_string());
    }
    if matches!(dsp.squelch_db, Some(db) if !(-160.0..=0.0).contains(&db)) {
        return Err("[dsp].squelch_db must be in -160..=0 when set".to_string());
    }
    if !(15..=4095).contains(&dsp.filter_taps) {
        return Err("[dsp].filter_taps must be in 15..=4095".to_string());
    }
    dsp.agc.validate()?;
    dsp.noise_blanker.validate()?;
    dsp.noise_reduction.validate()?;
    dsp.iq_balance.validate()?;
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "rx-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rx_dsp::AgcMode;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.device.initial_freq_hz, 7_074_000);
        assert_eq!(config.device.initial_mode, RxMode::USB);
        assert_eq!(config.ring.slots, 16);
        assert_eq!(config.ring.frames_per_buffer, 2048);
        assert_eq!(config.dsp.audio_sample_rate, 48_000);
        assert_eq!(config.dsp.agc.mode, AgcMode::Med);
        assert!(config.settings.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[device]
model = "rtl_tcp"
initial_freq_hz = 145500000
initial_mode = "FM"
sample_rate = 1024000
gain_db = 30

[device.access]
type = "tcp"
host = "127.0.0.1"
port = 1234

[ring]
slots = 8
high_watermark = 6

[dsp]
audio_channels = 2
squelch_db = -40.0

[dsp.agc]
mode = "fast"
threshold_db = -90

[settings]
path = "/tmp/rx-session.toml"
"#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(config.device.model.as_deref(), Some("rtl_tcp"));
        assert_eq!(config.device.initial_mode, RxMode::FM);
        assert_eq!(config.device.sample_rate, Some(1_024_000));
        assert_eq!(
            config.device.access.to_access(),
            DeviceAccess::Tcp {
                addr: "127.0.0.1:1234".to_string()
            }
        );
        assert_eq!(config.ring.slots, 8);
        assert_eq!(config.ring.frames_per_buffer, 2048, "unset keys keep defaults");
        assert_eq!(config.dsp.audio_channels, 2);
        assert_eq!(config.dsp.agc.mode, AgcMode::Fast);
        assert_eq!(config.dsp.agc.threshold_db, -90);
        assert_eq!(config.dsp.agc.manual_gain_db, 30);
        assert_eq!(
            config.settings.resolved_path(),
            Some(PathBuf::from("/tmp/rx-session.toml"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tcp_udp_access() {
        let access = AccessConfig {
            access_type: Some("tcp-udp".to_string()),
            host: Some("10.0.0.2".to_string()),
            port: Some(50000),
            data_port: None,
            usb_index: None,
        };
        assert!(validate_access(&access).is_ok());
        assert_eq!(
            access.to_access(),
            DeviceAccess::TcpUdp {
                addr: "10.0.0.2:50000".to_string(),
                data_port: 50000
            },
            "data port follows the control port"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().unwrap_err().contains("log_level"));

        let mut config = ServerConfig::default();
        config.device.access.access_type = Some("tcp".to_string());
        assert!(config.validate().unwrap_err().contains("[device.access].host"));

        let mut config = ServerConfig::default();
        config.device.access.access_type = Some("serial".to_string());
        assert!(config.validate().unwrap_err().contains("is invalid"));

        let mut config = ServerConfig::default();
        config.ring.high_watermark = config.ring.slots + 1;
        assert!(config.validate().unwrap_err().contains("high_watermark"));

        let mut config = ServerConfig::default();
        config.dsp.audio_channels = 3;
        assert!(config.validate().unwrap_err().contains("audio_channels"));

        let mut config = ServerConfig::default();
        config.dsp.agc.slope = 200;
        assert!(config.validate().unwrap_err().contains("[dsp.agc].slope"));
    }

    #[test]
    fn test_pipeline_from_config() {
        let mut config = ServerConfig::default();
        config.device.initial_mode = RxMode::CW;
        config.device.center_offset_hz = 12_000;
        config.dsp.audio_channels = 2;
        let pipeline = config.pipeline();
        assert_eq!(pipeline.mode, RxMode::CW);
        assert_eq!(pipeline.offset_hz, 12_000.0);
        assert_eq!(pipeline.audio_channels, 2);
        assert_eq!(pipeline.dsp_block_size, 512);
    }

    #[test]
    fn test_load_from_combined_toml() {
        let example = ServerConfig::example_combined_toml();
        assert!(example.contains("[rx-server"));
        let config = ServerConfig::load_from_str(&example).unwrap();
        assert_eq!(config.device.model.as_deref(), Some("netsdr"));
        assert_eq!(config.device.center_offset_hz, 10_000);
        assert!(config.validate().is_ok());
    }
}
