// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod session;
mod settings;
mod sinks;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use rx_app::{init_logging, normalize_name, ConfigFile};
use rx_backend::{register_builtin_devices_on, DeviceAccess, DeviceRegistry};
use rx_core::{DynResult, RxMode};
use rx_dsp::{BroadcastAudioSink, SharedSpectrum, Sinks, SpectrumKind};

use config::ServerConfig;
use session::{Receiver, ReceiverConfig, SettingKey};
use settings::TomlSettingsStore;
use sinks::PcmFileSink;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - SDR receiver daemon");
const AUDIO_BROADCAST_CAPACITY: usize = 32;
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Device family to use (e.g. sdriq, netsdr, rtltcp, dummy)
    #[arg(short = 'd', long = "device")]
    device: Option<String>,
    /// Access method to reach the device
    #[arg(short = 'a', long = "access", value_enum)]
    access: Option<AccessKind>,
    /// Device address:
    /// when access is usb: <index>;
    /// when access is tcp or tcp-udp: <host>:<port>
    #[arg(value_name = "DEVICE_ADDR")]
    device_addr: Option<String>,
    /// Dial frequency in Hz
    #[arg(short = 'f', long = "freq")]
    freq: Option<u64>,
    /// Demodulation mode (e.g. USB, AM, WFM)
    #[arg(short = 'm', long = "mode")]
    mode: Option<RxMode>,
    /// Write audio as raw f32 little-endian samples to FILE
    #[arg(long = "pcm-out", value_name = "FILE")]
    pcm_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AccessKind {
    Usb,
    Tcp,
    TcpUdp,
    None,
}

/// Resolved configuration after merging config file and CLI arguments.
struct ResolvedConfig {
    device: String,
    access: DeviceAccess,
}

fn resolve_config(
    cli: &Cli,
    cfg: &ServerConfig,
    registry: &DeviceRegistry,
) -> DynResult<ResolvedConfig> {
    let device_str = cli.device.clone().or_else(|| cfg.device.model.clone());
    let device = match device_str.as_deref() {
        Some(name) => normalize_name(name),
        None => {
            return Err(
                "Device model not specified. Use --device or set [device].model in config.".into(),
            )
        }
    };
    if !registry.is_registered(&device) {
        return Err(format!(
            "Unknown device model: {} (available: {})",
            device,
            registry.registered_devices().join(", ")
        )
        .into());
    }

    let access_type = cli
        .access
        .map(|a| match a {
            AccessKind::Usb => "usb",
            AccessKind::Tcp => "tcp",
            AccessKind::TcpUdp => "tcp-udp",
            AccessKind::None => "none",
        })
        .or(cfg.device.access.access_type.as_deref());

    let access = match access_type {
        Some("usb") => {
            let index = match cli.device_addr.as_deref() {
                Some(addr) => addr
                    .trim()
                    .parse()
                    .map_err(|e| format!("Invalid USB index '{}': {}", addr, e))?,
                None => cfg.device.access.usb_index.unwrap_or(0),
            };
            DeviceAccess::Usb { index }
        }
        Some(kind @ ("tcp" | "tcp-udp")) => {
            let addr = if let Some(ref addr) = cli.device_addr {
                addr.clone()
            } else if let (Some(host), Some(port)) =
                (&cfg.device.access.host, cfg.device.access.port)
            {
                format!("{}:{}", host, port)
            } else {
                return Err(format!(
                    "{} access requires host:port. Use argument or set [device.access].host and .port in config.",
                    kind
                )
                .into());
            };
            if kind == "tcp" {
                DeviceAccess::Tcp { addr }
            } else {
                let data_port = match cfg.device.access.data_port {
                    Some(port) => port,
                    None => port_of(&addr)?,
                };
                DeviceAccess::TcpUdp { addr, data_port }
            }
        }
        Some("none") | None => DeviceAccess::None,
        Some(other) => return Err(format!("Unknown access type: {}", other).into()),
    };

    Ok(ResolvedConfig { device, access })
}

fn port_of(addr: &str) -> DynResult<u16> {
    let port = addr
        .rsplit_once(':')
        .map(|(_, port)| port)
        .ok_or_else(|| format!("Address '{}' has no port", addr))?;
    Ok(port
        .parse()
        .map_err(|e| format!("Invalid port in '{}': {}", addr, e))?)
}

fn build_sinks(
    cli: &Cli,
    cfg: &ServerConfig,
    spectrum: &SharedSpectrum,
    frames: &Arc<AtomicU64>,
) -> DynResult<Sinks> {
    if let Some(ref path) = cli.pcm_out {
        let sink = PcmFileSink::create(path)
            .map_err(|e| format!("Cannot open PCM output {}: {}", path.display(), e))?;
        info!("Writing audio to {}", path.display());
        return Ok(Sinks::new(sink).with_spectrum(spectrum.clone()));
    }

    let (tx, _) = broadcast::channel::<Vec<f32>>(AUDIO_BROADCAST_CAPACITY);
    let frame_size = BroadcastAudioSink::frame_size_for(
        cfg.dsp.audio_sample_rate,
        usize::from(cfg.dsp.audio_channels),
        cfg.dsp.frame_duration_ms,
    );
    let sink = BroadcastAudioSink::new(tx, frame_size);
    let mut rx = sink.subscribe();
    let frames = Arc::clone(frames);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(_) => {
                    frames.fetch_add(1, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Audio monitor lagged by {} frames", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    Ok(Sinks::new(sink).with_spectrum(spectrum.clone()))
}

fn log_status(receiver: &Receiver, spectrum: &SharedSpectrum, frames: &AtomicU64) {
    let stats = receiver.stats();
    let peak_db = spectrum
        .latest(SpectrumKind::Zoom)
        .and_then(|frame| frame.bins.iter().copied().reduce(f32::max));
    info!(
        "{} {} Hz: signal {:.1} dBFS, peak {}, {} blocks in, {} discarded, {} audio frames",
        receiver.mode(),
        receiver.frequency().hz,
        stats.pipeline.signal_db,
        peak_db.map_or_else(|| "-".to_string(), |db| format!("{:.1} dBFS", db)),
        stats.pipeline.input_blocks,
        stats.discarded_blocks,
        frames.load(Ordering::Relaxed)
    );
    if let Some(ring) = stats.ring {
        debug!(
            "Ring {}/{} filled, {} published, {} consumed, {} transport errors",
            ring.filled, ring.capacity, ring.published, ring.consumed, stats.transport_errors
        );
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = DeviceRegistry::new();
    register_builtin_devices_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let resolved = resolve_config(&cli, &cfg, &registry)?;
    info!(
        "Starting rx-server (device: {}, access: {:?})",
        resolved.device, resolved.access
    );

    let mut receiver_config = ReceiverConfig::from_server_config(&cfg);
    receiver_config.device_model = resolved.device;
    receiver_config.access = resolved.access;
    let mut receiver = Receiver::new(receiver_config, registry);
    if let Some(path) = cfg.settings.resolved_path() {
        let store = TomlSettingsStore::new(path);
        debug!("Session settings at {}", store.path().display());
        receiver = receiver.with_settings_store(store);
    }

    let spectrum = SharedSpectrum::new();
    let frames = Arc::new(AtomicU64::new(0));
    let sinks = build_sinks(&cli, &cfg, &spectrum, &frames)?;
    receiver.initialize(sinks, cfg.ring.frames_per_buffer)?;
    receiver.connect()?;
    if let Some(snapshot) = receiver.device_snapshot() {
        debug!("Device state after connect: {:?}", snapshot);
    }
    receiver.start()?;
    info!(
        "Sample rate {:?}, gain {:?}, passband {:?}",
        receiver.get(SettingKey::SampleRate),
        receiver.get(SettingKey::Gain),
        receiver.get(SettingKey::Bandwidth)
    );
    // Explicit CLI tuning wins over the restored session.
    if let Some(mode) = cli.mode {
        receiver.set_mode(mode)?;
    }
    if let Some(hz) = cli.freq {
        let applied = receiver.set_frequency(hz)?;
        info!("Tuned to {} Hz", applied.hz);
    }

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = status.tick() => log_status(&receiver, &spectrum, &frames),
        }
    }

    if let Err(e) = receiver.stop() {
        warn!("Stop failed: {}", e);
    }
    receiver.disconnect()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        register_builtin_devices_on(&mut registry);
        registry
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("rx-server").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_overrides_config() {
        let cfg = ServerConfig::default();
        let resolved = resolve_config(
            &cli(&["--device", "RTL_TCP", "--access", "tcp", "10.0.0.5:1234"]),
            &cfg,
            &registry(),
        )
        .unwrap();
        assert_eq!(resolved.device, "rtltcp");
        assert_eq!(
            resolved.access,
            DeviceAccess::Tcp {
                addr: "10.0.0.5:1234".to_string()
            }
        );
    }

    #[test]
    fn test_tcp_udp_data_port_from_address() {
        let resolved = resolve_config(
            &cli(&["-d", "netsdr", "-a", "tcp-udp", "sdr.local:50000"]),
            &ServerConfig::default(),
            &registry(),
        )
        .unwrap();
        assert_eq!(
            resolved.access,
            DeviceAccess::TcpUdp {
                addr: "sdr.local:50000".to_string(),
                data_port: 50000
            }
        );
    }

    #[test]
    fn test_missing_or_unknown_device() {
        let err = resolve_config(&cli(&[]), &ServerConfig::default(), &registry())
            .err()
            .unwrap();
        assert!(err.to_string().contains("--device"));

        let err = resolve_config(&cli(&["-d", "ft817"]), &ServerConfig::default(), &registry())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unknown device model"));
    }

    #[test]
    fn test_mode_and_frequency_flags() {
        let parsed = cli(&["-d", "dummy", "--mode", "wfm", "--freq", "98500000"]);
        assert_eq!(parsed.mode, Some(RxMode::WFM));
        assert_eq!(parsed.freq, Some(98_500_000));
        let resolved =
            resolve_config(&parsed, &ServerConfig::default(), &registry()).unwrap();
        assert_eq!(resolved.access, DeviceAccess::None);
    }
}
