// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Session state kept across runs: last tuning and per-device settings.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::{Arc, Mutex};

use rx_app::normalize_name;
use rx_core::RxMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O on {0}: {1}")]
    Io(PathBuf, io::Error),
    #[error("settings parse error in {0}: {1}")]
    Parse(PathBuf, String),
    #[error("settings encode error: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub sample_rate: Option<u32>,
    pub gain_db: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub last_freq_hz: Option<u64>,
    pub last_mode: Option<RxMode>,
    /// Keyed by normalized device name.
    pub devices: BTreeMap<String, DeviceSettings>,
}

impl SessionSettings {
    pub fn device(&self, name: &str) -> Option<&DeviceSettings> {
        self.devices.get(&normalize_name(name))
    }

    pub fn device_mut(&mut self, name: &str) -> &mut DeviceSettings {
        self.devices.entry(normalize_name(name)).or_default()
    }
}

/// Backing storage for [`SessionSettings`].
pub trait SettingsStore: Send {
    /// Missing state is not an error; it loads as the default.
    fn load(&self) -> Result<SessionSettings, SettingsError>;

    fn save(&self, settings: &SessionSettings) -> Result<(), SettingsError>;
}

/// Settings in a standalone TOML file.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<SessionSettings, SettingsError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SessionSettings::default()),
            Err(e) => return Err(SettingsError::Io(self.path.clone(), e)),
        };
        toml::from_str(&content).map_err(|e| SettingsError::Parse(self.path.clone(), e.to_string()))
    }

    fn save(&self, settings: &SessionSettings) -> Result<(), SettingsError> {
        let content =
            toml::to_string_pretty(settings).map_err(|e| SettingsError::Encode(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SettingsError::Io(parent.to_path_buf(), e))?;
            }
        }
        // Write aside and rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).map_err(|e| SettingsError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| SettingsError::Io(self.path.clone(), e))
    }
}

/// Settings held in memory, shared between clones.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    inner: Arc<Mutex<SessionSettings>>,
}

#[cfg(test)]
impl MemorySettingsStore {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(settings)),
        }
    }

    pub fn snapshot(&self) -> SessionSettings {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<SessionSettings, SettingsError> {
        Ok(self.snapshot())
    }

    fn save(&self, settings: &SessionSettings) -> Result<(), SettingsError> {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = settings.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("rx-settings-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_missing_file_loads_default() {
        let store = TomlSettingsStore::new(temp_path("missing.toml"));
        assert_eq!(store.load().unwrap(), SessionSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("nested/dir/session.toml");
        let store = TomlSettingsStore::new(&path);

        let mut settings = SessionSettings {
            last_freq_hz: Some(14_074_000),
            last_mode: Some(RxMode::USB),
            ..SessionSettings::default()
        };
        settings.device_mut("SDR-IQ").gain_db = Some(-10);
        settings.device_mut("rtl_tcp").sample_rate = Some(1_024_000);
        store.save(&settings).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.device("sdriq").and_then(|d| d.gain_db), Some(-10));
        assert!(loaded.devices.contains_key("rtltcp"), "keys are normalized");
        assert!(!path.with_extension("toml.tmp").exists());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_is_parse_error() {
        let path = temp_path("corrupt.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "last_freq_hz = \"not a number\"").unwrap();
        let err = TomlSettingsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, SettingsError::Parse(..)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_memory_store_shares_state() {
        let store = MemorySettingsStore::default();
        let view = store.clone();
        let settings = SessionSettings {
            last_mode: Some(RxMode::AM),
            ..SessionSettings::default()
        };
        store.save(&settings).unwrap();
        assert_eq!(view.load().unwrap().last_mode, Some(RxMode::AM));
    }
}
