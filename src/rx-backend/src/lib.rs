// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;

use rx_app::normalize_name;

pub mod device;
pub mod dummy;
pub mod error;
pub mod netsdr;
pub mod protocol;
pub mod rtltcp;
pub mod sdriq;
pub mod state;
pub mod transport;

pub use device::{BlockProducer, Cycle, DeviceAccess, DeviceInfo, DeviceOptions, SdrDevice};
pub use error::{DeviceError, TransportError};
pub use state::{DeviceSnapshot, DeviceState};

pub type DeviceFactory =
    fn(DeviceAccess, DeviceOptions) -> Result<Box<dyn SdrDevice>, DeviceError>;

/// Name → factory table used to pick a device family at configuration time.
#[derive(Clone)]
pub struct DeviceRegistry {
    factories: HashMap<String, DeviceFactory>,
}

impl DeviceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a device factory under a stable name (e.g. "sdriq").
    pub fn register_device(&mut self, name: &str, factory: DeviceFactory) {
        self.factories.insert(normalize_name(name), factory);
    }

    /// Check whether a device name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    /// List registered device names.
    pub fn registered_devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a device by name.
    pub fn build_device(
        &self,
        name: &str,
        access: DeviceAccess,
        options: DeviceOptions,
    ) -> Result<Box<dyn SdrDevice>, DeviceError> {
        let factory = self
            .factories
            .get(&normalize_name(name))
            .ok_or_else(|| DeviceError::Unsupported(format!("unknown device: {}", name)))?;
        factory(access, options)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register all built-in device families on a registry.
pub fn register_builtin_devices_on(registry: &mut DeviceRegistry) {
    registry.register_device("dummy", dummy_factory);
    registry.register_device("sdriq", sdriq_factory);
    registry.register_device("netsdr", netsdr_factory);
    registry.register_device("rtltcp", rtltcp_factory);
}

fn dummy_factory(
    _access: DeviceAccess,
    options: DeviceOptions,
) -> Result<Box<dyn SdrDevice>, DeviceError> {
    Ok(Box::new(dummy::DummyDevice::new(options)))
}

fn sdriq_factory(
    access: DeviceAccess,
    options: DeviceOptions,
) -> Result<Box<dyn SdrDevice>, DeviceError> {
    Ok(Box::new(sdriq::SdrIq::new(access, options)?))
}

fn netsdr_factory(
    access: DeviceAccess,
    options: DeviceOptions,
) -> Result<Box<dyn SdrDevice>, DeviceError> {
    Ok(Box::new(netsdr::NetSdr::new(access, options)?))
}

fn rtltcp_factory(
    access: DeviceAccess,
    options: DeviceOptions,
) -> Result<Box<dyn SdrDevice>, DeviceError> {
    Ok(Box::new(rtltcp::RtlTcp::new(access, options)?))
}
