use std::path::Path;
use std::time::Duration;

use pb_device::DeviceKind;
use pb_store::{ConnectParams, DEFAULT_RELEASE_DELAY};
use pb_types::DType;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Which store client a session talks through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Private in-process store; objects live as long as the session.
    Memory,
    /// Shared store directory of memory-mapped files.
    #[default]
    Mmap,
}

/// Session configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Store endpoint; the store directory for the mmap backend.
    pub store_socket: String,
    pub manager_socket: String,
    pub release_delay: u32,
    /// Download lookup timeout in milliseconds. Negative waits forever.
    pub get_timeout_ms: i64,
    pub backend: StoreBackend,
    /// Store capacity; unlimited when absent.
    pub capacity_bytes: Option<u64>,
    pub device: DeviceKind,
    pub device_ordinal: u32,
    /// Device memory cap; unlimited when absent.
    pub device_memory_bytes: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            store_socket: "/tmp/plasma".into(),
            manager_socket: String::new(),
            release_delay: DEFAULT_RELEASE_DELAY,
            get_timeout_ms: -1,
            backend: StoreBackend::Mmap,
            capacity_bytes: None,
            device: DeviceKind::Cpu,
            device_ordinal: 0,
            device_memory_bytes: None,
        }
    }
}

impl BridgeConfig {
    /// Private in-memory store on the host.
    pub fn in_memory() -> Self {
        Self {
            store_socket: "memory".into(),
            backend: StoreBackend::Memory,
            ..Default::default()
        }
    }

    /// Session settings implied by an op's registration attributes.
    pub fn from_attrs(attrs: &OpAttrs) -> Self {
        Self {
            store_socket: attrs.plasma_store_socket_name.clone(),
            manager_socket: attrs.plasma_manager_socket_name.clone(),
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device: DeviceKind, ordinal: u32) -> Self {
        self.device = device;
        self.device_ordinal = ordinal;
        self
    }

    pub fn with_get_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.get_timeout_ms = match timeout {
            Some(t) => i64::try_from(t.as_millis()).unwrap_or(i64::MAX),
            None => -1,
        };
        self
    }

    pub fn from_toml_str(s: &str) -> BridgeResult<Self> {
        toml::from_str(s).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Lookup timeout; `None` blocks until the object appears.
    pub fn get_timeout(&self) -> Option<Duration> {
        u64::try_from(self.get_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            store_socket: self.store_socket.clone(),
            manager_socket: self.manager_socket.clone(),
            release_delay: self.release_delay,
        }
    }
}

/// Attributes an op instance is registered with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpAttrs {
    pub plasma_store_socket_name: String,
    pub plasma_manager_socket_name: String,
    /// Per-input dtypes of `TensorToPlasma`; empty accepts any single dtype.
    #[serde(default)]
    pub dtypes: Vec<DType>,
    /// Output dtype of `PlasmaToTensor`; float32 when absent.
    #[serde(default)]
    pub dtype: Option<DType>,
}

impl OpAttrs {
    pub fn new(store_socket: impl Into<String>) -> Self {
        Self {
            plasma_store_socket_name: store_socket.into(),
            ..Default::default()
        }
    }

    pub fn with_manager(mut self, manager_socket: impl Into<String>) -> Self {
        self.plasma_manager_socket_name = manager_socket.into();
        self
    }

    pub fn with_dtypes(mut self, dtypes: impl Into<Vec<DType>>) -> Self {
        self.dtypes = dtypes.into();
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn connect_params(&self, release_delay: u32) -> ConnectParams {
        ConnectParams {
            store_socket: self.plasma_store_socket_name.clone(),
            manager_socket: self.plasma_manager_socket_name.clone(),
            release_delay,
        }
    }
}

impl From<&BridgeConfig> for OpAttrs {
    fn from(config: &BridgeConfig) -> Self {
        Self::new(config.store_socket.clone()).with_manager(config.manager_socket.clone())
    }
}
