//! Target configuration.
//!
//! The whole document is plain serde data. Every field has a default so a
//! partial file loads, and [`AppConfig::validate`] rejects anything a session
//! could not run with before a connection is attempted.

mod endpoint;
mod store;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use endpoint::Endpoint;
pub use store::{JsonSettingsStore, SettingsStore};

use crate::axis::AxisSettingsMap;
use crate::encode::{DEFAULT_PRECISION, DeviceBinding, SignalEncoder};
use crate::error::{Error, Result};
use crate::schedule::UpdateMode;

pub const DEFAULT_TCP_ENDPOINT: &str = "127.0.0.1:8080";
pub const DEFAULT_DEVICE_BUS_ENDPOINT: &str = "127.0.0.1:12345";
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// TCode over a raw TCP socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub endpoint: Endpoint,
    /// Hz
    pub update_rate: u32,
    pub update_mode: UpdateMode,
    pub send_dirty_values_only: bool,
    /// Leave move timing to the controller instead of sending `I<ms>`
    pub offload_elapsed_time: bool,
    pub precision: u32,
    pub connect_timeout_ms: u64,
    pub axes: AxisSettingsMap,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("127.0.0.1", 8080),
            update_rate: 60,
            update_mode: UpdateMode::Fixed,
            send_dirty_values_only: true,
            offload_elapsed_time: false,
            precision: DEFAULT_PRECISION,
            connect_timeout_ms: 5000,
            axes: AxisSettingsMap::default(),
        }
    }
}

impl TcpConfig {
    pub fn builder() -> TcpConfigBuilder {
        TcpConfigBuilder::default()
    }
}

/// Builder for TcpConfig
#[derive(Debug, Clone, Default)]
pub struct TcpConfigBuilder {
    endpoint: Option<Endpoint>,
    update_rate: Option<u32>,
    update_mode: Option<UpdateMode>,
    send_dirty_values_only: Option<bool>,
    offload_elapsed_time: Option<bool>,
    precision: Option<u32>,
    connect_timeout_ms: Option<u64>,
    axes: Option<AxisSettingsMap>,
}

impl TcpConfigBuilder {
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Update rate in Hz
    pub fn update_rate(mut self, hz: u32) -> Self {
        self.update_rate = Some(hz);
        self
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = Some(mode);
        self
    }

    pub fn send_dirty_values_only(mut self, enabled: bool) -> Self {
        self.send_dirty_values_only = Some(enabled);
        self
    }

    pub fn offload_elapsed_time(mut self, enabled: bool) -> Self {
        self.offload_elapsed_time = Some(enabled);
        self
    }

    pub fn precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    pub fn axes(mut self, axes: AxisSettingsMap) -> Self {
        self.axes = Some(axes);
        self
    }

    pub fn build(self) -> TcpConfig {
        let default = TcpConfig::default();
        TcpConfig {
            endpoint: self.endpoint.unwrap_or(default.endpoint),
            update_rate: self.update_rate.unwrap_or(default.update_rate),
            update_mode: self.update_mode.unwrap_or(default.update_mode),
            send_dirty_values_only: self
                .send_dirty_values_only
                .unwrap_or(default.send_dirty_values_only),
            offload_elapsed_time: self
                .offload_elapsed_time
                .unwrap_or(default.offload_elapsed_time),
            precision: self.precision.unwrap_or(default.precision),
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or(default.connect_timeout_ms),
            axes: self.axes.unwrap_or(default.axes),
        }
    }
}

/// JSON-over-WebSocket device server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceBusConfig {
    pub endpoint: Endpoint,
    pub update_rate: u32,
    pub client_name: String,
    pub bindings: Vec<DeviceBinding>,
    pub axes: AxisSettingsMap,
}

impl Default for DeviceBusConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("127.0.0.1", 12345),
            update_rate: 20,
            client_name: "axislink".to_string(),
            bindings: Vec::new(),
            axes: AxisSettingsMap::default(),
        }
    }
}

impl DeviceBusConfig {
    /// Reject a second binding for the same device feature and command.
    pub fn validate_bindings(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for binding in &self.bindings {
            let key = (
                binding.device_name.to_lowercase(),
                binding.command,
                binding.feature_index,
            );
            if !seen.insert(key) {
                return Err(Error::DuplicateBinding {
                    device_name: binding.device_name.clone(),
                    command: binding.command.to_string(),
                    feature_index: binding.feature_index,
                });
            }
        }
        Ok(())
    }
}

/// Waveform on an audio output device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name; the host default when unset
    pub device: Option<String>,
    pub sample_rate: u32,
    pub update_rate: u32,
    pub signal: SignalEncoder,
    pub axes: AxisSettingsMap,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            update_rate: 60,
            signal: SignalEncoder::default(),
            axes: AxisSettingsMap::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Tcp(TcpConfig),
    DeviceBus(DeviceBusConfig),
    Audio(AudioConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::DeviceBus(_) => "device_bus",
            Self::Audio(_) => "audio",
        }
    }

    pub fn update_rate(&self) -> u32 {
        match self {
            Self::Tcp(c) => c.update_rate,
            Self::DeviceBus(c) => c.update_rate,
            Self::Audio(c) => c.update_rate,
        }
    }

    pub fn set_update_rate(&mut self, hz: u32) {
        match self {
            Self::Tcp(c) => c.update_rate = hz,
            Self::DeviceBus(c) => c.update_rate = hz,
            Self::Audio(c) => c.update_rate = hz,
        }
    }

    pub fn update_mode(&self) -> UpdateMode {
        match self {
            Self::Tcp(c) => c.update_mode,
            _ => UpdateMode::Fixed,
        }
    }

    pub fn axes(&self) -> &AxisSettingsMap {
        match self {
            Self::Tcp(c) => &c.axes,
            Self::DeviceBus(c) => &c.axes,
            Self::Audio(c) => &c.axes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_rate() == 0 {
            return Err(Error::InvalidConfig("update rate must be at least 1 Hz".into()));
        }
        match self {
            Self::Tcp(c) => {
                if !(1..=9).contains(&c.precision) {
                    return Err(Error::InvalidConfig(format!(
                        "precision {} is outside 1..=9",
                        c.precision
                    )));
                }
                Ok(())
            }
            Self::DeviceBus(c) => c.validate_bindings(),
            Self::Audio(c) => {
                if c.sample_rate == 0 {
                    return Err(Error::InvalidConfig("sample rate must not be zero".into()));
                }
                Ok(())
            }
        }
    }
}

/// One named output target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub backend: BackendConfig,
}

fn default_true() -> bool {
    true
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, backend: BackendConfig) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            backend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub targets: Vec<TargetConfig>,
}

impl AppConfig {
    /// One target of each kind with default settings.
    pub fn with_default_targets() -> Self {
        Self {
            targets: vec![
                TargetConfig::new("tcode", BackendConfig::Tcp(TcpConfig::default())),
                TargetConfig::new(
                    "device-bus",
                    BackendConfig::DeviceBus(DeviceBusConfig::default()),
                ),
                TargetConfig::new("audio", BackendConfig::Audio(AudioConfig::default())),
            ],
        }
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(Error::InvalidConfig("target name must not be empty".into()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate target name \"{}\"",
                    target.name
                )));
            }
            target.backend.validate()?;
        }
        Ok(())
    }
}
