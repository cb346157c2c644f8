//! Devices announced by a device-bus server.
//!
//! Devices come and go while a session is connected. The client turns server
//! notifications into [`DeviceEvent`]s and the runtime applies them to its
//! own [`DeviceRegistry`] between ticks.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Command families understood by device-bus hardware.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandType {
    Vibrate,
    Linear,
    Rotate,
}

impl CommandType {
    /// Message name used by the server to advertise support
    pub fn message_name(self) -> &'static str {
        match self {
            Self::Vibrate => "VibrateCmd",
            Self::Linear => "LinearCmd",
            Self::Rotate => "RotateCmd",
        }
    }

    pub fn from_message_name(name: &str) -> Option<Self> {
        match name {
            "VibrateCmd" => Some(Self::Vibrate),
            "LinearCmd" => Some(Self::Linear),
            "RotateCmd" => Some(Self::Rotate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    /// Feature count per supported command type
    pub features: HashMap<CommandType, u32>,
}

impl DeviceInfo {
    pub fn feature_count(&self, command: CommandType) -> u32 {
        self.features.get(&command).copied().unwrap_or(0)
    }

    pub fn supports(&self, command: CommandType) -> bool {
        self.feature_count(command) > 0
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Added(DeviceInfo),
    Removed(u32),
    ScanningFinished,
}

/// Devices currently known to one session, keyed by server device index.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<u32, DeviceInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one discovery event; returns false for events that do not touch the registry.
    pub fn apply(&mut self, event: &DeviceEvent) -> bool {
        match event {
            DeviceEvent::Added(device) => {
                self.devices.insert(device.index, device.clone());
                true
            }
            DeviceEvent::Removed(index) => self.devices.remove(index).is_some(),
            DeviceEvent::ScanningFinished => false,
        }
    }

    pub fn get(&self, index: u32) -> Option<&DeviceInfo> {
        self.devices.get(&index)
    }

    /// All devices whose name matches, ignoring case.
    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DeviceInfo> + 'a {
        self.devices.values().filter(move |d| d.name_matches(name))
    }

    pub fn count_by_name(&self, name: &str) -> usize {
        self.by_name(name).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
pub(crate) fn test_device(index: u32, name: &str, features: &[(CommandType, u32)]) -> DeviceInfo {
    DeviceInfo {
        index,
        name: name.to_string(),
        features: features.iter().copied().collect(),
    }
}
