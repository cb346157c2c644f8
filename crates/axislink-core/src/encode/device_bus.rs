use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Frame, ProtocolEncoder};
use crate::axis::Axis;
use crate::devices::{CommandType, DeviceRegistry};

/// Drives one feature of a named device from one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub device_name: String,
    pub source_axis: Axis,
    pub command: CommandType,
    pub feature_index: u32,
}

/// Per-feature parameters of one batched command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// feature -> amplitude
    Vibrate(BTreeMap<u32, f64>),
    /// feature -> (duration ms, position)
    Linear(BTreeMap<u32, (u32, f64)>),
    /// feature -> (speed, clockwise)
    Rotate(BTreeMap<u32, (f64, bool)>),
}

impl CommandPayload {
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Vibrate(_) => CommandType::Vibrate,
            Self::Linear(_) => CommandType::Linear,
            Self::Rotate(_) => CommandType::Rotate,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Vibrate(m) => m.len(),
            Self::Linear(m) => m.len(),
            Self::Rotate(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One call to one physical device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub device_index: u32,
    pub device_name: String,
    pub payload: CommandPayload,
}

/// Speed magnitude and direction for a rotation axis centered on 0.5.
pub fn rotation(value: f64) -> (f64, bool) {
    (((value - 0.5).abs() / 0.5).clamp(0.0, 1.0), value > 0.5)
}

/// Groups bindings by device and command type into batched commands.
#[derive(Debug, Clone, Default)]
pub struct DeviceBusEncoder {
    bindings: Vec<DeviceBinding>,
}

impl DeviceBusEncoder {
    pub fn new(bindings: Vec<DeviceBinding>) -> Self {
        Self { bindings }
    }

    pub fn bindings(&self) -> &[DeviceBinding] {
        &self.bindings
    }

    /// Axes that at least one binding reads from
    pub fn bound_axes(&self) -> Vec<Axis> {
        let mut axes: Vec<Axis> = self.bindings.iter().map(|b| b.source_axis).collect();
        axes.sort();
        axes.dedup();
        axes
    }
}

impl ProtocolEncoder for DeviceBusEncoder {
    type Context = DeviceRegistry;
    type Output = Vec<DeviceCommand>;

    fn encode(&self, frame: &Frame<'_>, registry: &DeviceRegistry) -> Vec<DeviceCommand> {
        let duration_ms = frame.interval.as_millis().min(u32::MAX as u128) as u32;

        // device name (lowercase) -> command type -> bindings
        let mut groups: BTreeMap<String, BTreeMap<CommandType, Vec<&DeviceBinding>>> =
            BTreeMap::new();
        for binding in &self.bindings {
            if !frame.axes.contains(&binding.source_axis)
                || !frame.values[binding.source_axis].is_finite()
            {
                continue;
            }
            groups
                .entry(binding.device_name.to_lowercase())
                .or_default()
                .entry(binding.command)
                .or_default()
                .push(binding);
        }

        let mut commands = Vec::new();
        for (device_name, by_type) in &groups {
            for (command, bindings) in by_type {
                let value_of = |b: &DeviceBinding| frame.values[b.source_axis].clamp(0.0, 1.0);
                let payload = match command {
                    CommandType::Vibrate => CommandPayload::Vibrate(
                        bindings.iter().map(|b| (b.feature_index, value_of(b))).collect(),
                    ),
                    CommandType::Linear => CommandPayload::Linear(
                        bindings
                            .iter()
                            .map(|b| (b.feature_index, (duration_ms, value_of(b))))
                            .collect(),
                    ),
                    CommandType::Rotate => CommandPayload::Rotate(
                        bindings
                            .iter()
                            .map(|b| (b.feature_index, rotation(value_of(b))))
                            .collect(),
                    ),
                };

                for device in registry.by_name(device_name) {
                    commands.push(DeviceCommand {
                        device_index: device.index,
                        device_name: device.name.clone(),
                        payload: payload.clone(),
                    });
                }
            }
        }
        commands
    }
}
