//! Device-bus JSON message set (message version 2).
//!
//! Every WebSocket text frame carries a JSON array of single-key objects,
//! `[{"MessageName": {"Id": 1, ...}}]`. Id 0 is reserved for unsolicited
//! server notifications.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::devices::{CommandType, DeviceEvent, DeviceInfo};
use crate::encode::{CommandPayload, DeviceCommand};

pub const MESSAGE_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all_fields = "PascalCase")]
pub enum ClientMessage {
    RequestServerInfo {
        id: u32,
        client_name: String,
        message_version: u32,
    },
    RequestDeviceList {
        id: u32,
    },
    StartScanning {
        id: u32,
    },
    StopScanning {
        id: u32,
    },
    Ping {
        id: u32,
    },
    VibrateCmd {
        id: u32,
        device_index: u32,
        speeds: Vec<VibrateSpeed>,
    },
    LinearCmd {
        id: u32,
        device_index: u32,
        vectors: Vec<LinearVector>,
    },
    RotateCmd {
        id: u32,
        device_index: u32,
        rotations: Vec<RotateSpeed>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VibrateSpeed {
    pub index: u32,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinearVector {
    pub index: u32,
    pub duration: u32,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RotateSpeed {
    pub index: u32,
    pub speed: f64,
    pub clockwise: bool,
}

impl ClientMessage {
    pub fn command(id: u32, command: &DeviceCommand) -> Self {
        let device_index = command.device_index;
        match &command.payload {
            CommandPayload::Vibrate(speeds) => Self::VibrateCmd {
                id,
                device_index,
                speeds: speeds
                    .iter()
                    .map(|(index, speed)| VibrateSpeed {
                        index: *index,
                        speed: *speed,
                    })
                    .collect(),
            },
            CommandPayload::Linear(vectors) => Self::LinearCmd {
                id,
                device_index,
                vectors: vectors
                    .iter()
                    .map(|(index, (duration, position))| LinearVector {
                        index: *index,
                        duration: *duration,
                        position: *position,
                    })
                    .collect(),
            },
            CommandPayload::Rotate(rotations) => Self::RotateCmd {
                id,
                device_index,
                rotations: rotations
                    .iter()
                    .map(|(index, (speed, clockwise))| RotateSpeed {
                        index: *index,
                        speed: *speed,
                        clockwise: *clockwise,
                    })
                    .collect(),
            },
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Self::RequestServerInfo { id, .. }
            | Self::RequestDeviceList { id }
            | Self::StartScanning { id }
            | Self::StopScanning { id }
            | Self::Ping { id }
            | Self::VibrateCmd { id, .. }
            | Self::LinearCmd { id, .. }
            | Self::RotateCmd { id, .. } => *id,
        }
    }

    /// Serialize as a one-message frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(&[self])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all_fields = "PascalCase")]
pub enum ServerMessage {
    Ok {
        id: u32,
    },
    Error {
        id: u32,
        error_message: String,
        #[serde(default)]
        error_code: u32,
    },
    ServerInfo {
        id: u32,
        #[serde(default)]
        server_name: String,
        #[serde(default)]
        message_version: u32,
        /// Milliseconds; zero disables the ping requirement
        #[serde(default)]
        max_ping_time: u64,
    },
    DeviceList {
        id: u32,
        devices: Vec<DeviceEntry>,
    },
    DeviceAdded {
        #[serde(default)]
        id: u32,
        #[serde(flatten)]
        device: DeviceEntry,
    },
    DeviceRemoved {
        #[serde(default)]
        id: u32,
        device_index: u32,
    },
    ScanningFinished {
        #[serde(default)]
        id: u32,
    },
}

impl ServerMessage {
    pub fn id(&self) -> u32 {
        match self {
            Self::Ok { id }
            | Self::Error { id, .. }
            | Self::ServerInfo { id, .. }
            | Self::DeviceList { id, .. }
            | Self::DeviceAdded { id, .. }
            | Self::DeviceRemoved { id, .. }
            | Self::ScanningFinished { id } => *id,
        }
    }

    /// Parse a frame; entries that are not understood are returned as errors
    /// without affecting the rest of the frame.
    pub fn parse_frame(text: &str) -> serde_json::Result<Vec<serde_json::Result<Self>>> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(text)?;
        Ok(entries.into_iter().map(serde_json::from_value).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceEntry {
    pub device_name: String,
    pub device_index: u32,
    #[serde(default)]
    pub device_messages: HashMap<String, serde_json::Value>,
}

impl DeviceEntry {
    pub fn to_info(&self) -> DeviceInfo {
        let features = self
            .device_messages
            .iter()
            .filter_map(|(name, attributes)| {
                let command = CommandType::from_message_name(name)?;
                let count = attributes
                    .get("FeatureCount")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(1) as u32;
                Some((command, count))
            })
            .collect();

        DeviceInfo {
            index: self.device_index,
            name: self.device_name.clone(),
            features,
        }
    }
}

impl From<&DeviceEntry> for DeviceEvent {
    fn from(entry: &DeviceEntry) -> Self {
        DeviceEvent::Added(entry.to_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_request_server_info_frame() {
        let message = ClientMessage::RequestServerInfo {
            id: 1,
            client_name: "axislink".into(),
            message_version: MESSAGE_VERSION,
        };
        let value: serde_json::Value = serde_json::from_str(&message.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!([{ "RequestServerInfo": { "Id": 1, "ClientName": "axislink", "MessageVersion": 2 } }])
        );
    }

    #[test]
    fn test_command_frames() {
        let rotate = DeviceCommand {
            device_index: 3,
            device_name: "D".into(),
            payload: CommandPayload::Rotate(BTreeMap::from([(0, (0.5, true))])),
        };
        let value = serde_json::to_value(ClientMessage::command(7, &rotate)).unwrap();
        assert_eq!(
            value,
            json!({ "RotateCmd": { "Id": 7, "DeviceIndex": 3,
                "Rotations": [{ "Index": 0, "Speed": 0.5, "Clockwise": true }] } })
        );

        let linear = DeviceCommand {
            device_index: 1,
            device_name: "L".into(),
            payload: CommandPayload::Linear(BTreeMap::from([(0, (50, 0.25))])),
        };
        let value = serde_json::to_value(ClientMessage::command(8, &linear)).unwrap();
        assert_eq!(
            value,
            json!({ "LinearCmd": { "Id": 8, "DeviceIndex": 1,
                "Vectors": [{ "Index": 0, "Duration": 50, "Position": 0.25 }] } })
        );
    }

    #[test]
    fn test_parse_server_frame() {
        let text = r#"[
            {"Ok": {"Id": 4}},
            {"DeviceAdded": {"Id": 0, "DeviceName": "Edge", "DeviceIndex": 2,
                "DeviceMessages": {"VibrateCmd": {"FeatureCount": 2}, "StopDeviceCmd": {}}}},
            {"SomethingNew": {"Id": 0}},
            {"Error": {"Id": 5, "ErrorMessage": "Device not found", "ErrorCode": 3}},
            {"ScanningFinished": {"Id": 0}}
        ]"#;
        let messages = ServerMessage::parse_frame(text).unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].as_ref().unwrap(), &ServerMessage::Ok { id: 4 });

        let ServerMessage::DeviceAdded { device, .. } = messages[1].as_ref().unwrap() else {
            panic!("expected DeviceAdded");
        };
        let info = device.to_info();
        assert_eq!(info.name, "Edge");
        assert_eq!(info.feature_count(CommandType::Vibrate), 2);
        assert!(!info.supports(CommandType::Linear));

        assert!(messages[2].is_err());
        assert_eq!(messages[3].as_ref().unwrap().id(), 5);
        assert_eq!(
            messages[4].as_ref().unwrap(),
            &ServerMessage::ScanningFinished { id: 0 }
        );
    }

    #[test]
    fn test_parse_device_list_and_server_info() {
        let text = r#"[{"ServerInfo": {"Id": 1, "ServerName": "Intiface", "MessageVersion": 2, "MaxPingTime": 0}},
            {"DeviceList": {"Id": 2, "Devices": [{"DeviceName": "Launch", "DeviceIndex": 0,
                "DeviceMessages": {"LinearCmd": {"FeatureCount": 1}}}]}}]"#;
        let messages = ServerMessage::parse_frame(text).unwrap();
        assert!(matches!(
            messages[0].as_ref().unwrap(),
            ServerMessage::ServerInfo { max_ping_time: 0, .. }
        ));
        let ServerMessage::DeviceList { devices, .. } = messages[1].as_ref().unwrap() else {
            panic!("expected DeviceList");
        };
        assert_eq!(devices[0].to_info().feature_count(CommandType::Linear), 1);
    }

    #[test]
    fn test_malformed_frame() {
        assert!(ServerMessage::parse_frame("not json").is_err());
        assert!(ServerMessage::parse_frame(r#"{"Ok": {"Id": 1}}"#).is_err());
    }
}
