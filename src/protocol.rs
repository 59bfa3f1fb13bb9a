use crate::orientation::Quaternion;
use crate::types::{DeviceId, Vibration};
use crate::{MyoError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// -- Bridge endpoint --
pub const DEFAULT_URL: &str = "ws://127.0.0.1:10138/myo/";
pub const DEFAULT_PROTOCOL_VERSION: u32 = 3;

// -- Frame tags --
pub const EVENT_TAG: &str = "event";
pub const COMMAND_TAG: &str = "command";

/// Unlock flavour. `Hold` keeps the armband unlocked until an explicit lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockKind {
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmgStreaming {
    Enabled,
    Disabled,
}

/// Outbound command payload.
/// Encoded as `["command", {"command": <name>, "myo": <id>, ...}]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Lock {
        myo: DeviceId,
    },
    Unlock {
        myo: DeviceId,
        #[serde(rename = "type")]
        kind: UnlockKind,
    },
    Vibrate {
        myo: DeviceId,
        #[serde(rename = "type")]
        intensity: Vibration,
    },
    SetStreamEmg {
        myo: DeviceId,
        #[serde(rename = "type")]
        stream: EmgStreaming,
    },
    RequestRssi {
        myo: DeviceId,
    },
}

impl Command {
    /// Device the command is addressed to.
    pub fn device_id(&self) -> DeviceId {
        match self {
            Command::Lock { myo }
            | Command::Unlock { myo, .. }
            | Command::Vibrate { myo, .. }
            | Command::SetStreamEmg { myo, .. }
            | Command::RequestRssi { myo } => *myo,
        }
    }

    /// Encode as a tagged text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&(COMMAND_TAG, self))?)
    }
}

/// Inbound event payload, discriminated by its `type` field.
///
/// Types this client does not know decode to [`Event::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Connected {
        myo: DeviceId,
        #[serde(default)]
        version: Vec<u32>,
    },
    Disconnected {
        myo: DeviceId,
    },
    Orientation {
        myo: DeviceId,
        orientation: Quaternion,
        #[serde(default)]
        accelerometer: [f64; 3],
        #[serde(default)]
        gyroscope: [f64; 3],
    },
    Pose {
        myo: DeviceId,
        pose: String,
    },
    Locked {
        myo: DeviceId,
    },
    Unlocked {
        myo: DeviceId,
    },
    #[serde(alias = "arm_synced")]
    ArmRecognized {
        myo: DeviceId,
        #[serde(default)]
        x_direction: Option<String>,
    },
    #[serde(alias = "arm_unsynced")]
    ArmLost {
        myo: DeviceId,
    },
    Emg {
        myo: DeviceId,
        emg: [i32; 8],
        #[serde(default)]
        timestamp: Option<Value>,
    },
    Rssi {
        myo: DeviceId,
        rssi: i32,
    },
    #[serde(other)]
    Unknown,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(Event),
    /// Well-formed, but not tagged `"event"`.
    Ignored,
}

/// Decode a text frame of the form `[tag, payload]`.
///
/// Anything that is not a JSON array, or an `"event"` whose payload does not
/// match a known shape, is a [`MyoError::MalformedFrame`].
pub fn decode_frame(text: &str) -> Result<Frame> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| MyoError::MalformedFrame(e.to_string()))?;

    let items = value
        .as_array()
        .ok_or_else(|| MyoError::MalformedFrame("expected a [tag, payload] array".into()))?;

    if items.first().and_then(Value::as_str) != Some(EVENT_TAG) {
        return Ok(Frame::Ignored);
    }

    let payload = items
        .get(1)
        .cloned()
        .ok_or_else(|| MyoError::MalformedFrame("event frame without payload".into()))?;

    let event = serde_json::from_value(payload).map_err(|e| MyoError::MalformedFrame(e.to_string()))?;
    Ok(Frame::Event(event))
}

/// Join a version array into its display string, e.g. `[0, 8, 45]` -> `"0.8.45"`.
pub fn version_string(parts: &[u32]) -> String {
    parts
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Render an EMG timestamp as a string, whichever JSON type the bridge used.
pub(crate) fn timestamp_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(command: Command) -> Value {
        serde_json::from_str(&command.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_encode_vibrate() {
        let value = encoded(Command::Vibrate {
            myo: 0,
            intensity: Vibration::Medium,
        });
        assert_eq!(
            value,
            json!(["command", {"command": "vibrate", "myo": 0, "type": "medium"}])
        );
    }

    #[test]
    fn test_encode_unlock_hold() {
        let value = encoded(Command::Unlock {
            myo: 2,
            kind: UnlockKind::Hold,
        });
        assert_eq!(
            value,
            json!(["command", {"command": "unlock", "myo": 2, "type": "hold"}])
        );
    }

    #[test]
    fn test_encode_stream_commands() {
        assert_eq!(
            encoded(Command::SetStreamEmg {
                myo: 1,
                stream: EmgStreaming::Enabled
            }),
            json!(["command", {"command": "set_stream_emg", "myo": 1, "type": "enabled"}])
        );
        assert_eq!(
            encoded(Command::RequestRssi { myo: 1 }),
            json!(["command", {"command": "request_rssi", "myo": 1}])
        );
        assert_eq!(
            encoded(Command::Lock { myo: 3 }),
            json!(["command", {"command": "lock", "myo": 3}])
        );
    }

    #[test]
    fn test_command_device_id() {
        assert_eq!(Command::Lock { myo: 3 }.device_id(), 3);
        let unlock = Command::Unlock {
            myo: 5,
            kind: UnlockKind::Hold,
        };
        assert_eq!(unlock.device_id(), 5);
        assert_eq!(Command::RequestRssi { myo: 7 }.device_id(), 7);
    }

    #[test]
    fn test_decode_connected() {
        let frame = decode_frame(
            r#"["event",{"type":"connected","myo":0,"version":[0,8,45],"timestamp":"1"}]"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            Frame::Event(Event::Connected {
                myo: 0,
                version: vec![0, 8, 45]
            })
        );
    }

    #[test]
    fn test_decode_orientation() {
        let frame = decode_frame(
            r#"["event",{"type":"orientation","myo":1,
                "orientation":{"x":0.1,"y":0.2,"z":0.3,"w":0.9},
                "accelerometer":[0.0,0.5,1.0],"gyroscope":[1.0,2.0,3.0]}]"#,
        )
        .unwrap();
        match frame {
            Frame::Event(Event::Orientation {
                myo,
                orientation,
                accelerometer,
                gyroscope,
            }) => {
                assert_eq!(myo, 1);
                assert_eq!(orientation, Quaternion::new(0.1, 0.2, 0.3, 0.9));
                assert_eq!(accelerometer, [0.0, 0.5, 1.0]);
                assert_eq!(gyroscope, [1.0, 2.0, 3.0]);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_arm_aliases() {
        let synced = decode_frame(
            r#"["event",{"type":"arm_synced","myo":0,"arm":"right","x_direction":"toward_elbow"}]"#,
        )
        .unwrap();
        assert_eq!(
            synced,
            Frame::Event(Event::ArmRecognized {
                myo: 0,
                x_direction: Some("toward_elbow".into())
            })
        );

        let unsynced = decode_frame(r#"["event",{"type":"arm_unsynced","myo":0}]"#).unwrap();
        assert_eq!(unsynced, Frame::Event(Event::ArmLost { myo: 0 }));
    }

    #[test]
    fn test_decode_unknown_type() {
        let frame = decode_frame(r#"["event",{"type":"warmup_completed","myo":0}]"#).unwrap();
        assert_eq!(frame, Frame::Event(Event::Unknown));
    }

    #[test]
    fn test_decode_non_event_tag_is_ignored() {
        assert_eq!(
            decode_frame(r#"["acknowledgement",{"type":"pose"}]"#).unwrap(),
            Frame::Ignored
        );
        assert_eq!(decode_frame(r#"[42]"#).unwrap(), Frame::Ignored);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_frame("not json"),
            Err(MyoError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"pose"}"#),
            Err(MyoError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(r#"["event",{"type":"pose","myo":0}]"#),
            Err(MyoError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_version_string() {
        assert_eq!(version_string(&[0, 8, 45]), "0.8.45");
        assert_eq!(version_string(&[]), "");
    }
}
