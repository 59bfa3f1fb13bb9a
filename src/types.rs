use crate::orientation::{Quaternion, Rpy};
use serde::{Deserialize, Serialize};

/// Device id assigned by the bridge when an armband connects.
///
/// Unique among connected devices; the same physical unit may get the same
/// id back after a reconnect.
pub type DeviceId = u32;

/// Software lock status of an armband.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

/// Which way the armband's x axis points along the forearm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmDirection {
    /// `toward_wrist`, sign +1.
    TowardWrist,
    /// `toward_elbow`, sign -1.
    TowardElbow,
}

impl ArmDirection {
    /// Parse the bridge's `x_direction` string. Unknown values yield `None`.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "toward_wrist" => Some(Self::TowardWrist),
            "toward_elbow" => Some(Self::TowardElbow),
            _ => None,
        }
    }

    /// Sign applied to roll and pitch.
    pub fn sign(self) -> f64 {
        match self {
            Self::TowardWrist => 1.0,
            Self::TowardElbow => -1.0,
        }
    }
}

/// Vibration length accepted by the `vibrate` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vibration {
    Short,
    #[default]
    Medium,
    Long,
}

/// Fire-and-forget notifications emitted for the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    SessionStarted,
    SessionClosed,
    DeviceConnected(DeviceId),
    DeviceDisconnected(DeviceId),
    DeviceLocked(DeviceId),
    DeviceUnlocked(DeviceId),
}

impl Notification {
    /// Notification name as seen by listeners.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session started",
            Self::SessionClosed => "session closed",
            Self::DeviceConnected(_) => "device connected",
            Self::DeviceDisconnected(_) => "device disconnected",
            Self::DeviceLocked(_) => "device locked",
            Self::DeviceUnlocked(_) => "device unlocked",
        }
    }

    /// Device the notification refers to, if any.
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            Self::SessionStarted | Self::SessionClosed => None,
            Self::DeviceConnected(id)
            | Self::DeviceDisconnected(id)
            | Self::DeviceLocked(id)
            | Self::DeviceUnlocked(id) => Some(*id),
        }
    }
}

/// Motion readings carried by an `orientation` frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct MotionReadings {
    /// Raw orientation quaternion.
    pub orientation: Quaternion,
    /// Accelerometer [x, y, z] in g.
    #[serde(default)]
    pub accelerometer: [f64; 3],
    /// Gyroscope [x, y, z] in deg/s.
    #[serde(default)]
    pub gyroscope: [f64; 3],
}

/// Payload handed to `orientation` subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationData {
    pub readings: MotionReadings,
    /// Scaled roll/pitch/yaw, `None` when roll/pitch/yaw computation is disabled.
    pub rpy: Option<Rpy>,
    /// Delta against the device offset, `None` when no offset is set.
    pub rpy_delta: Option<Rpy>,
}

/// One EMG sample: eight pod readings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmgSample {
    pub values: [i32; 8],
    /// Bridge timestamp as sent on the wire (microsecond string).
    pub timestamp: Option<String>,
}

/// Extra data attached to a dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Orientation(OrientationData),
    Emg(EmgSample),
    Rssi(i32),
}
