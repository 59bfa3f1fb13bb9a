use crate::orientation::DEFAULT_SCALE;
use crate::protocol::{DEFAULT_PROTOCOL_VERSION, DEFAULT_URL};
use crate::{MyoError, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_SKIP_ONE_ORIENTATION_EVERY: u32 = 2;
pub const DEFAULT_POSE_CONFIRM_MS: u64 = 250;
pub const DEFAULT_LOCK_UNLOCK_POSE: &str = "thumb_to_pinky";
pub const DEFAULT_LOCK_UNLOCK_CONFIRM_MS: u64 = 500;
pub const DEFAULT_DOUBLE_TAP_POSE: &str = "double_tap";

bitflags::bitflags! {
    /// Which device notifications are broadcast.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BroadcastFlags: u8 {
        const CONNECT     = 1 << 0;
        const DISCONNECT  = 1 << 1;
        const LOCK_UNLOCK = 1 << 2;
    }
}

/// Effective session options. Fixed for the lifetime of a started hub.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Bridge URL without the protocol version suffix.
    pub transport_url: String,
    pub protocol_version: u32,
    pub reconnect_delay: Duration,
    /// Emit `session started` / `session closed`.
    pub auto_notify: bool,
    /// Drop every Nth orientation frame per device. `None` keeps them all.
    pub skip_one_orientation_every: Option<u32>,
    pub use_roll_pitch_yaw: bool,
    pub roll_pitch_yaw_scale: f64,
    pub broadcasts: BroadcastFlags,
    /// How long an ordinary pose must hold before it is confirmed.
    pub pose_confirm: Duration,
    pub lock_unlock_pose: String,
    pub lock_unlock_confirm: Duration,
    /// Pose that toggles the lock immediately.
    pub double_tap_pose: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            transport_url: DEFAULT_URL.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            auto_notify: true,
            skip_one_orientation_every: Some(DEFAULT_SKIP_ONE_ORIENTATION_EVERY),
            use_roll_pitch_yaw: true,
            roll_pitch_yaw_scale: DEFAULT_SCALE,
            broadcasts: BroadcastFlags::all(),
            pose_confirm: Duration::from_millis(DEFAULT_POSE_CONFIRM_MS),
            lock_unlock_pose: DEFAULT_LOCK_UNLOCK_POSE.to_string(),
            lock_unlock_confirm: Duration::from_millis(DEFAULT_LOCK_UNLOCK_CONFIRM_MS),
            double_tap_pose: DEFAULT_DOUBLE_TAP_POSE.to_string(),
        }
    }
}

impl Options {
    /// Full WebSocket endpoint, e.g. `ws://127.0.0.1:10138/myo/3`.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.transport_url, self.protocol_version)
    }

    pub fn broadcasts_on(&self, flag: BroadcastFlags) -> bool {
        self.broadcasts.contains(flag)
    }

    /// Merge a partial JSON object over the defaults.
    ///
    /// Integer options holding anything but a non-negative integer keep their default.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let overrides: OptionOverrides = serde_json::from_str(json)?;
        Ok(Self::default().merge(overrides))
    }

    /// Load options from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MyoError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    fn merge(mut self, overrides: OptionOverrides) -> Self {
        if let Some(url) = overrides.transport_url {
            self.transport_url = url;
        }
        if let Some(version) = overrides.protocol_version.and_then(|v| u32::try_from(v).ok()) {
            self.protocol_version = version;
        }
        if let Some(ms) = overrides.reconnect_delay_ms {
            self.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(auto_notify) = overrides.auto_notify {
            self.auto_notify = auto_notify;
        }
        if let Some(skip) = overrides.skip_one_orientation_every {
            self.skip_one_orientation_every = skip;
        }
        if let Some(enabled) = overrides.use_roll_pitch_yaw {
            self.use_roll_pitch_yaw = enabled;
        }
        if let Some(scale) = overrides.roll_pitch_yaw_scale {
            self.roll_pitch_yaw_scale = scale;
        }
        for (value, flag) in [
            (overrides.broadcast_on_connect, BroadcastFlags::CONNECT),
            (overrides.broadcast_on_disconnect, BroadcastFlags::DISCONNECT),
            (overrides.broadcast_on_lock_unlock, BroadcastFlags::LOCK_UNLOCK),
        ] {
            if let Some(enabled) = value {
                self.broadcasts.set(flag, enabled);
            }
        }
        if let Some(ms) = overrides.pose_confirm_ms {
            self.pose_confirm = Duration::from_millis(ms);
        }
        if let Some(pose) = overrides.lock_unlock_pose_label {
            self.lock_unlock_pose = pose;
        }
        if let Some(ms) = overrides.lock_unlock_confirm_ms {
            self.lock_unlock_confirm = Duration::from_millis(ms);
        }
        if let Some(pose) = overrides.double_tap_pose_label {
            self.double_tap_pose = pose;
        }
        self
    }
}

/// User-supplied options; absent or unusable fields stay `None`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct OptionOverrides {
    transport_url: Option<String>,
    #[serde(deserialize_with = "lenient_integer")]
    protocol_version: Option<u64>,
    #[serde(deserialize_with = "lenient_integer")]
    reconnect_delay_ms: Option<u64>,
    auto_notify: Option<bool>,
    #[serde(deserialize_with = "skip_interval")]
    skip_one_orientation_every: Option<Option<u32>>,
    use_roll_pitch_yaw: Option<bool>,
    #[serde(deserialize_with = "positive_number")]
    roll_pitch_yaw_scale: Option<f64>,
    #[serde(alias = "broadcastOnConnected")]
    broadcast_on_connect: Option<bool>,
    #[serde(alias = "broadcastOnDisconnected")]
    broadcast_on_disconnect: Option<bool>,
    broadcast_on_lock_unlock: Option<bool>,
    #[serde(deserialize_with = "lenient_integer")]
    pose_confirm_ms: Option<u64>,
    lock_unlock_pose_label: Option<String>,
    #[serde(deserialize_with = "lenient_integer")]
    lock_unlock_confirm_ms: Option<u64>,
    double_tap_pose_label: Option<String>,
}

fn lenient_integer<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_u64())
}

fn positive_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?
        .as_f64()
        .filter(|scale| scale.is_finite() && *scale > 0.0))
}

/// `0` or `false` disables skipping; other non-integers keep the default.
fn skip_interval<'de, D>(deserializer: D) -> std::result::Result<Option<Option<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(false) => Some(None),
        other => other
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(|n| if n == 0 { None } else { Some(n) }),
    })
}
