use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Orientation quaternion as sent by the bridge. Not required to be unit length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Euler angles [roll, pitch, yaw] in radians.
    ///
    ///   roll  = atan2(2(wx + yz), 1 - 2(x² + y²))
    ///   pitch = asin(clamp(2(wy - zx), -1, 1))
    ///   yaw   = atan2(2(wz + xy), 1 - 2(y² + z²))
    pub fn to_euler(&self) -> [f64; 3] {
        let Quaternion { x, y, z, w } = *self;
        let roll = (2.0 * (w * x + y * z)).atan2(1.0 - 2.0 * (x * x + y * y));
        let pitch = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (w * z + x * y)).atan2(1.0 - 2.0 * (y * y + z * z));
        [roll, pitch, yaw]
    }
}

/// Roll, pitch and yaw expressed on a `[0, scale)` scale.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rpy {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Rpy {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }
}

/// Default roll/pitch/yaw scale.
pub const DEFAULT_SCALE: f64 = 18.0;

/// Convert a quaternion into a scaled roll/pitch/yaw triple.
///
/// `direction` is the arm direction sign (+1 toward wrist, -1 toward elbow)
/// and only affects roll and pitch. Roll and yaw wrap around, so negative
/// results fold back into `[0, scale)`. Pitch does not wrap: a -1 direction
/// mirrors it and straight up is held just below `scale`.
pub fn compute_rpy(quat: &Quaternion, scale: f64, direction: f64) -> Rpy {
    let [roll, pitch, yaw] = quat.to_euler();

    Rpy {
        roll: fold_into_scale((roll + PI) / TAU * scale * direction, scale),
        pitch: mirror_into_scale((pitch + FRAC_PI_2) / PI * scale * direction, scale),
        yaw: fold_into_scale((yaw + PI) / TAU * scale, scale),
    }
}

/// Delta between a sample and a reference offset.
///
/// Pitch and yaw are inverted relative to roll so that raising the arm and
/// turning right read positive. Each axis is normalized independently so a
/// small rotation across the seam stays small.
pub fn compute_rpy_delta(rpy: &Rpy, offset: &Rpy, scale: f64) -> Rpy {
    Rpy {
        roll: wrap_half_scale(rpy.roll - offset.roll, scale),
        pitch: wrap_half_scale(offset.pitch - rpy.pitch, scale),
        yaw: wrap_half_scale(offset.yaw - rpy.yaw, scale),
    }
}

fn fold_into_scale(value: f64, scale: f64) -> f64 {
    let folded = value.rem_euclid(scale);
    // rem_euclid may round up to exactly `scale` for tiny negative inputs
    if folded >= scale {
        0.0
    } else {
        folded
    }
}

fn mirror_into_scale(value: f64, scale: f64) -> f64 {
    let mirrored = if value.is_sign_negative() {
        value + scale
    } else {
        value
    };
    mirrored.clamp(0.0, largest_below(scale))
}

/// Largest `f64` strictly below a positive finite `scale`.
fn largest_below(scale: f64) -> f64 {
    f64::from_bits(scale.to_bits() - 1)
}

fn wrap_half_scale(value: f64, scale: f64) -> f64 {
    let half = scale / 2.0;
    if value > half {
        value - scale
    } else if value < -half {
        value + scale
    } else {
        value
    }
}
