use crate::orientation::Rpy;
use crate::protocol::{Command, EmgStreaming, UnlockKind};
use crate::types::{
    ArmDirection, DeviceId, EmgSample, EventData, LockState, MotionReadings, OrientationData,
    Vibration,
};
use crate::{MyoError, Result};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

// -- Event names dispatched besides pose labels --
pub const EVENT_REGISTERED: &str = "registered";
pub const EVENT_ORIENTATION: &str = "orientation";
pub const EVENT_ARM_RECOGNIZED: &str = "arm_recognized";
pub const EVENT_ARM_LOST: &str = "arm_lost";
pub const EVENT_EMG: &str = "emg";
pub const EVENT_RSSI: &str = "rssi";

/// Outbound command capability handed to every device.
pub trait CommandSink: Send + Sync {
    fn send(&self, command: Command) -> Result<()>;
}

impl CommandSink for crossbeam_channel::Sender<Command> {
    fn send(&self, command: Command) -> Result<()> {
        crossbeam_channel::Sender::send(self, command).map_err(|_| MyoError::ChannelDisconnected)
    }
}

/// Event subscriber: invoked with the live device and the event's extra data, if any.
///
/// The device is passed mutably so a handler can lock it or re-center its offset.
pub trait Subscriber: Send + Sync {
    fn invoke(&self, device: &mut Device, data: Option<&EventData>);
}

impl<F> Subscriber for F
where
    F: Fn(&mut Device, Option<&EventData>) + Send + Sync,
{
    fn invoke(&self, device: &mut Device, data: Option<&EventData>) {
        self(device, data)
    }
}

pub type Handler = Arc<dyn Subscriber>;

/// Event name -> handlers, in registration order.
pub type Subscriptions = HashMap<String, Vec<Handler>>;

/// State of one connected armband.
///
/// Created by the session on a `connected` frame with a snapshot of the
/// subscriptions registered for its id at that moment.
pub struct Device {
    id: DeviceId,
    version: String,
    lock_state: LockState,
    direction: Option<ArmDirection>,
    offset: Option<Rpy>,
    last_rpy: Option<Rpy>,
    orientation_count: u64,
    current_pose: Option<String>,
    subscribers: Subscriptions,
    commands: Arc<dyn CommandSink>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("lock_state", &self.lock_state)
            .field("direction", &self.direction)
            .field("offset", &self.offset)
            .field("orientation_count", &self.orientation_count)
            .field("current_pose", &self.current_pose)
            .field("events", &self.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Device {
    pub fn new(
        id: DeviceId,
        version: impl Into<String>,
        commands: Arc<dyn CommandSink>,
        subscribers: Subscriptions,
    ) -> Self {
        Self {
            id,
            version: version.into(),
            lock_state: LockState::Locked,
            direction: None,
            offset: None,
            last_rpy: None,
            orientation_count: 0,
            current_pose: None,
            subscribers,
            commands,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Firmware version, e.g. `"1.5.1970"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn lock_state(&self) -> LockState {
        self.lock_state
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state == LockState::Locked
    }

    /// Last known arm direction. Survives `arm_lost`.
    pub fn direction(&self) -> Option<ArmDirection> {
        self.direction
    }

    /// Direction sign used for roll/pitch, +1 while unknown.
    pub fn direction_sign(&self) -> f64 {
        self.direction.map_or(1.0, ArmDirection::sign)
    }

    /// Last confirmed pose label.
    pub fn current_pose(&self) -> Option<&str> {
        self.current_pose.as_deref()
    }

    pub fn orientation_count(&self) -> u64 {
        self.orientation_count
    }

    // -- Commands --

    /// Lock the armband. The status is updated even if the command cannot be queued.
    pub fn lock(&mut self) -> Result<()> {
        self.lock_state = LockState::Locked;
        self.commands.send(Command::Lock { myo: self.id })
    }

    /// Unlock until an explicit lock (`hold` unlock).
    pub fn unlock(&mut self) -> Result<()> {
        self.lock_state = LockState::Unlocked;
        self.commands.send(Command::Unlock {
            myo: self.id,
            kind: UnlockKind::Hold,
        })
    }

    /// Flip the lock status and return the new one.
    pub fn toggle_lock(&mut self) -> Result<LockState> {
        match self.lock_state {
            LockState::Locked => self.unlock()?,
            LockState::Unlocked => self.lock()?,
        }
        Ok(self.lock_state)
    }

    pub fn vibrate(&self, intensity: Vibration) -> Result<()> {
        self.commands.send(Command::Vibrate {
            myo: self.id,
            intensity,
        })
    }

    /// Turn EMG streaming on or off. Samples arrive as `emg` events.
    pub fn set_emg_streaming(&self, enabled: bool) -> Result<()> {
        let stream = if enabled {
            EmgStreaming::Enabled
        } else {
            EmgStreaming::Disabled
        };
        self.commands.send(Command::SetStreamEmg {
            myo: self.id,
            stream,
        })
    }

    /// Ask for one signal strength reading, delivered as an `rssi` event.
    pub fn request_rssi(&self) -> Result<()> {
        self.commands.send(Command::RequestRssi { myo: self.id })
    }

    // -- Orientation offset --

    pub fn set_orientation_offset(&mut self, rpy: Rpy) {
        self.offset = Some(rpy);
    }

    pub fn orientation_offset(&self) -> Option<Rpy> {
        self.offset
    }

    /// Use the most recent roll/pitch/yaw sample as the offset.
    pub fn capture_offset_from_last_observed(&mut self) {
        self.offset = self.last_rpy;
    }

    pub fn clear_offset(&mut self) {
        self.offset = None;
    }

    pub fn last_observed_rpy(&self) -> Option<Rpy> {
        self.last_rpy
    }

    /// Advance the orientation frame counter and return the new count.
    pub fn increment_orientation_counter(&mut self) -> u64 {
        self.orientation_count += 1;
        self.orientation_count
    }

    // -- Inbound events --

    pub(crate) fn on_registered(&mut self) {
        self.dispatch(EVENT_REGISTERED, None);
    }

    pub(crate) fn on_arm_recognized(&mut self, x_direction: Option<&str>) {
        if let Some(direction) = x_direction.and_then(ArmDirection::from_wire) {
            self.direction = Some(direction);
        }
        self.dispatch(EVENT_ARM_RECOGNIZED, None);
    }

    pub(crate) fn on_arm_lost(&mut self) {
        self.dispatch(EVENT_ARM_LOST, None);
    }

    pub(crate) fn on_orientation_sample(
        &mut self,
        readings: MotionReadings,
        rpy: Option<Rpy>,
        rpy_delta: Option<Rpy>,
    ) {
        self.last_rpy = rpy;
        if !self.has_subscribers(EVENT_ORIENTATION) {
            return;
        }
        let data = EventData::Orientation(OrientationData {
            readings,
            rpy,
            rpy_delta,
        });
        self.dispatch(EVENT_ORIENTATION, Some(&data));
    }

    /// Pose labels double as event names.
    pub(crate) fn on_pose_confirmed(&mut self, pose: &str) {
        self.current_pose = Some(pose.to_string());
        self.dispatch(pose, None);
    }

    pub(crate) fn on_emg(&mut self, sample: EmgSample) {
        self.dispatch(EVENT_EMG, Some(&EventData::Emg(sample)));
    }

    pub(crate) fn on_rssi(&mut self, rssi: i32) {
        self.dispatch(EVENT_RSSI, Some(&EventData::Rssi(rssi)));
    }

    fn has_subscribers(&self, event: &str) -> bool {
        self.subscribers
            .get(event)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Call every handler for `event` in registration order. A panicking
    /// handler is logged and the rest still run.
    fn dispatch(&mut self, event: &str, data: Option<&EventData>) {
        // Handlers get `&mut self`, so iterate over a snapshot of the list
        let Some(handlers) = self.subscribers.get(event).cloned() else {
            return;
        };

        for handler in &handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.invoke(self, data)));
            if let Err(payload) = outcome {
                log::error!(
                    "Subscriber for '{}' on device {} panicked: {}",
                    event,
                    self.id,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
