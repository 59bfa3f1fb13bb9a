use crate::config::{BroadcastFlags, Options};
use crate::device::{CommandSink, Device, Handler, Subscriptions};
use crate::orientation::{compute_rpy, compute_rpy_delta};
use crate::protocol::{self, Event, Frame};
use crate::timer::GestureTimer;
use crate::types::{DeviceId, EmgSample, EventData, LockState, MotionReadings, Notification};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Notification capability for the surrounding application.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, notification: Notification);
}

impl Broadcast for crossbeam_channel::Sender<Notification> {
    fn broadcast(&self, notification: Notification) {
        if let Err(e) = self.try_send(notification) {
            match e {
                crossbeam_channel::TrySendError::Full(n) => {
                    log::trace!("Notification channel full, dropping '{}'", n.name());
                }
                crossbeam_channel::TrySendError::Disconnected(n) => {
                    log::trace!("No notification listener for '{}'", n.name());
                }
            }
        }
    }
}

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

/// Action run when a gesture confirmation timer expires.
#[derive(Debug, Clone, PartialEq)]
enum Confirmation {
    ToggleLock,
    Pose(String),
}

/// Transport-agnostic session core.
///
/// Owns the device registry, the pending subscriptions and the gesture
/// confirmation timers. The transport driver feeds it lifecycle changes and
/// inbound text frames; timers run on the caller's clock through
/// [`Session::next_deadline`] and [`Session::fire_due_timers`].
pub struct Session {
    options: Options,
    state: ConnectionState,
    devices: HashMap<DeviceId, Device>,
    subscriptions: HashMap<DeviceId, Subscriptions>,
    timers: GestureTimer<Confirmation>,
    commands: Arc<dyn CommandSink>,
    broadcaster: Arc<dyn Broadcast>,
}

impl Session {
    pub fn new(
        options: Options,
        commands: Arc<dyn CommandSink>,
        broadcaster: Arc<dyn Broadcast>,
    ) -> Self {
        Self {
            options,
            state: ConnectionState::Disconnected,
            devices: HashMap::new(),
            subscriptions: HashMap::new(),
            timers: GestureTimer::new(),
            commands,
            broadcaster,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    // -- Subscriptions --

    /// Register `handler` for `event` on `device_id`.
    ///
    /// Only devices created after this call see the handler; a device that is
    /// already connected keeps the subscriptions it was created with.
    pub fn register_callback<F>(&mut self, event: &str, handler: F, device_id: DeviceId)
    where
        F: Fn(&mut Device, Option<&EventData>) + Send + Sync + 'static,
    {
        self.register_subscriber(event, Arc::new(handler), device_id);
    }

    pub fn register_subscriber(&mut self, event: &str, handler: Handler, device_id: DeviceId) {
        self.subscriptions
            .entry(device_id)
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Pending subscriptions for a device id.
    pub fn subscriptions(&self, device_id: DeviceId) -> Option<&Subscriptions> {
        self.subscriptions.get(&device_id)
    }

    // -- Devices --

    pub fn device(&self, device_id: DeviceId) -> Option<&Device> {
        self.devices.get(&device_id)
    }

    pub fn device_mut(&mut self, device_id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(&device_id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.devices.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // -- Transport lifecycle --

    pub fn on_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn on_open(&mut self) {
        self.state = ConnectionState::Open;
        log::info!("Session started");
        if self.options.auto_notify {
            self.broadcaster.broadcast(Notification::SessionStarted);
        }
    }

    /// A connect attempt that never opened. Nothing is broadcast.
    pub fn on_connect_failed(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    pub fn on_close(&mut self) {
        self.state = ConnectionState::Disconnected;
        log::info!("Session closed");
        if self.options.auto_notify {
            self.broadcaster.broadcast(Notification::SessionClosed);
        }
    }

    // -- Inbound frames --

    pub fn handle_message(&mut self, text: &str) {
        self.handle_message_at(text, Instant::now());
    }

    /// Decode and apply one text frame. Malformed frames are logged and dropped.
    pub fn handle_message_at(&mut self, text: &str, now: Instant) {
        match protocol::decode_frame(text) {
            Ok(Frame::Event(event)) => self.handle_event(event, now),
            Ok(Frame::Ignored) => log::trace!("Ignoring non-event frame"),
            Err(e) => log::warn!("Dropping frame: {}", e),
        }
    }

    pub fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::Connected { myo, version } => {
                self.register_device(myo, protocol::version_string(&version))
            }
            Event::Disconnected { myo } => self.unregister_device(myo),
            Event::Orientation {
                myo,
                orientation,
                accelerometer,
                gyroscope,
            } => self.handle_orientation(
                myo,
                MotionReadings {
                    orientation,
                    accelerometer,
                    gyroscope,
                },
            ),
            Event::Pose { myo, pose } => self.handle_pose(myo, pose, now),
            Event::Locked { myo } => self.sync_hardware_lock(myo, LockState::Locked),
            Event::Unlocked { myo } => self.sync_hardware_lock(myo, LockState::Unlocked),
            Event::ArmRecognized { myo, x_direction } => {
                if let Some(device) = self.devices.get_mut(&myo) {
                    device.on_arm_recognized(x_direction.as_deref());
                }
            }
            Event::ArmLost { myo } => {
                if let Some(device) = self.devices.get_mut(&myo) {
                    device.on_arm_lost();
                }
            }
            Event::Emg {
                myo,
                emg,
                timestamp,
            } => {
                if let Some(device) = self.devices.get_mut(&myo) {
                    device.on_emg(EmgSample {
                        values: emg,
                        timestamp: timestamp.as_ref().map(protocol::timestamp_string),
                    });
                }
            }
            Event::Rssi { myo, rssi } => {
                if let Some(device) = self.devices.get_mut(&myo) {
                    device.on_rssi(rssi);
                }
            }
            Event::Unknown => log::trace!("Ignoring unknown event type"),
        }
    }

    // -- Timers --

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Run every confirmation whose delay has elapsed at `now`.
    pub fn fire_due_timers(&mut self, now: Instant) {
        for (device_id, confirmation) in self.timers.take_due(now) {
            match confirmation {
                Confirmation::ToggleLock => self.toggle_lock_and_broadcast(device_id),
                Confirmation::Pose(pose) => {
                    if let Some(device) = self.devices.get_mut(&device_id) {
                        log::debug!("Device {} pose confirmed: {}", device_id, pose);
                        device.on_pose_confirmed(&pose);
                    }
                }
            }
        }
    }

    fn register_device(&mut self, device_id: DeviceId, version: String) {
        let subscribers = self
            .subscriptions
            .get(&device_id)
            .cloned()
            .unwrap_or_default();
        let mut device = Device::new(device_id, version, self.commands.clone(), subscribers);

        // Every fresh registration starts unlocked
        if let Err(e) = device.unlock() {
            log::warn!("Failed to unlock device {}: {}", device_id, e);
        }

        log::info!("Device {} connected (firmware {})", device_id, device.version());
        self.timers.cancel(device_id);
        self.devices.insert(device_id, device);

        if self.options.broadcasts_on(BroadcastFlags::CONNECT) {
            self.broadcaster
                .broadcast(Notification::DeviceConnected(device_id));
        }
        if let Some(device) = self.devices.get_mut(&device_id) {
            device.on_registered();
        }
    }

    fn unregister_device(&mut self, device_id: DeviceId) {
        if self.devices.remove(&device_id).is_some() {
            log::info!("Device {} disconnected", device_id);
        }
        self.timers.cancel(device_id);

        if self.options.broadcasts_on(BroadcastFlags::DISCONNECT) {
            self.broadcaster
                .broadcast(Notification::DeviceDisconnected(device_id));
        }
    }

    fn handle_orientation(&mut self, device_id: DeviceId, readings: MotionReadings) {
        let Some(device) = self.devices.get_mut(&device_id) else {
            return;
        };
        if device.is_locked() {
            return;
        }

        let count = device.increment_orientation_counter();
        if let Some(every) = self.options.skip_one_orientation_every {
            if count % u64::from(every) == 0 {
                log::trace!("Skipping orientation frame {} of device {}", count, device_id);
                return;
            }
        }

        let (rpy, rpy_delta) = if self.options.use_roll_pitch_yaw {
            let scale = self.options.roll_pitch_yaw_scale;
            let rpy = compute_rpy(&readings.orientation, scale, device.direction_sign());
            let rpy_delta = device
                .orientation_offset()
                .map(|offset| compute_rpy_delta(&rpy, &offset, scale));
            (Some(rpy), rpy_delta)
        } else {
            (None, None)
        };

        device.on_orientation_sample(readings, rpy, rpy_delta);
    }

    fn handle_pose(&mut self, device_id: DeviceId, pose: String, now: Instant) {
        let Some(device) = self.devices.get(&device_id) else {
            return;
        };
        let locked = device.is_locked();

        // A new pose always preempts an in-flight confirmation
        self.timers.cancel(device_id);

        if pose == self.options.double_tap_pose {
            self.toggle_lock_and_broadcast(device_id);
        } else if pose == self.options.lock_unlock_pose {
            self.timers.schedule(
                device_id,
                self.options.lock_unlock_confirm,
                Confirmation::ToggleLock,
                now,
            );
        } else if !locked {
            self.timers.schedule(
                device_id,
                self.options.pose_confirm,
                Confirmation::Pose(pose),
                now,
            );
        }
    }

    /// Follow a hardware lock change, unless the software state already agrees.
    fn sync_hardware_lock(&mut self, device_id: DeviceId, reported: LockState) {
        let differs = self
            .devices
            .get(&device_id)
            .is_some_and(|device| device.lock_state() != reported);
        if differs {
            self.toggle_lock_and_broadcast(device_id);
        }
    }

    fn toggle_lock_and_broadcast(&mut self, device_id: DeviceId) {
        let Some(device) = self.devices.get_mut(&device_id) else {
            return;
        };
        let state = match device.toggle_lock() {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Lock command for device {} not sent: {}", device_id, e);
                device.lock_state()
            }
        };
        log::debug!("Device {} is now {:?}", device_id, state);

        if self.options.broadcasts_on(BroadcastFlags::LOCK_UNLOCK) {
            let notification = match state {
                LockState::Locked => Notification::DeviceLocked(device_id),
                LockState::Unlocked => Notification::DeviceUnlocked(device_id),
            };
            self.broadcaster.broadcast(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::RecordingSink;
    use crate::orientation::{Quaternion, Rpy};
    use crate::protocol::{Command, UnlockKind};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingBroadcast {
        notifications: Mutex<Vec<Notification>>,
    }

    impl RecordingBroadcast {
        fn take(&self) -> Vec<Notification> {
            std::mem::take(&mut *self.notifications.lock().unwrap())
        }
    }

    impl Broadcast for RecordingBroadcast {
        fn broadcast(&self, notification: Notification) {
            self.notifications.lock().unwrap().push(notification);
        }
    }

    struct Harness {
        session: Session,
        commands: Arc<RecordingSink>,
        notifications: Arc<RecordingBroadcast>,
        start: Instant,
    }

    impl Harness {
        fn new(options: Options) -> Self {
            let commands = Arc::new(RecordingSink::default());
            let notifications = Arc::new(RecordingBroadcast::default());
            let session = Session::new(options, commands.clone(), notifications.clone());
            Self {
                session,
                commands,
                notifications,
                start: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.start + Duration::from_millis(ms)
        }

        fn send(&mut self, ms: u64, payload: Value) {
            let text = json!(["event", payload]).to_string();
            let now = self.at(ms);
            self.session.handle_message_at(&text, now);
        }

        fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            self.session.fire_due_timers(now);
        }

        fn connect(&mut self, id: DeviceId) {
            self.send(0, json!({"type": "connected", "myo": id, "version": [1, 5, 1970]}));
            self.commands.take();
            self.notifications.take();
        }

        fn counter(&mut self, event: &str, id: DeviceId) -> Arc<AtomicUsize> {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            self.session.register_callback(
                event,
                move |_: &mut Device, _: Option<&EventData>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                id,
            );
            calls
        }
    }

    fn options_without_skip() -> Options {
        Options {
            skip_one_orientation_every: None,
            ..Options::default()
        }
    }

    fn orientation_frame(id: DeviceId, quat: Quaternion) -> Value {
        json!({
            "type": "orientation",
            "myo": id,
            "orientation": {"x": quat.x, "y": quat.y, "z": quat.z, "w": quat.w},
            "accelerometer": [0.0, 0.0, 1.0],
            "gyroscope": [0.0, 0.0, 0.0]
        })
    }

    #[test]
    fn test_connect_disconnect_lifecycle() {
        let mut h = Harness::new(Options::default());
        let registered = h.counter("registered", 0);

        h.send(0, json!({"type": "connected", "myo": 0, "version": [0, 8, 45]}));
        let device = h.session.device(0).expect("device registered");
        assert_eq!(device.version(), "0.8.45");
        assert_eq!(device.lock_state(), LockState::Unlocked);
        assert_eq!(registered.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.commands.take(),
            vec![Command::Unlock {
                myo: 0,
                kind: UnlockKind::Hold
            }]
        );
        assert_eq!(h.notifications.take(), vec![Notification::DeviceConnected(0)]);

        h.send(10, json!({"type": "disconnected", "myo": 0}));
        assert!(h.session.device(0).is_none());
        assert!(h.session.subscriptions(0).unwrap().contains_key("registered"));
        assert_eq!(h.notifications.take(), vec![Notification::DeviceDisconnected(0)]);

        h.send(20, json!({"type": "connected", "myo": 0, "version": [0, 8, 45]}));
        assert_eq!(registered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_connect_broadcast_can_be_disabled() {
        let mut options = Options::default();
        options.broadcasts.remove(BroadcastFlags::CONNECT | BroadcastFlags::DISCONNECT);
        let mut h = Harness::new(options);

        h.send(0, json!({"type": "connected", "myo": 3, "version": [1]}));
        h.send(1, json!({"type": "disconnected", "myo": 3}));
        assert!(h.notifications.take().is_empty());
    }

    #[test]
    fn test_registration_is_not_retroactive() {
        let mut h = Harness::new(Options::default());
        h.connect(0);
        let fist = h.counter("fist", 0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        h.tick(1000);
        assert_eq!(fist.load(Ordering::SeqCst), 0);
        assert_eq!(h.session.device(0).unwrap().current_pose(), Some("fist"));

        h.send(1000, json!({"type": "disconnected", "myo": 0}));
        h.connect(0);
        h.send(2000, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        h.tick(3000);
        assert_eq!(fist.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pose_confirmed_after_delay() {
        let mut h = Harness::new(Options::default());
        let fist = h.counter("fist", 0);
        h.connect(0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        assert_eq!(h.session.next_deadline(), Some(h.at(250)));
        h.tick(249);
        assert_eq!(fist.load(Ordering::SeqCst), 0);
        h.tick(250);
        assert_eq!(fist.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.next_deadline(), None);
    }

    #[test]
    fn test_new_pose_cancels_pending_confirmation() {
        let mut h = Harness::new(Options::default());
        let fist = h.counter("fist", 0);
        let rest = h.counter("rest", 0);
        h.connect(0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        h.send(100, json!({"type": "pose", "myo": 0, "pose": "rest"}));
        h.tick(260);
        assert_eq!(fist.load(Ordering::SeqCst), 0);
        assert_eq!(rest.load(Ordering::SeqCst), 0);

        h.tick(1000);
        assert_eq!(fist.load(Ordering::SeqCst), 0);
        assert_eq!(rest.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_locked_device_ignores_ordinary_poses() {
        let mut h = Harness::new(Options::default());
        let fist = h.counter("fist", 0);
        h.connect(0);
        h.session.device_mut(0).unwrap().lock().unwrap();

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        assert_eq!(h.session.next_deadline(), None);
        h.tick(1000);
        assert_eq!(fist.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lock_pose_toggles_after_confirmation() {
        let mut h = Harness::new(Options::default());
        h.connect(0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "thumb_to_pinky"}));
        h.tick(499);
        assert!(!h.session.device(0).unwrap().is_locked());

        h.tick(500);
        assert!(h.session.device(0).unwrap().is_locked());
        assert_eq!(h.commands.take(), vec![Command::Lock { myo: 0 }]);
        assert_eq!(h.notifications.take(), vec![Notification::DeviceLocked(0)]);

        // also works while locked
        h.send(600, json!({"type": "pose", "myo": 0, "pose": "thumb_to_pinky"}));
        h.tick(1100);
        assert!(!h.session.device(0).unwrap().is_locked());
        assert_eq!(h.notifications.take(), vec![Notification::DeviceUnlocked(0)]);
    }

    #[test]
    fn test_lock_pose_released_early_does_nothing() {
        let mut h = Harness::new(Options::default());
        h.connect(0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "thumb_to_pinky"}));
        h.send(200, json!({"type": "pose", "myo": 0, "pose": "rest"}));
        h.tick(600);
        assert!(!h.session.device(0).unwrap().is_locked());
        assert!(h.notifications.take().is_empty());
    }

    #[test]
    fn test_double_tap_toggles_immediately() {
        let mut h = Harness::new(Options::default());
        let fist = h.counter("fist", 0);
        h.connect(0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        h.send(10, json!({"type": "pose", "myo": 0, "pose": "double_tap"}));
        assert!(h.session.device(0).unwrap().is_locked());
        assert_eq!(h.notifications.take(), vec![Notification::DeviceLocked(0)]);
        assert_eq!(h.session.next_deadline(), None);

        h.send(20, json!({"type": "pose", "myo": 0, "pose": "double_tap"}));
        assert!(!h.session.device(0).unwrap().is_locked());
        assert_eq!(h.notifications.take(), vec![Notification::DeviceUnlocked(0)]);

        h.tick(1000);
        assert_eq!(fist.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lock_broadcast_can_be_disabled() {
        let mut options = Options::default();
        options.broadcasts.remove(BroadcastFlags::LOCK_UNLOCK);
        let mut h = Harness::new(options);
        h.connect(0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "double_tap"}));
        assert!(h.session.device(0).unwrap().is_locked());
        assert_eq!(h.commands.take(), vec![Command::Lock { myo: 0 }]);
        assert!(h.notifications.take().is_empty());
    }

    #[test]
    fn test_hardware_lock_is_idempotent() {
        let mut h = Harness::new(Options::default());
        h.connect(0);

        h.send(0, json!({"type": "unlocked", "myo": 0}));
        assert!(h.commands.take().is_empty());
        assert!(h.notifications.take().is_empty());

        h.send(10, json!({"type": "locked", "myo": 0}));
        assert!(h.session.device(0).unwrap().is_locked());
        assert_eq!(h.commands.take(), vec![Command::Lock { myo: 0 }]);
        assert_eq!(h.notifications.take(), vec![Notification::DeviceLocked(0)]);

        h.send(20, json!({"type": "locked", "myo": 0}));
        assert!(h.commands.take().is_empty());
        assert!(h.notifications.take().is_empty());

        h.send(30, json!({"type": "unlocked", "myo": 0}));
        assert!(!h.session.device(0).unwrap().is_locked());
        assert_eq!(h.notifications.take(), vec![Notification::DeviceUnlocked(0)]);
    }

    #[test]
    fn test_skip_one_orientation_every() {
        let mut h = Harness::new(Options::default());
        let orientation = h.counter("orientation", 0);
        h.connect(0);

        for ms in 0..6 {
            h.send(ms, orientation_frame(0, Quaternion::IDENTITY));
        }
        assert_eq!(orientation.load(Ordering::SeqCst), 3);
        assert_eq!(h.session.device(0).unwrap().orientation_count(), 6);
    }

    #[test]
    fn test_orientation_ignored_when_locked_or_unknown() {
        let mut h = Harness::new(options_without_skip());
        let orientation = h.counter("orientation", 0);
        h.connect(0);
        h.session.device_mut(0).unwrap().lock().unwrap();

        h.send(0, orientation_frame(0, Quaternion::IDENTITY));
        h.send(1, orientation_frame(9, Quaternion::IDENTITY));
        assert_eq!(orientation.load(Ordering::SeqCst), 0);
        assert_eq!(h.session.device(0).unwrap().orientation_count(), 0);
    }

    #[test]
    fn test_orientation_payload() {
        let mut h = Harness::new(options_without_skip());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        h.session.register_callback(
            "orientation",
            move |_: &mut Device, data: Option<&EventData>| {
                if let Some(EventData::Orientation(data)) = data {
                    sink.lock().unwrap().push(*data);
                }
            },
            0,
        );
        h.connect(0);

        h.send(0, orientation_frame(0, Quaternion::IDENTITY));
        h.session
            .device_mut(0)
            .unwrap()
            .capture_offset_from_last_observed();
        h.send(1, orientation_frame(0, Quaternion::IDENTITY));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].rpy, Some(Rpy::new(9.0, 9.0, 9.0)));
        assert_eq!(received[0].rpy_delta, None);
        assert_eq!(received[0].readings.accelerometer, [0.0, 0.0, 1.0]);
        assert_eq!(received[1].rpy_delta, Some(Rpy::new(0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_orientation_without_rpy() {
        let mut options = options_without_skip();
        options.use_roll_pitch_yaw = false;
        let mut h = Harness::new(options);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        h.session.register_callback(
            "orientation",
            move |_: &mut Device, data: Option<&EventData>| {
                sink.lock().unwrap().push(data.cloned());
            },
            0,
        );
        h.connect(0);
        h.session
            .device_mut(0)
            .unwrap()
            .set_orientation_offset(Rpy::new(1.0, 1.0, 1.0));

        h.send(0, orientation_frame(0, Quaternion::IDENTITY));
        match received.lock().unwrap().as_slice() {
            [Some(EventData::Orientation(data))] => {
                assert_eq!(data.rpy, None);
                assert_eq!(data.rpy_delta, None);
            }
            other => panic!("unexpected payloads {:?}", other),
        };
    }

    #[test]
    fn test_pose_handler_recenters_device() {
        let mut h = Harness::new(options_without_skip());
        h.session.register_callback(
            "fist",
            |device: &mut Device, _: Option<&EventData>| device.capture_offset_from_last_observed(),
            0,
        );
        let deltas = Arc::new(Mutex::new(Vec::new()));
        let sink = deltas.clone();
        h.session.register_callback(
            "orientation",
            move |_: &mut Device, data: Option<&EventData>| {
                if let Some(EventData::Orientation(o)) = data {
                    sink.lock().unwrap().push(o.rpy_delta);
                }
            },
            0,
        );
        h.connect(0);

        let half = std::f64::consts::FRAC_1_SQRT_2;
        let tilted = Quaternion::new(half, 0.0, 0.0, half);
        h.send(0, orientation_frame(0, tilted));
        h.send(10, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        h.tick(260);
        h.send(300, orientation_frame(0, tilted));

        let observed = h.session.device(0).unwrap().last_observed_rpy();
        assert_eq!(h.session.device(0).unwrap().orientation_offset(), observed);
        assert_eq!(
            *deltas.lock().unwrap(),
            vec![None, Some(Rpy::new(0.0, 0.0, 0.0))]
        );
    }

    #[test]
    fn test_pose_handler_can_lock_device() {
        let mut h = Harness::new(Options::default());
        h.session.register_callback(
            "fist",
            |device: &mut Device, _: Option<&EventData>| {
                let _ = device.lock();
            },
            0,
        );
        h.connect(0);

        h.send(0, json!({"type": "pose", "myo": 0, "pose": "fist"}));
        h.tick(250);
        assert!(h.session.device(0).unwrap().is_locked());
        assert_eq!(h.commands.take(), vec![Command::Lock { myo: 0 }]);
    }

    #[test]
    fn test_arm_direction_applies_to_orientation() {
        let mut h = Harness::new(options_without_skip());
        h.connect(0);
        h.send(0, json!({"type": "arm_synced", "myo": 0, "arm": "left", "x_direction": "toward_elbow"}));

        // 90 degrees about x
        let half = std::f64::consts::FRAC_1_SQRT_2;
        h.send(1, orientation_frame(0, Quaternion::new(half, 0.0, 0.0, half)));
        let rpy = h.session.device(0).unwrap().last_observed_rpy().unwrap();
        assert!((rpy.roll - 4.5).abs() < 1e-9);

        h.send(2, json!({"type": "arm_unsynced", "myo": 0}));
        assert_eq!(h.session.device(0).unwrap().direction_sign(), -1.0);
    }

    #[test]
    fn test_emg_and_rssi_dispatch() {
        let mut h = Harness::new(Options::default());
        let received = Arc::new(Mutex::new(Vec::new()));
        for event in ["emg", "rssi"] {
            let sink = received.clone();
            h.session.register_callback(
                event,
                move |_: &mut Device, data: Option<&EventData>| {
                    sink.lock().unwrap().push(data.cloned());
                },
                1,
            );
        }
        h.connect(1);

        h.send(0, json!({"type": "emg", "myo": 1, "timestamp": "1234", "emg": [1, -2, 3, -4, 5, -6, 7, -8]}));
        h.send(1, json!({"type": "rssi", "myo": 1, "rssi": -57}));

        assert_eq!(
            *received.lock().unwrap(),
            vec![
                Some(EventData::Emg(EmgSample {
                    values: [1, -2, 3, -4, 5, -6, 7, -8],
                    timestamp: Some("1234".into()),
                })),
                Some(EventData::Rssi(-57)),
            ]
        );
    }

    #[test]
    fn test_unknown_and_malformed_frames_are_dropped() {
        let mut h = Harness::new(Options::default());
        h.connect(0);
        let now = h.at(0);

        h.session.handle_message_at("{not json", now);
        h.session.handle_message_at(r#"["acknowledgement", {"type": "pose"}]"#, now);
        h.send(0, json!({"type": "warmup_completed", "myo": 0}));
        h.send(0, json!({"type": "pose", "myo": 7, "pose": "fist"}));
        h.send(0, json!({"type": "arm_recognized", "myo": 7}));

        assert_eq!(h.session.device_ids(), vec![0]);
        assert!(h.commands.take().is_empty());
        assert!(h.notifications.take().is_empty());
        assert_eq!(h.session.next_deadline(), None);
    }

    #[test]
    fn test_lifecycle_notifications() {
        let mut h = Harness::new(Options::default());
        assert_eq!(h.session.state(), ConnectionState::Disconnected);

        h.session.on_connecting();
        assert_eq!(h.session.state(), ConnectionState::Connecting);
        h.session.on_open();
        assert_eq!(h.session.state(), ConnectionState::Open);
        h.session.on_close();
        assert_eq!(h.session.state(), ConnectionState::Disconnected);

        assert_eq!(
            h.notifications.take(),
            vec![Notification::SessionStarted, Notification::SessionClosed]
        );
    }

    #[test]
    fn test_failed_connect_is_silent() {
        let mut h = Harness::new(Options::default());
        h.session.on_connecting();
        h.session.on_connect_failed();

        assert_eq!(h.session.state(), ConnectionState::Disconnected);
        assert!(h.notifications.take().is_empty());
    }

    #[test]
    fn test_auto_notify_off_silences_lifecycle() {
        let options = Options {
            auto_notify: false,
            ..Options::default()
        };
        let mut h = Harness::new(options);
        h.session.on_open();
        h.session.on_close();
        assert!(h.notifications.take().is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut first = Harness::new(Options::default());
        let second = Harness::new(Options::default());
        first.counter("fist", 0);
        first.connect(0);

        assert!(first.session.subscriptions(0).is_some());
        assert!(second.session.subscriptions(0).is_none());
        assert!(second.session.device(0).is_none());
    }
}
