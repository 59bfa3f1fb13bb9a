//! # myo - client for the Myo armband WebSocket bridge
//!
//! Talks to the local Myo Connect bridge over WebSocket. Provides:
//! - Device registry with per-device event subscriptions
//! - Gesture-confirmed poses and software lock/unlock
//! - Orientation in roll/pitch/yaw with a user-settable offset
//! - Automatic reconnect and session notifications
//!
//! ## Quick Start
//! ```no_run
//! use myo::{Hub, Options, EventData};
//! use std::time::Duration;
//!
//! let mut hub = Hub::new(Options::default());
//! hub.on("fist", |device, _| println!("fist on {}", device.id()), 0);
//! hub.on("orientation", |_, data| {
//!     if let Some(EventData::Orientation(o)) = data {
//!         println!("rpy: {:?}", o.rpy);
//!     }
//! }, 0);
//! hub.start().unwrap();
//!
//! loop {
//!     let notification = hub.recv_timeout(Duration::from_secs(10)).unwrap();
//!     println!("{}", notification.name());
//! }
//! ```

pub mod error;
pub mod types;
pub mod orientation;
pub mod protocol;
pub mod timer;
pub mod device;
pub mod config;
pub mod session;
pub mod hub;

pub use config::{BroadcastFlags, Options};
pub use device::{CommandSink, Device, Handler, Subscriber};
pub use error::MyoError;
pub use hub::Hub;
pub use orientation::{compute_rpy, compute_rpy_delta, Quaternion, Rpy};
pub use session::{Broadcast, ConnectionState, Session};
pub use types::*;

/// Result type alias for myo operations.
pub type Result<T> = std::result::Result<T, MyoError>;
