//! Print poses, orientation and session notifications from the Myo bridge.
//!
//! Usage: cargo run --example stream [options.json]
//! Press Ctrl+C to stop.

use myo::{EventData, Hub, MyoError, Notification, Options, Vibration};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POSES: [&str; 5] = ["fist", "wave_in", "wave_out", "fingers_spread", "double_tap"];

fn main() {
    env_logger::init();

    let options = match std::env::args().nth(1) {
        Some(path) => match Options::load(&path) {
            Ok(o) => o,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Options::default(),
    };

    println!("Bridge:   {}", options.endpoint());
    println!("Scale:    {}", options.roll_pitch_yaw_scale);
    println!();

    let mut hub = Hub::new(options);
    let samples = Arc::new(AtomicU64::new(0));

    hub.on(
        "registered",
        |device, _| println!("Device {} ready (firmware {})", device.id(), device.version()),
        0,
    );
    for pose in POSES {
        hub.on(pose, move |device, _| println!("Device {}: {}", device.id(), pose), 0);
    }

    let counter = samples.clone();
    hub.on(
        "orientation",
        move |_, data| {
            let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
            // Print every ~50th sample to avoid flooding the terminal
            if count % 50 != 1 {
                return;
            }
            if let Some(EventData::Orientation(o)) = data {
                match (o.rpy, o.rpy_delta) {
                    (Some(rpy), Some(delta)) => println!(
                        "rpy=[{:5.2}, {:5.2}, {:5.2}]  delta=[{:+5.2}, {:+5.2}, {:+5.2}]",
                        rpy.roll, rpy.pitch, rpy.yaw, delta.roll, delta.pitch, delta.yaw,
                    ),
                    (Some(rpy), None) => println!(
                        "rpy=[{:5.2}, {:5.2}, {:5.2}]",
                        rpy.roll, rpy.pitch, rpy.yaw
                    ),
                    _ => {
                        let q = o.readings.orientation;
                        println!("quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}]", q.x, q.y, q.z, q.w);
                    }
                }
            }
        },
        0,
    );

    if let Err(e) = hub.start() {
        eprintln!("Failed to connect: {}", e);
        std::process::exit(1);
    }

    println!("Listening (Ctrl+C to stop)...");
    let start = Instant::now();

    loop {
        match hub.recv_timeout(Duration::from_secs(30)) {
            Ok(notification) => {
                println!("[{:7.1}s] {}", start.elapsed().as_secs_f64(), notification.name());
                match notification {
                    Notification::DeviceConnected(id) => {
                        if let Err(e) = hub.vibrate(id, Vibration::Short) {
                            eprintln!("Vibrate failed: {}", e);
                        }
                    }
                    // Re-center on every unlock
                    Notification::DeviceUnlocked(id) => {
                        hub.with_device(id, |device| device.capture_offset_from_last_observed());
                    }
                    _ => {}
                }
            }
            Err(MyoError::Timeout) => {
                println!(
                    "--- {} orientation samples in {:.1}s ---",
                    samples.load(Ordering::Relaxed),
                    start.elapsed().as_secs_f64()
                );
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    hub.stop();
}
