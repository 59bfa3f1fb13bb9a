use crate::config::Options;
use crate::device::{Device, Handler};
use crate::protocol::Command;
use crate::session::{ConnectionState, Session};
use crate::types::{DeviceId, EventData, Notification, Vibration};
use crate::{MyoError, Result};
use crossbeam_channel::Receiver;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Upper bound on how long the worker blocks in a socket read.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const NOTIFICATION_CAPACITY: usize = 256;

/// Connection to the Myo bridge.
///
/// Register subscriptions with [`Hub::on`] (before or after starting), then
/// call [`Hub::start`]. A background worker thread owns the WebSocket,
/// feeds frames into the session, fires gesture confirmations and
/// reconnects forever after the bridge goes away.
///
/// Subscribers run on the worker thread while the session is locked. They
/// get the live `&mut Device` to act on and must not call back into the `Hub`.
pub struct Hub {
    session: Arc<Mutex<Session>>,
    commands: Option<Receiver<Command>>,
    notifications: Receiver<Notification>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Hub {
    pub fn new(options: Options) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (notify_tx, notify_rx) = crossbeam_channel::bounded(NOTIFICATION_CAPACITY);
        let session = Session::new(options, Arc::new(command_tx), Arc::new(notify_tx));

        Hub {
            session: Arc::new(Mutex::new(session)),
            commands: Some(command_rx),
            notifications: notify_rx,
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Connect to the bridge and start the worker thread.
    ///
    /// Fails with [`MyoError::TransportUnavailable`] if the first connection
    /// cannot be made; later disconnects are retried indefinitely.
    pub fn start(&mut self) -> Result<()> {
        let commands = self.commands.take().ok_or(MyoError::AlreadyStarted)?;
        let url = lock_session(&self.session).options().endpoint();

        lock_session(&self.session).on_connecting();
        let socket = match connect(&url) {
            Ok(socket) => socket,
            Err(source) => {
                lock_session(&self.session).on_connect_failed();
                self.commands = Some(commands);
                return Err(MyoError::TransportUnavailable { url, source });
            }
        };

        let session = self.session.clone();
        let stop_flag = self.stop_flag.clone();
        let thread = std::thread::Builder::new()
            .name("myo-session".into())
            .spawn(move || {
                session_loop(socket, url, session, commands, stop_flag);
            })?;

        self.thread = Some(thread);
        Ok(())
    }

    /// Register `handler` for `event` on `device_id`.
    ///
    /// Event names are `registered`, `orientation`, `arm_recognized`,
    /// `arm_lost`, `emg`, `rssi` or a pose label such as `fist`. A device that
    /// is already connected only picks the handler up after it reconnects.
    pub fn on<F>(&self, event: &str, handler: F, device_id: DeviceId)
    where
        F: Fn(&mut Device, Option<&EventData>) + Send + Sync + 'static,
    {
        lock_session(&self.session).register_callback(event, handler, device_id);
    }

    pub fn on_subscriber(&self, event: &str, handler: Handler, device_id: DeviceId) {
        lock_session(&self.session).register_subscriber(event, handler, device_id);
    }

    /// Run `f` against a connected device.
    pub fn with_device<R>(&self, device_id: DeviceId, f: impl FnOnce(&mut Device) -> R) -> Option<R> {
        lock_session(&self.session).device_mut(device_id).map(f)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        lock_session(&self.session).device_ids()
    }

    pub fn lock(&self, device_id: DeviceId) -> Result<()> {
        self.with_device(device_id, |device| device.lock())
            .ok_or(MyoError::UnknownDevice(device_id))?
    }

    pub fn unlock(&self, device_id: DeviceId) -> Result<()> {
        self.with_device(device_id, |device| device.unlock())
            .ok_or(MyoError::UnknownDevice(device_id))?
    }

    pub fn vibrate(&self, device_id: DeviceId, intensity: Vibration) -> Result<()> {
        self.with_device(device_id, |device| device.vibrate(intensity))
            .ok_or(MyoError::UnknownDevice(device_id))?
    }

    /// Effective options.
    pub fn options(&self) -> Options {
        lock_session(&self.session).options().clone()
    }

    pub fn state(&self) -> ConnectionState {
        lock_session(&self.session).state()
    }

    /// Check if the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.thread.is_some() && !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Receive the next notification (blocks until available).
    pub fn recv(&self) -> Result<Notification> {
        self.notifications
            .recv()
            .map_err(|_| MyoError::SessionStopped)
    }

    /// Try to receive a notification without blocking.
    pub fn try_recv(&self) -> Option<Notification> {
        self.notifications.try_recv().ok()
    }

    /// Receive a notification with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Notification> {
        self.notifications.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => MyoError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => MyoError::SessionStopped,
        })
    }

    /// Stop the worker and wait for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn connect(url: &str) -> std::result::Result<Socket, tungstenite::Error> {
    let (socket, _response) = tungstenite::connect(url)?;
    log::info!("Connected to {}", url);
    Ok(socket)
}

enum PumpExit {
    Closed,
    Stopped,
}

/// Worker thread body: pump the socket, reconnect on close, until stopped.
fn session_loop(
    mut socket: Socket,
    url: String,
    session: Arc<Mutex<Session>>,
    commands: Receiver<Command>,
    stop_flag: Arc<AtomicBool>,
) {
    let reconnect_delay = lock_session(&session).options().reconnect_delay;
    log::info!("Session worker started");

    loop {
        lock_session(&session).on_open();

        match pump(&mut socket, &session, &commands, &stop_flag) {
            PumpExit::Stopped => {
                let _ = socket.close(None);
                let _ = socket.flush();
                break;
            }
            PumpExit::Closed => {
                lock_session(&session).on_close();
                discard_commands(&commands);
            }
        }

        socket = match reconnect(&url, reconnect_delay, &session, &commands, &stop_flag) {
            Some(socket) => socket,
            None => break,
        };
    }

    log::info!("Session worker stopped");
}

/// Wait `delay` and reconnect, as many times as it takes.
/// A failed attempt is reported as another close.
fn reconnect(
    url: &str,
    delay: Duration,
    session: &Mutex<Session>,
    commands: &Receiver<Command>,
    stop_flag: &AtomicBool,
) -> Option<Socket> {
    loop {
        if !sleep_unless_stopped(delay, stop_flag) {
            return None;
        }

        lock_session(session).on_connecting();
        match connect(url) {
            Ok(socket) => return Some(socket),
            Err(e) => {
                log::warn!("Reconnect to {} failed: {}", url, e);
                lock_session(session).on_close();
                discard_commands(commands);
            }
        }
    }
}

fn pump(
    socket: &mut Socket,
    session: &Mutex<Session>,
    commands: &Receiver<Command>,
    stop_flag: &AtomicBool,
) -> PumpExit {
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            return PumpExit::Stopped;
        }

        let next_deadline = {
            let mut session = lock_session(session);
            session.fire_due_timers(Instant::now());
            session.next_deadline()
        };

        if let Err(e) = flush_commands(socket, commands) {
            log::warn!("Failed to send command: {}", e);
            return PumpExit::Closed;
        }

        set_read_timeout(socket, poll_timeout(next_deadline));

        match socket.read() {
            Ok(Message::Text(text)) => lock_session(session).handle_message(&text),
            Ok(Message::Close(frame)) => {
                log::info!("Bridge closed the connection: {:?}", frame);
                let _ = socket.flush();
                return PumpExit::Closed;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                return PumpExit::Closed;
            }
            Err(e) => {
                log::warn!("WebSocket read error: {}", e);
                return PumpExit::Closed;
            }
        }
    }
}

fn flush_commands(socket: &mut Socket, commands: &Receiver<Command>) -> Result<()> {
    for command in commands.try_iter() {
        let text = command.encode()?;
        log::trace!("-> device {}: {}", command.device_id(), text);
        socket.send(Message::Text(text))?;
    }
    Ok(())
}

/// Commands queued for a closed connection are stale by the time it reopens.
fn discard_commands(commands: &Receiver<Command>) {
    let dropped = commands.try_iter().count();
    if dropped > 0 {
        log::debug!("Discarded {} queued command(s)", dropped);
    }
}

fn set_read_timeout(socket: &Socket, timeout: Duration) {
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        if let Err(e) = stream.set_read_timeout(Some(timeout)) {
            log::debug!("set_read_timeout failed: {}", e);
        }
    }
}

fn poll_timeout(next_deadline: Option<Instant>) -> Duration {
    let timeout = match next_deadline {
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .min(POLL_INTERVAL),
        None => POLL_INTERVAL,
    };
    timeout.max(Duration::from_millis(1))
}

/// Sleep in short slices so a stop request is noticed. Returns false if stopped.
fn sleep_unless_stopped(delay: Duration, stop_flag: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(50)));
    }
}
