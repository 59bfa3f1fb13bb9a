use crate::types::DeviceId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Opaque handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

#[derive(Debug)]
struct PendingTimer<T> {
    token: TimerToken,
    fire_at: Instant,
    action: T,
}

/// Debounce timers keyed by device id.
///
/// At most one timer is pending per device and scheduling replaces it.
/// Timers are deadline based: the owner polls [`GestureTimer::next_deadline`]
/// and collects expired actions with [`GestureTimer::take_due`].
#[derive(Debug)]
pub struct GestureTimer<T> {
    pending: HashMap<DeviceId, PendingTimer<T>>,
    next_token: u64,
}

impl<T> Default for GestureTimer<T> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            next_token: 0,
        }
    }
}

impl<T> GestureTimer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to fire `delay` after `now`, replacing any timer
    /// already pending for `device_id`.
    pub fn schedule(&mut self, device_id: DeviceId, delay: Duration, action: T, now: Instant) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;

        let replaced = self.pending.insert(
            device_id,
            PendingTimer {
                token,
                fire_at: now + delay,
                action,
            },
        );
        if replaced.is_some() {
            log::trace!("Timer for device {} replaced", device_id);
        }
        token
    }

    /// Cancel the pending timer for `device_id`. Returns whether one existed.
    pub fn cancel(&mut self, device_id: DeviceId) -> bool {
        self.pending.remove(&device_id).is_some()
    }

    /// Cancel by token. Stale tokens (fired, cancelled or replaced) are a no-op.
    pub fn cancel_token(&mut self, token: TimerToken) -> bool {
        let device_id = self
            .pending
            .iter()
            .find(|(_, timer)| timer.token == token)
            .map(|(id, _)| *id);

        match device_id {
            Some(id) => self.cancel(id),
            None => false,
        }
    }

    pub fn is_pending(&self, device_id: DeviceId) -> bool {
        self.pending.contains_key(&device_id)
    }

    /// Earliest deadline among pending timers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|timer| timer.fire_at).min()
    }

    /// Remove and return every action whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(DeviceId, T)> {
        let due_ids: Vec<DeviceId> = self
            .pending
            .iter()
            .filter(|(_, timer)| timer.fire_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut due: Vec<(Instant, DeviceId, T)> = due_ids
            .into_iter()
            .filter_map(|id| {
                self.pending
                    .remove(&id)
                    .map(|timer| (timer.fire_at, id, timer.action))
            })
            .collect();
        due.sort_by_key(|(fire_at, id, _)| (*fire_at, *id));

        due.into_iter().map(|(_, id, action)| (id, action)).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
