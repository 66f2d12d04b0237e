//! Idle countdown for liveness probing.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Restartable countdown that decides when an idle session gets probed.
///
/// The timer is a stored deadline, not a task: checking is a clock
/// comparison and restarting just moves the deadline. Share workers
/// restart it from outside the session loop, hence the lock.
#[derive(Debug)]
pub struct ProbeTimer {
    interval: Duration,
    deadline: Mutex<Option<Instant>>,
}

impl ProbeTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Mutex::new(None),
        }
    }

    /// Arms the countdown, replacing any previous deadline.
    pub fn restart(&self) {
        *self.lock() = Some(Instant::now() + self.interval);
    }

    /// Whether the armed deadline has passed. An unarmed timer never
    /// expires.
    pub fn has_expired(&self) -> bool {
        match *self.lock() {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
