//! Stalled-consumer watchdog
//!
//! Some download consumers never report that they were cancelled. They do,
//! however, keep asking for more data while they are alive. The watchdog is
//! re-armed on every such request; if the deadline passes without one, the
//! consumer is considered gone.

use std::time::Duration;

use tokio::time::Instant;

/// Default time without a liveness signal before the consumer is considered gone
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_millis(8000);

/// Deadline tracker for liveness signals
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    /// Create a disarmed watchdog
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Push the deadline to `now + timeout`, arming the watchdog if needed
    pub fn reset(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    /// Stop watching; a disarmed watchdog never expires
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Resolve once the current deadline has passed
    ///
    /// Pends forever while disarmed.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
