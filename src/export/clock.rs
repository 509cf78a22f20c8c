//! Time source for progress estimates and the stalled-consumer watchdog

use tokio::time::Instant;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Tokio's clock (follows `tokio::time::pause` in tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::Clock;

    /// Clock that only moves when told to
    #[derive(Debug)]
    pub struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub fn advance(&self, by: Duration) {
            if let Ok(mut offset) = self.offset.lock() {
                *offset += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
            self.base + offset
        }
    }
}
