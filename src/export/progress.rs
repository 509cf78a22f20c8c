//! Progress tracking for export operations
//!
//! Progress is measured in drained chunks. The estimate of the remaining
//! time extrapolates the average time per drained chunk so far.

use tokio::time::Instant;

/// Percent complete and estimated seconds remaining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub percent: u32,
    /// `None` until more than one chunk has been drained
    pub eta_seconds: Option<u64>,
}

/// Compute progress for `completed` of `total` chunks
///
/// # Arguments
/// * `completed` - Chunks drained so far
/// * `total` - Chunks in the export
/// * `start` - When the export started
/// * `now` - Current time
pub fn estimate(completed: usize, total: usize, start: Instant, now: Instant) -> Progress {
    if total == 0 {
        return Progress {
            percent: 100,
            eta_seconds: Some(0),
        };
    }

    let completed = completed.min(total) as u128;
    let total = total as u128;
    let percent = (completed * 100 / total) as u32;
    let eta_seconds = (completed > 1).then(|| {
        let elapsed_ms = now.saturating_duration_since(start).as_millis();
        (elapsed_ms * (total - completed) / completed / 1000) as u64
    });

    Progress {
        percent,
        eta_seconds,
    }
}

/// Progress state of one export job
///
/// The completed count only moves forward; stale updates are ignored.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_chunks: usize,
    completed_chunks: usize,
    start: Instant,
}

impl ProgressTracker {
    pub fn new(total_chunks: usize, start: Instant) -> Self {
        Self {
            total_chunks,
            completed_chunks: 0,
            start,
        }
    }

    /// Record `completed` drained chunks and return the new progress
    pub fn update(&mut self, completed: usize, now: Instant) -> Progress {
        self.completed_chunks = self.completed_chunks.max(completed.min(self.total_chunks));
        estimate(self.completed_chunks, self.total_chunks, self.start, now)
    }

    pub fn completed_chunks(&self) -> usize {
        self.completed_chunks
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn start(&self) -> Instant {
        self.start
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_percent_is_floored() {
        let start = Instant::now();
        assert_eq!(estimate(1, 3, start, start).percent, 33);
        assert_eq!(estimate(2, 3, start, start).percent, 66);
        assert_eq!(estimate(3, 3, start, start).percent, 100);
    }

    #[test]
    fn test_eta_requires_more_than_one_chunk() {
        let start = Instant::now();
        let now = start + Duration::from_secs(10);
        assert_eq!(estimate(0, 10, start, now).eta_seconds, None);
        assert_eq!(estimate(1, 10, start, now).eta_seconds, None);
        // 10s for 2 chunks, 8 to go
        assert_eq!(estimate(2, 10, start, now).eta_seconds, Some(40));
        assert_eq!(estimate(10, 10, start, now).eta_seconds, Some(0));
    }

    #[test]
    fn test_empty_export_is_complete() {
        let start = Instant::now();
        assert_eq!(estimate(0, 0, start, start).percent, 100);
    }

    #[test]
    fn test_tracker_never_moves_backward() {
        let start = Instant::now();
        let mut tracker = ProgressTracker::new(4, start);
        assert_eq!(tracker.update(2, start).percent, 50);
        assert_eq!(tracker.update(1, start).percent, 50);
        assert_eq!(tracker.completed_chunks(), 2);
        assert_eq!(tracker.update(9, start).percent, 100);
    }

    #[test]
    fn test_tracker_eta_follows_clock() {
        use crate::export::clock::{Clock, ManualClock};

        let clock = ManualClock::new();
        let mut tracker = ProgressTracker::new(5, clock.now());
        clock.advance(Duration::from_secs(2));
        assert_eq!(tracker.update(1, clock.now()).eta_seconds, None);
        clock.advance(Duration::from_secs(2));
        // 4s for 2 chunks, 3 to go
        assert_eq!(
            tracker.update(2, clock.now()),
            Progress {
                percent: 40,
                eta_seconds: Some(6)
            }
        );
    }
}
