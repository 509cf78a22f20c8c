//! Sequence-ordered reassembly of chunk payloads
//!
//! Fetches complete in any order. The reorder buffer holds completed chunks
//! until every chunk before them has been emitted, and tells the job how many
//! new fetches it may start so that in-flight plus buffered chunks never
//! exceed the window.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::source::RowData;

/// Reorder state for one export job
#[derive(Debug)]
pub struct ReorderBuffer<T = RowData> {
    window_size: usize,
    total_chunks: usize,
    next_expected_index: usize,
    next_unscheduled: usize,
    in_flight_count: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> ReorderBuffer<T> {
    /// Create a buffer for `total_chunks` chunks with at most `window_size`
    /// chunks in flight or buffered
    pub fn new(total_chunks: usize, window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            total_chunks,
            next_expected_index: 0,
            next_unscheduled: 0,
            in_flight_count: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Record that the next unscheduled chunk has been requested
    ///
    /// # Returns
    /// * `Option<usize>` - Sequence index of the scheduled chunk, `None` when
    ///   every chunk is already scheduled
    pub fn on_fetch_started(&mut self) -> Option<usize> {
        if self.next_unscheduled >= self.total_chunks {
            return None;
        }
        let index = self.next_unscheduled;
        self.next_unscheduled += 1;
        self.in_flight_count += 1;
        Some(index)
    }

    /// Store a completed chunk and drain whatever became contiguous
    ///
    /// Completions for chunks that were never scheduled, were already
    /// drained, or are already buffered are ignored.
    ///
    /// # Returns
    /// * `Vec<(usize, T)>` - Chunks ready to be written, in sequence order
    pub fn on_fetch_completed(&mut self, sequence_index: usize, payload: T) -> Vec<(usize, T)> {
        if sequence_index < self.next_expected_index
            || sequence_index >= self.next_unscheduled
            || self.pending.contains_key(&sequence_index)
        {
            debug!("Ignoring unexpected completion for chunk {}", sequence_index);
            return Vec::new();
        }

        self.in_flight_count -= 1;
        self.pending.insert(sequence_index, payload);
        self.drain()
    }

    /// Remove every buffered chunk contiguous with the next expected index
    pub fn drain(&mut self) -> Vec<(usize, T)> {
        let mut ready = Vec::new();
        while let Some(payload) = self.pending.remove(&self.next_expected_index) {
            ready.push((self.next_expected_index, payload));
            self.next_expected_index += 1;
        }
        trace!(
            "Drained {} chunks: next expected {}, in flight {}, buffered {}",
            ready.len(),
            self.next_expected_index,
            self.in_flight_count,
            self.pending.len()
        );
        ready
    }

    /// Number of fetches that may be started right now
    pub fn refill_count(&self) -> usize {
        let free = self
            .window_size
            .saturating_sub(self.in_flight_count + self.pending.len());
        free.min(self.total_chunks - self.next_unscheduled)
    }

    /// Every chunk has been drained
    pub fn is_complete(&self) -> bool {
        self.next_expected_index == self.total_chunks
    }

    pub fn next_expected_index(&self) -> usize {
        self.next_expected_index
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight_count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(buffer: &mut ReorderBuffer<&'static str>) -> Vec<usize> {
        let n = buffer.refill_count();
        (0..n).filter_map(|_| buffer.on_fetch_started()).collect()
    }

    #[test]
    fn test_out_of_order_completion_flushes_in_one_pass() {
        // rows [0, 999], 250 rows per chunk, window of 2
        let mut buffer = ReorderBuffer::new(4, 2);
        assert_eq!(start(&mut buffer), vec![0, 1]);

        assert!(buffer.on_fetch_completed(1, "b").is_empty());
        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(buffer.refill_count(), 0);

        let ready = buffer.on_fetch_completed(0, "a");
        assert_eq!(ready, vec![(0, "a"), (1, "b")]);
        assert_eq!(buffer.next_expected_index(), 2);

        assert_eq!(start(&mut buffer), vec![2, 3]);
        assert_eq!(buffer.on_fetch_completed(3, "d"), vec![]);
        assert_eq!(buffer.on_fetch_completed(2, "c"), vec![(2, "c"), (3, "d")]);
        assert!(buffer.is_complete());
        assert_eq!(buffer.refill_count(), 0);
        assert_eq!(buffer.on_fetch_started(), None);
    }

    #[test]
    fn test_window_bound_holds_for_any_completion_order() {
        let total = 12;
        let window = 3;
        // completes the highest outstanding index first
        let mut buffer = ReorderBuffer::new(total, window);
        let mut outstanding: Vec<usize> = start(&mut buffer);
        let mut emitted = Vec::new();

        while let Some(index) = outstanding.pop() {
            assert!(buffer.in_flight_count() + buffer.pending_len() <= window);
            let ready = buffer.on_fetch_completed(index, "x");
            emitted.extend(ready.into_iter().map(|(i, _)| i));
            assert!(buffer.in_flight_count() + buffer.pending_len() <= window);
            assert!(buffer.drain().is_empty());
            let more = start(&mut buffer);
            outstanding.splice(0..0, more);
        }

        assert!(buffer.is_complete());
        assert_eq!(emitted, (0..total).collect::<Vec<_>>());
    }

    #[test]
    fn test_duplicate_and_stale_completions_ignored() {
        let mut buffer = ReorderBuffer::new(3, 3);
        start(&mut buffer);

        assert_eq!(buffer.on_fetch_completed(0, "a"), vec![(0, "a")]);
        // already drained
        assert!(buffer.on_fetch_completed(0, "again").is_empty());
        assert!(buffer.on_fetch_completed(2, "c").is_empty());
        // already buffered
        assert!(buffer.on_fetch_completed(2, "dup").is_empty());
        // never scheduled
        assert!(buffer.on_fetch_completed(7, "z").is_empty());
        assert_eq!(buffer.in_flight_count(), 1);

        assert_eq!(buffer.on_fetch_completed(1, "b"), vec![(1, "b"), (2, "c")]);
        assert!(buffer.is_complete());
    }

    #[test]
    fn test_zero_chunks_is_complete() {
        let buffer: ReorderBuffer<()> = ReorderBuffer::new(0, 5);
        assert!(buffer.is_complete());
        assert_eq!(buffer.refill_count(), 0);
    }

    #[test]
    fn test_refill_limited_by_remaining_chunks() {
        let mut buffer: ReorderBuffer<()> = ReorderBuffer::new(2, 5);
        assert_eq!(buffer.refill_count(), 2);
        buffer.on_fetch_started();
        assert_eq!(buffer.refill_count(), 1);
    }
}
