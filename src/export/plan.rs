//! Chunk planning
//!
//! Splits the requested row ranges into fixed-size chunks. Every chunk gets a
//! global sequence index, assigned in range order and then row order, which
//! is the only ordering key used by the rest of the pipeline.

use crate::error::{ExportError, Result};
use crate::source::RowRange;

/// One bounded row range scheduled as a single snapshot request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Global position of the chunk in the output
    pub sequence_index: usize,
    /// Position of the source range in the sorted range list
    pub range_ordinal: usize,
    pub start_row: u64,
    pub end_row: u64,
}

impl Chunk {
    pub fn rows(&self) -> RowRange {
        RowRange::new(self.start_row, self.end_row)
    }
}

/// Number of rows per chunk for a cell budget spread over `column_count` columns
///
/// Never returns less than one row.
pub fn chunk_rows(chunk_cells: usize, column_count: usize) -> u64 {
    (chunk_cells / column_count.max(1)).max(1) as u64
}

/// Deterministic chunk layout for a set of row ranges
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    ranges: Vec<RowRange>,
    chunk_rows: u64,
    per_range: Vec<usize>,
    total: usize,
}

impl ChunkPlan {
    /// Plan chunks over `ranges`
    ///
    /// Ranges are sorted by start row first. Overlapping ranges are not
    /// merged; avoiding them is up to the caller.
    ///
    /// # Errors
    /// * `ExportError::InvalidRange` - A range ends before it starts, or
    ///   covers more rows than can be counted
    pub fn new(ranges: &[RowRange], chunk_rows: u64) -> Result<Self> {
        let invalid = |r: &RowRange| r.end_row < r.start_row || r.checked_len().is_none();
        if let Some(bad) = ranges.iter().find(|r| invalid(r)) {
            return Err(ExportError::InvalidRange {
                start_row: bad.start_row,
                end_row: bad.end_row,
            }
            .into());
        }

        let chunk_rows = chunk_rows.max(1);
        let mut ranges = ranges.to_vec();
        ranges.sort_by_key(|r| r.start_row);

        let per_range: Vec<usize> = ranges
            .iter()
            .map(|r| usize::try_from(r.len().div_ceil(chunk_rows)).unwrap_or(usize::MAX))
            .collect();
        let total = per_range
            .iter()
            .try_fold(0usize, |total, &count| total.checked_add(count))
            .ok_or_else(|| ExportError::InvalidRange {
                start_row: ranges.first().map_or(0, |r| r.start_row),
                end_row: ranges.last().map_or(0, |r| r.end_row),
            })?;

        Ok(Self {
            ranges,
            chunk_rows,
            per_range,
            total,
        })
    }

    pub fn total_chunks(&self) -> usize {
        self.total
    }

    /// Chunk count for each range, in sorted range order
    pub fn chunks_per_range(&self) -> &[usize] {
        &self.per_range
    }

    pub fn chunk_rows(&self) -> u64 {
        self.chunk_rows
    }

    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    /// Total number of rows covered by the plan
    pub fn total_rows(&self) -> u64 {
        self.ranges
            .iter()
            .map(RowRange::len)
            .fold(0u64, u64::saturating_add)
    }

    /// Chunk stubs in sequence order
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        self.ranges
            .iter()
            .zip(&self.per_range)
            .enumerate()
            .flat_map(move |(ordinal, (range, &count))| {
                (0..count).map(move |i| {
                    let start_row = range.start_row + i as u64 * self.chunk_rows;
                    Chunk {
                        sequence_index: 0,
                        range_ordinal: ordinal,
                        start_row,
                        end_row: start_row.saturating_add(self.chunk_rows - 1).min(range.end_row),
                    }
                })
            })
            .enumerate()
            .map(|(sequence_index, chunk)| Chunk {
                sequence_index,
                ..chunk
            })
    }

    /// Chunk with the given sequence index
    pub fn chunk(&self, sequence_index: usize) -> Option<Chunk> {
        let mut first = 0;
        for (ordinal, (range, &count)) in self.ranges.iter().zip(&self.per_range).enumerate() {
            if sequence_index < first + count {
                let start_row = range.start_row + (sequence_index - first) as u64 * self.chunk_rows;
                return Some(Chunk {
                    sequence_index,
                    range_ordinal: ordinal,
                    start_row,
                    end_row: start_row.saturating_add(self.chunk_rows - 1).min(range.end_row),
                });
            }
            first += count;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_rows_from_cell_budget() {
        assert_eq!(chunk_rows(6000, 5), 1200);
        assert_eq!(chunk_rows(6000, 7), 857);
        assert_eq!(chunk_rows(10, 50), 1);
        assert_eq!(chunk_rows(6000, 0), 6000);
    }

    #[test]
    fn test_chunk_count_with_remainder() {
        let plan = ChunkPlan::new(&[RowRange::new(0, 999)], 300).unwrap();
        assert_eq!(plan.total_chunks(), 4);

        let sizes: Vec<u64> = plan.chunks().map(|c| c.rows().len()).collect();
        assert_eq!(sizes, vec![300, 300, 300, 100]);
    }

    #[test]
    fn test_multiple_ranges_sorted_and_indexed() {
        let plan = ChunkPlan::new(
            &[RowRange::new(100, 149), RowRange::new(0, 24)],
            20,
        )
        .unwrap();

        assert_eq!(plan.chunks_per_range(), &[2, 3]);
        assert_eq!(plan.total_chunks(), 5);
        assert_eq!(plan.total_rows(), 75);

        let chunks: Vec<Chunk> = plan.chunks().collect();
        let bounds: Vec<(usize, usize, u64, u64)> = chunks
            .iter()
            .map(|c| (c.sequence_index, c.range_ordinal, c.start_row, c.end_row))
            .collect();
        assert_eq!(
            bounds,
            vec![
                (0, 0, 0, 19),
                (1, 0, 20, 24),
                (2, 1, 100, 119),
                (3, 1, 120, 139),
                (4, 1, 140, 149),
            ]
        );

        for chunk in &chunks {
            assert_eq!(plan.chunk(chunk.sequence_index), Some(*chunk));
        }
        assert_eq!(plan.chunk(5), None);
    }

    #[test]
    fn test_single_row_ranges() {
        let plan = ChunkPlan::new(&[RowRange::new(7, 7), RowRange::new(9, 9)], 1000).unwrap();
        assert_eq!(plan.total_chunks(), 2);
        assert_eq!(plan.chunk(1).map(|c| c.rows()), Some(RowRange::new(9, 9)));
    }

    #[test]
    fn test_empty_plan() {
        let plan = ChunkPlan::new(&[], 100).unwrap();
        assert_eq!(plan.total_chunks(), 0);
        assert_eq!(plan.chunks().count(), 0);
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(ChunkPlan::new(&[RowRange::new(10, 5)], 100).is_err());
    }

    #[test]
    fn test_ranges_at_the_end_of_the_row_space() {
        let plan = ChunkPlan::new(&[RowRange::new(u64::MAX - 9, u64::MAX)], 4).unwrap();
        assert_eq!(plan.total_chunks(), 3);
        assert_eq!(plan.total_rows(), 10);

        let bounds: Vec<(u64, u64)> = plan.chunks().map(|c| (c.start_row, c.end_row)).collect();
        assert_eq!(
            bounds,
            vec![
                (u64::MAX - 9, u64::MAX - 6),
                (u64::MAX - 5, u64::MAX - 2),
                (u64::MAX - 1, u64::MAX),
            ]
        );
        assert_eq!(plan.chunk(2).map(|c| c.end_row), Some(u64::MAX));

        let huge_chunks = ChunkPlan::new(&[RowRange::new(u64::MAX - 1, u64::MAX)], u64::MAX).unwrap();
        assert_eq!(huge_chunks.chunk(0).map(|c| c.end_row), Some(u64::MAX));

        assert!(ChunkPlan::new(&[RowRange::new(0, u64::MAX)], 1000).is_err());
    }
}
