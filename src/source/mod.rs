//! Remote snapshot source abstractions
//!
//! The export pipeline never talks to a concrete table implementation. It
//! opens a [`TableHandle`] through a [`TableSource`] and requests one
//! snapshot per chunk. A snapshot is returned as [`RowData`]: the rows that
//! were added by the snapshot, each carrying one cell per requested column.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;

pub mod synthetic;

pub use synthetic::SyntheticTable;

/// Inclusive range of row positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowRange {
    pub start_row: u64,
    pub end_row: u64,
}

impl RowRange {
    pub fn new(start_row: u64, end_row: u64) -> Self {
        Self { start_row, end_row }
    }

    /// Number of rows covered by the range (0 when inverted)
    ///
    /// Saturates at `u64::MAX` for `[0, u64::MAX]`; see [`Self::checked_len`].
    pub fn len(&self) -> u64 {
        self.checked_len().unwrap_or(u64::MAX)
    }

    /// Number of rows covered, `None` when the count does not fit a `u64`
    pub fn checked_len(&self) -> Option<u64> {
        if self.end_row < self.start_row {
            Some(0)
        } else {
            (self.end_row - self.start_row).checked_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_row, self.end_row)
    }
}

/// Column reference as exposed by the table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    /// Column name, used for the header row
    pub name: String,
    /// Source type name (e.g. `int`, `double`, `java.lang.String`, `DateTime`)
    pub column_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Nanoseconds since the Unix epoch
    DateTime(i64),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(v) => write!(f, "{v}"),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Text(v) => f.write_str(v),
            CellValue::DateTime(v) => write!(f, "{v}"),
        }
    }
}

/// Per-cell format metadata carried by a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellFormat {
    pub format_string: Option<String>,
}

impl CellFormat {
    pub fn with_format_string(format_string: impl Into<String>) -> Self {
        Self {
            format_string: Some(format_string.into()),
        }
    }
}

/// One cell of a snapshot row
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: CellValue,
    pub format: Option<CellFormat>,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self {
            value,
            format: None,
        }
    }

    pub fn with_format(mut self, format: CellFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// One row added by a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    /// Row key in the source table
    pub key: u64,
    /// Cells, aligned with the requested columns
    pub cells: Vec<Cell>,
}

/// Result of a single snapshot request
///
/// Cells are addressed by the row's position within the snapshot and the
/// column's position within the requested column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowData {
    rows: Vec<SnapshotRow>,
}

impl RowData {
    pub fn new(rows: Vec<SnapshotRow>) -> Self {
        Self { rows }
    }

    /// Rows added by the snapshot, in key order
    pub fn added_rows(&self) -> impl Iterator<Item = &SnapshotRow> {
        self.rows.iter()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn data(&self, row: usize, column: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.cells.get(column))
            .map(|c| &c.value)
            .unwrap_or(&CellValue::Null)
    }

    pub fn format(&self, row: usize, column: usize) -> Option<&CellFormat> {
        self.rows
            .get(row)
            .and_then(|r| r.cells.get(column))
            .and_then(|c| c.format.as_ref())
    }
}

/// Open handle on a table, exclusively owned by one export job
///
/// Closing the handle releases the table and its viewport subscription.
#[async_trait]
pub trait TableHandle: Send + Sync {
    /// Request a snapshot of `range` over `columns`
    ///
    /// The returned future must not borrow the handle so that several
    /// snapshots can be outstanding while the handle stays usable.
    fn snapshot(&self, range: RowRange, columns: &[Column]) -> BoxFuture<'static, Result<RowData>>;

    /// Release the table and its subscription
    async fn close(&mut self) -> Result<()>;
}

/// Capability to open export handles on a table
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Open a frozen handle dedicated to one export over `columns`
    async fn open_export_handle(&self, columns: &[Column]) -> Result<Box<dyn TableHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowData {
        RowData::new(vec![
            SnapshotRow {
                key: 10,
                cells: vec![
                    Cell::new(CellValue::Int(1)),
                    Cell::new(CellValue::Text("a".into()))
                        .with_format(CellFormat::with_format_string("0.00")),
                ],
            },
            SnapshotRow {
                key: 11,
                cells: vec![Cell::new(CellValue::Int(2)), Cell::new(CellValue::Null)],
            },
        ])
    }

    #[test]
    fn test_row_range_len() {
        assert_eq!(RowRange::new(0, 999).len(), 1000);
        assert_eq!(RowRange::new(5, 5).len(), 1);
        assert!(RowRange::new(6, 5).is_empty());
    }

    #[test]
    fn test_row_data_accessors() {
        let data = sample();
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.data(0, 0), &CellValue::Int(1));
        assert_eq!(data.data(1, 1), &CellValue::Null);
        // Out of bounds reads as null rather than panicking
        assert_eq!(data.data(7, 0), &CellValue::Null);
        assert_eq!(
            data.format(0, 1).and_then(|f| f.format_string.as_deref()),
            Some("0.00")
        );
        assert!(data.format(1, 0).is_none());
        let keys: Vec<u64> = data.added_rows().map(|r| r.key).collect();
        assert_eq!(keys, vec![10, 11]);
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Null.to_string(), "");
        assert_eq!(CellValue::Float(1.5).to_string(), "1.5");
        assert_eq!(CellValue::Text("x".into()).to_string(), "x");
    }
}
