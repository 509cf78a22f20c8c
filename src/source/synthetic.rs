//! Generated in-memory table
//!
//! `SyntheticTable` produces deterministic cell values from the row position
//! and column type, with an optional per-snapshot latency that varies by
//! chunk so that snapshots resolve out of order. It backs the `export`
//! command of the binary and the end-to-end pipeline tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{Result, TableSaverError};

use super::{Cell, CellFormat, CellValue, Column, RowData, RowRange, SnapshotRow, TableHandle, TableSource};

/// 2024-01-01T00:00:00Z in nanoseconds
const BASE_TIMESTAMP_NANOS: i64 = 1_704_067_200_000_000_000;

/// Counters shared between a table and the handles it opened
#[derive(Debug, Default)]
pub struct SyntheticStats {
    pub handles_opened: AtomicUsize,
    pub handles_closed: AtomicUsize,
    pub snapshots_requested: AtomicUsize,
}

/// Deterministic generated table
#[derive(Clone)]
pub struct SyntheticTable {
    name: String,
    row_count: u64,
    columns: Vec<Column>,
    latency: Option<Duration>,
    fail_at_row: Option<u64>,
    stats: Arc<SyntheticStats>,
}

impl SyntheticTable {
    /// Create a table with `row_count` rows and the given columns
    pub fn new(name: impl Into<String>, row_count: u64, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            row_count,
            columns,
            latency: None,
            fail_at_row: None,
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    /// Table with one column of each supported type
    pub fn demo(row_count: u64) -> Self {
        Self::new(
            "demo",
            row_count,
            vec![
                Column::new("Id", "long"),
                Column::new("Symbol", "java.lang.String"),
                Column::new("Price", "double"),
                Column::new("Active", "boolean"),
                Column::new("Timestamp", "DateTime"),
            ],
        )
    }

    /// Delay every snapshot by a multiple of `base` that depends on its first row
    pub fn with_latency(mut self, base: Duration) -> Self {
        self.latency = Some(base);
        self
    }

    /// Make any snapshot containing `row` fail
    pub fn with_failure_at(mut self, row: u64) -> Self {
        self.fail_at_row = Some(row);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn stats(&self) -> Arc<SyntheticStats> {
        Arc::clone(&self.stats)
    }

    /// Value generated for `row` in `column`
    pub fn cell(row: u64, column: &Column) -> Cell {
        let value = match column.column_type.as_str() {
            "int" | "long" | "short" | "byte" => CellValue::Int(row as i64),
            "double" | "float" => CellValue::Float(row as f64 * 1.25),
            "boolean" => CellValue::Bool(row % 2 == 0),
            "DateTime" | "Instant" => {
                CellValue::DateTime(BASE_TIMESTAMP_NANOS + row as i64 * 1_000_000_000)
            }
            _ if row % 7 == 6 => CellValue::Null,
            _ => CellValue::Text(format!("{}-{}", column.name, row)),
        };
        let cell = Cell::new(value);
        if column.column_type == "double" && row % 2 == 1 {
            cell.with_format(CellFormat::with_format_string("0.0000"))
        } else {
            cell
        }
    }
}

#[async_trait]
impl TableSource for SyntheticTable {
    async fn open_export_handle(&self, columns: &[Column]) -> Result<Box<dyn TableHandle>> {
        self.stats.handles_opened.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Opened export handle on {} ({} columns)",
            self.name,
            columns.len()
        );
        Ok(Box::new(SyntheticHandle {
            table: self.clone(),
            closed: false,
        }))
    }
}

struct SyntheticHandle {
    table: SyntheticTable,
    closed: bool,
}

#[async_trait]
impl TableHandle for SyntheticHandle {
    fn snapshot(&self, range: RowRange, columns: &[Column]) -> BoxFuture<'static, Result<RowData>> {
        let table = self.table.clone();
        let columns = columns.to_vec();
        table.stats.snapshots_requested.fetch_add(1, Ordering::SeqCst);

        async move {
            if let Some(base) = table.latency {
                // Later chunks within a group of three resolve first
                let factor = 3 - (range.start_row / range.len().max(1)) % 3;
                tokio::time::sleep(base * factor as u32).await;
            }
            if let Some(row) = table.fail_at_row {
                if row >= range.start_row && row <= range.end_row {
                    return Err(TableSaverError::Generic(format!("row {row} is unavailable")));
                }
            }

            let end = range.end_row.min(table.row_count.saturating_sub(1));
            let rows = (range.start_row..=end)
                .filter(|_| table.row_count > 0)
                .map(|row| SnapshotRow {
                    key: row,
                    cells: columns.iter().map(|c| SyntheticTable::cell(row, c)).collect(),
                })
                .collect();
            Ok(RowData::new(rows))
        }
        .boxed()
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.table.stats.handles_closed.fetch_add(1, Ordering::SeqCst);
            debug!("Closed export handle on {}", self.table.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_clamps_to_row_count() {
        let table = SyntheticTable::demo(10);
        let mut handle = table.open_export_handle(table.columns()).await.unwrap();

        let data = handle
            .snapshot(RowRange::new(8, 20), table.columns())
            .await
            .unwrap();
        let keys: Vec<u64> = data.added_rows().map(|r| r.key).collect();
        assert_eq!(keys, vec![8, 9]);
        assert_eq!(data.data(0, 0), &CellValue::Int(8));

        handle.close().await.unwrap();
        handle.close().await.unwrap();
        let stats = table.stats();
        assert_eq!(stats.handles_opened.load(Ordering::SeqCst), 1);
        assert_eq!(stats.handles_closed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshots_requested.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_snapshot_failure_injection() {
        let table = SyntheticTable::demo(100).with_failure_at(42);
        let handle = table.open_export_handle(table.columns()).await.unwrap();

        assert!(handle.snapshot(RowRange::new(0, 9), table.columns()).await.is_ok());
        assert!(handle.snapshot(RowRange::new(40, 49), table.columns()).await.is_err());
    }

    #[test]
    fn test_generated_cells() {
        let price = Column::new("Price", "double");
        assert_eq!(SyntheticTable::cell(2, &price).value, CellValue::Float(2.5));
        assert!(SyntheticTable::cell(2, &price).format.is_none());
        assert!(SyntheticTable::cell(3, &price).format.is_some());

        let symbol = Column::new("Symbol", "java.lang.String");
        assert_eq!(
            SyntheticTable::cell(1, &symbol).value,
            CellValue::Text("Symbol-1".into())
        );
        assert!(SyntheticTable::cell(6, &symbol).value.is_null());
    }
}
