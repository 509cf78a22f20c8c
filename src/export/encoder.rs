//! CSV encoding of snapshot chunks
//!
//! Every cell is rendered through the job's [`Formatter`] (or as its raw value
//! when unformatted output is requested), quoted, and joined with `,`. Rows
//! end with `\n`. The header row is produced separately and only once per
//! export.

use std::collections::HashMap;

use tracing::trace;

use crate::formatter::{Formatter, FormatterId, format_date_time};
use crate::source::{CellValue, Column, RowData};

/// Field delimiter
pub const FIELD_DELIMITER: char = ',';

/// Line terminator
pub const LINE_TERMINATOR: char = '\n';

/// Pattern for date-time values exported without formatting
///
/// Nanosecond precision, followed by the formatter's time zone offset.
pub const UNFORMATTED_DATE_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.9f %Z";

/// Maximum entries kept by [`FormatFlagCache`]
pub const FORMAT_FLAG_CACHE_SIZE: usize = 10_000;

/// Quote a value, doubling embedded quotes
pub fn csv_escape(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Encode the header row: column names, unquoted
pub fn encode_header(columns: &[Column]) -> String {
    let mut header = columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",");
    header.push(LINE_TERMINATOR);
    header
}

/// Bounded cache of "column has a custom format" flags
///
/// Entries are keyed by column name and type and belong to one formatter
/// identity; the cache empties itself when a different formatter shows up or
/// when it reaches its capacity.
#[derive(Debug)]
pub struct FormatFlagCache {
    formatter: Option<FormatterId>,
    flags: HashMap<(String, String), bool>,
    capacity: usize,
}

impl Default for FormatFlagCache {
    fn default() -> Self {
        Self::with_capacity(FORMAT_FLAG_CACHE_SIZE)
    }
}

impl FormatFlagCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            formatter: None,
            flags: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Cached `formatter.is_custom_column_format_defined(name, type)`
    pub fn has_custom_column_format(&mut self, formatter: &dyn Formatter, column: &Column) -> bool {
        let identity = formatter.identity();
        if self.formatter != Some(identity) {
            self.flags.clear();
            self.formatter = Some(identity);
        }

        let key = (column.name.clone(), column.column_type.clone());
        if let Some(flag) = self.flags.get(&key) {
            return *flag;
        }

        if self.flags.len() >= self.capacity {
            self.flags.clear();
        }
        let flag = formatter.is_custom_column_format_defined(&column.name, &column.column_type);
        self.flags.insert(key, flag);
        flag
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Converts snapshot chunks into CSV text
#[derive(Debug)]
pub struct RowEncoder {
    columns: Vec<Column>,
    use_unformatted_values: bool,
    format_flags: FormatFlagCache,
}

impl RowEncoder {
    pub fn new(columns: Vec<Column>, use_unformatted_values: bool) -> Self {
        Self {
            columns,
            use_unformatted_values,
            format_flags: FormatFlagCache::default(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn header(&self) -> String {
        encode_header(&self.columns)
    }

    /// Encode every added row of `data`
    pub fn encode(&mut self, data: &RowData, formatter: &dyn Formatter) -> String {
        let mut out = String::new();
        let last = self.columns.len().saturating_sub(1);

        for row in 0..data.row_count() {
            for col in 0..self.columns.len() {
                let cell = self.render_cell(data, row, col, formatter);
                out.push_str(&csv_escape(&cell));
                out.push(if col == last {
                    LINE_TERMINATOR
                } else {
                    FIELD_DELIMITER
                });
            }
        }

        trace!("Encoded {} rows into {} bytes", data.row_count(), out.len());
        out
    }

    fn render_cell(&mut self, data: &RowData, row: usize, col: usize, formatter: &dyn Formatter) -> String {
        let column = &self.columns[col];
        let value = data.data(row, col);

        if self.use_unformatted_values {
            return match value {
                CellValue::DateTime(nanos) => {
                    format_date_time(*nanos, formatter.time_zone(), UNFORMATTED_DATE_PATTERN)
                }
                other => other.to_string(),
            };
        }

        let format_override = if self.format_flags.has_custom_column_format(formatter, column) {
            None
        } else {
            data.format(row, col).filter(|f| f.format_string.is_some())
        };

        formatter.formatted_string(value, &column.column_type, &column.name, format_override)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::formatter::PlainFormatter;
    use crate::source::{Cell, CellFormat, SnapshotRow};

    fn columns() -> Vec<Column> {
        vec![Column::new("Name", "java.lang.String"), Column::new("Price", "double")]
    }

    fn data() -> RowData {
        RowData::new(vec![
            SnapshotRow {
                key: 0,
                cells: vec![
                    Cell::new(CellValue::Text("say \"hi\"".into())),
                    Cell::new(CellValue::Float(1.5))
                        .with_format(CellFormat::with_format_string("0.00")),
                ],
            },
            SnapshotRow {
                key: 1,
                cells: vec![Cell::new(CellValue::Null), Cell::new(CellValue::Float(2.0))],
            },
        ])
    }

    /// Counts calls to the custom-format check
    struct CountingFormatter {
        inner: PlainFormatter,
        checks: AtomicUsize,
    }

    impl Formatter for CountingFormatter {
        fn identity(&self) -> FormatterId {
            self.inner.identity()
        }

        fn formatted_string(
            &self,
            value: &CellValue,
            column_type: &str,
            column_name: &str,
            format_override: Option<&CellFormat>,
        ) -> String {
            self.inner
                .formatted_string(value, column_type, column_name, format_override)
        }

        fn is_custom_column_format_defined(&self, column_name: &str, column_type: &str) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.inner.is_custom_column_format_defined(column_name, column_type)
        }
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("simple"), "\"simple\"");
        assert_eq!(csv_escape("with,comma"), "\"with,comma\"");
        assert_eq!(csv_escape("with\"quote"), "\"with\"\"quote\"");
        assert_eq!(csv_escape(""), "\"\"");
    }

    #[test]
    fn test_header_is_not_quoted() {
        assert_eq!(encode_header(&columns()), "Name,Price\n");
        assert_eq!(encode_header(&[]), "\n");
    }

    #[test]
    fn test_encode_applies_cell_format_override() {
        let mut encoder = RowEncoder::new(columns(), false);
        let formatter = PlainFormatter::new();

        assert_eq!(
            encoder.encode(&data(), &formatter),
            "\"say \"\"hi\"\"\",\"1.50\"\n\"\",\"2\"\n"
        );
    }

    #[test]
    fn test_column_format_suppresses_cell_override() {
        let mut encoder = RowEncoder::new(columns(), false);
        let formatter = PlainFormatter::new().with_column_format("Price", "0.000");

        let csv = encoder.encode(&data(), &formatter);
        assert!(csv.contains("\"1.500\""));
        assert!(csv.contains("\"2.000\""));
    }

    #[test]
    fn test_unformatted_values() {
        let columns = vec![Column::new("Price", "double"), Column::new("Timestamp", "DateTime")];
        let data = RowData::new(vec![SnapshotRow {
            key: 0,
            cells: vec![
                Cell::new(CellValue::Float(1.5)).with_format(CellFormat::with_format_string("0.00")),
                Cell::new(CellValue::DateTime(1_704_067_200_000_000_000)),
            ],
        }]);
        let mut encoder = RowEncoder::new(columns, true);

        let csv = encoder.encode(&data, &PlainFormatter::new());
        assert!(csv.starts_with("\"1.5\",\"2024-01-01T00:00:00.000000000 "));
        assert!(csv.ends_with("\"\n"));
    }

    #[test]
    fn test_format_flag_is_cached_per_column() {
        let formatter = CountingFormatter {
            inner: PlainFormatter::new(),
            checks: AtomicUsize::new(0),
        };
        let mut encoder = RowEncoder::new(columns(), false);

        encoder.encode(&data(), &formatter);
        encoder.encode(&data(), &formatter);
        assert_eq!(formatter.checks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_format_flag_cache_resets_on_new_formatter() {
        let mut cache = FormatFlagCache::default();
        let price = Column::new("Price", "double");

        let plain = PlainFormatter::new();
        assert!(!cache.has_custom_column_format(&plain, &price));

        let custom = PlainFormatter::new().with_column_format("Price", "0.0");
        assert!(cache.has_custom_column_format(&custom, &price));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_format_flag_cache_is_bounded() {
        let mut cache = FormatFlagCache::with_capacity(2);
        let formatter = PlainFormatter::new();
        for i in 0..5 {
            cache.has_custom_column_format(&formatter, &Column::new(format!("C{i}"), "int"));
            assert!(cache.len() <= 2);
        }
    }
}
