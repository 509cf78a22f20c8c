//! Cell formatting
//!
//! The export pipeline renders every cell through a [`Formatter`]. A
//! formatter may define custom formats for whole columns; when it does not,
//! the per-cell format carried by the snapshot is passed as an override.
//!
//! [`PlainFormatter`] is a small formatter understanding decimal patterns
//! (`0.00`, `#,##0.###` style precision) and strftime date patterns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::source::{CellFormat, CellValue};

/// Default pattern for date-time cells
pub const DEFAULT_DATE_TIME_PATTERN: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Identity of a formatter configuration
///
/// Two formatters with the same identity must produce the same output for
/// the same input. Caches keyed on formatter state use it for invalidation.
pub type FormatterId = u64;

static NEXT_FORMATTER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique formatter identity
pub fn next_formatter_id() -> FormatterId {
    NEXT_FORMATTER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Renders cell values as text
pub trait Formatter: Send + Sync {
    /// Identity of this formatter's configuration
    fn identity(&self) -> FormatterId;

    /// Render `value` for a column of `column_type` named `column_name`
    ///
    /// # Arguments
    /// * `format_override` - Cell-level format to use instead of the type default
    fn formatted_string(
        &self,
        value: &CellValue,
        column_type: &str,
        column_name: &str,
        format_override: Option<&CellFormat>,
    ) -> String;

    /// Whether a format is configured for the whole column
    ///
    /// When true, per-cell format overrides are ignored for that column.
    fn is_custom_column_format_defined(&self, column_name: &str, column_type: &str) -> bool;

    /// Time zone used to render date-time values
    fn time_zone(&self) -> FixedOffset {
        Utc.fix()
    }
}

/// Formatter with optional per-column patterns
#[derive(Debug, Clone)]
pub struct PlainFormatter {
    id: FormatterId,
    column_formats: HashMap<String, String>,
    time_zone: FixedOffset,
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainFormatter {
    pub fn new() -> Self {
        Self {
            id: next_formatter_id(),
            column_formats: HashMap::new(),
            time_zone: Utc.fix(),
        }
    }

    /// Define a pattern for every cell of `column_name`
    ///
    /// Changing the configuration produces a new identity.
    pub fn with_column_format(mut self, column_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.column_formats.insert(column_name.into(), pattern.into());
        self.id = next_formatter_id();
        self
    }

    pub fn with_time_zone(mut self, time_zone: FixedOffset) -> Self {
        self.time_zone = time_zone;
        self.id = next_formatter_id();
        self
    }

    fn format_with_pattern(&self, value: &CellValue, pattern: Option<&str>) -> String {
        match value {
            CellValue::Null => String::new(),
            CellValue::Bool(v) => v.to_string(),
            CellValue::Text(v) => v.clone(),
            CellValue::Int(v) => match pattern.and_then(decimal_precision) {
                Some(precision) => format!("{:.*}", precision, *v as f64),
                None => v.to_string(),
            },
            CellValue::Float(v) => match pattern.and_then(decimal_precision) {
                Some(precision) => format!("{:.*}", precision, v),
                None => v.to_string(),
            },
            CellValue::DateTime(nanos) => {
                let pattern = pattern.unwrap_or(DEFAULT_DATE_TIME_PATTERN);
                format_date_time(*nanos, self.time_zone, pattern)
            }
        }
    }
}

impl Formatter for PlainFormatter {
    fn identity(&self) -> FormatterId {
        self.id
    }

    fn formatted_string(
        &self,
        value: &CellValue,
        _column_type: &str,
        column_name: &str,
        format_override: Option<&CellFormat>,
    ) -> String {
        let pattern = self
            .column_formats
            .get(column_name)
            .map(String::as_str)
            .or_else(|| format_override.and_then(|f| f.format_string.as_deref()));
        self.format_with_pattern(value, pattern)
    }

    fn is_custom_column_format_defined(&self, column_name: &str, _column_type: &str) -> bool {
        self.column_formats.contains_key(column_name)
    }

    fn time_zone(&self) -> FixedOffset {
        self.time_zone
    }
}

/// Number of fraction digits requested by a decimal pattern such as `0.00`
///
/// Returns `None` for patterns that are not decimal patterns.
fn decimal_precision(pattern: &str) -> Option<usize> {
    if !pattern.chars().all(|c| matches!(c, '0' | '#' | ',' | '.')) {
        return None;
    }
    Some(
        pattern
            .split_once('.')
            .map(|(_, fraction)| fraction.chars().filter(|c| matches!(c, '0' | '#')).count())
            .unwrap_or(0),
    )
}

/// Render epoch nanoseconds in `time_zone` with a strftime pattern
pub fn format_date_time(nanos: i64, time_zone: FixedOffset, pattern: &str) -> String {
    let utc: DateTime<Utc> = DateTime::from_timestamp_nanos(nanos);
    utc.with_timezone(&time_zone).format(pattern).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_precision() {
        assert_eq!(decimal_precision("0.00"), Some(2));
        assert_eq!(decimal_precision("#,##0.###"), Some(3));
        assert_eq!(decimal_precision("0"), Some(0));
        assert_eq!(decimal_precision("%Y-%m-%d"), None);
    }

    #[test]
    fn test_override_applies_without_column_format() {
        let formatter = PlainFormatter::new();
        let override_format = CellFormat::with_format_string("0.00");
        assert_eq!(
            formatter.formatted_string(&CellValue::Float(1.5), "double", "Price", Some(&override_format)),
            "1.50"
        );
        assert_eq!(
            formatter.formatted_string(&CellValue::Float(1.5), "double", "Price", None),
            "1.5"
        );
    }

    #[test]
    fn test_column_format_wins_over_override() {
        let formatter = PlainFormatter::new().with_column_format("Price", "0.0");
        assert!(formatter.is_custom_column_format_defined("Price", "double"));
        assert!(!formatter.is_custom_column_format_defined("Qty", "int"));

        let override_format = CellFormat::with_format_string("0.000");
        assert_eq!(
            formatter.formatted_string(&CellValue::Float(2.26), "double", "Price", Some(&override_format)),
            "2.3"
        );
    }

    #[test]
    fn test_configuration_changes_identity() {
        let formatter = PlainFormatter::new();
        let id = formatter.identity();
        let formatter = formatter.with_column_format("A", "0");
        assert_ne!(formatter.identity(), id);
    }

    #[test]
    fn test_date_time_in_time_zone() {
        let formatter = PlainFormatter::new()
            .with_time_zone(FixedOffset::east_opt(3600).unwrap());
        // 2024-01-01T00:00:00Z
        let value = CellValue::DateTime(1_704_067_200_000_000_000);
        assert_eq!(
            formatter.formatted_string(&value, "DateTime", "Timestamp", None),
            "2024-01-01 01:00:00.000"
        );
    }

    #[test]
    fn test_null_renders_empty() {
        let formatter = PlainFormatter::new();
        assert_eq!(formatter.formatted_string(&CellValue::Null, "int", "A", None), "");
    }
}
