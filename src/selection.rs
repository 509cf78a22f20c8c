//! Row selection and default download names

use chrono::{DateTime, Local};

use crate::source::RowRange;

/// Which rows of a table to export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSelection {
    All,
    /// Explicit ranges, for example the rows selected in a grid
    Selected(Vec<RowRange>),
    First(u64),
    Last(u64),
}

impl RowSelection {
    /// Resolve the selection against a table of `row_count` rows
    ///
    /// Selected ranges are sorted by start row and clipped to the table;
    /// ranges entirely outside the table are dropped. An empty table
    /// resolves to no range at all.
    pub fn to_ranges(&self, row_count: u64) -> Vec<RowRange> {
        if row_count == 0 {
            return Vec::new();
        }
        let last_row = row_count - 1;

        match self {
            RowSelection::All => vec![RowRange::new(0, last_row)],
            RowSelection::First(0) | RowSelection::Last(0) => Vec::new(),
            RowSelection::First(n) => vec![RowRange::new(0, (*n - 1).min(last_row))],
            RowSelection::Last(n) => {
                vec![RowRange::new(row_count.saturating_sub(*n), last_row)]
            }
            RowSelection::Selected(ranges) => {
                let mut ranges: Vec<RowRange> = ranges
                    .iter()
                    .filter(|r| r.start_row <= last_row)
                    .map(|r| RowRange::new(r.start_row, r.end_row.min(last_row)))
                    .collect();
                ranges.sort_by_key(|r| r.start_row);
                ranges
            }
        }
    }
}

/// Default download name: `{table}-{yyyy-MM-dd-HHmmss}.csv`
pub fn default_file_name(table_name: &str) -> String {
    file_name_at(table_name, Local::now())
}

fn file_name_at(table_name: &str, at: DateTime<Local>) -> String {
    format!("{}-{}.csv", table_name, at.format("%Y-%m-%d-%H%M%S"))
}

/// Parse `A-B` (inclusive) or a single row number `A`
pub fn parse_row_range(text: &str) -> Option<RowRange> {
    let text = text.trim();
    let (start, end) = match text.split_once('-') {
        Some((start, end)) => (start.trim().parse().ok()?, end.trim().parse().ok()?),
        None => {
            let row = text.parse().ok()?;
            (row, row)
        }
    };
    (start <= end).then(|| RowRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_all_and_edges() {
        assert_eq!(RowSelection::All.to_ranges(10), vec![RowRange::new(0, 9)]);
        assert!(RowSelection::All.to_ranges(0).is_empty());
        assert!(RowSelection::First(0).to_ranges(10).is_empty());
    }

    #[test]
    fn test_first_and_last_are_clamped() {
        assert_eq!(RowSelection::First(3).to_ranges(10), vec![RowRange::new(0, 2)]);
        assert_eq!(RowSelection::First(30).to_ranges(10), vec![RowRange::new(0, 9)]);
        assert_eq!(RowSelection::Last(3).to_ranges(10), vec![RowRange::new(7, 9)]);
        assert_eq!(RowSelection::Last(30).to_ranges(10), vec![RowRange::new(0, 9)]);
    }

    #[test]
    fn test_selected_ranges_are_sorted_and_clipped() {
        let selection = RowSelection::Selected(vec![
            RowRange::new(50, 60),
            RowRange::new(5, 9),
            RowRange::new(200, 300),
        ]);
        assert_eq!(
            selection.to_ranges(55),
            vec![RowRange::new(5, 9), RowRange::new(50, 54)]
        );
    }

    #[test]
    fn test_file_name_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(file_name_at("prices", at), "prices-2024-03-07-090502.csv");
        assert!(default_file_name("t").starts_with("t-"));
    }

    #[test]
    fn test_parse_row_range() {
        assert_eq!(parse_row_range("10-20"), Some(RowRange::new(10, 20)));
        assert_eq!(parse_row_range(" 7 "), Some(RowRange::new(7, 7)));
        assert_eq!(parse_row_range("20-10"), None);
        assert_eq!(parse_row_range("a-b"), None);
    }
}
