//! Table Saver Library
//!
//! Exports very large, windowed tables into a single CSV download. Row
//! ranges are split into chunks, fetched concurrently as snapshots within a
//! bounded window, reassembled in order, encoded and streamed to a
//! background download transport (or buffered in memory when no transport
//! is available).
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `export`: Export pipeline and job lifecycle
//! - `formatter`: Cell value formatting
//! - `selection`: Row selection and default file names
//! - `sink`: Streaming and buffering output sinks
//! - `source`: Table snapshot source abstraction
//! - `transport`: Background download transport
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablesaver::export::{ExportController, ExportRequest, NoopListener, SystemClock};
//! use tablesaver::formatter::PlainFormatter;
//! use tablesaver::selection::RowSelection;
//! use tablesaver::sink::DirectorySaver;
//! use tablesaver::source::SyntheticTable;
//! use tablesaver::transport::FileTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let table = SyntheticTable::demo(10_000);
//!     let request = ExportRequest::new(
//!         "demo.csv",
//!         RowSelection::First(1_000).to_ranges(table.row_count()),
//!         table.columns().to_vec(),
//!     );
//!
//!     let controller = ExportController::new(
//!         Arc::new(table),
//!         Arc::new(FileTransport::new("./downloads")),
//!         Arc::new(DirectorySaver::new("./downloads")),
//!         Arc::new(PlainFormatter::new()),
//!         Arc::new(SystemClock),
//!         Arc::new(NoopListener),
//!     );
//!
//!     controller.start_export(request)?;
//!     println!("{:?}", controller.wait().await);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod formatter;
pub mod selection;
pub mod sink;
pub mod source;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, TableSaverError};
pub use export::{ExportController, ExportListener, ExportOptions, ExportRequest, ExportStatus};
pub use formatter::Formatter;
pub use selection::RowSelection;
pub use sink::StreamSink;
pub use source::{TableHandle, TableSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
