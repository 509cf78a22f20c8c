//! Error handling module for table exports.
//!
//! All fallible operations in the crate return [`Result`], whose error type
//! [`TableSaverError`] wraps the more specific kinds below. Export failures
//! that happen while a job is running are not returned to the caller; they
//! are turned into a [`crate::export::CancelReason`] and reported through the
//! job listener instead.
//!
//! # Example
//!
//! ```rust
//! use tablesaver::error::{ExportError, Result};
//!
//! fn check_columns(count: usize) -> Result<()> {
//!     if count == 0 {
//!         return Err(ExportError::NoColumns.into());
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_columns(0).is_err());
//! ```

pub mod kinds;

// Re-export commonly used types
pub use kinds::{ConfigError, ExportError, Result, TableSaverError, TransportError};
