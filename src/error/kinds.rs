use std::{fmt, io};

/// Crate-wide `Result` type using [`TableSaverError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, TableSaverError>;

/// Top-level error type for table export operations.
#[derive(Debug)]
pub enum TableSaverError {
    /// Export pipeline errors.
    Export(ExportError),

    /// Background transport errors.
    Transport(TransportError),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Errors raised while planning or running an export job.
#[derive(Debug)]
pub enum ExportError {
    /// A row range ends before it starts.
    InvalidRange { start_row: u64, end_row: u64 },

    /// The export was requested without any column.
    NoColumns,

    /// A chunk snapshot could not be fetched from the source.
    FetchFailed { sequence_index: usize, message: String },

    /// The export ended without finishing.
    Canceled(String),

    /// Writing to the output sink failed.
    SinkFailed(String),

    /// A write was attempted after the sink was closed or aborted.
    SinkClosed,
}

/// Errors raised by the background transport.
#[derive(Debug)]
pub enum TransportError {
    /// No streaming transport is available on this platform.
    Unavailable(String),

    /// The transport consumer went away.
    Disconnected,

    /// A message could not be delivered to the transport.
    SendFailed(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for TableSaverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSaverError::Export(e) => write!(f, "Export error: {e}"),
            TableSaverError::Transport(e) => write!(f, "Transport error: {e}"),
            TableSaverError::Config(e) => write!(f, "Configuration error: {e}"),
            TableSaverError::Io(e) => write!(f, "I/O error: {e}"),
            TableSaverError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::InvalidRange { start_row, end_row } => {
                write!(f, "Invalid row range {start_row}-{end_row}")
            }
            ExportError::NoColumns => write!(f, "No columns selected for export"),
            ExportError::FetchFailed {
                sequence_index,
                message,
            } => write!(f, "Snapshot {sequence_index} failed: {message}"),
            ExportError::Canceled(msg) => write!(f, "Export canceled: {msg}"),
            ExportError::SinkFailed(msg) => write!(f, "Sink write failed: {msg}"),
            ExportError::SinkClosed => write!(f, "Sink already closed"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unavailable(msg) => write!(f, "Transport unavailable: {msg}"),
            TransportError::Disconnected => write!(f, "Transport disconnected"),
            TransportError::SendFailed(msg) => write!(f, "Failed to post message: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for TableSaverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TableSaverError::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl std::error::Error for ExportError {}
impl std::error::Error for TransportError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to TableSaverError ========================= */

impl From<io::Error> for TableSaverError {
    fn from(err: io::Error) -> Self {
        TableSaverError::Io(err)
    }
}

impl From<ExportError> for TableSaverError {
    fn from(err: ExportError) -> Self {
        TableSaverError::Export(err)
    }
}

impl From<TransportError> for TableSaverError {
    fn from(err: TransportError) -> Self {
        TableSaverError::Transport(err)
    }
}

impl From<ConfigError> for TableSaverError {
    fn from(err: ConfigError) -> Self {
        TableSaverError::Config(err)
    }
}

impl From<toml::de::Error> for TableSaverError {
    fn from(err: toml::de::Error) -> Self {
        TableSaverError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

impl From<String> for TableSaverError {
    fn from(msg: String) -> Self {
        TableSaverError::Generic(msg)
    }
}

impl From<&str> for TableSaverError {
    fn from(msg: &str) -> Self {
        TableSaverError::Generic(msg.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested_errors() {
        let err: TableSaverError = ExportError::FetchFailed {
            sequence_index: 3,
            message: "timeout".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Export error: Snapshot 3 failed: timeout");

        let err: TableSaverError = TransportError::Disconnected.into();
        assert_eq!(err.to_string(), "Transport error: Transport disconnected");
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("window = [");
        let err: TableSaverError = parsed.unwrap_err().into();
        assert!(matches!(
            err,
            TableSaverError::Config(ConfigError::InvalidFormat(_))
        ));
    }
}
