//! Table export pipeline
//!
//! An export turns one or more row ranges of a table into a CSV download:
//!
//! ```text
//! ranges ──► ChunkPlan ──► SnapshotFetcher ──► ReorderBuffer ──► RowEncoder ──► StreamSink
//!                          (window of N)       (sequence order)                 (piped | buffered)
//! ```
//!
//! The [`ExportController`] owns at most one running job. The job runs in a
//! single task that multiplexes its snapshot fetches, the sink's consumer
//! signals and cancellation, so no job state is ever shared.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{ConfigError, Result};
use crate::sink::SinkPreference;
use crate::source::{Column, RowRange};

pub mod clock;
pub mod controller;
pub mod encoder;
pub mod fetcher;
pub mod job;
pub mod plan;
pub mod progress;
pub mod reorder;
pub mod watchdog;


pub use clock::{Clock, SystemClock};
pub use controller::ExportController;
pub use encoder::RowEncoder;
pub use plan::{Chunk, ChunkPlan};
pub use progress::{Progress, ProgressTracker};
pub use reorder::ReorderBuffer;
pub use watchdog::{DEFAULT_STREAM_TIMEOUT, Watchdog};

/// Number of cells requested per snapshot
pub const DEFAULT_CHUNK_CELLS: usize = 6000;

/// Number of snapshots in flight or waiting to be written
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Identity of one export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a job ended without finishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel_export` was called
    UserCanceled,
    /// The download consumer stopped pulling data
    StalledConsumer,
    /// A snapshot (or the export handle) could not be fetched
    FetchFailed(String),
    /// The sink rejected a write or could not be completed
    SinkFailed(String),
    /// The download consumer went away
    TransportClosed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UserCanceled => write!(f, "canceled by user"),
            CancelReason::StalledConsumer => write!(f, "download stalled"),
            CancelReason::FetchFailed(msg) => write!(f, "fetch failed: {}", msg),
            CancelReason::SinkFailed(msg) => write!(f, "write failed: {}", msg),
            CancelReason::TransportClosed => write!(f, "download closed"),
        }
    }
}

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Canceled(CancelReason),
}

/// Download status visible to callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportStatus {
    #[default]
    Idle,
    /// Waiting for the source and the download consumer
    Initiating,
    Downloading,
    Finished,
    Canceled,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Finished | ExportStatus::Canceled)
    }

    pub fn is_running(self) -> bool {
        matches!(self, ExportStatus::Initiating | ExportStatus::Downloading)
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportStatus::Idle => "IDLE",
            ExportStatus::Initiating => "INITIATING",
            ExportStatus::Downloading => "DOWNLOADING",
            ExportStatus::Finished => "FINISHED",
            ExportStatus::Canceled => "CANCELED",
        };
        write!(f, "{}", s)
    }
}

/// Tunables of one export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Target number of cells per snapshot
    pub chunk_cells: usize,
    /// Maximum chunks in flight or buffered
    pub window_size: usize,
    /// Time without a pull request before the consumer counts as gone
    pub stream_timeout: Duration,
    pub include_column_headers: bool,
    /// Write raw values instead of formatted ones
    pub use_unformatted_values: bool,
    pub sink_preference: SinkPreference,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            chunk_cells: DEFAULT_CHUNK_CELLS,
            window_size: DEFAULT_WINDOW_SIZE,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            include_column_headers: true,
            use_unformatted_values: false,
            sink_preference: SinkPreference::Auto,
        }
    }
}

impl ExportOptions {
    /// Reject options that would stall the pipeline
    ///
    /// # Errors
    /// * `ConfigError::InvalidValue` - Zero chunk size, window or timeout
    pub fn validate(&self) -> Result<()> {
        if self.chunk_cells == 0 {
            return Err(invalid("chunk_cells", self.chunk_cells));
        }
        if self.window_size == 0 {
            return Err(invalid("window_size", self.window_size));
        }
        if self.stream_timeout.is_zero() {
            return Err(invalid("stream_timeout", format!("{:?}", self.stream_timeout)));
        }
        Ok(())
    }
}

fn invalid(field: &str, value: impl fmt::Display) -> crate::error::TableSaverError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// Everything needed to run one export
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub file_name: String,
    pub ranges: Vec<RowRange>,
    pub columns: Vec<Column>,
    pub options: ExportOptions,
}

impl ExportRequest {
    pub fn new(file_name: impl Into<String>, ranges: Vec<RowRange>, columns: Vec<Column>) -> Self {
        Self {
            file_name: file_name.into(),
            ranges,
            columns,
            options: ExportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }
}

/// Receives job progress and its single terminal notification
///
/// Callbacks run on the job task and should return quickly.
pub trait ExportListener: Send + Sync {
    /// Called after every chunk written to the sink
    fn on_progress(&self, percent: u32, eta_seconds: Option<u64>);

    fn on_finished(&self);

    fn on_canceled(&self, reason: &CancelReason);

    /// Called once the consumer is ready; `download` is the transport's
    /// location suffix for streamed downloads
    fn on_download_started(&self, _download: Option<&str>) {}
}

/// Listener that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ExportListener for NoopListener {
    fn on_progress(&self, _percent: u32, _eta_seconds: Option<u64>) {}

    fn on_finished(&self) {}

    fn on_canceled(&self, _reason: &CancelReason) {}
}
