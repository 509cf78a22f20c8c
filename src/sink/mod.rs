//! Output sinks for export jobs
//!
//! A sink receives the encoded CSV bytes in their final order. Two
//! implementations exist:
//!
//! - [`PipedSink`] streams every write to a background transport and watches
//!   the consumer's liveness signals;
//! - [`BufferingSink`] accumulates everything in memory and saves one
//!   artifact on close. It is used when no transport is available.
//!
//! Both produce identical bytes for identical input.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::export::clock::Clock;
use crate::transport::{TransportProvider, encode_file_name};

pub mod buffered;
pub mod piped;

pub use buffered::{ArtifactSaver, BufferingSink, DirectorySaver, MemorySaver};
pub use piped::PipedSink;

/// Signal from the sink to the job driving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSignal {
    /// The consumer is ready for data
    Ready { download: Option<String> },
    /// The consumer stopped asking for data in time
    Stalled,
    /// The consumer went away
    Disconnected,
}

/// Which sink implementation is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Piped,
    Buffered,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Piped => write!(f, "piped"),
            SinkKind::Buffered => write!(f, "buffered"),
        }
    }
}

/// How the job should pick its sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkPreference {
    /// Stream through the transport when one is available
    #[default]
    Auto,
    /// Always buffer in memory (platforms without streaming support)
    Buffered,
}

/// Destination of the encoded export bytes
#[async_trait]
pub trait StreamSink: Send {
    fn kind(&self) -> SinkKind;

    /// Append bytes to the output
    ///
    /// # Errors
    /// * `ExportError::SinkClosed` - The sink was already closed or aborted
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Complete the output
    async fn close(&mut self) -> Result<()>;

    /// Discard the output
    async fn abort(&mut self) -> Result<()>;

    /// Wait for the next signal from the consumer
    ///
    /// Pends forever when the consumer has nothing more to say.
    async fn next_signal(&mut self) -> SinkSignal;
}

/// Everything needed to open a sink for one export
pub struct SinkOptions {
    pub file_name: String,
    pub preference: SinkPreference,
    pub stream_timeout: Duration,
}

/// Open the sink for an export
///
/// Falls back to a [`BufferingSink`] when buffering is preferred or when the
/// transport cannot be reached.
pub async fn open_sink(
    options: &SinkOptions,
    transport: &dyn TransportProvider,
    saver: Arc<dyn ArtifactSaver>,
    clock: Arc<dyn Clock>,
) -> Box<dyn StreamSink> {
    if options.preference == SinkPreference::Buffered {
        info!("Streaming disabled, buffering {} in memory", options.file_name);
        return Box::new(BufferingSink::new(options.file_name.clone(), saver));
    }

    let handle = match transport.transport_handle().await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Download is not optimized, buffering in memory: {}", e);
            return Box::new(BufferingSink::new(options.file_name.clone(), saver));
        }
    };

    match PipedSink::open(
        handle,
        &encode_file_name(&options.file_name),
        options.stream_timeout,
        clock,
    ) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("Download is not optimized, buffering in memory: {}", e);
            Box::new(BufferingSink::new(options.file_name.clone(), saver))
        }
    }
}
