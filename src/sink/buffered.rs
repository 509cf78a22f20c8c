//! In-memory fallback sink
//!
//! Used when no streaming transport is available. Every write is kept in
//! memory and the concatenated bytes are handed to an [`ArtifactSaver`] when
//! the sink is closed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ExportError, Result};

use super::{SinkKind, SinkSignal, StreamSink};

/// Persists a finished artifact
#[async_trait]
pub trait ArtifactSaver: Send + Sync {
    async fn save(&self, file_name: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Saves artifacts into a directory on disk
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    directory: PathBuf,
}

impl DirectorySaver {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl ArtifactSaver for DirectorySaver {
    async fn save(&self, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| ExportError::SinkFailed(format!("Invalid file name: {file_name}")))?;
        let path = self.directory.join(name);
        let size = bytes.len();
        tokio::fs::write(&path, bytes).await?;
        info!("Saved {} ({} bytes)", path.display(), size);
        Ok(())
    }
}

/// Keeps saved artifacts in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySaver {
    saved: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifacts saved so far, in save order
    pub fn saved(&self) -> Vec<(String, Vec<u8>)> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactSaver for MemorySaver {
    async fn save(&self, file_name: &str, bytes: Vec<u8>) -> Result<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|e| ExportError::SinkFailed(e.to_string()))?;
        saved.push((file_name.to_string(), bytes));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Aborted,
}

/// Sink that accumulates the whole output before saving it
pub struct BufferingSink {
    file_name: String,
    saver: Arc<dyn ArtifactSaver>,
    parts: Vec<Vec<u8>>,
    ready_sent: bool,
    state: State,
}

impl BufferingSink {
    pub fn new(file_name: impl Into<String>, saver: Arc<dyn ArtifactSaver>) -> Self {
        Self {
            file_name: file_name.into(),
            saver,
            parts: Vec::new(),
            ready_sent: false,
            state: State::Open,
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl StreamSink for BufferingSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Buffered
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state != State::Open {
            return Err(ExportError::SinkClosed.into());
        }
        self.parts.push(bytes.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.state != State::Open {
            return Err(ExportError::SinkClosed.into());
        }
        self.state = State::Closed;
        let bytes = std::mem::take(&mut self.parts).concat();
        debug!("Saving buffered export {} ({} bytes)", self.file_name, bytes.len());
        self.saver.save(&self.file_name, bytes).await
    }

    async fn abort(&mut self) -> Result<()> {
        if self.state == State::Open {
            self.state = State::Aborted;
            self.parts.clear();
        }
        Ok(())
    }

    async fn next_signal(&mut self) -> SinkSignal {
        if !self.ready_sent && self.state == State::Open {
            self.ready_sent = true;
            return SinkSignal::Ready { download: None };
        }
        std::future::pending().await
    }
}
