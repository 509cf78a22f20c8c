//! File-backed transport consumer
//!
//! Runs the consumer side of a transport in a background task that streams
//! posted chunks into a file inside an output directory. The consumer asks
//! for more data after every chunk it has written, which keeps the job's
//! watchdog alive for as long as the disk keeps up.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, TableSaverError, TransportError};

use super::{TransportEndpoint, TransportHandle, TransportMessage, TransportProvider};

/// Buffer size for the download file
const WRITE_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Transport that saves downloads into a directory
#[derive(Debug, Clone)]
pub struct FileTransport {
    directory: PathBuf,
    consumers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FileTransport {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            consumers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Wait until every consumer started so far has flushed or removed its file
    pub async fn wait_idle(&self) {
        let consumers = match self.consumers.lock() {
            Ok(mut consumers) => std::mem::take(&mut *consumers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for consumer in futures::future::join_all(consumers).await {
            if let Err(e) = consumer {
                warn!("Download consumer ended abnormally: {}", e);
            }
        }
    }
}

#[async_trait]
impl TransportProvider for FileTransport {
    async fn transport_handle(&self) -> Result<TransportHandle> {
        if !self.directory.is_dir() {
            return Err(TransportError::Unavailable(format!(
                "Directory does not exist: {}",
                self.directory.display()
            ))
            .into());
        }

        let (handle, endpoint) = TransportHandle::channel();
        let directory = self.directory.clone();
        let consumer = tokio::spawn(async move {
            if let Err(e) = run_consumer(endpoint, directory).await {
                warn!("Download transport stopped: {}", e);
            }
        });
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.retain(|c| !c.is_finished());
            consumers.push(consumer);
        }
        Ok(handle)
    }
}

/// Resolve the target path for an encoded download name
///
/// Only the final path component of the decoded name is used.
pub(crate) fn download_path(directory: &Path, encoded_file_name: &str) -> Result<PathBuf> {
    let decoded = urlencoding::decode(encoded_file_name)
        .map_err(|e| TableSaverError::Generic(format!("Invalid file name encoding: {e}")))?;
    let file_name = Path::new(decoded.as_ref())
        .file_name()
        .ok_or_else(|| TableSaverError::Generic(format!("Invalid file name: {decoded}")))?;
    Ok(directory.join(file_name))
}

async fn run_consumer(mut endpoint: TransportEndpoint, directory: PathBuf) -> Result<()> {
    let encoded_file_name = loop {
        match endpoint.recv().await {
            Some(TransportMessage::Start { encoded_file_name }) => break encoded_file_name,
            Some(other) => debug!("Ignoring {:?} before download start", other),
            None => return Ok(()),
        }
    };

    let path = download_path(&directory, &encoded_file_name)?;
    let file = File::create(&path).await?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    let mut written = 0u64;

    endpoint.download_ready(format!("{}/{}", Uuid::new_v4(), encoded_file_name))?;
    endpoint.pulling()?;

    loop {
        match endpoint.recv().await {
            Some(TransportMessage::Chunk(bytes)) => {
                writer.write_all(&bytes).await?;
                written += bytes.len() as u64;
                // The job may already be gone; the next recv tells us
                let _ = endpoint.pulling();
            }
            Some(TransportMessage::End) => {
                writer.flush().await?;
                info!("Saved {} ({} bytes)", path.display(), written);
                return Ok(());
            }
            Some(TransportMessage::Start { .. }) => {
                debug!("Ignoring duplicate download start");
            }
            Some(TransportMessage::Cancel) | None => {
                drop(writer);
                tokio::fs::remove_file(&path).await.ok();
                info!("Download of {} canceled", path.display());
                return Ok(());
            }
        }
    }
}
