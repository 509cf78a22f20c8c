//! Export lifecycle controller
//!
//! The controller accepts export requests, runs at most one job at a time
//! and lets the caller cancel it. Each job gets a fresh [`JobId`] and its own
//! cancellation token, so a late cancel can never reach a newer job.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::formatter::Formatter;
use crate::sink::ArtifactSaver;
use crate::source::TableSource;
use crate::transport::TransportProvider;

use super::clock::Clock;
use super::job::{ExportJob, JobContext};
use super::{CancelReason, ExportListener, ExportRequest, ExportStatus, JobId, JobOutcome};

type OutcomeFuture = Shared<BoxFuture<'static, JobOutcome>>;

struct RunningJob {
    id: JobId,
    token: CancellationToken,
    status: watch::Receiver<ExportStatus>,
    outcome: OutcomeFuture,
}

/// Starts, tracks and cancels export jobs
pub struct ExportController {
    context: JobContext,
    current: Mutex<Option<RunningJob>>,
}

impl ExportController {
    /// Create a controller
    ///
    /// # Arguments
    /// * `source` - Table the exports read from
    /// * `transport` - Streaming download transport lookup
    /// * `saver` - Destination of buffered exports
    /// * `formatter` - Cell formatting rules
    /// * `clock` - Time source for progress and the watchdog
    /// * `listener` - Receives progress and terminal notifications
    pub fn new(
        source: Arc<dyn TableSource>,
        transport: Arc<dyn TransportProvider>,
        saver: Arc<dyn ArtifactSaver>,
        formatter: Arc<dyn Formatter>,
        clock: Arc<dyn Clock>,
        listener: Arc<dyn ExportListener>,
    ) -> Self {
        Self {
            context: JobContext {
                source,
                transport,
                saver,
                formatter,
                clock,
                listener,
            },
            current: Mutex::new(None),
        }
    }

    /// Start an export
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Returns
    /// * `Ok(true)` - The job was started
    /// * `Ok(false)` - Another export is still running; nothing was started
    ///
    /// # Errors
    /// Returns an error when the request cannot be planned (no columns, an
    /// inverted range or unusable options).
    pub fn start_export(&self, request: ExportRequest) -> Result<bool> {
        let mut current = self.lock();
        if let Some(job) = current.as_ref() {
            if job.status.borrow().is_running() {
                info!("Export {} is already running", job.id);
                return Ok(false);
            }
        }

        let id = JobId::new();
        let job = ExportJob::new(id, request)?;
        let token = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(ExportStatus::Initiating);

        let task = tokio::spawn(job.run(self.context.clone(), token.clone(), status_tx));
        let outcome = task
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Export task ended abnormally: {}", e);
                    JobOutcome::Canceled(CancelReason::SinkFailed(e.to_string()))
                }
            })
            .boxed()
            .shared();

        debug!("Started export {}", id);
        *current = Some(RunningJob {
            id,
            token,
            status: status_rx,
            outcome,
        });
        Ok(true)
    }

    /// Cancel the running export
    ///
    /// Has no effect when nothing is running or the job already ended.
    pub fn cancel_export(&self) {
        let current = self.lock();
        match current.as_ref() {
            Some(job) if job.status.borrow().is_running() => {
                if !job.token.is_cancelled() {
                    info!("Canceling export {}", job.id);
                    job.token.cancel();
                }
            }
            _ => debug!("No running export to cancel"),
        }
    }

    /// Status of the most recent export
    pub fn status(&self) -> ExportStatus {
        self.lock()
            .as_ref()
            .map(|job| *job.status.borrow())
            .unwrap_or_default()
    }

    /// Id of the most recent export
    pub fn current_job(&self) -> Option<JobId> {
        self.lock().as_ref().map(|job| job.id)
    }

    /// Wait for the most recent export to end
    ///
    /// # Returns
    /// * `Option<JobOutcome>` - `None` when no export was ever started
    pub async fn wait(&self) -> Option<JobOutcome> {
        let outcome = self.lock().as_ref().map(|job| job.outcome.clone())?;
        Some(outcome.await)
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningJob>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ExportController {
    fn drop(&mut self) {
        let current = self.lock();
        if let Some(job) = current.as_ref() {
            if job.status.borrow().is_running() {
                debug!("Controller dropped, canceling export {}", job.id);
                job.token.cancel();
            }
        }
    }
}
