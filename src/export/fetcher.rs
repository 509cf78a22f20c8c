//! Snapshot fetching
//!
//! Each chunk is fetched by exactly one snapshot request on the job's table
//! handle. The request is wrapped in an abortable future so the job can
//! cancel it; a cancelled fetch may still complete on the wire, but its
//! result never reaches the job.

use futures::FutureExt;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use tracing::debug;

use crate::error::Result;
use crate::source::{Column, RowData, TableHandle};

use super::JobId;
use super::plan::Chunk;

/// Outcome of one chunk fetch, tagged with the job that issued it
#[derive(Debug)]
pub struct FetchCompletion {
    pub job_id: JobId,
    pub sequence_index: usize,
    pub result: Result<RowData>,
}

/// Cancel handle for an outstanding fetch
#[derive(Debug, Clone)]
pub struct FetchHandle {
    sequence_index: usize,
    abort: AbortHandle,
}

impl FetchHandle {
    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    /// Prevent the fetch result from being delivered
    ///
    /// Calling this more than once, or after completion, has no effect.
    pub fn cancel(&self) {
        if !self.abort.is_aborted() {
            debug!("Snapshot {} has been canceled", self.sequence_index);
            self.abort.abort();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// Future resolving to `Some(completion)`, or `None` once canceled
pub type FetchFuture = BoxFuture<'static, Option<FetchCompletion>>;

/// Issues one snapshot request per chunk
///
/// The fetcher keeps no per-call state; limiting the number of outstanding
/// fetches is the caller's job.
pub struct SnapshotFetcher<'a> {
    job_id: JobId,
    handle: &'a dyn TableHandle,
    columns: &'a [Column],
}

impl<'a> SnapshotFetcher<'a> {
    pub fn new(job_id: JobId, handle: &'a dyn TableHandle, columns: &'a [Column]) -> Self {
        Self {
            job_id,
            handle,
            columns,
        }
    }

    /// Start fetching `chunk`
    ///
    /// # Returns
    /// * `(FetchHandle, FetchFuture)` - Cancel handle and the future to poll
    pub fn fetch(&self, chunk: &Chunk) -> (FetchHandle, FetchFuture) {
        let job_id = self.job_id;
        let sequence_index = chunk.sequence_index;
        debug!(
            "Requesting snapshot {} for rows {}",
            sequence_index,
            chunk.rows()
        );

        let request = self.handle.snapshot(chunk.rows(), self.columns);
        let (abort, registration) = AbortHandle::new_pair();
        let future = Abortable::new(request, registration)
            .map(move |outcome| {
                outcome.ok().map(|result| FetchCompletion {
                    job_id,
                    sequence_index,
                    result,
                })
            })
            .boxed();

        (
            FetchHandle {
                sequence_index,
                abort,
            },
            future,
        )
    }
}
