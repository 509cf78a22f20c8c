//! Export job execution
//!
//! A job runs in one task from start to its terminal state. Snapshot fetches
//! are polled from a `FuturesUnordered` in the same task, so the reorder
//! buffer, the encoder and the sink are only ever touched here.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use futures::stream::FuturesUnordered;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExportError, Result};
use crate::formatter::Formatter;
use crate::sink::{ArtifactSaver, SinkOptions, SinkSignal, StreamSink, open_sink};
use crate::source::{Column, RowRange, TableHandle, TableSource};
use crate::transport::TransportProvider;

use super::clock::Clock;
use super::encoder::RowEncoder;
use super::fetcher::{FetchCompletion, FetchFuture, FetchHandle, SnapshotFetcher};
use super::plan::{ChunkPlan, chunk_rows};
use super::progress::ProgressTracker;
use super::reorder::ReorderBuffer;
use super::{CancelReason, ExportListener, ExportOptions, ExportRequest, ExportStatus, JobId, JobOutcome};

/// Collaborators shared by every job of a controller
#[derive(Clone)]
pub struct JobContext {
    pub source: Arc<dyn TableSource>,
    pub transport: Arc<dyn TransportProvider>,
    pub saver: Arc<dyn ArtifactSaver>,
    pub formatter: Arc<dyn Formatter>,
    pub clock: Arc<dyn Clock>,
    pub listener: Arc<dyn ExportListener>,
}

/// Outstanding snapshot fetches of a job
#[derive(Default)]
struct InFlight {
    handles: HashMap<usize, FetchHandle>,
    futures: FuturesUnordered<FetchFuture>,
}

impl InFlight {
    fn push(&mut self, handle: FetchHandle, future: FetchFuture) {
        self.handles.insert(handle.sequence_index(), handle);
        self.futures.push(future);
    }

    fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel();
        }
        self.futures.clear();
    }
}

/// Lifecycle of a job
///
/// The table handle and the sink only exist in the states that use them, so
/// leaving `Running` or `Finishing` hands them to exactly one teardown.
enum JobState {
    Idle,
    Running {
        handle: Box<dyn TableHandle>,
        sink: Box<dyn StreamSink>,
    },
    /// Every chunk is written; the sink is being closed
    Finishing {
        handle: Box<dyn TableHandle>,
        sink: Box<dyn StreamSink>,
    },
    Canceled(CancelReason),
    Finished,
}

impl JobState {
    fn name(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running { .. } => "running",
            JobState::Finishing { .. } => "finishing",
            JobState::Canceled(_) => "canceled",
            JobState::Finished => "finished",
        }
    }
}

/// One export, from plan to terminal state
#[derive(Debug)]
pub struct ExportJob {
    id: JobId,
    file_name: String,
    columns: Vec<Column>,
    options: ExportOptions,
    plan: ChunkPlan,
}

impl ExportJob {
    /// Plan a job for `request`
    ///
    /// # Errors
    /// * `ExportError::NoColumns` - No column requested
    /// * `ExportError::InvalidRange` - A range ends before it starts
    /// * `ConfigError::InvalidValue` - Unusable options
    pub fn new(id: JobId, request: ExportRequest) -> Result<Self> {
        request.options.validate()?;
        if request.columns.is_empty() {
            return Err(ExportError::NoColumns.into());
        }

        let rows_per_chunk = chunk_rows(request.options.chunk_cells, request.columns.len());
        let plan = ChunkPlan::new(&request.ranges, rows_per_chunk)?;

        Ok(Self {
            id,
            file_name: request.file_name,
            columns: request.columns,
            options: request.options,
            plan,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn ranges(&self) -> &[RowRange] {
        self.plan.ranges()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn chunk_rows(&self) -> u64 {
        self.plan.chunk_rows()
    }

    pub fn window_size(&self) -> usize {
        self.options.window_size
    }

    /// Whether a completion was issued by this job
    pub fn owns(&self, completion: &FetchCompletion) -> bool {
        completion.job_id == self.id
    }

    /// Run the job to its terminal state
    ///
    /// Fires exactly one of `on_finished` / `on_canceled` on the listener
    /// and closes the table handle exactly once when it was opened. A panic
    /// while streaming tears the job down like any other failure.
    pub async fn run(
        self,
        context: JobContext,
        token: CancellationToken,
        status: watch::Sender<ExportStatus>,
    ) -> JobOutcome {
        let mut state = JobState::Idle;
        loop {
            debug!("Export {} is {}", self.id, state.name());
            state = match state {
                JobState::Idle => self.start(&context, &token, &status).await,
                JobState::Running { handle, mut sink } => {
                    let mut in_flight = InFlight::default();
                    let streamed = AssertUnwindSafe(self.stream(
                        handle.as_ref(),
                        sink.as_mut(),
                        &mut in_flight,
                        &context,
                        &token,
                        &status,
                    ))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        error!("Export {} panicked: {}", self.id, message);
                        Err(CancelReason::SinkFailed(format!("export panicked: {}", message)))
                    });

                    match streamed {
                        Ok(()) => JobState::Finishing { handle, sink },
                        Err(reason) => {
                            in_flight.cancel_all();
                            self.tear_down(handle, sink, &reason).await;
                            JobState::Canceled(reason)
                        }
                    }
                }
                JobState::Finishing { handle, mut sink } => match sink.close().await {
                    Ok(()) => {
                        close_handle(handle).await;
                        JobState::Finished
                    }
                    Err(e) => {
                        error!("Unable to complete {}: {}", self.file_name, e);
                        let reason = CancelReason::SinkFailed(e.to_string());
                        self.tear_down(handle, sink, &reason).await;
                        JobState::Canceled(reason)
                    }
                },
                JobState::Canceled(reason) => return self.cancel(reason, &context, &status),
                JobState::Finished => return self.finish(&context, &status),
            };
        }
    }

    /// Open the table handle and the sink
    async fn start(
        &self,
        context: &JobContext,
        token: &CancellationToken,
        status: &watch::Sender<ExportStatus>,
    ) -> JobState {
        status.send_replace(ExportStatus::Initiating);
        info!(
            "Export {} of {} rows in {} chunks to {}",
            self.id,
            self.plan.total_rows(),
            self.plan.total_chunks(),
            self.file_name
        );

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = context.source.open_export_handle(&self.columns) => Some(opened),
        };
        let handle = match opened {
            Some(Ok(handle)) => handle,
            Some(Err(e)) => {
                error!("Unable to open table for export: {}", e);
                return JobState::Canceled(CancelReason::FetchFailed(e.to_string()));
            }
            None => return JobState::Canceled(CancelReason::UserCanceled),
        };

        let sink_options = SinkOptions {
            file_name: self.file_name.clone(),
            preference: self.options.sink_preference,
            stream_timeout: self.options.stream_timeout,
        };
        let sink = open_sink(
            &sink_options,
            context.transport.as_ref(),
            context.saver.clone(),
            context.clock.clone(),
        )
        .await;
        debug!("Export {} writes to a {} sink", self.id, sink.kind());

        JobState::Running { handle, sink }
    }

    /// Abort the sink and close the table handle
    async fn tear_down(
        &self,
        handle: Box<dyn TableHandle>,
        mut sink: Box<dyn StreamSink>,
        reason: &CancelReason,
    ) {
        if let Err(e) = sink.abort().await {
            warn!("Unable to abort {}: {}", self.file_name, e);
        }
        close_handle(handle).await;
        debug!("Export {} torn down: {}", self.id, reason);
    }

    /// Wait for the consumer, then fetch, reorder, encode and write every chunk
    async fn stream(
        &self,
        handle: &dyn TableHandle,
        sink: &mut dyn StreamSink,
        in_flight: &mut InFlight,
        context: &JobContext,
        token: &CancellationToken,
        status: &watch::Sender<ExportStatus>,
    ) -> std::result::Result<(), CancelReason> {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CancelReason::UserCanceled),
                signal = sink.next_signal() => match signal {
                    SinkSignal::Ready { download } => {
                        if let Some(download) = &download {
                            info!("Download available at {}", download);
                        }
                        context.listener.on_download_started(download.as_deref());
                        break;
                    }
                    other => return Err(signal_reason(other)),
                },
            }
        }
        status.send_replace(ExportStatus::Downloading);

        let mut encoder = RowEncoder::new(self.columns.clone(), self.options.use_unformatted_values);
        if self.options.include_column_headers {
            write_to(sink, encoder.header().as_bytes()).await?;
        }

        let total_chunks = self.plan.total_chunks();
        let mut reorder = ReorderBuffer::new(total_chunks, self.options.window_size);
        let mut progress = ProgressTracker::new(total_chunks, context.clock.now());

        if total_chunks == 0 {
            let p = progress.update(0, context.clock.now());
            context.listener.on_progress(p.percent, p.eta_seconds);
            return Ok(());
        }

        let fetcher = SnapshotFetcher::new(self.id, handle, &self.columns);
        self.schedule(&fetcher, &mut reorder, in_flight);

        while !reorder.is_complete() {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CancelReason::UserCanceled),
                signal = sink.next_signal() => match signal {
                    SinkSignal::Ready { .. } => debug!("Consumer ready"),
                    other => return Err(signal_reason(other)),
                },
                next = in_flight.futures.next(), if !in_flight.futures.is_empty() => {
                    let Some(Some(completion)) = next else {
                        continue;
                    };
                    if !self.owns(&completion) {
                        debug!(
                            "Discarding snapshot {} of another job",
                            completion.sequence_index
                        );
                        continue;
                    }
                    in_flight.handles.remove(&completion.sequence_index);

                    let data = completion.result.map_err(|e| {
                        let failure = ExportError::FetchFailed {
                            sequence_index: completion.sequence_index,
                            message: e.to_string(),
                        };
                        error!("{}", failure);
                        CancelReason::FetchFailed(failure.to_string())
                    })?;

                    for (sequence_index, data) in
                        reorder.on_fetch_completed(completion.sequence_index, data)
                    {
                        let text = encoder.encode(&data, context.formatter.as_ref());
                        write_to(sink, text.as_bytes()).await?;
                        let p = progress.update(sequence_index + 1, context.clock.now());
                        context.listener.on_progress(p.percent, p.eta_seconds);
                    }

                    self.schedule(&fetcher, &mut reorder, in_flight);
                }
            }
        }

        info!("Export {} wrote all {} chunks", self.id, total_chunks);
        Ok(())
    }

    /// Start as many fetches as the window allows
    fn schedule(
        &self,
        fetcher: &SnapshotFetcher<'_>,
        reorder: &mut ReorderBuffer,
        in_flight: &mut InFlight,
    ) {
        for _ in 0..reorder.refill_count() {
            let Some(sequence_index) = reorder.on_fetch_started() else {
                break;
            };
            let Some(chunk) = self.plan.chunk(sequence_index) else {
                break;
            };
            let (handle, future) = fetcher.fetch(&chunk);
            in_flight.push(handle, future);
        }
    }

    fn finish(self, context: &JobContext, status: &watch::Sender<ExportStatus>) -> JobOutcome {
        status.send_replace(ExportStatus::Finished);
        info!("Export {} finished", self.id);
        context.listener.on_finished();
        JobOutcome::Finished
    }

    fn cancel(
        self,
        reason: CancelReason,
        context: &JobContext,
        status: &watch::Sender<ExportStatus>,
    ) -> JobOutcome {
        status.send_replace(ExportStatus::Canceled);
        info!("Export {} canceled: {}", self.id, reason);
        context.listener.on_canceled(&reason);
        JobOutcome::Canceled(reason)
    }
}

async fn write_to(sink: &mut dyn StreamSink, bytes: &[u8]) -> std::result::Result<(), CancelReason> {
    sink.write(bytes).await.map_err(|e| {
        error!("Unable to write export data: {}", e);
        CancelReason::SinkFailed(e.to_string())
    })
}

async fn close_handle(mut handle: Box<dyn TableHandle>) {
    if let Err(e) = handle.close().await {
        warn!("Unable to close table handle: {}", e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn signal_reason(signal: SinkSignal) -> CancelReason {
    match signal {
        SinkSignal::Stalled => CancelReason::StalledConsumer,
        SinkSignal::Disconnected => CancelReason::TransportClosed,
        SinkSignal::Ready { .. } => CancelReason::TransportClosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableSaverError;
    use crate::source::RowData;

    fn request(ranges: Vec<RowRange>) -> ExportRequest {
        ExportRequest::new(
            "t.csv",
            ranges,
            vec![Column::new("A", "int"), Column::new("B", "int")],
        )
    }

    #[test]
    fn test_new_plans_chunks() {
        let mut req = request(vec![RowRange::new(0, 999)]);
        req.options.chunk_cells = 500;
        let job = ExportJob::new(JobId::new(), req).unwrap();
        assert_eq!(job.chunk_rows(), 250);
        assert_eq!(job.window_size(), 5);
    }

    #[test]
    fn test_new_rejects_invalid_requests() {
        let inverted = ExportJob::new(JobId::new(), request(vec![RowRange::new(9, 3)]));
        assert!(matches!(
            inverted,
            Err(TableSaverError::Export(ExportError::InvalidRange { .. }))
        ));

        let mut no_columns = request(vec![RowRange::new(0, 1)]);
        no_columns.columns.clear();
        assert!(matches!(
            ExportJob::new(JobId::new(), no_columns),
            Err(TableSaverError::Export(ExportError::NoColumns))
        ));

        let mut zero_window = request(vec![RowRange::new(0, 1)]);
        zero_window.options.window_size = 0;
        assert!(ExportJob::new(JobId::new(), zero_window).is_err());
    }

    #[test]
    fn test_owns_only_its_completions() {
        let job = ExportJob::new(JobId::new(), request(vec![RowRange::new(0, 1)])).unwrap();
        let own = FetchCompletion {
            job_id: job.id(),
            sequence_index: 0,
            result: Ok(RowData::default()),
        };
        let stale = FetchCompletion {
            job_id: JobId::new(),
            sequence_index: 0,
            result: Ok(RowData::default()),
        };
        assert!(job.owns(&own));
        assert!(!job.owns(&stale));
    }

    #[test]
    fn test_signal_reasons() {
        assert_eq!(signal_reason(SinkSignal::Stalled), CancelReason::StalledConsumer);
        assert_eq!(
            signal_reason(SinkSignal::Disconnected),
            CancelReason::TransportClosed
        );
    }

    #[test]
    fn test_panic_message() {
        let from_str: Box<dyn Any + Send> = Box::new("boom");
        let from_string: Box<dyn Any + Send> = Box::new(String::from("row 3"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(from_str.as_ref()), "boom");
        assert_eq!(panic_message(from_string.as_ref()), "row 3");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
