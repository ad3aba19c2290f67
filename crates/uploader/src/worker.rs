//! Chunk workers.
//!
//! A worker uploads one chunk at a time and reports the outcome back to the
//! coordinator over a channel; it never touches session state. Two
//! implementations exist: [`TaskWorker`] runs on its own task and reads
//! chunks on the blocking pool, [`InlineWorker`] starts one cancellable
//! request per dispatch on the coordinator's runtime.

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use fus_transfer::UploadFile;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{TransportError, WorkerError};
use crate::transport::UploadApi;

pub type WorkerId = u64;

/// Concurrency backend used by an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Independent worker tasks, FIFO dispatch.
    Threaded,
    /// Bounded overlapping requests on the coordinator, LIFO dispatch.
    SingleThreaded,
}

/// Picks the worker backend for a new session.
///
/// Worker tasks only run in parallel on a multi-threaded runtime; anywhere
/// else, or when forced, the single-threaded fallback is used.
pub fn probe_worker_mode(force_single_thread: bool) -> WorkerMode {
    if force_single_thread {
        return WorkerMode::SingleThreaded;
    }
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => WorkerMode::Threaded,
        _ => WorkerMode::SingleThreaded,
    }
}

/// One chunk handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkJob {
    pub epoch: u64,
    pub chunk: u32,
    pub range: Range<u64>,
}

/// Result of a single chunk attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Uploaded,
    /// The service answered but flagged the chunk as failed.
    Rejected(String),
    Failed(TransportError),
    /// The worker could not produce the chunk bytes.
    ReadFailed(String),
}

/// Message a worker posts back after each job.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub epoch: u64,
    pub chunk: u32,
    pub outcome: ChunkOutcome,
}

/// A unit of upload concurrency owned by the coordinator.
pub trait ChunkWorker: Send {
    fn id(&self) -> WorkerId;

    /// Starts uploading `job`. The outcome arrives later as a [`WorkerReport`].
    fn dispatch(&mut self, job: ChunkJob) -> Result<(), WorkerError>;

    /// Stops the worker abruptly. Pending work is dropped without a report.
    fn terminate(&mut self);
}

async fn send_chunk(api: &dyn UploadApi, chunk: u32, data: Bytes) -> ChunkOutcome {
    if data.is_empty() {
        return ChunkOutcome::ReadFailed(format!("chunk {chunk} is empty"));
    }
    match api.upload_chunk(chunk, data).await {
        Ok(resp) if resp.error => ChunkOutcome::Rejected(
            resp.message
                .unwrap_or_else(|| format!("chunk {chunk} rejected by service")),
        ),
        Ok(_) => ChunkOutcome::Uploaded,
        Err(e) => ChunkOutcome::Failed(e),
    }
}

// ---------------------------------------------------------------------------
// TaskWorker
// ---------------------------------------------------------------------------

/// Worker backed by a dedicated task with an inbox.
///
/// There is no cooperative cancellation: [`terminate`](ChunkWorker::terminate)
/// aborts the task mid-request.
pub struct TaskWorker {
    id: WorkerId,
    inbox: mpsc::UnboundedSender<ChunkJob>,
    handle: JoinHandle<()>,
}

impl TaskWorker {
    /// Spawns the worker task. Reports are converted into `M` and sent on
    /// `reports`.
    pub fn spawn<M>(
        id: WorkerId,
        file: Arc<dyn UploadFile>,
        api: Arc<dyn UploadApi>,
        reports: mpsc::UnboundedSender<M>,
    ) -> Self
    where
        M: From<WorkerReport> + Send + 'static,
    {
        let (inbox, mut jobs) = mpsc::unbounded_channel::<ChunkJob>();

        let handle = tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                let range = job.range.clone();
                let source = Arc::clone(&file);
                let read = tokio::task::spawn_blocking(move || source.slice(range)).await;

                let outcome = match read {
                    Ok(Ok(data)) => send_chunk(api.as_ref(), job.chunk, data).await,
                    Ok(Err(e)) => ChunkOutcome::ReadFailed(e.to_string()),
                    Err(e) => ChunkOutcome::ReadFailed(format!("read task failed: {e}")),
                };

                let report = WorkerReport {
                    worker: id,
                    epoch: job.epoch,
                    chunk: job.chunk,
                    outcome,
                };
                if reports.send(M::from(report)).is_err() {
                    break;
                }
            }
            trace!(worker = id, "task worker stopped");
        });

        Self { id, inbox, handle }
    }
}

impl ChunkWorker for TaskWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn dispatch(&mut self, job: ChunkJob) -> Result<(), WorkerError> {
        if self.handle.is_finished() {
            return Err(WorkerError::Stopped(self.id));
        }
        self.inbox
            .send(job)
            .map_err(|_| WorkerError::Stopped(self.id))
    }

    fn terminate(&mut self) {
        self.handle.abort();
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// InlineWorker
// ---------------------------------------------------------------------------

/// Single-threaded fallback worker.
///
/// Slices the chunk on the calling thread and starts the request as a task
/// raced against the session cancellation token.
pub struct InlineWorker<M> {
    id: WorkerId,
    file: Arc<dyn UploadFile>,
    api: Arc<dyn UploadApi>,
    reports: mpsc::UnboundedSender<M>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<M> InlineWorker<M>
where
    M: From<WorkerReport> + Send + 'static,
{
    pub fn new(
        id: WorkerId,
        file: Arc<dyn UploadFile>,
        api: Arc<dyn UploadApi>,
        reports: mpsc::UnboundedSender<M>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            file,
            api,
            reports,
            cancel,
            tasks: Vec::new(),
        }
    }
}

impl<M> ChunkWorker for InlineWorker<M>
where
    M: From<WorkerReport> + Send + 'static,
{
    fn id(&self) -> WorkerId {
        self.id
    }

    fn dispatch(&mut self, job: ChunkJob) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        self.tasks.retain(|t| !t.is_finished());

        let read = self.file.slice(job.range.clone());
        let api = Arc::clone(&self.api);
        let reports = self.reports.clone();
        let cancel = self.cancel.clone();
        let id = self.id;

        self.tasks.push(tokio::spawn(async move {
            let outcome = match read {
                Ok(data) => tokio::select! {
                    _ = cancel.cancelled() => ChunkOutcome::Failed(TransportError::Cancelled),
                    outcome = send_chunk(api.as_ref(), job.chunk, data) => outcome,
                },
                Err(e) => ChunkOutcome::ReadFailed(e.to_string()),
            };
            let _ = reports.send(M::from(WorkerReport {
                worker: id,
                epoch: job.epoch,
                chunk: job.chunk,
                outcome,
            }));
        }));
        Ok(())
    }

    fn terminate(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl<M> Drop for InlineWorker<M> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
