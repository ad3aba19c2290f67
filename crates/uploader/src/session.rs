//! Per-upload state owned by the coordinator.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use fus_protocol::UploadState;
use fus_transfer::{
    ChunkQueue, RateSamples, TransferError, UploadFile, chunk_byte_range, progress_update_rate,
    total_blocks,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::worker::{ChunkWorker, WorkerId, WorkerMode};

/// Bookkeeping for one chunk currently held by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InFlight {
    pub worker: WorkerId,
    pub started: Instant,
}

/// Everything the coordinator tracks for a single upload.
///
/// A fresh session (with a new epoch) is created for each started upload
/// and on reset; messages stamped with an older epoch are ignored.
pub(crate) struct UploadSession {
    pub epoch: u64,
    pub state: UploadState,
    pub mode: WorkerMode,
    pub file: Option<Arc<dyn UploadFile>>,

    pub chunk_size: u64,
    pub blob_partitions: u32,
    pub total_blocks: u32,
    pub progress_update_rate: u32,

    pub queue: ChunkQueue,
    pub in_flight: HashMap<u32, InFlight>,
    pub workers: Vec<Box<dyn ChunkWorker>>,
    pub next_worker_id: WorkerId,

    pub blocks_completed: u32,
    /// Failed-chunk budget; grows by one with every successful chunk.
    pub max_error_count: u32,
    pub chunks_failed_count: u32,
    pub worker_error_count: u32,
    pub connected: bool,

    pub ambiguous_progress: f64,
    pub rates: RateSamples,
    pub start_time: Instant,
    pub end_time: Option<Instant>,

    /// Cancels every pending request issued for this session.
    pub cancel: CancellationToken,
}

impl UploadSession {
    pub fn new(epoch: u64, state: UploadState, mode: WorkerMode, max_error_count: u32) -> Self {
        Self {
            epoch,
            state,
            mode,
            file: None,
            chunk_size: 0,
            blob_partitions: 0,
            total_blocks: 0,
            progress_update_rate: 1,
            queue: ChunkQueue::new(),
            in_flight: HashMap::new(),
            workers: Vec::new(),
            next_worker_id: 1,
            blocks_completed: 0,
            max_error_count,
            chunks_failed_count: 0,
            worker_error_count: 0,
            connected: true,
            ambiguous_progress: 0.0,
            rates: RateSamples::default(),
            start_time: Instant::now(),
            end_time: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.size())
    }

    /// Records the chunk plan returned by the service.
    pub fn apply_plan(&mut self, chunk_size: u64, blob_partitions: u32) -> Result<(), TransferError> {
        self.total_blocks = total_blocks(self.file_size(), chunk_size)?;
        self.chunk_size = chunk_size;
        self.blob_partitions = blob_partitions;
        self.progress_update_rate = progress_update_rate(self.total_blocks);
        Ok(())
    }

    pub fn chunk_range(&self, chunk: u32) -> Range<u64> {
        chunk_byte_range(chunk, self.chunk_size, self.file_size())
    }

    /// Pops the next chunk to upload.
    ///
    /// Threaded sessions drain the queue front to back, the fallback back to
    /// front. Chunks already held by a worker and chunks outside the file
    /// are dropped from the queue.
    pub fn next_chunk(&mut self) -> Option<u32> {
        loop {
            let chunk = match self.mode {
                WorkerMode::Threaded => self.queue.pop_front(),
                WorkerMode::SingleThreaded => self.queue.pop_back(),
            }?;
            if self.in_flight.contains_key(&chunk) {
                continue;
            }
            if self.chunk_range(chunk).is_empty() {
                warn!(chunk, total_blocks = self.total_blocks, "discarding invalid chunk number");
                continue;
            }
            return Some(chunk);
        }
    }

    /// Clears the in-flight record for `chunk` if `worker` still owns it.
    pub fn take_in_flight(&mut self, chunk: u32, worker: WorkerId) -> bool {
        match self.in_flight.get(&chunk) {
            Some(record) if record.worker == worker => {
                self.in_flight.remove(&chunk);
                true
            }
            _ => false,
        }
    }

    /// Returns every in-flight chunk to the queue.
    pub fn drain_in_flight(&mut self) {
        let mut chunks: Vec<u32> = self.in_flight.drain().map(|(chunk, _)| chunk).collect();
        chunks.sort_unstable();
        for chunk in chunks {
            self.queue.requeue(chunk);
        }
    }

    pub fn worker_index(&self, id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| w.id() == id)
    }

    /// A pooled worker that holds no chunk.
    pub fn is_idle(&self, id: WorkerId) -> bool {
        self.worker_index(id).is_some() && !self.in_flight.values().any(|r| r.worker == id)
    }

    pub fn idle_workers(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .map(|w| w.id())
            .filter(|id| self.is_idle(*id))
            .collect()
    }

    pub fn snapshot(&self) -> UploadStatus {
        let mut in_flight: Vec<u32> = self.in_flight.keys().copied().collect();
        in_flight.sort_unstable();
        UploadStatus {
            state: self.state,
            mode: self.mode,
            file_name: self.file.as_ref().map(|f| f.name().to_string()),
            file_size: self.file_size(),
            chunk_size: self.chunk_size,
            blob_partitions: self.blob_partitions,
            total_blocks: self.total_blocks,
            blocks_completed: self.blocks_completed,
            queued: self.queue.snapshot(),
            in_flight,
            workers: self.workers.len(),
            chunks_failed_count: self.chunks_failed_count,
            worker_error_count: self.worker_error_count,
            max_error_count: self.max_error_count,
            connected: self.connected,
        }
    }
}

/// Point-in-time view of an upload, returned by
/// [`Uploader::status`](crate::Uploader::status).
#[derive(Debug, Clone, PartialEq)]
pub struct UploadStatus {
    pub state: UploadState,
    pub mode: WorkerMode,
    pub file_name: Option<String>,
    pub file_size: u64,
    pub chunk_size: u64,
    pub blob_partitions: u32,
    pub total_blocks: u32,
    pub blocks_completed: u32,
    pub queued: Vec<u32>,
    pub in_flight: Vec<u32>,
    pub workers: usize,
    pub chunks_failed_count: u32,
    pub worker_error_count: u32,
    pub max_error_count: u32,
    pub connected: bool,
}
