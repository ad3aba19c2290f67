//! Chunk planning, file slicing and progress math for chunked uploads.

mod file;
mod planner;
mod progress;

pub use file::{LocalFile, MemoryFile, UploadFile};
pub use planner::{ChunkQueue, chunk_byte_range, total_blocks};
pub use progress::{
    RateSamples, format_progress, percent_complete, progress_update_rate, time_remaining_secs,
    transfer_rate_mbps,
};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("{file_size} bytes in chunks of {chunk_size} exceed the block limit")]
    TooManyBlocks { file_size: u64, chunk_size: u64 },
}
