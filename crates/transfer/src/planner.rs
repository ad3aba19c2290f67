use std::collections::VecDeque;
use std::ops::Range;

use crate::TransferError;

/// Number of chunks needed to cover `file_size` bytes.
///
/// A zero chunk size yields no blocks. Fails when the count does not fit
/// the service's 32-bit block numbers.
pub fn total_blocks(file_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Ok(0);
    }
    u32::try_from(file_size.div_ceil(chunk_size)).map_err(|_| TransferError::TooManyBlocks {
        file_size,
        chunk_size,
    })
}

/// Byte range covered by 1-based `chunk_number`.
///
/// Chunk 0 and chunks past the end of the file yield an empty range; such
/// chunks must not be dispatched.
pub fn chunk_byte_range(chunk_number: u32, chunk_size: u64, file_size: u64) -> Range<u64> {
    if chunk_number == 0 {
        return 0..0;
    }
    let start = (u64::from(chunk_number) - 1)
        .saturating_mul(chunk_size)
        .min(file_size);
    let end = u64::from(chunk_number)
        .saturating_mul(chunk_size)
        .min(file_size);
    start..end
}

/// Ordered set of chunk numbers still to be uploaded.
///
/// Numbers are unique within the queue. Chunks currently in flight are
/// tracked by the caller and are not visible here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkQueue {
    chunks: VecDeque<u32>,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `chunks` to the queue.
    ///
    /// An empty queue adopts the list verbatim so the server's ordering is
    /// preserved; otherwise only numbers not already queued are appended.
    pub fn enqueue(&mut self, chunks: &[u32]) {
        if self.chunks.is_empty() {
            self.chunks.extend(chunks.iter().copied());
            return;
        }
        for &chunk in chunks {
            if !self.chunks.contains(&chunk) {
                self.chunks.push_back(chunk);
            }
        }
    }

    /// Puts a failed or evicted chunk back at the end of the queue.
    pub fn requeue(&mut self, chunk: u32) {
        if !self.chunks.contains(&chunk) {
            self.chunks.push_back(chunk);
        }
    }

    /// Oldest queued chunk.
    pub fn pop_front(&mut self) -> Option<u32> {
        self.chunks.pop_front()
    }

    /// Most recently queued chunk.
    pub fn pop_back(&mut self) -> Option<u32> {
        self.chunks.pop_back()
    }

    pub fn contains(&self, chunk: u32) -> bool {
        self.chunks.contains(&chunk)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Queue contents in order.
    pub fn snapshot(&self) -> Vec<u32> {
        self.chunks.iter().copied().collect()
    }
}
