//! Wire protocol of the chunked file upload service.
//!
//! Endpoint templates, response bodies, the upload state codes shared with
//! hosts, and the timing constants the uploader runs on.

pub mod constants;
pub mod endpoints;
pub mod messages;
pub mod mime;
pub mod types;

// Re-export primary types for convenience.
pub use endpoints::Endpoint;
pub use messages::{ChunkResponse, FinishedResponse, ServiceResponse, SetMetadataResponse};
pub use mime::content_type_for;
pub use types::{
    LogProperties, MessageLevel, Progress, ResumeRestartInfo, UploadState, UploadStats,
};

/// Errors produced while decoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown upload state code: {0}")]
    UnknownState(u16),

    #[error("unknown message level: {0}")]
    UnknownLevel(u8),
}
