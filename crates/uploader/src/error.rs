//! Uploader error types.

/// Failure of a single upload-service call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    /// A 2xx answer whose body is not the expected JSON (an HTML error
    /// page, for example). The raw body is kept for reporting.
    #[error("unexpected response body (HTTP {status})")]
    Decode { status: u16, body: String },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    Request(String),

    /// The session was cancelled while the request was pending.
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Returns `true` when the failure suggests the host is offline.
    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Failure to hand work to a chunk worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker {0} is no longer running")]
    Stopped(u64),

    #[error("session cancelled")]
    Cancelled,
}

/// Errors returned by the [`Uploader`](crate::Uploader) handle.
///
/// Upload failures are never returned here; they are reported through the
/// event sink.
#[derive(Debug, thiserror::Error)]
pub enum UploaderError {
    #[error("uploader has shut down")]
    Closed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
