//! Resumable, multi-worker chunked upload engine.
//!
//! An [`Uploader`] drives one file at a time through the upload service:
//!
//! 1. **Metadata**: announce the file and receive the chunk plan
//! 2. **Upload**: drain the chunk queue through a pool of workers
//! 3. **Verify**: ask the service to assemble the chunks, requeueing any
//!    it reports missing
//! 4. **Callback**: optionally notify a completion URL
//!
//! All session state lives in a single coordinator task. Workers, HTTP
//! completions and timers report back to it over one channel, and every
//! observable outcome is delivered through an [`UploadEventSink`].

mod coordinator;
pub mod error;
pub mod events;
mod health;
mod session;
pub mod settings;
pub mod state;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod uploader;
pub mod worker;

// Re-export primary types for convenience.
pub use error::{TransportError, UploaderError, WorkerError};
pub use events::{ChannelSink, NoopSink, UploadEvent, UploadEventSink};
pub use session::UploadStatus;
pub use settings::{CallbackRetryConfig, UploadSettings, UploaderConfig};
pub use transport::{HttpTransport, RequestOptions, UploadApi};
pub use uploader::Uploader;
pub use worker::{WorkerMode, probe_worker_mode};
