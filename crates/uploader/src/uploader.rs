//! Host-facing handle to an upload coordinator.

use std::sync::Arc;

use fus_transfer::UploadFile;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{Command, Coordinator, Msg};
use crate::error::UploaderError;
use crate::events::UploadEventSink;
use crate::session::UploadStatus;
use crate::settings::{UploadSettings, UploaderConfig};
use crate::transport::{HttpTransport, UploadApi};

/// Cloneable handle that drives one asset's uploads.
///
/// Commands are queued to the coordinator task and return immediately;
/// their effects are reported through the [`UploadEventSink`]. Dropping
/// every handle does not stop an upload in progress; call
/// [`shutdown`](Self::shutdown) for that.
#[derive(Clone)]
pub struct Uploader {
    tx: mpsc::UnboundedSender<Msg>,
    shutdown: CancellationToken,
}

impl Uploader {
    /// Creates an uploader talking to the configured upload domain.
    ///
    /// Must be called from within a Tokio runtime. Missing settings are not
    /// an error here: they are reported through `sink` and leave the
    /// uploader in `FatalError`.
    pub fn new(
        settings: UploadSettings,
        config: UploaderConfig,
        sink: Arc<dyn UploadEventSink>,
    ) -> Result<Self, UploaderError> {
        let api = Arc::new(HttpTransport::new(&settings)?);
        Ok(Self::with_api(settings, config, api, sink))
    }

    /// Creates an uploader over a custom [`UploadApi`].
    pub fn with_api(
        settings: UploadSettings,
        config: UploaderConfig,
        api: Arc<dyn UploadApi>,
        sink: Arc<dyn UploadEventSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let coordinator = Coordinator::new(settings, config, api, sink, tx.clone());
        tokio::spawn(coordinator.run(rx, shutdown.clone()));
        Self { tx, shutdown }
    }

    fn send(&self, command: Command) -> Result<(), UploaderError> {
        self.tx
            .send(Msg::Command(command))
            .map_err(|_| UploaderError::Closed)
    }

    /// Begins uploading `file`.
    pub fn start(&self, file: Arc<dyn UploadFile>) -> Result<(), UploaderError> {
        self.send(Command::Start(file))
    }

    pub fn pause(&self) -> Result<(), UploaderError> {
        self.send(Command::Pause)
    }

    /// Continues a paused upload.
    pub fn resume(&self) -> Result<(), UploaderError> {
        self.send(Command::Continue)
    }

    /// Asks the service to cancel the upload.
    pub fn cancel(&self) -> Result<(), UploaderError> {
        self.send(Command::Cancel)
    }

    /// Discards uploaded chunks on the service and uploads every chunk again.
    pub fn restart(&self) -> Result<(), UploaderError> {
        self.send(Command::Restart)
    }

    /// Drops the current session locally and returns to `New`.
    pub fn reset(&self) -> Result<(), UploaderError> {
        self.send(Command::Reset)
    }

    /// Snapshot of the current session, taken after every queued command.
    pub async fn status(&self) -> Result<UploadStatus, UploaderError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status(reply))?;
        rx.await.map_err(|_| UploaderError::Closed)
    }

    /// Stops the coordinator, terminating workers and pending requests.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelSink;
    use crate::testing::{EventLog, MockApi, fast_config, settings};
    use fus_protocol::UploadState;
    use std::time::Duration;

    #[tokio::test]
    async fn new_builds_http_transport() {
        let (sink, rx) = ChannelSink::new();
        let uploader = Uploader::new(settings(), fast_config(), Arc::new(sink)).unwrap();
        let mut log = EventLog::new(rx);
        log.wait_for_state(UploadState::New).await;

        assert_eq!(uploader.status().await.unwrap().state, UploadState::New);
    }

    #[tokio::test]
    async fn new_rejects_unusable_correlation_id() {
        let (sink, _rx) = ChannelSink::new();
        let mut bad = settings();
        bad.correlation_id = Some("line\nbreak".into());
        assert!(matches!(
            Uploader::new(bad, fast_config(), Arc::new(sink)),
            Err(UploaderError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let (sink, _rx) = ChannelSink::new();
        let uploader = Uploader::with_api(
            settings(),
            fast_config(),
            Arc::new(MockApi::new()),
            Arc::new(sink),
        );
        uploader.shutdown();
        assert!(uploader.is_shut_down());

        // The coordinator drops its receiver once it observes the shutdown.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(uploader.pause(), Err(UploaderError::Closed)));
        assert!(matches!(uploader.status().await, Err(UploaderError::Closed)));
    }

    #[tokio::test]
    async fn clones_share_one_coordinator() {
        let (sink, _rx) = ChannelSink::new();
        let uploader = Uploader::with_api(
            settings(),
            fast_config(),
            Arc::new(MockApi::new()),
            Arc::new(sink),
        );
        let other = uploader.clone();
        other.shutdown();
        assert!(uploader.is_shut_down());
    }
}
