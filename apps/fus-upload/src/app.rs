//! Drives one upload and relays its events to the log.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fus_protocol::{MessageLevel, UploadState};
use fus_transfer::LocalFile;
use fus_uploader::{ChannelSink, UploadEvent, Uploader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;

/// How long to wait for the completion callback after the upload is done.
const CALLBACK_WAIT: Duration = Duration::from_secs(60);

/// States that end the client.
pub fn succeeded(state: UploadState) -> bool {
    state == UploadState::Completed
}

fn is_final(state: UploadState) -> bool {
    state.is_terminal() || state == UploadState::Error
}

/// Uploads `path` and returns the state the upload ended in.
pub async fn run(config: Config, path: PathBuf) -> anyhow::Result<UploadState> {
    let file = LocalFile::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
    let has_callback = config.upload.callback_url().is_some();

    let (sink, mut events) = ChannelSink::new();
    let uploader = Uploader::new(
        config.upload,
        config.engine.to_uploader_config(),
        Arc::new(sink),
    )?;
    uploader.start(Arc::new(file))?;

    let mut interrupted = false;
    let state = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    warn!("second interrupt, abandoning upload");
                    break UploadState::Cancelled;
                }
                interrupted = true;
                info!("interrupted, cancelling upload (press Ctrl+C again to quit)");
                uploader.cancel()?;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    anyhow::bail!("uploader stopped unexpectedly");
                };
                if let Some(state) = relay(&event) {
                    if is_final(state) {
                        break state;
                    }
                }
            }
        }
    };

    if succeeded(state) && has_callback {
        wait_for_callback(&mut events).await;
    }
    uploader.shutdown();
    Ok(state)
}

/// Logs `event`; returns the new state for state changes.
///
/// Messages are not relayed: the uploader already logs them itself.
fn relay(event: &UploadEvent) -> Option<UploadState> {
    match event {
        UploadEvent::StateChanged(state) => {
            debug!(%state, "state changed");
            return Some(*state);
        }
        UploadEvent::ProgressChanged(progress) if progress.rate.is_empty() => {
            debug!(percent = progress.percent_completed, "preparing upload");
        }
        UploadEvent::ProgressChanged(progress) => {
            info!(
                percent = %format!("{:.0}", progress.percent_completed),
                rate_mbps = %progress.rate,
                average_mbps = %progress.average_speed,
                remaining_secs = %progress.time_remaining,
                "progress"
            );
        }
        UploadEvent::ResumeRestart(resume) => {
            info!(
                chunks_remaining = resume.number_of_chunks_remaining,
                "resuming a previous upload"
            );
        }
        UploadEvent::Completed(stats) => {
            info!(
                asset_id = %stats.asset_id,
                seconds = %stats.total_time_in_seconds,
                average_mbps = stats.average_speed_in_mbps,
                "upload completed"
            );
        }
        UploadEvent::Message { .. } => {}
    }
    None
}

/// Returns `true` once `event` settles the completion callback.
fn callback_settled(event: &UploadEvent) -> bool {
    matches!(
        event,
        UploadEvent::Message { message, level: MessageLevel::Information, .. }
            if message.starts_with("Callback succeeded")
                || message.starts_with("Callback retries depleted")
    )
}

async fn wait_for_callback(events: &mut mpsc::UnboundedReceiver<UploadEvent>) {
    let wait = async {
        while let Some(event) = events.recv().await {
            relay(&event);
            if callback_settled(&event) {
                return;
            }
        }
    };
    if tokio::time::timeout(CALLBACK_WAIT, wait).await.is_err() {
        warn!("gave up waiting for the completion callback");
    }
}
