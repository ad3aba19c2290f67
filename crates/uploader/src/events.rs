//! Host-facing event boundary.

use fus_protocol::{LogProperties, MessageLevel, Progress, ResumeRestartInfo, UploadState, UploadStats};
use tokio::sync::mpsc;

/// Receives everything the uploader reports.
///
/// Calls are made from the coordinator task, one at a time and in order.
/// Implementations must not block.
pub trait UploadEventSink: Send + Sync {
    fn on_progress_changed(&self, progress: &Progress);

    /// Called exactly once per successful upload.
    fn on_completed(&self, stats: &UploadStats);

    /// The service already held part of the asset.
    fn on_resume_restart(&self, info: &ResumeRestartInfo);

    fn on_message(&self, message: &str, properties: &LogProperties, level: MessageLevel);

    fn on_state_changed(&self, state: UploadState);
}

/// Tagged form of every sink callback.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    ProgressChanged(Progress),
    Completed(UploadStats),
    ResumeRestart(ResumeRestartInfo),
    Message {
        message: String,
        properties: LogProperties,
        level: MessageLevel,
    },
    StateChanged(UploadState),
}

/// Forwards events into an unbounded channel, preserving order.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver the host consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: UploadEvent) {
        // A dropped receiver means the host stopped listening.
        let _ = self.tx.send(event);
    }
}

impl UploadEventSink for ChannelSink {
    fn on_progress_changed(&self, progress: &Progress) {
        self.send(UploadEvent::ProgressChanged(progress.clone()));
    }

    fn on_completed(&self, stats: &UploadStats) {
        self.send(UploadEvent::Completed(stats.clone()));
    }

    fn on_resume_restart(&self, info: &ResumeRestartInfo) {
        self.send(UploadEvent::ResumeRestart(*info));
    }

    fn on_message(&self, message: &str, properties: &LogProperties, level: MessageLevel) {
        self.send(UploadEvent::Message {
            message: message.to_string(),
            properties: properties.clone(),
            level,
        });
    }

    fn on_state_changed(&self, state: UploadState) {
        self.send(UploadEvent::StateChanged(state));
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl UploadEventSink for NoopSink {
    fn on_progress_changed(&self, _progress: &Progress) {}
    fn on_completed(&self, _stats: &UploadStats) {}
    fn on_resume_restart(&self, _info: &ResumeRestartInfo) {}
    fn on_message(&self, _message: &str, _properties: &LogProperties, _level: MessageLevel) {}
    fn on_state_changed(&self, _state: UploadState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_state_changed(UploadState::New);
        sink.on_progress_changed(&Progress::ambiguous(1.0));
        sink.on_message("hello", &LogProperties::new(), MessageLevel::Verbose);
        sink.on_state_changed(UploadState::Initialized);
        drop(sink);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], UploadEvent::StateChanged(UploadState::New));
        assert!(matches!(events[1], UploadEvent::ProgressChanged(_)));
        assert!(matches!(
            &events[2],
            UploadEvent::Message { message, level: MessageLevel::Verbose, .. } if message == "hello"
        ));
        assert_eq!(events[3], UploadEvent::StateChanged(UploadState::Initialized));
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        // Should not panic.
        sink.on_state_changed(UploadState::Completed);
    }

    #[test]
    fn noop_sink_accepts_everything() {
        let sink = NoopSink;
        sink.on_completed(&UploadStats {
            asset_id: "a".into(),
            total_time_in_seconds: "0.0".into(),
            average_speed_in_mbps: 0.0,
        });
        sink.on_resume_restart(&ResumeRestartInfo {
            number_of_chunks_remaining: 1,
        });
    }
}
