//! Shared test doubles.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fus_protocol::{
    ChunkResponse, FinishedResponse, LogProperties, MessageLevel, ServiceResponse,
    SetMetadataResponse, UploadState,
};
use tokio::sync::{Semaphore, mpsc};

use crate::error::TransportError;
use crate::events::UploadEvent;
use crate::settings::{CallbackRetryConfig, UploadSettings, UploaderConfig};
use crate::transport::{ApiFuture, UploadApi};

/// How the mock answers one chunk attempt.
#[derive(Clone)]
pub(crate) enum ChunkPlan {
    Ok,
    Reject,
    Fail(TransportError),
    Hang,
    /// Succeeds once a permit is available.
    Gate(Arc<Semaphore>),
}

type PlanFn = dyn Fn(u32, usize) -> ChunkPlan + Send + Sync;

#[derive(Debug, Default, Clone)]
pub(crate) struct Calls {
    pub metadata: Vec<(String, u64, Option<String>)>,
    pub chunks: Vec<(u32, usize)>,
    pub finish: Vec<String>,
    pub restart: usize,
    pub cancel: usize,
    pub callbacks: Vec<String>,
}

/// Scriptable [`UploadApi`] that records every call.
pub(crate) struct MockApi {
    metadata: Mutex<Result<SetMetadataResponse, TransportError>>,
    chunk_plan: Box<PlanFn>,
    finish: Mutex<VecDeque<Result<FinishedResponse, TransportError>>>,
    finish_delay: Duration,
    restart: Mutex<Result<ServiceResponse, TransportError>>,
    cancel: Mutex<Result<ServiceResponse, TransportError>>,
    callback_failures: Mutex<usize>,
    calls: Mutex<Calls>,
}

pub(crate) fn plan(chunk_size: u64, chunks: &[u32]) -> SetMetadataResponse {
    SetMetadataResponse {
        chunk_size,
        blob_partitions: 1,
        chunk_list: chunks.to_vec(),
        server_location: Some("https://blob.example/a1".into()),
        ..SetMetadataResponse::default()
    }
}

pub(crate) fn done() -> FinishedResponse {
    FinishedResponse {
        state: "Done".into(),
        message: "Upload complete".into(),
        location: Some("https://cdn.example/a1".into()),
        raw_location: Some("https%3A%2F%2Fcdn.example%2Fa1".into()),
        ..FinishedResponse::default()
    }
}

pub(crate) fn missing(chunks: &[u32]) -> FinishedResponse {
    FinishedResponse {
        error: true,
        state: "Missing".into(),
        missing_chunks: chunks.to_vec(),
        ..FinishedResponse::default()
    }
}

impl MockApi {
    /// Three 100-byte chunks of a 250-byte file, all accepted.
    pub fn new() -> Self {
        Self {
            metadata: Mutex::new(Ok(plan(100, &[1, 2, 3]))),
            chunk_plan: Box::new(|_, _| ChunkPlan::Ok),
            finish: Mutex::new(VecDeque::new()),
            finish_delay: Duration::ZERO,
            restart: Mutex::new(Ok(ServiceResponse::default())),
            cancel: Mutex::new(Ok(ServiceResponse {
                error: false,
                message: Some("Upload cancelled".into()),
            })),
            callback_failures: Mutex::new(0),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_metadata(self, resp: Result<SetMetadataResponse, TransportError>) -> Self {
        *self.metadata.lock().unwrap() = resp;
        self
    }

    /// `f(chunk, attempt)` decides each chunk answer; `attempt` counts from 0.
    pub fn with_chunk_plan(
        mut self,
        f: impl Fn(u32, usize) -> ChunkPlan + Send + Sync + 'static,
    ) -> Self {
        self.chunk_plan = Box::new(f);
        self
    }

    /// Queued finish answers; once drained every call reports done.
    pub fn with_finish(self, answers: Vec<Result<FinishedResponse, TransportError>>) -> Self {
        *self.finish.lock().unwrap() = answers.into();
        self
    }

    pub fn with_finish_delay(mut self, delay: Duration) -> Self {
        self.finish_delay = delay;
        self
    }

    pub fn with_restart(self, resp: Result<ServiceResponse, TransportError>) -> Self {
        *self.restart.lock().unwrap() = resp;
        self
    }

    pub fn with_cancel(self, resp: Result<ServiceResponse, TransportError>) -> Self {
        *self.cancel.lock().unwrap() = resp;
        self
    }

    /// Fails the first `n` callback attempts.
    pub fn with_callback_failures(self, n: usize) -> Self {
        *self.callback_failures.lock().unwrap() = n;
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    pub fn chunk_calls(&self) -> Vec<u32> {
        self.calls().chunks.iter().map(|(c, _)| *c).collect()
    }

    pub fn chunk_attempts(&self, chunk: u32) -> usize {
        self.calls().chunks.iter().filter(|(c, _)| *c == chunk).count()
    }

    pub fn chunk_payload_len(&self, chunk: u32) -> Option<usize> {
        self.calls()
            .chunks
            .iter()
            .rev()
            .find(|(c, _)| *c == chunk)
            .map(|(_, len)| *len)
    }
}

impl UploadApi for MockApi {
    fn set_metadata(
        &self,
        file_name: &str,
        file_size: u64,
        content_type: Option<&str>,
    ) -> ApiFuture<'_, SetMetadataResponse> {
        self.calls.lock().unwrap().metadata.push((
            file_name.to_string(),
            file_size,
            content_type.map(str::to_string),
        ));
        let resp = self.metadata.lock().unwrap().clone();
        Box::pin(async move { resp })
    }

    fn upload_chunk(&self, block_number: u32, data: Bytes) -> ApiFuture<'_, ChunkResponse> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.chunks.iter().filter(|(c, _)| *c == block_number).count();
            calls.chunks.push((block_number, data.len()));
            n
        };
        let plan = (self.chunk_plan)(block_number, attempt);
        Box::pin(async move {
            match plan {
                ChunkPlan::Ok => Ok(ChunkResponse::default()),
                ChunkPlan::Reject => Ok(ChunkResponse {
                    error: true,
                    message: Some(format!("chunk {block_number} rejected")),
                }),
                ChunkPlan::Fail(e) => Err(e),
                ChunkPlan::Hang => std::future::pending().await,
                ChunkPlan::Gate(gate) => {
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|e| TransportError::Network(e.to_string()))?;
                    Ok(ChunkResponse::default())
                }
            }
        })
    }

    fn finish(&self, callback_url: &str) -> ApiFuture<'_, FinishedResponse> {
        self.calls.lock().unwrap().finish.push(callback_url.to_string());
        let resp = self.finish.lock().unwrap().pop_front().unwrap_or_else(|| Ok(done()));
        let delay = self.finish_delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            resp
        })
    }

    fn restart(&self) -> ApiFuture<'_, ServiceResponse> {
        self.calls.lock().unwrap().restart += 1;
        let resp = self.restart.lock().unwrap().clone();
        Box::pin(async move { resp })
    }

    fn cancel(&self) -> ApiFuture<'_, ServiceResponse> {
        self.calls.lock().unwrap().cancel += 1;
        let resp = self.cancel.lock().unwrap().clone();
        Box::pin(async move { resp })
    }

    fn status(&self) -> ApiFuture<'_, ServiceResponse> {
        Box::pin(async { Ok(ServiceResponse::default()) })
    }

    fn invoke_callback(&self, url: &str) -> ApiFuture<'_, ()> {
        self.calls.lock().unwrap().callbacks.push(url.to_string());
        let fail = {
            let mut remaining = self.callback_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        };
        Box::pin(async move {
            if fail {
                Err(TransportError::Http {
                    status: 503,
                    status_text: "Service Unavailable".into(),
                })
            } else {
                Ok(())
            }
        })
    }
}

pub(crate) fn settings() -> UploadSettings {
    UploadSettings {
        asset_id: "a1".into(),
        upload_domain: "https://upload.example".into(),
        tenant: "acme".into(),
        url_encoded_token: "tok".into(),
        ..UploadSettings::default()
    }
}

/// Engine timings shrunk for tests.
pub(crate) fn fast_config() -> UploaderConfig {
    UploaderConfig {
        health_check_interval: Duration::from_millis(20),
        stale_chunk_age: Duration::from_millis(200),
        offline_retry_delay: Duration::from_millis(20),
        callback_retry: CallbackRetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        },
        ..UploaderConfig::default()
    }
}

/// Collects sink events and waits on them.
pub(crate) struct EventLog {
    rx: mpsc::UnboundedReceiver<UploadEvent>,
    pub events: Vec<UploadEvent>,
}

impl EventLog {
    pub fn new(rx: mpsc::UnboundedReceiver<UploadEvent>) -> Self {
        Self {
            rx,
            events: Vec::new(),
        }
    }

    /// Receives until `pred` matches an event, failing after five seconds.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&UploadEvent) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(event)) => {
                    let hit = pred(&event);
                    self.events.push(event);
                    if hit {
                        return;
                    }
                }
                Ok(None) => panic!("event channel closed; events: {:#?}", self.events),
                Err(_) => panic!("timed out waiting for event; events: {:#?}", self.events),
            }
        }
    }

    pub async fn wait_for_state(&mut self, state: UploadState) {
        self.wait_for(|e| *e == UploadEvent::StateChanged(state)).await;
    }

    pub async fn wait_for_message(&mut self, needle: &str) {
        self.wait_for(|e| matches!(e, UploadEvent::Message { message, .. } if message.contains(needle)))
            .await;
    }

    /// Pulls in everything delivered so far.
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.events.push(event);
        }
    }

    /// Keeps collecting for `period`.
    pub async fn settle(&mut self, period: Duration) {
        tokio::time::sleep(period).await;
        self.drain();
    }

    pub fn states(&self) -> Vec<UploadState> {
        self.events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self, level: MessageLevel) -> Vec<(String, LogProperties)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::Message {
                    message,
                    properties,
                    level: l,
                } if *l == level => Some((message.clone(), properties.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count_messages(&self, needle: &str) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, UploadEvent::Message { message, .. } if message.contains(needle)))
            .count()
    }

    pub fn completions(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, UploadEvent::Completed(_)))
            .count()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ProgressChanged(p) => Some(p.percent_completed),
                _ => None,
            })
            .collect()
    }
}
