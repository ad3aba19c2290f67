//! The upload state machine.
//!
//! One task owns the [`UploadSession`]. Host commands, worker reports, HTTP
//! completions and timers all arrive as [`Msg`] values on a single channel
//! and are handled to completion one at a time, so no session field is ever
//! shared. Long-running calls are spawned and post their result back.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fus_protocol::constants::VERBOSE_MESSAGE_PREFIX;
use fus_protocol::endpoints::callback_url;
use fus_protocol::{
    FinishedResponse, LogProperties, MessageLevel, Progress, ResumeRestartInfo, ServiceResponse,
    SetMetadataResponse, UploadState, UploadStats, content_type_for,
};
use fus_transfer::{
    UploadFile, format_progress, percent_complete, time_remaining_secs, transfer_rate_mbps,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, WorkerError};
use crate::events::UploadEventSink;
use crate::health::{HealthMonitor, HealthTick};
use crate::session::{InFlight, UploadSession, UploadStatus};
use crate::settings::{UploadSettings, UploaderConfig};
use crate::state::{in_progress, transition_allowed};
use crate::transport::UploadApi;
use crate::worker::{
    ChunkJob, ChunkOutcome, ChunkWorker, InlineWorker, TaskWorker, WorkerId, WorkerMode,
    WorkerReport, probe_worker_mode,
};

const METADATA_FAILED: &str = "The asset cannot be uploaded. Failed to set metadata.";
const NO_NETWORK: &str = "Upload Failed. No network detected. Please try again.";
const TOO_MANY_ERRORS: &str =
    "Upload Failed. Encountered too many errors while uploading. Please try again.";
const EMPTY_FILE: &str = "A file must be specified and must not be empty.";

/// Host requests forwarded by the [`Uploader`](crate::Uploader) handle.
pub(crate) enum Command {
    Start(Arc<dyn UploadFile>),
    Pause,
    Continue,
    Cancel,
    Restart,
    Reset,
    Status(oneshot::Sender<UploadStatus>),
}

/// Everything the coordinator reacts to.
pub(crate) enum Msg {
    Command(Command),
    Worker(WorkerReport),
    Health(HealthTick),
    Metadata {
        epoch: u64,
        result: Result<SetMetadataResponse, TransportError>,
    },
    Finished {
        epoch: u64,
        result: Result<FinishedResponse, TransportError>,
    },
    CancelDone {
        epoch: u64,
        result: Result<ServiceResponse, TransportError>,
    },
    RestartDone {
        epoch: u64,
        result: Result<ServiceResponse, TransportError>,
    },
    Callback {
        epoch: u64,
        attempt: u32,
        location: String,
        result: Result<(), TransportError>,
    },
    RetryCallback {
        epoch: u64,
        attempt: u32,
        location: String,
    },
    /// Wake an idle worker after the offline back-off.
    Redispatch { epoch: u64, worker: WorkerId },
}

impl From<WorkerReport> for Msg {
    fn from(report: WorkerReport) -> Self {
        Msg::Worker(report)
    }
}

impl From<HealthTick> for Msg {
    fn from(tick: HealthTick) -> Self {
        Msg::Health(tick)
    }
}

fn properties(value: Value) -> LogProperties {
    match value {
        Value::Object(map) => map,
        _ => LogProperties::new(),
    }
}

/// Inner text of an HTML error page, or the body unchanged.
fn html_body(text: &str) -> &str {
    let lower = text.to_ascii_lowercase();
    let Some(open) = lower.find("<body") else {
        return text.trim();
    };
    let start = lower[open..].find('>').map_or(text.len(), |i| open + i + 1);
    let end = lower
        .rfind("</body")
        .filter(|&end| end >= start)
        .unwrap_or(text.len());
    text[start..end].trim()
}

pub(crate) struct Coordinator {
    settings: UploadSettings,
    config: UploaderConfig,
    api: Arc<dyn UploadApi>,
    sink: Arc<dyn UploadEventSink>,
    tx: mpsc::UnboundedSender<Msg>,
    configured: bool,
    epochs: u64,
    session: UploadSession,
    health: HealthMonitor,
}

impl Coordinator {
    pub fn new(
        settings: UploadSettings,
        config: UploaderConfig,
        api: Arc<dyn UploadApi>,
        sink: Arc<dyn UploadEventSink>,
        tx: mpsc::UnboundedSender<Msg>,
    ) -> Self {
        let mode = probe_worker_mode(settings.force_single_thread);
        let session = UploadSession::new(0, UploadState::New, mode, config.max_error_count);
        let health = HealthMonitor::new(config.health_check_interval, config.stale_chunk_age);
        Self {
            settings,
            config,
            api,
            sink,
            tx,
            configured: false,
            epochs: 0,
            session,
            health,
        }
    }

    /// Runs until `shutdown` fires.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>, shutdown: CancellationToken) {
        self.initialize();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
            }
        }

        self.stop_all_workers();
        self.health.stop();
        self.session.cancel.cancel();
        debug!(asset_id = %self.settings.asset_id, "upload coordinator stopped");
    }

    fn initialize(&mut self) {
        let missing = self.settings.missing_fields();
        if !missing.is_empty() {
            for message in missing {
                self.error(message, LogProperties::new(), UploadState::FatalError);
            }
            return;
        }
        self.configured = true;
        self.set_state(UploadState::New);
        self.log("Upload created", LogProperties::new(), MessageLevel::Information);
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Command(command) => self.handle_command(command),
            Msg::Worker(report) => self.on_worker_report(report),
            Msg::Health(tick) => self.health_tick(tick.generation),
            Msg::Metadata { epoch, result } if epoch == self.session.epoch => {
                self.on_metadata(result)
            }
            Msg::Finished { epoch, result } if epoch == self.session.epoch => {
                self.on_finished(result)
            }
            Msg::CancelDone { epoch, result } if epoch == self.session.epoch => {
                self.on_cancelled(result)
            }
            Msg::RestartDone { epoch, result } if epoch == self.session.epoch => {
                self.on_restarted(result)
            }
            Msg::Callback {
                epoch,
                attempt,
                location,
                result,
            } if epoch == self.session.epoch => self.on_callback(attempt, location, result),
            Msg::RetryCallback {
                epoch,
                attempt,
                location,
            } if epoch == self.session.epoch => self.invoke_callback(location, attempt),
            Msg::Redispatch { epoch, worker } if epoch == self.session.epoch => {
                if self.session.is_idle(worker) {
                    self.dispatch_next(worker);
                }
            }
            _ => debug!("dropping message from a previous session"),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(file) => self.start(file),
            Command::Pause => self.pause(),
            Command::Continue => self.resume(),
            Command::Cancel => self.cancel(),
            Command::Restart => self.restart(),
            Command::Reset => self.reset(),
            Command::Status(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    fn log(&self, message: &str, mut props: LogProperties, level: MessageLevel) {
        let verbose = props
            .get("VerboseMessage")
            .and_then(Value::as_str)
            .unwrap_or(message)
            .to_string();
        props.insert(
            "VerboseMessage".into(),
            Value::String(format!("{VERBOSE_MESSAGE_PREFIX}{verbose}")),
        );

        let mut merged = properties(json!({
            "AssetId": self.settings.asset_id,
            "CorrelationId": self.settings.correlation_id(),
            "Tenant": self.settings.tenant,
        }));
        let vector = self.settings.correlation_vector.as_deref();
        if let Some(vector) = vector.filter(|v| !v.is_empty()) {
            merged.insert("CorrelationVector".into(), json!(vector));
        }
        merged.extend(props);

        let asset_id = self.settings.asset_id.as_str();
        match level {
            MessageLevel::Error => error!(asset_id, "{message}"),
            MessageLevel::Information => info!(asset_id, "{message}"),
            MessageLevel::Verbose => debug!(asset_id, "{message}"),
        }
        self.sink.on_message(message, &merged, level);
    }

    /// Moves to `code` and reports `message` at error level.
    fn error(&mut self, message: &str, mut props: LogProperties, code: UploadState) {
        self.set_state(code);
        props.insert(
            "VerboseMessage".into(),
            Value::String(format!("Error Code: {} - {}", code.code(), message)),
        );
        self.log(message, props, MessageLevel::Error);
    }

    fn set_state(&mut self, state: UploadState) {
        self.session.state = state;
        self.log(
            &format!("Setting state: {state}"),
            LogProperties::new(),
            MessageLevel::Information,
        );
        self.sink.on_state_changed(state);
    }

    /// Applies a guarded transition, reporting refused ones.
    fn transition(&mut self, to: UploadState) -> bool {
        let from = self.session.state;
        if !transition_allowed(from, to) {
            self.log(
                &format!("Invalid state transition from {from} to {to}."),
                LogProperties::new(),
                MessageLevel::Error,
            );
            return false;
        }
        self.set_state(to);
        true
    }

    fn bump_ambiguous_progress(&mut self) {
        self.session.ambiguous_progress += 1.0;
        self.sink
            .on_progress_changed(&Progress::ambiguous(self.session.ambiguous_progress));
    }

    fn report_progress(&mut self) {
        let s = &mut self.session;
        let percent = percent_complete(s.blocks_completed, s.total_blocks);
        s.ambiguous_progress = s.ambiguous_progress.max(percent);

        let rate = transfer_rate_mbps(s.blocks_completed, s.chunk_size, s.start_time.elapsed());
        s.rates.push(rate);
        let average = s.rates.average();
        let remaining = time_remaining_secs(s.queue.len(), s.chunk_size, average);

        let progress = format_progress(percent, rate, average, remaining);
        self.sink.on_progress_changed(&progress);
    }

    // -----------------------------------------------------------------------
    // Async plumbing
    // -----------------------------------------------------------------------

    /// Runs `call` against the session token and posts its result.
    fn spawn_call<T, F>(&self, call: F, wrap: impl FnOnce(Result<T, TransportError>) -> Msg + Send + 'static)
    where
        T: Send + 'static,
        F: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        let cancel = self.session.cancel.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = call => result,
            };
            let _ = tx.send(wrap(result));
        });
    }

    fn send_after(&self, delay: Duration, msg: Msg) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Replaces the session, dropping workers and pending calls of the old one.
    fn begin_session(&mut self, file: Option<Arc<dyn UploadFile>>) {
        self.stop_all_workers();
        self.session.cancel.cancel();
        self.health.stop();

        self.epochs += 1;
        let mode = probe_worker_mode(self.settings.force_single_thread);
        let state = self.session.state;
        self.session = UploadSession::new(self.epochs, state, mode, self.config.max_error_count);
        self.session.file = file;
    }

    fn start(&mut self, file: Arc<dyn UploadFile>) {
        if !self.configured {
            self.log(
                "Cannot start an upload without the required settings.",
                LogProperties::new(),
                MessageLevel::Error,
            );
            return;
        }

        let busy = in_progress(self.session.state);
        if file.size() == 0 {
            if busy {
                self.log(EMPTY_FILE, LogProperties::new(), MessageLevel::Error);
            } else {
                self.error(EMPTY_FILE, LogProperties::new(), UploadState::Error);
            }
            return;
        }
        if busy {
            self.log(
                "Cannot start an upload that is already in progress.",
                LogProperties::new(),
                MessageLevel::Error,
            );
            return;
        }

        self.begin_session(Some(file));
        debug!(mode = ?self.session.mode, "upload session started");
        if self.transition(UploadState::Initialized) {
            self.set_metadata();
        }
    }

    fn file_properties(&self) -> LogProperties {
        match &self.session.file {
            Some(file) => properties(json!({
                "fileName": file.name(),
                "fileSize": file.size(),
            })),
            None => LogProperties::new(),
        }
    }

    fn set_metadata(&mut self) {
        let Some(file) = self.session.file.clone() else {
            return;
        };
        self.bump_ambiguous_progress();
        self.log("Setting Metadata.", self.file_properties(), MessageLevel::Information);

        let api = Arc::clone(&self.api);
        let epoch = self.session.epoch;
        self.spawn_call(
            async move {
                let name = file.name();
                api.set_metadata(name, file.size(), content_type_for(name)).await
            },
            move |result| Msg::Metadata { epoch, result },
        );
    }

    fn on_metadata(&mut self, result: Result<SetMetadataResponse, TransportError>) {
        let mut props = self.file_properties();
        let resp = match result {
            Ok(resp) => resp,
            Err(TransportError::Cancelled) => return,
            Err(TransportError::Network(reason)) => {
                warn!(%reason, "set metadata failed: no network");
                self.error(NO_NETWORK, props, UploadState::Error);
                return;
            }
            Err(TransportError::Http {
                status,
                status_text,
            }) => {
                props.insert("StatusCode".into(), json!(status));
                props.insert("StatusText".into(), json!(status_text));
                self.error(METADATA_FAILED, props, UploadState::FatalError);
                return;
            }
            Err(TransportError::Decode { status, body }) => {
                props.insert("StatusCode".into(), json!(status));
                props.insert("StatusText".into(), json!(html_body(&body)));
                self.error(METADATA_FAILED, props, UploadState::FatalError);
                return;
            }
            Err(TransportError::Request(reason)) => {
                props.insert("StatusText".into(), json!(reason));
                self.error(METADATA_FAILED, props, UploadState::FatalError);
                return;
            }
        };

        self.bump_ambiguous_progress();

        if resp.error {
            let message = resp.message.as_deref().unwrap_or(METADATA_FAILED);
            self.error(message, props, UploadState::FatalError);
            return;
        }
        if resp.chunk_size == 0 {
            self.error(
                "The asset cannot be uploaded. The service returned no chunk size.",
                props,
                UploadState::FatalError,
            );
            return;
        }

        if let Err(e) = self.session.apply_plan(resp.chunk_size, resp.blob_partitions) {
            props.insert("chunkSize".into(), json!(resp.chunk_size));
            self.error(
                &format!("The asset cannot be uploaded. {e}."),
                props,
                UploadState::FatalError,
            );
            return;
        }

        props.insert("serverLocation".into(), json!(resp.server_location));
        props.insert("chunkSize".into(), json!(resp.chunk_size));
        props.insert("blobPartitions".into(), json!(resp.blob_partitions));
        self.log("Set metadata completed.", props, MessageLevel::Information);

        let total = self.session.total_blocks;
        self.log(
            &format!("Chunks to upload: {total}"),
            LogProperties::new(),
            MessageLevel::Information,
        );
        self.session.queue.enqueue(&resp.chunk_list);

        if resp.resume_restart {
            if !self.transition(UploadState::ResumeOrRestart) {
                return;
            }
            let remaining = resp.chunk_list.len();
            self.log(
                &format!("Chunks remaining to upload: {remaining}"),
                LogProperties::new(),
                MessageLevel::Information,
            );
            self.session.blocks_completed =
                total.saturating_sub(u32::try_from(remaining).unwrap_or(u32::MAX));
            self.sink.on_resume_restart(&ResumeRestartInfo {
                number_of_chunks_remaining: remaining,
            });
        }

        self.session.start_time = Instant::now();
        self.start_upload();
    }

    fn start_upload(&mut self) {
        if !self.transition(UploadState::Uploading) {
            return;
        }
        self.bump_ambiguous_progress();
        self.log(
            &format!("Starting upload with {} queued chunks.", self.session.queue.len()),
            LogProperties::new(),
            MessageLevel::Information,
        );
        self.init_pool();
        self.kick_health();
    }

    // -----------------------------------------------------------------------
    // Worker pool
    // -----------------------------------------------------------------------

    fn init_pool(&mut self) {
        let limit = match self.current_mode() {
            WorkerMode::Threaded => self.settings.uploaders(),
            WorkerMode::SingleThreaded => self.config.max_concurrent_uploads.max(1),
        };
        let count = limit
            .saturating_sub(self.session.workers.len())
            .min(self.session.queue.len());

        let ids: Vec<WorkerId> = (0..count).filter_map(|_| self.spawn_worker()).collect();
        debug!(workers = ids.len(), mode = ?self.session.mode, "worker pool started");
        for id in ids {
            self.dispatch_next(id);
        }
    }

    /// The session mode, downgraded once worker errors exceed the budget.
    fn current_mode(&mut self) -> WorkerMode {
        if self.session.mode == WorkerMode::Threaded
            && self.session.worker_error_count > self.session.max_error_count
        {
            self.session.mode = WorkerMode::SingleThreaded;
            warn!(
                worker_errors = self.session.worker_error_count,
                "too many worker errors, falling back to single-threaded uploads"
            );
            self.log(
                "Too many worker errors. Falling back to single-threaded uploads.",
                LogProperties::new(),
                MessageLevel::Information,
            );
        }
        self.session.mode
    }

    fn spawn_worker(&mut self) -> Option<WorkerId> {
        let file = self.session.file.clone()?;
        let id = self.session.next_worker_id;
        self.session.next_worker_id += 1;

        let api = Arc::clone(&self.api);
        let worker: Box<dyn ChunkWorker> = match self.current_mode() {
            WorkerMode::Threaded => Box::new(TaskWorker::spawn(id, file, api, self.tx.clone())),
            WorkerMode::SingleThreaded => Box::new(InlineWorker::new(
                id,
                file,
                api,
                self.tx.clone(),
                self.session.cancel.clone(),
            )),
        };
        self.session.workers.push(worker);
        Some(id)
    }

    fn remove_worker(&mut self, id: WorkerId) {
        if let Some(index) = self.session.worker_index(id) {
            let mut worker = self.session.workers.remove(index);
            worker.terminate();
        }
    }

    /// Terminates `id` and puts a fresh worker to work in its place.
    fn replace_worker(&mut self, id: WorkerId) {
        self.remove_worker(id);
        if self.session.state != UploadState::Uploading {
            return;
        }
        if let Some(new_id) = self.spawn_worker() {
            self.dispatch_next(new_id);
        }
    }

    fn stop_all_workers(&mut self) {
        for mut worker in self.session.workers.drain(..) {
            worker.terminate();
        }
        self.session.drain_in_flight();
    }

    fn dispatch_next(&mut self, worker_id: WorkerId) {
        if self.session.state != UploadState::Uploading {
            return;
        }
        let Some(index) = self.session.worker_index(worker_id) else {
            return;
        };

        if self.session.chunks_failed_count > self.session.max_error_count {
            self.abort_on_errors();
            return;
        }

        let Some(chunk) = self.session.next_chunk() else {
            self.retire_worker(worker_id);
            return;
        };

        let job = ChunkJob {
            epoch: self.session.epoch,
            chunk,
            range: self.session.chunk_range(chunk),
        };
        self.session.in_flight.insert(
            chunk,
            InFlight {
                worker: worker_id,
                started: Instant::now(),
            },
        );
        self.log(
            &format!("Starting upload for chunk: {chunk}"),
            LogProperties::new(),
            MessageLevel::Verbose,
        );

        if let Err(e) = self.session.workers[index].dispatch(job) {
            warn!(chunk, worker = worker_id, error = %e, "chunk dispatch failed");
            self.session.in_flight.remove(&chunk);
            self.session.queue.requeue(chunk);
            self.session.worker_error_count += 1;
            match e {
                WorkerError::Stopped(_) => self.replace_worker(worker_id),
                WorkerError::Cancelled => self.remove_worker(worker_id),
            }
        }
    }

    /// Drops a worker that found nothing left to do.
    fn retire_worker(&mut self, worker_id: WorkerId) {
        self.remove_worker(worker_id);
        debug!(worker = worker_id, remaining = self.session.workers.len(), "worker retired");

        if !self.session.queue.is_empty() || !self.session.in_flight.is_empty() {
            return;
        }
        self.session.end_time = Some(Instant::now());
        match self.session.mode {
            WorkerMode::SingleThreaded => self.finalize(),
            WorkerMode::Threaded => {
                if self.session.workers.is_empty() {
                    self.kick_health();
                }
            }
        }
    }

    fn abort_on_errors(&mut self) {
        if self.session.state == UploadState::Uploading {
            warn!(
                failed = self.session.chunks_failed_count,
                budget = self.session.max_error_count,
                connected = self.session.connected,
                "chunk error budget exhausted"
            );
            if self.session.connected {
                self.error(TOO_MANY_ERRORS, LogProperties::new(), UploadState::FatalError);
            } else {
                self.error(NO_NETWORK, LogProperties::new(), UploadState::Error);
            }
        }
        self.stop_all_workers();
        self.health.stop();
    }

    fn on_worker_report(&mut self, report: WorkerReport) {
        let WorkerReport {
            worker,
            epoch,
            chunk,
            outcome,
        } = report;
        if epoch != self.session.epoch || !self.session.take_in_flight(chunk, worker) {
            debug!(chunk, worker, "ignoring report for a chunk no longer held by its worker");
            return;
        }

        match outcome {
            ChunkOutcome::Uploaded => {
                let s = &mut self.session;
                s.max_error_count += 1;
                s.connected = true;
                s.blocks_completed += 1;
                self.log(
                    &format!("ChunkSucceeded: {chunk}."),
                    LogProperties::new(),
                    MessageLevel::Verbose,
                );
                if self.session.blocks_completed % self.session.progress_update_rate == 0 {
                    self.report_progress();
                }
                self.dispatch_next(worker);
            }
            ChunkOutcome::Rejected(message) => {
                self.session.chunks_failed_count += 1;
                self.session.queue.requeue(chunk);
                self.session.connected = true;
                self.log(
                    &format!("ChunkFailed: {chunk}. {message}"),
                    LogProperties::new(),
                    MessageLevel::Verbose,
                );
                self.dispatch_next(worker);
            }
            ChunkOutcome::Failed(TransportError::Cancelled) => {
                self.session.queue.requeue(chunk);
            }
            ChunkOutcome::Failed(err) => self.on_chunk_failed(worker, chunk, err),
            ChunkOutcome::ReadFailed(reason) => {
                warn!(chunk, worker, %reason, "worker could not read chunk");
                self.session.worker_error_count += 1;
                self.session.chunks_failed_count += 1;
                self.session.queue.requeue(chunk);
                self.log(
                    &format!("Worker error on chunk {chunk}: {reason}"),
                    LogProperties::new(),
                    MessageLevel::Information,
                );
                self.dispatch_next(worker);
            }
        }
    }

    fn on_chunk_failed(&mut self, worker: WorkerId, chunk: u32, err: TransportError) {
        self.session.chunks_failed_count += 1;
        self.session.queue.requeue(chunk);

        let mut props = LogProperties::new();
        if let TransportError::Http {
            status,
            status_text,
        } = &err
        {
            props.insert("StatusCode".into(), json!(status));
            props.insert("StatusText".into(), json!(status_text));
        }
        self.log(&format!("ChunkFailed: {chunk}. {err}"), props, MessageLevel::Verbose);

        if !err.is_network() {
            self.session.connected = true;
            self.dispatch_next(worker);
            return;
        }

        self.session.connected = false;
        match self.session.mode {
            WorkerMode::Threaded => self.dispatch_next(worker),
            WorkerMode::SingleThreaded => {
                let delay = self.config.offline_retry_delay;
                self.log(
                    &format!(
                        "No network detected. Attempting chunk upload again in {} seconds.",
                        delay.as_secs()
                    ),
                    LogProperties::new(),
                    MessageLevel::Information,
                );
                self.send_after(
                    delay,
                    Msg::Redispatch {
                        epoch: self.session.epoch,
                        worker,
                    },
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Health monitor
    // -----------------------------------------------------------------------

    /// Starts a new health chain with an immediate check.
    fn kick_health(&mut self) {
        let generation = self.health.kick();
        self.health_tick(generation);
    }

    fn health_tick(&mut self, generation: u64) {
        if !self.health.is_current(generation) || !self.session.state.is_active() {
            return;
        }

        if self.session.queue.is_empty() && self.session.workers.is_empty() {
            self.session.end_time.get_or_insert_with(Instant::now);
            self.finalize();
        } else {
            let stale = self.health.stale_chunks(&self.session.in_flight, Instant::now());
            for chunk in stale {
                self.evict_stale(chunk);
            }
            if self.session.state == UploadState::Uploading
                && self.session.workers.is_empty()
                && !self.session.queue.is_empty()
            {
                self.init_pool();
            }
        }

        // A nested kick above has already started a newer chain.
        if self.health.is_current(generation) && self.session.state.is_active() {
            self.health.schedule(generation, &self.tx);
        }
    }

    fn evict_stale(&mut self, chunk: u32) {
        let Some(record) = self.session.in_flight.remove(&chunk) else {
            return;
        };
        warn!(chunk, worker = record.worker, "chunk stalled, replacing worker");
        self.session.worker_error_count += 1;
        self.session.queue.requeue(chunk);
        self.log(
            &format!("Chunk {chunk} stalled. Requeuing chunk and replacing its worker."),
            LogProperties::new(),
            MessageLevel::Information,
        );
        self.replace_worker(record.worker);
    }

    // -----------------------------------------------------------------------
    // Verification and completion
    // -----------------------------------------------------------------------

    fn finalize(&mut self) {
        if matches!(
            self.session.state,
            UploadState::Verifying | UploadState::Completed
        ) {
            debug!("finalize already requested");
            return;
        }
        self.stop_all_workers();
        if !self.transition(UploadState::Verifying) {
            return;
        }
        self.log("Verifying upload on server.", LogProperties::new(), MessageLevel::Information);

        let api = Arc::clone(&self.api);
        let epoch = self.session.epoch;
        let callback = self.settings.callback_url().unwrap_or_default();
        self.spawn_call(
            async move { api.finish(&callback).await },
            move |result| Msg::Finished { epoch, result },
        );
    }

    fn on_finished(&mut self, result: Result<FinishedResponse, TransportError>) {
        let resp = match result {
            Ok(resp) => resp,
            Err(TransportError::Cancelled) => return,
            Err(e) => {
                warn!(error = %e, "finalize request failed");
                self.log(
                    &format!("Finalize upload failed. Trying to autorecover... {e}"),
                    LogProperties::new(),
                    MessageLevel::Information,
                );
                if self.session.state == UploadState::Verifying
                    && self.transition(UploadState::Uploading)
                {
                    self.kick_health();
                }
                return;
            }
        };

        let state = self.session.state;
        if state != UploadState::Verifying {
            self.log(
                &format!("Verifying: Upload status has changed, current status: {state}"),
                LogProperties::new(),
                MessageLevel::Information,
            );
            return;
        }

        if resp.is_done() {
            let props = properties(json!({ "location": resp.location }));
            self.log(
                &format!(
                    "UploadFinalized. The service reported the upload as completed. Status message: {}",
                    resp.message
                ),
                props,
                MessageLevel::Information,
            );
            self.complete_upload();
            self.invoke_callback(resp.raw_location.unwrap_or_default(), 0);
        } else if !resp.missing_chunks.is_empty() {
            self.requeue_missing(&resp.missing_chunks);
        } else {
            let message = if resp.message.is_empty() {
                "Upload verification failed."
            } else {
                resp.message.as_str()
            };
            let props = properties(json!({ "state": resp.state }));
            self.error(message, props, UploadState::FatalError);
        }
    }

    fn requeue_missing(&mut self, missing: &[u32]) {
        let count = u32::try_from(missing.len()).unwrap_or(u32::MAX);
        self.session.blocks_completed = self.session.total_blocks.saturating_sub(count);
        self.session.end_time = None;
        self.session.queue.enqueue(missing);
        if !self.transition(UploadState::Uploading) {
            return;
        }
        self.log(
            &format!("Finalizing found {count} missing chunks. Requeuing chunks."),
            properties(json!({ "ChunksMissing": missing })),
            MessageLevel::Information,
        );
        self.bump_ambiguous_progress();

        // Threaded sessions pick the queue up on the next health check.
        if self.session.mode == WorkerMode::SingleThreaded {
            self.init_pool();
        }
    }

    fn complete_upload(&mut self) {
        if self.session.state == UploadState::Completed {
            return;
        }
        let s = &self.session;
        let end = s.end_time.unwrap_or_else(Instant::now);
        let elapsed = end.saturating_duration_since(s.start_time);
        let speed = transfer_rate_mbps(s.blocks_completed, s.chunk_size, s.start_time.elapsed());
        let file_size = s.file_size();
        let stats = UploadStats {
            asset_id: self.settings.asset_id.clone(),
            total_time_in_seconds: format!("{:.1}", elapsed.as_secs_f64()),
            average_speed_in_mbps: speed,
        };

        if !self.transition(UploadState::Completed) {
            return;
        }
        self.health.stop();
        info!(
            asset_id = %stats.asset_id,
            seconds = %stats.total_time_in_seconds,
            mbps = speed,
            "upload completed"
        );
        self.log(
            &format!(
                "UploadCompleted: total time: {} seconds. Average speed: {:.2} Mbps.",
                stats.total_time_in_seconds, speed
            ),
            properties(json!({
                "UploadFileSize": file_size,
                "UploadSpeed": speed,
                "ElapsedSeconds": stats.total_time_in_seconds,
            })),
            MessageLevel::Information,
        );
        self.sink.on_completed(&stats);
    }

    fn invoke_callback(&mut self, location: String, attempt: u32) {
        let Some(base) = self.settings.callback_url() else {
            return;
        };
        let Some(file) = self.session.file.clone() else {
            return;
        };
        let url = callback_url(&base, &self.settings.asset_id, file.name(), file.size(), &location);
        self.log(
            &format!("Callback was supplied. Invoking callback on: {url}"),
            LogProperties::new(),
            MessageLevel::Information,
        );

        let api = Arc::clone(&self.api);
        let epoch = self.session.epoch;
        self.spawn_call(
            async move { api.invoke_callback(&url).await },
            move |result| Msg::Callback {
                epoch,
                attempt,
                location,
                result,
            },
        );
    }

    fn on_callback(&mut self, attempt: u32, location: String, result: Result<(), TransportError>) {
        let err = match result {
            Ok(()) => {
                self.log("Callback succeeded.", LogProperties::new(), MessageLevel::Information);
                return;
            }
            Err(TransportError::Cancelled) => return,
            Err(e) => e,
        };

        let props = properties(json!({ "FailedCallback": self.settings.callback_url() }));
        self.log(&format!("Callback failed. Status: {err}"), props, MessageLevel::Information);

        let retry = attempt + 1;
        let policy = &self.config.callback_retry;
        if retry > policy.max_retries {
            self.log(
                "Callback retries depleted. The upload completed but the uploader was unable \
                 to perform a successful callback notifying completion.",
                LogProperties::new(),
                MessageLevel::Information,
            );
            return;
        }
        let delay = policy.delay_for_retry(retry);
        debug!(retry, ?delay, "scheduling callback retry");
        self.send_after(
            delay,
            Msg::RetryCallback {
                epoch: self.session.epoch,
                attempt: retry,
                location,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Host controls
    // -----------------------------------------------------------------------

    fn pause(&mut self) {
        if self.session.state != UploadState::Uploading {
            self.log(
                &format!("Cannot pause an upload that is {}.", self.session.state),
                LogProperties::new(),
                MessageLevel::Error,
            );
            return;
        }
        if self.transition(UploadState::Paused) {
            self.log("UploadPaused", LogProperties::new(), MessageLevel::Information);
        }
    }

    fn resume(&mut self) {
        if self.session.state != UploadState::Paused {
            self.log(
                &format!("Cannot continue an upload that is {}.", self.session.state),
                LogProperties::new(),
                MessageLevel::Error,
            );
            return;
        }
        if !self.transition(UploadState::Uploading) {
            return;
        }
        self.log("UploadResumed", LogProperties::new(), MessageLevel::Information);

        for worker in self.session.idle_workers() {
            self.dispatch_next(worker);
        }
        if self.session.workers.is_empty() && !self.session.queue.is_empty() {
            self.init_pool();
        }
        self.kick_health();
    }

    fn cancel(&mut self) {
        let state = self.session.state;
        if !transition_allowed(state, UploadState::Cancelled) {
            self.log(
                &format!("Cannot cancel an upload that is {state}."),
                LogProperties::new(),
                MessageLevel::Error,
            );
            return;
        }
        self.log("UploadCancelled", LogProperties::new(), MessageLevel::Information);

        let api = Arc::clone(&self.api);
        let epoch = self.session.epoch;
        self.spawn_call(
            async move { api.cancel().await },
            move |result| Msg::CancelDone { epoch, result },
        );
    }

    fn on_cancelled(&mut self, result: Result<ServiceResponse, TransportError>) {
        match result {
            Ok(resp) => {
                let message = resp.message.as_deref().unwrap_or("Upload cancelled.");
                self.log(message, LogProperties::new(), MessageLevel::Information);
                if self.transition(UploadState::Cancelled) {
                    self.stop_all_workers();
                    self.health.stop();
                    self.session.cancel.cancel();
                }
            }
            Err(TransportError::Cancelled) => {}
            Err(e) => self.log(
                &format!("Cancel request failed: {e}"),
                LogProperties::new(),
                MessageLevel::Information,
            ),
        }
    }

    fn restart(&mut self) {
        if self.session.file.is_none() || self.session.total_blocks == 0 {
            self.log(
                "Cannot restart an upload that has not been initialized.",
                LogProperties::new(),
                MessageLevel::Error,
            );
            return;
        }
        let state = self.session.state;
        if !transition_allowed(state, UploadState::Uploading) {
            self.log(
                &format!("Cannot restart an upload that is {state}."),
                LogProperties::new(),
                MessageLevel::Error,
            );
            return;
        }
        self.log("Restarting upload.", LogProperties::new(), MessageLevel::Information);

        let api = Arc::clone(&self.api);
        let epoch = self.session.epoch;
        self.spawn_call(
            async move { api.restart().await },
            move |result| Msg::RestartDone { epoch, result },
        );
    }

    fn on_restarted(&mut self, result: Result<ServiceResponse, TransportError>) {
        let resp = match result {
            Ok(resp) => resp,
            Err(TransportError::Cancelled) => return,
            Err(e) => {
                self.log(&format!("Restart failed: {e}"), LogProperties::new(), MessageLevel::Error);
                return;
            }
        };
        if resp.error {
            let reason = resp.message.as_deref().unwrap_or("service rejected the restart");
            self.log(&format!("Restart failed: {reason}"), LogProperties::new(), MessageLevel::Error);
            return;
        }

        self.stop_all_workers();
        let s = &mut self.session;
        s.queue.clear();
        s.in_flight.clear();
        let all: Vec<u32> = (1..=s.total_blocks).collect();
        s.queue.enqueue(&all);
        s.blocks_completed = 0;
        s.chunks_failed_count = 0;
        s.worker_error_count = 0;
        s.rates.clear();
        s.start_time = Instant::now();
        s.end_time = None;

        if !self.transition(UploadState::Uploading) {
            return;
        }
        self.log("Upload restarted.", LogProperties::new(), MessageLevel::Information);
        self.init_pool();
        self.kick_health();
    }

    fn reset(&mut self) {
        self.begin_session(None);
        self.set_state(UploadState::New);
        self.log("Upload reset.", LogProperties::new(), MessageLevel::Information);
    }
}
