//! Upload settings and engine tunables.

use std::time::Duration;

use fus_protocol::constants::{
    CALLBACK_BACKOFF_FACTOR, CALLBACK_INITIAL_DELAY, CALLBACK_MAX_DELAY, CALLBACK_RETRY_COUNT,
    DEFAULT_MAX_ERROR_COUNT, DEFAULT_UPLOADERS, HEALTH_CHECK_INTERVAL, MAX_CONCURRENT_UPLOADS,
    OFFLINE_RETRY_DELAY, STALE_CHUNK_AGE,
};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// Identity, auth and behaviour flags for one uploader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Opaque asset identifier issued by the service.
    pub asset_id: String,
    /// Base URL of the upload service, without a trailing slash.
    pub upload_domain: String,
    pub tenant: String,
    /// Upload token, already url-encoded.
    pub url_encoded_token: String,

    /// URL notified once the service reports the upload as done.
    pub callback_url: Option<String>,
    /// Defaults to the asset id.
    pub correlation_id: Option<String>,
    /// Added to every message when set.
    pub correlation_vector: Option<String>,
    pub log_to_console: bool,
    /// Threaded worker count; defaults to 4.
    pub uploaders: Option<usize>,
    /// Skip worker threads and use overlapping requests on the coordinator.
    pub force_single_thread: bool,
}

impl UploadSettings {
    /// Messages for every required field left empty, in reporting order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.asset_id.is_empty() {
            missing.push("An AssetId must be specified.");
        }
        if self.url_encoded_token.is_empty() {
            missing.push("The upload UrlEncodedToken must be specified.");
        }
        if self.upload_domain.is_empty() {
            missing.push("The UploadDomain must be specified.");
        }
        if self.tenant.is_empty() {
            missing.push("The Tenant name must be specified.");
        }
        missing
    }

    pub fn correlation_id(&self) -> &str {
        match self.correlation_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.asset_id,
        }
    }

    /// The decoded callback URL, if one was configured.
    pub fn callback_url(&self) -> Option<String> {
        let url = self.callback_url.as_deref().filter(|u| !u.is_empty())?;
        Some(percent_decode_str(url).decode_utf8_lossy().into_owned())
    }

    /// Threaded worker count, at least one.
    pub fn uploaders(&self) -> usize {
        self.uploaders.unwrap_or(DEFAULT_UPLOADERS).max(1)
    }
}

/// Retry policy for the completion callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackRetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
}

impl Default for CallbackRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: CALLBACK_RETRY_COUNT,
            initial_delay: CALLBACK_INITIAL_DELAY,
            max_delay: CALLBACK_MAX_DELAY,
            backoff_factor: CALLBACK_BACKOFF_FACTOR,
        }
    }
}

impl CallbackRetryConfig {
    /// Calculates the delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Timing and budget tunables of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct UploaderConfig {
    pub health_check_interval: Duration,
    pub stale_chunk_age: Duration,
    /// Overlapping requests allowed in single-threaded mode.
    pub max_concurrent_uploads: usize,
    /// Initial failed-chunk budget.
    pub max_error_count: u32,
    /// Wait before retrying after a network failure in single-threaded mode.
    pub offline_retry_delay: Duration,
    pub callback_retry: CallbackRetryConfig,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            health_check_interval: HEALTH_CHECK_INTERVAL,
            stale_chunk_age: STALE_CHUNK_AGE,
            max_concurrent_uploads: MAX_CONCURRENT_UPLOADS,
            max_error_count: DEFAULT_MAX_ERROR_COUNT,
            offline_retry_delay: OFFLINE_RETRY_DELAY,
            callback_retry: CallbackRetryConfig::default(),
        }
    }
}
