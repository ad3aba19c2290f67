use std::time::Duration;

/// Header carrying the correlation id on every upload-service request.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Query parameter carrying the url-encoded upload token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// How often the health monitor inspects the worker pool.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Age after which an in-flight chunk is considered stuck.
///
/// There is no per-request timeout; this is the only liveness backstop
/// for a chunk whose worker never answers.
pub const STALE_CHUNK_AGE: Duration = Duration::from_secs(40);

/// Upper bound on overlapping requests in single-threaded mode.
pub const MAX_CONCURRENT_UPLOADS: usize = 10;

/// Default number of threaded workers when the host does not choose.
pub const DEFAULT_UPLOADERS: usize = 4;

/// Failed-chunk budget before the upload aborts. Grows by one per success.
pub const DEFAULT_MAX_ERROR_COUNT: u32 = 20;

/// Wait before retrying a chunk after a network-level failure.
pub const OFFLINE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Number of instantaneous rate samples kept for the moving average.
pub const TRANSFER_RATE_SAMPLES: usize = 100;

/// Attempts made to notify the completion callback URL.
pub const CALLBACK_RETRY_COUNT: u32 = 5;

/// Delay before the first callback retry.
pub const CALLBACK_INITIAL_DELAY: Duration = Duration::from_millis(10);

/// Multiplier applied to the callback delay after each failure (10ms, 50ms, 250ms, ...).
pub const CALLBACK_BACKOFF_FACTOR: f64 = 5.0;

/// Cap on a single callback retry delay.
pub const CALLBACK_MAX_DELAY: Duration = Duration::from_secs(30);

/// Prefix stamped on the verbose form of every emitted message.
pub const VERBOSE_MESSAGE_PREFIX: &str = "fus-uploader - ";

/// Server state reported by `upload/finished` once every chunk is stored.
pub const FINISHED_STATE_DONE: &str = "Done";
