//! Client configuration.
//!
//! Settings come from an optional TOML file, then command-line flags:
//!
//! ```toml
//! [upload]
//! asset_id = "..."
//! upload_domain = "https://upload.example.com"
//! tenant = "..."
//! url_encoded_token = "..."
//!
//! [engine]
//! health_check_interval_secs = 5
//! ```
//!
//! Without `--config`, `~/.config/fus-upload/config.toml` is read when present.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use fus_uploader::{UploadSettings, UploaderConfig};
use serde::{Deserialize, Serialize};

use crate::Cli;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upload: UploadSettings,
    pub engine: EngineConfig,
    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Engine tunables, in whole seconds where they are durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub health_check_interval_secs: u64,
    pub stale_chunk_age_secs: u64,
    pub offline_retry_delay_secs: u64,
    pub max_concurrent_uploads: usize,
    pub max_error_count: u32,
    pub callback_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let defaults = UploaderConfig::default();
        Self {
            health_check_interval_secs: defaults.health_check_interval.as_secs(),
            stale_chunk_age_secs: defaults.stale_chunk_age.as_secs(),
            offline_retry_delay_secs: defaults.offline_retry_delay.as_secs(),
            max_concurrent_uploads: defaults.max_concurrent_uploads,
            max_error_count: defaults.max_error_count,
            callback_retries: defaults.callback_retry.max_retries,
        }
    }
}

impl EngineConfig {
    pub fn to_uploader_config(&self) -> UploaderConfig {
        let mut config = UploaderConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_secs.max(1)),
            stale_chunk_age: Duration::from_secs(self.stale_chunk_age_secs),
            offline_retry_delay: Duration::from_secs(self.offline_retry_delay_secs),
            max_concurrent_uploads: self.max_concurrent_uploads,
            max_error_count: self.max_error_count,
            ..UploaderConfig::default()
        };
        config.callback_retry.max_retries = self.callback_retries;
        config
    }
}

impl Config {
    /// Loads `path`, or the default location when it exists, or defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => match default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, cli: &Cli) {
        let upload = &mut self.upload;
        if let Some(asset_id) = &cli.asset_id {
            upload.asset_id = asset_id.clone();
        }
        if let Some(domain) = &cli.upload_domain {
            upload.upload_domain = domain.trim_end_matches('/').to_string();
        }
        if let Some(tenant) = &cli.tenant {
            upload.tenant = tenant.clone();
        }
        if let Some(token) = &cli.token {
            upload.url_encoded_token = token.clone();
        }
        if let Some(callback) = &cli.callback_url {
            upload.callback_url = Some(callback.clone());
        }
        if cli.uploaders.is_some() {
            upload.uploaders = cli.uploaders;
        }
        upload.force_single_thread |= cli.single_thread;
        upload.log_to_console |= cli.verbose;
    }
}

/// Returns the platform-specific configuration file path.
fn default_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").ok()?;
        Some(PathBuf::from(appdata).join("fus-upload").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").ok()?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("fus-upload")
                .join("config.toml"),
        )
    }
}
