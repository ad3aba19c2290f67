//! fus-upload entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Upload a file through the chunked upload service.
#[derive(Debug, Default, Parser)]
#[command(name = "fus-upload", version, about)]
pub struct Cli {
    /// File to upload.
    pub file: PathBuf,

    /// TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub asset_id: Option<String>,

    /// Base URL of the upload service.
    #[arg(long)]
    pub upload_domain: Option<String>,

    #[arg(long)]
    pub tenant: Option<String>,

    /// Upload token, already url-encoded.
    #[arg(long)]
    pub token: Option<String>,

    /// URL notified once the upload is complete.
    #[arg(long)]
    pub callback_url: Option<String>,

    /// Number of parallel upload workers.
    #[arg(long)]
    pub uploaders: Option<usize>,

    /// Upload with overlapping requests on a single thread.
    #[arg(long)]
    pub single_thread: bool,

    /// Log every chunk (same as `log_to_console = true`).
    #[arg(short, long)]
    pub verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply(&cli);

    // Initialize structured logging.
    let default_level = if config.upload.log_to_console { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        asset_id = %config.upload.asset_id,
        file = %cli.file.display(),
        "starting fus-upload"
    );
    if let Some(source) = &config.source {
        tracing::debug!(path = %source.display(), "configuration loaded");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let state = rt.block_on(app::run(config, cli.file))?;

    if !app::succeeded(state) {
        anyhow::bail!("upload ended in state {state}");
    }
    tracing::info!("upload finished");
    Ok(())
}
