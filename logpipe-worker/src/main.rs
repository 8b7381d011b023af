//! Logpipe Worker
//!
//! Runs a single job command and ships its output, in order, to a log part
//! endpoint.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repository: HTTP delivery of log part batches
//! - Services: Log writer, per-URL sinks with background flushing, registry
//! - Execution: Child process supervision (silence, hard limit, cancellation)
//!
//! Output written by the job is split into numbered parts, buffered per
//! destination URL and flushed periodically or when the buffer fills up.
//! On exit every sink gets a final flush.

mod config;
mod error;
mod execution;
mod job;
mod repository;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use logpipe_client::LogPartClient;
use logpipe_core::domain::job::FinishState;
use logpipe_core::dto::job::{JobInfo, JobPayload};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::job::LocalJob;
use crate::repository::HttpLogPartRepository;
use crate::service::SinkRegistry;

#[derive(Parser)]
#[command(name = "logpipe-worker")]
#[command(about = "Run a job command and ship its log", long_about = None)]
struct Cli {
    /// Job id used when no payload file is given
    #[arg(long, env = "JOB_ID", default_value_t = 1)]
    job_id: u64,

    /// JSON job payload (job, repository, timeouts, ...)
    #[arg(long, env = "JOB_PAYLOAD")]
    payload: Option<PathBuf>,

    /// Command to run, with its arguments
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logpipe_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Starting Logpipe Worker");

    let config = load_config()?;
    info!(
        "Loaded configuration: worker_id={}, log_parts_url={}",
        config.worker_id, config.log_parts_url
    );

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let mut client = LogPartClient::with_client(http);
    if let Some(token) = &config.log_parts_token {
        client = client.with_token(token.clone());
    }

    let repository = Arc::new(HttpLogPartRepository::new(client));
    let registry = Arc::new(SinkRegistry::new(repository, config.sink_options()));

    let payload = match &cli.payload {
        Some(path) => load_payload(path).await?,
        None => JobPayload {
            job: JobInfo {
                id: cli.job_id,
                number: cli.job_id.to_string(),
            },
            ..JobPayload::default()
        },
    };

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling job");
            interrupt.cancel();
        }
    });

    let job = LocalJob::new(payload, &config, Arc::clone(&registry));
    let outcome = execution::run_command(&job, &cli.command, ctx).await;

    // Flush whatever is still buffered, even if the job failed to run
    if let Err(e) = registry.shutdown().await {
        error!("Log shipping did not complete: {}", e);
        if let Some(sink) = registry.get(&config.log_parts_url) {
            let lost = sink.drain_buffered();
            error!("Dropping {} undelivered log part(s)", lost.len());
        }
    }

    let state = outcome?;
    info!("Worker finished, job {} {}", job.id(), state);

    if state != FinishState::Passed {
        std::process::exit(1);
    }
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            warn!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn load_payload(path: &Path) -> Result<JobPayload> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read job payload {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse job payload {}", path.display()))
}
