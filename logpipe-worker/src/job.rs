//! Job boundary
//!
//! The log shipping layer only needs two things from a job: its payload and
//! a log writer bound to the job's identity. Lifecycle reporting lives
//! elsewhere.

use logpipe_core::dto::job::JobPayload;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::service::{LogWriter, SinkLogWriter, SinkRegistry, WriterOptions};

/// A job as seen by the log shipping layer
pub trait Job: Send + Sync {
    fn payload(&self) -> &JobPayload;

    /// Maximum run time of the job
    fn hard_timeout(&self) -> Duration;

    /// Allowed silence between two log writes
    fn log_silence_timeout(&self) -> Duration;

    /// Creates the job's log writer
    ///
    /// Called once per job, before any output is produced. Fails with
    /// `Cancelled` if `ctx` is already cancelled.
    fn log_writer(&self, ctx: &CancellationToken) -> Result<Box<dyn LogWriter>>;
}

/// Job executed by this worker process
pub struct LocalJob {
    payload: JobPayload,
    log_parts_url: String,
    buffer_size: usize,
    writer_options: WriterOptions,
    hard_timeout: Duration,
    registry: Arc<SinkRegistry>,
}

impl LocalJob {
    /// Creates a job, resolving its limits from config and payload
    pub fn new(payload: JobPayload, config: &Config, registry: Arc<SinkRegistry>) -> Self {
        Self {
            writer_options: config.writer_options(&payload.timeouts),
            hard_timeout: config.hard_timeout_for(&payload.timeouts),
            log_parts_url: config.log_parts_url.clone(),
            buffer_size: config.log_buffer_size,
            payload,
            registry,
        }
    }

    pub fn id(&self) -> u64 {
        self.payload.job.id
    }
}

impl Job for LocalJob {
    fn payload(&self) -> &JobPayload {
        &self.payload
    }

    fn hard_timeout(&self) -> Duration {
        self.hard_timeout
    }

    fn log_silence_timeout(&self) -> Duration {
        self.writer_options.silence_timeout
    }

    fn log_writer(&self, ctx: &CancellationToken) -> Result<Box<dyn LogWriter>> {
        let sink = self
            .registry
            .get_or_create(&self.log_parts_url, ctx, self.buffer_size)?;

        Ok(Box::new(SinkLogWriter::new(
            self.id(),
            sink,
            self.writer_options,
            ctx.clone(),
        )))
    }
}
