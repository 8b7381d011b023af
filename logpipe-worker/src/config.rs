//! Worker configuration
//!
//! Defines all configurable parameters for log shipping: the destination
//! endpoint, buffering and flush behaviour, and per-job log limits.

use logpipe_core::dto::job::TimeoutsPayload;
use std::time::Duration;

use crate::service::{RetryPolicy, SinkOptions, WriterOptions};

const DEFAULT_LOG_PARTS_URL: &str = "http://localhost:8080/log-parts/multi";

/// Worker configuration
///
/// All timeouts and limits are configurable to allow tuning for different
/// deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker instance
    pub worker_id: String,

    /// Endpoint receiving batches of log parts
    pub log_parts_url: String,

    /// Token sent with every delivery request
    pub log_parts_token: Option<String>,

    /// Number of buffered log parts that forces a flush
    pub log_buffer_size: usize,

    /// How often buffered log parts are flushed regardless of volume
    pub flush_interval: Duration,

    /// Maximum silence between two writes before a job is stalled
    pub log_silence_timeout: Duration,

    /// Maximum time a job can run before it is killed
    pub hard_timeout: Duration,

    /// Maximum log size in bytes before truncation
    pub max_log_length: usize,

    /// Maximum content size of a single log part
    pub log_part_size: usize,

    /// Delivery attempts per flush before giving up
    pub delivery_attempts: u32,

    /// Timeout of a single delivery request
    pub http_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, log_parts_url: String) -> Self {
        Self {
            worker_id,
            log_parts_url,
            log_parts_token: None,
            log_buffer_size: 1000,
            flush_interval: Duration::from_millis(500),
            log_silence_timeout: Duration::from_secs(600), // 10 minutes
            hard_timeout: Duration::from_secs(3000),       // 50 minutes
            max_log_length: 4_500_000,
            log_part_size: 8192,
            delivery_attempts: 3,
            http_timeout: Duration::from_secs(10),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - LOG_PARTS_URL (optional, default: local aggregator)
    /// - WORKER_ID (optional, default: random UUID)
    /// - LOG_PARTS_TOKEN (optional)
    /// - LOG_BUFFER_SIZE (optional, default: 1000)
    /// - LOG_FLUSH_INTERVAL (optional, milliseconds, default: 500)
    /// - LOG_SILENCE_TIMEOUT (optional, seconds, default: 600)
    /// - HARD_TIMEOUT (optional, seconds, default: 3000)
    /// - MAX_LOG_LENGTH (optional, bytes, default: 4500000)
    /// - LOG_PART_SIZE (optional, bytes, default: 8192)
    /// - LOG_DELIVERY_ATTEMPTS (optional, default: 3)
    /// - HTTP_TIMEOUT (optional, seconds, default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let log_parts_url = std::env::var("LOG_PARTS_URL")
            .unwrap_or_else(|_| DEFAULT_LOG_PARTS_URL.to_string());

        let worker_id =
            std::env::var("WORKER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let mut config = Self::new(worker_id, log_parts_url);

        config.log_parts_token = std::env::var("LOG_PARTS_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        if let Some(size) = env_parse::<usize>("LOG_BUFFER_SIZE")? {
            config.log_buffer_size = size;
        }
        if let Some(ms) = env_parse::<u64>("LOG_FLUSH_INTERVAL")? {
            config.flush_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("LOG_SILENCE_TIMEOUT")? {
            config.log_silence_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("HARD_TIMEOUT")? {
            config.hard_timeout = Duration::from_secs(secs);
        }
        if let Some(length) = env_parse::<usize>("MAX_LOG_LENGTH")? {
            config.max_log_length = length;
        }
        if let Some(size) = env_parse::<usize>("LOG_PART_SIZE")? {
            config.log_part_size = size;
        }
        if let Some(attempts) = env_parse::<u32>("LOG_DELIVERY_ATTEMPTS")? {
            config.delivery_attempts = attempts;
        }
        if let Some(secs) = env_parse::<u64>("HTTP_TIMEOUT")? {
            config.http_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.log_parts_url.starts_with("http://") && !self.log_parts_url.starts_with("https://")
        {
            anyhow::bail!("log_parts_url must start with http:// or https://");
        }

        if self.log_buffer_size == 0 {
            anyhow::bail!("log_buffer_size must be greater than 0");
        }

        if self.flush_interval.is_zero() {
            anyhow::bail!("flush_interval must be greater than 0");
        }

        if self.log_silence_timeout.is_zero() || self.hard_timeout.is_zero() {
            anyhow::bail!("job timeouts must be greater than 0");
        }

        if self.max_log_length == 0 {
            anyhow::bail!("max_log_length must be greater than 0");
        }

        if self.log_part_size < 4 {
            anyhow::bail!("log_part_size must be at least 4 bytes");
        }

        if self.delivery_attempts == 0 {
            anyhow::bail!("delivery_attempts must be greater than 0");
        }

        Ok(())
    }

    /// Flush settings for the sink registry
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            flush_interval: self.flush_interval,
            retry: RetryPolicy {
                max_attempts: self.delivery_attempts,
                ..RetryPolicy::default()
            },
        }
    }

    /// Writer limits for a job, honouring its custom log silence timeout
    pub fn writer_options(&self, timeouts: &TimeoutsPayload) -> WriterOptions {
        WriterOptions {
            silence_timeout: timeouts.log_silence().unwrap_or(self.log_silence_timeout),
            max_log_length: self.max_log_length,
            max_part_size: self.log_part_size,
        }
    }

    /// Hard limit for a job, honouring its custom value
    pub fn hard_timeout_for(&self, timeouts: &TimeoutsPayload) -> Duration {
        timeouts.hard_limit().unwrap_or(self.hard_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            DEFAULT_LOG_PARTS_URL.to_string(),
        )
    }
}

/// Reads an optional variable, failing on values that do not parse
fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}
