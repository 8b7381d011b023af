//! Log parts repository
//!
//! Handles posting batches of log parts to the aggregator.
//! This is a stateless HTTP client - buffering and retries are handled by the service layer.

use async_trait::async_trait;
use logpipe_client::{LogPartClient, Result};
use logpipe_core::domain::log::LogPart;

/// Repository trait for delivering log parts
#[async_trait]
pub trait LogPartRepository: Send + Sync {
    /// Sends one batch of log parts to `url`
    ///
    /// # Arguments
    /// * `url` - Destination endpoint
    /// * `parts` - The parts to send, in delivery order
    async fn send_parts(&self, url: &str, parts: &[LogPart]) -> Result<()>;
}

/// HTTP implementation of LogPartRepository
pub struct HttpLogPartRepository {
    client: LogPartClient,
}

impl HttpLogPartRepository {
    /// Creates a new HTTP log part repository
    ///
    /// # Arguments
    /// * `client` - Configured client (timeouts, token)
    pub fn new(client: LogPartClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogPartRepository for HttpLogPartRepository {
    async fn send_parts(&self, url: &str, parts: &[LogPart]) -> Result<()> {
        self.client.send_parts(url, parts).await
    }
}
