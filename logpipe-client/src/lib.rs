//! Logpipe HTTP Client
//!
//! A small, type-safe HTTP client for delivering batches of log parts to a
//! log aggregation endpoint.
//!
//! # Example
//!
//! ```no_run
//! use logpipe_client::LogPartClient;
//! use logpipe_core::domain::log::LogPart;
//!
//! #[tokio::main]
//! async fn main() -> logpipe_client::Result<()> {
//!     let client = LogPartClient::new();
//!
//!     client
//!         .send_parts(
//!             "http://localhost:8080/log-parts/multi",
//!             &[LogPart::new(1, 0, "hello\n")],
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod parts;

pub use error::{ClientError, Result};

use reqwest::Client;

/// HTTP client for log part endpoints
///
/// The client is not bound to a single destination: every call names the
/// URL it posts to, so one client can serve all sinks of a worker.
#[derive(Debug, Clone)]
pub struct LogPartClient {
    /// HTTP client instance
    client: Client,
    /// Token sent as `Authorization: token <token>`, if configured
    token: Option<String>,
}

impl LogPartClient {
    /// Create a new client with a default HTTP client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            token: None,
        }
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Example
    /// ```
    /// use logpipe_client::LogPartClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(10))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = LogPartClient::with_client(http_client);
    /// ```
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            token: None,
        }
    }

    /// Attach an authorization token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Whether an authorization token is configured
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response that carries no meaningful content
    ///
    /// This method checks the status code and returns an error if the request failed.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

impl Default for LogPartClient {
    fn default() -> Self {
        Self::new()
    }
}
