//! Log part delivery endpoint

use crate::LogPartClient;
use crate::error::Result;
use logpipe_core::domain::log::LogPart;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

impl LogPartClient {
    /// Post a batch of log parts to `url`
    ///
    /// The body is a JSON array of parts in the given order. A 2xx response
    /// means the whole batch was accepted. An empty batch is not sent.
    ///
    /// # Arguments
    /// * `url` - Full URL of the multi-part endpoint
    /// * `parts` - The parts to deliver, in delivery order
    pub async fn send_parts(&self, url: &str, parts: &[LogPart]) -> Result<()> {
        if parts.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(parts)?;

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("token {}", token));
        }

        debug!("Posting {} log part(s) to {}", parts.len(), url);
        let response = request.send().await?;

        self.handle_empty_response(response).await
    }
}
