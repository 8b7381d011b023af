//! Error types for the logpipe client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when delivering log parts
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response was received
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        message: String,
    },

    /// Batch could not be encoded
    #[error("Failed to encode request: {0}")]
    EncodeError(#[from] serde_json::Error),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }

    /// Check if sending the same request again could succeed
    ///
    /// Transport failures, 5xx, 408 and 429 are retryable. Encoding failures
    /// and other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::EncodeError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = ClientError::api_error(503, "unavailable");
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
        assert!(err.is_retryable());

        let err = ClientError::api_error(422, "bad part");
        assert!(err.is_client_error());
        assert!(!err.is_retryable());

        assert!(ClientError::api_error(429, "slow down").is_retryable());
    }
}
