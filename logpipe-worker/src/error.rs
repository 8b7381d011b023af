//! Error types for log shipping

use thiserror::Error;

/// Result type alias for log shipping operations
pub type Result<T> = std::result::Result<T, LogError>;

/// Errors surfaced by log writers and sinks
///
/// Truncation is deliberately absent: hitting the maximum log length is
/// reported in the log stream itself and through `LogWriter::is_truncated`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// The log writer was already closed
    #[error("log writer is closed")]
    Closed,

    /// The operation's cancellation token was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The endpoint rejected the batch or could not be reached
    #[error("failed to deliver log parts to {url} after {attempts} attempt(s): {message}")]
    Delivery {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The batch could not be encoded for delivery
    #[error("failed to encode log parts: {0}")]
    Encode(String),
}

impl LogError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
