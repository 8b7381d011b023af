//! Job domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// State a job finished with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishState {
    Passed,
    Failed,
    Errored,
    Cancelled,
}

impl FinishState {
    /// Maps a process exit code to a finish state
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            FinishState::Passed
        } else {
            FinishState::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishState::Passed => "passed",
            FinishState::Failed => "failed",
            FinishState::Errored => "errored",
            FinishState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FinishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
