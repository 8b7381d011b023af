//! Job payload DTOs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payload describing a job handed to the worker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub job: JobInfo,
    #[serde(rename = "source", default)]
    pub build: BuildInfo,
    #[serde(default)]
    pub repository: RepositoryInfo,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub timeouts: TimeoutsPayload,
}

/// Identity of the job itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: u64,
    #[serde(default)]
    pub number: String,
}

/// Build the job belongs to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildInfo {
    pub id: u64,
    #[serde(default)]
    pub number: String,
}

/// Repository the build runs for
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: u64,
    #[serde(default)]
    pub slug: String,
}

/// Custom per-job timeouts, in seconds. `0` means "use the worker default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsPayload {
    #[serde(default)]
    pub hard_limit: u64,
    #[serde(default)]
    pub log_silence: u64,
}

impl TimeoutsPayload {
    /// Custom hard limit, if one was set
    pub fn hard_limit(&self) -> Option<Duration> {
        (self.hard_limit > 0).then(|| Duration::from_secs(self.hard_limit))
    }

    /// Custom log silence timeout, if one was set
    pub fn log_silence(&self) -> Option<Duration> {
        (self.log_silence > 0).then(|| Duration::from_secs(self.log_silence))
    }
}
