//! In-memory repository for tests

use async_trait::async_trait;
use logpipe_client::{ClientError, Result};
use logpipe_core::domain::log::LogPart;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::LogPartRepository;

/// Records every delivered batch instead of sending it
pub struct RecordingRepository {
    batches: Mutex<Vec<Vec<LogPart>>>,
    attempted_sizes: Mutex<Vec<usize>>,
    delivered: watch::Sender<usize>,
    attempts: watch::Sender<usize>,
    failures_left: AtomicU32,
    hang: bool,
}

impl RecordingRepository {
    pub fn new() -> Arc<Self> {
        Self::build(0, false)
    }

    /// Fails the first `failures` calls with a 503
    pub fn failing(failures: u32) -> Arc<Self> {
        Self::build(failures, false)
    }

    /// Never completes a request
    pub fn hanging() -> Arc<Self> {
        Self::build(0, true)
    }

    fn build(failures: u32, hang: bool) -> Arc<Self> {
        let (delivered, _) = watch::channel(0);
        let (attempts, _) = watch::channel(0);
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            attempted_sizes: Mutex::new(Vec::new()),
            delivered,
            attempts,
            failures_left: AtomicU32::new(failures),
            hang,
        })
    }

    /// Successfully delivered batches, in delivery order
    pub fn batches(&self) -> Vec<Vec<LogPart>> {
        self.batches.lock().unwrap().clone()
    }

    /// All parts delivered for one job, in delivery order
    pub fn parts_for(&self, job_id: u64) -> Vec<LogPart> {
        self.batches()
            .into_iter()
            .flatten()
            .filter(|part| part.job_id == job_id)
            .collect()
    }

    /// Batch size of every send attempt, failed ones included
    pub fn attempted_sizes(&self) -> Vec<usize> {
        self.attempted_sizes.lock().unwrap().clone()
    }

    /// Number of send attempts, failed ones included
    pub fn attempts(&self) -> usize {
        *self.attempts.borrow()
    }

    /// Waits until at least `count` send attempts were made
    pub async fn wait_for_attempts(&self, count: usize) {
        let mut rx = self.attempts.subscribe();
        rx.wait_for(|attempts| *attempts >= count).await.unwrap();
    }

    /// Waits until at least `count` batches were delivered
    pub async fn wait_for_batches(&self, count: usize) {
        let mut rx = self.delivered.subscribe();
        rx.wait_for(|delivered| *delivered >= count).await.unwrap();
    }
}

#[async_trait]
impl LogPartRepository for RecordingRepository {
    async fn send_parts(&self, _url: &str, parts: &[LogPart]) -> Result<()> {
        self.attempted_sizes.lock().unwrap().push(parts.len());
        self.attempts.send_modify(|attempts| *attempts += 1);

        if self.hang {
            std::future::pending::<()>().await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::api_error(503, "unavailable"));
        }

        self.batches.lock().unwrap().push(parts.to_vec());
        self.delivered.send_modify(|delivered| *delivered += 1);
        Ok(())
    }
}
