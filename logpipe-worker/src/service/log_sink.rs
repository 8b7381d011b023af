//! Log part sink
//!
//! Buffers log parts from every job that ships to the same URL and delivers
//! them as batched requests. Two independent triggers flush the buffer:
//! a fixed interval, and the buffer reaching its capacity.
//!
//! The buffer lock is only held to append or drain; delivery happens with
//! the buffer unlocked so producers never wait on the network. Flushes are
//! serialized by a separate async lock, which keeps batches in drain order.

use logpipe_client::ClientError;
use logpipe_core::domain::log::LogPart;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{LogError, Result};
use crate::repository::LogPartRepository;

/// Bounded retry with exponential backoff for a single flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per flush, first one included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Flush behaviour shared by all sinks of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    /// Period of the background flush
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Default)]
struct SinkState {
    parts: VecDeque<LogPart>,
    /// Parts drained by the running flush and not yet delivered or requeued
    in_flight: usize,
    /// Last delivery failure per job, cleared once the job's parts get through
    failures: HashMap<u64, LogError>,
}

/// Buffering delivery sink for one destination URL
pub struct LogPartSink {
    url: String,
    capacity: usize,
    options: SinkOptions,
    repository: Arc<dyn LogPartRepository>,
    state: Mutex<SinkState>,
    flush_lock: tokio::sync::Mutex<()>,
    /// Wakes the background flusher before its next tick
    flush_wanted: Notify,
    /// Wakes producers waiting for room in a full buffer
    drained: Notify,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl LogPartSink {
    /// Creates a sink and starts its background flusher
    ///
    /// Must be called from within a tokio runtime. The flusher runs until
    /// `cancel` is cancelled or the sink is closed.
    ///
    /// # Arguments
    /// * `url` - Destination endpoint
    /// * `capacity` - Buffered parts that force a flush (at least 1)
    /// * `options` - Flush interval and retry policy
    /// * `repository` - Delivery backend
    /// * `cancel` - Lifetime scope of the sink
    pub fn spawn(
        url: impl Into<String>,
        capacity: usize,
        options: SinkOptions,
        repository: Arc<dyn LogPartRepository>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let sink = Arc::new(Self {
            url: url.into(),
            capacity: capacity.max(1),
            options,
            repository,
            state: Mutex::new(SinkState::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_wanted: Notify::new(),
            drained: Notify::new(),
            cancel,
            flusher: Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&sink).run_flusher());
        *lock(&sink.flusher) = Some(handle);

        debug!(
            "Created log part sink for {} (capacity: {}, interval: {:?})",
            sink.url, sink.capacity, sink.options.flush_interval
        );

        sink
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered parts
    pub fn len(&self) -> usize {
        lock(&self.state).parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last delivery failure recorded for a job, if still unresolved
    pub fn delivery_error(&self, job_id: u64) -> Option<LogError> {
        lock(&self.state).failures.get(&job_id).cloned()
    }

    /// Appends a part to the buffer
    ///
    /// Reaching capacity wakes the background flusher. Parts of a batch in
    /// flight still count against capacity, so when the sink is full this
    /// waits until that batch is delivered or requeued. Buffered plus
    /// in-flight parts never exceed capacity through `add`.
    ///
    /// Returns `Cancelled` without touching the buffer if `ctx` or the
    /// sink's own scope is cancelled.
    pub async fn add(&self, ctx: &CancellationToken, part: LogPart) -> Result<()> {
        loop {
            if ctx.is_cancelled() || self.cancel.is_cancelled() {
                return Err(LogError::Cancelled);
            }

            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if state.parts.len() + state.in_flight < self.capacity {
                    state.parts.push_back(part);
                    if state.parts.len() + state.in_flight >= self.capacity {
                        self.flush_wanted.notify_one();
                    }
                    return Ok(());
                }
            }

            self.flush_wanted.notify_one();
            tokio::select! {
                _ = ctx.cancelled() => return Err(LogError::Cancelled),
                _ = self.cancel.cancelled() => return Err(LogError::Cancelled),
                _ = &mut drained => {}
            }
        }
    }

    /// Drains the buffer and delivers it as one batch
    ///
    /// An empty buffer succeeds without a network call, even if `ctx` is
    /// cancelled. A cancelled `ctx` otherwise returns `Cancelled` and leaves
    /// the buffer as it was.
    ///
    /// Failed attempts are retried per the sink's `RetryPolicy`. If the batch
    /// cannot be delivered (or `ctx` is cancelled mid-flight), its parts go
    /// back to the front of the buffer in their original order and the error
    /// is returned.
    pub async fn flush(&self, ctx: &CancellationToken) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if ctx.is_cancelled() {
            return Err(LogError::Cancelled);
        }

        let _guard = tokio::select! {
            guard = self.flush_lock.lock() => guard,
            _ = ctx.cancelled() => return Err(LogError::Cancelled),
        };

        let batch: Vec<LogPart> = {
            let mut state = lock(&self.state);
            let batch: Vec<LogPart> = state.parts.drain(..).collect();
            state.in_flight = batch.len();
            batch
        };

        if batch.is_empty() {
            return Ok(());
        }

        let result = self.deliver(ctx, &batch).await;
        {
            let mut state = lock(&self.state);
            state.in_flight = 0;
            match &result {
                Ok(()) => {
                    debug!("Delivered {} log part(s) to {}", batch.len(), self.url);
                    if !state.failures.is_empty() {
                        for part in &batch {
                            state.failures.remove(&part.job_id);
                        }
                    }
                }
                Err(err) => {
                    if matches!(err, LogError::Delivery { .. } | LogError::Encode(_)) {
                        for part in &batch {
                            state.failures.insert(part.job_id, err.clone());
                        }
                    }
                    for part in batch.into_iter().rev() {
                        state.parts.push_front(part);
                    }
                }
            }
        }
        self.drained.notify_waiters();

        result
    }

    /// Removes and returns every buffered part
    ///
    /// For callers abandoning the sink, e.g. after its scope was cancelled.
    pub fn drain_buffered(&self) -> Vec<LogPart> {
        let parts = lock(&self.state).parts.drain(..).collect();
        self.drained.notify_waiters();
        parts
    }

    /// Stops the background flusher and flushes what is left
    ///
    /// Further `add` calls fail with `Cancelled`.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();

        let handle = lock(&self.flusher).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Background flusher for {} panicked: {}", self.url, e);
            }
        }

        self.flush(&CancellationToken::new()).await
    }

    async fn deliver(&self, ctx: &CancellationToken, batch: &[LogPart]) -> Result<()> {
        let retry = self.options.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = ctx.cancelled() => return Err(LogError::Cancelled),
                result = self.repository.send_parts(&self.url, batch) => result,
            };

            let err = match result {
                Ok(()) => return Ok(()),
                Err(ClientError::EncodeError(e)) => return Err(LogError::Encode(e.to_string())),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= retry.max_attempts {
                error!(
                    "Failed to deliver {} log part(s) to {} after {} attempt(s): {}",
                    batch.len(),
                    self.url,
                    attempt,
                    err
                );
                return Err(LogError::Delivery {
                    url: self.url.clone(),
                    attempts: attempt,
                    message: err.to_string(),
                });
            }

            let delay = retry.backoff(attempt);
            warn!(
                "Failed to deliver log parts to {} (attempt {}/{}): {}",
                self.url, attempt, retry.max_attempts, err
            );
            warn!("Retrying in {:?}...", delay);

            tokio::select! {
                _ = ctx.cancelled() => return Err(LogError::Cancelled),
                _ = time::sleep(delay) => {}
            }
        }
    }

    async fn run_flusher(self: Arc<Self>) {
        let period = self.options.flush_interval.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.flush_wanted.notified() => {}
            }

            match self.flush(&self.cancel).await {
                Ok(()) => {}
                Err(LogError::Cancelled) => break,
                Err(e) => error!("Background flush for {} failed: {}", self.url, e),
            }
        }

        debug!("Background flusher for {} stopped", self.url);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
