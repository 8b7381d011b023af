//! Sink registry
//!
//! Hands out one `LogPartSink` per destination URL. The registry is an
//! owned value: build it once at startup, share it behind an `Arc`, and
//! shut it down before exit so buffered parts get a final flush.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{LogError, Result};
use crate::repository::LogPartRepository;
use crate::service::log_sink::{LogPartSink, SinkOptions};

/// URL-keyed cache of log part sinks
pub struct SinkRegistry {
    sinks: Mutex<HashMap<String, Arc<LogPartSink>>>,
    repository: Arc<dyn LogPartRepository>,
    options: SinkOptions,
    cancel: CancellationToken,
}

impl SinkRegistry {
    /// Creates an empty registry
    ///
    /// # Arguments
    /// * `repository` - Delivery backend shared by every sink
    /// * `options` - Flush interval and retry policy for new sinks
    pub fn new(repository: Arc<dyn LogPartRepository>, options: SinkOptions) -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            repository,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the sink for `url`, creating it on first use
    ///
    /// Creation happens under the registry lock, so concurrent first calls
    /// for one URL all get the same instance. `capacity` only applies to the
    /// call that creates the sink.
    pub fn get_or_create(
        &self,
        url: &str,
        ctx: &CancellationToken,
        capacity: usize,
    ) -> Result<Arc<LogPartSink>> {
        if ctx.is_cancelled() {
            return Err(LogError::Cancelled);
        }

        let mut sinks = self.lock_sinks();
        // Checked under the lock so no sink is created after `shutdown` began.
        if self.cancel.is_cancelled() {
            return Err(LogError::Cancelled);
        }
        if let Some(sink) = sinks.get(url) {
            return Ok(Arc::clone(sink));
        }

        let sink = LogPartSink::spawn(
            url,
            capacity,
            self.options,
            Arc::clone(&self.repository),
            self.cancel.child_token(),
        );
        sinks.insert(url.to_string(), Arc::clone(&sink));
        info!(
            "Registered log part sink for {} (capacity: {}, {} sink(s) total)",
            url,
            sink.capacity(),
            sinks.len()
        );

        Ok(sink)
    }

    /// Looks up an existing sink
    pub fn get(&self, url: &str) -> Option<Arc<LogPartSink>> {
        self.lock_sinks().get(url).cloned()
    }

    /// Number of registered sinks
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock_sinks().len()
    }

    /// Closes every sink with a final flush
    ///
    /// New sinks are refused from the moment this is called. Sinks stay
    /// registered so undelivered parts can still be drained. Returns the
    /// first error encountered; every sink is closed regardless.
    pub async fn shutdown(&self) -> Result<()> {
        let sinks: Vec<Arc<LogPartSink>> = {
            let sinks = self.lock_sinks();
            self.cancel.cancel();
            sinks.values().cloned().collect()
        };
        info!("Shutting down {} log part sink(s)", sinks.len());

        let mut first_error = None;
        for sink in sinks {
            if let Err(e) = sink.close().await {
                error!(
                    "Final flush for {} failed, {} part(s) undelivered: {}",
                    sink.url(),
                    sink.len(),
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn lock_sinks(&self) -> MutexGuard<'_, HashMap<String, Arc<LogPartSink>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
