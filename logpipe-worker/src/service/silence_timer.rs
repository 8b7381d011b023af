//! Silence timer
//!
//! Tracks the deadline by which a job must produce output again. The
//! deadline lives in a `watch` channel and is re-armed on every write; a
//! dedicated task sleeps until it and raises a level-triggered flag.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Re-armable silence deadline
///
/// The flag returned by `subscribe` turns `true` once the timeout elapsed
/// since the last `rearm` (or since `start`), and back to `false` on the
/// next `rearm`. It fires at most once per arming.
///
/// The timer task stops when the owning job's token is cancelled or when
/// the timer is dropped.
pub struct SilenceTimer {
    timeout: Duration,
    deadline: watch::Sender<Option<Instant>>,
    fired: Arc<watch::Sender<bool>>,
    stop: CancellationToken,
}

impl SilenceTimer {
    /// Arms a timer and spawns its watcher task
    ///
    /// # Arguments
    /// * `timeout` - Allowed gap between writes
    /// * `ctx` - The owning job's cancellation token
    pub fn start(timeout: Duration, ctx: &CancellationToken) -> Self {
        let (deadline, deadline_rx) = watch::channel(Some(Instant::now() + timeout));
        let (fired, _) = watch::channel(false);
        let fired = Arc::new(fired);
        let stop = ctx.child_token();

        tokio::spawn(watch_deadline(deadline_rx, Arc::clone(&fired), stop.clone()));

        Self {
            timeout,
            deadline,
            fired,
            stop,
        }
    }

    #[cfg(test)]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Changes the timeout and re-arms from now
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.rearm();
    }

    /// Pushes the deadline to now + timeout and clears the flag
    pub fn rearm(&self) {
        if self.stop.is_cancelled() {
            return;
        }
        self.deadline
            .send_replace(Some(Instant::now() + self.timeout));
        self.fired.send_replace(false);
    }

    /// Removes the deadline; the flag keeps its current value
    pub fn disarm(&self) {
        self.deadline.send_replace(None);
        self.stop.cancel();
    }

    #[cfg(test)]
    pub fn is_fired(&self) -> bool {
        *self.fired.borrow()
    }

    /// Receiver for the timed-out flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.fired.subscribe()
    }
}

impl Drop for SilenceTimer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn watch_deadline(
    mut deadline: watch::Receiver<Option<Instant>>,
    fired: Arc<watch::Sender<bool>>,
    stop: CancellationToken,
) {
    loop {
        let current = *deadline.borrow_and_update();
        let expired = async move {
            match current {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = stop.cancelled() => break,
            changed = deadline.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = expired => {
                // A write may have re-armed while we were waking up.
                if *deadline.borrow() == current {
                    debug!("Silence timeout elapsed");
                    fired.send_replace(true);
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
