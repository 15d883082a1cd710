//! Auto-submit debounce
//!
//! Each call to [`Debouncer::schedule`] replaces the pending task. Only a
//! task that survives its full delay runs; once it has started it is never
//! interrupted, so an in-flight query resolves normally even if new input
//! arrives.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Delay used by the CLI and by `Debouncer::default()`.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// Replace-on-new-input timer
///
/// Must be used inside a tokio runtime. Dropping it cancels the pending task.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless another call supersedes it first
    ///
    /// The handle resolves to `true` if the task ran.
    pub fn schedule<F, Fut>(&self, task: F) -> JoinHandle<bool>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) != ticket {
                debug!(ticket, "debounced task superseded");
                return false;
            }
            task().await;
            true
        })
    }

    /// Drop the pending task, if any
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
