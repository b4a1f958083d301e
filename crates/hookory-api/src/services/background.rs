//! Detached background work.
//!
//! Side effects that must not hold up a response (entitlement sync,
//! notification emails) run here. Each task gets its own timeout and error
//! boundary so a failure is logged instead of vanishing with the request.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn, Instrument};

use crate::metrics;

/// Default deadline for a background task.
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Spawner for fire-and-forget tasks.
#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
    timeout: Duration,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TIMEOUT)
    }
}

impl BackgroundTasks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            timeout,
        }
    }

    /// Spawn `fut` as a named task. Errors and timeouts are logged.
    pub fn spawn<F, E>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let timeout = self.timeout;
        inner.in_flight.fetch_add(1, Ordering::SeqCst);

        let span = tracing::info_span!("background_task", task = name);
        tokio::spawn(
            async move {
                let outcome = match tokio::time::timeout(timeout, fut).await {
                    Ok(Ok(())) => {
                        debug!("Background task completed");
                        "ok"
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "Background task failed");
                        "error"
                    }
                    Err(_) => {
                        warn!(timeout_secs = timeout.as_secs(), "Background task timed out");
                        "timeout"
                    }
                };
                metrics::record_background_task(name, outcome);

                if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    inner.idle.notify_waiters();
                }
            }
            .instrument(span),
        );
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no tasks are running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
