//! Background worker threads with cooperative cancellation.
//!
//! Each worker is a named OS thread driving its own current-thread tokio
//! runtime, so a stalled remote endpoint can never starve the presentation
//! runtime.  Cancellation is a shared flag the worker polls at least once per
//! [`POLL_STEP`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ffee_types::FeeError;
use tracing::{debug, error};

/// Upper bound on how long a worker may go without checking its flag.
pub const POLL_STEP: Duration = Duration::from_millis(100);

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sleep for `duration` in [`POLL_STEP`] slices.  Returns `true` if the
/// token was cancelled before the time was up.
pub async fn sleep_or_cancel(token: &CancelToken, duration: Duration) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if token.is_cancelled() {
            return true;
        }
        let step = remaining.min(POLL_STEP);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    token.is_cancelled()
}

/// Resolves once `token` is cancelled.
pub async fn cancelled(token: &CancelToken) {
    while !token.is_cancelled() {
        tokio::time::sleep(POLL_STEP).await;
    }
}

/// Owner of one worker thread.  Dropping the handle cancels and joins it.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    token: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `body` on a new thread named `name`.
    ///
    /// # Errors
    ///
    /// [`FeeError::Worker`] if the runtime or the thread cannot be created.
    pub fn spawn<F, Fut>(name: &str, body: F) -> Result<Self, FeeError>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FeeError::Worker(format!("{name}: runtime: {e}")))?;
        let token = CancelToken::new();
        let thread_token = token.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runtime.block_on(body(thread_token)))
            .map_err(|e| FeeError::Worker(format!("{name}: spawn: {e}")))?;
        debug!(worker = %name, "Worker started");
        Ok(Self {
            name: name.to_string(),
            token,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a stop; the worker observes it within one [`POLL_STEP`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the thread to exit.  Does not cancel it.
    ///
    /// # Errors
    ///
    /// [`FeeError::Worker`] if the worker panicked.
    pub fn join(mut self) -> Result<(), FeeError> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<(), FeeError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread.join().map_err(|_| {
            error!(worker = %self.name, "Worker panicked");
            FeeError::Worker(format!("{} panicked", self.name))
        })?;
        debug!(worker = %self.name, "Worker joined");
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.cancel();
            let _ = self.join_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn sleep_runs_to_completion() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!sleep_or_cancel(&token, Duration::from_millis(250)).await);
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn sleep_is_interrupted_by_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            remote.cancel();
        });
        let start = Instant::now();
        assert!(sleep_or_cancel(&token, Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancel_stops_worker() -> Result<(), FeeError> {
        let worker = WorkerHandle::spawn("test-worker", |token| async move {
            while !token.is_cancelled() {
                tokio::time::sleep(POLL_STEP).await;
            }
        })?;
        assert_eq!(worker.name(), "test-worker");
        assert!(!worker.is_finished());
        worker.cancel();
        let start = Instant::now();
        worker.join()?;
        assert!(start.elapsed() < Duration::from_secs(1));
        Ok(())
    }

    #[test]
    fn panicking_worker_reports_error() -> Result<(), FeeError> {
        let worker = WorkerHandle::spawn("doomed", |_| async { panic!("boom") })?;
        assert!(matches!(worker.join(), Err(FeeError::Worker(_))));
        Ok(())
    }
}
