//! [`CommandDispatcher`] – serializes user commands onto one background
//! thread.
//!
//! The worker runs two nested loops:
//!
//! * **outer** – open a [`SessionSet`] for every registered target.  If that
//!   fails, or a connection-level error ends the inner loop, post
//!   `CommandThreadCrashed`, close what is open and wait
//!   [`DispatcherConfig::backoff`] before the next attempt.  Connecting and
//!   the backoff wait are both interrupted by `cancel()`; closing is bounded
//!   by [`DispatcherConfig::close_timeout`].
//! * **inner** – poll the [`CommandQueue`] without blocking and run each
//!   command against its target.  `LogRetrieved` is posted before and after
//!   every command; contained errors become `ExceptionCaught` and the loop
//!   goes on.

use std::time::Duration;

use ffee_hal::{EndpointRegistry, SessionSet};
use ffee_middleware::{CommandQueue, EventBus};
use ffee_types::{Command, EventPayload, FeeError};
use tracing::{debug, error, info, warn};

use crate::monitor::exception;
use crate::worker::{CancelToken, POLL_STEP, WorkerHandle, cancelled, sleep_or_cancel};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Wait between connection attempts.
    pub backoff: Duration,
    /// Sleep when the queue is empty.
    pub idle_sleep: Duration,
    /// Upper bound on closing the sessions of one epoch.
    pub close_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
            idle_sleep: POLL_STEP,
            close_timeout: POLL_STEP,
        }
    }
}

/// Handle to the running dispatcher thread.
#[derive(Debug)]
pub struct CommandDispatcher {
    worker: WorkerHandle,
}

impl CommandDispatcher {
    /// Start the worker.  Connection failures are not startup errors: they
    /// are reported as events and retried.
    ///
    /// # Errors
    ///
    /// [`FeeError::Worker`] if the thread cannot be started.
    pub fn start(
        config: DispatcherConfig,
        endpoints: EndpointRegistry,
        queue: CommandQueue,
        bus: EventBus,
    ) -> Result<Self, FeeError> {
        let bus = bus.with_source("ffee-runtime::dispatcher");
        let worker = WorkerHandle::spawn("ffee-dispatcher", move |token| async move {
            let dispatcher = DispatchLoop {
                config,
                endpoints,
                queue,
                bus,
            };
            dispatcher.run(token).await;
        })?;
        Ok(Self { worker })
    }

    pub fn cancel(&self) {
        self.worker.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(self) -> Result<(), FeeError> {
        self.worker.join()
    }
}

struct DispatchLoop {
    config: DispatcherConfig,
    endpoints: EndpointRegistry,
    queue: CommandQueue,
    bus: EventBus,
}

impl DispatchLoop {
    fn post(&self, payload: EventPayload) {
        if let Err(e) = self.bus.post(payload) {
            debug!(error = %e, "Event dropped");
        }
    }

    async fn run(self, token: CancelToken) {
        info!(targets = ?self.endpoints.targets(), "Dispatcher started");
        while !token.is_cancelled() {
            let connected = tokio::select! {
                result = self.endpoints.connect_all() => result,
                _ = cancelled(&token) => {
                    warn!("Cancelled while connecting to the control servers");
                    break;
                }
            };
            match connected {
                Ok(mut sessions) => {
                    let outcome = self.serve(&mut sessions, &token).await;
                    self.close(&mut sessions).await;
                    if let Err(e) = outcome {
                        error!(error = %e, "Command connection lost");
                        self.post(EventPayload::CommandThreadCrashed(e.to_string()));
                    }
                }
                Err(e) => {
                    error!(error = %e, "Could not connect to the control servers");
                    self.post(EventPayload::CommandThreadCrashed(e.to_string()));
                }
            }
            if token.is_cancelled() {
                break;
            }
            info!(backoff = ?self.config.backoff, "Retrying control server connections");
            if sleep_or_cancel(&token, self.config.backoff).await {
                break;
            }
        }
        info!("Command Thread finished");
    }

    async fn close(&self, sessions: &mut SessionSet) {
        let limit = self.config.close_timeout;
        if tokio::time::timeout(limit, sessions.close_all()).await.is_err() {
            warn!(timeout = ?limit, "Closing control sessions timed out");
        }
    }

    /// Run commands until cancelled (`Ok`) or a connection-level failure
    /// (`Err`).
    async fn serve(&self, sessions: &mut SessionSet, token: &CancelToken) -> Result<(), FeeError> {
        while !token.is_cancelled() {
            let Some(command) = self.queue.get_nowait() else {
                tokio::time::sleep(self.config.idle_sleep).await;
                continue;
            };

            self.post(EventPayload::LogRetrieved(format!(
                "Executing command '{}'",
                command.operation()
            )));
            info!(command = %command, "Running command");

            let result = tokio::select! {
                result = sessions.execute(&command) => Some(result),
                _ = cancelled(token) => None,
            };
            self.acknowledge(&command);

            match result {
                None => {
                    warn!(command = %command, "Cancelled while command was in flight");
                    return Ok(());
                }
                Some(Ok(rc)) => {
                    info!(command = %command, response = %rc, "Command executed");
                    self.post(EventPayload::LogRetrieved(format!(
                        "Command '{}' executed: rc = {rc}",
                        command.operation()
                    )));
                }
                Some(Err(e)) if e.is_connection_level() => return Err(e),
                Some(Err(e)) => {
                    warn!(command = %command, error = %e, "Command failed");
                    self.post(exception(&e, &format!("executing {command}")));
                }
            }
        }
        Ok(())
    }

    fn acknowledge(&self, command: &Command) {
        if let Err(e) = self.queue.task_done() {
            warn!(command = %command, error = %e, "Queue bookkeeping out of step");
        }
    }
}
