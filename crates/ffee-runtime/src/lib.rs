//! `ffee-runtime` – Threads and tasks of the console core.
//!
//! - [`monitor`] – [`TelemetryMonitor`]: background subscriber on the data
//!   distribution channel; decodes, diffs and watches for silence.
//! - [`dispatcher`] – [`CommandDispatcher`]: background executor of queued
//!   commands with reconnect and backoff.
//! - [`poller`] – [`ServiceLivenessPoller`]: presentation-side task that
//!   tracks the liveness of every registered channel.
//! - [`sequences`] – timed multi-command user actions.
//! - [`console`] – [`Console`]: start-up wiring and ordered shutdown.
//! - [`worker`] – thread ownership and cooperative cancellation.
//! - [`logging`] – [`init_tracing`].
//!
//! Every worker talks to the presentation layer only through the
//! [`EventBus`][ffee_middleware::EventBus].

pub mod console;
pub mod dispatcher;
pub mod logging;
pub mod monitor;
pub mod poller;
pub mod sequences;
pub mod worker;

pub use console::{Console, ConsoleConfig};
pub use dispatcher::{CommandDispatcher, DispatcherConfig};
pub use logging::init_tracing;
pub use monitor::{DATA_DISTRIBUTION_PORT, MonitorConfig, TelemetryMonitor};
pub use poller::{PollerConfig, ServiceLivenessPoller};
pub use sequences::Step;
pub use worker::{CancelToken, WorkerHandle};
