//! `ffee-kernel` – State machines of the console core.
//!
//! Nothing in here owns a thread or a socket.  Every type is driven by its
//! caller, with time passed in explicitly, so the runtime workers stay thin
//! and the logic is testable without waiting on real clocks.
//!
//! # Modules
//!
//! - [`watchdog`] – [`SilenceWatchdog`][watchdog::SilenceWatchdog] for the
//!   primary telemetry channel (ACTIVE → SOFT_TIMEOUT → HARD_SHUTDOWN) and
//!   [`StalenessTracker`][watchdog::StalenessTracker] for the auxiliary
//!   channels watched by the liveness poller.
//! - [`telemetry_decode`] – [`TelemetryDecoder`][telemetry_decode::TelemetryDecoder]:
//!   decodes register-map and housekeeping frames, diffs them against the
//!   last-known DEB/AEB state and keeps the OUTBUFF accumulator.
//! - [`console_state`] – [`ConsoleState`][console_state::ConsoleState]:
//!   folds the event stream into the indicator state shown to the operator.

pub mod console_state;
pub mod telemetry_decode;
pub mod watchdog;

pub use console_state::{AebView, ConsoleState, Notice, Severity};
pub use telemetry_decode::{FieldDecoder, JsonFieldDecoder, TelemetryDecoder, decode_dtc_in_mod};
pub use watchdog::{Liveness, SilenceTransition, SilenceWatchdog, StalenessTracker};
