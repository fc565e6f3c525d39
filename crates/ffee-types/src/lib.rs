//! `ffee-types` – shared data model of the F-FEE ground-support console.
//!
//! Everything that crosses a crate or thread boundary lives here: the
//! [`Command`] tuple produced by user actions, the [`Event`] envelope posted by
//! the background workers, the decoded hardware state ([`DebMode`],
//! [`AebStatus`], [`DtcInMod`]), raw telemetry [`Frame`]s and the global
//! [`FeeError`] type.

pub mod event;
pub mod fee;
pub mod frame;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use event::{Event, EventPayload};
pub use fee::{
    AebIndicator, AebStateKey, AebStatus, AebSubState, AebUnit, CcdSide, DebMode, DtcInMod,
    OUTBUFF_TO_DTC, Outbuff, SpwPath,
};
pub use frame::{FieldMap, Frame, HousekeepingRecord, MessageKind};

/// A single user-issued request for a remote control server.
///
/// Created by the presentation layer, consumed exactly once by the command
/// dispatcher.  Fields are private so a command cannot be altered after it
/// has been handed to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    target: String,
    operation: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: Map<String, Value>,
}

impl Command {
    /// A command without arguments, e.g. `Command::new("DPU", "deb_set_on_mode")`.
    pub fn new(target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation: operation.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Replace the positional arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Add one named argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({}, {})",
            self.target,
            self.operation,
            Value::Array(self.args.clone()),
            Value::Object(self.kwargs.clone())
        )
    }
}

/// Global error type for transport failures, remote command errors and
/// telemetry decoding problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeeError {
    #[error("Connection to {target} unavailable: {details}")]
    ConnectionUnavailable { target: String, details: String },

    #[error("Connection to {target} lost: {details}")]
    ConnectionLost { target: String, details: String },

    #[error("{target}.{operation} timed out after {after_ms} ms")]
    Timeout {
        target: String,
        operation: String,
        after_ms: u64,
    },

    #[error("Unknown command target: {0}")]
    UnknownTarget(String),

    #[error("No such command for {target}: {operation}")]
    UnknownOperation { target: String, operation: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{target}.{operation} failed: {message}")]
    Remote {
        target: String,
        operation: String,
        message: String,
    },

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Missing field {block}/{field}")]
    MissingField { block: String, field: String },

    #[error("Unsupported message kind 0x{0:02X}")]
    UnsupportedFrame(u8),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Registration Error: {0}")]
    Registration(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Worker Error: {0}")]
    Worker(String),

    #[error("Commanding is disabled")]
    CommandingDisabled,
}

impl FeeError {
    /// `true` for failures that invalidate the current set of remote
    /// connections.  Everything else is contained to a single command or
    /// frame.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            FeeError::ConnectionUnavailable { .. }
                | FeeError::ConnectionLost { .. }
                | FeeError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for FeeError {
    fn from(e: serde_json::Error) -> Self {
        FeeError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_builder_keeps_arguments_in_order() {
        let cmd = Command::new("DPU", "deb_set_aeb_power_on")
            .with_args([json!(1), json!(0), json!(0), json!(1)])
            .with_kwarg("verbose", json!(true));

        assert_eq!(cmd.target(), "DPU");
        assert_eq!(cmd.operation(), "deb_set_aeb_power_on");
        assert_eq!(cmd.args(), &[json!(1), json!(0), json!(0), json!(1)]);
        assert_eq!(cmd.kwargs()["verbose"], json!(true));
    }

    #[test]
    fn command_display_shows_call_shape() {
        let cmd = Command::new("DPU", "aeb_set_init_mode").with_args([json!("AEB2")]);
        assert_eq!(cmd.to_string(), r#"DPU.aeb_set_init_mode(["AEB2"], {})"#);
    }

    #[test]
    fn command_deserializes_without_optional_arguments() {
        let cmd: Command =
            serde_json::from_str(r#"{"target":"CM_CS","operation":"end_observation"}"#).unwrap();
        assert_eq!(cmd, Command::new("CM_CS", "end_observation"));
    }

    #[test]
    fn connection_level_classification() {
        let unavailable = FeeError::ConnectionUnavailable {
            target: "DPU".to_string(),
            details: "refused".to_string(),
        };
        let unknown = FeeError::UnknownOperation {
            target: "DPU".to_string(),
            operation: "fly".to_string(),
        };
        assert!(unavailable.is_connection_level());
        assert!(!unknown.is_connection_level());
        assert!(!FeeError::Decode("bad".to_string()).is_connection_level());
    }

    #[test]
    fn fee_error_display() {
        let err = FeeError::UnknownOperation {
            target: "CM_CS".to_string(),
            operation: "launch".to_string(),
        };
        assert_eq!(err.to_string(), "No such command for CM_CS: launch");
        assert_eq!(
            FeeError::UnsupportedFrame(0x42).to_string(),
            "Unsupported message kind 0x42"
        );
    }
}
