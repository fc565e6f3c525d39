//! Remote command endpoint contract.
//!
//! A [`Connector`] knows how to reach one command target (e.g. `"DPU"`) and
//! which operations it accepts.  [`Connector::connect`] yields a scoped
//! [`Session`] that lives until the dispatcher's current retry epoch ends.

use async_trait::async_trait;
use ffee_types::FeeError;
use serde_json::{Map, Value};

/// One operation accepted by a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    pub name: String,
    /// Required number of positional arguments.
    pub args: usize,
}

impl OperationSpec {
    pub fn new(name: impl Into<String>, args: usize) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Factory for sessions with one command target.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Target identifier used for routing, e.g. `"DPU"` or `"CM_CS"`.
    fn target(&self) -> &str;

    /// Every operation this target accepts.  Validated once at registration.
    fn operations(&self) -> Vec<OperationSpec>;

    /// Open a session.
    ///
    /// # Errors
    ///
    /// [`FeeError::ConnectionUnavailable`] if the control server cannot be
    /// reached.
    async fn connect(&self) -> Result<Box<dyn Session>, FeeError>;
}

/// A live connection to one control server.
#[async_trait]
pub trait Session: Send {
    /// Invoke `operation`.  The caller has already checked that the operation
    /// exists and the positional arity matches.
    async fn call(
        &mut self,
        operation: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, FeeError>;

    /// Release the connection.  Never fails; errors are logged.
    async fn close(&mut self);
}
