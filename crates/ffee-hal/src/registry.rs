//! [`EndpointRegistry`] – command targets and their operation tables.
//!
//! The registry stores one [`Connector`] per target together with the
//! operations it accepts.  Routing is an explicit table lookup: an unknown
//! target or operation is a typed error raised before anything is sent.
//!
//! [`EndpointRegistry::connect_all`] opens one [`Session`] per target and
//! returns them as a [`SessionSet`], the scoped connections of one dispatcher
//! epoch.

use std::collections::HashMap;
use std::sync::Arc;

use ffee_types::{Command, FeeError};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::endpoint::{Connector, OperationSpec, Session};

type OperationTable = Arc<HashMap<String, OperationSpec>>;

struct Entry {
    connector: Box<dyn Connector>,
    operations: OperationTable,
}

/// Command targets available to the dispatcher.
#[derive(Default)]
pub struct EndpointRegistry {
    entries: Vec<Entry>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector.
    ///
    /// # Errors
    ///
    /// [`FeeError::Registration`] if the target is empty or already
    /// registered, the operation table is empty, or it names an operation
    /// twice.
    pub fn register(&mut self, connector: Box<dyn Connector>) -> Result<(), FeeError> {
        let target = connector.target().to_string();
        if target.is_empty() {
            return Err(FeeError::Registration("empty target identifier".into()));
        }
        if self.entries.iter().any(|e| e.connector.target() == target) {
            return Err(FeeError::Registration(format!(
                "target '{target}' registered twice"
            )));
        }

        let specs = connector.operations();
        if specs.is_empty() {
            return Err(FeeError::Registration(format!(
                "target '{target}' exposes no operations"
            )));
        }
        let mut operations = HashMap::with_capacity(specs.len());
        for spec in specs {
            if spec.name.is_empty() {
                return Err(FeeError::Registration(format!(
                    "target '{target}' has an unnamed operation"
                )));
            }
            if let Some(dup) = operations.insert(spec.name.clone(), spec) {
                return Err(FeeError::Registration(format!(
                    "operation '{}' registered twice for '{target}'",
                    dup.name
                )));
            }
        }

        debug!(target = %target, operations = operations.len(), "Registered endpoint");
        self.entries.push(Entry {
            connector,
            operations: Arc::new(operations),
        });
        Ok(())
    }

    /// Builder form of [`EndpointRegistry::register`].
    pub fn with(mut self, connector: Box<dyn Connector>) -> Result<Self, FeeError> {
        self.register(connector)?;
        Ok(self)
    }

    pub fn targets(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.connector.target()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Open a session to every target.  On failure the sessions opened so
    /// far are closed before the error is returned.
    pub async fn connect_all(&self) -> Result<SessionSet, FeeError> {
        let mut set = SessionSet {
            sessions: HashMap::with_capacity(self.entries.len()),
        };
        for entry in &self.entries {
            let target = entry.connector.target().to_string();
            match entry.connector.connect().await {
                Ok(session) => {
                    info!(target = %target, "Connected");
                    set.sessions.insert(
                        target,
                        Bound {
                            session,
                            operations: Arc::clone(&entry.operations),
                        },
                    );
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Connection failed");
                    set.close_all().await;
                    return Err(e);
                }
            }
        }
        Ok(set)
    }
}

struct Bound {
    session: Box<dyn Session>,
    operations: OperationTable,
}

/// Sessions for every registered target, held for one dispatcher epoch.
pub struct SessionSet {
    sessions: HashMap<String, Bound>,
}

impl SessionSet {
    /// Route `command` to its target and run it.
    ///
    /// # Errors
    ///
    /// * [`FeeError::UnknownTarget`] / [`FeeError::UnknownOperation`] /
    ///   [`FeeError::InvalidArguments`] before anything is sent.
    /// * Whatever the session returns otherwise.
    pub async fn execute(&mut self, command: &Command) -> Result<Value, FeeError> {
        let bound = self
            .sessions
            .get_mut(command.target())
            .ok_or_else(|| FeeError::UnknownTarget(command.target().to_string()))?;

        let spec = bound.operations.get(command.operation()).ok_or_else(|| {
            FeeError::UnknownOperation {
                target: command.target().to_string(),
                operation: command.operation().to_string(),
            }
        })?;
        if command.args().len() != spec.args {
            return Err(FeeError::InvalidArguments(format!(
                "{}.{} takes {} positional argument(s), got {}",
                command.target(),
                command.operation(),
                spec.args,
                command.args().len()
            )));
        }

        bound
            .session
            .call(command.operation(), command.args(), command.kwargs())
            .await
    }

    /// Close every session.
    pub async fn close_all(&mut self) {
        for (target, mut bound) in self.sessions.drain() {
            bound.session.close().await;
            debug!(target = %target, "Session closed");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
        closed: Vec<String>,
    }

    struct MockConnector {
        target: String,
        ops: Vec<OperationSpec>,
        fail: bool,
        log: Arc<Mutex<Log>>,
    }

    impl MockConnector {
        fn new(target: &str, log: &Arc<Mutex<Log>>) -> Box<Self> {
            Box::new(Self {
                target: target.to_string(),
                ops: vec![OperationSpec::new("ping", 0), OperationSpec::new("echo", 1)],
                fail: false,
                log: Arc::clone(log),
            })
        }
    }

    struct MockSession {
        target: String,
        log: Arc<Mutex<Log>>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        fn target(&self) -> &str {
            &self.target
        }
        fn operations(&self) -> Vec<OperationSpec> {
            self.ops.clone()
        }
        async fn connect(&self) -> Result<Box<dyn Session>, FeeError> {
            if self.fail {
                return Err(FeeError::ConnectionUnavailable {
                    target: self.target.clone(),
                    details: "refused".into(),
                });
            }
            Ok(Box::new(MockSession {
                target: self.target.clone(),
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[async_trait]
    impl Session for MockSession {
        async fn call(
            &mut self,
            operation: &str,
            args: &[Value],
            _kwargs: &Map<String, Value>,
        ) -> Result<Value, FeeError> {
            self.log
                .lock()
                .unwrap()
                .calls
                .push(format!("{}.{operation}", self.target));
            Ok(args.first().cloned().unwrap_or(Value::Null))
        }
        async fn close(&mut self) {
            self.log.lock().unwrap().closed.push(self.target.clone());
        }
    }

    #[tokio::test]
    async fn routes_by_target_and_operation() -> Result<(), Box<dyn std::error::Error>> {
        let log = Arc::new(Mutex::new(Log::default()));
        let registry = EndpointRegistry::new()
            .with(MockConnector::new("DPU", &log))?
            .with(MockConnector::new("CM_CS", &log))?;
        let mut sessions = registry.connect_all().await?;

        let rc = sessions
            .execute(&Command::new("CM_CS", "echo").with_args([json!(5)]))
            .await?;
        assert_eq!(rc, json!(5));
        sessions.execute(&Command::new("DPU", "ping")).await?;
        assert_eq!(log.lock().unwrap().calls, vec!["CM_CS.echo", "DPU.ping"]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_names_are_typed_errors() -> Result<(), Box<dyn std::error::Error>> {
        let log = Arc::new(Mutex::new(Log::default()));
        let registry = EndpointRegistry::new().with(MockConnector::new("DPU", &log))?;
        let mut sessions = registry.connect_all().await?;

        let err = sessions.execute(&Command::new("PSU", "ping")).await.unwrap_err();
        assert_eq!(err, FeeError::UnknownTarget("PSU".into()));

        let err = sessions.execute(&Command::new("DPU", "fly")).await.unwrap_err();
        assert!(matches!(err, FeeError::UnknownOperation { .. }));
        assert!(!err.is_connection_level());

        let err = sessions.execute(&Command::new("DPU", "echo")).await.unwrap_err();
        assert!(matches!(err, FeeError::InvalidArguments(_)));

        assert!(log.lock().unwrap().calls.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_connect_closes_opened_sessions() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut failing = MockConnector::new("CM_CS", &log);
        failing.fail = true;

        let mut registry = EndpointRegistry::new();
        registry.register(MockConnector::new("DPU", &log)).unwrap();
        registry.register(failing).unwrap();

        let result = registry.connect_all().await;
        assert!(matches!(result, Err(FeeError::ConnectionUnavailable { .. })));
        assert_eq!(log.lock().unwrap().closed, vec!["DPU"]);
    }

    #[test]
    fn registration_is_validated() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut registry = EndpointRegistry::new();
        registry.register(MockConnector::new("DPU", &log)).unwrap();
        assert!(registry.register(MockConnector::new("DPU", &log)).is_err());

        let mut empty = MockConnector::new("EMPTY", &log);
        empty.ops.clear();
        assert!(registry.register(empty).is_err());

        let mut dup = MockConnector::new("DUP", &log);
        dup.ops.push(OperationSpec::new("ping", 0));
        assert!(registry.register(dup).is_err());

        assert_eq!(registry.targets(), vec!["DPU"]);
    }
}
