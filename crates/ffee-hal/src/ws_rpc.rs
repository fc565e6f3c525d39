//! JSON request/response command sessions over WebSocket.
//!
//! Each call sends one text message
//! `{"id": n, "operation": "...", "args": [...], "kwargs": {...}}` and waits
//! for the text message with the same `id` carrying either `"result"` or
//! `"error"`.

use std::time::Duration;

use async_trait::async_trait;
use ffee_types::FeeError;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::endpoint::{Connector, OperationSpec, Session};

/// Default bound on connecting and on each call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub operation: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Connects to a control server at `ws://host:port`.
#[derive(Debug, Clone)]
pub struct WsControlConnector {
    target: String,
    url: String,
    operations: Vec<OperationSpec>,
    call_timeout: Duration,
}

impl WsControlConnector {
    pub fn new(
        target: impl Into<String>,
        url: impl Into<String>,
        operations: Vec<OperationSpec>,
    ) -> Self {
        Self {
            target: target.into(),
            url: url.into(),
            operations,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

#[async_trait]
impl Connector for WsControlConnector {
    fn target(&self) -> &str {
        &self.target
    }

    fn operations(&self) -> Vec<OperationSpec> {
        self.operations.clone()
    }

    async fn connect(&self) -> Result<Box<dyn Session>, FeeError> {
        let unavailable = |details: String| FeeError::ConnectionUnavailable {
            target: self.target.clone(),
            details,
        };
        let (ws, _) = tokio::time::timeout(self.call_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| unavailable(format!("connect to {} timed out", self.url)))?
            .map_err(|e| unavailable(format!("{}: {e}", self.url)))?;

        info!(target = %self.target, url = %self.url, "Control session opened");
        Ok(Box::new(WsSession {
            target: self.target.clone(),
            ws,
            next_id: 1,
            call_timeout: self.call_timeout,
        }))
    }
}

struct WsSession {
    target: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    call_timeout: Duration,
}

impl WsSession {
    fn lost(&self, details: impl Into<String>) -> FeeError {
        FeeError::ConnectionLost {
            target: self.target.clone(),
            details: details.into(),
        }
    }

    async fn await_response(&mut self, id: u64) -> Result<RpcResponse, FeeError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let response: RpcResponse = serde_json::from_str(text.as_str())?;
                    if response.id == id {
                        return Ok(response);
                    }
                    debug!(target = %self.target, id = response.id, "Discarding stale response");
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(self.lost("server closed the connection"));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(self.lost(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl Session for WsSession {
    async fn call(
        &mut self,
        operation: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, FeeError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest {
            id,
            operation: operation.to_string(),
            args: args.to_vec(),
            kwargs: kwargs.clone(),
        };
        let text = serde_json::to_string(&request)?;
        if let Err(e) = self.ws.send(Message::Text(text.into())).await {
            return Err(self.lost(e.to_string()));
        }

        let response = tokio::time::timeout(self.call_timeout, self.await_response(id))
            .await
            .map_err(|_| FeeError::Timeout {
                target: self.target.clone(),
                operation: operation.to_string(),
                after_ms: self.call_timeout.as_millis() as u64,
            })??;

        match response.error {
            Some(message) => Err(FeeError::Remote {
                target: self.target.clone(),
                operation: operation.to_string(),
                message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(target = %self.target, error = %e, "Close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Accept one client and answer every request with `reply(request)`;
    /// `None` means stay silent.
    async fn serve_once<F>(reply: F) -> Result<String, Box<dyn std::error::Error>>
    where
        F: Fn(RpcRequest) -> Option<RpcResponse> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let request: RpcRequest = serde_json::from_str(text.as_str()).expect("request");
                    if let Some(response) = reply(request) {
                        let json = serde_json::to_string(&response).expect("response");
                        ws.send(Message::Text(json.into())).await.expect("send");
                    }
                }
            }
        });
        Ok(format!("ws://{addr}"))
    }

    fn ops() -> Vec<OperationSpec> {
        vec![OperationSpec::new("deb_set_on_mode", 0)]
    }

    #[tokio::test]
    async fn call_returns_result() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once(|req| {
            Some(RpcResponse::ok(req.id, json!({"op": req.operation, "n": req.args.len()})))
        })
        .await?;
        let connector = WsControlConnector::new("DPU", url, ops());
        let mut session = connector.connect().await?;

        let rc = session
            .call("deb_set_on_mode", &[json!(1), json!(2)], &Map::new())
            .await?;
        assert_eq!(rc, json!({"op": "deb_set_on_mode", "n": 2}));
        session.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn remote_error_is_contained() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once(|req| Some(RpcResponse::err(req.id, "AEB2 not powered"))).await?;
        let mut session = WsControlConnector::new("DPU", url, ops()).connect().await?;

        let err = session
            .call("aeb_set_init_mode", &[json!("AEB2")], &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FeeError::Remote { ref message, .. } if message == "AEB2 not powered"));
        assert!(!err.is_connection_level());
        Ok(())
    }

    #[tokio::test]
    async fn silent_server_times_out() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve_once(|_| None).await?;
        let connector = WsControlConnector::new("CM_CS", url, ops())
            .with_call_timeout(Duration::from_millis(100));
        let mut session = connector.connect().await?;

        let err = session
            .call("end_observation", &[], &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FeeError::Timeout { after_ms: 100, .. }));
        assert!(err.is_connection_level());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let connector = WsControlConnector::new("DPU", format!("ws://{addr}"), ops());
        let err = connector.connect().await.err().ok_or("connect should fail")?;
        assert!(matches!(err, FeeError::ConnectionUnavailable { .. }));
        Ok(())
    }
}
