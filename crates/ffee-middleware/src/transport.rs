//! Subscriber side of the telemetry channels.
//!
//! A [`ChannelOpener`] turns a [`Subscription`] into a [`FrameSource`].  Two
//! implementations exist:
//!
//! * [`WsChannelOpener`] – connects to a WebSocket publisher and keeps
//!   reconnecting in the background, like a ZeroMQ SUB socket would.
//! * [`MemoryChannelOpener`] – in-process channels fed by a
//!   [`FramePublisher`], used by the simulator and tests.
//!
//! Both back [`FrameSource::next_frame`] with an mpsc receiver, so the call is
//! cancel-safe and can be wrapped in [`tokio::time::timeout`] for bounded
//! polling.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ffee_types::{FeeError, Frame};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, info, warn};

use crate::codec;

/// Where to connect and which messages to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub name: String,
    /// `ws://host:port`
    pub endpoint: String,
    /// Byte-prefix filters; an empty list keeps every message.
    pub filters: Vec<Vec<u8>>,
    pub multipart: bool,
}

impl Subscription {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            filters: Vec::new(),
            multipart: false,
        }
    }

    pub fn multipart(mut self, multipart: bool) -> Self {
        self.multipart = multipart;
        self
    }

    /// Add one prefix filter.  An empty filter is the same as none.
    pub fn filter(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.filters.push(prefix);
        }
        self
    }

    /// `true` if the raw encoded message passes the filters.
    pub fn accepts(&self, raw: &[u8]) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| codec::matches_filter(raw, f))
    }
}

/// A stream of decoded frames from one channel.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame.
    ///
    /// A `Decode` error concerns one message only; the source stays usable.
    /// [`FeeError::ChannelClosed`] is final.
    async fn next_frame(&mut self) -> Result<Frame, FeeError>;

    fn name(&self) -> &str;
}

/// Opens [`FrameSource`]s.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    /// # Errors
    ///
    /// [`FeeError::ConnectionUnavailable`] when the channel cannot be set up
    /// at all (bad endpoint, unknown in-memory channel).
    async fn open(&self, subscription: &Subscription) -> Result<Box<dyn FrameSource>, FeeError>;
}

type FrameResult = Result<Frame, FeeError>;

// ────────────────────────────────────────────────────────────────────────────
// WebSocket
// ────────────────────────────────────────────────────────────────────────────

/// Opens WebSocket subscriptions.
#[derive(Debug, Clone)]
pub struct WsChannelOpener {
    reconnect_delay: Duration,
}

impl WsChannelOpener {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self { reconnect_delay }
    }
}

impl Default for WsChannelOpener {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl ChannelOpener for WsChannelOpener {
    async fn open(&self, subscription: &Subscription) -> Result<Box<dyn FrameSource>, FeeError> {
        subscription
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| FeeError::ConnectionUnavailable {
                target: subscription.name.clone(),
                details: format!("invalid endpoint '{}': {e}", subscription.endpoint),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(subscribe_loop(
            subscription.clone(),
            self.reconnect_delay,
            tx,
        ));
        Ok(Box::new(WsFrameSource {
            name: subscription.name.clone(),
            rx,
            task,
        }))
    }
}

/// Frames received by a background subscription task.  Dropping the source
/// stops the task.
pub struct WsFrameSource {
    name: String,
    rx: mpsc::UnboundedReceiver<FrameResult>,
    task: JoinHandle<()>,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> Result<Frame, FeeError> {
        self.rx.recv().await.unwrap_or(Err(FeeError::ChannelClosed))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WsFrameSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn subscribe_loop(
    subscription: Subscription,
    reconnect_delay: Duration,
    tx: mpsc::UnboundedSender<FrameResult>,
) {
    while !tx.is_closed() {
        match connect_async(subscription.endpoint.as_str()).await {
            Ok((mut ws, _)) => {
                info!(channel = %subscription.name, endpoint = %subscription.endpoint, "Subscribed");
                while let Some(msg) = ws.next().await {
                    let raw = match msg {
                        Ok(Message::Binary(bytes)) => bytes.to_vec(),
                        Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(channel = %subscription.name, error = %e, "Subscription read error");
                            break;
                        }
                    };
                    if !subscription.accepts(&raw) {
                        continue;
                    }
                    if tx.send(codec::decode(&raw, subscription.multipart)).is_err() {
                        return;
                    }
                }
                debug!(channel = %subscription.name, "Publisher went away");
            }
            Err(e) => {
                debug!(channel = %subscription.name, error = %e, "Publisher not reachable");
            }
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

/// Publishing half of an in-memory channel.
#[derive(Debug, Clone)]
pub struct FramePublisher {
    tx: mpsc::UnboundedSender<FrameResult>,
}

impl FramePublisher {
    /// # Errors
    ///
    /// [`FeeError::ChannelClosed`] once the source has been dropped.
    pub fn publish(&self, frame: Frame) -> Result<(), FeeError> {
        self.tx.send(Ok(frame)).map_err(|_| FeeError::ChannelClosed)
    }

    /// Publish a message that failed to decode on the wire.
    pub fn publish_error(&self, error: FeeError) -> Result<(), FeeError> {
        self.tx.send(Err(error)).map_err(|_| FeeError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of an in-memory channel.
pub struct MemoryFrameSource {
    name: String,
    rx: mpsc::UnboundedReceiver<FrameResult>,
    subscription: Option<Subscription>,
}

impl MemoryFrameSource {
    fn accepts(&self, frame: &Frame) -> bool {
        let Some(subscription) = &self.subscription else {
            return true;
        };
        if subscription.filters.is_empty() {
            return true;
        }
        // Filter on the wire form so prefixes behave as on a real channel.
        codec::encode(frame, subscription.multipart)
            .map(|raw| subscription.accepts(&raw))
            .unwrap_or(false)
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    async fn next_frame(&mut self) -> Result<Frame, FeeError> {
        loop {
            match self.rx.recv().await {
                Some(Ok(frame)) if !self.accepts(&frame) => continue,
                Some(result) => return result,
                None => return Err(FeeError::ChannelClosed),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An unfiltered in-memory channel pair.
pub fn memory_channel(name: impl Into<String>) -> (FramePublisher, MemoryFrameSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        FramePublisher { tx },
        MemoryFrameSource {
            name: name.into(),
            rx,
            subscription: None,
        },
    )
}

/// Hands out pre-registered in-memory channels by subscription name.  Each
/// channel can be opened once.
#[derive(Default)]
pub struct MemoryChannelOpener {
    sources: Mutex<HashMap<String, MemoryFrameSource>>,
}

impl MemoryChannelOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create channel `name` and return its publisher.
    pub fn register(&self, name: impl Into<String>) -> FramePublisher {
        let name = name.into();
        let (publisher, source) = memory_channel(name.clone());
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, source);
        publisher
    }
}

#[async_trait]
impl ChannelOpener for MemoryChannelOpener {
    async fn open(&self, subscription: &Subscription) -> Result<Box<dyn FrameSource>, FeeError> {
        let mut source = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subscription.name)
            .ok_or_else(|| FeeError::ConnectionUnavailable {
                target: subscription.name.clone(),
                details: "no such in-memory channel (or already opened)".into(),
            })?;
        source.subscription = Some(subscription.clone());
        Ok(Box::new(source))
    }
}
