//! Directional event-posting primitive between the background workers and
//! the presentation layer.
//!
//! Every producer holds a cheap [`EventBus`] clone; exactly one [`EventSink`]
//! consumes.  Under the hood this is a [`tokio::sync::mpsc`] unbounded
//! channel, so posting never blocks a worker and events from one producer
//! arrive in the order they were posted.  No ordering is implied between
//! different producers.

use std::sync::Arc;
use std::time::Duration;

use ffee_types::{Event, EventPayload, FeeError};
use tokio::sync::mpsc;
use tracing::trace;

/// Create a connected bus/sink pair.
pub fn event_bus() -> (EventBus, EventSink) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        EventBus {
            sender,
            source: Arc::from("ffee"),
        },
        EventSink { receiver },
    )
}

/// Producer side.  Clone it once per worker and tag it with
/// [`EventBus::with_source`] so the sink can tell producers apart.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<Event>,
    source: Arc<str>,
}

impl EventBus {
    /// A clone of this bus that stamps `source` on every event it posts.
    pub fn with_source(&self, source: impl AsRef<str>) -> Self {
        Self {
            sender: self.sender.clone(),
            source: Arc::from(source.as_ref()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Wrap `payload` in an [`Event`] envelope and post it.
    ///
    /// # Errors
    ///
    /// [`FeeError::ChannelClosed`] once the sink has been dropped.
    pub fn post(&self, payload: EventPayload) -> Result<(), FeeError> {
        trace!(source = %self.source, kind = payload.kind(), "post");
        self.post_event(Event::new(self.source.as_ref(), payload))
    }

    /// Post a pre-built envelope unchanged.
    pub fn post_event(&self, event: Event) -> Result<(), FeeError> {
        self.sender.send(event).map_err(|_| FeeError::ChannelClosed)
    }

    /// `true` once the sink has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side, owned by the presentation layer.
#[derive(Debug)]
pub struct EventSink {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventSink {
    /// Wait for the next event.  `None` once every [`EventBus`] clone has been
    /// dropped and the buffer is empty.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Like [`EventSink::recv`] but gives up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    /// Non-blocking receive for cooperative presentation loops.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Everything currently buffered, oldest first.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
