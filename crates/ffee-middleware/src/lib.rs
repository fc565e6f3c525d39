//! `ffee-middleware` – plumbing between the console's threads and the
//! outside world.
//!
//! Routes events, commands and telemetry frames without caring about their
//! meaning.
//!
//! # Modules
//!
//! - [`bus`] – One-directional event posting from workers to the
//!   presentation layer.
//! - [`command_queue`] – Thread-safe FIFO from the presentation layer to the
//!   command dispatcher, with `task_done`/`join` and drain-on-shutdown.
//! - [`codec`] – Single- and multi-part binary framing of telemetry.
//! - [`transport`] – Subscriber channels (WebSocket and in-memory).
//! - [`services`] – The immutable table of watched channels.

pub mod bus;
pub mod codec;
pub mod command_queue;
pub mod services;
pub mod transport;

pub use bus::{EventBus, EventSink, event_bus};
pub use command_queue::CommandQueue;
pub use services::{ChannelKind, ServiceDescriptor, ServiceRegistry, ServiceSignal};
pub use transport::{
    ChannelOpener, FramePublisher, FrameSource, MemoryChannelOpener, Subscription,
    WsChannelOpener, memory_channel,
};
