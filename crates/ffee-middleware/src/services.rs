//! Static table of the named telemetry channels watched by the liveness
//! poller.
//!
//! A [`ServiceRegistry`] is built once, validated, and then handed to the
//! poller by value; nothing in it changes afterwards.  Per-channel liveness
//! (`last received`, `timed out`) lives in the poller, not here.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ffee_types::{FeeError, Frame, MessageKind};
use tracing::debug;

use crate::transport::Subscription;

/// Staleness interval used when a descriptor does not set one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Socket pattern of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Subscribe with the descriptor's filter.
    PubSub,
    /// Opened but never subscribed; only used for liveness.
    Other,
}

/// What the poller reports to a descriptor's callback.
#[derive(Debug, Clone, Copy)]
pub enum ServiceSignal<'a> {
    Received { service: &'a str, frame: &'a Frame },
    TimedOut { service: &'a str },
}

pub type SignalCallback = Arc<dyn Fn(&ServiceSignal<'_>) + Send + Sync>;

fn log_signal(signal: &ServiceSignal<'_>) {
    match signal {
        ServiceSignal::Received { service, frame } => {
            debug!(service = %service, kind = %frame.kind, "Service message received");
        }
        ServiceSignal::TimedOut { service } => {
            debug!(service = %service, "Service timed out");
        }
    }
}

/// One registered channel.
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub description: String,
    pub host: String,
    pub port: u16,
    pub kind: ChannelKind,
    /// Byte-prefix subscription filter; empty accepts everything.
    pub subscription: Vec<u8>,
    pub multipart: bool,
    /// Silence longer than this marks the channel inactive.
    pub interval: Duration,
    callback: SignalCallback,
}

impl ServiceDescriptor {
    /// A single-part pub/sub channel with no filter and the default interval.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            host: host.into(),
            port,
            kind: ChannelKind::PubSub,
            subscription: Vec::new(),
            multipart: false,
            interval: DEFAULT_INTERVAL,
            callback: Arc::new(log_signal),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn kind(mut self, kind: ChannelKind) -> Self {
        self.kind = kind;
        self
    }

    /// Multi-part framing, subscribed to a single message kind.
    pub fn multipart_on(mut self, kind: MessageKind) -> Self {
        self.multipart = true;
        self.subscription = kind.filter();
        self
    }

    pub fn multipart(mut self, multipart: bool) -> Self {
        self.multipart = multipart;
        self
    }

    pub fn subscribe(mut self, filter: impl Into<Vec<u8>>) -> Self {
        self.subscription = filter.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replace the decode callback.
    pub fn on_signal<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ServiceSignal<'_>) + Send + Sync + 'static,
    {
        self.callback = Arc::new(callback);
        self
    }

    /// `ws://host:port`
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// Filter that is actually applied: `Other` channels never subscribe.
    pub fn effective_filter(&self) -> &[u8] {
        match self.kind {
            ChannelKind::PubSub => self.subscription.as_slice(),
            ChannelKind::Other => &[],
        }
    }

    /// What the poller opens for this descriptor.
    pub fn to_subscription(&self) -> Subscription {
        Subscription::new(self.name.clone(), self.endpoint())
            .multipart(self.multipart)
            .filter(self.effective_filter().to_vec())
    }

    pub fn notify(&self, signal: &ServiceSignal<'_>) {
        (self.callback)(signal);
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint())
            .field("kind", &self.kind)
            .field("subscription", &self.subscription)
            .field("multipart", &self.multipart)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Immutable, validated set of [`ServiceDescriptor`]s.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// The channels of the F-FEE test setup, all on `host`.
    pub fn default_table(host: &str) -> Self {
        let services = vec![
            ServiceDescriptor::new("cm_cs", host, 6001)
                .describe("The Configuration Control Server"),
            ServiceDescriptor::new("sm_cs", host, 6101).describe("The Storage Manager"),
            ServiceDescriptor::new("pm_cs", host, 6201).describe("The Process Manager"),
            ServiceDescriptor::new("syn_cs", host, 6205)
                .describe("The Synoptics Control Server storing device independent housekeeping"),
            // STATUS is published every second.
            ServiceDescriptor::new("data_dump", host, 30304)
                .describe("The Data Dumper for F-CAM SpaceWire data")
                .multipart_on(MessageKind::STATUS),
            ServiceDescriptor::new("dpu_cs", host, 6601).describe("The DPU Processor"),
            // SYNC_TIMECODE is published every 2.5 s.
            ServiceDescriptor::new("data", host, 30103)
                .describe("The Data Distribution by the Data Processor")
                .multipart_on(MessageKind::SYNC_TIMECODE)
                .interval(Duration::from_secs(5)),
        ];
        Self { services }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Collects descriptors and validates them in [`ServiceRegistryBuilder::build`].
#[derive(Debug, Default)]
pub struct ServiceRegistryBuilder {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistryBuilder {
    pub fn with(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    /// # Errors
    ///
    /// [`FeeError::Registration`] for duplicate names or a zero interval.
    pub fn build(self) -> Result<ServiceRegistry, FeeError> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(FeeError::Registration(format!(
                    "service '{}' registered twice",
                    service.name
                )));
            }
            if service.interval.is_zero() {
                return Err(FeeError::Registration(format!(
                    "service '{}' has a zero staleness interval",
                    service.name
                )));
            }
        }
        Ok(ServiceRegistry {
            services: self.services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_table_matches_test_setup() {
        let registry = ServiceRegistry::default_table("localhost");
        assert_eq!(
            registry.names(),
            vec!["cm_cs", "sm_cs", "pm_cs", "syn_cs", "data_dump", "dpu_cs", "data"]
        );

        let data = registry.get("data").unwrap();
        assert_eq!(data.port, 30103);
        assert!(data.multipart);
        assert_eq!(data.subscription, vec![0x80]);
        assert_eq!(data.interval, Duration::from_secs(5));
        assert_eq!(data.endpoint(), "ws://localhost:30103");

        let cm = registry.get("cm_cs").unwrap();
        assert!(!cm.multipart);
        assert!(cm.subscription.is_empty());
        assert_eq!(cm.interval, DEFAULT_INTERVAL);

        assert_eq!(registry.get("data_dump").unwrap().subscription, vec![0x90]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = ServiceRegistry::builder()
            .with(ServiceDescriptor::new("a", "localhost", 1))
            .with(ServiceDescriptor::new("a", "localhost", 2))
            .build();
        assert!(matches!(result, Err(FeeError::Registration(_))));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = ServiceRegistry::builder()
            .with(ServiceDescriptor::new("a", "localhost", 1).interval(Duration::ZERO))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn other_channels_ignore_subscription() {
        let desc = ServiceDescriptor::new("x", "h", 1)
            .subscribe(vec![0x90])
            .kind(ChannelKind::Other);
        assert!(desc.effective_filter().is_empty());
        assert!(desc.to_subscription().filters.is_empty());
    }

    #[test]
    fn subscription_carries_framing_and_filter() {
        let registry = ServiceRegistry::default_table("dpu");
        let sub = registry.get("data_dump").unwrap().to_subscription();
        assert_eq!(sub.endpoint, "ws://dpu:30304");
        assert!(sub.multipart);
        assert_eq!(sub.filters, vec![vec![0x90]]);
    }

    #[test]
    fn callback_is_invoked() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let desc = ServiceDescriptor::new("x", "h", 1).on_signal(move |signal| {
            if let ServiceSignal::TimedOut { service } = signal {
                assert_eq!(*service, "x");
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        desc.notify(&ServiceSignal::TimedOut { service: "x" });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
