//! [`ServiceLivenessPoller`] – liveness of every registered channel.
//!
//! Runs as a task on the presentation runtime, independent of the telemetry
//! monitor.  Each cycle waits (bounded) on all channels at once, hands every
//! received frame to the descriptor's callback and posts
//! `ServiceStatusChanged` whenever a channel turns active or goes stale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ffee_kernel::StalenessTracker;
use ffee_middleware::{
    ChannelOpener, EventBus, FrameSource, ServiceDescriptor, ServiceRegistry, ServiceSignal,
};
use ffee_types::{EventPayload, FeeError, Frame};
use futures_util::FutureExt;
use futures_util::future::select_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::worker::{CancelToken, POLL_STEP, sleep_or_cancel};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Bound on the multiplexed wait of one cycle.
    pub wait: Duration,
    /// Pause between cycles.
    pub cycle_sleep: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            wait: POLL_STEP,
            cycle_sleep: Duration::from_secs(1),
        }
    }
}

struct Channel {
    descriptor: ServiceDescriptor,
    source: Option<Box<dyn FrameSource>>,
}

pub struct ServiceLivenessPoller {
    channels: Vec<Channel>,
    opener: Arc<dyn ChannelOpener>,
    bus: EventBus,
    tracker: StalenessTracker,
    config: PollerConfig,
    started: bool,
}

impl ServiceLivenessPoller {
    pub fn new(
        registry: ServiceRegistry,
        opener: Arc<dyn ChannelOpener>,
        bus: EventBus,
        config: PollerConfig,
    ) -> Self {
        let channels = registry
            .iter()
            .cloned()
            .map(|descriptor| Channel {
                descriptor,
                source: None,
            })
            .collect();
        Self {
            channels,
            opener,
            bus: bus.with_source("ffee-runtime::poller"),
            tracker: StalenessTracker::new(),
            config,
            started: false,
        }
    }

    /// `Some(true)` once `service` has published, `Some(false)` once it went
    /// stale, `None` before either.
    pub fn is_active(&self, service: &str) -> Option<bool> {
        self.tracker.is_active(service)
    }

    fn post(&self, service: &str, active: bool) {
        let payload = EventPayload::ServiceStatusChanged {
            service: service.to_string(),
            active,
        };
        if let Err(e) = self.bus.post(payload) {
            debug!(error = %e, "Event dropped");
        }
    }

    /// Open every channel that is not open yet.  Failures are retried on the
    /// next cycle.
    async fn open_missing(&mut self) {
        if !self.started {
            let now = Instant::now();
            for channel in &self.channels {
                let d = &channel.descriptor;
                self.tracker.register(&d.name, d.interval, now);
            }
            self.started = true;
        }
        for channel in self.channels.iter_mut().filter(|c| c.source.is_none()) {
            let subscription = channel.descriptor.to_subscription();
            match self.opener.open(&subscription).await {
                Ok(source) => {
                    debug!(service = %channel.descriptor.name, endpoint = %subscription.endpoint, "Channel opened");
                    channel.source = Some(source);
                }
                Err(e) => {
                    debug!(service = %channel.descriptor.name, error = %e, "Channel not opened");
                }
            }
        }
    }

    /// Wait up to `config.wait` for any channel, then take whatever else is
    /// already buffered.
    async fn receive(&mut self) -> Vec<(usize, Result<Frame, FeeError>)> {
        let wait = self.config.wait;
        let mut received = Vec::new();
        {
            let pending: Vec<_> = self
                .channels
                .iter_mut()
                .enumerate()
                .filter_map(|(i, c)| c.source.as_mut().map(|s| (i, s)))
                .map(|(i, source)| Box::pin(async move { (i, source.next_frame().await) }))
                .collect();
            if pending.is_empty() {
                tokio::time::sleep(wait).await;
            } else if let Ok(((i, result), _, _)) =
                tokio::time::timeout(wait, select_all(pending)).await
            {
                received.push((i, result));
            }
        }
        for (i, channel) in self.channels.iter_mut().enumerate() {
            let Some(source) = channel.source.as_mut() else {
                continue;
            };
            while let Some(result) = source.next_frame().now_or_never() {
                let failed = result.is_err();
                received.push((i, result));
                if failed {
                    break;
                }
            }
        }
        received
    }

    /// One poll cycle.
    ///
    /// The active indicator is posted only when a channel turns active: on
    /// its first frame and on the first frame after going stale.  Frames on
    /// a channel that is already active notify its callback but
    /// deliberately post no `ServiceStatusChanged`.
    pub async fn cycle(&mut self) {
        self.open_missing().await;
        let received = self.receive().await;
        let now = Instant::now();

        for (i, result) in received {
            let name = self.channels[i].descriptor.name.clone();
            match result {
                Ok(frame) => {
                    debug!(service = %name, kind = %frame.kind, "Message received");
                    self.channels[i].descriptor.notify(&ServiceSignal::Received {
                        service: &name,
                        frame: &frame,
                    });
                    // Transitions only; see `cycle`.
                    if self.tracker.received(&name, now) {
                        info!(service = %name, "Service active");
                        self.post(&name, true);
                    }
                }
                Err(FeeError::ChannelClosed) => {
                    warn!(service = %name, "Channel closed, reopening");
                    self.channels[i].source = None;
                }
                Err(e) => {
                    debug!(service = %name, error = %e, "Undecodable message");
                }
            }
        }

        for name in self.tracker.check(now) {
            let Some(channel) = self.channels.iter().find(|c| c.descriptor.name == name) else {
                continue;
            };
            info!(
                service = %name,
                interval = ?channel.descriptor.interval,
                "No message received within interval"
            );
            channel
                .descriptor
                .notify(&ServiceSignal::TimedOut { service: &name });
            self.post(&name, false);
        }
    }

    /// Cycle until `token` is cancelled.
    pub async fn run(mut self, token: CancelToken) {
        info!(services = self.channels.len(), "Liveness poller started");
        while !token.is_cancelled() {
            self.cycle().await;
            if sleep_or_cancel(&token, self.config.cycle_sleep).await {
                break;
            }
        }
        info!("Liveness poller stopped");
    }

    /// Run on the current tokio runtime.  Cancel the returned token to stop.
    pub fn spawn(self) -> (JoinHandle<()>, CancelToken) {
        let token = CancelToken::new();
        let handle = tokio::spawn(self.run(token.clone()));
        (handle, token)
    }
}
