//! [`Console`] – wires the queue, the event bus and both background workers
//! together and owns the ordered shutdown.
//!
//! Shutdown order:
//!
//! 1. cancel running sequences;
//! 2. cancel the telemetry monitor and join it;
//! 3. drain the command queue and wait for the in-flight command;
//! 4. cancel the dispatcher and join it.

use std::sync::Arc;
use std::time::Duration;

use ffee_hal::EndpointRegistry;
use ffee_middleware::{ChannelOpener, CommandQueue, EventBus, EventSink, event_bus};
use ffee_types::{Command, FeeError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dispatcher::{CommandDispatcher, DispatcherConfig};
use crate::monitor::{MonitorConfig, TelemetryMonitor};
use crate::sequences::{Step, run_sequence};
use crate::worker::CancelToken;

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub monitor: MonitorConfig,
    pub dispatcher: DispatcherConfig,
    /// Bound on waiting for the in-flight command at shutdown.
    pub drain_timeout: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            dispatcher: DispatcherConfig::default(),
            drain_timeout: Duration::from_secs(15),
        }
    }
}

pub struct Console {
    queue: CommandQueue,
    bus: EventBus,
    monitor: TelemetryMonitor,
    dispatcher: CommandDispatcher,
    sequences: CancelToken,
    commanding: bool,
    drain_timeout: Duration,
}

impl Console {
    /// Start monitor and dispatcher.  Commanding starts disabled.
    ///
    /// # Errors
    ///
    /// Startup errors of either worker.  If the dispatcher fails to start the
    /// already running monitor is stopped again.
    pub fn start(
        config: ConsoleConfig,
        opener: Arc<dyn ChannelOpener>,
        endpoints: EndpointRegistry,
    ) -> Result<(Self, EventSink), FeeError> {
        let (bus, sink) = event_bus();
        let queue = CommandQueue::new();

        let monitor = TelemetryMonitor::start(config.monitor, opener, bus.clone())?;
        let dispatcher =
            match CommandDispatcher::start(config.dispatcher, endpoints, queue.clone(), bus.clone())
            {
                Ok(dispatcher) => dispatcher,
                Err(e) => {
                    monitor.cancel();
                    monitor.join()?;
                    return Err(e);
                }
            };
        info!("Console started");

        let console = Self {
            queue,
            bus: bus.with_source("ffee-runtime::console"),
            monitor,
            dispatcher,
            sequences: CancelToken::new(),
            commanding: false,
            drain_timeout: config.drain_timeout,
        };
        Ok((console, sink))
    }

    /// Producer handle for other presentation-side tasks (e.g. the liveness
    /// poller).
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn commanding_enabled(&self) -> bool {
        self.commanding
    }

    pub fn set_commanding(&mut self, enabled: bool) {
        self.commanding = enabled;
        info!(enabled, "Commanding toggled");
    }

    /// Flip commanding and return the new setting.
    pub fn toggle_commanding(&mut self) -> bool {
        self.set_commanding(!self.commanding);
        self.commanding
    }

    /// Enqueue one command.
    ///
    /// # Errors
    ///
    /// [`FeeError::CommandingDisabled`] unless commanding was enabled.
    pub fn submit(&self, command: Command) -> Result<(), FeeError> {
        if !self.commanding {
            return Err(FeeError::CommandingDisabled);
        }
        self.queue.put(command);
        Ok(())
    }

    /// Run `steps` as a task on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`FeeError::CommandingDisabled`] unless commanding was enabled.
    pub fn spawn_sequence(
        &self,
        name: &str,
        steps: Vec<Step>,
    ) -> Result<JoinHandle<bool>, FeeError> {
        if !self.commanding {
            return Err(FeeError::CommandingDisabled);
        }
        let name = name.to_string();
        let queue = self.queue.clone();
        let bus = self.bus.with_source("ffee-runtime::sequence");
        let token = self.sequences.clone();
        Ok(tokio::spawn(async move {
            run_sequence(&name, steps, &queue, &bus, &token).await
        }))
    }

    /// Zero the OUTBUFF accumulator on the next monitor cycle.
    pub fn reset_frame_errors(&self) {
        self.monitor.reset_accumulator();
    }

    /// Stop everything and return the commands that were still queued.
    ///
    /// Blocks the calling thread; from async code call it through
    /// `spawn_blocking`.
    pub fn shutdown(self) -> Result<Vec<Command>, FeeError> {
        info!("Console shutting down");
        self.sequences.cancel();

        self.monitor.cancel();
        self.monitor.join()?;

        let drained = self.queue.clear();
        if !self.queue.join_timeout(self.drain_timeout) {
            warn!(
                unfinished = self.queue.unfinished(),
                "In-flight command did not finish before shutdown"
            );
        }

        self.dispatcher.cancel();
        self.dispatcher.join()?;
        info!(drained = drained.len(), "Console stopped");
        Ok(drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use ffee_hal::{SimFee, operations};
    use ffee_middleware::{FramePublisher, MemoryChannelOpener};
    use ffee_types::{DebMode, EventPayload};

    fn start(fee: &SimFee) -> Result<(Console, EventSink, FramePublisher), FeeError> {
        let opener = MemoryChannelOpener::new();
        let publisher = opener.register("monitor");
        let endpoints = EndpointRegistry::new()
            .with(Box::new(fee.dpu_connector()))?
            .with(Box::new(fee.cm_connector()))?;
        let (console, sink) = Console::start(ConsoleConfig::default(), Arc::new(opener), endpoints)?;
        Ok((console, sink, publisher))
    }

    #[tokio::test]
    async fn commanding_starts_disabled() -> Result<(), Box<dyn std::error::Error>> {
        let fee = SimFee::new();
        let (mut console, _sink, _publisher) = start(&fee)?;

        assert_eq!(
            console.submit(operations::deb_standby()),
            Err(FeeError::CommandingDisabled)
        );
        assert!(console.spawn_sequence("x", Vec::new()).is_err());
        assert!(console.toggle_commanding());
        console.submit(operations::deb_standby())?;
        assert!(console.queue().join_timeout(Duration::from_secs(2)));
        assert_eq!(fee.deb_mode(), DebMode::Standby);

        tokio::task::spawn_blocking(move || console.shutdown()).await??;
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_reports_drained_commands() -> Result<(), Box<dyn std::error::Error>> {
        let fee = SimFee::new();
        fee.set_refuse_connections(true);
        let (mut console, mut sink, _publisher) = start(&fee)?;
        console.set_commanding(true);

        let pending = vec![operations::deb_on(), operations::end_observation()];
        for command in &pending {
            console.submit(command.clone())?;
        }

        let start = Instant::now();
        let drained = tokio::task::spawn_blocking(move || console.shutdown()).await??;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(drained, pending);

        let events = sink.drain();
        assert!(events.iter().any(|e| e.payload.kind() == "CommandThreadCrashed"));
        assert!(
            events
                .iter()
                .any(|e| e.payload == EventPayload::LogRetrieved("Monitor Thread finished ...".into()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn sequence_is_cancelled_by_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let fee = SimFee::new();
        let (mut console, _sink, _publisher) = start(&fee)?;
        console.set_commanding(true);

        let handle = console.spawn_sequence(
            "immediate-on",
            crate::sequences::immediate_on(Duration::from_secs(30))?,
        )?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::task::spawn_blocking(move || console.shutdown()).await??;

        assert!(!tokio::time::timeout(Duration::from_secs(1), handle).await??);
        Ok(())
    }
}
