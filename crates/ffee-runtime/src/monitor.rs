//! [`TelemetryMonitor`] – background subscriber on the data distribution
//! channel.
//!
//! Each cycle of the worker:
//!
//! 1. applies a pending accumulator reset (always followed by an
//!    `OutbuffChanged` event);
//! 2. waits at most [`MonitorConfig::poll_timeout`] for a frame;
//! 3. decodes the frame with a [`TelemetryDecoder`] and posts the resulting
//!    events, or an `ExceptionCaught` if decoding failed;
//! 4. runs the [`SilenceWatchdog`] and posts `TimeoutReached` /
//!    `ShutdownReached` once per silence episode.
//!
//! A malformed frame never stops the loop.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use ffee_kernel::{FieldDecoder, JsonFieldDecoder, SilenceTransition, SilenceWatchdog, TelemetryDecoder};
use ffee_middleware::{ChannelOpener, EventBus, FrameSource, Subscription};
use ffee_types::{EventPayload, FeeError, MessageKind};
use tracing::{debug, info, warn};

use crate::worker::{CancelToken, POLL_STEP, WorkerHandle};

/// Port of the DPU data distribution channel.
pub const DATA_DISTRIBUTION_PORT: u16 = 30103;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub subscription: Subscription,
    /// Silence before `TimeoutReached`.
    pub soft_timeout: Duration,
    /// Silence before `ShutdownReached`.
    pub hard_timeout: Duration,
    pub poll_timeout: Duration,
}

impl MonitorConfig {
    /// Register maps and housekeeping from the data distribution channel of
    /// the DPU at `host`.
    pub fn for_host(host: &str, port: u16) -> Self {
        let subscription = Subscription::new("monitor", format!("ws://{host}:{port}"))
            .multipart(true)
            .filter(MessageKind::F_FEE_REGISTER_MAP.filter())
            .filter(MessageKind::SYNC_HK_DATA.filter());
        Self {
            subscription,
            soft_timeout: Duration::from_secs(6),
            hard_timeout: Duration::from_secs(10),
            poll_timeout: POLL_STEP,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::for_host("localhost", DATA_DISTRIBUTION_PORT)
    }
}

/// Handle to the running monitor thread.  There is no restart: once
/// cancelled, start a new monitor.
#[derive(Debug)]
pub struct TelemetryMonitor {
    worker: WorkerHandle,
    reset: Arc<AtomicBool>,
}

impl TelemetryMonitor {
    /// Open the subscription and start the worker with the JSON decoder.
    ///
    /// # Errors
    ///
    /// The error of [`ChannelOpener::open`] if the subscription cannot be
    /// opened, or [`FeeError::Worker`] if the thread cannot be started.
    pub fn start(
        config: MonitorConfig,
        opener: Arc<dyn ChannelOpener>,
        bus: EventBus,
    ) -> Result<Self, FeeError> {
        Self::start_with_decoder(config, opener, bus, JsonFieldDecoder)
    }

    pub fn start_with_decoder<D>(
        config: MonitorConfig,
        opener: Arc<dyn ChannelOpener>,
        bus: EventBus,
        decoder: D,
    ) -> Result<Self, FeeError>
    where
        D: FieldDecoder + 'static,
    {
        let reset = Arc::new(AtomicBool::new(false));
        let reset_flag = Arc::clone(&reset);
        let bus = bus.with_source("ffee-runtime::monitor");
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let worker = WorkerHandle::spawn("ffee-monitor", move |token| async move {
            let source = match opener.open(&config.subscription).await {
                Ok(source) => {
                    let _ = ready_tx.send(Ok(()));
                    source
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let state = MonitorLoop {
                config,
                bus,
                decoder: TelemetryDecoder::new(decoder),
                reset: reset_flag,
            };
            state.run(source, token).await;
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { worker, reset }),
            Ok(Err(e)) => {
                warn!(error = %e, "Monitor could not subscribe");
                worker.join()?;
                Err(e)
            }
            Err(_) => {
                worker.join()?;
                Err(FeeError::Worker("monitor exited during startup".into()))
            }
        }
    }

    /// Ask the monitor to zero the OUTBUFF accumulator on its next cycle.
    pub fn reset_accumulator(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.worker.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(self) -> Result<(), FeeError> {
        self.worker.join()
    }
}

struct MonitorLoop<D: FieldDecoder> {
    config: MonitorConfig,
    bus: EventBus,
    decoder: TelemetryDecoder<D>,
    reset: Arc<AtomicBool>,
}

impl<D: FieldDecoder> MonitorLoop<D> {
    fn post(&self, payload: EventPayload) {
        if let Err(e) = self.bus.post(payload) {
            debug!(error = %e, "Event dropped");
        }
    }

    async fn run(mut self, mut source: Box<dyn FrameSource>, token: CancelToken) {
        info!(channel = %source.name(), "Monitor started");
        let mut watchdog = SilenceWatchdog::new(
            self.config.soft_timeout,
            self.config.hard_timeout,
            Instant::now(),
        );
        let mut source_closed = false;

        while !token.is_cancelled() {
            if self.reset.swap(false, Ordering::SeqCst) {
                let event = self.decoder.reset_accumulator();
                self.post(event);
            }

            if source_closed {
                tokio::time::sleep(self.config.poll_timeout).await;
            } else {
                match tokio::time::timeout(self.config.poll_timeout, source.next_frame()).await {
                    Err(_elapsed) => {}
                    Ok(Ok(frame)) => {
                        watchdog.frame_received(Instant::now());
                        match self.decoder.handle_frame(&frame) {
                            Ok(events) => events.into_iter().for_each(|e| self.post(e)),
                            Err(e) => {
                                warn!(kind = %frame.kind, error = %e, "Could not decode frame");
                                self.post(exception(&e, &format!("decoding {} frame", frame.kind)));
                            }
                        }
                    }
                    Ok(Err(FeeError::ChannelClosed)) => {
                        warn!(channel = %source.name(), "Telemetry channel closed");
                        source_closed = true;
                        self.post(exception(&FeeError::ChannelClosed, "reading telemetry"));
                    }
                    Ok(Err(e)) => {
                        // Undecodable message on the wire; it still proves the
                        // channel is alive.
                        watchdog.frame_received(Instant::now());
                        self.post(exception(&e, "reading telemetry"));
                    }
                }
            }

            for transition in watchdog.check(Instant::now()) {
                match transition {
                    SilenceTransition::SoftTimeout => {
                        warn!("Telemetry timeout");
                        self.post(EventPayload::TimeoutReached(format!(
                            "Timeout reached after {}s on data distribution channel.",
                            self.config.soft_timeout.as_secs()
                        )));
                    }
                    SilenceTransition::HardShutdown => {
                        warn!("Telemetry shutdown");
                        self.decoder.forget_snapshots();
                        self.post(EventPayload::ShutdownReached(format!(
                            "Resetting the monitoring panels after {}s of inactivity.",
                            self.config.hard_timeout.as_secs()
                        )));
                    }
                }
            }
        }

        drop(source);
        info!("Monitor Thread finished");
        self.post(EventPayload::LogRetrieved("Monitor Thread finished ...".into()));
    }
}

/// `ExceptionCaught` for `error`, carrying the backtrace of the reporting
/// site.
pub(crate) fn exception(error: &FeeError, context: &str) -> EventPayload {
    let backtrace = Backtrace::force_capture();
    EventPayload::ExceptionCaught {
        error: error.to_string(),
        trace: format!("while {context}: {error}\n{backtrace}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffee_hal::SimFee;
    use ffee_middleware::{EventSink, FramePublisher, MemoryChannelOpener, event_bus};
    use ffee_types::{AebStatus, AebUnit, DebMode, Event, Frame};

    fn fast_config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.soft_timeout = Duration::from_millis(300);
        config.hard_timeout = Duration::from_millis(600);
        config.poll_timeout = Duration::from_millis(20);
        config
    }

    fn start(config: MonitorConfig) -> Result<(TelemetryMonitor, FramePublisher, EventSink), FeeError> {
        let opener = MemoryChannelOpener::new();
        let publisher = opener.register("monitor");
        let (bus, sink) = event_bus();
        let monitor = TelemetryMonitor::start(config, Arc::new(opener), bus)?;
        Ok((monitor, publisher, sink))
    }

    async fn collect(sink: &mut EventSink, wait: Duration) -> Vec<Event> {
        let deadline = Instant::now() + wait;
        let mut events = Vec::new();
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match sink.recv_timeout(left).await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    fn kinds(events: &[Event]) -> Vec<&'static str> {
        events.iter().map(|e| e.payload.kind()).collect()
    }

    #[tokio::test]
    async fn decodes_simulated_cycle() -> Result<(), Box<dyn std::error::Error>> {
        let fee = SimFee::new();
        fee.set_aeb_status(AebUnit::Aeb1, AebStatus::Init);
        fee.set_dtc_in_mod([1, 1, 0, 0, 0, 0, 0, 0]);
        let (monitor, publisher, mut sink) = start(fast_config())?;

        for frame in fee.telemetry_cycle()? {
            publisher.publish(frame)?;
        }
        let events = collect(&mut sink, Duration::from_millis(200)).await;
        monitor.cancel();
        monitor.join()?;

        let payloads: Vec<_> = events.iter().map(|e| &e.payload).collect();
        assert!(payloads.contains(&&EventPayload::DebModeChanged(DebMode::On)));
        assert!(payloads.iter().any(|p| matches!(p, EventPayload::DtcInModChanged(d) if d.fields[0] == 1)));
        assert!(events.iter().all(|e| e.source == "ffee-runtime::monitor"));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_frame_does_not_stop_monitoring() -> Result<(), Box<dyn std::error::Error>> {
        let fee = SimFee::new();
        let (monitor, publisher, mut sink) = start(fast_config())?;

        publisher.publish(Frame::new(MessageKind::SYNC_HK_DATA, vec![b"not json".to_vec()]))?;
        publisher.publish(fee.deb_hk_frame()?)?;
        let events = collect(&mut sink, Duration::from_millis(200)).await;
        monitor.cancel();
        monitor.join()?;

        assert_eq!(&kinds(&events)[..2], ["ExceptionCaught", "DebModeChanged"]);
        Ok(())
    }

    #[tokio::test]
    async fn wire_error_is_reported_and_counts_as_traffic() -> Result<(), Box<dyn std::error::Error>> {
        let fee = SimFee::new();
        let (monitor, publisher, mut sink) = start(fast_config())?;

        tokio::time::sleep(Duration::from_millis(200)).await;
        publisher.publish_error(FeeError::Decode("garbled multipart".to_string()))?;
        // Past the soft threshold counted from startup.
        let first = collect(&mut sink, Duration::from_millis(250)).await;
        assert_eq!(kinds(&first), ["ExceptionCaught"]);

        publisher.publish(fee.deb_hk_frame()?)?;
        let second = collect(&mut sink, Duration::from_millis(100)).await;
        monitor.cancel();
        monitor.join()?;

        assert_eq!(kinds(&second), ["DebModeChanged"]);
        Ok(())
    }

    #[test]
    fn exception_carries_a_backtrace() {
        let EventPayload::ExceptionCaught { error, trace } =
            exception(&FeeError::Decode("bad".to_string()), "decoding")
        else {
            panic!("expected ExceptionCaught");
        };
        assert_eq!(error, "Decode Error: bad");
        assert!(trace.starts_with("while decoding: Decode Error: bad\n"));
        assert!(trace.lines().count() > 1);
    }

    #[tokio::test]
    async fn silence_reports_timeout_then_shutdown_once() -> Result<(), Box<dyn std::error::Error>> {
        let (monitor, _publisher, mut sink) = start(fast_config())?;

        let events = collect(&mut sink, Duration::from_millis(1000)).await;
        monitor.cancel();
        monitor.join()?;

        assert_eq!(kinds(&events), ["TimeoutReached", "ShutdownReached"]);
        Ok(())
    }

    #[tokio::test]
    async fn frame_rearms_the_watchdog() -> Result<(), Box<dyn std::error::Error>> {
        let fee = SimFee::new();
        let (monitor, publisher, mut sink) = start(fast_config())?;

        let first = collect(&mut sink, Duration::from_millis(450)).await;
        assert_eq!(kinds(&first), ["TimeoutReached"]);

        publisher.publish(fee.deb_hk_frame()?)?;
        let second = collect(&mut sink, Duration::from_millis(450)).await;
        monitor.cancel();
        monitor.join()?;

        assert_eq!(kinds(&second), ["DebModeChanged", "TimeoutReached"]);
        Ok(())
    }

    #[tokio::test]
    async fn each_reset_emits_its_own_event() -> Result<(), Box<dyn std::error::Error>> {
        let mut config = fast_config();
        config.soft_timeout = Duration::from_secs(60);
        config.hard_timeout = Duration::from_secs(120);
        let (monitor, _publisher, mut sink) = start(config)?;

        monitor.reset_accumulator();
        let first = collect(&mut sink, Duration::from_millis(150)).await;
        monitor.reset_accumulator();
        let second = collect(&mut sink, Duration::from_millis(150)).await;
        monitor.cancel();
        monitor.join()?;

        for batch in [first, second] {
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].payload, EventPayload::OutbuffChanged([0; 8]));
        }
        Ok(())
    }

    #[tokio::test]
    async fn cancel_is_observed_quickly() -> Result<(), Box<dyn std::error::Error>> {
        let (monitor, _publisher, mut sink) = start(MonitorConfig::default())?;
        let start = Instant::now();
        monitor.cancel();
        monitor.join()?;
        assert!(start.elapsed() < Duration::from_millis(500));

        let events = collect(&mut sink, Duration::from_millis(50)).await;
        assert_eq!(
            events.last().map(|e| &e.payload),
            Some(&EventPayload::LogRetrieved("Monitor Thread finished ...".into()))
        );
        Ok(())
    }

    #[test]
    fn start_fails_without_channel() {
        let (bus, _sink) = event_bus();
        let err = TelemetryMonitor::start(
            MonitorConfig::default(),
            Arc::new(MemoryChannelOpener::new()),
            bus,
        )
        .unwrap_err();
        assert!(matches!(err, FeeError::ConnectionUnavailable { .. }));
    }
}
