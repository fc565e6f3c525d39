//! `ffee` – headless F-FEE ground-support console.
//!
//! 1. Loads `~/.ffee/config.toml`, writing the defaults on first run.
//! 2. Starts the telemetry monitor and command dispatcher against the
//!    configured DPU / CM_CS endpoints, or against an in-process simulated
//!    front-end when `simulate = true`.
//! 3. Runs the service liveness poller next to an interactive REPL.
//! 4. On `/quit` or Ctrl-C shuts everything down in order and reports the
//!    commands that were still queued.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ffee_hal::{EndpointRegistry, SimFee, WsControlConnector, operations};
use ffee_middleware::{
    ChannelOpener, FramePublisher, MemoryChannelOpener, ServiceDescriptor, ServiceRegistry,
    WsChannelOpener,
};
use ffee_runtime::{Console, ServiceLivenessPoller, init_tracing};
use ffee_types::{FeeError, Frame, MessageKind};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Publication period of the simulated front-end.
const SIM_PERIOD: Duration = Duration::from_secs(1);

fn main() {
    if let Err(e) = init_tracing() {
        eprintln!("{}: {}", "Logging disabled".yellow(), e);
    }

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "Ctrl-C received – shutting down …".yellow().bold());
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let cfg = match config::load_or_create() {
        Ok((cfg, created)) => {
            let verb = if created { "Config written to" } else { "Config loaded from" };
            println!("  {} {}", verb, config::config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let outcome = runtime.block_on(run(cfg, shutdown));
    // The stdin reader may still be parked on a blocking read.
    runtime.shutdown_timeout(Duration::from_millis(200));

    if let Err(e) = outcome {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cfg: Config, shutdown: Arc<AtomicBool>) -> Result<(), FeeError> {
    let registry = cfg.service_registry()?;

    let (opener, endpoints, simulation) = if cfg.simulate {
        let (opener, endpoints, task) = simulated(&registry)?;
        println!("  Mode: {}", "SIMULATED front-end".yellow().bold());
        (opener, endpoints, Some(task))
    } else {
        let (opener, endpoints) = live(&cfg)?;
        println!(
            "  DPU {}  CM_CS {}  data {}",
            cfg.dpu_control_url.bold(),
            cfg.cm_control_url.bold(),
            format!("ws://{}:{}", cfg.dpu_host, cfg.data_distribution_port).bold()
        );
        (opener, endpoints, None)
    };

    let (mut console, mut sink) = Console::start(cfg.console_config(), opener.clone(), endpoints)?;
    let poller = ServiceLivenessPoller::new(registry, opener, console.bus(), cfg.poller_config());
    let (poller_task, poller_token) = poller.spawn();

    println!(
        "  Commanding is {}. Type {} to enable it, {} for a list of commands.\n",
        "disabled".yellow(),
        "/commanding".bold().cyan(),
        "/help".bold().cyan()
    );

    repl::run(&mut console, &mut sink, shutdown).await;

    poller_token.cancel();
    let drained = tokio::task::spawn_blocking(move || console.shutdown())
        .await
        .map_err(|e| FeeError::Worker(format!("shutdown task: {e}")))??;
    if let Err(e) = poller_task.await {
        warn!(error = %e, "Liveness poller ended abnormally");
    }
    if let Some(task) = simulation {
        task.abort();
    }

    if drained.is_empty() {
        println!("  {} No commands were pending.", "✓".green());
    } else {
        println!(
            "  {} {} queued command(s) were not executed:",
            "!".yellow().bold(),
            drained.len()
        );
        for command in &drained {
            println!("    • {command}");
        }
    }
    info!(drained = drained.len(), "Console exited");
    Ok(())
}

type Channels = (Arc<dyn ChannelOpener>, EndpointRegistry);

fn live(cfg: &Config) -> Result<Channels, FeeError> {
    let dpu = WsControlConnector::new(
        operations::DPU,
        &cfg.dpu_control_url,
        operations::dpu_operations(),
    )
    .with_call_timeout(cfg.call_timeout());
    let cm = WsControlConnector::new(
        operations::CM_CS,
        &cfg.cm_control_url,
        operations::cm_operations(),
    )
    .with_call_timeout(cfg.call_timeout());
    let endpoints = EndpointRegistry::new()
        .with(Box::new(dpu))?
        .with(Box::new(cm))?;
    let opener: Arc<dyn ChannelOpener> = Arc::new(WsChannelOpener::default());
    Ok((opener, endpoints))
}

/// In-memory channels fed by a [`SimFee`]: the monitor channel gets full
/// telemetry cycles, every registered service a heartbeat of the kind it
/// subscribes to.
fn simulated(
    registry: &ServiceRegistry,
) -> Result<(Arc<dyn ChannelOpener>, EndpointRegistry, JoinHandle<()>), FeeError> {
    let fee = SimFee::new();
    let opener = MemoryChannelOpener::new();
    let monitor = opener.register("monitor");
    let heartbeats: Vec<_> = registry
        .iter()
        .map(|d| (opener.register(&d.name), heartbeat_kind(d)))
        .collect();
    let endpoints = EndpointRegistry::new()
        .with(Box::new(fee.dpu_connector()))?
        .with(Box::new(fee.cm_connector()))?;

    let task = tokio::spawn(publish_simulated(fee, monitor, heartbeats));
    let opener: Arc<dyn ChannelOpener> = Arc::new(opener);
    Ok((opener, endpoints, task))
}

fn heartbeat_kind(descriptor: &ServiceDescriptor) -> MessageKind {
    match descriptor.effective_filter().first() {
        Some(&kind) if descriptor.multipart => MessageKind(kind),
        _ => MessageKind::ALL,
    }
}

async fn publish_simulated(
    fee: SimFee,
    monitor: FramePublisher,
    heartbeats: Vec<(FramePublisher, MessageKind)>,
) {
    let mut tick = tokio::time::interval(SIM_PERIOD);
    loop {
        tick.tick().await;
        match fee.telemetry_cycle() {
            Ok(frames) => {
                for frame in frames {
                    if let Err(e) = monitor.publish(frame) {
                        debug!(error = %e, "Simulated telemetry dropped");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Simulated telemetry failed"),
        }
        for (publisher, kind) in &heartbeats {
            let frame = if *kind == MessageKind::SYNC_TIMECODE {
                fee.timecode_frame()
            } else {
                Ok(Frame::new(*kind, vec![b"{}".to_vec()]))
            };
            match frame {
                Ok(frame) => {
                    if let Err(e) = publisher.publish(frame) {
                        debug!(error = %e, "Simulated heartbeat dropped");
                    }
                }
                Err(e) => warn!(error = %e, "Simulated heartbeat failed"),
            }
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        F-FEE Ground Support          ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!(
        "  {} {}",
        "ffee".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}
