//! ocpmon - status monitor for ptp_ocp timing cards
//!
//! Reads a card's attribute namespace with hard per-read timeouts, so a
//! wedged driver attribute can never hang the tool.
//!
//! # Usage
//!
//! ```bash
//! # List timing cards
//! ocpmon devices
//!
//! # Show which optional attribute groups the card has
//! ocpmon discover
//!
//! # One snapshot as JSON or CSV
//! ocpmon snapshot --format csv
//!
//! # Health checks; exits non-zero when one fails
//! ocpmon health
//!
//! # Poll every 500 ms for ten minutes, one JSON event per line
//! ocpmon monitor --interval-ms 500 --max-duration-secs 600
//!
//! # Route a signal to SMA connector 2
//! ocpmon set sma-input 2 10Mhz
//!
//! # Pick a device and enable debug logging
//! OCP_DEVICE=/sys/class/timecard/ocp1 RUST_LOG=ocpd=debug ocpmon snapshot
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT during `monitor`: stop the session and print its summary

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ocp_core::DeviceRoot;
use ocpd::{locate_devices, locate_first_device, Engine, EngineConfig, MonitorEvent};

// ============================================================================
// CLI Arguments
// ============================================================================

/// ocpmon - safe status monitoring for ptp_ocp timing cards
#[derive(Parser, Debug)]
#[command(name = "ocpmon", version, about)]
struct Args {
    /// Device root (defaults to the first card under the class directory)
    #[arg(long, short = 'd', global = true)]
    device: Option<PathBuf>,

    /// Config file (defaults to ~/.config/ocpmon/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Per-read timeout in milliseconds
    #[arg(long, global = true)]
    read_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List timing cards under the class directory
    Devices,
    /// Probe the device for optional attribute groups
    Discover,
    /// Read a single attribute, e.g. `clock_source` or `generator[1].duty`
    Read {
        name: String,
    },
    /// Take one status snapshot
    Snapshot {
        #[arg(long, short = 'f', value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Run the health checks; exits non-zero when any check fails
    Health,
    /// Poll the device and print snapshots and changes as JSON lines
    Monitor {
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(long)]
        max_iterations: Option<u64>,
        #[arg(long)]
        max_duration_secs: Option<u64>,
        /// Print only change events, not full snapshots
        #[arg(long)]
        changes_only: bool,
    },
    /// Change a writable configuration attribute
    Set {
        #[command(subcommand)]
        target: SetTarget,
    },
}

#[derive(Subcommand, Debug)]
enum SetTarget {
    /// Select the reference clock source
    ClockSource { source: String },
    /// Route a signal to an SMA connector's input
    SmaInput { port: u8, signal: String },
    /// Route a signal to an SMA connector's output
    SmaOutput { port: u8, signal: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Csv,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ocpmon=info".parse()?)
                .add_directive("ocpd=info".parse()?)
                .add_directive("ocp_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config =
        EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(device) = args.device {
        config.device_path = Some(device);
    }
    if let Some(ms) = args.read_timeout_ms {
        config.read_timeout_ms = ms;
    }
    let config = config.validate().context("Invalid configuration")?;

    match args.command {
        Command::Devices => list_devices(&config).await,
        Command::Discover => {
            let engine = open_engine(&config).await?;
            let caps = engine.discover_capabilities().await;
            println!("{}", serde_json::to_string_pretty(&*caps)?);
            Ok(())
        }
        Command::Read { name } => {
            let engine = open_engine(&config).await?;
            let result = engine
                .reader()
                .read_str(&name)
                .await
                .with_context(|| format!("Cannot resolve attribute '{name}'"))?;
            println!("{}", result.outcome);
            Ok(())
        }
        Command::Snapshot { format } => {
            let engine = open_engine(&config).await?;
            let snapshot = engine
                .read_snapshot()
                .await
                .context("Failed to read snapshot")?;
            match format {
                Format::Json => println!("{}", snapshot.to_json()?),
                Format::Csv => print!("{}", snapshot.to_csv()),
            }
            Ok(())
        }
        Command::Health => {
            let engine = open_engine(&config).await?;
            let snapshot = engine
                .read_snapshot()
                .await
                .context("Failed to read snapshot")?;
            println!("{}", serde_json::to_string_pretty(&snapshot.health)?);
            if !snapshot.health.is_healthy() {
                anyhow::bail!("device {} is not healthy", engine.root());
            }
            Ok(())
        }
        Command::Monitor {
            interval_ms,
            max_iterations,
            max_duration_secs,
            changes_only,
        } => {
            let engine = open_engine(&config).await?;
            let mut options = engine.default_options();
            if let Some(ms) = interval_ms {
                options.interval = Duration::from_millis(ms);
            }
            if let Some(n) = max_iterations {
                options.max_iterations = n;
            }
            if let Some(secs) = max_duration_secs {
                options.max_duration = Some(Duration::from_secs(secs));
            }
            run_monitor(&engine, options, changes_only).await
        }
        Command::Set { target } => {
            let engine = open_engine(&config).await?;
            let writer = engine.writer();
            let result = match target {
                SetTarget::ClockSource { source } => writer.set_clock_source(&source).await,
                SetTarget::SmaInput { port, signal } => writer.set_sma_input(port, &signal).await,
                SetTarget::SmaOutput { port, signal } => {
                    writer.set_sma_output(port, &signal).await
                }
            };
            result.context("Write rejected")?;
            Ok(())
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn list_devices(config: &EngineConfig) -> Result<()> {
    let devices = locate_devices(&config.class_dir, config.read_timeout())
        .await
        .context("Failed to list timing cards")?;
    if devices.is_empty() {
        warn!(class_dir = %config.class_dir.display(), "No timing cards found");
    }
    for device in devices {
        println!("{device}");
    }
    Ok(())
}

/// Opens the configured device, or the first one found.
async fn open_engine(config: &EngineConfig) -> Result<Engine> {
    let root = match &config.device_path {
        Some(path) => DeviceRoot::new(path),
        None => locate_first_device(&config.class_dir, config.read_timeout())
            .await
            .context("No device given and none found")?,
    };
    Ok(Engine::new(root, config))
}

async fn run_monitor(
    engine: &Engine,
    options: ocpd::MonitorOptions,
    changes_only: bool,
) -> Result<()> {
    let mut session = engine
        .start_monitoring(options)
        .context("Failed to start monitoring")?;

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        tokio::select! {
            result = &mut shutdown, if !stopping => {
                if let Err(e) = result {
                    error!(error = %e, "Error waiting for shutdown signal");
                }
                stopping = true;
                match engine.stop_monitoring().await {
                    Ok(summary) => info!(iterations = summary.iterations, "Monitoring stopped"),
                    Err(e) => warn!(error = %e, "Monitoring did not stop cleanly"),
                }
            }
            event = session.recv() => {
                let Some(event) = event else { break };
                let line = match event {
                    MonitorEvent::Snapshot(_) if changes_only => continue,
                    MonitorEvent::Snapshot(snapshot) => {
                        json!({ "event": "snapshot", "snapshot": &*snapshot })
                    }
                    MonitorEvent::Change(change) => json!({ "event": "change", "change": change }),
                    MonitorEvent::Stopped(summary) => json!({ "event": "stopped", "summary": summary }),
                };
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
