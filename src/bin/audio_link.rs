//! Audio Link Application
//!
//! Runs every service from the configuration file until a signal or a fatal
//! device error stops them.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_link::{
    audio::{AudioFormat, DeviceCatalog},
    config::ServiceConfig,
    constants::DEFAULT_CONFIG_PATH,
    service::{RunnerOptions, ServiceRunner},
    shutdown::{ShutdownReason, ShutdownToken},
};

#[derive(Parser)]
#[command(author, version, about = "Forward live audio between machines over TCP")]
struct Cli {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print the available audio devices and exit
    #[arg(short, long)]
    list_devices: bool,

    /// Pause before starting each channel, in milliseconds
    #[arg(long)]
    stagger_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let catalog = DeviceCatalog::new();
    if cli.list_devices {
        print_devices(&catalog);
        return Ok(());
    }

    tracing::info!("Starting Audio Link on host {}", catalog.host_name());

    let config = ServiceConfig::load_or_create(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let mut options = RunnerOptions::default();
    if let Some(ms) = cli.stagger_ms {
        options.stagger = Duration::from_millis(ms);
    }
    let format = AudioFormat::default();
    let shutdown = ShutdownToken::new();

    // Open every device before starting anything so a bad entry fails fast.
    let mut runners = Vec::with_capacity(config.service.len());
    for entry in &config.service {
        match ServiceRunner::open(entry, format, &catalog, shutdown.clone(), options) {
            Ok(runner) => runners.push(runner),
            Err(e) => {
                for runner in &runners {
                    runner.stop_all(ShutdownReason::Failure(e.to_string()));
                }
                return Err(e).with_context(|| format!("Failed to open service {}", entry.label()));
            }
        }
    }

    let signals = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let name = wait_for_signal().await;
            shutdown.request(ShutdownReason::Signal(name));
        }
    });

    let mut tasks = Vec::with_capacity(runners.len());
    for mut runner in runners {
        tasks.push(tokio::task::spawn_blocking(move || {
            tracing::info!("Starting service {}", runner.label());
            if let Err(e) = runner.start() {
                runner.stop_all(ShutdownReason::Failure(e.to_string()));
            }
            let reason = runner.wait();
            tracing::debug!("Service {} done: {}", runner.label(), reason);
            runner.join();
        }));
    }

    for task in tasks {
        task.await.context("Service task failed")?;
    }
    signals.abort();

    match shutdown.reason() {
        Some(reason) if reason.is_failure() => anyhow::bail!("{}", reason),
        _ => {
            tracing::info!("Audio Link stopped");
            Ok(())
        }
    }
}

fn print_devices(catalog: &DeviceCatalog) {
    println!("\n=== Available Audio Devices ({}) ===", catalog.host_name());
    for device in catalog.list() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
async fn wait_for_signal() -> String {
    use tokio::signal::unix::{signal, SignalKind};

    const SIGABRT: i32 = 6;

    let (mut term, mut abort) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::from_raw(SIGABRT)),
    ) {
        (Ok(term), Ok(abort)) => (term, abort),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Cannot install signal handlers, only Ctrl+C will stop: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT".to_string();
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT".to_string(),
        _ = term.recv() => "SIGTERM".to_string(),
        _ = abort.recv() => "SIGABRT".to_string(),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> String {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT".to_string()
}
