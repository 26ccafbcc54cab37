//! Helyxium Daemon - Main entry point
//!
//! Runs continuous VR hardware and platform detection and serves the
//! results over REST and WebSocket.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use helyxium_core::Snapshot;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "helyxium")]
#[command(about = "VR hardware and platform detection daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "helyxium.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single detection cycle, print it, and exit
    #[arg(long)]
    scan_once: bool,

    /// Write a default configuration to --config and exit
    #[arg(long)]
    write_default_config: bool,
}

fn init_logging(log_level: &str) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        token.cancel();
    });
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("VR ready: {}", if snapshot.is_vr_ready() { "yes" } else { "no" });
    if let Some(primary) = snapshot.primary_device() {
        println!("Primary headset: {} {}", primary.vendor.as_str(), primary.model);
    }

    println!("Detected {} devices:", snapshot.devices.len());
    for device in snapshot.devices.values() {
        println!(
            "  - {} {} ({:?}, {:?}, confidence {:?})",
            device.vendor.as_str(), device.model, device.kind, device.tracking, device.confidence
        );
        if !device.diagnostics.is_complete() {
            println!("    Missing sources: {:?}", device.diagnostics.missing_sources);
        }
    }

    println!("Detected {} platforms:", snapshot.platforms.len());
    for platform in snapshot.platforms.values() {
        let state = match (platform.installed, platform.running) {
            (true, true) => "installed, running",
            (true, false) => "installed",
            (false, true) => "running",
            (false, false) => "seen",
        };
        println!("  - {} ({})", platform.platform_id.display_name(), state);
        if let Some(path) = &platform.install_path {
            println!("    Path: {}", path.display());
        }
        if let Some(version) = &platform.version {
            println!("    Version: {}", version);
        }
        if !platform.supported_titles.is_empty() {
            let titles: Vec<&str> = platform.supported_titles.iter().map(String::as_str).collect();
            println!("    Titles: {}", titles.join(", "));
        }
    }

    for (target, report) in [
        ("hardware", &snapshot.report.hardware),
        ("platforms", &snapshot.report.platforms),
    ] {
        for (probe, outcome) in report.failures() {
            println!("  ! {} probe {} failed: {:?}", target, probe, outcome);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Helyxium v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        interval_secs = config.monitor.interval_secs,
        hysteresis = config.monitor.hysteresis_cycles,
        probe_timeout_ms = config.monitor.probe_timeout_ms,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;
    cancel_on_ctrl_c(state.shutdown.clone());

    if args.scan_once {
        info!("Running single detection cycle");
        let update = state.monitor.refresh_now(&state.shutdown).await?;
        print_snapshot(&update.snapshot);
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
