//! # MultiRF TX
//!
//! Bench runner for the transmitter engine.
//!
//! Loads a TOML configuration, builds the selected protocol on a simulated
//! transceiver bus and runs it in real time while sweeping the sticks, so a
//! protocol's cadence, state transitions and packets can be watched in the
//! log and in the capture files.
//!
//! # Usage
//!
//! ```bash
//! multirf-tx [config.toml]
//! ```
//!
//! Without an argument `config/default.toml` is used if present, otherwise
//! built-in defaults. Ctrl+C stops the engine and powers the radio down.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use multirf_tx::bench;
use multirf_tx::config::Config;
use multirf_tx::controls::ControlVector;
use multirf_tx::engine::Transmitter;
use multirf_tx::sim::SimBus;
use multirf_tx::telemetry::CaptureWriter;

const DEFAULT_CONFIG: &str = "config/default.toml";
const LOG_FILE_PREFIX: &str = "multirf-tx.log";

fn load_config(arg: Option<PathBuf>) -> Result<Config> {
    match arg {
        Some(path) => Config::load(&path)
            .with_context(|| format!("failed to load {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG)
            .with_context(|| format!("failed to load {}", DEFAULT_CONFIG)),
        None => Ok(Config::default()),
    }
}

/// Console logging plus, when capture is on, a daily file next to the
/// captures. The guard must live until exit or buffered lines are lost.
fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let (file_layer, guard) = if config.telemetry.enabled {
        let appender = tracing_appender::rolling::daily(&config.telemetry.log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args_os().nth(1).map(PathBuf::from))?;
    let _log_guard = init_logging(&config);

    info!("MultiRF TX v{} starting...", env!("CARGO_PKG_VERSION"));

    let id = config.protocol_id()?;
    let chip = config.chip()?;
    info!(
        "Protocol {} on simulated {}, controller id 0x{:08X}, power {}",
        id, chip.name(), config.radio.controller_id, config.radio.power
    );

    let controls = ControlVector::new();
    let mut tx = Transmitter::from_config(&config, controls.clone(), SimBus::new(chip))?;

    if config.telemetry.enabled {
        let writer = CaptureWriter::new(
            &config.telemetry.log_dir,
            config.telemetry.max_records_per_file,
            config.telemetry.max_files_to_keep,
        )?;
        tx = tx.with_capture(writer);
    } else {
        warn!("Packet capture disabled");
    }

    tx.start(0)?;
    info!("Press Ctrl+C to exit");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler failed: {}", e);
        }
    };
    let summary = bench::run(&mut tx, controls.handle(), &config.scheduler, shutdown).await;

    info!(
        "Ran {:.1}s, {} protocol steps, final status: {}",
        summary.elapsed_us as f64 / 1e6,
        summary.steps,
        tx.status()
    );
    Ok(())
}
