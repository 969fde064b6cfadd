//! # pitchtrack - headless guitar tuner
//!
//! Opens an input device, runs the pitch pipeline on it and reports the
//! detected note, cent offset and tuning zone every polling interval.
//!
//! ## Architecture
//! - **Audio**: `StreamDriver` from `pitchtrack-core`, analysing in the device callback
//! - **Display**: the main thread polls the published frequency on a ticker
//! - **Input**: a stdin thread turns typed commands into reconfiguration requests

mod commands;

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use pitchtrack_core::tuning::{self, TuningZone};
use pitchtrack_core::{AnalyzerConfig, AudioBackend, CpalBackend, StreamDriver, StreamSettings};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use commands::Command;

#[derive(Parser, Debug)]
#[command(name = "pitchtrack", about = "Real-time guitar tuner")]
struct Cli {
    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Input device name (default: host default input)
    #[arg(short, long)]
    device: Option<String>,

    /// Channel to analyse on multi-channel devices
    #[arg(short, long, default_value_t = 0)]
    channel: usize,

    /// Sample rate in Hz (default: device default)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Samples per audio block
    #[arg(long)]
    block_size: Option<u32>,

    /// JSON file overriding analyzer settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip harmonic octave correction
    #[arg(long)]
    no_octave_correction: bool,

    /// Display refresh interval in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Stop after this many seconds (default: run until `quit`)
    #[arg(long)]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let backend = CpalBackend;

    if cli.list_devices {
        let devices = backend.list_devices().context("failed to list input devices")?;
        info!("available input devices:");
        for (index, name) in devices.iter().enumerate() {
            match backend.capabilities(Some(name)) {
                Ok(caps) => info!(
                    "  {}: {} ({} Hz, {} channels)",
                    index, name, caps.default_sample_rate, caps.max_input_channels
                ),
                Err(_) => info!("  {}: {} (query failed)", index, name),
            }
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => AnalyzerConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AnalyzerConfig::default(),
    };
    if cli.no_octave_correction {
        config.octave_correction = false;
    }

    let settings = StreamSettings {
        device: cli.device.clone(),
        channel_index: cli.channel,
        sample_rate: cli.sample_rate,
        block_size: cli.block_size,
    };

    let driver = StreamDriver::start(backend, config, settings.clone())
        .context("failed to start audio input")?;
    info!("listening; type `device <name>`, `channel <n>`, `rate <hz>`, `block <n>` or `quit`");

    let commands = spawn_stdin_reader();
    run_display(
        driver,
        settings,
        commands,
        Duration::from_millis(cli.interval_ms.max(1)),
        cli.duration.map(Duration::from_secs),
    );
    Ok(())
}

/// Forwards stdin lines to the display loop.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Polls the driver and logs the reading whenever it changes.
fn run_display(
    mut driver: StreamDriver,
    mut settings: StreamSettings,
    commands: Receiver<String>,
    interval: Duration,
    duration: Option<Duration>,
) {
    let started = Instant::now();
    let ticker = crossbeam_channel::tick(interval);
    let mut last_line = String::new();

    loop {
        select! {
            recv(ticker) -> _ => {
                if duration.is_some_and(|limit| started.elapsed() >= limit) {
                    break;
                }
                let line = describe(driver.frequency());
                if line != last_line {
                    info!("{}", line);
                    last_line = line;
                }
            }
            recv(commands) -> msg => {
                let Ok(text) = msg else {
                    // stdin closed; keep displaying until the duration runs out.
                    if duration.is_none() {
                        break;
                    }
                    continue;
                };
                match commands::parse(&text, &settings) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(Command::Reconfigure(next))) => {
                        match driver.request_reconfigure(next.clone()) {
                            Ok(resolved) => {
                                debug!("now running {:?}", resolved);
                                settings = next;
                            }
                            Err(e) => error!("reconfiguration failed, input closed: {}", e),
                        }
                        last_line.clear();
                    }
                    Ok(None) => {}
                    Err(msg) => warn!("{}", msg),
                }
            }
        }
    }

    info!("stopping");
    driver.stop();
}

/// One display line for a published frequency.
fn describe(frequency: f32) -> String {
    if frequency <= 0.0 {
        return "--".to_string();
    }
    match tuning::detect_note(frequency) {
        Some(result) => {
            let zone = match TuningZone::classify(result.cents) {
                TuningZone::InTune => "in tune",
                TuningZone::Close if result.cents < 0.0 => "slightly flat",
                TuningZone::Close => "slightly sharp",
                TuningZone::Flat => "flat",
                TuningZone::Sharp => "sharp",
            };
            format!(
                "{:<3} {:+6.1} cents  {:>8.2} Hz  [{}] {}",
                result.note,
                result.cents,
                frequency,
                zone,
                "|".repeat(tuning::meter_value(result.cents) as usize / 5)
            )
        }
        None => format!("{:.2} Hz (no note)", frequency),
    }
}
