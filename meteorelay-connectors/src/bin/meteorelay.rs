//! meteorelay CLI
//!
//! Reads loop packets as JSON lines and relays them to the collector.
//!
//! # Usage
//!
//! ```bash
//! # Relay packets piped from the station driver
//! station-driver --json | meteorelay --config weather.json
//!
//! # Replay a capture without sending anything
//! meteorelay --config weather.json --input capture.jsonl --skip-upload --log-level debug
//! ```
//!
//! One Ctrl-C stops the relay after the current request; a second one exits
//! immediately.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meteorelay_connectors::config::DEFAULT_SERVICE;
use meteorelay_connectors::{RelayConfig, RelayService};
use meteorelay_core::source::{JsonLinesSource, RecordSource, SourceError};

#[derive(Parser, Debug)]
#[command(name = "meteorelay")]
#[command(about = "Relay weather station loop packets to the meteo.cam collector", long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Service section to read under StdRESTful
    #[arg(short, long, default_value = DEFAULT_SERVICE)]
    service: String,

    /// Read packets from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Format records but do not send them
    #[arg(long)]
    skip_upload: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .format_timestamp_millis()
        .init();

    let Some(mut config) = RelayConfig::load(&args.config, &args.service)
        .with_context(|| format!("loading {}", args.config.display()))?
    else {
        log::info!("{} is disabled, nothing to do", args.service);
        return Ok(());
    };
    if args.skip_upload {
        config = config.skip_upload(true);
    }

    let mut service = RelayService::start(config).context("starting relay")?;

    let shutdown = service.shutdown_signal();
    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            process::exit(130);
        }
        log::info!("interrupt received, shutting down");
        shutdown.trigger();
    })
    .context("installing Ctrl-C handler")?;

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let mut source = JsonLinesSource::new(reader);

    let mut relayed = 0u64;
    while !interrupted.load(Ordering::SeqCst) {
        let packet = match source.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(err @ SourceError::Malformed { .. }) => {
                log::warn!("skipping input: {}", err);
                continue;
            }
            Err(err) => {
                service.shutdown();
                return Err(err).context("reading packets");
            }
        };

        match service.new_loop_packet(&packet) {
            Ok(()) => relayed += 1,
            Err(err) => log::error!("packet {} rejected: {}", packet.date_time, err),
        }
    }

    if interrupted.load(Ordering::SeqCst) {
        service.shutdown();
    } else {
        log::debug!("end of input after {} lines", source.lines_read());
        service.close();
    }

    let stats = service.stats();
    log::info!(
        "{} packets relayed: {} posted, {} failed, {} skipped, {} superseded",
        relayed,
        stats.posted.load(Ordering::Relaxed),
        stats.failed.load(Ordering::Relaxed),
        stats.skipped.load(Ordering::Relaxed),
        stats.superseded.load(Ordering::Relaxed)
    );
    Ok(())
}
