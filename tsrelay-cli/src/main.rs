mod cli;
mod config;
mod sink;

use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::config::{AppConfig, InputConfig};
use crate::sink::OutputSink;

use dvb_input::DvbInput;
use file_input::FileInput;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(err) = run(args).await {
        // configuration and open errors must never leave a half-running
        // pipeline behind
        error!("{err:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AppConfig::load(&args.config)?;
    let mut sink = OutputSink::open(&config.output)?;

    match config.input {
        InputConfig::Dvb { dvb, pids } => {
            let mut input = DvbInput::open(&dvb)?;
            for pid in pids {
                input.join_pid(pid);
            }
            input.set_event_handler(Box::new(|report| {
                match serde_json::to_string(report) {
                    Ok(json) => info!(status = %json, "tuner event"),
                    Err(_) => info!(lock = report.lock, "tuner event"),
                }
            }));

            tokio::select! {
                result = input.run(&mut sink) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                }
            }
            let report = input.status();
            if let Ok(json) = serde_json::to_string(&report) {
                info!(status = %json, "final status");
            }
        }
        InputConfig::File { file } => {
            let mut input = FileInput::open(&file)?;
            tokio::select! {
                result = input.run(&mut sink) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                }
            }
        }
    }

    Ok(())
}
