use std::path::PathBuf;

use clap::Parser;

/// MPEG-TS ingestion from DVB adapters and pre-recorded files.
#[derive(Debug, Parser)]
#[command(name = "tsrelay", version, about)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TSRELAY_CONFIG")]
    pub config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silence everything below warnings
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
