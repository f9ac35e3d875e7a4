use std::path::PathBuf;

use clap::{Parser, Subcommand};

use kline_cache::app::Command;
use kline_cache::config::{Overrides, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "kline-cache")]
#[command(about = "Fetch futures candles for a list of pairs and cache them as CSV")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download candles for every listed pair and save them
    Fetch {
        /// Candle interval, e.g. 1h or 15m
        #[arg(short, long)]
        timeframe: Option<String>,

        /// Pairs list (.csv, .txt, or a spreadsheet)
        #[arg(long = "pl", value_name = "FILE")]
        pairs_file: Option<PathBuf>,

        /// Number of concurrent fetch workers
        #[arg(long)]
        threads: Option<usize>,

        /// Skip zipping the batch directory
        #[arg(long)]
        no_archive: bool,
    },

    /// Report the exchange's published request-weight budget
    Probe,

    /// Zip an existing batch directory
    Archive {
        #[arg(short, long)]
        timeframe: Option<String>,
    },
}

impl Commands {
    pub fn into_command(self) -> Command {
        match self {
            Commands::Fetch {
                timeframe,
                pairs_file,
                threads,
                no_archive,
            } => Command::Fetch {
                overrides: Overrides {
                    timeframe,
                    pairs_file,
                    threads,
                },
                archive: !no_archive,
            },
            Commands::Probe => Command::Probe,
            Commands::Archive { timeframe } => Command::Archive { timeframe },
        }
    }
}
