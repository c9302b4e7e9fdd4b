// src/cli/mod.rs — CLI definition (clap derive)

pub mod live;
pub mod progress;
pub mod run;
pub mod setup;
pub mod status;
pub mod tune;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::cancel::CancellationToken;

#[derive(Parser)]
#[command(
    name = "fusionloop",
    about = "Multi-strategy fusion with a closed-loop retry engine",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at info level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Closed-loop backtest: retry each historical issue until match or budget
    Run {
        /// History file (CSV or TSV)
        #[arg(long)]
        history: Option<PathBuf>,
        /// Attempts per issue (0 or less = unlimited)
        #[arg(long)]
        max_attempts: Option<i64>,
        /// Seconds per issue
        #[arg(long)]
        max_seconds: Option<f64>,
        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        /// Issues processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,
        /// Enable the external consult source
        #[arg(long)]
        consult: bool,
        /// Only the last N issues
        #[arg(long)]
        last: Option<usize>,
        /// Suppress progress output (only emit final report)
        #[arg(long)]
        quiet: bool,
    },
    /// Continuous prediction ticks past the end of the history
    Live {
        #[arg(long)]
        history: Option<PathBuf>,
        /// Stop after N ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Seconds between ticks
        #[arg(long)]
        interval: Option<f64>,
        #[arg(long)]
        quiet: bool,
    },
    /// Replay strategies over the history and write tuned weights + priors
    Tune {
        #[arg(long)]
        history: Option<PathBuf>,
        /// Only the last N issues
        #[arg(long)]
        window: Option<usize>,
        /// Blend factor with the previous weights (0 = replace)
        #[arg(long, default_value = "0")]
        ema: f64,
    },
    /// Show persisted weights, memory and last run
    Status {
        /// Show detailed breakdown
        #[arg(long)]
        detail: bool,
    },
}

/// Token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[cancel] finishing in-flight work...");
            t.cancel();
        }
    });
    token
}
