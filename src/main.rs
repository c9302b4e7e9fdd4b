// src/main.rs — fusionloop entry point

use clap::Parser;
use std::path::Path;

use fusionloop::cli::{self, Cli, Commands};
use fusionloop::infra::config::Config;
use fusionloop::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Respects RUST_LOG
    logger::init_logging(if cli.verbose { "info" } else { "warn" });

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Falls back to defaults if no config.toml
    let config = match cli.config {
        Some(ref path) => Config::load_from(Path::new(path))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run {
            history,
            max_attempts,
            max_seconds,
            seed,
            concurrency,
            consult,
            last,
            quiet,
        } => {
            let opts = cli::run::RunOptions {
                history,
                max_attempts,
                max_seconds,
                seed,
                concurrency,
                consult,
                last,
                quiet,
            };
            cli::run::run_closed_loop(&config, opts).await
        }
        Commands::Live {
            history,
            ticks,
            interval,
            quiet,
        } => cli::live::run_live(&config, history, ticks, interval, quiet).await,
        Commands::Tune {
            history,
            window,
            ema,
        } => cli::tune::run_tune(&config, history, window, ema).await,
        Commands::Status { detail } => cli::status::show_status(detail).await,
    }
}
