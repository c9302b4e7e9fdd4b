// src/cli/live.rs — `fusionloop live`: continuous prediction ticks

use std::path::PathBuf;
use std::time::Duration;

use super::setup;
use crate::core::continuous::LiveRunner;
use crate::core::types::Domain;
use crate::infra::config::Config;
use crate::infra::paths::{self, ArtifactPaths};

pub async fn run_live(
    config: &Config,
    history: Option<PathBuf>,
    ticks: Option<u64>,
    interval_secs: Option<f64>,
    quiet: bool,
) -> anyhow::Result<()> {
    let paths = ArtifactPaths::from_env();
    let history_path = history.unwrap_or_else(paths::default_history_path);
    let domain = Domain::from(&config.domain);
    let history = setup::load_history(&history_path, &domain)?;
    let engine = setup::assemble(config, &paths, history, true)?;

    let base = engine.history.last().map(|r| r.index).unwrap_or(0);
    let mut runner = LiveRunner::new(
        engine.strategies.clone(),
        engine.fusion.clone(),
        base,
        &config.continuous,
    )
    .with_sinks(paths.live_log(), paths.live_latest());
    if ticks.is_some() {
        runner = runner.with_max_ticks(ticks);
    }
    // an override that does not fit a Duration keeps the configured interval
    if let Some(interval) = interval_secs
        .filter(|s| !s.is_nan())
        .and_then(|s| Duration::try_from_secs_f64(s.max(0.0)).ok())
    {
        runner = runner.with_interval(interval);
    }
    if !quiet {
        runner = runner.with_progress(super::progress::terminal_progress());
    }

    let cancel = super::cancel_on_ctrl_c();
    let done = runner.run(&cancel).await;
    println!("Ticks: {}  Latest: {}", done, paths.live_latest().display());
    Ok(())
}
