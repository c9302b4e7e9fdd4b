// src/cli/run.rs — `fusionloop run`: closed-loop backtest over the history

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::setup;
use crate::consult::{ConsultGate, OpenAiCompatConsult};
use crate::core::budget::BudgetLimits;
use crate::core::scheduler::ClosedLoopScheduler;
use crate::core::summary::ClosedLoopSummary;
use crate::core::types::Domain;
use crate::infra::config::Config;
use crate::infra::paths::{self, ArtifactPaths};

/// Command-line overrides for a closed-loop run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub history: Option<PathBuf>,
    pub max_attempts: Option<i64>,
    pub max_seconds: Option<f64>,
    pub seed: Option<u64>,
    pub concurrency: Option<usize>,
    pub consult: bool,
    /// Only the last N issues.
    pub last: Option<usize>,
    pub quiet: bool,
}

impl RunOptions {
    fn apply(&self, config: &mut Config) {
        if let Some(v) = self.max_attempts {
            config.closed_loop.max_attempts_per_issue = v;
        }
        if let Some(v) = self.max_seconds {
            config.closed_loop.max_seconds_per_issue = Some(v);
        }
        if self.seed.is_some() {
            config.closed_loop.seed = self.seed;
        }
        if let Some(v) = self.concurrency {
            config.closed_loop.concurrency_limit = v;
        }
        if self.consult {
            config.consult.enabled = true;
        }
    }
}

pub async fn run_closed_loop(config: &Config, opts: RunOptions) -> anyhow::Result<()> {
    let mut config = config.clone();
    opts.apply(&mut config);

    let paths = ArtifactPaths::from_env();
    let history_path = opts.history.clone().unwrap_or_else(paths::default_history_path);
    let domain = Domain::from(&config.domain);
    let history = setup::load_history(&history_path, &domain)?;
    let engine = setup::assemble(&config, &paths, history, false)?;

    let start = opts
        .last
        .map(|n| engine.history.len().saturating_sub(n))
        .unwrap_or(0);
    let records = &engine.history[start..];

    let mut scheduler = ClosedLoopScheduler::new(
        engine.strategies.clone(),
        engine.fusion.clone(),
        BudgetLimits::from(&config.closed_loop),
    )
    .with_seed(config.closed_loop.seed)
    .with_concurrency(config.closed_loop.concurrency_limit)
    .with_sleep_interval(Duration::from_millis(config.closed_loop.sleep_interval_ms))
    .with_attempt_log(paths.attempt_log())
    .with_summary_path(paths.closed_loop_summary());

    if config.consult.enabled {
        match OpenAiCompatConsult::from_config(&config.consult) {
            Some(client) => {
                let gate = ConsultGate::new(Arc::new(client), &config.consult);
                scheduler = scheduler.with_consult(Arc::new(gate), config.consult.interval);
            }
            None => tracing::warn!(
                "Consult disabled: {} is not set",
                config.consult.api_key_env
            ),
        }
    }
    if !opts.quiet {
        scheduler = scheduler.with_progress(super::progress::terminal_progress());
    }

    let cancel = super::cancel_on_ctrl_c();
    let summary = scheduler.run_batch(records, &cancel).await;
    print_summary(&summary, &paths);
    Ok(())
}

fn print_summary(summary: &ClosedLoopSummary, paths: &ArtifactPaths) {
    println!(
        "Issues: {}  Matches: {} ({:.1}%)  Attempts: {}{}",
        summary.total_issues,
        summary.total_matches,
        summary.match_rate() * 100.0,
        summary.total_attempts,
        if summary.cancelled { "  (cancelled)" } else { "" }
    );
    for (id, stats) in &summary.strategy_stats {
        println!("  {:<10} {:>8} attempts {:>4} matches", id, stats.attempts, stats.matches);
    }
    println!("Summary: {}", paths.closed_loop_summary().display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_override_config() {
        let mut cfg = Config::default();
        RunOptions {
            max_attempts: Some(5),
            max_seconds: Some(0.5),
            seed: Some(9),
            concurrency: Some(4),
            consult: true,
            ..Default::default()
        }
        .apply(&mut cfg);
        assert_eq!(cfg.closed_loop.max_attempts_per_issue, 5);
        assert_eq!(cfg.closed_loop.max_seconds_per_issue, Some(0.5));
        assert_eq!(cfg.closed_loop.seed, Some(9));
        assert_eq!(cfg.closed_loop.concurrency_limit, 4);
        assert!(cfg.consult.enabled);
    }

    #[test]
    fn test_empty_options_keep_config() {
        let mut cfg = Config::default();
        RunOptions::default().apply(&mut cfg);
        assert_eq!(cfg.closed_loop.max_attempts_per_issue, 120);
        assert!(!cfg.consult.enabled);
    }
}
