// src/core/summary.rs — Aggregate report of a closed-loop batch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::budget::BudgetLimits;
use super::state;
use super::types::{IssueState, StrategyStats};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedLoopSummary {
    pub total_issues: usize,
    pub total_attempts: u64,
    pub total_matches: u64,
    pub strategy_stats: BTreeMap<String, StrategyStats>,
    pub issue_states: Vec<IssueState>,
    pub max_attempts_per_issue: Option<u32>,
    pub max_seconds_per_issue: Option<f64>,
    #[serde(default)]
    pub cancelled: bool,
    pub generated_at: DateTime<Utc>,
}

impl ClosedLoopSummary {
    /// Aggregate finished issue states, ordered by issue index.
    pub fn build(mut states: Vec<IssueState>, limits: &BudgetLimits, cancelled: bool) -> Self {
        states.sort_by_key(|s| s.issue_index);

        let mut strategy_stats: BTreeMap<String, StrategyStats> = BTreeMap::new();
        for s in &states {
            for (id, stats) in &s.strategies {
                strategy_stats.entry(id.clone()).or_default().absorb(stats);
            }
        }

        Self {
            total_issues: states.len(),
            total_attempts: states.iter().map(|s| s.attempts as u64).sum(),
            total_matches: states.iter().filter(|s| s.matched).count() as u64,
            strategy_stats,
            issue_states: states,
            max_attempts_per_issue: limits.max_attempts,
            max_seconds_per_issue: limits.max_duration.map(|d| d.as_secs_f64()),
            cancelled,
            generated_at: Utc::now(),
        }
    }

    pub fn match_rate(&self) -> f64 {
        if self.total_issues == 0 {
            0.0
        } else {
            self.total_matches as f64 / self.total_issues as f64
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        state::write_snapshot(path, self)
    }

    pub fn load(path: &Path) -> Option<Self> {
        state::read_snapshot(path)
    }
}
