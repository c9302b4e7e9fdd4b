// src/core/continuous.rs — Continuous (live) prediction mode
//
// No ground truth: each tick targets a virtual issue past the end of the
// history, fuses the strategies' proposals into a batch, feeds memory, and
// publishes the result to a bounded JSONL log plus a latest-snapshot file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::cancel::CancellationToken;
use super::state;
use super::types::{Candidate, Domain, LoopEvent, Proposal, FALLBACK_ID};
use crate::fusion::{FusionEngine, FusionParams};
use crate::infra::config::{self, ContinuousConfig};
use crate::infra::errors::FusionLoopError;
use crate::strategy::random::DrawSeeds;
use crate::strategy::{self, Strategy};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Fusion parameters in effect for a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveParams {
    pub temperature_primary: f64,
    pub temperature_secondary: f64,
    pub top_p_primary: f64,
    pub top_p_secondary: f64,
    pub alpha_primary: f64,
    pub alpha_secondary: f64,
}

impl From<&FusionParams> for LiveParams {
    fn from(p: &FusionParams) -> Self {
        Self {
            temperature_primary: p.temperature_primary,
            temperature_secondary: p.temperature_secondary,
            top_p_primary: p.top_p_primary,
            top_p_secondary: p.top_p_secondary,
            alpha_primary: p.alpha_primary,
            alpha_secondary: p.alpha_secondary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveRecord {
    pub ts: DateTime<Utc>,
    pub tick: u64,
    pub virtual_issue: u64,
    pub params: LiveParams,
    pub proposals: Vec<Proposal>,
    pub fused: Candidate,
    pub candidates: Vec<Candidate>,
    pub memory_updated: bool,
}

pub struct LiveRunner {
    strategies: Vec<Arc<dyn Strategy>>,
    fusion: Arc<FusionEngine>,
    domain: Domain,
    base_index: u64,
    interval: Duration,
    candidates: usize,
    max_lines: usize,
    max_ticks: Option<u64>,
    log_path: Option<PathBuf>,
    latest_path: Option<PathBuf>,
    fallback: DrawSeeds,
    on_progress: Option<Box<dyn Fn(LoopEvent) + Send + Sync>>,
}

impl LiveRunner {
    /// `base_index` is the last real issue index; tick `t` targets `base + t`.
    pub fn new(
        strategies: Vec<Arc<dyn Strategy>>,
        fusion: Arc<FusionEngine>,
        base_index: u64,
        cfg: &ContinuousConfig,
    ) -> Self {
        let domain = *fusion.domain();
        Self {
            strategies,
            fusion,
            domain,
            base_index,
            interval: config::secs_or(cfg.tick_interval_secs, DEFAULT_INTERVAL),
            candidates: cfg.candidates.max(1),
            max_lines: cfg.max_lines,
            max_ticks: cfg.max_ticks,
            log_path: None,
            latest_path: None,
            fallback: DrawSeeds::new(None, FALLBACK_ID),
            on_progress: None,
        }
    }

    pub fn with_sinks(mut self, log_path: PathBuf, latest_path: PathBuf) -> Self {
        self.log_path = Some(log_path);
        self.latest_path = Some(latest_path);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn with_progress(mut self, cb: impl Fn(LoopEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    /// One tick: propose, fuse, batch, learn, publish.
    pub async fn tick(&self, tick: u64) -> Result<LiveRecord, FusionLoopError> {
        let issue = self.base_index.saturating_add(tick);

        let mut proposals = Vec::with_capacity(self.strategies.len());
        for s in &self.strategies {
            let inv = strategy::invoke(s.as_ref(), issue, &self.domain, &self.fallback).await;
            proposals.push(Proposal::new(s.id(), inv.candidate));
        }

        let fused = self.fusion.fuse(&proposals, issue)?;
        let candidates = self
            .fusion
            .generate_candidates(&proposals, issue, self.candidates)?;
        let memory_updated = match self.fusion.update_memory(&fused, &candidates) {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!("Memory update failed on tick {}: {}", tick, e);
                false
            }
        };
        self.fusion.release(issue);
        self.fallback.release(issue);

        let record = LiveRecord {
            ts: Utc::now(),
            tick,
            virtual_issue: issue,
            params: LiveParams::from(self.fusion.params()),
            proposals,
            fused,
            candidates,
            memory_updated,
        };
        self.publish(&record);
        Ok(record)
    }

    fn publish(&self, record: &LiveRecord) {
        if let Some(path) = &self.log_path {
            if let Err(e) = state::append_bounded(path, record, self.max_lines) {
                tracing::warn!("Failed to append live log: {}", e);
            }
        }
        if let Some(path) = &self.latest_path {
            if let Err(e) = state::write_snapshot(path, record) {
                tracing::warn!("Failed to write live snapshot: {}", e);
            }
        }
    }

    /// Tick until cancelled or `max_ticks` is reached. Returns ticks completed.
    pub async fn run(&self, cancel: &CancellationToken) -> u64 {
        let mut completed = 0u64;
        let mut tick = 1u64;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(max) = self.max_ticks {
                if completed >= max {
                    break;
                }
            }

            match self.tick(tick).await {
                Ok(record) => {
                    completed += 1;
                    tracing::info!("Tick {} → issue {}: {}", tick, record.virtual_issue, record.fused);
                    if let Some(ref cb) = self.on_progress {
                        cb(LoopEvent::Tick {
                            tick,
                            virtual_issue: record.virtual_issue,
                            fused: record.fused.clone(),
                            candidates: record.candidates.len(),
                        });
                    }
                }
                Err(e) => tracing::warn!("Tick {} failed: {}", tick, e),
            }
            tick += 1;

            let done = self.max_ticks.is_some_and(|max| completed >= max);
            if done || cancel.sleep_or_cancel(self.interval).await {
                break;
            }
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::GammaConfig;
    use crate::memory::{MemoryParams, SharedMemory, WeightResolver};
    use crate::scoring::ScoringParams;
    use crate::strategy::heuristic::{HeuristicKind, HeuristicStrategy};

    fn runner(cfg: &ContinuousConfig) -> LiveRunner {
        let domain = Domain::default();
        let fusion = Arc::new(
            FusionEngine::new(
                domain,
                FusionParams::default(),
                Arc::new(SharedMemory::in_memory(MemoryParams::default())),
                Arc::new(WeightResolver::uniform()),
            )
            .with_seed(Some(5)),
        );
        let strategies: Vec<Arc<dyn Strategy>> = HeuristicKind::ALL
            .iter()
            .map(|k| {
                Arc::new(HeuristicStrategy::new(
                    *k,
                    domain,
                    GammaConfig::default(),
                    ScoringParams::default(),
                    Some(5),
                )) as Arc<dyn Strategy>
            })
            .collect();
        LiveRunner::new(strategies, fusion, 100, cfg)
    }

    #[tokio::test]
    async fn test_tick_targets_virtual_issue() {
        let r = runner(&ContinuousConfig::default());
        let rec = r.tick(3).await.unwrap();
        assert_eq!(rec.virtual_issue, 103);
        assert_eq!(rec.proposals.len(), 3);
        assert_eq!(rec.candidates.len(), 5);
        assert!(rec.memory_updated);
    }

    #[test]
    fn test_unrepresentable_interval_uses_default() {
        for secs in [1e20, f64::INFINITY, f64::NAN] {
            let cfg = ContinuousConfig {
                tick_interval_secs: secs,
                ..Default::default()
            };
            assert_eq!(runner(&cfg).interval, DEFAULT_INTERVAL);
        }
    }

    #[tokio::test]
    async fn test_run_stops_at_max_ticks() {
        let cfg = ContinuousConfig {
            tick_interval_secs: 0.0,
            max_ticks: Some(3),
            ..Default::default()
        };
        let r = runner(&cfg);
        assert_eq!(r.run(&CancellationToken::new()).await, 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_during_wait() {
        let cfg = ContinuousConfig {
            tick_interval_secs: 3600.0,
            ..Default::default()
        };
        let r = runner(&cfg);
        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            c.cancel();
        });
        let done = tokio::time::timeout(Duration::from_secs(5), r.run(&cancel))
            .await
            .unwrap();
        assert_eq!(done, 1);
    }
}
