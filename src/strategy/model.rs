// src/strategy/model.rs — Statistical-model interface and its strategy adapter

use async_trait::async_trait;
use std::sync::Arc;

use super::random::DrawSeeds;
use super::Strategy;
use crate::core::types::{Candidate, Domain, IssueRecord};
use crate::fusion::priors::Distributions;
use crate::fusion::sampling;
use crate::infra::config::ModelConfig;
use crate::infra::errors::FusionLoopError;

/// Prediction side of a statistical model. Training happens elsewhere.
pub trait StatisticalModel: Send + Sync {
    fn name(&self) -> &str;

    /// Probability vectors over `[1,P]` and `[1,S]` for `issue_index`.
    fn predict_distributions(&self, issue_index: u64) -> Result<Distributions, FusionLoopError>;
}

/// Laplace-smoothed frequencies over the records strictly before the issue.
pub struct FrequencyModel {
    history: Arc<[IssueRecord]>,
    domain: Domain,
    window: usize,
    smoothing: f64,
}

impl FrequencyModel {
    pub fn new(history: Arc<[IssueRecord]>, domain: Domain, cfg: &ModelConfig) -> Self {
        Self {
            history,
            domain,
            window: cfg.window,
            smoothing: cfg.smoothing.max(0.0),
        }
    }
}

impl StatisticalModel for FrequencyModel {
    fn name(&self) -> &str {
        "frequency"
    }

    fn predict_distributions(&self, issue_index: u64) -> Result<Distributions, FusionLoopError> {
        let before: Vec<&IssueRecord> = self
            .history
            .iter()
            .filter(|r| r.index < issue_index)
            .collect();
        if before.is_empty() {
            return Err(FusionLoopError::Model(format!(
                "no history before issue {}",
                issue_index
            )));
        }
        let start = if self.window > 0 {
            before.len().saturating_sub(self.window)
        } else {
            0
        };

        let mut primary = vec![self.smoothing; self.domain.primary_max as usize];
        let mut secondary = vec![self.smoothing; self.domain.secondary_max as usize];
        for r in &before[start..] {
            for n in r.draw.primary() {
                if let Some(slot) = primary.get_mut(*n as usize - 1) {
                    *slot += 1.0;
                }
            }
            if let Some(slot) = secondary.get_mut(r.draw.secondary() as usize - 1) {
                *slot += 1.0;
            }
        }
        Distributions { primary, secondary }
            .conformed(&self.domain)
            .ok_or_else(|| FusionLoopError::Model("degenerate frequency table".into()))
    }
}

/// Strategy that samples a candidate from the model's distributions.
pub struct ModelStrategy {
    model: Arc<dyn StatisticalModel>,
    domain: Domain,
    draws: DrawSeeds,
}

impl ModelStrategy {
    pub const ID: &'static str = "model";

    pub fn new(model: Arc<dyn StatisticalModel>, domain: Domain, seed: Option<u64>) -> Self {
        Self {
            model,
            domain,
            draws: DrawSeeds::new(seed, Self::ID),
        }
    }
}

#[async_trait]
impl Strategy for ModelStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn generate(&self, issue_index: u64) -> Result<Candidate, FusionLoopError> {
        let dists = self
            .model
            .predict_distributions(issue_index)
            .map_err(|e| FusionLoopError::strategy(Self::ID, e))?;
        let mut rng = self.draws.next_rng(issue_index);

        let pool: Vec<(u32, f64)> = self
            .domain
            .primary_range()
            .map(|n| (n, dists.primary_of(n)))
            .collect();
        let mut primary =
            sampling::sample_without_replacement(&pool, self.domain.primary_count, 1.0, 1.0, &mut rng);
        sampling::top_up(
            &mut primary,
            self.domain.primary_count,
            self.domain.primary_max,
            &mut rng,
        );

        let pool: Vec<(u32, f64)> = self
            .domain
            .secondary_range()
            .map(|n| (n, dists.secondary_of(n)))
            .collect();
        let secondary = sampling::sample_one(&pool, 1.0, 1.0, &mut rng).unwrap_or(1);

        Candidate::new(primary, secondary, &self.domain)
    }
}
