// src/fusion/mod.rs — Fusion engine: votes + priors + memory → fused candidate(s)
//
// Per call: tally weighted votes, blend the averaged prior, select K
// primaries and one secondary (exact top-K or temperature/top-p sampling),
// enforce region coverage, and overwrite the fusion trace. Batch mode
// repeats selection with an overlap limit and a bounded retry cap.

pub mod coverage;
pub mod priors;
pub mod rank;
pub mod refine;
pub mod sampling;
pub mod vote;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::core::state;
use crate::core::types::{Candidate, Domain, Proposal};
use crate::infra::config::FusionConfig;
use crate::infra::errors::FusionLoopError;
use crate::memory::{SharedMemory, TunedFusion, WeightResolver};
use crate::strategy::model::StatisticalModel;
use crate::strategy::random::DrawSeeds;

use coverage::RegionBuckets;
use priors::Distributions;
use rank::CandidateRanker;
use refine::CandidateRefiner;
use vote::{StrategyWeights, VoteTally};

/// Engine parameters, clamped to their valid ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionParams {
    pub temperature_primary: f64,
    pub temperature_secondary: f64,
    pub top_p_primary: f64,
    pub top_p_secondary: f64,
    pub alpha_primary: f64,
    pub alpha_secondary: f64,
    pub enforce_region_coverage: bool,
    pub region_buckets: Vec<[u32; 2]>,
    pub diversify: bool,
    pub max_overlap: usize,
    pub batch_retry_cap: usize,
    pub max_batch: usize,
    pub refine: bool,
    pub rescore: bool,
}

fn clamp_temperature(t: f64) -> f64 {
    if t.is_finite() {
        t.clamp(0.05, 5.0)
    } else {
        1.0
    }
}

fn clamp_top_p(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(0.05, 1.0)
    } else {
        1.0
    }
}

fn clamp_alpha(a: f64) -> f64 {
    if a.is_finite() {
        a.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Default for FusionParams {
    fn default() -> Self {
        Self::from(&FusionConfig::default())
    }
}

impl From<&FusionConfig> for FusionParams {
    fn from(cfg: &FusionConfig) -> Self {
        Self {
            temperature_primary: clamp_temperature(cfg.temperature_primary),
            temperature_secondary: clamp_temperature(cfg.temperature_secondary),
            top_p_primary: clamp_top_p(cfg.top_p_primary),
            top_p_secondary: clamp_top_p(cfg.top_p_secondary),
            alpha_primary: clamp_alpha(cfg.alpha_primary),
            alpha_secondary: clamp_alpha(cfg.alpha_secondary),
            enforce_region_coverage: cfg.enforce_region_coverage,
            region_buckets: cfg.region_buckets.clone(),
            diversify: cfg.diversify,
            max_overlap: cfg.max_overlap,
            batch_retry_cap: cfg.batch_retry_cap.max(1),
            max_batch: cfg.max_batch.max(1),
            refine: cfg.refine,
            rescore: cfg.rescore,
        }
    }
}

impl FusionParams {
    /// Overlay tuned values; unset fields keep the current ones.
    pub fn with_tuned(mut self, tuned: &TunedFusion) -> Self {
        if let Some(v) = tuned.temperature_primary {
            self.temperature_primary = clamp_temperature(v);
        }
        if let Some(v) = tuned.temperature_secondary {
            self.temperature_secondary = clamp_temperature(v);
        }
        if let Some(v) = tuned.top_p_primary {
            self.top_p_primary = clamp_top_p(v);
        }
        if let Some(v) = tuned.top_p_secondary {
            self.top_p_secondary = clamp_top_p(v);
        }
        if let Some(v) = tuned.alpha_primary {
            self.alpha_primary = clamp_alpha(v);
        }
        if let Some(v) = tuned.alpha_secondary {
            self.alpha_secondary = clamp_alpha(v);
        }
        self
    }

    pub fn primary_mode(&self) -> SelectionMode {
        SelectionMode::for_params(self.temperature_primary, self.top_p_primary)
    }

    pub fn secondary_mode(&self) -> SelectionMode {
        SelectionMode::for_params(self.temperature_secondary, self.top_p_secondary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Top-K by vote, ties by first-seen order.
    Exact,
    /// Weighted sampling under temperature and top-p.
    Sampling,
}

impl SelectionMode {
    fn for_params(temperature: f64, top_p: f64) -> Self {
        if temperature == 1.0 && top_p == 1.0 {
            SelectionMode::Exact
        } else {
            SelectionMode::Sampling
        }
    }
}

/// Audit record of the last fusion call, overwritten each time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionTrace {
    pub issue_index: u64,
    pub fused: Candidate,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub primary_mode: SelectionMode,
    pub secondary_mode: SelectionMode,
    pub weights_used: StrategyWeights,
    pub priors_used: Vec<String>,
    pub proposals: usize,
    pub coverage_swaps: usize,
    pub overlap_fallbacks: usize,
    pub created_at: DateTime<Utc>,
}

/// Steps 1-3 of a fusion call, shared by every draw in a batch.
struct Prepared {
    tally: VoteTally,
    weights: StrategyWeights,
    priors_used: Vec<String>,
    model_dists: Option<Distributions>,
}

pub struct FusionEngine {
    domain: Domain,
    params: FusionParams,
    buckets: RegionBuckets,
    prior_table: Option<Distributions>,
    model: Option<Arc<dyn StatisticalModel>>,
    memory: Arc<SharedMemory>,
    learn: bool,
    weights: Arc<WeightResolver>,
    draws: DrawSeeds,
    ranker: Option<CandidateRanker>,
    refiner: Option<CandidateRefiner>,
    trace_path: Option<PathBuf>,
    last_trace: Mutex<Option<FusionTrace>>,
}

impl FusionEngine {
    pub fn new(
        domain: Domain,
        params: FusionParams,
        memory: Arc<SharedMemory>,
        weights: Arc<WeightResolver>,
    ) -> Self {
        let buckets = RegionBuckets::new(&params.region_buckets, &domain);
        Self {
            domain,
            params,
            buckets,
            prior_table: None,
            model: None,
            memory,
            learn: true,
            weights,
            draws: DrawSeeds::new(None, "fusion"),
            ranker: None,
            refiner: None,
            trace_path: None,
            last_trace: Mutex::new(None),
        }
    }

    /// Static historical-frequency prior.
    pub fn with_prior_table(mut self, table: Option<Distributions>) -> Self {
        self.prior_table = table.and_then(|t| t.conformed(&self.domain));
        self
    }

    pub fn with_model(mut self, model: Option<Arc<dyn StatisticalModel>>) -> Self {
        self.model = model;
        self
    }

    /// Backtest seed; `None` draws from entropy.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.draws = DrawSeeds::new(seed, "fusion");
        self
    }

    pub fn with_learning(mut self, learn: bool) -> Self {
        self.learn = learn;
        self
    }

    pub fn with_ranker(mut self, ranker: CandidateRanker) -> Self {
        self.ranker = Some(ranker);
        self
    }

    pub fn with_refiner(mut self, refiner: CandidateRefiner) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn with_trace_path(mut self, path: PathBuf) -> Self {
        self.trace_path = Some(path);
        self
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    pub fn weights(&self) -> &Arc<WeightResolver> {
        &self.weights
    }

    /// Forget per-issue draw counters once an issue is finished.
    pub fn release(&self, issue_index: u64) {
        self.draws.release(issue_index);
    }

    pub fn last_trace(&self) -> Option<FusionTrace> {
        self.last_trace.lock().ok().and_then(|t| t.clone())
    }

    /// Fuse the proposals into one candidate.
    pub fn fuse(&self, proposals: &[Proposal], issue_index: u64) -> Result<Candidate, FusionLoopError> {
        let prepared = self.prepare(proposals, issue_index);
        let mut rng = self.draws.next_rng(issue_index);
        let (fused, swaps) = self.select(&prepared.tally, false, &mut rng)?;
        self.record_trace(&prepared, issue_index, proposals.len(), fused.clone(), Vec::new(), swaps, 0);
        Ok(fused)
    }

    /// Fuse into `count` candidates (clamped to `[1, max_batch]`).
    ///
    /// A draw sharing more than `max_overlap` primaries with an accepted
    /// candidate is redrawn, up to `batch_retry_cap` times, then accepted
    /// anyway. Draws after the first always sample so retries can differ.
    pub fn generate_candidates(
        &self,
        proposals: &[Proposal],
        issue_index: u64,
        count: usize,
    ) -> Result<Vec<Candidate>, FusionLoopError> {
        let count = count.clamp(1, self.params.max_batch);
        let prepared = self.prepare(proposals, issue_index);
        let mut rng = self.draws.next_rng(issue_index);

        let mut accepted: Vec<Candidate> = Vec::with_capacity(count);
        let mut swaps_total = 0;
        let mut fallbacks = 0;
        for i in 0..count {
            let mut tries = 0;
            loop {
                tries += 1;
                let (c, swaps) = self.select(&prepared.tally, i > 0, &mut rng)?;
                let diverse = !self.params.diversify
                    || accepted.iter().all(|a| a.overlap(&c) <= self.params.max_overlap);
                if diverse || tries >= self.params.batch_retry_cap {
                    if !diverse {
                        fallbacks += 1;
                        tracing::debug!(
                            "Batch draw {} kept after {} tries despite overlap",
                            i + 1,
                            tries
                        );
                    }
                    swaps_total += swaps;
                    accepted.push(c);
                    break;
                }
            }
        }

        if let (true, Some(refiner)) = (self.params.refine, &self.refiner) {
            let changed = refiner.refine_all(&mut accepted, issue_index, &self.domain);
            tracing::debug!("Refined {} of {} candidates on issue {}", changed, accepted.len(), issue_index);
        }
        if let (true, Some(ranker)) = (self.params.rescore, &self.ranker) {
            ranker.rank(&mut accepted, issue_index, &self.domain, prepared.model_dists.as_ref());
        }

        let fused = accepted[0].clone();
        self.record_trace(
            &prepared,
            issue_index,
            proposals.len(),
            fused,
            accepted.clone(),
            swaps_total,
            fallbacks,
        );
        Ok(accepted)
    }

    /// Decay then boost memory. Returns false when learning is off.
    pub fn update_memory(&self, fused: &Candidate, batch: &[Candidate]) -> anyhow::Result<bool> {
        if !self.learn {
            return Ok(false);
        }
        self.memory.update(fused, batch)?;
        Ok(true)
    }

    fn prepare(&self, proposals: &[Proposal], issue_index: u64) -> Prepared {
        let weights = self.weights.resolve();
        let mut tally = VoteTally::collect(proposals, &weights, &self.domain);

        let mut sources = Vec::new();
        let mut priors_used = Vec::new();
        if let Some(table) = &self.prior_table {
            sources.push(table.clone());
            priors_used.push("table".to_string());
        }
        let model_dists = self.model.as_ref().and_then(|m| {
            match m.predict_distributions(issue_index) {
                Ok(d) => d.conformed(&self.domain),
                Err(e) => {
                    tracing::debug!("No model prior for issue {}: {}", issue_index, e);
                    None
                }
            }
        });
        if let (Some(d), Some(m)) = (&model_dists, &self.model) {
            sources.push(d.clone());
            priors_used.push(format!("model:{}", m.name()));
        }
        if let Some(d) = self.memory.snapshot().to_distributions(&self.domain) {
            sources.push(d);
            priors_used.push("memory".to_string());
        }
        if let Some(prior) = Distributions::average(&sources) {
            tally.blend_prior(&prior, self.params.alpha_primary, self.params.alpha_secondary);
        }

        Prepared {
            tally,
            weights,
            priors_used,
            model_dists,
        }
    }

    /// Steps 4-5: pick primaries and secondary, then region coverage.
    fn select(
        &self,
        tally: &VoteTally,
        force_sampling: bool,
        rng: &mut StdRng,
    ) -> Result<(Candidate, usize), FusionLoopError> {
        let k = self.domain.primary_count;
        let p = &self.params;

        let mut primary = if tally.primary.is_empty() {
            Vec::new()
        } else if p.primary_mode() == SelectionMode::Exact && !force_sampling {
            tally
                .primary
                .ranking()
                .into_iter()
                .filter(|n| tally.primary.of(*n) > 0.0)
                .take(k)
                .collect()
        } else {
            sampling::sample_without_replacement(
                &tally.primary.pairs(),
                k,
                p.temperature_primary,
                p.top_p_primary,
                rng,
            )
        };
        sampling::top_up(&mut primary, k, self.domain.primary_max, rng);

        let swaps = if p.enforce_region_coverage && !self.buckets.is_empty() {
            self.buckets.enforce(&mut primary, &tally.primary)
        } else {
            0
        };

        let secondary = if tally.secondary.is_empty() {
            None
        } else if p.secondary_mode() == SelectionMode::Exact && !force_sampling {
            tally.secondary.ranking().first().copied()
        } else {
            sampling::sample_one(
                &tally.secondary.pairs(),
                p.temperature_secondary,
                p.top_p_secondary,
                rng,
            )
        };
        let secondary = secondary.unwrap_or_else(|| rng.gen_range(self.domain.secondary_range()));

        Ok((Candidate::new(primary, secondary, &self.domain)?, swaps))
    }

    #[allow(clippy::too_many_arguments)]
    fn record_trace(
        &self,
        prepared: &Prepared,
        issue_index: u64,
        proposals: usize,
        fused: Candidate,
        candidates: Vec<Candidate>,
        coverage_swaps: usize,
        overlap_fallbacks: usize,
    ) {
        let trace = FusionTrace {
            issue_index,
            fused,
            candidates,
            primary_mode: self.params.primary_mode(),
            secondary_mode: self.params.secondary_mode(),
            weights_used: prepared.weights.clone(),
            priors_used: prepared.priors_used.clone(),
            proposals,
            coverage_swaps,
            overlap_fallbacks,
            created_at: Utc::now(),
        };
        if let Some(path) = &self.trace_path {
            if let Err(e) = state::write_snapshot(path, &trace) {
                tracing::debug!("Failed to write fusion trace: {}", e);
            }
        }
        if let Ok(mut last) = self.last_trace.lock() {
            *last = Some(trace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryParams;
    use std::collections::BTreeSet;

    fn cand(p: [u32; 6], s: u32) -> Candidate {
        Candidate::new(p, s, &Domain::default()).unwrap()
    }

    fn exact_params() -> FusionParams {
        FusionParams {
            alpha_primary: 0.0,
            alpha_secondary: 0.0,
            enforce_region_coverage: false,
            ..FusionParams::default()
        }
    }

    fn engine(params: FusionParams) -> FusionEngine {
        FusionEngine::new(
            Domain::default(),
            params,
            Arc::new(SharedMemory::in_memory(MemoryParams::default())),
            Arc::new(WeightResolver::uniform()),
        )
        .with_seed(Some(7))
    }

    // ─── Params ─────────────────────────────────────────────────

    #[test]
    fn test_params_clamped() {
        let cfg = FusionConfig {
            temperature_primary: 0.0,
            top_p_secondary: 3.0,
            alpha_primary: -1.0,
            ..Default::default()
        };
        let p = FusionParams::from(&cfg);
        assert!((p.temperature_primary - 0.05).abs() < 1e-12);
        assert!((p.top_p_secondary - 1.0).abs() < 1e-12);
        assert_eq!(p.alpha_primary, 0.0);
        assert_eq!(p.primary_mode(), SelectionMode::Sampling);
        assert_eq!(p.secondary_mode(), SelectionMode::Exact);
    }

    #[test]
    fn test_tuned_overlay() {
        let tuned = TunedFusion {
            temperature_primary: Some(0.8),
            alpha_secondary: Some(9.0),
            ..Default::default()
        };
        let p = FusionParams::default().with_tuned(&tuned);
        assert!((p.temperature_primary - 0.8).abs() < 1e-12);
        assert!((p.alpha_secondary - 1.0).abs() < 1e-12);
        assert!((p.top_p_primary - 1.0).abs() < 1e-12);
    }

    // ─── Selection ──────────────────────────────────────────────

    #[test]
    fn test_exact_mode_top_k() {
        let e = engine(exact_params());
        let fused = e
            .fuse(
                &[
                    Proposal::new("a", cand([1, 2, 3, 4, 5, 6], 3)),
                    Proposal::new("b", cand([1, 2, 3, 4, 5, 7], 3)),
                ],
                0,
            )
            .unwrap();
        assert_eq!(fused.primary(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(fused.secondary(), 3);
    }

    #[test]
    fn test_empty_proposals_fall_back_to_random() {
        let e = engine(exact_params());
        let fused = e.fuse(&[], 0).unwrap();
        assert_eq!(fused.primary().len(), 6);
    }

    #[test]
    fn test_sampling_mode_valid() {
        let e = engine(FusionParams {
            temperature_primary: 0.7,
            top_p_primary: 0.9,
            temperature_secondary: 1.5,
            ..FusionParams::default()
        });
        let proposals = vec![
            Proposal::new("a", cand([1, 2, 3, 4, 5, 6], 3)),
            Proposal::new("b", cand([10, 12, 14, 16, 18, 20], 4)),
        ];
        for i in 0..50 {
            let c = e.fuse(&proposals, i).unwrap();
            let set: BTreeSet<u32> = c.primary().iter().copied().collect();
            assert_eq!(set.len(), 6);
        }
    }

    #[test]
    fn test_coverage_applied() {
        let e = engine(FusionParams {
            alpha_primary: 0.0,
            ..FusionParams::default()
        });
        let fused = e
            .fuse(&[Proposal::new("a", cand([1, 2, 3, 4, 5, 6], 1))], 0)
            .unwrap();
        assert!(fused.primary().iter().any(|n| (12..=22).contains(n)));
        assert!(fused.primary().iter().any(|n| (23..=33).contains(n)));
        let trace = e.last_trace().unwrap();
        assert_eq!(trace.coverage_swaps, 2);
    }

    // ─── Batch ──────────────────────────────────────────────────

    #[test]
    fn test_batch_overlap_bounded() {
        let e = engine(FusionParams {
            max_overlap: 2,
            ..exact_params()
        });
        let proposals: Vec<Proposal> = (0..5)
            .map(|i| {
                let base = i * 6;
                Proposal::new(
                    format!("s{i}"),
                    cand([base + 1, base + 2, base + 3, base + 4, base + 5, base + 6], 1),
                )
            })
            .collect();
        let batch = e.generate_candidates(&proposals, 0, 5).unwrap();
        assert_eq!(batch.len(), 5);
        let trace = e.last_trace().unwrap();
        if trace.overlap_fallbacks == 0 {
            for (i, a) in batch.iter().enumerate() {
                for b in &batch[i + 1..] {
                    assert!(a.overlap(b) <= 2);
                }
            }
        }
    }

    #[test]
    fn test_batch_count_clamped() {
        let e = engine(FusionParams {
            max_batch: 3,
            diversify: false,
            ..exact_params()
        });
        let proposals = vec![Proposal::new("a", cand([1, 2, 3, 4, 5, 6], 1))];
        assert_eq!(e.generate_candidates(&proposals, 0, 0).unwrap().len(), 1);
        assert_eq!(e.generate_candidates(&proposals, 0, 99).unwrap().len(), 3);
    }

    // ─── Priors & memory ────────────────────────────────────────

    #[test]
    fn test_memory_prior_recorded_in_trace() {
        let e = engine(FusionParams::default());
        e.update_memory(&cand([1, 2, 3, 4, 5, 6], 1), &[]).unwrap();
        e.fuse(&[Proposal::new("a", cand([7, 8, 9, 10, 11, 12], 2))], 0)
            .unwrap();
        let trace = e.last_trace().unwrap();
        assert_eq!(trace.priors_used, vec!["memory".to_string()]);
    }

    #[test]
    fn test_learning_disabled() {
        let e = engine(FusionParams::default()).with_learning(false);
        assert!(!e.update_memory(&cand([1, 2, 3, 4, 5, 6], 1), &[]).unwrap());
    }
}
