// src/fusion/rank.rs — Order a candidate batch by bias score and model likelihood

use super::priors::Distributions;
use crate::core::types::{Candidate, Domain};
use crate::scoring::{self, BiasProfile, NumberScores, ScoringParams};

/// Reorders (never alters) a batch of fused candidates.
pub struct CandidateRanker {
    profiles: Vec<BiasProfile>,
    scoring: ScoringParams,
    live: bool,
    model_mix: f64,
}

impl CandidateRanker {
    pub fn new(profiles: Vec<BiasProfile>, scoring: ScoringParams, live: bool, model_mix: f64) -> Self {
        Self {
            profiles,
            scoring,
            live,
            model_mix: model_mix.clamp(0.0, 1.0),
        }
    }

    /// Mean candidate score across all profiles.
    fn bias_scores(&self, candidates: &[Candidate], issue_index: u64, domain: &Domain) -> Vec<f64> {
        if self.profiles.is_empty() {
            return vec![0.0; candidates.len()];
        }
        let at = self.scoring.instant_for(issue_index, self.live);
        let tables: Vec<NumberScores> = self
            .profiles
            .iter()
            .map(|p| scoring::score_numbers(p, at, domain, &self.scoring.axis_defaults))
            .collect();
        candidates
            .iter()
            .map(|c| tables.iter().map(|t| t.total(c)).sum::<f64>() / tables.len() as f64)
            .collect()
    }

    /// Sort `candidates` by `(1 - mix) * bias + mix * log-likelihood`, both min-max normalized.
    pub fn rank(
        &self,
        candidates: &mut Vec<Candidate>,
        issue_index: u64,
        domain: &Domain,
        model: Option<&Distributions>,
    ) {
        if candidates.len() < 2 {
            return;
        }
        let bias = min_max(&self.bias_scores(candidates, issue_index, domain));
        let combined: Vec<f64> = match model {
            Some(d) if self.model_mix > 0.0 => {
                let ll: Vec<f64> = candidates.iter().map(|c| log_likelihood(c, d)).collect();
                let ll = min_max(&ll);
                bias.iter()
                    .zip(&ll)
                    .map(|(b, l)| (1.0 - self.model_mix) * b + self.model_mix * l)
                    .collect()
            }
            _ => bias,
        };

        let mut keyed: Vec<(f64, Candidate)> = combined.into_iter().zip(candidates.drain(..)).collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.extend(keyed.into_iter().map(|(_, c)| c));
    }
}

pub fn log_likelihood(candidate: &Candidate, d: &Distributions) -> f64 {
    const FLOOR: f64 = 1e-9;
    let p: f64 = candidate
        .primary()
        .iter()
        .map(|n| d.primary_of(*n).max(FLOOR).ln())
        .sum();
    p + d.secondary_of(candidate.secondary()).max(FLOOR).ln()
}

fn min_max(v: &[f64]) -> Vec<f64> {
    let lo = v.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;
    if !span.is_finite() || span <= 0.0 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| (x - lo) / span).collect()
}
