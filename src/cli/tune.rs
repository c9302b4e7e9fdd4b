// src/cli/tune.rs — `fusionloop tune`: replay strategies, write weights and priors
//
// Each heuristic/model strategy is replayed over the history. A strategy's
// score is `share * primary_hit_rate + (1 - share) * secondary_hit_rate`;
// scores are normalized into the tuned weight file. The historical-frequency
// prior table is written alongside.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::setup;
use crate::core::types::{Domain, IssueRecord};
use crate::fusion::priors::PriorTable;
use crate::fusion::vote::StrategyWeights;
use crate::infra::config::Config;
use crate::infra::paths::{self, ArtifactPaths};
use crate::memory::{JsonWeightStore, WeightFile, WeightStore};
use crate::strategy::model::{FrequencyModel, StatisticalModel};
use crate::strategy::{self, Strategy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HitRates {
    /// Mean fraction of the K primaries hit.
    pub primary: f64,
    /// Fraction of exact secondary hits.
    pub secondary: f64,
    pub samples: u32,
}

/// Replay every strategy over `records`. Failed generations are skipped.
pub async fn evaluate(
    strategies: &[Arc<dyn Strategy>],
    records: &[IssueRecord],
    domain: &Domain,
) -> BTreeMap<String, HitRates> {
    let mut out = BTreeMap::new();
    for s in strategies {
        let (mut primary_hits, mut secondary_hits, mut samples) = (0usize, 0usize, 0u32);
        for r in records {
            match s.generate(r.index).await {
                Ok(c) => {
                    primary_hits += c.overlap(&r.draw);
                    if c.secondary() == r.draw.secondary() {
                        secondary_hits += 1;
                    }
                    samples += 1;
                }
                Err(e) => tracing::debug!("Skipping issue {} for '{}': {}", r.index, s.id(), e),
            }
        }
        let rates = if samples == 0 {
            HitRates::default()
        } else {
            HitRates {
                primary: primary_hits as f64 / (samples as f64 * domain.primary_count as f64),
                secondary: secondary_hits as f64 / samples as f64,
                samples,
            }
        };
        out.insert(s.id().to_string(), rates);
    }
    out
}

/// Normalized scores; uniform when every score is zero.
pub fn compute_weights(rates: &BTreeMap<String, HitRates>, primary_share: f64) -> StrategyWeights {
    let share = primary_share.clamp(0.0, 1.0);
    let scores: StrategyWeights = rates
        .iter()
        .map(|(id, r)| (id.clone(), share * r.primary + (1.0 - share) * r.secondary))
        .collect();
    let total: f64 = scores.values().sum();
    if total <= 1e-9 {
        let n = scores.len().max(1) as f64;
        return scores.into_keys().map(|id| (id, 1.0 / n)).collect();
    }
    scores.into_iter().map(|(id, s)| (id, s / total)).collect()
}

/// Exponential blend with the previous weights: `(1 - ema) * old + ema * new`.
pub fn blend_previous(new: &StrategyWeights, old: &StrategyWeights, ema: f64) -> StrategyWeights {
    if ema <= 0.0 || old.is_empty() {
        return new.clone();
    }
    let ema = ema.min(1.0);
    let mut merged = StrategyWeights::new();
    for id in new.keys().chain(old.keys()) {
        let o = old.get(id).copied().unwrap_or(0.0);
        let n = new.get(id).copied().unwrap_or(0.0);
        merged.insert(id.clone(), (1.0 - ema) * o + ema * n);
    }
    let total: f64 = merged.values().sum();
    if total <= 0.0 {
        return new.clone();
    }
    merged.into_iter().map(|(id, w)| (id, w / total)).collect()
}

pub async fn run_tune(
    config: &Config,
    history: Option<PathBuf>,
    window: Option<usize>,
    ema: f64,
) -> anyhow::Result<()> {
    let paths = ArtifactPaths::from_env();
    paths.ensure_dirs()?;
    let domain = Domain::from(&config.domain);
    domain.validate()?;
    let history_path = history.unwrap_or_else(paths::default_history_path);
    let history = setup::load_history(&history_path, &domain)?;

    let start = window
        .filter(|w| *w > 0)
        .map(|w| history.len().saturating_sub(w))
        .unwrap_or(0);
    let records = &history[start..];

    let model: Option<Arc<dyn StatisticalModel>> = if config.model.enabled {
        Some(Arc::new(FrequencyModel::new(history.clone(), domain, &config.model)))
    } else {
        None
    };
    let strategies = strategy::registry(config, domain, model);
    let rates = evaluate(&strategies, records, &domain).await;
    let fresh = compute_weights(&rates, config.tuner.primary_share);

    let store = JsonWeightStore::new(paths.strategy_weights());
    let previous = match store.load() {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("Ignoring unreadable strategy weights: {}", e);
            None
        }
    };
    let old = previous.as_ref().map(|f| f.weights.clone()).unwrap_or_default();
    let weights = blend_previous(&fresh, &old, ema);

    store.save(&WeightFile {
        weights: weights.clone(),
        fusion: previous.and_then(|f| f.fusion),
        updated_at: Some(Utc::now()),
    })?;
    PriorTable::from_history(&history).save(&paths.priors())?;

    println!("Replayed {} issues", records.len());
    for (id, r) in &rates {
        println!(
            "  {:<10} primary {:.4}  secondary {:.4}  weight {:.4}",
            id,
            r.primary,
            r.secondary,
            weights.get(id).copied().unwrap_or(0.0)
        );
    }
    println!("Weights: {}", paths.strategy_weights().display());
    println!("Priors:  {}", paths.priors().display());
    Ok(())
}
