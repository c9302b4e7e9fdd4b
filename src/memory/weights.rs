// src/memory/weights.rs — Strategy weights: tuned file or dynamic from recent stats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::core::state;
use crate::core::types::StrategyStats;
use crate::fusion::vote::StrategyWeights;

/// Fusion parameters stored next to tuned weights. Unset fields keep config values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunedFusion {
    pub alpha_primary: Option<f64>,
    pub alpha_secondary: Option<f64>,
    pub temperature_primary: Option<f64>,
    pub temperature_secondary: Option<f64>,
    pub top_p_primary: Option<f64>,
    pub top_p_secondary: Option<f64>,
}

/// Contents of `strategy_weights.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightFile {
    #[serde(default)]
    pub weights: StrategyWeights,
    #[serde(default)]
    pub fusion: Option<TunedFusion>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Where tuned weights live. Written only by the tuner.
pub trait WeightStore: Send + Sync {
    /// `Ok(None)` when nothing has been tuned yet.
    fn load(&self) -> anyhow::Result<Option<WeightFile>>;
    fn save(&self, file: &WeightFile) -> anyhow::Result<()>;
}

pub struct JsonWeightStore {
    path: PathBuf,
}

impl JsonWeightStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl WeightStore for JsonWeightStore {
    fn load(&self) -> anyhow::Result<Option<WeightFile>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, file: &WeightFile) -> anyhow::Result<()> {
        state::write_snapshot(&self.path, file)
    }
}

/// Finished issues' per-strategy stats, keyed by issue index.
#[derive(Debug, Default)]
pub struct StatsLedger {
    issues: RwLock<BTreeMap<u64, BTreeMap<String, StrategyStats>>>,
}

impl StatsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, issue_index: u64, stats: BTreeMap<String, StrategyStats>) {
        if let Ok(mut issues) = self.issues.write() {
            issues.insert(issue_index, stats);
        }
    }

    pub fn len(&self) -> usize {
        self.issues.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed stats over the `window` highest issue indices.
    pub fn trailing(&self, window: usize) -> BTreeMap<String, StrategyStats> {
        let mut out: BTreeMap<String, StrategyStats> = BTreeMap::new();
        let Ok(issues) = self.issues.read() else {
            return out;
        };
        for stats in issues.values().rev().take(window) {
            for (id, s) in stats {
                out.entry(id.clone()).or_default().absorb(s);
            }
        }
        out
    }
}

/// Laplace-smoothed success rate `(matches + 1) / (attempts + 4)`.
pub fn smoothed_rate(stats: &StrategyStats) -> f64 {
    (stats.matches as f64 + 1.0) / (stats.attempts as f64 + 4.0)
}

/// Softmax over smoothed rates, scaled so the mean weight is 1.0.
pub fn derive_weights(
    stats: &BTreeMap<String, StrategyStats>,
    strategies: &[String],
) -> StrategyWeights {
    if stats.is_empty() || strategies.is_empty() {
        return StrategyWeights::new();
    }
    let rates: Vec<(String, f64)> = strategies
        .iter()
        .map(|id| {
            let s = stats.get(id).copied().unwrap_or_default();
            (id.clone(), smoothed_rate(&s))
        })
        .collect();
    let max = rates.iter().map(|(_, r)| *r).fold(f64::MIN, f64::max);
    let exps: Vec<f64> = rates.iter().map(|(_, r)| (r - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    let n = rates.len() as f64;
    rates
        .into_iter()
        .zip(exps)
        .map(|((id, _), e)| (id, n * e / sum))
        .collect()
}

/// Resolves weights at fusion time. Never cached across calls.
pub struct WeightResolver {
    store: Option<Box<dyn WeightStore>>,
    ledger: std::sync::Arc<StatsLedger>,
    window: usize,
    strategies: Vec<String>,
}

impl WeightResolver {
    pub fn new(
        store: Option<Box<dyn WeightStore>>,
        ledger: std::sync::Arc<StatsLedger>,
        window: usize,
        strategies: Vec<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            window: window.max(1),
            strategies,
        }
    }

    /// Resolver with no tuned file and an empty ledger: all weights 1.0.
    pub fn uniform() -> Self {
        Self::new(None, Default::default(), 1, Vec::new())
    }

    pub fn ledger(&self) -> &std::sync::Arc<StatsLedger> {
        &self.ledger
    }

    /// Tuned file contents, if present and readable.
    pub fn tuned(&self) -> Option<WeightFile> {
        let store = self.store.as_ref()?;
        match store.load() {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Ignoring unreadable strategy weights: {}", e);
                None
            }
        }
    }

    /// Tuned weights restricted to registered strategies, else dynamic weights.
    pub fn resolve(&self) -> StrategyWeights {
        if let Some(file) = self.tuned() {
            let tuned: StrategyWeights = file
                .weights
                .into_iter()
                .filter(|(id, w)| {
                    w.is_finite()
                        && (self.strategies.is_empty() || self.strategies.contains(id))
                })
                .collect();
            if !tuned.is_empty() {
                return tuned;
            }
        }
        derive_weights(&self.ledger.trailing(self.window), &self.strategies)
    }
}
