// src/memory/decay.rs — Decaying number memory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::types::{Candidate, Domain};
use crate::fusion::priors::Distributions;
use crate::infra::config::MemoryConfig;

/// Decayed per-number counters, used as a soft prior by fusion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default)]
    pub primary: BTreeMap<u32, f64>,
    #[serde(default)]
    pub secondary: BTreeMap<u32, f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn is_empty(&self) -> bool {
        self.primary.values().all(|v| *v <= 0.0) && self.secondary.values().all(|v| *v <= 0.0)
    }

    /// Normalized memory as a prior source. `None` while either side is empty.
    pub fn to_distributions(&self, domain: &Domain) -> Option<Distributions> {
        Distributions::from_counts(&self.primary, &self.secondary, domain)
    }

    /// Highest primary counters, descending.
    pub fn top_primary(&self, n: usize) -> Vec<(u32, f64)> {
        let mut v: Vec<(u32, f64)> = self.primary.iter().map(|(k, c)| (*k, *c)).collect();
        v.sort_by(|a, b| b.1.total_cmp(&a.1));
        v.truncate(n);
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryParams {
    pub decay: f64,
    pub boost_fused: f64,
    pub boost_candidate: f64,
}

impl Default for MemoryParams {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

impl From<&MemoryConfig> for MemoryParams {
    fn from(cfg: &MemoryConfig) -> Self {
        Self {
            decay: if cfg.decay.is_finite() {
                cfg.decay.clamp(0.9, 1.0)
            } else {
                1.0
            },
            boost_fused: cfg.boost_fused.max(0.0),
            boost_candidate: cfg.boost_candidate.max(0.0),
        }
    }
}

/// Multiply every counter by `decay`.
pub fn apply_decay(memory: &mut Memory, decay: f64) {
    let decay = decay.clamp(0.0, 1.0);
    for v in memory.primary.values_mut().chain(memory.secondary.values_mut()) {
        *v = (*v * decay).max(0.0);
    }
}

/// Add `amount` to every number in `candidate`.
pub fn boost(memory: &mut Memory, candidate: &Candidate, amount: f64) {
    if amount <= 0.0 {
        return;
    }
    for n in candidate.primary() {
        *memory.primary.entry(*n).or_insert(0.0) += amount;
    }
    *memory.secondary.entry(candidate.secondary()).or_insert(0.0) += amount;
}

/// One learning step: decay, then boost the fused result and the whole batch.
pub fn learn(memory: &mut Memory, fused: &Candidate, batch: &[Candidate], params: &MemoryParams) {
    apply_decay(memory, params.decay);
    boost(memory, fused, params.boost_fused);
    for c in batch {
        boost(memory, c, params.boost_candidate);
    }
    memory.updated_at = Some(Utc::now());
}
