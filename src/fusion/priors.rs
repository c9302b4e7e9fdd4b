// src/fusion/priors.rs — Prior distributions over the number domain

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::state;
use crate::core::types::{Domain, IssueRecord};

/// Probability vectors over `[1,P]` and `[1,S]` (index `n - 1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distributions {
    pub primary: Vec<f64>,
    pub secondary: Vec<f64>,
}

impl Distributions {
    pub fn uniform(domain: &Domain) -> Self {
        let p = domain.primary_max as usize;
        let s = domain.secondary_max as usize;
        Self {
            primary: vec![1.0 / p as f64; p],
            secondary: vec![1.0 / s as f64; s],
        }
    }

    /// Normalize raw per-number masses. `None` when either side has no mass.
    pub fn from_counts(
        primary: &BTreeMap<u32, f64>,
        secondary: &BTreeMap<u32, f64>,
        domain: &Domain,
    ) -> Option<Self> {
        Some(Self {
            primary: normalize(primary, domain.primary_max)?,
            secondary: normalize(secondary, domain.secondary_max)?,
        })
    }

    /// Check shape against the domain and renormalize.
    pub fn conformed(mut self, domain: &Domain) -> Option<Self> {
        if self.primary.len() != domain.primary_max as usize
            || self.secondary.len() != domain.secondary_max as usize
        {
            return None;
        }
        for v in [&mut self.primary, &mut self.secondary] {
            v.iter_mut().for_each(|x| {
                if !x.is_finite() || *x < 0.0 {
                    *x = 0.0
                }
            });
            let sum: f64 = v.iter().sum();
            if sum <= 0.0 {
                return None;
            }
            v.iter_mut().for_each(|x| *x /= sum);
        }
        Some(self)
    }

    /// Element-wise mean of all sources; `None` for an empty slice.
    pub fn average(sources: &[Distributions]) -> Option<Self> {
        let first = sources.first()?;
        let mut out = first.clone();
        for other in &sources[1..] {
            add_into(&mut out.primary, &other.primary);
            add_into(&mut out.secondary, &other.secondary);
        }
        let n = sources.len() as f64;
        out.primary.iter_mut().for_each(|x| *x /= n);
        out.secondary.iter_mut().for_each(|x| *x /= n);
        Some(out)
    }

    pub fn primary_of(&self, n: u32) -> f64 {
        value_at(&self.primary, n)
    }

    pub fn secondary_of(&self, n: u32) -> f64 {
        value_at(&self.secondary, n)
    }
}

fn value_at(v: &[f64], n: u32) -> f64 {
    (n as usize)
        .checked_sub(1)
        .and_then(|i| v.get(i))
        .copied()
        .unwrap_or(0.0)
}

fn normalize(counts: &BTreeMap<u32, f64>, max: u32) -> Option<Vec<f64>> {
    let mut v = vec![0.0; max as usize];
    for (n, c) in counts {
        if (1..=max).contains(n) && c.is_finite() && *c > 0.0 {
            v[*n as usize - 1] = *c;
        }
    }
    let sum: f64 = v.iter().sum();
    if sum <= 0.0 {
        return None;
    }
    v.iter_mut().for_each(|x| *x /= sum);
    Some(v)
}

fn add_into(acc: &mut [f64], other: &[f64]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
}

/// Static historical-frequency table, written by the tuner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorTable {
    #[serde(default)]
    pub primary: BTreeMap<u32, f64>,
    #[serde(default)]
    pub secondary: BTreeMap<u32, f64>,
}

impl PriorTable {
    /// Raw occurrence counts over `records`.
    pub fn from_history(records: &[IssueRecord]) -> Self {
        let mut table = Self::default();
        for r in records {
            for n in r.draw.primary() {
                *table.primary.entry(*n).or_insert(0.0) += 1.0;
            }
            *table.secondary.entry(r.draw.secondary()).or_insert(0.0) += 1.0;
        }
        table
    }

    /// Missing or malformed file → `None`.
    pub fn load(path: &Path) -> Option<Self> {
        state::read_snapshot(path)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        state::write_snapshot(path, self)
    }

    pub fn to_distributions(&self, domain: &Domain) -> Option<Distributions> {
        Distributions::from_counts(&self.primary, &self.secondary, domain)
    }
}
