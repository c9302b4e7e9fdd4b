// src/fusion/vote.rs — Weighted vote tally with first-seen tie order

use std::collections::BTreeMap;

use super::priors::Distributions;
use crate::core::types::{Domain, Proposal};

/// Per-strategy vote weights. Absent strategies vote with 1.0.
pub type StrategyWeights = BTreeMap<String, f64>;

pub fn weight_of(weights: &StrategyWeights, strategy_id: &str) -> f64 {
    weights
        .get(strategy_id)
        .copied()
        .filter(|w| w.is_finite())
        .unwrap_or(1.0)
        .max(0.0)
}

/// Vote mass for one side of the domain (primary or secondary).
#[derive(Debug, Clone, PartialEq)]
pub struct Votes {
    /// Mass per number, index `n - 1`.
    mass: Vec<f64>,
    /// Numbers in the order they were first proposed.
    seen: Vec<u32>,
}

impl Votes {
    fn new(max: u32) -> Self {
        Self {
            mass: vec![0.0; max as usize],
            seen: Vec::new(),
        }
    }

    fn add(&mut self, n: u32, w: f64) {
        let Some(slot) = (n as usize).checked_sub(1).and_then(|i| self.mass.get_mut(i)) else {
            return;
        };
        *slot += w;
        if !self.seen.contains(&n) {
            self.seen.push(n);
        }
    }

    pub fn of(&self, n: u32) -> f64 {
        (n as usize)
            .checked_sub(1)
            .and_then(|i| self.mass.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.mass.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() <= 0.0
    }

    /// `(number, mass)` for every number in the domain.
    pub fn pairs(&self) -> Vec<(u32, f64)> {
        self.mass
            .iter()
            .enumerate()
            .map(|(i, m)| (i as u32 + 1, *m))
            .collect()
    }

    /// All numbers by mass, descending. Ties: first-seen order, then unseen ascending.
    pub fn ranking(&self) -> Vec<u32> {
        let max = self.mass.len() as u32;
        let mut order: Vec<u32> = self.seen.clone();
        order.extend((1..=max).filter(|n| !self.seen.contains(n)));
        // stable sort keeps the tie order above
        order.sort_by(|a, b| self.of(*b).total_cmp(&self.of(*a)));
        order
    }

    /// Add `alpha * prior[n] * total` to each number, using the pre-blend total.
    fn blend(&mut self, prior: &[f64], alpha: f64) {
        let total = self.total();
        if alpha <= 0.0 || total <= 0.0 {
            return;
        }
        for (m, p) in self.mass.iter_mut().zip(prior) {
            *m += alpha * p * total;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteTally {
    pub primary: Votes,
    pub secondary: Votes,
}

impl VoteTally {
    pub fn collect(proposals: &[Proposal], weights: &StrategyWeights, domain: &Domain) -> Self {
        let mut primary = Votes::new(domain.primary_max);
        let mut secondary = Votes::new(domain.secondary_max);
        for p in proposals {
            let w = weight_of(weights, &p.strategy_id);
            for n in p.candidate.primary() {
                primary.add(*n, w);
            }
            secondary.add(p.candidate.secondary(), w);
        }
        Self { primary, secondary }
    }

    pub fn blend_prior(&mut self, prior: &Distributions, alpha_primary: f64, alpha_secondary: f64) {
        self.primary.blend(&prior.primary, alpha_primary);
        self.secondary.blend(&prior.secondary, alpha_secondary);
    }
}
