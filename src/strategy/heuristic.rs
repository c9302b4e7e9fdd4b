// src/strategy/heuristic.rs — Deterministic arithmetic generators with bias rerank
//
// Each generator walks the primary domain with its own arithmetic pattern,
// producing a slightly oversized ordered pool. The pool is reranked against
// the strategy's bias profile and cut to K, so gamma decides which numbers
// survive, not just their order.

use async_trait::async_trait;
use rand::Rng;

use super::random::DrawSeeds;
use super::Strategy;
use crate::core::types::{Candidate, Domain};
use crate::infra::config::GammaConfig;
use crate::infra::errors::FusionLoopError;
use crate::scoring::{self, Axis, BiasProfile, ScoringParams};

/// Index walk over the primary domain.
type Walk = Box<dyn Fn(u64) -> u64>;

/// Lo Shu square, read row by row.
const LO_SHU: [u32; 9] = [4, 9, 2, 3, 5, 7, 8, 1, 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicKind {
    /// Fixed-stride walk from an index-derived start.
    Stride,
    /// Two interleaved cycles of length 10 and 12.
    Cycle,
    /// Rotations of the Lo Shu lattice.
    Lattice,
}

impl HeuristicKind {
    pub const ALL: [HeuristicKind; 3] = [
        HeuristicKind::Stride,
        HeuristicKind::Cycle,
        HeuristicKind::Lattice,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            HeuristicKind::Stride => "stride",
            HeuristicKind::Cycle => "cycle",
            HeuristicKind::Lattice => "lattice",
        }
    }

    /// The bias profile each generator is paired with.
    pub fn profile(&self) -> BiasProfile {
        match self {
            HeuristicKind::Stride => BiasProfile::new("hour-day")
                .with(Axis::Hour, 1.6)
                .with(Axis::Day, 1.2),
            HeuristicKind::Cycle => BiasProfile::new("month-day")
                .with(Axis::Month, 1.5)
                .with(Axis::Day, 1.3),
            HeuristicKind::Lattice => BiasProfile::new("season-day")
                .with(Axis::Season, 1.5)
                .with(Axis::Day, 1.2),
        }
    }

    /// Ordered pool of `len` distinct primaries plus a raw secondary.
    pub fn raw(&self, issue_index: u64, salt: u64, domain: &Domain, len: usize) -> (Vec<u32>, u32) {
        let p = domain.primary_max as u64;
        let s = domain.secondary_max as u64;
        let i = issue_index.wrapping_add(salt);
        let len = len.min(domain.primary_max as usize);

        let (seq, secondary): (Walk, u64) = match self {
            HeuristicKind::Stride => {
                let start = i.wrapping_mul(7).wrapping_add(3);
                let step = 5 + i % 4;
                (
                    Box::new(move |j: u64| start.wrapping_add(j * step)) as Walk,
                    i.wrapping_mul(3).wrapping_add(5),
                )
            }
            HeuristicKind::Cycle => {
                let stem = i % 10;
                let branch = i % 12;
                (
                    Box::new(move |j: u64| (stem + 1) * (j + 1) + branch * j * j) as Walk,
                    stem + branch,
                )
            }
            HeuristicKind::Lattice => {
                let rot = (i % 9) as usize;
                let scale = i % 11 + 1;
                let spread = (p / 6).max(1);
                (
                    Box::new(move |j: u64| LO_SHU[(rot + j as usize) % 9] as u64 * scale + j * spread)
                        as Walk,
                    LO_SHU[rot] as u64 + i % 7,
                )
            }
        };

        let mut pool = Vec::with_capacity(len);
        let mut j = 0u64;
        // bounded walk; collisions fall through to a linear probe
        while pool.len() < len && j < p * 4 {
            let mut n = (seq(j) % p) as u32 + 1;
            while pool.contains(&n) {
                n = n % domain.primary_max + 1;
            }
            pool.push(n);
            j += 1;
        }
        (pool, (secondary % s) as u32 + 1)
    }
}

/// A heuristic generator paired with its bias profile and gamma.
pub struct HeuristicStrategy {
    kind: HeuristicKind,
    profile: BiasProfile,
    gamma: GammaConfig,
    domain: Domain,
    scoring: ScoringParams,
    draws: DrawSeeds,
}

impl HeuristicStrategy {
    pub fn new(
        kind: HeuristicKind,
        domain: Domain,
        gamma: GammaConfig,
        scoring: ScoringParams,
        seed: Option<u64>,
    ) -> Self {
        Self {
            kind,
            profile: kind.profile(),
            gamma,
            domain,
            scoring,
            draws: DrawSeeds::new(seed, kind.id()),
        }
    }

    pub fn profile(&self) -> &BiasProfile {
        &self.profile
    }
}

#[async_trait]
impl Strategy for HeuristicStrategy {
    fn id(&self) -> &str {
        self.kind.id()
    }

    async fn generate(&self, issue_index: u64) -> Result<Candidate, FusionLoopError> {
        let mut rng = self.draws.next_rng(issue_index);
        let k = self.domain.primary_count;
        let pool_len = k + (k / 2).max(1);

        let salt: u64 = rng.gen_range(0..1_000_003);
        let (pool, secondary) = self.kind.raw(issue_index, salt, &self.domain, pool_len);

        let at = self.scoring.instant_for(issue_index, self.draws.is_live());
        let scores = scoring::score_numbers(&self.profile, at, &self.domain, &self.scoring.axis_defaults);

        let mut primary = scoring::rerank(
            &pool,
            &scores.primary,
            self.gamma.primary,
            self.scoring.jitter,
            &mut rng,
        );
        primary.truncate(k);
        let secondary = scoring::adjust_secondary(
            secondary,
            &scores.secondary,
            self.gamma.secondary,
            &self.scoring,
            &mut rng,
        );

        Candidate::new(primary, secondary, &self.domain)
            .map_err(|e| FusionLoopError::strategy(self.kind.id(), e))
    }
}
