// src/scoring/bias.rs — Bias profiles, number-level scores, rerank

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::types::{Candidate, Domain};
use crate::infra::config::{AxisWeights, ScoringConfig};

/// Numbers are grouped into this many residue classes (`n mod GROUPS`).
const GROUPS: u32 = 5;

/// Calendar axes a profile can weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Year,
    Month,
    Day,
    Hour,
    Season,
}

impl Axis {
    pub const ALL: [Axis; 5] = [Axis::Year, Axis::Month, Axis::Day, Axis::Hour, Axis::Season];

    /// Residue class this axis favours at `at`.
    fn class_at(&self, at: DateTime<Utc>) -> u32 {
        match self {
            Axis::Year => at.year().rem_euclid(GROUPS as i32) as u32,
            Axis::Month => at.month() % GROUPS,
            Axis::Day => at.day() % GROUPS,
            // twelve two-hour blocks
            Axis::Hour => (at.hour() / 2) % GROUPS,
            Axis::Season => season_of(at.month()) % GROUPS,
        }
    }

    fn default_weight(&self, defaults: &AxisWeights) -> f64 {
        match self {
            Axis::Year => defaults.year,
            Axis::Month => defaults.month,
            Axis::Day => defaults.day,
            Axis::Hour => defaults.hour,
            Axis::Season => defaults.season,
        }
    }
}

/// 0 = spring (Mar-May) .. 3 = winter (Dec-Feb).
fn season_of(month: u32) -> u32 {
    match month {
        3..=5 => 0,
        6..=8 => 1,
        9..=11 => 2,
        _ => 3,
    }
}

/// Named weighting over calendar axes. Unset axes use the configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasProfile {
    pub name: String,
    pub weights: BTreeMap<Axis, f64>,
}

impl BiasProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weights: BTreeMap::new(),
        }
    }

    pub fn with(mut self, axis: Axis, weight: f64) -> Self {
        self.weights.insert(axis, weight);
        self
    }

    pub fn weight(&self, axis: Axis, defaults: &AxisWeights) -> f64 {
        self.weights
            .get(&axis)
            .copied()
            .unwrap_or_else(|| axis.default_weight(defaults))
    }
}

/// Number-level preference scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberScores {
    pub primary: BTreeMap<u32, f64>,
    pub secondary: BTreeMap<u32, f64>,
}

impl NumberScores {
    /// Candidate-level aggregate: sum of its number scores.
    pub fn total(&self, candidate: &Candidate) -> f64 {
        let p: f64 = candidate
            .primary()
            .iter()
            .map(|n| self.primary.get(n).copied().unwrap_or(0.0))
            .sum();
        p + self
            .secondary
            .get(&candidate.secondary())
            .copied()
            .unwrap_or(0.0)
    }
}

/// Knobs for scoring, rerank and secondary swaps.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    pub jitter: f64,
    pub swap_base: f64,
    pub swap_cap: f64,
    pub anchor: DateTime<Utc>,
    pub cadence_hours: f64,
    pub axis_defaults: AxisWeights,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for ScoringParams {
    fn from(cfg: &ScoringConfig) -> Self {
        Self {
            jitter: cfg.jitter.max(0.0),
            swap_base: cfg.swap_base.max(0.0),
            swap_cap: cfg.swap_cap.clamp(0.0, 1.0),
            anchor: cfg.anchor,
            cadence_hours: cfg.cadence_hours.max(0.0),
            axis_defaults: cfg.axis_defaults,
        }
    }
}

impl ScoringParams {
    /// Scoring instant: now when live, a synthetic draw time when backtesting.
    pub fn instant_for(&self, issue_index: u64, live: bool) -> DateTime<Utc> {
        if live {
            return Utc::now();
        }
        let minutes = (issue_index as f64 * self.cadence_hours * 60.0).round() as i64;
        self.anchor + Duration::minutes(minutes)
    }
}

/// Score every number in the domain under `profile` at `at`.
pub fn score_numbers(
    profile: &BiasProfile,
    at: DateTime<Utc>,
    domain: &Domain,
    defaults: &AxisWeights,
) -> NumberScores {
    let favoured: Vec<(u32, f64)> = Axis::ALL
        .iter()
        .map(|axis| (axis.class_at(at), profile.weight(*axis, defaults)))
        .collect();

    let score = |n: u32| -> f64 {
        1.0 + favoured
            .iter()
            .filter(|(class, _)| n % GROUPS == *class)
            .map(|(_, w)| *w)
            .sum::<f64>()
    };

    NumberScores {
        primary: domain.primary_range().map(|n| (n, score(n))).collect(),
        secondary: domain.secondary_range().map(|n| (n, score(n))).collect(),
    }
}

/// Blend the original order with bias scores.
///
/// `gamma = 0` keeps the original order, `gamma = 1` orders purely by score.
/// `jitter` adds uniform noise in `[-jitter, jitter]` to each sort key.
pub fn rerank<R: Rng + ?Sized>(
    order: &[u32],
    scores: &BTreeMap<u32, f64>,
    gamma: f64,
    jitter: f64,
    rng: &mut R,
) -> Vec<u32> {
    let n = order.len();
    if n == 0 {
        return Vec::new();
    }
    let g = gamma.clamp(0.0, 1.0);
    let max_score = order
        .iter()
        .map(|x| scores.get(x).copied().unwrap_or(0.0))
        .fold(0.0_f64, f64::max);
    let norm = if max_score > 0.0 { max_score } else { 1.0 };

    let mut keyed: Vec<(f64, u32)> = order
        .iter()
        .enumerate()
        .map(|(i, x)| {
            let base_rank = (n - i) as f64 / n as f64;
            let score = scores.get(x).copied().unwrap_or(0.0) / norm;
            let noise = if jitter > 0.0 {
                rng.gen_range(-jitter..=jitter)
            } else {
                0.0
            };
            (g * score + (1.0 - g) * base_rank + noise, *x)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.into_iter().map(|(_, x)| x).collect()
}

/// Swap `secondary` toward the top-scored value with probability
/// `min(swap_cap, swap_base * gamma)`, gamma clamped to `[0, 2]`.
pub fn adjust_secondary<R: Rng + ?Sized>(
    secondary: u32,
    scores: &BTreeMap<u32, f64>,
    gamma: f64,
    params: &ScoringParams,
    rng: &mut R,
) -> u32 {
    // ties resolve to the lowest value
    let best = scores
        .iter()
        .fold(None::<(u32, f64)>, |acc, (n, s)| match acc {
            Some((_, bs)) if bs >= *s => acc,
            _ => Some((*n, *s)),
        })
        .map(|(n, _)| n);

    let Some(best) = best else {
        return secondary;
    };
    if best == secondary {
        return secondary;
    }
    let p = (params.swap_base * gamma.clamp(0.0, 2.0)).min(params.swap_cap);
    if p > 0.0 && rng.gen::<f64>() < p {
        best
    } else {
        secondary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at() -> DateTime<Utc> {
        // 2024-07-13 21:00 → year%5=4, month%5=2, day%5=3, hour block 10%5=0, summer=1
        Utc.with_ymd_and_hms(2024, 7, 13, 21, 0, 0).unwrap()
    }

    #[test]
    fn test_scores_cover_domain() {
        let d = Domain::default();
        let s = score_numbers(&BiasProfile::new("plain"), at(), &d, &AxisWeights::default());
        assert_eq!(s.primary.len(), 33);
        assert_eq!(s.secondary.len(), 16);
        assert!(s.primary.values().all(|v| *v >= 1.0));
    }

    #[test]
    fn test_profile_weight_applies_to_axis_class() {
        let d = Domain::default();
        let defaults = AxisWeights {
            year: 0.0,
            month: 0.0,
            day: 0.0,
            hour: 0.0,
            season: 0.0,
        };
        let p = BiasProfile::new("hourly").with(Axis::Hour, 1.6);
        let s = score_numbers(&p, at(), &d, &defaults);
        // hour class 0 → multiples of five
        assert!((s.primary[&5] - 2.6).abs() < 1e-9);
        assert!((s.primary[&30] - 2.6).abs() < 1e-9);
        assert!((s.primary[&6] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rerank_gamma_zero_keeps_order() {
        let order = [9, 2, 31, 14, 7, 22];
        let scores: BTreeMap<u32, f64> = order.iter().map(|n| (*n, *n as f64)).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let out = rerank(&order, &scores, 0.0, 0.02, &mut rng);
        assert_eq!(out, order.to_vec());
    }

    #[test]
    fn test_rerank_gamma_one_orders_by_score() {
        let order = [9, 2, 31, 14, 7, 22];
        let scores: BTreeMap<u32, f64> = order.iter().map(|n| (*n, *n as f64)).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let out = rerank(&order, &scores, 1.0, 0.0, &mut rng);
        assert_eq!(out, vec![31, 22, 14, 9, 7, 2]);
    }

    #[test]
    fn test_adjust_secondary_probability_bounds() {
        let scores: BTreeMap<u32, f64> = (1..=16).map(|n| (n, if n == 12 { 5.0 } else { 1.0 })).collect();
        let params = ScoringParams::default();
        let mut rng = StdRng::seed_from_u64(9);

        // gamma 0 never swaps
        for _ in 0..100 {
            assert_eq!(adjust_secondary(3, &scores, 0.0, &params, &mut rng), 3);
        }
        // already best never swaps
        assert_eq!(adjust_secondary(12, &scores, 2.0, &params, &mut rng), 12);

        // gamma 2 swaps with p = 0.4
        let swaps = (0..2000)
            .filter(|_| adjust_secondary(3, &scores, 2.0, &params, &mut rng) == 12)
            .count();
        assert!((600..1000).contains(&swaps), "swaps = {swaps}");
    }

    #[test]
    fn test_backtest_instant_is_deterministic() {
        let params = ScoringParams::default();
        assert_eq!(params.instant_for(10, false), params.instant_for(10, false));
        let step = params.instant_for(1, false) - params.instant_for(0, false);
        assert_eq!(step.num_hours(), 56);
    }
}
