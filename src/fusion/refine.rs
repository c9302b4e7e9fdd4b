// src/fusion/refine.rs — Local search nudging fused candidates toward higher bias scores
//
// Each round swaps the weakest primary for one of the strongest unselected
// numbers and tries the strongest secondaries, keeping a change only when
// the candidate's score across all bias profiles rises.

use std::collections::BTreeMap;

use crate::core::types::{Candidate, Domain};
use crate::scoring::{self, BiasProfile, NumberScores, ScoringParams};

const EPS: f64 = 1e-9;

pub struct CandidateRefiner {
    profiles: Vec<BiasProfile>,
    scoring: ScoringParams,
    live: bool,
    iters: usize,
    topk: usize,
}

impl CandidateRefiner {
    pub fn new(
        profiles: Vec<BiasProfile>,
        scoring: ScoringParams,
        live: bool,
        iters: usize,
        topk: usize,
    ) -> Self {
        Self {
            profiles,
            scoring,
            live,
            iters,
            topk: topk.max(1),
        }
    }

    /// Profile scores at the instant `issue_index` is scored for.
    pub fn scorer(&self, issue_index: u64, domain: &Domain) -> ProfileScorer {
        let at = self.scoring.instant_for(issue_index, self.live);
        ProfileScorer::new(
            self.profiles
                .iter()
                .map(|p| scoring::score_numbers(p, at, domain, &self.scoring.axis_defaults))
                .collect(),
        )
    }

    /// Refine every candidate in place. Returns how many changed.
    pub fn refine_all(&self, candidates: &mut [Candidate], issue_index: u64, domain: &Domain) -> usize {
        if self.profiles.is_empty() || self.iters == 0 {
            return 0;
        }
        let scorer = self.scorer(issue_index, domain);
        let mut changed = 0;
        for c in candidates.iter_mut() {
            let refined = scorer.refine(c, domain, self.iters, self.topk);
            if refined != *c {
                *c = refined;
                changed += 1;
            }
        }
        changed
    }
}

/// Score tables for a set of profiles, with each table's normaliser and
/// the summed table used to rank swap options.
pub struct ProfileScorer {
    tables: Vec<NumberScores>,
    norms: Vec<(f64, f64)>,
    summed: NumberScores,
}

impl ProfileScorer {
    fn new(tables: Vec<NumberScores>) -> Self {
        let norms = tables
            .iter()
            .map(|t| (positive_mass(&t.primary), positive_mass(&t.secondary)))
            .collect();
        let mut summed = NumberScores::default();
        for t in &tables {
            for (n, v) in &t.primary {
                *summed.primary.entry(*n).or_insert(0.0) += v;
            }
            for (n, v) in &t.secondary {
                *summed.secondary.entry(*n).or_insert(0.0) += v;
            }
        }
        Self {
            tables,
            norms,
            summed,
        }
    }

    /// Sum over profiles of the primaries' share of primary mass plus the
    /// secondary's share of secondary mass.
    pub fn score(&self, primary: &[u32], secondary: u32) -> f64 {
        self.tables
            .iter()
            .zip(&self.norms)
            .map(|(t, (pn, sn))| {
                let p: f64 = primary.iter().map(|n| t.primary.get(n).copied().unwrap_or(0.0)).sum();
                p / pn + t.secondary.get(&secondary).copied().unwrap_or(0.0) / sn
            })
            .sum()
    }

    pub fn score_candidate(&self, c: &Candidate) -> f64 {
        self.score(c.primary(), c.secondary())
    }

    fn refine(&self, c: &Candidate, domain: &Domain, iters: usize, topk: usize) -> Candidate {
        let mut primary = c.primary().to_vec();
        let mut secondary = c.secondary();
        let mut best = self.score(&primary, secondary);

        for _ in 0..iters {
            let mut improved = false;

            let weakest = primary
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| self.summed_primary(**a).total_cmp(&self.summed_primary(**b)))
                .map(|(i, _)| i);
            if let Some(weakest) = weakest {
                let mut pick = None;
                for alt in strongest(&self.summed.primary, |n| !primary.contains(&n), topk) {
                    let mut trial = primary.clone();
                    trial[weakest] = alt;
                    let s = self.score(&trial, secondary);
                    if s > best + EPS {
                        best = s;
                        pick = Some(trial);
                    }
                }
                if let Some(p) = pick {
                    primary = p;
                    improved = true;
                }
            }

            for alt in strongest(&self.summed.secondary, |_| true, topk) {
                let s = self.score(&primary, alt);
                if s > best + EPS {
                    best = s;
                    secondary = alt;
                    improved = true;
                }
            }

            if !improved {
                break;
            }
        }

        Candidate::new(primary, secondary, domain).unwrap_or_else(|_| c.clone())
    }

    fn summed_primary(&self, n: u32) -> f64 {
        self.summed.primary.get(&n).copied().unwrap_or(0.0)
    }
}

fn positive_mass(scores: &BTreeMap<u32, f64>) -> f64 {
    let sum: f64 = scores.values().map(|v| v.max(0.0)).sum();
    if sum > 0.0 {
        sum
    } else {
        1.0
    }
}

/// Up to `k` numbers passing `keep`, highest score first, ties ascending.
fn strongest(scores: &BTreeMap<u32, f64>, keep: impl Fn(u32) -> bool, k: usize) -> Vec<u32> {
    let mut ranked: Vec<(u32, f64)> = scores
        .iter()
        .filter(|(n, _)| keep(**n))
        .map(|(n, v)| (*n, *v))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(k).map(|(n, _)| n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::heuristic::HeuristicKind;

    fn cand(p: [u32; 6], s: u32) -> Candidate {
        Candidate::new(p, s, &Domain::default()).unwrap()
    }

    fn refiner(iters: usize) -> CandidateRefiner {
        CandidateRefiner::new(
            HeuristicKind::ALL.iter().map(|k| k.profile()).collect(),
            ScoringParams::default(),
            false,
            iters,
            5,
        )
    }

    #[test]
    fn test_refined_candidates_valid_and_never_worse() {
        let d = Domain::default();
        let r = refiner(3);
        for issue in 0..12 {
            let original = vec![
                cand([1, 2, 3, 4, 5, 6], 1),
                cand([7, 14, 21, 28, 31, 33], 16),
                cand([3, 9, 12, 18, 24, 30], 8),
            ];
            let mut batch = original.clone();
            r.refine_all(&mut batch, issue, &d);

            let scorer = r.scorer(issue, &d);
            for (before, after) in original.iter().zip(&batch) {
                assert!(Candidate::new(after.primary().to_vec(), after.secondary(), &d).is_ok());
                assert!(
                    scorer.score_candidate(after) >= scorer.score_candidate(before) - EPS,
                    "issue {}: {} scored below {}",
                    issue,
                    after,
                    before
                );
            }
        }
    }

    #[test]
    fn test_changed_candidates_strictly_improve() {
        let d = Domain::default();
        let r = refiner(5);
        let original = vec![cand([1, 2, 3, 4, 5, 6], 1), cand([10, 11, 12, 13, 14, 15], 2)];
        let mut batch = original.clone();
        let changed = r.refine_all(&mut batch, 3, &d);

        let scorer = r.scorer(3, &d);
        let improved = original
            .iter()
            .zip(&batch)
            .filter(|(b, a)| scorer.score_candidate(a) > scorer.score_candidate(b) + EPS)
            .count();
        assert_eq!(changed, improved);
    }

    #[test]
    fn test_zero_iterations_is_noop() {
        let d = Domain::default();
        let mut batch = vec![cand([1, 2, 3, 4, 5, 6], 1)];
        assert_eq!(refiner(0).refine_all(&mut batch, 0, &d), 0);
        assert_eq!(batch, vec![cand([1, 2, 3, 4, 5, 6], 1)]);
    }

    #[test]
    fn test_strongest_orders_and_filters() {
        let scores: BTreeMap<u32, f64> = [(1, 1.0), (2, 3.0), (3, 3.0), (4, 2.0)].into_iter().collect();
        assert_eq!(strongest(&scores, |n| n != 3, 2), vec![2, 4]);
        assert_eq!(strongest(&scores, |_| true, 10), vec![2, 3, 4, 1]);
    }
}
