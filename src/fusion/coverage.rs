// src/fusion/coverage.rs — Region coverage over contiguous primary buckets

use super::vote::Votes;
use crate::core::types::Domain;

/// Fixed contiguous sub-ranges of the primary domain.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionBuckets {
    ranges: Vec<(u32, u32)>,
}

impl RegionBuckets {
    /// Ranges are clipped to the domain; empty or inverted ones are dropped.
    pub fn new(raw: &[[u32; 2]], domain: &Domain) -> Self {
        let ranges = raw
            .iter()
            .filter_map(|[lo, hi]| {
                let lo = (*lo).max(1);
                let hi = (*hi).min(domain.primary_max);
                (lo <= hi).then_some((lo, hi))
            })
            .collect();
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn bucket_of(&self, n: u32) -> Option<usize> {
        self.ranges.iter().position(|(lo, hi)| (*lo..=*hi).contains(&n))
    }

    fn counts(&self, selected: &[u32]) -> Vec<usize> {
        let mut counts = vec![0; self.ranges.len()];
        for n in selected {
            if let Some(b) = self.bucket_of(*n) {
                counts[b] += 1;
            }
        }
        counts
    }

    /// Buckets with no member in `selected`.
    pub fn uncovered(&self, selected: &[u32]) -> Vec<usize> {
        self.counts(selected)
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == 0)
            .map(|(b, _)| b)
            .collect()
    }

    /// Swap numbers into empty buckets. Returns the number of swaps made.
    ///
    /// For each empty bucket, the highest-ranked unselected number from it
    /// replaces the lowest-vote member that sits outside every bucket or in
    /// the most populated bucket (when that bucket holds more than one).
    /// Stops when every bucket is covered or no swap is possible.
    pub fn enforce(&self, selected: &mut [u32], votes: &Votes) -> usize {
        let ranking = votes.ranking();
        let rank_of = |n: u32| ranking.iter().position(|x| *x == n).unwrap_or(usize::MAX);
        let mut unfillable = Vec::new();
        let mut swaps = 0;

        loop {
            let Some(empty) = self
                .uncovered(selected)
                .into_iter()
                .find(|b| !unfillable.contains(b))
            else {
                break;
            };

            let incoming = ranking
                .iter()
                .copied()
                .find(|n| self.bucket_of(*n) == Some(empty) && !selected.contains(n));
            let Some(incoming) = incoming else {
                unfillable.push(empty);
                continue;
            };

            let counts = self.counts(selected);
            // only the most populated bucket gives up a member, and only if it has a spare
            let fullest = counts.iter().copied().max().unwrap_or(0);
            let victim = selected
                .iter()
                .enumerate()
                .filter(|(_, n)| match self.bucket_of(**n) {
                    None => true,
                    Some(b) => fullest > 1 && counts[b] == fullest,
                })
                // lowest vote first, then the worse rank
                .min_by(|(_, a), (_, b)| {
                    votes
                        .of(**a)
                        .total_cmp(&votes.of(**b))
                        .then(rank_of(**b).cmp(&rank_of(**a)))
                })
                .map(|(i, _)| i);
            let Some(victim) = victim else {
                break;
            };

            selected[victim] = incoming;
            swaps += 1;
        }
        swaps
    }
}
