// src/fusion/sampling.rs — Temperature / top-p weighted sampling
//
// Weights are rescaled as w^(1/T) (after dividing by the max so small T
// cannot overflow), then truncated to the smallest descending prefix whose
// mass reaches top_p. Sampling without replacement reshapes the remaining
// pool on every draw.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Reshape `(value, weight)` pairs by temperature and nucleus truncation.
/// Non-positive weights are dropped. Output is sorted by weight, descending.
pub fn shape(pool: &[(u32, f64)], temperature: f64, top_p: f64) -> Vec<(u32, f64)> {
    let mut live: Vec<(u32, f64)> = pool
        .iter()
        .copied()
        .filter(|(_, w)| w.is_finite() && *w > 0.0)
        .collect();
    if live.is_empty() {
        return live;
    }

    let max = live.iter().map(|(_, w)| *w).fold(0.0_f64, f64::max);
    let inv_t = 1.0 / temperature.max(f64::MIN_POSITIVE);
    for (_, w) in live.iter_mut() {
        *w = (*w / max).powf(inv_t);
    }
    live.retain(|(_, w)| *w > 0.0);
    live.sort_by(|a, b| b.1.total_cmp(&a.1));

    if top_p < 1.0 {
        let total: f64 = live.iter().map(|(_, w)| *w).sum();
        let target = top_p.max(0.0) * total;
        let mut acc = 0.0;
        let mut keep = live.len();
        for (i, (_, w)) in live.iter().enumerate() {
            acc += w;
            if acc >= target {
                keep = i + 1;
                break;
            }
        }
        live.truncate(keep.max(1));
    }
    live
}

/// One weighted draw. `None` when the shaped pool is empty.
pub fn sample_one<R: Rng + ?Sized>(
    pool: &[(u32, f64)],
    temperature: f64,
    top_p: f64,
    rng: &mut R,
) -> Option<u32> {
    let shaped = shape(pool, temperature, top_p);
    let dist = WeightedIndex::new(shaped.iter().map(|(_, w)| *w)).ok()?;
    Some(shaped[dist.sample(rng)].0)
}

/// Up to `k` distinct draws. Stops early when no positive weight remains.
pub fn sample_without_replacement<R: Rng + ?Sized>(
    pool: &[(u32, f64)],
    k: usize,
    temperature: f64,
    top_p: f64,
    rng: &mut R,
) -> Vec<u32> {
    let mut remaining: Vec<(u32, f64)> = pool.to_vec();
    let mut picked = Vec::with_capacity(k);
    while picked.len() < k {
        let Some(n) = sample_one(&remaining, temperature, top_p, rng) else {
            break;
        };
        picked.push(n);
        remaining.retain(|(v, _)| *v != n);
    }
    picked
}

/// Fill `picked` up to `k` with uniform-random values from `1..=max` not already present.
pub fn top_up<R: Rng + ?Sized>(picked: &mut Vec<u32>, k: usize, max: u32, rng: &mut R) {
    if picked.len() >= k {
        return;
    }
    let mut rest: Vec<u32> = (1..=max).filter(|n| !picked.contains(n)).collect();
    while picked.len() < k && !rest.is_empty() {
        let i = rng.gen_range(0..rest.len());
        picked.push(rest.swap_remove(i));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    #[test]
    fn test_shape_drops_zero_and_sorts() {
        let shaped = shape(&[(1, 0.0), (2, 1.0), (3, 3.0)], 1.0, 1.0);
        assert_eq!(shaped.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn test_top_p_keeps_smallest_prefix() {
        // masses 0.5 / 0.3 / 0.2 after normalization
        let pool = [(1, 5.0), (2, 3.0), (3, 2.0)];
        assert_eq!(shape(&pool, 1.0, 0.5).len(), 1);
        assert_eq!(shape(&pool, 1.0, 0.75).len(), 2);
        assert_eq!(shape(&pool, 1.0, 1.0).len(), 3);
        // never empty
        assert_eq!(shape(&pool, 1.0, 0.0).len(), 1);
    }

    #[test]
    fn test_low_temperature_sharpens() {
        let pool = [(1, 2.0), (2, 1.0)];
        let shaped = shape(&pool, 0.1, 1.0);
        assert!(shaped[1].1 < 0.001);
        let flat = shape(&pool, 5.0, 1.0);
        assert!(flat[1].1 > 0.8);
    }

    #[test]
    fn test_without_replacement_never_duplicates_equal_weights() {
        let pool: Vec<(u32, f64)> = (1..=33).map(|n| (n, 1.0)).collect();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let picked = sample_without_replacement(&pool, 6, 1.0, 1.0, &mut rng);
            let set: BTreeSet<u32> = picked.iter().copied().collect();
            assert_eq!(picked.len(), 6);
            assert_eq!(set.len(), 6);
        }
    }

    #[test]
    fn test_without_replacement_stops_when_pool_exhausted() {
        let pool = [(4, 1.0), (9, 2.0), (10, 0.0)];
        let mut rng = StdRng::seed_from_u64(5);
        let picked = sample_without_replacement(&pool, 6, 1.0, 1.0, &mut rng);
        let set: BTreeSet<u32> = picked.into_iter().collect();
        assert_eq!(set, [4, 9].into_iter().collect());
    }

    #[test]
    fn test_top_up_fills_distinct() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut picked = vec![3, 7];
        top_up(&mut picked, 6, 33, &mut rng);
        let set: BTreeSet<u32> = picked.iter().copied().collect();
        assert_eq!(picked.len(), 6);
        assert_eq!(set.len(), 6);
        assert!(picked.iter().all(|n| (1..=33).contains(n)));
    }

    #[test]
    fn test_sample_one_empty_pool() {
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(sample_one(&[(1, 0.0)], 1.0, 1.0, &mut rng), None);
    }
}
