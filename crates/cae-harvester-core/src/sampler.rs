//! Weighted random sampling without replacement.
//!
//! Each draw builds the cumulative weight array over the remaining items
//! and binary-searches a uniform point in `[0, total)`. The chosen item is
//! removed before the next draw. Items with non-positive weight are only
//! picked once every positive-weight item is gone, and then uniformly.
//!
//! Seed the RNG (`StdRng::seed_from_u64`) for reproducible draws.
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use cae_harvester_core::sampler::weighted_sample;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let picks = weighted_sample(&mut rng, &[1.0, 2.0, 3.0], 2);
//! assert_eq!(picks.len(), 2);
//! assert_ne!(picks[0], picks[1]);
//! ```

use rand::Rng;

/// Pick one index with probability proportional to its weight.
///
/// Returns `None` for an empty slice.
pub fn weighted_choice<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let indices: Vec<usize> = (0..weights.len()).collect();
    Some(draw(rng, &indices, weights))
}

/// Draw `k` distinct indices, weighted by `weights`.
///
/// Returns fewer than `k` indices only when `weights.len() < k`.
pub fn weighted_sample<R: Rng + ?Sized>(rng: &mut R, weights: &[f64], k: usize) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..weights.len()).collect();
    let mut picked = Vec::with_capacity(k.min(weights.len()));

    while picked.len() < k && !remaining.is_empty() {
        let chosen = draw(rng, &remaining, weights);
        remaining.retain(|&i| i != chosen);
        picked.push(chosen);
    }

    picked
}

fn draw<R: Rng + ?Sized>(rng: &mut R, candidates: &[usize], weights: &[f64]) -> usize {
    let mut cumulative = Vec::with_capacity(candidates.len());
    let mut total = 0.0;
    for &i in candidates {
        let w = weights[i];
        if w.is_finite() && w > 0.0 {
            total += w;
        }
        cumulative.push(total);
    }

    if total <= 0.0 {
        return candidates[rng.gen_range(0..candidates.len())];
    }

    let point = rng.gen::<f64>() * total;
    // First slot whose cumulative mass exceeds the point. Zero-weight
    // slots share their predecessor's cumulative value and are skipped.
    let slot = cumulative
        .partition_point(|&c| c <= point)
        .min(candidates.len() - 1);
    candidates[slot]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sample_is_without_replacement() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let mut picks = weighted_sample(&mut rng, &[0.5, 1.0, 2.0, 4.0], 4);
            picks.sort();
            assert_eq!(picks, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn sample_caps_at_population() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(weighted_sample(&mut rng, &[1.0, 1.0], 5).len(), 2);
        assert!(weighted_sample(&mut rng, &[], 3).is_empty());
        assert_eq!(weighted_choice(&mut rng, &[]), None);
    }

    #[test]
    fn same_seed_same_draws() {
        let weights = [0.1, 0.7, 0.3, 1.0, 0.9];
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            assert_eq!(
                weighted_sample(&mut a, &weights, 3),
                weighted_sample(&mut b, &weights, 3)
            );
        }
    }

    #[test]
    fn heavier_items_win_more_often() {
        let mut rng = StdRng::seed_from_u64(9);
        let weights = [1.0, 9.0];
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[weighted_choice(&mut rng, &weights).unwrap()] += 1;
        }
        // Expect roughly 10% / 90%.
        assert!(counts[0] > 700 && counts[0] < 1300, "counts: {:?}", counts);
    }

    #[test]
    fn zero_weight_items_are_picked_last() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let picks = weighted_sample(&mut rng, &[0.0, 1.0, 0.0, 2.0], 2);
            let mut sorted = picks.clone();
            sorted.sort();
            assert_eq!(sorted, vec![1, 3]);
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut seen = [false; 3];
        for _ in 0..200 {
            seen[weighted_choice(&mut rng, &[0.0, 0.0, 0.0]).unwrap()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
