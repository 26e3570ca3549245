//! Weighted candidate selection.
//!
//! Two policies:
//! - uniform: cost weighting off, shuffle and take the first [`PICKS`]
//! - weighted: cheaper candidates (and partially funded pools) get more
//!   probability mass, then [`PICKS`] distinct candidates are drawn
//!   without replacement

use thiserror::Error;

use crate::candidate::{EffectCandidate, Provider};
use crate::prng::Prng;
use crate::weights::WeightConfig;

/// Real candidates offered per round (the random option is added separately).
pub const PICKS: usize = 4;

/// Price assumed for candidates that carry no provider price.
const LOCAL_PRICE: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("need {needed} eligible candidates, only {available} available")]
    InsufficientCandidates { needed: usize, available: usize },
}

/// Price after the optional ceiling from a negative cost weight.
pub fn effective_price(candidate: &EffectCandidate, cfg: &WeightConfig) -> i64 {
    let price = match candidate.provider {
        Provider::CrowdControl => candidate.price,
        Provider::Local => LOCAL_PRICE,
    };
    ceiling(price, cfg.cost_weight)
}

/// Pool after the optional ceiling from a negative pool weight.
pub fn effective_pool(candidate: &EffectCandidate, cfg: &WeightConfig) -> Option<i64> {
    candidate.pool.map(|pool| ceiling(pool, cfg.pool_weight))
}

fn ceiling(value: i64, weight: i64) -> i64 {
    if weight < 0 && weight.unsigned_abs() < value.unsigned_abs() && value > 0 {
        -weight
    } else {
        value
    }
}

/// Unnormalized, non-negative weight per candidate (weighted policy).
pub fn raw_weights(candidates: &[EffectCandidate], cfg: &WeightConfig) -> Vec<f64> {
    let prices: Vec<i64> = candidates
        .iter()
        .map(|c| effective_price(c, cfg))
        .collect();
    let max_observed = prices.iter().copied().max().unwrap_or(0);
    let cutoff = cfg.price_cutoff();

    candidates
        .iter()
        .zip(&prices)
        .map(|(candidate, &price)| {
            let mut inverse = 1 + max_observed - price;
            if matches!(cutoff, Some(max) if inverse > max) {
                inverse = 0;
            }
            let mut weight = inverse.saturating_mul(cfg.cost_factor);
            if cfg.pool_weighted() {
                if let Some(pool) = effective_pool(candidate, cfg) {
                    weight = weight.saturating_add(pool.saturating_mul(cfg.pool_factor));
                }
            }
            // Negative multipliers must not produce negative probability.
            weight.max(0) as f64
        })
        .collect()
}

/// Probability of each candidate being drawn first. Sums to 1 for a
/// non-empty input; all-zero weights (and the uniform policy) fall back to
/// an even split.
pub fn distribution(candidates: &[EffectCandidate], cfg: &WeightConfig) -> Vec<f64> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let uniform = vec![1.0 / candidates.len() as f64; candidates.len()];
    if !cfg.cost_weighted() {
        return uniform;
    }
    let weights = raw_weights(candidates, cfg);
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return uniform;
    }
    weights.into_iter().map(|w| w / total).collect()
}

/// Draw `k` distinct indices, each draw proportional to the remaining
/// weights. Once the remaining mass is zero the rest are drawn uniformly.
pub fn draw_without_replacement(weights: &[f64], k: usize, rng: &mut Prng) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..weights.len()).collect();
    let mut picked = Vec::with_capacity(k.min(weights.len()));

    while picked.len() < k && !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|&i| weights[i]).sum();
        let slot = if total > 0.0 && total.is_finite() {
            let mut target = rng.next_f64_01() * total;
            let mut chosen = None;
            for (slot, &i) in remaining.iter().enumerate() {
                if weights[i] <= 0.0 {
                    continue;
                }
                chosen = Some(slot);
                if target < weights[i] {
                    break;
                }
                target -= weights[i];
            }
            // Rounding can walk past the end; `chosen` then holds the last positive slot.
            chosen.unwrap_or(0)
        } else {
            rng.gen_range_usize(0, remaining.len())
        };
        picked.push(remaining.remove(slot));
    }
    picked
}

/// Choose [`PICKS`] distinct candidates from the eligible set.
pub fn select(
    candidates: &[EffectCandidate],
    cfg: &WeightConfig,
    rng: &mut Prng,
) -> Result<Vec<EffectCandidate>, SampleError> {
    if candidates.len() < PICKS {
        return Err(SampleError::InsufficientCandidates {
            needed: PICKS,
            available: candidates.len(),
        });
    }

    let indices = if cfg.cost_weighted() {
        draw_without_replacement(&distribution(candidates, cfg), PICKS, rng)
    } else {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        rng.shuffle(&mut order);
        order.truncate(PICKS);
        order
    };

    Ok(indices.into_iter().map(|i| candidates[i].clone()).collect())
}
