//! How a resolved winner is turned into backend calls.
//!
//! The plan is an ordered list of attempts; the driver stops at the first
//! one that succeeds.

use crate::candidate::{EffectCandidate, Provider};
use crate::round::RoundOption;
use crate::weights::WeightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStep {
    /// Fund the candidate's pool by `amount` cost units.
    Contribute { amount: i64 },
    /// Request the effect outright.
    Request { quantity: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyPlan {
    pub candidate: EffectCandidate,
    pub steps: Vec<ApplyStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSkip {
    /// The random option carries no effect of its own.
    NoCandidate,
    /// Only provider effects can be applied remotely.
    NotRemote(String),
}

/// Pool contribution for `candidate`: the missing amount, capped at the
/// price cutoff. `None` when pool weighting is off, the candidate has no
/// pool, or the pool is already funded.
pub fn pool_contribution(candidate: &EffectCandidate, cfg: &WeightConfig) -> Option<i64> {
    if !cfg.pool_weighted() {
        return None;
    }
    let missing = candidate.price - candidate.pool?;
    if missing <= 0 {
        return None;
    }
    Some(match cfg.price_cutoff() {
        Some(cap) => missing.min(cap),
        None => missing,
    })
}

pub fn plan(winner: &RoundOption, cfg: &WeightConfig) -> Result<ApplyPlan, PlanSkip> {
    let candidate = winner.candidate().ok_or(PlanSkip::NoCandidate)?;
    if candidate.provider != Provider::CrowdControl {
        return Err(PlanSkip::NotRemote(candidate.id.clone()));
    }

    let quantity = match &candidate.quantity {
        Some(range) => range.clamp(winner.amount()),
        None => 1,
    };
    let mut steps = Vec::with_capacity(2);
    if let Some(amount) = pool_contribution(candidate, cfg) {
        steps.push(ApplyStep::Contribute { amount });
    }
    steps.push(ApplyStep::Request { quantity });

    Ok(ApplyPlan {
        candidate: candidate.clone(),
        steps,
    })
}
