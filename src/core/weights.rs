//! Weight and interval configuration for shuffle rounds.
//!
//! Every setter goes through the clamp functions below, so a `WeightConfig`
//! reachable from the scheduler is always in range. Out-of-range input is
//! never rejected.

use serde::{Deserialize, Serialize};

pub const FACTOR_LIMIT: i64 = 1000;
pub const MAX_PRICE_LIMIT: i64 = 999_999;
pub const INTERVAL_MAX_SECS: u32 = 3600;
pub const ROUND_MIN_SECS: u32 = 1;
pub const COOLDOWN_MIN_SECS: u32 = 10;
/// Minimum length of one full round + cooldown cycle.
pub const CYCLE_MIN_SECS: u32 = 20;

pub fn clamp_cost_factor(factor: i64) -> i64 {
    factor.clamp(-FACTOR_LIMIT, FACTOR_LIMIT)
}

pub fn clamp_pool_factor(factor: i64) -> i64 {
    clamp_cost_factor(factor)
}

pub fn clamp_max_price(max_price: i64) -> i64 {
    max_price.clamp(0, MAX_PRICE_LIMIT)
}

/// Weight magnitudes double as price/pool ceilings, so they share the price range.
pub fn clamp_weight(weight: i64) -> i64 {
    weight.clamp(-MAX_PRICE_LIMIT, MAX_PRICE_LIMIT)
}

/// Clamp `(round, cooldown)` durations in seconds.
///
/// A cycle shorter than [`CYCLE_MIN_SECS`] stretches the cooldown, which is
/// then held to at least [`COOLDOWN_MIN_SECS`].
pub fn clamp_intervals(round: i64, cooldown: i64) -> (u32, u32) {
    let max = INTERVAL_MAX_SECS as i64;
    let round = round.clamp(ROUND_MIN_SECS as i64, max);
    let mut cooldown = cooldown.clamp(COOLDOWN_MIN_SECS as i64, max);
    if round + cooldown < CYCLE_MIN_SECS as i64 {
        cooldown = CYCLE_MIN_SECS as i64 - (round + cooldown);
    }
    let cooldown = cooldown.max(COOLDOWN_MIN_SECS as i64);
    (round as u32, cooldown as u32)
}

/// Sampling and application knobs.
///
/// `cost_weight` / `pool_weight` of 0 disable the corresponding weighting; a
/// negative magnitude additionally caps the per-candidate price (or pool) at
/// its absolute value. `max_price` of 0 means "no cutoff".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub cost_weight: i64,
    pub cost_factor: i64,
    pub max_price: i64,
    pub pool_weight: i64,
    pub pool_factor: i64,
    pub round_secs: u32,
    pub cooldown_secs: u32,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            cost_weight: -10,
            cost_factor: 1,
            max_price: 500,
            pool_weight: -30,
            pool_factor: 100,
            round_secs: 20,
            cooldown_secs: 90,
        }
    }
}

impl WeightConfig {
    /// Uniform sampling, no pool contributions, default intervals.
    pub fn uniform() -> Self {
        Self {
            cost_weight: 0,
            pool_weight: 0,
            ..Self::default()
        }
    }

    /// Re-apply every clamp. Used after deserializing an operator-edited file.
    pub fn clamped(self) -> Self {
        let (round_secs, cooldown_secs) =
            clamp_intervals(self.round_secs as i64, self.cooldown_secs as i64);
        Self {
            cost_weight: clamp_weight(self.cost_weight),
            cost_factor: clamp_cost_factor(self.cost_factor),
            max_price: clamp_max_price(self.max_price),
            pool_weight: clamp_weight(self.pool_weight),
            pool_factor: clamp_pool_factor(self.pool_factor),
            round_secs,
            cooldown_secs,
        }
    }

    pub fn cost_weighted(&self) -> bool {
        self.cost_weight != 0
    }

    pub fn pool_weighted(&self) -> bool {
        self.pool_weight != 0
    }

    pub fn price_cutoff(&self) -> Option<i64> {
        (self.max_price > 0).then_some(self.max_price)
    }

    pub fn set_cost_weight(&mut self, weight: i64, factor: i64, max_price: Option<i64>) {
        self.cost_weight = clamp_weight(weight);
        self.cost_factor = clamp_cost_factor(factor);
        if let Some(mp) = max_price {
            self.max_price = clamp_max_price(mp);
        }
    }

    pub fn set_pool_weight(&mut self, weight: i64, factor: i64) {
        self.pool_weight = clamp_weight(weight);
        self.pool_factor = clamp_pool_factor(factor);
    }

    pub fn set_intervals(&mut self, round: i64, cooldown: i64) {
        let (r, c) = clamp_intervals(round, cooldown);
        self.round_secs = r;
        self.cooldown_secs = c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_cycle_stretches_cooldown() {
        // 1 + 10 < 20 -> cooldown = 20 - 11 = 9 -> re-clamped to 10.
        assert_eq!(clamp_intervals(1, 5), (1, 10));
        // 5 + 12 < 20 -> cooldown = 20 - 17 = 3 -> re-clamped to 10.
        assert_eq!(clamp_intervals(5, 12), (5, 10));
        assert_eq!(clamp_intervals(20, 90), (20, 90));
    }

    #[test]
    fn intervals_clamp_to_bounds() {
        assert_eq!(clamp_intervals(0, 0), (1, 10));
        assert_eq!(clamp_intervals(-30, 9000), (1, 3600));
        assert_eq!(clamp_intervals(4000, 4000), (3600, 3600));
    }

    #[test]
    fn max_price_bounds() {
        assert_eq!(clamp_max_price(-5), 0);
        assert_eq!(clamp_max_price(5_000_000), 999_999);
        assert_eq!(clamp_max_price(250), 250);
    }

    #[test]
    fn factor_bounds() {
        assert_eq!(clamp_cost_factor(-5000), -1000);
        assert_eq!(clamp_pool_factor(1001), 1000);
        assert_eq!(clamp_pool_factor(-3), -3);
    }

    #[test]
    fn setters_clamp_on_write() {
        let mut cfg = WeightConfig::default();
        cfg.set_cost_weight(-20, 4000, Some(-1));
        assert_eq!(cfg.cost_weight, -20);
        assert_eq!(cfg.cost_factor, 1000);
        assert_eq!(cfg.max_price, 0);
        assert_eq!(cfg.price_cutoff(), None);

        cfg.set_cost_weight(3, 2, None);
        assert_eq!(cfg.max_price, 0, "max price is left alone when not given");

        cfg.set_intervals(2, 3);
        assert_eq!((cfg.round_secs, cfg.cooldown_secs), (2, 10));
    }

    #[test]
    fn partial_json_uses_defaults_then_clamps() {
        let cfg: WeightConfig =
            serde_json::from_str(r#"{"max_price": 12345678, "round_secs": 0}"#).unwrap();
        let cfg = cfg.clamped();
        assert_eq!(cfg.max_price, 999_999);
        assert_eq!(cfg.round_secs, 1);
        assert_eq!(cfg.cost_weight, -10);
        assert!(cfg.cost_weighted() && cfg.pool_weighted());
    }
}
