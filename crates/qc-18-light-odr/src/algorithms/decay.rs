//! # Decay Accumulators
//!
//! Exponentially decayed value/cost statistics with a fixed half-life.
//!
//! Decay is applied lazily: an accumulator stores the time of its last
//! update and folds in `2^(-elapsed / half_life)` whenever it is touched.
//! Nothing ticks in the background.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Timestamp;

/// One decayed (value, cost) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecayAccumulator {
    /// Half-life in milliseconds.
    half_life_ms: u64,
    /// Decayed sum of delivered value.
    value: f64,
    /// Decayed sum of spent cost.
    cost: f64,
    /// Time the sums were last brought up to date.
    last_update: Timestamp,
}

impl DecayAccumulator {
    /// Empty accumulator.
    pub fn new(half_life: Duration, now: Timestamp) -> Self {
        Self {
            half_life_ms: (half_life.as_millis() as u64).max(1),
            value: 0.0,
            cost: 0.0,
            last_update: now,
        }
    }

    /// Configured half-life.
    pub fn half_life(&self) -> Duration {
        Duration::from_millis(self.half_life_ms)
    }

    fn factor(&self, now: Timestamp) -> f64 {
        let elapsed = now.millis_since(self.last_update) as f64;
        (-(elapsed / self.half_life_ms as f64)).exp2()
    }

    /// Fold elapsed time into the sums.
    pub fn decay_to(&mut self, now: Timestamp) {
        if now <= self.last_update {
            return;
        }
        let factor = self.factor(now);
        self.value *= factor;
        self.cost *= factor;
        self.last_update = now;
    }

    /// Decay, then add one observation.
    pub fn add(&mut self, now: Timestamp, cost: f64, value: f64) {
        self.decay_to(now);
        self.cost += cost.max(0.0);
        self.value += value.max(0.0);
    }

    /// Decayed sums at `now` without mutating.
    pub fn sums_at(&self, now: Timestamp) -> (f64, f64) {
        let factor = self.factor(now);
        (self.value * factor, self.cost * factor)
    }

    /// Value per cost at `now`, pulled towards `prior` by `prior_weight`
    /// pseudo-cost units. Old evidence fades and the ratio drifts back to
    /// the prior.
    pub fn ratio(&self, now: Timestamp, prior: f64, prior_weight: f64) -> f64 {
        let (value, cost) = self.sums_at(now);
        let denom = cost + prior_weight;
        if denom <= 0.0 {
            return prior;
        }
        (value + prior * prior_weight) / denom
    }

    /// Mean value per unit cost, `None` with no evidence.
    pub fn mean(&self) -> Option<f64> {
        if self.cost > 0.0 {
            Some(self.value / self.cost)
        } else {
            None
        }
    }
}

/// Accumulators for one statistic at several half-lives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecaySet {
    accumulators: Vec<DecayAccumulator>,
}

impl DecaySet {
    /// One accumulator per half-life.
    pub fn new(half_lives: &[Duration], now: Timestamp) -> Self {
        Self {
            accumulators: half_lives
                .iter()
                .map(|h| DecayAccumulator::new(*h, now))
                .collect(),
        }
    }

    /// Whether this set was built with exactly these half-lives.
    pub fn matches(&self, half_lives: &[Duration]) -> bool {
        self.accumulators.len() == half_lives.len()
            && self
                .accumulators
                .iter()
                .zip(half_lives)
                .all(|(acc, h)| acc.half_life_ms == (h.as_millis() as u64).max(1))
    }

    /// Add one observation to every accumulator.
    pub fn add(&mut self, now: Timestamp, cost: f64, value: f64) {
        for acc in &mut self.accumulators {
            acc.add(now, cost, value);
        }
    }

    /// Weighted combination of the per-accumulator ratios.
    ///
    /// `weights` pairs with the half-lives by position; missing weights
    /// count as zero.
    pub fn score(&self, now: Timestamp, weights: &[f64], prior: f64, prior_weight: f64) -> f64 {
        let mut total = 0.0;
        let mut weight_sum = 0.0;
        for (acc, w) in self.accumulators.iter().zip(weights) {
            total += w * acc.ratio(now, prior, prior_weight);
            weight_sum += w;
        }
        if weight_sum <= 0.0 {
            return prior;
        }
        (total / weight_sum).clamp(0.0, 1.0)
    }

    /// Mean of the shortest horizon (first accumulator).
    pub fn short_term_mean(&self) -> Option<f64> {
        self.accumulators.first().and_then(DecayAccumulator::mean)
    }

    /// The underlying accumulators.
    pub fn accumulators(&self) -> &[DecayAccumulator] {
        &self.accumulators
    }
}
