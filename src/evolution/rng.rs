//! Explicit random source threaded through every genetic operator.

use rand::prelude::*;

/// Seedable random number generator for search operations.
///
/// Every operator takes one of these by `&mut`; nothing in the engine draws
/// from thread-local randomness, so a seeded run replays exactly.
#[derive(Debug, Clone)]
pub struct SearchRng {
    rng: StdRng,
}

impl SearchRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.rng.r#gen::<f64>()
    }

    /// Bernoulli trial; `chance <= 0` never fires, `chance >= 1` always does.
    pub fn chance(&mut self, chance: f64) -> bool {
        self.unit() < chance
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Uniform integer in `min..=max`.
    pub fn int_inclusive(&mut self, min: i64, max: i64) -> i64 {
        self.rng.gen_range(min..=max)
    }

    /// Uniform in `[low, high)`.
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.unit()
    }

    /// Gaussian mutation of a normalized value, clamped back to `[0, 1]`.
    pub fn gaussian_mutate(&mut self, value: f64, strength: f64) -> f64 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        (value + noise * strength).clamp(0.0, 1.0)
    }

    pub(crate) fn inner(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
