//! Injectable uniform draws for the response gate.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

/// Thread-local OS-seeded generator. The production default.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic generator for reproducible runs.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }
}

/// Replays a fixed script of draws, then repeats the last one.
pub struct FixedDraws {
    draws: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl FixedDraws {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        let draws: VecDeque<f64> = draws.into_iter().collect();
        let fallback = draws.back().copied().unwrap_or(0.0);
        Self {
            draws: Mutex::new(draws),
            fallback,
        }
    }

    /// Every draw returns `value`.
    pub fn always(value: f64) -> Self {
        Self::new([value])
    }
}

impl RandomSource for FixedDraws {
    fn next_f64(&self) -> f64 {
        self.draws.lock().pop_front().unwrap_or(self.fallback)
    }
}
