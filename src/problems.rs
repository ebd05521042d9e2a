//! Benchmark problems: ready-made languages, fitness functions and run
//! entry points consumed by the CLI and the end-to-end tests.

pub mod ant;
pub mod circle;
pub mod duel;
pub mod parity;

use serde::{Deserialize, Serialize};

/// Shared run parameters for the benchmark entry points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Population size (per sub-population for coevolution).
    pub popn: usize,
    /// Generation budget.
    pub n_gens: usize,
    /// Terminate early when any fitness reaches this.
    pub target: f64,
    /// RNG seed.
    pub seed: u64,
    /// Progress stride.
    pub progress_every: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            popn: 5,
            n_gens: 1000,
            target: f64::INFINITY,
            seed: 42,
            progress_every: 50,
        }
    }
}
