//! The discrete-generation evolution driver.
//!
//! Each generation: the fitness callback tags every individual, `distil`
//! summarises the evaluated population into the history, the progress gate
//! fires, and — unless the target is reached or the budget is spent —
//! `regenerate` produces the next population. The driver never mutates a
//! genome value; it threads new values through the loop.

use crate::error::Result;
use crate::series;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sub-population tag for coevolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubPop {
    /// Host sub-population.
    A,
    /// Parasite sub-population.
    B,
}

/// A genome plus the evaluation metadata that rides along with it. Fitness
/// is missing on freshly variated individuals and never part of genome
/// equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual<G> {
    /// The genome.
    pub genome: G,
    /// Fitness tag; larger is better. `None` until evaluated.
    pub fitness: Option<f64>,
    /// Sub-population tag (coevolution only).
    pub subpop: Option<SubPop>,
}

impl<G> Individual<G> {
    /// An untagged, unevaluated individual.
    #[must_use]
    pub fn new(genome: G) -> Self {
        Individual {
            genome,
            fitness: None,
            subpop: None,
        }
    }

    /// An unevaluated individual tagged with its sub-population.
    #[must_use]
    pub fn tagged(genome: G, subpop: SubPop) -> Self {
        Individual {
            genome,
            fitness: None,
            subpop: Some(subpop),
        }
    }

    /// Fitness for comparisons: missing or NaN counts as 0.
    #[must_use]
    pub fn fitness_or_zero(&self) -> f64 {
        match self.fitness {
            Some(f) if !f.is_nan() => f,
            _ => 0.0,
        }
    }
}

/// Default per-generation summary: fitness spread plus a champion clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary<G> {
    /// Minimum fitness.
    pub min: f64,
    /// Median fitness.
    pub median: f64,
    /// Maximum fitness.
    pub max: f64,
    /// The highest-fitness individual.
    pub best: Option<Individual<G>>,
}

/// The default `distil`: min/median/max fitness and a `best` champion.
#[must_use]
pub fn distil<G: Clone>(popn: &[Individual<G>]) -> Summary<G> {
    let fitness: Vec<f64> = popn.iter().map(Individual::fitness_or_zero).collect();
    let best = popn
        .iter()
        .max_by(|a, b| {
            a.fitness_or_zero()
                .partial_cmp(&b.fitness_or_zero())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned();
    Summary {
        min: fitness.iter().copied().fold(f64::INFINITY, f64::min),
        median: series::median(&fitness),
        max: fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        best,
    }
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct EvolveConfig {
    /// Maximum generations.
    pub n_gens: usize,
    /// Terminate when any individual's fitness reaches this.
    pub target: f64,
    /// Progress stride; 0 fires only on first, last and target.
    pub progress_every: usize,
    /// Cooperative cancel flag, checked between generations.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        EvolveConfig {
            n_gens: 100,
            target: f64::INFINITY,
            progress_every: 1,
            cancel: None,
        }
    }
}

impl EvolveConfig {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// Result of a driver run.
#[derive(Debug, Clone)]
pub struct Evolved<G, D> {
    /// The final evaluated population.
    pub popn: Vec<Individual<G>>,
    /// Per-generation distilled summaries.
    pub history: Vec<D>,
    /// Generations actually run.
    pub n_gens: usize,
}

/// Run the discrete-generation loop.
///
/// `eval` receives the current population, the previous evaluated
/// population, and the history so far, and must return every individual
/// with a fitness tag (order may change). `regenerate` turns an evaluated
/// population into the next one. `progress` fires on the first generation,
/// every `progress_every`-th, the last, and when the target is reached.
///
/// # Errors
///
/// Whatever `eval` or `regenerate` raise; the driver does not mask user
/// callback failures.
pub fn evolve_discrete<G, D>(
    init: Vec<Individual<G>>,
    prev_popn: Option<Vec<Individual<G>>>,
    cfg: &EvolveConfig,
    mut eval: impl FnMut(&[Individual<G>], Option<&[Individual<G>]>, &[D]) -> Result<Vec<Individual<G>>>,
    mut regenerate: impl FnMut(&[Individual<G>]) -> Result<Vec<Individual<G>>>,
    mut distil_fn: impl FnMut(&[Individual<G>]) -> D,
    mut progress: impl FnMut(usize, &[Individual<G>], &[D]),
) -> Result<Evolved<G, D>> {
    let mut history: Vec<D> = Vec::new();
    let mut current = init;
    let mut prev = prev_popn;
    let mut gen = 1usize;
    loop {
        let evaluated = eval(&current, prev.as_deref(), &history)?;
        history.push(distil_fn(&evaluated));

        let max_fitness = evaluated
            .iter()
            .map(Individual::fitness_or_zero)
            .fold(f64::NEG_INFINITY, f64::max);
        let reached = max_fitness >= cfg.target;
        let done = reached || gen >= cfg.n_gens || cfg.cancelled();

        let on_stride = cfg.progress_every > 0 && gen % cfg.progress_every == 0;
        if gen == 1 || done || on_stride {
            progress(gen, &evaluated, &history);
        }
        if done {
            return Ok(Evolved {
                popn: evaluated,
                history,
                n_gens: gen,
            });
        }
        current = regenerate(&evaluated)?;
        prev = Some(evaluated);
        gen += 1;
    }
}

/// How `simple_evolve` maps fitness over the population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapMode {
    /// One individual at a time.
    #[default]
    Sequential,
    /// All individuals in parallel; the fitness function must be pure.
    Parallel,
}

/// Wrap [`evolve_discrete`] for the common case where fitness is a pure
/// function of one individual. The genome is handed out mutably so its
/// compilation cache can fill in; the function must not depend on any
/// other shared state.
///
/// # Errors
///
/// As [`evolve_discrete`].
pub fn simple_evolve<G>(
    init: Vec<Individual<G>>,
    cfg: &EvolveConfig,
    map_mode: MapMode,
    fitness: impl Fn(&mut G) -> f64 + Sync,
    regenerate: impl FnMut(&[Individual<G>]) -> Result<Vec<Individual<G>>>,
    progress: impl FnMut(usize, &[Individual<G>], &[Summary<G>]),
) -> Result<Evolved<G, Summary<G>>>
where
    G: Clone + Send + Sync,
{
    evolve_discrete(
        init,
        None,
        cfg,
        |popn, _prev, _history| {
            let mut evaluated = popn.to_vec();
            match map_mode {
                MapMode::Sequential => {
                    for ind in &mut evaluated {
                        ind.fitness = Some(fitness(&mut ind.genome));
                    }
                }
                MapMode::Parallel => {
                    evaluated
                        .par_iter_mut()
                        .for_each(|ind| ind.fitness = Some(fitness(&mut ind.genome)));
                }
            }
            Ok(evaluated)
        },
        regenerate,
        distil,
        progress,
    )
}
