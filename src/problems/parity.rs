//! Even-k-parity: predict whether the number of true inputs is even, from
//! `{and, or, nand, nor}` alone. A single-typed task, so it doubles as the
//! CGP showcase.

use crate::compile::Program;
use crate::error::Result;
use crate::evolve::{simple_evolve, EvolveConfig, Evolved, Individual, MapMode, Summary};
use crate::genome::cgp::CgpGenome;
use crate::genome::{GenomeOptions, Genotype, InputSpec};
use crate::lang::Language;
use crate::problems::RunConfig;
use crate::select::{tournament, Tournament};
use crate::value::{Type, Value};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// The four-gate boolean vocabulary.
#[must_use]
pub fn language() -> Language {
    Language::boolean_logic()
}

/// Fraction of all `2^k` assignments for which the program predicts even
/// parity of the true count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn parity_fitness(program: &Program, k: usize) -> f64 {
    let cases = 1usize << k;
    let mut correct = 0usize;
    for bits in 0..cases {
        let args: Vec<Value> = (0..k)
            .map(|i| Value::Bool(bits >> i & 1 == 1))
            .collect();
        let even = (bits.count_ones() % 2) == 0;
        let out = program
            .run1(&args)
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if out == even {
            correct += 1;
        }
    }
    correct as f64 / cases as f64
}

/// Build one random parity genome with `k` inputs.
///
/// # Errors
///
/// As [`CgpGenome::rand`].
pub fn rand_genome(k: usize, rng: &mut SmallRng) -> Result<CgpGenome> {
    let inputs: Vec<InputSpec> = (0..k)
        .map(|i| InputSpec::new(&format!("i{i}"), Type::Bool))
        .collect();
    CgpGenome::rand(
        inputs,
        Vec::new(),
        vec![Type::Bool],
        language(),
        k + 24,
        GenomeOptions {
            mut_rate: 0.08,
            ..GenomeOptions::default()
        },
        rng,
    )
}

/// Evolve even-`k`-parity predictors with CGP and tournament regeneration.
///
/// # Errors
///
/// Construction or driver failures.
pub fn run(
    k: usize,
    cfg: &RunConfig,
    progress: impl FnMut(usize, &[Individual<CgpGenome>], &[Summary<CgpGenome>]),
) -> Result<Evolved<CgpGenome, Summary<CgpGenome>>> {
    let mut rng = SmallRng::seed_from_u64(cfg.seed);
    let init: Vec<Individual<CgpGenome>> = (0..cfg.popn)
        .map(|_| rand_genome(k, &mut rng).map(Individual::new))
        .collect::<Result<_>>()?;
    let selection = Tournament {
        size: 3,
        elitism: 1,
    };
    let evolve_cfg = EvolveConfig {
        n_gens: cfg.n_gens,
        target: cfg.target,
        progress_every: cfg.progress_every,
        cancel: None,
    };
    simple_evolve(
        init,
        &evolve_cfg,
        MapMode::Sequential,
        move |genome: &mut CgpGenome| match genome.program() {
            Ok(program) => parity_fitness(&program, k),
            Err(_) => 0.0,
        },
        |popn| {
            Ok(tournament(
                popn,
                &selection,
                &mut rng,
                |a, _b, _rng| a.clone(),
                |mut genome, rng| {
                    let _ = genome.mutate(rng);
                    genome
                },
            ))
        },
        progress,
    )
}
