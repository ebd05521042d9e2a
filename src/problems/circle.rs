//! Circle classification: learn `positive(out) ⇔ x² + y² ≤ r²` over a 9×9
//! grid for radii 1 through 4, from float arithmetic alone.

use crate::compile::Program;
use crate::error::Result;
use crate::evolve::{simple_evolve, EvolveConfig, Evolved, Individual, MapMode, Summary};
use crate::genome::icgp::IcgpGenome;
use crate::genome::{GenomeOptions, Genotype, InputSpec};
use crate::lang::Language;
use crate::problems::RunConfig;
use crate::select::{negative_selection, NegativeSelection};
use crate::value::{Type, Value};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Float arithmetic plus the constant `0.0`.
#[must_use]
pub fn language() -> Language {
    Language::float_arithmetic()
}

/// Fraction of the 9×9 grid × r ∈ {1..4} classified correctly. Inputs are
/// `[r, y, x]`; the point is inside when `x² + y² ≤ r²` and the program
/// claims inside by returning a positive value.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn grid_fitness(program: &Program) -> f64 {
    let mut correct = 0usize;
    let mut total = 0usize;
    for r in 1..=4i32 {
        let rf = f64::from(r);
        for y in -4..=4i32 {
            for x in -4..=4i32 {
                let (xf, yf) = (f64::from(x), f64::from(y));
                let inside = xf * xf + yf * yf <= rf * rf;
                let out = program
                    .run1(&[Value::Float(rf), Value::Float(yf), Value::Float(xf)])
                    .ok()
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                if (out > 0.0) == inside {
                    correct += 1;
                }
                total += 1;
            }
        }
    }
    correct as f64 / total as f64
}

/// Build one random classifier genome.
///
/// # Errors
///
/// As [`IcgpGenome::rand`].
pub fn rand_genome(rng: &mut SmallRng) -> Result<IcgpGenome> {
    IcgpGenome::rand(
        vec![
            InputSpec::new("r", Type::Float),
            InputSpec::new("y", Type::Float),
            InputSpec::new("x", Type::Float),
        ],
        Vec::new(),
        vec![Type::Float],
        language(),
        16,
        GenomeOptions {
            mut_rate: 0.1,
            target_size: 24,
            ..GenomeOptions::default()
        },
        rng,
    )
}

/// Evolve classifiers with ICGP and negative selection (elitism 1).
///
/// # Errors
///
/// Construction or driver failures.
pub fn run(
    cfg: &RunConfig,
    progress: impl FnMut(usize, &[Individual<IcgpGenome>], &[Summary<IcgpGenome>]),
) -> Result<Evolved<IcgpGenome, Summary<IcgpGenome>>> {
    let mut rng = SmallRng::seed_from_u64(cfg.seed);
    let init: Vec<Individual<IcgpGenome>> = (0..cfg.popn)
        .map(|_| rand_genome(&mut rng).map(Individual::new))
        .collect::<Result<_>>()?;
    let selection = NegativeSelection {
        select_n: 3,
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
        |genome: &mut IcgpGenome| match genome.program() {
            Ok(program) => grid_fitness(&program),
            Err(_) => 0.0,
        },
        |popn| {
            Ok(negative_selection(
                popn,
                &selection,
                &mut rng,
                |a, _b, _rng| a.clone(),
                |mut genome, rng| {
                    let _ = genome.mutate(rng);
                    let _ = genome.vary_neutral(rng);
                    genome.tick();
                    genome
                },
            ))
        },
        progress,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminant_genome_scores_high() {
        // out = r*r - (x*x + y*y): positive strictly inside the circle.
        let mut genome = IcgpGenome::empty(
            vec![
                InputSpec::new("r", Type::Float),
                InputSpec::new("y", Type::Float),
                InputSpec::new("x", Type::Float),
            ],
            Vec::new(),
            vec![Type::Float],
            language(),
            GenomeOptions::default(),
        );
        let &[r, y, x] = genome.input_ids() else {
            panic!("three inputs expected")
        };
        let f = Type::Float;
        let bin = vec![f.clone(), f.clone()];
        let rr = genome.add_func("mul", f.clone(), bin.clone(), vec![r, r]).unwrap();
        let xx = genome.add_func("mul", f.clone(), bin.clone(), vec![x, x]).unwrap();
        let yy = genome.add_func("mul", f.clone(), bin.clone(), vec![y, y]).unwrap();
        let sum = genome.add_func("add", f.clone(), bin.clone(), vec![xx, yy]).unwrap();
        let out = genome.add_func("sub", f.clone(), bin, vec![rr, sum]).unwrap();
        genome.set_out_ref(0, out).unwrap();

        let program = genome.program().unwrap();
        let fitness = grid_fitness(&program);
        // Only the 16 exact-boundary grid points are misclassified.
        assert!(fitness > 0.9, "fitness {fitness}");
    }

    #[test]
    fn test_constant_genome_scores_on_outside_majority() {
        let mut rng = SmallRng::seed_from_u64(62);
        let mut genome = rand_genome(&mut rng).unwrap();
        let fitness = match genome.program() {
            Ok(p) => grid_fitness(&p),
            Err(_) => 0.0,
        };
        assert!((0.0..=1.0).contains(&fitness));
    }
}
