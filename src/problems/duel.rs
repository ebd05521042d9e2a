//! Randomness duel: a generator sub-population evolves
//! `(seed) -> (out, next-seed)` while a discriminator sub-population
//! evolves `(x, s1..s6) -> (s1'..s6', score)` that tries to predict the
//! generator's next value. Prediction error below the uniform-guess
//! baseline scores for the discriminator, error above it for the
//! generator; the two fitnesses are exact opposites.

use crate::coevolve::{coevolve, CoSummary, CoevolveConfig, ParasiteSelection};
use crate::error::Result;
use crate::evolve::{EvolveConfig, Evolved, Individual};
use crate::genome::icgp::IcgpGenome;
use crate::genome::{ErcGen, GenomeOptions, Genotype, InputSpec};
use crate::lang::{Language, OpSpec};
use crate::problems::RunConfig;
use crate::select::{negative_selection, NegativeSelection};
use crate::value::{Type, Value};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Sequences per duel.
pub const SEQUENCES: usize = 16;

/// Values per sequence.
pub const SEQ_LEN: usize = 16;

/// Values are reduced modulo this magnitude.
pub const MAGNITUDE: i64 = 1024;

/// Expected |guess - actual| / MAGNITUDE for uniform guessing.
const BASELINE_ERR: f64 = 1.0 / 3.0;

/// Maps the error margin to a fitness in roughly ±16.
const SCALE: f64 = 48.0;

/// Integer arithmetic for the generator.
#[must_use]
pub fn generator_language() -> Language {
    Language::integer_arithmetic()
}

/// Integer arithmetic plus comparison and choice for the discriminator.
#[must_use]
pub fn discriminator_language() -> Language {
    let i = Type::Int;
    let b = Type::Bool;
    let mut entries = Language::integer_arithmetic().entries().to_vec();
    entries.push(OpSpec::func(
        "if",
        i.clone(),
        vec![b.clone(), i.clone(), i.clone()],
    ));
    entries.push(OpSpec::func("lt", b, vec![i.clone(), i]));
    Language::new(entries).expect("built-in language is well-formed")
}

/// Duel one generator against one discriminator; returns
/// `(generator fitness, discriminator fitness)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn duel(generator: &mut IcgpGenome, discriminator: &mut IcgpGenome) -> (f64, f64) {
    let (Ok(gen_program), Ok(disc_program)) = (generator.program(), discriminator.program())
    else {
        return (0.0, 0.0);
    };
    let mut err_sum = 0.0;
    let mut samples = 0usize;
    for seq in 0..SEQUENCES {
        let mut seed = (seq as i64)
            .wrapping_mul(2_654_435_761)
            .wrapping_add(12_345);
        let mut values = Vec::with_capacity(SEQ_LEN);
        for _ in 0..SEQ_LEN {
            let Ok(out) = gen_program.run(&[Value::Int(seed)]) else {
                return (0.0, 0.0);
            };
            values.push(out[0].as_i64().unwrap_or(0).rem_euclid(MAGNITUDE));
            seed = out[1].as_i64().unwrap_or(0);
        }
        let mut state = [0i64; 6];
        for i in 0..SEQ_LEN - 1 {
            let args = [
                Value::Int(values[i]),
                Value::Int(state[0]),
                Value::Int(state[1]),
                Value::Int(state[2]),
                Value::Int(state[3]),
                Value::Int(state[4]),
                Value::Int(state[5]),
            ];
            let Ok(out) = disc_program.run(&args) else {
                return (0.0, 0.0);
            };
            for (slot, value) in state.iter_mut().zip(&out) {
                *slot = value.as_i64().unwrap_or(0);
            }
            let guess = out[6].as_i64().unwrap_or(0).rem_euclid(MAGNITUDE);
            err_sum += (guess - values[i + 1]).abs() as f64 / MAGNITUDE as f64;
            samples += 1;
        }
    }
    let mean_err = err_sum / samples as f64;
    let disc_fitness = (BASELINE_ERR - mean_err) * SCALE;
    (-disc_fitness, disc_fitness)
}

fn duel_options() -> GenomeOptions {
    GenomeOptions {
        erc_prob: 0.2,
        erc_gen: ErcGen::UniformInt { lo: 0, hi: 65_535 },
        mut_rate: 0.1,
        target_size: 32,
        data_type: Some(Type::Int),
        ..GenomeOptions::default()
    }
}

/// Build one random generator genome.
///
/// # Errors
///
/// As [`IcgpGenome::rand`].
pub fn rand_generator(rng: &mut SmallRng) -> Result<IcgpGenome> {
    IcgpGenome::rand(
        vec![InputSpec::new("seed", Type::Int)],
        Vec::new(),
        vec![Type::Int, Type::Int],
        generator_language(),
        16,
        duel_options(),
        rng,
    )
}

/// Build one random discriminator genome.
///
/// # Errors
///
/// As [`IcgpGenome::rand`].
pub fn rand_discriminator(rng: &mut SmallRng) -> Result<IcgpGenome> {
    let mut inputs = vec![InputSpec::new("x", Type::Int)];
    for k in 1..=6 {
        inputs.push(InputSpec::new(&format!("i{k}"), Type::Int));
    }
    IcgpGenome::rand(
        inputs,
        Vec::new(),
        vec![Type::Int; 7],
        discriminator_language(),
        24,
        duel_options(),
        rng,
    )
}

/// Coevolve generators against discriminators with current-best plus
/// history-peak parasite selection (top 2 + 6 peak champions).
///
/// # Errors
///
/// Construction or driver failures.
pub fn run(
    cfg: &RunConfig,
    progress: impl FnMut(usize, &CoSummary<IcgpGenome>),
) -> Result<Evolved<IcgpGenome, CoSummary<IcgpGenome>>> {
    let mut rng = SmallRng::seed_from_u64(cfg.seed);
    let generators: Vec<IcgpGenome> = (0..cfg.popn)
        .map(|_| rand_generator(&mut rng))
        .collect::<Result<_>>()?;
    let discriminators: Vec<IcgpGenome> = (0..cfg.popn)
        .map(|_| rand_discriminator(&mut rng))
        .collect::<Result<_>>()?;

    let co_cfg = CoevolveConfig {
        evolve: EvolveConfig {
            n_gens: cfg.n_gens,
            target: cfg.target,
            progress_every: cfg.progress_every,
            cancel: None,
        },
        parasites: ParasiteSelection::BestPlusPeaks { top_n: 2, peaks: 6 },
    };
    let selection = NegativeSelection {
        select_n: cfg.popn.div_ceil(3).max(2),
        elitism: 2,
    };
    let regen = move |popn: &[Individual<IcgpGenome>],
                      rng: &mut SmallRng|
          -> Result<Vec<Individual<IcgpGenome>>> {
        Ok(negative_selection(
            popn,
            &selection,
            rng,
            |a: &IcgpGenome, _b: &IcgpGenome, _rng: &mut SmallRng| a.clone(),
            |mut genome: IcgpGenome, rng: &mut SmallRng| {
                let _ = genome.mutate(rng);
                let _ = genome.vary_neutral(rng);
                genome.tick();
                genome
            },
        ))
    };
    coevolve(
        generators,
        discriminators,
        &co_cfg,
        &mut rng,
        |g, d| duel(g, d),
        regen,
        regen,
        progress,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duel_is_zero_sum() {
        let mut rng = SmallRng::seed_from_u64(81);
        let mut generator = rand_generator(&mut rng).unwrap();
        let mut discriminator = rand_discriminator(&mut rng).unwrap();
        let (fg, fd) = duel(&mut generator, &mut discriminator);
        assert!((fg + fd).abs() < 1e-9);
        assert!(fg.abs() <= SCALE);
    }

    #[test]
    fn test_duel_deterministic() {
        let mut rng = SmallRng::seed_from_u64(82);
        let mut generator = rand_generator(&mut rng).unwrap();
        let mut discriminator = rand_discriminator(&mut rng).unwrap();
        let first = duel(&mut generator, &mut discriminator);
        let second = duel(&mut generator, &mut discriminator);
        assert_eq!(first, second);
    }
}
