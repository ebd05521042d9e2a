//! Two-population host/parasite coevolution on top of the discrete driver.
//!
//! Every individual carries its sub-population tag. An A-individual's
//! fitness is its mean score over a duel against each selected parasite
//! from B, and symmetrically; the duel callback always receives the
//! A-genome first. Parasites come from the previous evaluated generation
//! (the current one carries no fitness yet); generation one falls back to
//! the untagged current population.

use crate::error::Result;
use crate::evolve::{
    distil, evolve_discrete, EvolveConfig, Evolved, Individual, SubPop, Summary,
};
use crate::series;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How parasites are drawn from the opposite sub-population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParasiteSelection {
    /// The `n` current highest-fitness members.
    TopN {
        /// Parasites per side.
        n: usize,
    },
    /// The `top_n` current best plus up to `peaks` champions from the
    /// history, filtered to local fitness peaks: eligible peaks are sorted
    /// by value, the top `2 * peaks` kept, shuffled, and `peaks` taken.
    BestPlusPeaks {
        /// Current-generation parasites.
        top_n: usize,
        /// Historical peak champions.
        peaks: usize,
    },
}

impl Default for ParasiteSelection {
    fn default() -> Self {
        ParasiteSelection::TopN { n: 2 }
    }
}

/// Coevolution configuration.
#[derive(Debug, Clone, Default)]
pub struct CoevolveConfig {
    /// The underlying driver configuration.
    pub evolve: EvolveConfig,
    /// Parasite selection policy.
    pub parasites: ParasiteSelection,
}

/// Per-generation summary stratified by sub-population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoSummary<G> {
    /// Summary of sub-population A.
    pub a: Summary<G>,
    /// Summary of sub-population B.
    pub b: Summary<G>,
}

fn side<G: Clone>(popn: &[Individual<G>], tag: SubPop) -> Vec<Individual<G>> {
    popn.iter()
        .filter(|ind| ind.subpop == Some(tag))
        .cloned()
        .collect()
}

/// Select parasite genomes for evaluating the opposite side.
fn select_parasites<G: Clone, R: Rng>(
    pool: &[Individual<G>],
    champions: &[Individual<G>],
    selection: &ParasiteSelection,
    rng: &mut R,
) -> Vec<G> {
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.shuffle(rng);
    order.sort_by(|&x, &y| {
        pool[y]
            .fitness_or_zero()
            .partial_cmp(&pool[x].fitness_or_zero())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let take_top = |n: usize| -> Vec<G> {
        order
            .iter()
            .take(n.max(1))
            .map(|&i| pool[i].genome.clone())
            .collect()
    };
    match selection {
        ParasiteSelection::TopN { n } => take_top(*n),
        ParasiteSelection::BestPlusPeaks { top_n, peaks } => {
            let mut selected = take_top(*top_n);
            let fitness_series: Vec<f64> =
                champions.iter().map(Individual::fitness_or_zero).collect();
            let mut eligible: Vec<(f64, usize)> = series::peaks(&fitness_series)
                .into_iter()
                .map(|p| (p.value, p.start))
                .collect();
            eligible.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            eligible.truncate(2 * peaks);
            eligible.shuffle(rng);
            selected.extend(
                eligible
                    .into_iter()
                    .take(*peaks)
                    .map(|(_, gen)| champions[gen].genome.clone()),
            );
            selected
        }
    }
}

/// Run two-population coevolution.
///
/// `duel(a, b)` scores one host/parasite pairing and returns
/// `(fitness_a, fitness_b)`; genomes are handed out mutably so compilation
/// caches can fill in. `regen_a`/`regen_b` regenerate each sub-population
/// from its evaluated members. History entries and progress are stratified
/// per sub-population.
///
/// # Errors
///
/// Whatever the duel or regeneration callbacks raise.
#[allow(clippy::too_many_arguments, clippy::cast_precision_loss)]
pub fn coevolve<G, R>(
    init_a: Vec<G>,
    init_b: Vec<G>,
    cfg: &CoevolveConfig,
    rng: &mut R,
    mut duel: impl FnMut(&mut G, &mut G) -> (f64, f64),
    mut regen_a: impl FnMut(&[Individual<G>], &mut R) -> Result<Vec<Individual<G>>>,
    mut regen_b: impl FnMut(&[Individual<G>], &mut R) -> Result<Vec<Individual<G>>>,
    mut progress: impl FnMut(usize, &CoSummary<G>),
) -> Result<Evolved<G, CoSummary<G>>>
where
    G: Clone,
    R: Rng,
{
    let init: Vec<Individual<G>> = init_a
        .into_iter()
        .map(|g| Individual::tagged(g, SubPop::A))
        .chain(init_b.into_iter().map(|g| Individual::tagged(g, SubPop::B)))
        .collect();

    // The rng is shared between closures through a RefCell; the driver
    // calls them strictly in sequence.
    let rng = std::cell::RefCell::new(rng);

    evolve_discrete(
        init,
        None,
        &cfg.evolve,
        |popn, prev, history: &[CoSummary<G>]| {
            let cur_a = side(popn, SubPop::A);
            let cur_b = side(popn, SubPop::B);
            let (pool_a, pool_b) = match prev {
                Some(p) => (side(p, SubPop::A), side(p, SubPop::B)),
                None => (cur_a.clone(), cur_b.clone()),
            };
            let champs_a: Vec<Individual<G>> =
                history.iter().filter_map(|s| s.a.best.clone()).collect();
            let champs_b: Vec<Individual<G>> =
                history.iter().filter_map(|s| s.b.best.clone()).collect();
            let mut rng = rng.borrow_mut();
            let parasites_a = select_parasites(&pool_a, &champs_a, &cfg.parasites, &mut **rng);
            let parasites_b = select_parasites(&pool_b, &champs_b, &cfg.parasites, &mut **rng);

            let mut evaluated = Vec::with_capacity(popn.len());
            for host in &cur_a {
                let mut genome = host.genome.clone();
                let mut sum = 0.0;
                for parasite in &parasites_b {
                    let mut parasite = parasite.clone();
                    sum += duel(&mut genome, &mut parasite).0;
                }
                evaluated.push(Individual {
                    genome,
                    fitness: Some(sum / parasites_b.len().max(1) as f64),
                    subpop: Some(SubPop::A),
                });
            }
            for host in &cur_b {
                let mut genome = host.genome.clone();
                let mut sum = 0.0;
                for parasite in &parasites_a {
                    let mut parasite = parasite.clone();
                    sum += duel(&mut parasite, &mut genome).1;
                }
                evaluated.push(Individual {
                    genome,
                    fitness: Some(sum / parasites_a.len().max(1) as f64),
                    subpop: Some(SubPop::B),
                });
            }
            Ok(evaluated)
        },
        |popn| {
            let mut rng = rng.borrow_mut();
            let mut next = regen_a(&side(popn, SubPop::A), &mut **rng)?;
            for ind in &mut next {
                ind.subpop = Some(SubPop::A);
            }
            let mut next_b = regen_b(&side(popn, SubPop::B), &mut **rng)?;
            for ind in &mut next_b {
                ind.subpop = Some(SubPop::B);
            }
            next.extend(next_b);
            Ok(next)
        },
        |popn| CoSummary {
            a: distil(&side(popn, SubPop::A)),
            b: distil(&side(popn, SubPop::B)),
        },
        |gen, _popn, history| {
            if let Some(last) = history.last() {
                progress(gen, last);
            }
        },
    )
}

/// Dominance tournament over generation champions. Declared by the
/// protocol but deliberately unimplemented.
///
/// # Errors
///
/// Always [`crate::Error::Unimplemented`].
pub fn dominance_tournament<G>(_history: &[CoSummary<G>]) -> Result<Vec<usize>> {
    Err(crate::Error::Unimplemented("dominance tournament"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_coevolve_tags_and_stratifies() {
        let mut rng = SmallRng::seed_from_u64(51);
        let cfg = CoevolveConfig {
            evolve: EvolveConfig {
                n_gens: 5,
                ..EvolveConfig::default()
            },
            parasites: ParasiteSelection::TopN { n: 2 },
        };
        // A-genomes are positive, B-genomes negative; the duel rewards the
        // larger magnitude.
        let result = coevolve(
            vec![1i64, 2, 3],
            vec![-1i64, -2, -3],
            &cfg,
            &mut rng,
            |a, b| {
                let (a, b) = (*a as f64, -*b as f64);
                (a - b, b - a)
            },
            |popn, _| Ok(popn.to_vec()),
            |popn, _| Ok(popn.to_vec()),
            |_, _| {},
        )
        .unwrap();
        assert_eq!(result.history.len(), 5);
        let a_count = result
            .popn
            .iter()
            .filter(|i| i.subpop == Some(SubPop::A))
            .count();
        assert_eq!(a_count, 3);
        let last = result.history.last().unwrap();
        assert!(last.a.best.is_some());
        assert!(last.b.best.is_some());
        // Best A duels the top-2 B parasites {-3, -2}: mean of (3-3, 3-2).
        assert_eq!(last.a.max, 0.5);
    }

    #[test]
    fn test_parasite_selection_top_n() {
        let mut rng = SmallRng::seed_from_u64(52);
        let pool: Vec<Individual<u32>> = [0.2, 0.9, 0.5]
            .iter()
            .enumerate()
            .map(|(i, &f)| Individual {
                genome: i as u32,
                fitness: Some(f),
                subpop: Some(SubPop::B),
            })
            .collect();
        let picked = select_parasites(&pool, &[], &ParasiteSelection::TopN { n: 2 }, &mut rng);
        assert_eq!(picked, vec![1, 2]);
    }

    #[test]
    fn test_parasite_selection_includes_peak_champions() {
        let mut rng = SmallRng::seed_from_u64(53);
        let pool: Vec<Individual<u32>> = vec![Individual {
            genome: 7,
            fitness: Some(0.5),
            subpop: Some(SubPop::B),
        }];
        // Champion fitness series 1, 5, 2, 8: peaks at values 5 and 8.
        let champions: Vec<Individual<u32>> = [1.0, 5.0, 2.0, 8.0]
            .iter()
            .enumerate()
            .map(|(i, &f)| Individual {
                genome: 100 + i as u32,
                fitness: Some(f),
                subpop: Some(SubPop::B),
            })
            .collect();
        let picked = select_parasites(
            &pool,
            &champions,
            &ParasiteSelection::BestPlusPeaks { top_n: 1, peaks: 2 },
            &mut rng,
        );
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0], 7);
        assert!(picked[1..].contains(&101));
        assert!(picked[1..].contains(&103));
    }

    #[test]
    fn test_dominance_tournament_stub() {
        let history: Vec<CoSummary<u32>> = Vec::new();
        assert!(matches!(
            dominance_tournament(&history),
            Err(crate::Error::Unimplemented(_))
        ));
    }
}
