//! Regeneration policies: selection plus variation, producing the next
//! population from an evaluated one.
//!
//! Each policy takes the variation operators as closures (`crossover`
//! combining two genomes, `mutate` transforming one), so any genome
//! flavour plugs in. Ties are broken by shuffling before a stable sort so
//! neutral mutations drift instead of freezing.

use crate::evolve::Individual;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Negative selection: keep the top `select_n`, preserve `elitism`
/// champions unchanged, and refill by breeding random pairs from the
/// selected pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeSelection {
    /// Pool size that survives selection.
    pub select_n: usize,
    /// Champions copied through unchanged.
    pub elitism: usize,
}

impl Default for NegativeSelection {
    fn default() -> Self {
        NegativeSelection {
            select_n: 3,
            elitism: 1,
        }
    }
}

/// Tournament regeneration: `n - elitism` tournaments of `size` random
/// contestants; the best two of each breed one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    /// Contestants per tournament.
    pub size: usize,
    /// Champions copied through unchanged.
    pub elitism: usize,
}

impl Default for Tournament {
    fn default() -> Self {
        Tournament {
            size: 3,
            elitism: 1,
        }
    }
}

/// Fully-mixed regeneration: a deterministic proportional split between
/// elitism, mutation-only offspring, and crossover offspring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FullyMixed {
    /// Fraction of non-elite offspring produced by mutation alone.
    pub mutation_prob: f64,
    /// Champions copied through unchanged.
    pub elitism: usize,
}

impl Default for FullyMixed {
    fn default() -> Self {
        FullyMixed {
            mutation_prob: 0.5,
            elitism: 1,
        }
    }
}

/// Indices sorted by descending fitness, ties shuffled.
fn ranked<G, R: Rng>(popn: &[Individual<G>], rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..popn.len()).collect();
    order.shuffle(rng);
    order.sort_by(|&a, &b| {
        popn[b]
            .fitness_or_zero()
            .partial_cmp(&popn[a].fitness_or_zero())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

fn offspring<G>(genome: G, like: &Individual<G>) -> Individual<G> {
    Individual {
        genome,
        fitness: None,
        subpop: like.subpop,
    }
}

/// Apply negative selection. See [`NegativeSelection`].
pub fn negative_selection<G: Clone, R: Rng>(
    popn: &[Individual<G>],
    cfg: &NegativeSelection,
    rng: &mut R,
    mut crossover: impl FnMut(&G, &G, &mut R) -> G,
    mut mutate: impl FnMut(G, &mut R) -> G,
) -> Vec<Individual<G>> {
    if popn.is_empty() {
        return Vec::new();
    }
    let order = ranked(popn, rng);
    let pool: Vec<usize> = order.iter().copied().take(cfg.select_n.max(1)).collect();
    let mut next = Vec::with_capacity(popn.len());
    for &i in order.iter().take(cfg.elitism.min(popn.len())) {
        next.push(popn[i].clone());
    }
    while next.len() < popn.len() {
        let a = pool[rng.gen_range(0..pool.len())];
        let b = pool[rng.gen_range(0..pool.len())];
        let bred = crossover(&popn[a].genome, &popn[b].genome, rng);
        next.push(offspring(mutate(bred, rng), &popn[a]));
    }
    next
}

/// Apply tournament regeneration. See [`Tournament`].
pub fn tournament<G: Clone, R: Rng>(
    popn: &[Individual<G>],
    cfg: &Tournament,
    rng: &mut R,
    mut crossover: impl FnMut(&G, &G, &mut R) -> G,
    mut mutate: impl FnMut(G, &mut R) -> G,
) -> Vec<Individual<G>> {
    if popn.is_empty() {
        return Vec::new();
    }
    let order = ranked(popn, rng);
    let mut next = Vec::with_capacity(popn.len());
    for &i in order.iter().take(cfg.elitism.min(popn.len())) {
        next.push(popn[i].clone());
    }
    while next.len() < popn.len() {
        let mut contestants: Vec<usize> = (0..cfg.size.max(2))
            .map(|_| rng.gen_range(0..popn.len()))
            .collect();
        contestants.shuffle(rng);
        contestants.sort_by(|&a, &b| {
            popn[b]
                .fitness_or_zero()
                .partial_cmp(&popn[a].fitness_or_zero())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let (a, b) = (contestants[0], contestants[1]);
        let bred = crossover(&popn[a].genome, &popn[b].genome, rng);
        next.push(offspring(mutate(bred, rng), &popn[a]));
    }
    next
}

/// Apply fully-mixed regeneration. See [`FullyMixed`].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fully_mixed<G: Clone, R: Rng>(
    popn: &[Individual<G>],
    cfg: &FullyMixed,
    rng: &mut R,
    mut crossover: impl FnMut(&G, &G, &mut R) -> G,
    mut mutate: impl FnMut(G, &mut R) -> G,
) -> Vec<Individual<G>> {
    if popn.is_empty() {
        return Vec::new();
    }
    let order = ranked(popn, rng);
    let elite = cfg.elitism.min(popn.len());
    let rest = popn.len() - elite;
    let n_mutation = (cfg.mutation_prob.clamp(0.0, 1.0) * rest as f64).round() as usize;
    let n_crossover = rest - n_mutation.min(rest);

    let mut next = Vec::with_capacity(popn.len());
    for &i in order.iter().take(elite) {
        next.push(popn[i].clone());
    }
    for k in 0..n_mutation.min(rest) {
        let parent = &popn[order[k % popn.len()]];
        next.push(offspring(mutate(parent.genome.clone(), rng), parent));
    }
    for k in 0..n_crossover {
        let a = &popn[order[k % popn.len()]];
        let b = &popn[order[(k + 1) % popn.len()]];
        next.push(offspring(crossover(&a.genome, &b.genome, rng), a));
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn scored(fitness: &[f64]) -> Vec<Individual<u32>> {
        fitness
            .iter()
            .enumerate()
            .map(|(i, &f)| Individual {
                genome: i as u32,
                fitness: Some(f),
                subpop: None,
            })
            .collect()
    }

    fn keep_first(a: &u32, _b: &u32, _rng: &mut SmallRng) -> u32 {
        *a
    }

    fn bump(g: u32, _rng: &mut SmallRng) -> u32 {
        g + 100
    }

    #[test]
    fn test_negative_selection_preserves_elite() {
        let mut rng = SmallRng::seed_from_u64(41);
        let popn = scored(&[0.1, 0.9, 0.4, 0.2, 0.6]);
        let next = negative_selection(
            &popn,
            &NegativeSelection {
                select_n: 2,
                elitism: 1,
            },
            &mut rng,
            keep_first,
            bump,
        );
        assert_eq!(next.len(), popn.len());
        // Champion (genome 1) survives unchanged with its fitness tag.
        assert_eq!(next[0].genome, 1);
        assert_eq!(next[0].fitness, Some(0.9));
        // Offspring descend from the top-2 pool {1, 4} and are untagged.
        for child in &next[1..] {
            assert!(child.genome == 101 || child.genome == 104);
            assert!(child.fitness.is_none());
        }
    }

    #[test]
    fn test_tournament_fills_population() {
        let mut rng = SmallRng::seed_from_u64(42);
        let popn = scored(&[0.5, 0.1, 0.8, 0.3]);
        let next = tournament(
            &popn,
            &Tournament {
                size: 2,
                elitism: 2,
            },
            &mut rng,
            keep_first,
            bump,
        );
        assert_eq!(next.len(), 4);
        assert_eq!(next[0].genome, 2);
        assert_eq!(next[1].genome, 0);
    }

    #[test]
    fn test_fully_mixed_split() {
        let mut rng = SmallRng::seed_from_u64(43);
        let popn = scored(&[0.4, 0.2, 0.9, 0.1, 0.5, 0.3]);
        let next = fully_mixed(
            &popn,
            &FullyMixed {
                mutation_prob: 0.6,
                elitism: 1,
            },
            &mut rng,
            keep_first,
            bump,
        );
        assert_eq!(next.len(), 6);
        // 1 elite, round(0.6 * 5) = 3 mutants, 2 crossover children.
        assert_eq!(next[0].genome, 2);
        let mutants = next.iter().filter(|i| i.genome >= 100).count();
        assert_eq!(mutants, 3);
    }

    #[test]
    fn test_empty_population() {
        let mut rng = SmallRng::seed_from_u64(44);
        let popn: Vec<Individual<u32>> = Vec::new();
        assert!(negative_selection(
            &popn,
            &NegativeSelection::default(),
            &mut rng,
            keep_first,
            bump
        )
        .is_empty());
    }
}
