//! Santa-Fe-style ant trail: steer an ant around a toroidal 32×32 grid of
//! 89 food pellets within a 600-action budget.
//!
//! The evolved program maps `(food-ahead?, state-a, state-b)` to
//! `(action, state-a', state-b')`, where `action` has the subtype variants
//! `move`, `turn-left` and `turn-right`. Fitness is pellets eaten, plus
//! the unspent budget when the trail is cleared.

use crate::compile::Program;
use crate::error::Result;
use crate::evolve::{simple_evolve, EvolveConfig, Evolved, Individual, MapMode, Summary};
use crate::genome::icgp::IcgpGenome;
use crate::genome::{GenomeOptions, Genotype, InputSpec};
use crate::lang::{Language, OpSpec};
use crate::problems::RunConfig;
use crate::select::{negative_selection, NegativeSelection};
use crate::value::{Type, Value};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Action budget per evaluation.
pub const MAX_ACTIONS: usize = 600;

/// Grid edge length.
pub const GRID: usize = 32;

/// The trail; `#` is food. The ant starts at the top-left corner facing
/// east.
const TRAIL: [&str; GRID] = [
    ".###............................",
    "...#............................",
    "...#.....................###....",
    "...#....................#...#...",
    "...#....................#...#...",
    "...####.#####........##.........",
    "............#................#..",
    "............#................#..",
    "............#................#..",
    "............#................#..",
    "............#...............#...",
    "............#..............#....",
    "............#...#..........##...",
    "............#...#...............",
    "............#...#...............",
    "............#...#...............",
    "................#...............",
    "................#...............",
    "................#...............",
    "................#...............",
    "...........######...............",
    "...........#....................",
    "...........#....................",
    "...........#..........###.......",
    "...........#.........#...#......",
    "...........#.........#...#......",
    ".....................###.##.....",
    "..#.............................",
    "..#.............................",
    "..####...####.#.................",
    ".............##.................",
    ".............##.................",
];

/// The food layout of the trail.
#[derive(Debug, Clone)]
pub struct Trail {
    food: Vec<Vec<bool>>,
    total: usize,
}

impl Trail {
    /// Parse the built-in trail.
    #[must_use]
    pub fn santa_fe() -> Self {
        let food: Vec<Vec<bool>> = TRAIL
            .iter()
            .map(|row| row.bytes().map(|b| b == b'#').collect())
            .collect();
        let total = food.iter().flatten().filter(|&&f| f).count();
        Trail { food, total }
    }

    /// Total pellets on the trail.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }
}

/// The typed-basic vocabulary: action constants, a conditional per result
/// type, boolean glue, and integer state arithmetic.
#[must_use]
pub fn language() -> Language {
    let action = Type::tag("action");
    let b = Type::Bool;
    let i = Type::Int;
    let entries = vec![
        OpSpec::constant(Value::Tag("move".to_string()), Type::sub("move", "action")),
        OpSpec::constant(
            Value::Tag("turn-left".to_string()),
            Type::sub("turn-left", "action"),
        ),
        OpSpec::constant(
            Value::Tag("turn-right".to_string()),
            Type::sub("turn-right", "action"),
        ),
        OpSpec::func(
            "if",
            action.clone(),
            vec![b.clone(), action.clone(), action],
        ),
        OpSpec::func("if", i.clone(), vec![b.clone(), i.clone(), i.clone()]),
        OpSpec::func("and", b.clone(), vec![b.clone(), b.clone()]),
        OpSpec::func("or", b.clone(), vec![b.clone(), b.clone()]),
        OpSpec::func("not", b.clone(), vec![b.clone()]),
        OpSpec::func("add", i.clone(), vec![i.clone(), i.clone()]),
        OpSpec::func("sub", i.clone(), vec![i.clone(), i.clone()]),
        OpSpec::func("lt", b.clone(), vec![i.clone(), i.clone()]),
        OpSpec::func("eq", b, vec![i.clone(), i.clone()]),
        OpSpec::constant(Value::Int(0), i.clone()),
        OpSpec::constant(Value::Int(1), i),
    ];
    Language::new(entries).expect("built-in language is well-formed")
}

const DIRS: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn wrap(v: i64) -> usize {
    v.rem_euclid(GRID as i64) as usize
}

/// Run one ant on the trail and score it: pellets eaten plus, when the
/// trail is cleared, the unspent action budget.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn trail_fitness(program: &Program) -> f64 {
    let trail = Trail::santa_fe();
    let mut food = trail.food;
    let (mut x, mut y) = (0i64, 0i64);
    let mut dir = 0usize;
    let mut eaten = 0usize;
    let (mut state_a, mut state_b) = (0i64, 0i64);
    let mut actions = 0usize;

    while actions < MAX_ACTIONS && eaten < trail.total {
        let (dx, dy) = DIRS[dir];
        let (fx, fy) = (wrap(x + dx), wrap(y + dy));
        let ahead = food[fy][fx];
        let Ok(out) = program.run(&[
            Value::Bool(ahead),
            Value::Int(state_a),
            Value::Int(state_b),
        ]) else {
            break;
        };
        match &out[0] {
            Value::Tag(t) if t == "move" => {
                #[allow(clippy::cast_possible_wrap)]
                {
                    x = fx as i64;
                    y = fy as i64;
                }
                if food[fy][fx] {
                    food[fy][fx] = false;
                    eaten += 1;
                }
            }
            Value::Tag(t) if t == "turn-left" => dir = (dir + 3) % 4,
            Value::Tag(t) if t == "turn-right" => dir = (dir + 1) % 4,
            _ => {}
        }
        state_a = out[1].as_i64().unwrap_or(0);
        state_b = out[2].as_i64().unwrap_or(0);
        actions += 1;
    }
    eaten as f64
        + if eaten == trail.total {
            (MAX_ACTIONS - actions) as f64
        } else {
            0.0
        }
}

/// Build one random ant genome.
///
/// # Errors
///
/// As [`IcgpGenome::rand`].
pub fn rand_genome(rng: &mut SmallRng) -> Result<IcgpGenome> {
    IcgpGenome::rand(
        vec![
            InputSpec::new("food-ahead", Type::Bool),
            InputSpec::new("state-a", Type::Int),
            InputSpec::new("state-b", Type::Int),
        ],
        // Seed the action terminals so outputs always have candidates.
        vec![
            (Value::Tag("move".to_string()), Type::sub("move", "action")),
            (
                Value::Tag("turn-left".to_string()),
                Type::sub("turn-left", "action"),
            ),
            (
                Value::Tag("turn-right".to_string()),
                Type::sub("turn-right", "action"),
            ),
        ],
        vec![Type::tag("action"), Type::Int, Type::Int],
        language(),
        20,
        GenomeOptions {
            mut_rate: 0.1,
            target_size: 32,
            ..GenomeOptions::default()
        },
        rng,
    )
}

/// Evolve trail-followers with ICGP and negative selection.
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
            Ok(program) => trail_fitness(&program),
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
    fn test_trail_has_89_pellets() {
        assert_eq!(Trail::santa_fe().total(), 89);
    }

    #[test]
    fn test_language_well_formed() {
        let lang = language();
        assert!(!lang.is_homogeneous());
    }

    /// `if food-ahead then move else turn-right`, states passed through.
    fn greedy_genome() -> IcgpGenome {
        let mut genome = IcgpGenome::empty(
            vec![
                InputSpec::new("food-ahead", Type::Bool),
                InputSpec::new("state-a", Type::Int),
                InputSpec::new("state-b", Type::Int),
            ],
            Vec::new(),
            vec![Type::tag("action"), Type::Int, Type::Int],
            language(),
            GenomeOptions::default(),
        );
        let &[ahead, state_a, state_b] = genome.input_ids() else {
            panic!("three inputs expected")
        };
        let mv = genome
            .add_const(Value::Tag("move".to_string()), Type::sub("move", "action"))
            .unwrap();
        let right = genome
            .add_const(
                Value::Tag("turn-right".to_string()),
                Type::sub("turn-right", "action"),
            )
            .unwrap();
        let action = Type::tag("action");
        let choice = genome
            .add_func(
                "if",
                action.clone(),
                vec![Type::Bool, action.clone(), action],
                vec![ahead, mv, right],
            )
            .unwrap();
        genome.set_out_ref(0, choice).unwrap();
        genome.set_out_ref(1, state_a).unwrap();
        genome.set_out_ref(2, state_b).unwrap();
        genome
    }

    #[test]
    fn test_greedy_ant_eats_leading_food() {
        let mut genome = greedy_genome();
        let program = genome.program().unwrap();
        let fitness = trail_fitness(&program);
        // The greedy follower clears at least the contiguous opening runs.
        assert!(fitness >= 3.0, "fitness {fitness}");
    }

    #[test]
    fn test_spinner_eats_nothing() {
        let mut genome = greedy_genome();
        // Re-point the action output at the bare turn-right constant.
        let right = *genome
            .nodes()
            .iter()
            .find(|(_, n)| {
                matches!(&n.op, crate::genome::icgp::NodeOp::Const { value: Value::Tag(t) } if t == "turn-right")
            })
            .map(|(id, _)| id)
            .unwrap();
        genome.set_out_ref(0, right).unwrap();
        let program = genome.program().unwrap();
        assert_eq!(trail_fitness(&program), 0.0);
    }
}
