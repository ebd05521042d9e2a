//! End-to-end scenarios over the benchmark problems.
//!
//! Short deterministic smoke runs execute on every test pass; the
//! full-budget evolution scenarios are expensive and marked `#[ignore]`.
//! Run them with: cargo test --release -- --ignored

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use cambrian::genome::icgp::IcgpGenome;
use cambrian::genome::{GenomeOptions, Genotype, InputSpec};
use cambrian::problems::{ant, circle, duel, parity, RunConfig};
use cambrian::value::{Type, Value};

fn smoke_config() -> RunConfig {
    RunConfig {
        popn: 5,
        n_gens: 10,
        target: f64::INFINITY,
        seed: 7,
        progress_every: 5,
    }
}

#[test]
fn circle_smoke_runs_and_scores_in_range() {
    let result = circle::run(&smoke_config(), |_, _, _| {}).unwrap();
    assert_eq!(result.n_gens, 10);
    assert_eq!(result.history.len(), 10);
    for summary in &result.history {
        assert!((0.0..=1.0).contains(&summary.max));
        assert!(summary.min <= summary.median && summary.median <= summary.max);
    }
}

#[test]
fn parity_smoke_runs() {
    let result = parity::run(3, &smoke_config(), |_, _, _| {}).unwrap();
    assert_eq!(result.history.len(), 10);
    for summary in &result.history {
        assert!((0.0..=1.0).contains(&summary.max));
    }
}

#[test]
fn ant_smoke_runs() {
    let result = ant::run(&smoke_config(), |_, _, _| {}).unwrap();
    assert_eq!(result.history.len(), 10);
    for summary in &result.history {
        assert!(summary.max >= 0.0);
    }
}

#[test]
fn duel_smoke_runs() {
    let cfg = RunConfig {
        popn: 6,
        n_gens: 4,
        ..smoke_config()
    };
    let result = duel::run(&cfg, |_, _| {}).unwrap();
    assert_eq!(result.history.len(), 4);
    let last = result.history.last().unwrap();
    assert!(last.a.best.is_some());
    assert!(last.b.best.is_some());
    // The duel is zero-sum per pairing, so both maxima stay within scale.
    assert!(last.a.max.abs() <= 48.0);
    assert!(last.b.max.abs() <= 48.0);
}

/// A hand-built even-3-parity solution scores a perfect 1.0:
/// `even(i0,i1,i2) = not(xor(xor(i0,i1),i2))` with
/// `xor(a,b) = and(or(a,b), nand(a,b))` and `not(x) = nand(x,x)`.
#[test]
fn hand_built_even3_parity_is_perfect() {
    let b = Type::Bool;
    let bin = vec![b.clone(), b.clone()];
    let mut genome = IcgpGenome::empty(
        (0..3)
            .map(|i| InputSpec::new(&format!("i{i}"), Type::Bool))
            .collect(),
        Vec::new(),
        vec![Type::Bool],
        parity::language(),
        GenomeOptions::default(),
    );
    let &[i0, i1, i2] = genome.input_ids() else {
        panic!("three inputs expected")
    };
    let mut xor = |genome: &mut IcgpGenome, a, b_id| {
        let or = genome
            .add_func("or", b.clone(), bin.clone(), vec![a, b_id])
            .unwrap();
        let nand = genome
            .add_func("nand", b.clone(), bin.clone(), vec![a, b_id])
            .unwrap();
        genome
            .add_func("and", b.clone(), bin.clone(), vec![or, nand])
            .unwrap()
    };
    let x01 = xor(&mut genome, i0, i1);
    let x012 = xor(&mut genome, x01, i2);
    let even = genome
        .add_func("nand", b.clone(), bin, vec![x012, x012])
        .unwrap();
    genome.set_out_ref(0, even).unwrap();

    let program = genome.program().unwrap();
    assert_eq!(parity::parity_fitness(&program, 3), 1.0);
}

/// Scenario: circle classification reaches fitness 0.8 within 1000
/// generations of population 5 (ICGP + negative selection, elitism 1).
#[test]
#[ignore = "full evolution budget; run with --ignored"]
fn circle_reaches_080_within_budget() {
    let cfg = RunConfig {
        popn: 5,
        n_gens: 1000,
        target: 0.8,
        seed: 42,
        progress_every: 100,
    };
    let result = circle::run(&cfg, |_, _, _| {}).unwrap();
    let best = result
        .history
        .iter()
        .map(|s| s.max)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(best >= 0.8, "best fitness {best}");
}

/// Scenario: even-3-parity solves exactly within 3000 generations of
/// population 5.
#[test]
#[ignore = "full evolution budget; run with --ignored"]
fn even3_parity_solves_within_budget() {
    let cfg = RunConfig {
        popn: 5,
        n_gens: 3000,
        target: 1.0,
        seed: 42,
        progress_every: 500,
    };
    let result = parity::run(3, &cfg, |_, _, _| {}).unwrap();
    let best = result
        .history
        .iter()
        .map(|s| s.max)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!((best - 1.0).abs() < 1e-9, "best fitness {best}");
}

/// Scenario: even-k-parity for k in {4, 5} reaches 0.75.
#[test]
#[ignore = "full evolution budget; run with --ignored"]
fn even45_parity_reaches_075_within_budget() {
    for k in [4usize, 5] {
        let cfg = RunConfig {
            popn: 5,
            n_gens: 3000,
            target: 0.75,
            seed: 42,
            progress_every: 500,
        };
        let result = parity::run(k, &cfg, |_, _, _| {}).unwrap();
        let best = result
            .history
            .iter()
            .map(|s| s.max)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(best >= 0.75, "even-{k}: best fitness {best}");
    }
}

/// Scenario: the ant eats 60 of the 89 pellets within 2000 generations of
/// population 5.
#[test]
#[ignore = "full evolution budget; run with --ignored"]
fn ant_eats_60_within_budget() {
    let cfg = RunConfig {
        popn: 5,
        n_gens: 2000,
        target: 60.0,
        seed: 42,
        progress_every: 200,
    };
    let result = ant::run(&cfg, |_, _, _| {}).unwrap();
    let best = result
        .history
        .iter()
        .map(|s| s.max)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(best >= 60.0, "best fitness {best}");
}

/// Scenario: within 100 generations of two populations of 30, one side of
/// the randomness duel reaches |fitness| >= 8.
#[test]
#[ignore = "full evolution budget; run with --ignored"]
fn duel_one_side_reaches_8_within_budget() {
    let cfg = RunConfig {
        popn: 30,
        n_gens: 100,
        target: 8.0,
        seed: 42,
        progress_every: 10,
    };
    let result = duel::run(&cfg, |_, _| {}).unwrap();
    let best = result
        .history
        .iter()
        .flat_map(|s| [s.a.max, s.b.max])
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(best >= 8.0, "best |fitness| {best}");
}

/// A genome evaluated twice under the same seed gives identical results;
/// the whole pipeline is deterministic.
#[test]
fn runs_are_reproducible() {
    let cfg = smoke_config();
    let a = circle::run(&cfg, |_, _, _| {}).unwrap();
    let b = circle::run(&cfg, |_, _, _| {}).unwrap();
    let maxes = |r: &cambrian::Evolved<IcgpGenome, cambrian::evolve::Summary<IcgpGenome>>| {
        r.history.iter().map(|s| s.max).collect::<Vec<_>>()
    };
    assert_eq!(maxes(&a), maxes(&b));
}

/// Boundary: a program dividing by zero still evaluates (protected ops).
#[test]
fn protected_division_in_evolved_context() {
    let f = Type::Float;
    let mut genome = IcgpGenome::empty(
        vec![InputSpec::new("x", Type::Float)],
        vec![(Value::Float(0.0), Type::Float)],
        vec![Type::Float],
        circle::language(),
        GenomeOptions::default(),
    );
    let &[x] = genome.input_ids() else {
        panic!("one input expected")
    };
    let zero = genome.constant_ids()[0];
    let div = genome
        .add_func("div", f.clone(), vec![f.clone(), f], vec![x, zero])
        .unwrap();
    genome.set_out_ref(0, div).unwrap();
    let program = genome.program().unwrap();
    let out = program.run1(&[Value::Float(123.0)]).unwrap();
    assert_eq!(out, Value::Float(1.0));
}
