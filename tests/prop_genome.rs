//! Property-based tests for genome invariants.
//!
//! After any sequence of variation operators, every genome must stay
//! acyclic, arity-correct, link-type-compatible, and output-reachable.
//! Run with: cargo test --release prop_genome

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use proptest::prelude::*;

use cambrian::genome::cgp::{CgpGenome, CgpNode};
use cambrian::genome::icgp::{IcgpGenome, NodeOp};
use cambrian::genome::tree::TreeGenome;
use cambrian::genome::{GenomeOptions, Genotype, InputSpec};
use cambrian::lang::Language;
use cambrian::value::{Type, Value};
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn icgp_invariants(genome: &IcgpGenome) {
    for (&id, node) in genome.nodes() {
        if let NodeOp::Func {
            arg_types, links, ..
        } = &node.op
        {
            assert_eq!(arg_types.len(), links.len(), "arity drift on node {id}");
            for (&link, arg_ty) in links.iter().zip(arg_types) {
                assert!(link < id, "link {link} does not precede node {id}");
                let target = genome.nodes().get(&link).expect("dangling link");
                assert!(
                    target.ty.is_subtype_of(arg_ty),
                    "node {link}: {} not a subtype of {arg_ty}",
                    target.ty
                );
            }
        }
    }
    let active = genome.active_set();
    for id in &active {
        assert!(genome.nodes().contains_key(id), "active ref {id} missing");
    }
    for (&r, ty) in genome.out_refs().iter().zip(genome.out_types()) {
        assert!(active.contains(&r), "output ref {r} not active");
        assert!(genome.nodes()[&r].ty.is_subtype_of(ty));
    }
}

fn cgp_invariants(genome: &CgpGenome) {
    for (i, node) in genome.nodes().iter().enumerate() {
        if let CgpNode::Func {
            arg_types, links, ..
        } = node
        {
            assert_eq!(arg_types.len(), links.len());
            for (&off, arg_ty) in links.iter().zip(arg_types) {
                assert!(off >= 1 && off <= i, "offset {off} invalid at index {i}");
                assert!(genome.nodes()[i - off].ty().is_subtype_of(arg_ty));
            }
        }
    }
    let active = genome.active_set();
    for (&r, ty) in genome.out_refs().iter().zip(genome.out_types()) {
        assert!(active.contains(&r));
        assert!(genome.nodes()[r].ty().is_subtype_of(ty));
    }
}

fn ant_language() -> Language {
    cambrian::problems::ant::language()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// ICGP invariants survive arbitrary mutation sequences over a
    /// heterogeneously typed language.
    #[test]
    fn prop_icgp_mutation_invariants(seed in any::<u64>(), rounds in 1usize..30) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut genome = IcgpGenome::rand(
            vec![
                InputSpec::new("food-ahead", Type::Bool),
                InputSpec::new("state-a", Type::Int),
                InputSpec::new("state-b", Type::Int),
            ],
            vec![
                (Value::Int(7), Type::Int),
                (Value::Tag("move".to_string()), Type::sub("move", "action")),
                (
                    Value::Tag("turn-left".to_string()),
                    Type::sub("turn-left", "action"),
                ),
            ],
            vec![Type::tag("action"), Type::Int, Type::Int],
            ant_language(),
            18,
            GenomeOptions { mut_rate: 0.2, ..GenomeOptions::default() },
            &mut rng,
        ).unwrap();
        for _ in 0..rounds {
            genome.mutate(&mut rng).unwrap();
            icgp_invariants(&genome);
        }
        // The genome still compiles and runs after every round.
        let program = genome.program().unwrap();
        let out = program.run(&[Value::Bool(true), Value::Int(0), Value::Int(1)]).unwrap();
        prop_assert_eq!(out.len(), 3);
    }

    /// Neutral drift and ticking never break invariants or behaviour.
    #[test]
    fn prop_icgp_neutral_ops_invariants(seed in any::<u64>(), rounds in 1usize..40) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut genome = IcgpGenome::rand(
            vec![InputSpec::new("x", Type::Float), InputSpec::new("y", Type::Float)],
            Vec::new(),
            vec![Type::Float],
            Language::float_arithmetic(),
            12,
            GenomeOptions { target_size: 16, atrophy_steps: 5, ..GenomeOptions::default() },
            &mut rng,
        ).unwrap();
        let args = [Value::Float(1.5), Value::Float(-0.5)];
        let before = genome.program().unwrap().run(&args).unwrap();
        for _ in 0..rounds {
            genome.vary_neutral(&mut rng).unwrap();
            genome.tick();
            icgp_invariants(&genome);
        }
        let after = genome.program().unwrap().run(&args).unwrap();
        prop_assert_eq!(before, after);
    }

    /// CGP invariants survive mutation.
    #[test]
    fn prop_cgp_mutation_invariants(seed in any::<u64>(), rounds in 1usize..30) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut genome = CgpGenome::rand(
            (0..3).map(|i| InputSpec::new(&format!("i{i}"), Type::Bool)).collect(),
            Vec::new(),
            vec![Type::Bool],
            Language::boolean_logic(),
            16,
            GenomeOptions { mut_rate: 0.15, ..GenomeOptions::default() },
            &mut rng,
        ).unwrap();
        for _ in 0..rounds {
            genome.mutate(&mut rng).unwrap();
            cgp_invariants(&genome);
        }
        let program = genome.program().unwrap();
        let out = program.run1(&[Value::Bool(false), Value::Bool(true), Value::Bool(true)]).unwrap();
        prop_assert!(matches!(out, Value::Bool(_)));
    }

    /// Tree depth stays bounded through mutation and crossover.
    #[test]
    fn prop_tree_depth_bounded(seed in any::<u64>(), rounds in 1usize..20) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let opts = GenomeOptions { mut_rate: 0.5, ..GenomeOptions::default() };
        let inputs = vec![
            InputSpec::new("x", Type::Float),
            InputSpec::new("y", Type::Float),
        ];
        let mut a = TreeGenome::rand(
            inputs.clone(), Vec::new(), vec![Type::Float],
            Language::float_arithmetic(), opts.clone(), &mut rng,
        ).unwrap();
        let mut b = TreeGenome::rand(
            inputs, Vec::new(), vec![Type::Float],
            Language::float_arithmetic(), opts.clone(), &mut rng,
        ).unwrap();
        for _ in 0..rounds {
            a.mutate(&mut rng).unwrap();
            let (ca, cb) = TreeGenome::crossover(&a, &b, &mut rng).unwrap();
            a = ca;
            b = cb;
            for genome in [&a, &b] {
                for expr in genome.exprs() {
                    prop_assert!(expr.depth() <= opts.max_expr_depth);
                }
            }
        }
    }

    /// Evaluation is deterministic: the same genome and inputs always
    /// produce the same outputs.
    #[test]
    fn prop_eval_deterministic(seed in any::<u64>(), x in -100.0f64..100.0, y in -100.0f64..100.0) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut genome = IcgpGenome::rand(
            vec![InputSpec::new("x", Type::Float), InputSpec::new("y", Type::Float)],
            Vec::new(),
            vec![Type::Float],
            Language::float_arithmetic(),
            12,
            GenomeOptions::default(),
            &mut rng,
        ).unwrap();
        let program = genome.program().unwrap();
        let args = [Value::Float(x), Value::Float(y)];
        let first = program.run(&args).unwrap();
        let second = program.run(&args).unwrap();
        prop_assert_eq!(first, second);
    }
}
