//! Callable-identity tests: the compiled program is cached in the genome
//! and its identity only changes when the active structure does.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use cambrian::genome::icgp::IcgpGenome;
use cambrian::genome::{GenomeOptions, Genotype, InputSpec};
use cambrian::lang::Language;
use cambrian::value::{Type, Value};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;

fn built_genome() -> IcgpGenome {
    let mut genome = IcgpGenome::empty(
        vec![
            InputSpec::new("x", Type::Float),
            InputSpec::new("y", Type::Float),
        ],
        vec![(Value::Float(2.0), Type::Float)],
        vec![Type::Float],
        Language::float_arithmetic(),
        GenomeOptions::default(),
    );
    let &[x, y] = genome.input_ids() else {
        panic!("two inputs expected")
    };
    let f = Type::Float;
    let sum = genome
        .add_func("add", f.clone(), vec![f.clone(), f.clone()], vec![x, y])
        .unwrap();
    genome.set_out_ref(0, sum).unwrap();
    genome
}

#[test]
fn compile_twice_returns_identical_callable() {
    let mut genome = built_genome();
    let first = genome.program().unwrap();
    let second = genome.program().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn inactive_changes_keep_callable_identity() {
    let mut rng = SmallRng::seed_from_u64(91);
    let mut genome = built_genome();
    let before = genome.program().unwrap();

    // Grow neutral material; none of it is reachable from the output.
    for _ in 0..10 {
        genome.add_rand_node(&mut rng).unwrap();
    }
    genome.recache().unwrap();
    let after = genome.program().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(
        before.run(&[Value::Float(1.0), Value::Float(2.0)]).unwrap(),
        vec![Value::Float(3.0)]
    );
}

#[test]
fn active_change_replaces_callable_and_fingerprint() {
    let mut rng = SmallRng::seed_from_u64(92);
    let mut genome = built_genome();
    let before = genome.program().unwrap();

    // Exchange the active add node for one with swapped semantics.
    let &[x, y] = genome.input_ids() else {
        panic!("two inputs expected")
    };
    let out = genome.out_refs()[0];
    let f = Type::Float;
    let replacement_id = genome
        .add_func("sub", f.clone(), vec![f.clone(), f], vec![x, y])
        .unwrap();
    let replacement = genome.nodes()[&replacement_id].clone();
    genome.exchange_node(out, replacement, &mut rng).unwrap();
    genome.recache().unwrap();

    let after = genome.program().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_ne!(before.fingerprint(), after.fingerprint());
    assert_eq!(
        after.run(&[Value::Float(5.0), Value::Float(2.0)]).unwrap(),
        vec![Value::Float(3.0)]
    );
}

#[test]
fn force_recache_rebuilds_identity() {
    let mut genome = built_genome();
    let before = genome.program().unwrap();
    let mut forced = genome.clone();
    // A cloned genome shares the cached Arc until told otherwise.
    let shared = forced.program().unwrap();
    assert!(Arc::ptr_eq(&before, &shared));

    let mut opts = forced.options().clone();
    opts.force_recache = true;
    let rebuilt = {
        let mut g = IcgpGenome::empty(
            vec![
                InputSpec::new("x", Type::Float),
                InputSpec::new("y", Type::Float),
            ],
            Vec::new(),
            vec![Type::Float],
            Language::float_arithmetic(),
            opts,
        );
        let &[x, y] = g.input_ids() else {
            panic!("two inputs expected")
        };
        let f = Type::Float;
        let sum = g
            .add_func("add", f.clone(), vec![f.clone(), f], vec![x, y])
            .unwrap();
        g.set_out_ref(0, sum).unwrap();
        let first = g.program().unwrap();
        let second = g.program().unwrap();
        !Arc::ptr_eq(&first, &second)
    };
    assert!(rebuilt);
}

#[test]
fn mutation_sequence_without_active_change_keeps_identity() {
    let mut rng = SmallRng::seed_from_u64(93);
    let mut genome = built_genome();
    // Neutral material to give mutation something inactive to chew on.
    for _ in 0..8 {
        genome.add_rand_node(&mut rng).unwrap();
    }
    let before = genome.program().unwrap();
    let out_refs_before = genome.out_refs().to_vec();

    for _ in 0..50 {
        genome.mutate(&mut rng).unwrap();
        if genome.out_refs() != out_refs_before.as_slice() {
            // Active structure changed; identity must change with it.
            let after = genome.program().unwrap();
            assert!(!Arc::ptr_eq(&before, &after));
            return;
        }
        // Active structure untouched: same callable, bit for bit.
        let after = genome.program().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }
}
