// Allow unwrap in tests (test code is not production)
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Cambrian: genetic programming over typed program graphs.
//!
//! Evolved programs are directed acyclic computation graphs in one of three
//! flavours - nested trees, Cartesian graphs with relative back-links, and
//! immutable typed Cartesian graphs with globally unique node ids. A
//! discrete-generation driver iterates populations of such graphs under
//! stochastic variation and selection until a target fitness is reached or
//! the generation budget is spent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   evolve / coevolve drivers         │
//! ├─────────────────────────────────────┤
//! │  selection │ mutation │ crossover   │
//! ├─────────────────────────────────────┤
//! │   genomes: tree │ cgp │ icgp        │
//! ├─────────────────────────────────────┤
//! │   active set → straight-line code   │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use cambrian::evolve::{simple_evolve, EvolveConfig, Individual, MapMode};
//! use cambrian::genome::cgp::CgpGenome;
//! use cambrian::genome::{GenomeOptions, Genotype, InputSpec};
//! use cambrian::lang::Language;
//! use cambrian::select::{tournament, Tournament};
//! use cambrian::value::{Type, Value};
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let mut rng = SmallRng::seed_from_u64(42);
//! let init: Vec<Individual<CgpGenome>> = (0..5)
//!     .map(|_| {
//!         CgpGenome::rand(
//!             vec![InputSpec::new("a", Type::Bool), InputSpec::new("b", Type::Bool)],
//!             Vec::new(),
//!             vec![Type::Bool],
//!             Language::boolean_logic(),
//!             10,
//!             GenomeOptions::default(),
//!             &mut rng,
//!         )
//!         .map(Individual::new)
//!     })
//!     .collect::<cambrian::Result<_>>()
//!     .unwrap();
//!
//! // Reward programs that compute XOR.
//! let result = simple_evolve(
//!     init,
//!     &EvolveConfig { n_gens: 5, ..EvolveConfig::default() },
//!     MapMode::Sequential,
//!     |genome: &mut CgpGenome| {
//!         let Ok(program) = genome.program() else { return 0.0 };
//!         let mut score = 0.0;
//!         for (a, b) in [(false, false), (false, true), (true, false), (true, true)] {
//!             let out = program.run1(&[Value::Bool(a), Value::Bool(b)]).unwrap();
//!             if out == Value::Bool(a ^ b) {
//!                 score += 0.25;
//!             }
//!         }
//!         score
//!     },
//!     |popn| {
//!         Ok(tournament(popn, &Tournament::default(), &mut rng,
//!             |a, _b, _rng| a.clone(),
//!             |mut g, rng| { let _ = g.mutate(rng); g }))
//!     },
//!     |_gen, _popn, _history| {},
//! )
//! .unwrap();
//! assert_eq!(result.history.len(), 5);
//! ```

pub mod coevolve;
pub mod compile;
pub mod dot;
pub mod error;
pub mod evolve;
pub mod genome;
pub mod lang;
pub mod ops;
pub mod problems;
pub mod select;
pub mod series;
pub mod snapshot;
pub mod value;

pub use error::{Error, Result};

// Re-export key types at crate root for convenience
pub use compile::Program;
pub use evolve::{evolve_discrete, simple_evolve, EvolveConfig, Evolved, Individual};
pub use genome::{Genotype, GenomeOptions, InputSpec};
pub use lang::{Language, OpSpec};
pub use value::{Type, Value};
