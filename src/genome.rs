//! Program-graph genomes.
//!
//! Three graph flavours share one abstract contract:
//!
//! - [`tree::TreeGenome`] — a nested expression per output,
//! - [`cgp::CgpGenome`] — a flat node vector with relative back-links,
//! - [`icgp::IcgpGenome`] — an immutable typed graph keyed by globally
//!   unique node ids, with absolute links.
//!
//! All three guarantee the same invariants after every variation operator:
//! acyclicity, arity agreement with the language, link type compatibility,
//! and reachable outputs. Variation is transactional; on internal failure
//! the genome is unchanged.

pub mod cgp;
pub mod icgp;
pub mod tree;

use crate::compile::Program;
use crate::error::Result;
use crate::value::{Type, Value};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Globally unique node id (ICGP). Monotonically increasing across the
/// process lifetime; never reused after removal.
pub type NodeId = u64;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Draw the next globally unique node id.
pub(crate) fn fresh_node_id() -> NodeId {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Reset the process-wide node-id counter. Only for single-threaded test
/// setups that need reproducible ids; resetting while genomes from the
/// previous epoch are alive breaks id uniqueness.
pub fn reset_node_id_counter() {
    NODE_ID_COUNTER.store(1, Ordering::SeqCst);
}

/// A declared genome input: display name and type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Display name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
}

impl InputSpec {
    /// Shorthand constructor.
    #[must_use]
    pub fn new(name: &str, ty: Type) -> Self {
        InputSpec {
            name: name.to_string(),
            ty,
        }
    }
}

/// Ephemeral-random-constant generator, kept as data so genomes stay
/// serialisable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ErcGen {
    /// Uniform real in `[lo, hi)`.
    UniformFloat {
        /// Inclusive lower bound.
        lo: f64,
        /// Exclusive upper bound.
        hi: f64,
    },
    /// Uniform integer in `[lo, hi]`.
    UniformInt {
        /// Inclusive lower bound.
        lo: i64,
        /// Inclusive upper bound.
        hi: i64,
    },
    /// Uniform pick from an explicit pool.
    Choice(Vec<(Value, Type)>),
}

impl Default for ErcGen {
    fn default() -> Self {
        ErcGen::UniformFloat { lo: 0.0, hi: 10.0 }
    }
}

impl ErcGen {
    /// Draw one constant.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> (Value, Type) {
        match self {
            ErcGen::UniformFloat { lo, hi } => {
                (Value::Float(rng.gen_range(*lo..*hi)), Type::Float)
            }
            ErcGen::UniformInt { lo, hi } => (Value::Int(rng.gen_range(*lo..=*hi)), Type::Int),
            ErcGen::Choice(pool) => {
                if pool.is_empty() {
                    (Value::Float(0.0), Type::Float)
                } else {
                    let (v, t) = &pool[rng.gen_range(0..pool.len())];
                    (v.clone(), t.clone())
                }
            }
        }
    }
}

/// Genome configuration shared by all flavours. Fields a flavour does not
/// use are ignored by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeOptions {
    /// Probability that a random node is an ERC.
    pub erc_prob: f64,
    /// The ERC generator.
    pub erc_gen: ErcGen,
    /// Per-gene (CGP) / per-node (ICGP) mutation rate.
    pub mut_rate: f64,
    /// ICGP: retire inactive nodes unused for more than this many ticks;
    /// zero disables atrophy.
    pub atrophy_steps: u64,
    /// Recompile even when the fingerprint is unchanged.
    pub force_recache: bool,
    /// Optional primitive-type hint; informs the default ERC draws.
    pub data_type: Option<Type>,
    /// Tree: maximum expression depth.
    pub max_expr_depth: usize,
    /// Tree: probability of stopping at a terminal during growth.
    pub terminal_prob: f64,
    /// ICGP: node-count target for neutral drift.
    pub target_size: usize,
    /// Evaluate with nil-contagion operators.
    pub nil_safe: bool,
}

impl Default for GenomeOptions {
    fn default() -> Self {
        GenomeOptions {
            erc_prob: 0.0,
            erc_gen: ErcGen::default(),
            mut_rate: 0.03,
            atrophy_steps: 200,
            force_recache: false,
            data_type: None,
            max_expr_depth: 8,
            terminal_prob: 0.5,
            target_size: 32,
            nil_safe: false,
        }
    }
}

impl GenomeOptions {
    /// Defaults with the ERC generator matched to a primitive-type hint.
    #[must_use]
    pub fn for_data_type(ty: Type) -> Self {
        let erc_gen = match ty {
            Type::Int => ErcGen::UniformInt { lo: 0, hi: 9 },
            _ => ErcGen::default(),
        };
        GenomeOptions {
            erc_gen,
            data_type: Some(ty),
            ..GenomeOptions::default()
        }
    }
}

/// The abstract contract the three genome flavours share.
pub trait Genotype: Clone {
    /// Node reference: an index (Tree, CGP) or a global id (ICGP).
    type Ref: Copy + Ord + fmt::Debug;

    /// Declared output types.
    fn out_types(&self) -> &[Type];

    /// References transitively reachable from the output refs. Runs in time
    /// proportional to the reachable subgraph; evaluates nothing.
    fn active_set(&self) -> BTreeSet<Self::Ref>;

    /// Refresh the compiled-program cache if the active structure changed.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Compile`] when the genome violates a type or arity
    /// invariant (defensive; unreachable through the variation operators).
    fn recache(&mut self) -> Result<()>;

    /// The compiled callable, memoised. Identity is stable while the active
    /// structure is unchanged.
    ///
    /// # Errors
    ///
    /// As [`Genotype::recache`].
    fn program(&mut self) -> Result<Arc<Program>>;

    /// One round of stochastic variation. Transactional: on internal
    /// failure the genome is unchanged.
    ///
    /// # Errors
    ///
    /// Only fatal errors escape; `NoTypedNode`-style link failures are
    /// absorbed as local no-ops.
    fn mutate<R: Rng>(&mut self, rng: &mut R) -> Result<()>;
}

/// Bounded retries for typed random selection before giving up with
/// `NoTypedNode`.
pub(crate) const RAND_NODE_TRIES: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_node_ids_monotonic() {
        let a = fresh_node_id();
        let b = fresh_node_id();
        assert!(b > a);
    }

    #[test]
    fn test_erc_gen_int_hint() {
        let mut rng = SmallRng::seed_from_u64(5);
        let opts = GenomeOptions::for_data_type(Type::Int);
        for _ in 0..20 {
            let (v, t) = opts.erc_gen.sample(&mut rng);
            assert_eq!(t, Type::Int);
            assert!(v.as_i64().unwrap() < 10);
        }
    }

    #[test]
    fn test_erc_gen_default_range() {
        let mut rng = SmallRng::seed_from_u64(5);
        let (v, t) = ErcGen::default().sample(&mut rng);
        assert_eq!(t, Type::Float);
        let x = v.as_f64().unwrap();
        assert!((0.0..10.0).contains(&x));
    }
}
