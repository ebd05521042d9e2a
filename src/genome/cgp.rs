//! Cartesian genetic programming: a flat node vector with relative
//! back-links.
//!
//! Node `i` stores each input link as a positive back-offset, so link
//! targets are always strictly earlier and the graph is acyclic by
//! construction. Back-link selection is untyped (uniform over earlier
//! indices), which is only sound when every type in the language is the
//! same; construction therefore rejects heterogeneous languages.

use crate::compile::{Cache, Program, Step};
use crate::error::{Error, Result};
use crate::genome::{Genotype, GenomeOptions, InputSpec, RAND_NODE_TRIES};
use crate::lang::{Language, OpSpec};
use crate::ops::Op;
use crate::value::{Type, Value};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// One CGP node. Function links are back-offsets (≥ 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CgpNode {
    /// A declared genome input.
    Input {
        /// Display name.
        name: String,
        /// Declared type.
        ty: Type,
    },
    /// A seeded or language constant.
    Const {
        /// The constant.
        value: Value,
        /// Its type.
        ty: Type,
    },
    /// An ephemeral random constant.
    Erc {
        /// The drawn constant.
        value: Value,
        /// Its type.
        ty: Type,
    },
    /// A function application.
    Func {
        /// Operator symbol.
        op: String,
        /// Return type.
        ret: Type,
        /// Expected argument types, copied from the language at birth.
        arg_types: Vec<Type>,
        /// Back-offsets to argument nodes; `links[k] = i - j` for node `i`
        /// reading node `j`.
        links: Vec<usize>,
    },
}

impl CgpNode {
    /// The type this node produces.
    #[must_use]
    pub fn ty(&self) -> &Type {
        match self {
            CgpNode::Input { ty, .. }
            | CgpNode::Const { ty, .. }
            | CgpNode::Erc { ty, .. } => ty,
            CgpNode::Func { ret, .. } => ret,
        }
    }

    /// Whether this is an input node.
    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(self, CgpNode::Input { .. })
    }
}

/// A CGP genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgpGenome {
    inputs: Vec<InputSpec>,
    nodes: Vec<CgpNode>,
    /// Indices below this are seeded inputs/constants, never mutated.
    n_fixed: usize,
    out_refs: Vec<usize>,
    out_types: Vec<Type>,
    lang: Language,
    opts: GenomeOptions,
    #[serde(skip)]
    cache: Cache,
}

impl PartialEq for CgpGenome {
    fn eq(&self, other: &Self) -> bool {
        self.inputs == other.inputs
            && self.nodes == other.nodes
            && self.n_fixed == other.n_fixed
            && self.out_refs == other.out_refs
            && self.out_types == other.out_types
            && self.lang == other.lang
            && self.opts == other.opts
    }
}

impl CgpGenome {
    /// Seed a genome with inputs and constants, grow it to `initial_size`
    /// random nodes, and initialise outputs by typed random selection.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLanguage`] for a heterogeneous language,
    /// [`Error::NoCompatibleOutput`] when an output type has no candidate
    /// node, [`Error::NoTypedNode`] when random nodes cannot be linked.
    pub fn rand<R: Rng>(
        inputs: Vec<InputSpec>,
        constants: Vec<(Value, Type)>,
        out_types: Vec<Type>,
        lang: Language,
        initial_size: usize,
        opts: GenomeOptions,
        rng: &mut R,
    ) -> Result<Self> {
        let mut genome = Self::empty(inputs, constants, out_types, lang, opts)?;
        while genome.nodes.len() < initial_size.max(genome.n_fixed) {
            let node = genome.rand_node(genome.nodes.len(), rng)?;
            genome.nodes.push(node);
        }
        genome.init_out_refs(rng)?;
        Ok(genome)
    }

    /// Like [`CgpGenome::rand`] without the random nodes. The genome is not
    /// executable until [`CgpGenome::init_out_refs`] succeeds.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidLanguage`] for a heterogeneous language.
    pub fn empty(
        inputs: Vec<InputSpec>,
        constants: Vec<(Value, Type)>,
        out_types: Vec<Type>,
        lang: Language,
        opts: GenomeOptions,
    ) -> Result<Self> {
        if !lang.is_homogeneous() {
            return Err(Error::InvalidLanguage(
                "cgp requires a single-typed language".to_string(),
            ));
        }
        let mut nodes: Vec<CgpNode> = inputs
            .iter()
            .map(|spec| CgpNode::Input {
                name: spec.name.clone(),
                ty: spec.ty.clone(),
            })
            .collect();
        for (value, ty) in constants {
            nodes.push(CgpNode::Const { value, ty });
        }
        let n_fixed = nodes.len();
        Ok(CgpGenome {
            inputs,
            nodes,
            n_fixed,
            out_refs: Vec::new(),
            out_types,
            lang,
            opts,
            cache: Cache::default(),
        })
    }

    /// Point every output at a random node of a compatible type.
    ///
    /// # Errors
    ///
    /// [`Error::NoCompatibleOutput`] when some output type has no candidate.
    pub fn init_out_refs<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let mut refs = Vec::with_capacity(self.out_types.len());
        for (index, wanted) in self.out_types.iter().enumerate() {
            let candidates: Vec<usize> = (0..self.nodes.len())
                .filter(|&i| self.nodes[i].ty().is_subtype_of(wanted))
                .collect();
            if candidates.is_empty() {
                return Err(Error::NoCompatibleOutput {
                    index,
                    wanted: wanted.clone(),
                });
            }
            refs.push(candidates[rng.gen_range(0..candidates.len())]);
        }
        self.out_refs = refs;
        Ok(())
    }

    /// Draw a random node for position `at`: an ERC with probability
    /// `erc_prob`, otherwise a language entry with uniformly chosen
    /// compatible back-links.
    ///
    /// # Errors
    ///
    /// [`Error::NoTypedNode`] after bounded retries.
    pub fn rand_node<R: Rng>(&self, at: usize, rng: &mut R) -> Result<CgpNode> {
        if self.opts.erc_prob > 0.0 && rng.gen_bool(self.opts.erc_prob) {
            let (value, ty) = self.opts.erc_gen.sample(rng);
            return Ok(CgpNode::Erc { value, ty });
        }
        for _ in 0..RAND_NODE_TRIES {
            match self.lang.rand_entry(rng) {
                OpSpec::Const { value, ty } => {
                    return Ok(CgpNode::Const {
                        value: value.clone(),
                        ty: ty.clone(),
                    });
                }
                OpSpec::Func { name, ret, args } => {
                    if at == 0 && !args.is_empty() {
                        continue;
                    }
                    let mut links = Vec::with_capacity(args.len());
                    let mut linkable = true;
                    for arg_ty in args {
                        let candidates: Vec<usize> = (0..at)
                            .filter(|&j| self.nodes[j].ty().is_subtype_of(arg_ty))
                            .collect();
                        if candidates.is_empty() {
                            linkable = false;
                            break;
                        }
                        let j = candidates[rng.gen_range(0..candidates.len())];
                        links.push(at - j);
                    }
                    if linkable {
                        return Ok(CgpNode::Func {
                            op: name.clone(),
                            ret: ret.clone(),
                            arg_types: args.clone(),
                            links,
                        });
                    }
                }
            }
        }
        Err(Error::NoTypedNode)
    }

    /// All nodes in index order.
    #[must_use]
    pub fn nodes(&self) -> &[CgpNode] {
        &self.nodes
    }

    /// Output node indices.
    #[must_use]
    pub fn out_refs(&self) -> &[usize] {
        &self.out_refs
    }

    /// Declared inputs.
    #[must_use]
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    /// The operator vocabulary.
    #[must_use]
    pub fn lang(&self) -> &Language {
        &self.lang
    }

    /// Genome configuration.
    #[must_use]
    pub fn options(&self) -> &GenomeOptions {
        &self.opts
    }

    /// Mutable genome configuration.
    pub fn options_mut(&mut self) -> &mut GenomeOptions {
        &mut self.opts
    }

    fn lower(&self) -> Result<Program> {
        if self.out_refs.len() != self.out_types.len() {
            return Err(Error::Compile("outputs not initialised".to_string()));
        }
        let active = self.active_set();
        let mut slot: HashMap<usize, usize> = HashMap::with_capacity(active.len());
        let mut steps = Vec::with_capacity(active.len());
        for &i in &active {
            let step = match &self.nodes[i] {
                CgpNode::Input { .. } => Step::Input(i),
                CgpNode::Const { value, .. } | CgpNode::Erc { value, .. } => {
                    Step::Const(value.clone())
                }
                CgpNode::Func { op, links, .. } => {
                    let op = Op::resolve(op)
                        .ok_or_else(|| Error::Compile(format!("unknown operator `{op}`")))?;
                    let args = links
                        .iter()
                        .map(|&off| {
                            slot.get(&(i - off))
                                .copied()
                                .ok_or_else(|| Error::Compile(format!("node {i} links outside its active set")))
                        })
                        .collect::<Result<Vec<usize>>>()?;
                    Step::Call { op, args }
                }
            };
            slot.insert(i, steps.len());
            steps.push(step);
        }
        let outputs = self
            .out_refs
            .iter()
            .map(|r| {
                slot.get(r)
                    .copied()
                    .ok_or_else(|| Error::Compile(format!("output ref {r} not active")))
            })
            .collect::<Result<Vec<usize>>>()?;
        Program::new(steps, outputs, self.inputs.len(), self.opts.nil_safe)
    }
}

impl Genotype for CgpGenome {
    type Ref = usize;

    fn out_types(&self) -> &[Type] {
        &self.out_types
    }

    fn active_set(&self) -> BTreeSet<usize> {
        let mut active = BTreeSet::new();
        let mut stack: Vec<usize> = self.out_refs.clone();
        while let Some(i) = stack.pop() {
            if !active.insert(i) {
                continue;
            }
            if let CgpNode::Func { links, .. } = &self.nodes[i] {
                for &off in links {
                    stack.push(i - off);
                }
            }
        }
        active
    }

    fn recache(&mut self) -> Result<()> {
        let force = self.opts.force_recache;
        let lowered = self.lower();
        self.cache.recache_lowered(force, || lowered)?;
        Ok(())
    }

    fn program(&mut self) -> Result<Arc<Program>> {
        let force = self.opts.force_recache;
        let lowered = self.lower();
        self.cache.recache_lowered(force, || lowered)
    }

    /// Per-gene point mutation: with probability `mut_rate` per node,
    /// replace the function (preserving the link prefix where arities
    /// overlap); otherwise flip each link independently with the same
    /// probability. Output refs mutate to random non-input indices.
    fn mutate<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let rate = self.opts.mut_rate;
        for i in self.n_fixed..self.nodes.len() {
            if rng.gen_bool(rate) {
                // Function mutation with link-prefix continuity.
                match self.rand_node(i, rng) {
                    Ok(fresh) => {
                        let merged = match (&self.nodes[i], fresh) {
                            (
                                CgpNode::Func { links: old, .. },
                                CgpNode::Func {
                                    op,
                                    ret,
                                    arg_types,
                                    links: new,
                                },
                            ) => {
                                let links = if new.len() <= old.len() {
                                    old[..new.len()].to_vec()
                                } else {
                                    let mut kept = old.clone();
                                    kept.extend_from_slice(&new[old.len()..]);
                                    kept
                                };
                                CgpNode::Func {
                                    op,
                                    ret,
                                    arg_types,
                                    links,
                                }
                            }
                            (_, fresh) => fresh,
                        };
                        self.nodes[i] = merged;
                    }
                    Err(Error::NoTypedNode) => {}
                    Err(e) => return Err(e),
                }
            } else if let CgpNode::Func {
                op,
                ret,
                arg_types,
                links,
            } = self.nodes[i].clone()
            {
                let mut links = links;
                let mut changed = false;
                for (k, arg_ty) in arg_types.iter().enumerate() {
                    if rng.gen_bool(rate) {
                        let candidates: Vec<usize> = (0..i)
                            .filter(|&j| self.nodes[j].ty().is_subtype_of(arg_ty))
                            .collect();
                        if !candidates.is_empty() {
                            let j = candidates[rng.gen_range(0..candidates.len())];
                            links[k] = i - j;
                            changed = true;
                        }
                    }
                }
                if changed {
                    self.nodes[i] = CgpNode::Func {
                        op,
                        ret,
                        arg_types,
                        links,
                    };
                }
            }
        }
        for j in 0..self.out_refs.len() {
            if rng.gen_bool(rate) {
                let wanted = &self.out_types[j];
                let candidates: Vec<usize> = (self.inputs.len()..self.nodes.len())
                    .filter(|&i| self.nodes[i].ty().is_subtype_of(wanted))
                    .collect();
                if !candidates.is_empty() {
                    self.out_refs[j] = candidates[rng.gen_range(0..candidates.len())];
                }
            }
        }
        self.recache()
    }
}
