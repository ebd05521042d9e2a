//! Immutable typed CGP: a sorted map of nodes keyed by globally unique ids.
//!
//! Links carry absolute ids and always point at strictly smaller ids, so
//! the graph is acyclic and id order is a topological order. Mutation never
//! edits a node in place: the mutated node is re-inserted under a fresh id
//! and every downstream node is *bumped* (re-inserted with fresh ids in
//! relative order) so the ordering invariant survives. Ids are drawn from a
//! process-wide atomic counter and never reused.

use crate::compile::{Cache, Program, Step};
use crate::error::{Error, Result};
use crate::genome::{
    fresh_node_id, Genotype, GenomeOptions, InputSpec, NodeId, RAND_NODE_TRIES,
};
use crate::lang::{Language, OpSpec};
use crate::ops::Op;
use crate::value::{Type, Value};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// What a node computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeOp {
    /// A declared genome input.
    Input {
        /// Display name.
        name: String,
    },
    /// A seeded or language constant.
    Const {
        /// The constant.
        value: Value,
    },
    /// An ephemeral random constant.
    Erc {
        /// The drawn constant.
        value: Value,
    },
    /// A function application over earlier nodes.
    Func {
        /// Operator symbol.
        op: String,
        /// Expected argument types, copied from the language at birth.
        arg_types: Vec<Type>,
        /// Absolute ids of the argument nodes; each is smaller than the
        /// owning node's id.
        links: Vec<NodeId>,
    },
}

/// One ICGP node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcgpNode {
    /// The computation.
    pub op: NodeOp,
    /// Return type.
    pub ty: Type,
    /// Timestep of the last tick in which this node was active.
    pub last_use: u64,
}

impl IcgpNode {
    /// Input links; empty for non-function nodes.
    #[must_use]
    pub fn links(&self) -> &[NodeId] {
        match &self.op {
            NodeOp::Func { links, .. } => links,
            _ => &[],
        }
    }
}

/// An immutable typed CGP genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcgpGenome {
    /// Input node ids, in declared order.
    inputs: Vec<NodeId>,
    /// Constant node ids, pinned against atrophy and neutral drift.
    constants: Vec<NodeId>,
    nodes: BTreeMap<NodeId, IcgpNode>,
    out_refs: Vec<NodeId>,
    out_types: Vec<Type>,
    lang: Language,
    opts: GenomeOptions,
    timestep: u64,
    #[serde(skip)]
    cache: Cache,
}

impl PartialEq for IcgpGenome {
    fn eq(&self, other: &Self) -> bool {
        self.inputs == other.inputs
            && self.constants == other.constants
            && self.nodes == other.nodes
            && self.out_refs == other.out_refs
            && self.out_types == other.out_types
            && self.lang == other.lang
            && self.opts == other.opts
    }
}

impl IcgpGenome {
    /// Seed a genome with input and constant nodes, grow it with random
    /// nodes up to `initial_size`, and initialise outputs by typed random
    /// selection.
    ///
    /// # Errors
    ///
    /// [`Error::NoCompatibleOutput`] when an output type has no candidate
    /// node; [`Error::NoTypedNode`] when a random node cannot be linked.
    pub fn rand<R: Rng>(
        inputs: Vec<InputSpec>,
        constants: Vec<(Value, Type)>,
        out_types: Vec<Type>,
        lang: Language,
        initial_size: usize,
        opts: GenomeOptions,
        rng: &mut R,
    ) -> Result<Self> {
        let mut genome = Self::empty(inputs, constants, out_types, lang, opts);
        while genome.nodes.len() < initial_size.max(genome.n_fixed()) {
            genome.add_rand_node(rng)?;
        }
        genome.init_out_refs(rng)?;
        Ok(genome)
    }

    /// Like [`IcgpGenome::rand`] without the random nodes; not executable
    /// until [`IcgpGenome::init_out_refs`] succeeds.
    #[must_use]
    pub fn empty(
        inputs: Vec<InputSpec>,
        constants: Vec<(Value, Type)>,
        out_types: Vec<Type>,
        lang: Language,
        opts: GenomeOptions,
    ) -> Self {
        let mut nodes = BTreeMap::new();
        let mut input_ids = Vec::with_capacity(inputs.len());
        for spec in &inputs {
            let id = fresh_node_id();
            nodes.insert(
                id,
                IcgpNode {
                    op: NodeOp::Input {
                        name: spec.name.clone(),
                    },
                    ty: spec.ty.clone(),
                    last_use: 0,
                },
            );
            input_ids.push(id);
        }
        let mut constant_ids = Vec::with_capacity(constants.len());
        for (value, ty) in constants {
            let id = fresh_node_id();
            nodes.insert(
                id,
                IcgpNode {
                    op: NodeOp::Const { value },
                    ty,
                    last_use: 0,
                },
            );
            constant_ids.push(id);
        }
        IcgpGenome {
            inputs: input_ids,
            constants: constant_ids,
            nodes,
            out_refs: Vec::new(),
            out_types,
            lang,
            opts,
            timestep: 0,
            cache: Cache::default(),
        }
    }

    fn n_fixed(&self) -> usize {
        self.inputs.len() + self.constants.len()
    }

    /// Whether `id` is a declared input or a pinned constant.
    #[must_use]
    pub fn is_fixed(&self, id: NodeId) -> bool {
        self.inputs.contains(&id) || self.constants.contains(&id)
    }

    /// All nodes, keyed by id in ascending order.
    #[must_use]
    pub fn nodes(&self) -> &BTreeMap<NodeId, IcgpNode> {
        &self.nodes
    }

    /// Input node ids in declared order.
    #[must_use]
    pub fn input_ids(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Pinned constant node ids.
    #[must_use]
    pub fn constant_ids(&self) -> &[NodeId] {
        &self.constants
    }

    /// Output node ids.
    #[must_use]
    pub fn out_refs(&self) -> &[NodeId] {
        &self.out_refs
    }

    /// Current timestep.
    #[must_use]
    pub fn timestep(&self) -> u64 {
        self.timestep
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

    /// Point every output at a random node of a compatible type.
    ///
    /// # Errors
    ///
    /// [`Error::NoCompatibleOutput`] when some output type has no candidate.
    pub fn init_out_refs<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let mut refs = Vec::with_capacity(self.out_types.len());
        for (index, wanted) in self.out_types.iter().enumerate() {
            let id = self.typed_pick(wanted, rng).ok_or_else(|| {
                Error::NoCompatibleOutput {
                    index,
                    wanted: wanted.clone(),
                }
            })?;
            refs.push(id);
        }
        self.out_refs = refs;
        Ok(())
    }

    /// Insert a pinned constant node and return its id.
    ///
    /// # Errors
    ///
    /// [`Error::Incompatible`] when the value does not inhabit the type.
    pub fn add_const(&mut self, value: Value, ty: Type) -> Result<NodeId> {
        if !value.conforms_to(&ty) {
            return Err(Error::Incompatible(format!(
                "constant {value} does not inhabit type {ty}"
            )));
        }
        let id = fresh_node_id();
        self.nodes.insert(
            id,
            IcgpNode {
                op: NodeOp::Const { value },
                ty,
                last_use: self.timestep,
            },
        );
        self.constants.push(id);
        Ok(id)
    }

    /// Insert a function node with explicit links and return its id. Used
    /// to seed genomes with known structure.
    ///
    /// # Errors
    ///
    /// [`Error::Incompatible`] when the operator is unknown, arities
    /// disagree, a link is missing, or a link type is incompatible.
    pub fn add_func(
        &mut self,
        op: &str,
        ret: Type,
        arg_types: Vec<Type>,
        links: Vec<NodeId>,
    ) -> Result<NodeId> {
        let resolved =
            Op::resolve(op).ok_or_else(|| Error::Incompatible(format!("unknown operator `{op}`")))?;
        if resolved.arity() != arg_types.len() || arg_types.len() != links.len() {
            return Err(Error::Incompatible(format!(
                "`{op}` arity mismatch: {} types, {} links",
                arg_types.len(),
                links.len()
            )));
        }
        for (link, arg_ty) in links.iter().zip(&arg_types) {
            let node = self
                .nodes
                .get(link)
                .ok_or_else(|| Error::Incompatible(format!("no node {link}")))?;
            if !node.ty.is_subtype_of(arg_ty) {
                return Err(Error::Incompatible(format!(
                    "node {link} of type {} feeds argument of type {arg_ty}",
                    node.ty
                )));
            }
        }
        let id = fresh_node_id();
        self.nodes.insert(
            id,
            IcgpNode {
                op: NodeOp::Func {
                    op: op.to_string(),
                    arg_types,
                    links,
                },
                ty: ret,
                last_use: self.timestep,
            },
        );
        Ok(id)
    }

    /// Point output `index` at an explicit node.
    ///
    /// # Errors
    ///
    /// [`Error::Incompatible`] when the node is missing or its type does not
    /// satisfy the declared output type.
    pub fn set_out_ref(&mut self, index: usize, id: NodeId) -> Result<()> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| Error::Incompatible(format!("no node {id}")))?;
        let wanted = &self.out_types[index];
        if !node.ty.is_subtype_of(wanted) {
            return Err(Error::Incompatible(format!(
                "node {id} of type {} cannot be output {index} of type {wanted}",
                node.ty
            )));
        }
        if self.out_refs.len() != self.out_types.len() {
            self.out_refs = vec![id; self.out_types.len()];
        }
        self.out_refs[index] = id;
        Ok(())
    }

    /// Draw a random node: an ERC with probability `erc_prob`, otherwise a
    /// language entry with typed random links over the current nodes.
    ///
    /// # Errors
    ///
    /// [`Error::NoTypedNode`] after bounded retries.
    pub fn rand_node<R: Rng>(&self, rng: &mut R) -> Result<IcgpNode> {
        if self.opts.erc_prob > 0.0 && rng.gen_bool(self.opts.erc_prob) {
            let (value, ty) = self.opts.erc_gen.sample(rng);
            return Ok(IcgpNode {
                op: NodeOp::Erc { value },
                ty,
                last_use: self.timestep,
            });
        }
        for _ in 0..RAND_NODE_TRIES {
            match self.lang.rand_entry(rng) {
                OpSpec::Const { value, ty } => {
                    return Ok(IcgpNode {
                        op: NodeOp::Const {
                            value: value.clone(),
                        },
                        ty: ty.clone(),
                        last_use: self.timestep,
                    });
                }
                OpSpec::Func { name, ret, args } => {
                    let mut links = Vec::with_capacity(args.len());
                    let mut linkable = true;
                    for arg_ty in args {
                        match self.typed_pick(arg_ty, rng) {
                            Some(id) => links.push(id),
                            None => {
                                linkable = false;
                                break;
                            }
                        }
                    }
                    if linkable {
                        return Ok(IcgpNode {
                            op: NodeOp::Func {
                                op: name.clone(),
                                arg_types: args.clone(),
                                links,
                            },
                            ty: ret.clone(),
                            last_use: self.timestep,
                        });
                    }
                }
            }
        }
        Err(Error::NoTypedNode)
    }

    /// Draw a random node and insert it under a fresh id.
    ///
    /// # Errors
    ///
    /// As [`IcgpGenome::rand_node`].
    pub fn add_rand_node<R: Rng>(&mut self, rng: &mut R) -> Result<NodeId> {
        let node = self.rand_node(rng)?;
        let id = fresh_node_id();
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn typed_pick<R: Rng>(&self, wanted: &Type, rng: &mut R) -> Option<NodeId> {
        self.typed_pick_excluding(wanted, &BTreeSet::new(), rng)
    }

    fn typed_pick_excluding<R: Rng>(
        &self,
        wanted: &Type,
        excluded: &BTreeSet<NodeId>,
        rng: &mut R,
    ) -> Option<NodeId> {
        let candidates: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(id, node)| !excluded.contains(id) && node.ty.is_subtype_of(wanted))
            .map(|(&id, _)| id)
            .collect();
        if candidates.is_empty() {
            None
        } else {
            Some(candidates[rng.gen_range(0..candidates.len())])
        }
    }

    /// Ids of every node transitively depending on `id`, in ascending
    /// order. All dependants have larger ids than `id`.
    #[must_use]
    pub fn downstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut tainted = BTreeSet::new();
        tainted.insert(id);
        for (&nid, node) in self.nodes.range(id + 1..) {
            if node.links().iter().any(|l| tainted.contains(l)) {
                tainted.insert(nid);
            }
        }
        tainted.remove(&id);
        tainted
    }

    /// Replace `old_id` with `new_node`, preserving downstream structure
    /// where types allow.
    ///
    /// Three outcomes, tried in order:
    /// 1. the new node's type satisfies the old one's — downstream nodes
    ///    keep their shape, re-pointed at the new id and bumped;
    /// 2. a compatible replacement parent exists outside the downstream
    ///    set — downstream consumers are re-parented onto it and bumped,
    ///    and the new node is inserted as drift material;
    /// 3. otherwise the old node and its downstream are discarded, the
    ///    same number of fresh random nodes is appended, and orphaned
    ///    output refs are re-pointed by typed random selection.
    ///
    /// # Errors
    ///
    /// [`Error::NoTypedNode`] / [`Error::NoCompatibleOutput`] from the
    /// discard path; callers treat these as a skipped mutation. On any
    /// error the genome is unchanged.
    pub fn exchange_node<R: Rng>(
        &mut self,
        old_id: NodeId,
        new_node: IcgpNode,
        rng: &mut R,
    ) -> Result<()> {
        let saved = self.clone();
        self.exchange_node_inner(old_id, new_node, rng).map_err(|e| {
            *self = saved;
            e
        })
    }

    fn exchange_node_inner<R: Rng>(
        &mut self,
        old_id: NodeId,
        new_node: IcgpNode,
        rng: &mut R,
    ) -> Result<()> {
        let old = self
            .nodes
            .get(&old_id)
            .ok_or_else(|| Error::Compile(format!("no node {old_id}")))?;
        let old_ty = old.ty.clone();
        let down = self.downstream(old_id);

        if new_node.ty.is_subtype_of(&old_ty) {
            let new_id = fresh_node_id();
            self.nodes.insert(new_id, new_node);
            self.nodes.remove(&old_id);
            let mut remap = BTreeMap::new();
            remap.insert(old_id, new_id);
            self.bump(&down, &mut remap);
            self.remap_out_refs(&remap);
            return Ok(());
        }

        let mut excluded = down.clone();
        excluded.insert(old_id);
        if let Some(parent) = self.typed_pick_excluding(&old_ty, &excluded, rng) {
            let new_id = fresh_node_id();
            self.nodes.insert(new_id, new_node);
            self.nodes.remove(&old_id);
            let mut remap = BTreeMap::new();
            remap.insert(old_id, parent);
            self.bump(&down, &mut remap);
            self.remap_out_refs(&remap);
            return Ok(());
        }

        // Discard the old node and everything downstream, then refill.
        let discarded = 1 + down.len();
        self.nodes.remove(&old_id);
        for d in &down {
            self.nodes.remove(d);
        }
        for _ in 0..discarded {
            self.add_rand_node(rng)?;
        }
        for index in 0..self.out_refs.len() {
            if !self.nodes.contains_key(&self.out_refs[index]) {
                let wanted = self.out_types[index].clone();
                let id = self
                    .typed_pick(&wanted, rng)
                    .ok_or(Error::NoCompatibleOutput { index, wanted })?;
                self.out_refs[index] = id;
            }
        }
        Ok(())
    }

    /// Re-insert every downstream node under a fresh id, ascending, links
    /// rewritten through `remap`. Extends `remap` with each re-issue.
    fn bump(&mut self, down: &BTreeSet<NodeId>, remap: &mut BTreeMap<NodeId, NodeId>) {
        for &d in down {
            if let Some(mut node) = self.nodes.remove(&d) {
                if let NodeOp::Func { links, .. } = &mut node.op {
                    for link in links.iter_mut() {
                        if let Some(&mapped) = remap.get(link) {
                            *link = mapped;
                        }
                    }
                }
                let fresh = fresh_node_id();
                remap.insert(d, fresh);
                self.nodes.insert(fresh, node);
            }
        }
    }

    fn remap_out_refs(&mut self, remap: &BTreeMap<NodeId, NodeId>) {
        for r in &mut self.out_refs {
            if let Some(&mapped) = remap.get(r) {
                *r = mapped;
            }
        }
    }

    /// Carry over as many of the old node's links as remain type-compatible
    /// with the new argument types: old links are grouped by their declared
    /// argument type, matched against the new types in order, and gaps are
    /// filled by typed random selection outside the downstream set. `None`
    /// when a gap cannot be filled.
    fn links_based_on<R: Rng>(
        &self,
        old: &IcgpNode,
        new_arg_types: &[Type],
        old_id: NodeId,
        down: &BTreeSet<NodeId>,
        rng: &mut R,
    ) -> Option<Vec<NodeId>> {
        let mut groups: Vec<(Type, Vec<NodeId>)> = Vec::new();
        if let NodeOp::Func {
            arg_types, links, ..
        } = &old.op
        {
            for (ty, &link) in arg_types.iter().zip(links) {
                match groups.iter_mut().find(|(t, _)| t == ty) {
                    Some((_, ids)) => ids.push(link),
                    None => groups.push((ty.clone(), vec![link])),
                }
            }
        }
        let mut excluded = down.clone();
        excluded.insert(old_id);
        let mut fresh = Vec::with_capacity(new_arg_types.len());
        for arg_ty in new_arg_types {
            let reused = groups
                .iter_mut()
                .find(|(t, ids)| t == arg_ty && !ids.is_empty())
                .map(|(_, ids)| ids.remove(0));
            match reused {
                Some(id) => fresh.push(id),
                None => fresh.push(self.typed_pick_excluding(arg_ty, &excluded, rng)?),
            }
        }
        Some(fresh)
    }

    /// One mutation attempt for a single node: an even choice between
    /// mutating the function and mutating one input link.
    fn mutate_node<R: Rng>(&mut self, id: NodeId, rng: &mut R) -> Result<()> {
        let node = self.nodes[&id].clone();
        let down = self.downstream(id);
        let has_links = !node.links().is_empty();
        if !has_links || rng.gen_bool(0.5) {
            // Function mutation.
            let replacement = self.rand_node_based_on(&node, id, &down, rng)?;
            self.exchange_node(id, replacement, rng)
        } else {
            // Link mutation.
            let NodeOp::Func {
                op,
                arg_types,
                mut links,
            } = node.op.clone()
            else {
                return Ok(());
            };
            let j = rng.gen_range(0..links.len());
            let mut excluded = down.clone();
            excluded.insert(id);
            let fresh = self
                .typed_pick_excluding(&arg_types[j], &excluded, rng)
                .ok_or(Error::NoTypedNode)?;
            links[j] = fresh;
            let replacement = IcgpNode {
                op: NodeOp::Func {
                    op,
                    arg_types,
                    links,
                },
                ty: node.ty.clone(),
                last_use: node.last_use,
            };
            self.exchange_node(id, replacement, rng)
        }
    }

    /// Draw a replacement node for `old`, reusing its links where the new
    /// entry's argument types allow.
    fn rand_node_based_on<R: Rng>(
        &self,
        old: &IcgpNode,
        old_id: NodeId,
        down: &BTreeSet<NodeId>,
        rng: &mut R,
    ) -> Result<IcgpNode> {
        if self.opts.erc_prob > 0.0 && rng.gen_bool(self.opts.erc_prob) {
            let (value, ty) = self.opts.erc_gen.sample(rng);
            return Ok(IcgpNode {
                op: NodeOp::Erc { value },
                ty,
                last_use: self.timestep,
            });
        }
        for _ in 0..RAND_NODE_TRIES {
            match self.lang.rand_entry(rng) {
                OpSpec::Const { value, ty } => {
                    return Ok(IcgpNode {
                        op: NodeOp::Const {
                            value: value.clone(),
                        },
                        ty: ty.clone(),
                        last_use: self.timestep,
                    });
                }
                OpSpec::Func { name, ret, args } => {
                    if let Some(links) = self.links_based_on(old, args, old_id, down, rng) {
                        return Ok(IcgpNode {
                            op: NodeOp::Func {
                                op: name.clone(),
                                arg_types: args.clone(),
                                links,
                            },
                            ty: ret.clone(),
                            last_use: self.timestep,
                        });
                    }
                }
            }
        }
        Err(Error::NoTypedNode)
    }

    /// Point output `index` at a random node of a compatible type.
    ///
    /// # Errors
    ///
    /// [`Error::NoCompatibleOutput`] when no node satisfies the type.
    pub fn mutate_out_ref<R: Rng>(&mut self, index: usize, rng: &mut R) -> Result<()> {
        let wanted = self.out_types[index].clone();
        let id = self
            .typed_pick(&wanted, rng)
            .ok_or(Error::NoCompatibleOutput { index, wanted })?;
        self.out_refs[index] = id;
        Ok(())
    }

    /// Keep genome size near `target_size`: discard a random inactive
    /// non-fixed node (with its dependants) when above target, otherwise
    /// add a random node. Observable behaviour is unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::NoTypedNode`] when a node cannot be added; the genome is
    /// unchanged in that case.
    pub fn vary_neutral<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        if self.nodes.len() > self.opts.target_size {
            let active = self.active_set();
            let candidates: Vec<NodeId> = self
                .nodes
                .keys()
                .filter(|&&id| !self.is_fixed(id) && !active.contains(&id))
                .copied()
                .collect();
            if let Some(&id) = candidates.get(rng.gen_range(0..candidates.len().max(1))) {
                let down = self.downstream(id);
                self.nodes.remove(&id);
                for d in &down {
                    self.nodes.remove(d);
                }
            }
        } else {
            self.add_rand_node(rng)?;
        }
        self.recache()
    }

    /// Advance the timestep, stamp every active node, and — when atrophy is
    /// configured — retire inactive non-fixed nodes whose last use lags by
    /// more than `atrophy_steps`.
    pub fn tick(&mut self) {
        self.timestep += 1;
        let t = self.timestep;
        let active = self.active_set();
        for id in &active {
            if let Some(node) = self.nodes.get_mut(id) {
                node.last_use = t;
            }
        }
        if self.opts.atrophy_steps == 0 {
            return;
        }
        let horizon = self.opts.atrophy_steps;
        let stale: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(id, node)| {
                !self.is_fixed(**id)
                    && !active.contains(id)
                    && t.saturating_sub(node.last_use) > horizon
            })
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            if self.nodes.contains_key(&id) {
                let down = self.downstream(id);
                self.nodes.remove(&id);
                for d in &down {
                    self.nodes.remove(d);
                }
            }
        }
    }

    /// Union this genome's node map with another's. Globally unique ids
    /// make the union collision-free; the other genome's input nodes are
    /// identified with this genome's by declared position, and outputs are
    /// re-initialised.
    ///
    /// Both genomes must have been constructed whole (each allocates its
    /// input ids before any other node), so the kept input set precedes
    /// every remapped link target.
    ///
    /// # Errors
    ///
    /// [`Error::Incompatible`] for mismatched input/output signatures;
    /// [`Error::NoCompatibleOutput`] when outputs cannot be re-initialised.
    pub fn merge<R: Rng>(&self, other: &Self, rng: &mut R) -> Result<Self> {
        let my_sig: Vec<&Type> = self.inputs.iter().map(|id| &self.nodes[id].ty).collect();
        let their_sig: Vec<&Type> = other
            .inputs
            .iter()
            .map(|id| &other.nodes[id].ty)
            .collect();
        if my_sig != their_sig || self.out_types != other.out_types {
            return Err(Error::Incompatible(
                "merge requires matching inputs and output types".to_string(),
            ));
        }
        let (base, donor) = if self.inputs.first() <= other.inputs.first() {
            (self, other)
        } else {
            (other, self)
        };
        let mut merged = base.clone();
        let remap: BTreeMap<NodeId, NodeId> = donor
            .inputs
            .iter()
            .zip(&base.inputs)
            .map(|(&from, &to)| (from, to))
            .collect();
        for (&id, node) in &donor.nodes {
            if remap.contains_key(&id) {
                continue;
            }
            let mut node = node.clone();
            if let NodeOp::Func { links, .. } = &mut node.op {
                for link in links.iter_mut() {
                    if let Some(&mapped) = remap.get(link) {
                        *link = mapped;
                    }
                }
            }
            merged.nodes.insert(id, node);
        }
        for &c in &donor.constants {
            if !merged.constants.contains(&c) && merged.nodes.contains_key(&c) {
                merged.constants.push(c);
            }
        }
        merged.init_out_refs(rng)?;
        merged.cache = Cache::default();
        Ok(merged)
    }

    fn out_ref_fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.out_refs.hash(&mut h);
        self.opts.nil_safe.hash(&mut h);
        h.finish()
    }

    fn lower(&self) -> Result<Program> {
        if self.out_refs.len() != self.out_types.len() {
            return Err(Error::Compile("outputs not initialised".to_string()));
        }
        let active = self.active_set();
        let mut slot: HashMap<NodeId, usize> = HashMap::with_capacity(active.len());
        let mut steps = Vec::with_capacity(active.len());
        for &id in &active {
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| Error::Compile(format!("output ref {id} dangling")))?;
            let step = match &node.op {
                NodeOp::Input { .. } => {
                    let position = self
                        .inputs
                        .iter()
                        .position(|&i| i == id)
                        .ok_or_else(|| Error::Compile(format!("undeclared input node {id}")))?;
                    Step::Input(position)
                }
                NodeOp::Const { value } | NodeOp::Erc { value } => Step::Const(value.clone()),
                NodeOp::Func { op, links, .. } => {
                    let op = Op::resolve(op)
                        .ok_or_else(|| Error::Compile(format!("unknown operator `{op}`")))?;
                    let args = links
                        .iter()
                        .map(|l| {
                            slot.get(l).copied().ok_or_else(|| {
                                Error::Compile(format!("node {id} links outside its active set"))
                            })
                        })
                        .collect::<Result<Vec<usize>>>()?;
                    Step::Call { op, args }
                }
            };
            slot.insert(id, steps.len());
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

impl Genotype for IcgpGenome {
    type Ref = NodeId;

    fn out_types(&self) -> &[Type] {
        &self.out_types
    }

    fn active_set(&self) -> BTreeSet<NodeId> {
        let mut active = BTreeSet::new();
        let mut stack: Vec<NodeId> = self.out_refs.clone();
        while let Some(id) = stack.pop() {
            if !active.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.links());
            }
        }
        active
    }

    fn recache(&mut self) -> Result<()> {
        self.program().map(|_| ())
    }

    fn program(&mut self) -> Result<Arc<Program>> {
        let fp = self.out_ref_fingerprint();
        let force = self.opts.force_recache;
        let mut cache = std::mem::take(&mut self.cache);
        let result = cache.recache_keyed(fp, force, || self.lower());
        self.cache = cache;
        result
    }

    /// Iterate non-fixed node ids in decreasing order; each mutates with
    /// probability `mut_rate` through [`IcgpGenome::exchange_node`].
    /// Failed attempts restore the genome, so a genome in which every
    /// attempt link-fails is returned bit-for-bit.
    fn mutate<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|&&id| !self.is_fixed(id))
            .copied()
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in ids {
            if !self.nodes.contains_key(&id) {
                // Removed by an earlier discard this round.
                continue;
            }
            if !rng.gen_bool(self.opts.mut_rate) {
                continue;
            }
            // Link selection fails before anything is touched and the
            // exchange itself is transactional, so a failed attempt is a
            // clean skip.
            match self.mutate_node(id, rng) {
                Ok(()) | Err(Error::NoTypedNode | Error::NoCompatibleOutput { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        for index in 0..self.out_refs.len() {
            if rng.gen_bool(self.opts.mut_rate) {
                // Cannot fail while the current ref still exists; skip if it
                // somehow does.
                let _ = self.mutate_out_ref(index, rng);
            }
        }
        self.recache()
    }
}
