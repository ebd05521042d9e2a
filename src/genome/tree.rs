//! Tree genetic programming: one nested expression per output.
//!
//! Trees are grown with a terminal-probability cutoff, varied by typed
//! subtree replacement, and recombined by swapping type-compatible
//! subtrees. Every structural operator finishes by trimming to
//! `max_expr_depth`.

use crate::compile::{Cache, Program, Step};
use crate::error::{Error, Result};
use crate::genome::{Genotype, GenomeOptions, InputSpec, RAND_NODE_TRIES};
use crate::lang::{Language, OpSpec};
use crate::ops::Op;
use crate::value::{Type, Value};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A tree expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeExpr {
    /// A declared genome input.
    Input {
        /// Position in the declared input list.
        index: usize,
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
    Call {
        /// Operator symbol.
        op: String,
        /// Return type.
        ret: Type,
        /// Expected argument types.
        arg_types: Vec<Type>,
        /// Child expressions, one per argument.
        args: Vec<TreeExpr>,
    },
}

impl TreeExpr {
    /// The type this expression produces.
    #[must_use]
    pub fn ty(&self) -> &Type {
        match self {
            TreeExpr::Input { ty, .. }
            | TreeExpr::Const { ty, .. }
            | TreeExpr::Erc { ty, .. } => ty,
            TreeExpr::Call { ret, .. } => ret,
        }
    }

    /// Total node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            TreeExpr::Call { args, .. } => 1 + args.iter().map(TreeExpr::node_count).sum::<usize>(),
            _ => 1,
        }
    }

    /// Depth; a single node has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            TreeExpr::Call { args, .. } => {
                1 + args.iter().map(TreeExpr::depth).max().unwrap_or(0)
            }
            _ => 1,
        }
    }
}

/// Every subtree position of an expression, preorder, with the type
/// demanded at that position.
fn positions(expr: &TreeExpr, demanded: &Type, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, Type)>) {
    out.push((path.clone(), demanded.clone()));
    if let TreeExpr::Call {
        arg_types, args, ..
    } = expr
    {
        for (k, (child, arg_ty)) in args.iter().zip(arg_types).enumerate() {
            path.push(k);
            positions(child, arg_ty, path, out);
            path.pop();
        }
    }
}

fn subtree_at<'a>(expr: &'a TreeExpr, path: &[usize]) -> &'a TreeExpr {
    match path.split_first() {
        None => expr,
        Some((&k, rest)) => match expr {
            TreeExpr::Call { args, .. } => subtree_at(&args[k], rest),
            _ => expr,
        },
    }
}

fn replace_at(expr: &TreeExpr, path: &[usize], replacement: TreeExpr) -> TreeExpr {
    match path.split_first() {
        None => replacement,
        Some((&k, rest)) => match expr {
            TreeExpr::Call {
                op,
                ret,
                arg_types,
                args,
            } => {
                let mut args = args.clone();
                args[k] = replace_at(&args[k], rest, replacement);
                TreeExpr::Call {
                    op: op.clone(),
                    ret: ret.clone(),
                    arg_types: arg_types.clone(),
                    args,
                }
            }
            _ => expr.clone(),
        },
    }
}

/// A tree genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeGenome {
    inputs: Vec<InputSpec>,
    constants: Vec<(Value, Type)>,
    exprs: Vec<TreeExpr>,
    out_types: Vec<Type>,
    lang: Language,
    opts: GenomeOptions,
    #[serde(skip)]
    cache: Cache,
}

impl PartialEq for TreeGenome {
    fn eq(&self, other: &Self) -> bool {
        self.inputs == other.inputs
            && self.constants == other.constants
            && self.exprs == other.exprs
            && self.out_types == other.out_types
            && self.lang == other.lang
            && self.opts == other.opts
    }
}

impl TreeGenome {
    /// Grow a random expression for every output type.
    ///
    /// # Errors
    ///
    /// [`Error::NoTypedNode`] when some demanded type has neither a
    /// terminal nor a function in reach.
    pub fn rand<R: Rng>(
        inputs: Vec<InputSpec>,
        constants: Vec<(Value, Type)>,
        out_types: Vec<Type>,
        lang: Language,
        opts: GenomeOptions,
        rng: &mut R,
    ) -> Result<Self> {
        let mut genome = TreeGenome {
            inputs,
            constants,
            exprs: Vec::new(),
            out_types,
            lang,
            opts,
            cache: Cache::default(),
        };
        let depth = genome.opts.max_expr_depth;
        for wanted in genome.out_types.clone() {
            let expr = genome.rand_expr(&wanted, depth, rng)?;
            genome.exprs.push(expr);
        }
        Ok(genome)
    }

    /// Declared inputs.
    #[must_use]
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    /// One expression per output.
    #[must_use]
    pub fn exprs(&self) -> &[TreeExpr] {
        &self.exprs
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

    /// Grow a random expression of the demanded type with `depth` levels of
    /// budget (1 forces a terminal).
    fn rand_expr<R: Rng>(&self, wanted: &Type, depth: usize, rng: &mut R) -> Result<TreeExpr> {
        let prefer_terminal = depth <= 1 || rng.gen_bool(self.opts.terminal_prob);
        if prefer_terminal {
            if let Some(terminal) = self.rand_terminal(wanted, rng) {
                return Ok(terminal);
            }
        }
        if depth > 1 {
            for _ in 0..RAND_NODE_TRIES {
                match self.lang.rand_entry_returning(wanted, rng) {
                    Some(OpSpec::Func { name, ret, args }) => {
                        let mut children = Vec::with_capacity(args.len());
                        let mut grown = true;
                        for arg_ty in args {
                            match self.rand_expr(arg_ty, depth - 1, rng) {
                                Ok(child) => children.push(child),
                                Err(_) => {
                                    grown = false;
                                    break;
                                }
                            }
                        }
                        if grown {
                            return Ok(TreeExpr::Call {
                                op: name.clone(),
                                ret: ret.clone(),
                                arg_types: args.clone(),
                                args: children,
                            });
                        }
                    }
                    Some(OpSpec::Const { value, ty }) => {
                        return Ok(TreeExpr::Const {
                            value: value.clone(),
                            ty: ty.clone(),
                        });
                    }
                    None => break,
                }
            }
        }
        self.rand_terminal(wanted, rng).ok_or(Error::NoTypedNode)
    }

    fn rand_terminal<R: Rng>(&self, wanted: &Type, rng: &mut R) -> Option<TreeExpr> {
        if self.opts.erc_prob > 0.0 && rng.gen_bool(self.opts.erc_prob) {
            let (value, ty) = self.opts.erc_gen.sample(rng);
            if ty.is_subtype_of(wanted) {
                return Some(TreeExpr::Erc { value, ty });
            }
        }
        let mut candidates: Vec<TreeExpr> = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.ty.is_subtype_of(wanted))
            .map(|(index, spec)| TreeExpr::Input {
                index,
                ty: spec.ty.clone(),
            })
            .collect();
        for (value, ty) in &self.constants {
            if ty.is_subtype_of(wanted) {
                candidates.push(TreeExpr::Const {
                    value: value.clone(),
                    ty: ty.clone(),
                });
            }
        }
        for entry in self.lang.entries() {
            if let OpSpec::Const { value, ty } = entry {
                if ty.is_subtype_of(wanted) {
                    candidates.push(TreeExpr::Const {
                        value: value.clone(),
                        ty: ty.clone(),
                    });
                }
            }
        }
        if candidates.is_empty() {
            None
        } else {
            Some(candidates.swap_remove(rng.gen_range(0..candidates.len())))
        }
    }

    /// Rebuild an expression so its depth never exceeds `budget`; subtrees
    /// at the boundary collapse to typed terminals.
    fn trim<R: Rng>(
        &self,
        expr: &TreeExpr,
        demanded: &Type,
        budget: usize,
        rng: &mut R,
    ) -> Result<TreeExpr> {
        if expr.depth() <= budget {
            return Ok(expr.clone());
        }
        if budget <= 1 {
            return self.rand_terminal(demanded, rng).ok_or(Error::NoTypedNode);
        }
        match expr {
            TreeExpr::Call {
                op,
                ret,
                arg_types,
                args,
            } => {
                let mut trimmed = Vec::with_capacity(args.len());
                for (child, arg_ty) in args.iter().zip(arg_types) {
                    trimmed.push(self.trim(child, arg_ty, budget - 1, rng)?);
                }
                Ok(TreeExpr::Call {
                    op: op.clone(),
                    ret: ret.clone(),
                    arg_types: arg_types.clone(),
                    args: trimmed,
                })
            }
            other => Ok(other.clone()),
        }
    }

    /// Swap randomly chosen type-compatible subtrees between two genomes
    /// and trim both children to `max_expr_depth`. Returns clones when no
    /// compatible swap position exists.
    ///
    /// # Errors
    ///
    /// [`Error::Incompatible`] for mismatched output signatures.
    pub fn crossover<R: Rng>(
        a: &TreeGenome,
        b: &TreeGenome,
        rng: &mut R,
    ) -> Result<(TreeGenome, TreeGenome)> {
        if a.out_types != b.out_types {
            return Err(Error::Incompatible(
                "crossover requires matching output types".to_string(),
            ));
        }
        let j = rng.gen_range(0..a.exprs.len());
        let mut all_a = Vec::new();
        positions(&a.exprs[j], &a.out_types[j], &mut Vec::new(), &mut all_a);
        let mut all_b = Vec::new();
        positions(&b.exprs[j], &b.out_types[j], &mut Vec::new(), &mut all_b);

        let (path_a, demanded_a) = all_a[rng.gen_range(0..all_a.len())].clone();
        let sub_a = subtree_at(&a.exprs[j], &path_a).clone();

        let compatible: Vec<&(Vec<usize>, Type)> = all_b
            .iter()
            .filter(|(path_b, demanded_b)| {
                let sub_b = subtree_at(&b.exprs[j], path_b);
                sub_b.ty().is_subtype_of(&demanded_a) && sub_a.ty().is_subtype_of(demanded_b)
            })
            .collect();
        if compatible.is_empty() {
            return Ok((a.clone(), b.clone()));
        }
        let (path_b, _) = compatible[rng.gen_range(0..compatible.len())].clone();
        let sub_b = subtree_at(&b.exprs[j], &path_b).clone();

        let mut child_a = a.clone();
        let mut child_b = b.clone();
        let swapped_a = replace_at(&a.exprs[j], &path_a, sub_b);
        let swapped_b = replace_at(&b.exprs[j], &path_b, sub_a);
        child_a.exprs[j] = a.trim(&swapped_a, &a.out_types[j], a.opts.max_expr_depth, rng)?;
        child_b.exprs[j] = b.trim(&swapped_b, &b.out_types[j], b.opts.max_expr_depth, rng)?;
        child_a.cache = Cache::default();
        child_b.cache = Cache::default();
        Ok((child_a, child_b))
    }

    fn lower(&self) -> Result<Program> {
        let mut steps = Vec::new();
        let mut outputs = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            let slot = lower_expr(expr, &mut steps)?;
            outputs.push(slot);
        }
        Program::new(steps, outputs, self.inputs.len(), self.opts.nil_safe)
    }
}

fn lower_expr(expr: &TreeExpr, steps: &mut Vec<Step>) -> Result<usize> {
    let step = match expr {
        TreeExpr::Input { index, .. } => Step::Input(*index),
        TreeExpr::Const { value, .. } | TreeExpr::Erc { value, .. } => Step::Const(value.clone()),
        TreeExpr::Call { op, args, .. } => {
            let resolved = Op::resolve(op)
                .ok_or_else(|| Error::Compile(format!("unknown operator `{op}`")))?;
            let mut slots = Vec::with_capacity(args.len());
            for child in args {
                slots.push(lower_expr(child, steps)?);
            }
            Step::Call {
                op: resolved,
                args: slots,
            }
        }
    };
    steps.push(step);
    Ok(steps.len() - 1)
}

impl Genotype for TreeGenome {
    type Ref = usize;

    fn out_types(&self) -> &[Type] {
        &self.out_types
    }

    /// Every node of a tree is reachable from its root.
    fn active_set(&self) -> BTreeSet<usize> {
        let total: usize = self.exprs.iter().map(TreeExpr::node_count).sum();
        (0..total).collect()
    }

    fn recache(&mut self) -> Result<()> {
        self.program().map(|_| ())
    }

    fn program(&mut self) -> Result<Arc<Program>> {
        let force = self.opts.force_recache;
        let lowered = self.lower();
        self.cache.recache_lowered(force, || lowered)
    }

    /// Typed subtree replacement: with probability `mut_rate` per output,
    /// replace a random position with a fresh random expression of the
    /// demanded type, then trim.
    fn mutate<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        for j in 0..self.exprs.len() {
            if !rng.gen_bool(self.opts.mut_rate) {
                continue;
            }
            let root_ty = self.out_types[j].clone();
            let mut all = Vec::new();
            positions(&self.exprs[j], &root_ty, &mut Vec::new(), &mut all);
            let (path, demanded) = all[rng.gen_range(0..all.len())].clone();
            let budget = self.opts.max_expr_depth.saturating_sub(path.len()).max(1);
            match self.rand_expr(&demanded, budget, rng) {
                Ok(replacement) => {
                    let swapped = replace_at(&self.exprs[j], &path, replacement);
                    match self.trim(&swapped, &root_ty, self.opts.max_expr_depth, rng) {
                        Ok(trimmed) => self.exprs[j] = trimmed,
                        Err(Error::NoTypedNode) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::NoTypedNode) => {}
                Err(e) => return Err(e),
            }
        }
        self.recache()
    }
}
