//! Straight-line programs compiled from genomes.
//!
//! Compilation lowers a genome's active set into a topologically ordered
//! sequence of steps over result slots, which a small interpreter executes.
//! The compiled program is memoised in the genome alongside a structural
//! fingerprint; a recache that sees an equal fingerprint returns the same
//! `Arc`, so callable identity is stable while the active structure is.

use crate::error::{Error, Result};
use crate::ops::Op;
use crate::value::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One step of a straight-line program. `Call` arguments index earlier
/// steps' result slots.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Load the formal parameter at the given declared-input position.
    Input(usize),
    /// Load a literal.
    Const(Value),
    /// Apply a primitive to earlier slots.
    Call {
        /// The resolved primitive.
        op: Op,
        /// Slot indices of the arguments.
        args: Vec<usize>,
    },
}

/// A compiled genome: callable as `run(args) -> outputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    steps: Vec<Step>,
    outputs: Vec<usize>,
    n_inputs: usize,
    nil_safe: bool,
}

impl Program {
    /// Assemble a program, checking the straight-line invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compile`] when a call references a slot at or after
    /// itself, an input index exceeds the declared input count, or an
    /// output references a missing slot. These indicate a broken genome
    /// invariant.
    pub fn new(
        steps: Vec<Step>,
        outputs: Vec<usize>,
        n_inputs: usize,
        nil_safe: bool,
    ) -> Result<Program> {
        for (i, step) in steps.iter().enumerate() {
            match step {
                Step::Input(idx) if *idx >= n_inputs => {
                    return Err(Error::Compile(format!(
                        "input {idx} out of range for {n_inputs} inputs"
                    )));
                }
                Step::Call { op, args } => {
                    if args.len() != op.arity() {
                        return Err(Error::Compile(format!(
                            "`{}` applied to {} arguments",
                            op.name(),
                            args.len()
                        )));
                    }
                    if args.iter().any(|&a| a >= i) {
                        return Err(Error::Compile(format!(
                            "step {i} references a later slot"
                        )));
                    }
                }
                _ => {}
            }
        }
        if let Some(&bad) = outputs.iter().find(|&&o| o >= steps.len()) {
            return Err(Error::Compile(format!("output slot {bad} out of range")));
        }
        Ok(Program {
            steps,
            outputs,
            n_inputs,
            nil_safe,
        })
    }

    /// Execute against the given arguments, in declared input order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compile`] when the argument count does not match the
    /// program's declared inputs.
    pub fn run(&self, args: &[Value]) -> Result<Vec<Value>> {
        if args.len() != self.n_inputs {
            return Err(Error::Compile(format!(
                "expected {} arguments, got {}",
                self.n_inputs,
                args.len()
            )));
        }
        let mut slots: Vec<Value> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let v = match step {
                Step::Input(i) => args[*i].clone(),
                Step::Const(v) => v.clone(),
                Step::Call { op, args: idx } => {
                    let operands: Vec<Value> = idx.iter().map(|&i| slots[i].clone()).collect();
                    if self.nil_safe && operands.iter().any(Value::is_nil) {
                        Value::Nil
                    } else {
                        op.apply(&operands)
                    }
                }
            };
            slots.push(v);
        }
        Ok(self.outputs.iter().map(|&i| slots[i].clone()).collect())
    }

    /// Execute and return the single output of a one-output program.
    ///
    /// # Errors
    ///
    /// As [`Program::run`], plus when the program has more than one output.
    pub fn run1(&self, args: &[Value]) -> Result<Value> {
        let mut out = self.run(args)?;
        match out.len() {
            1 => Ok(out.remove(0)),
            n => Err(Error::Compile(format!("expected 1 output, program has {n}"))),
        }
    }

    /// The ordered steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Output slot indices.
    #[must_use]
    pub fn outputs(&self) -> &[usize] {
        &self.outputs
    }

    /// Declared input count.
    #[must_use]
    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// Structural fingerprint over steps and outputs. Two programs with the
    /// same active structure hash equal regardless of inactive genome
    /// content.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.n_inputs.hash(&mut h);
        self.nil_safe.hash(&mut h);
        for step in &self.steps {
            match step {
                Step::Input(i) => {
                    0u8.hash(&mut h);
                    i.hash(&mut h);
                }
                Step::Const(v) => {
                    1u8.hash(&mut h);
                    hash_value(v, &mut h);
                }
                Step::Call { op, args } => {
                    2u8.hash(&mut h);
                    op.name().hash(&mut h);
                    args.hash(&mut h);
                }
            }
        }
        self.outputs.hash(&mut h);
        h.finish()
    }
}

fn hash_value(v: &Value, h: &mut DefaultHasher) {
    match v {
        Value::Int(i) => {
            0u8.hash(h);
            i.hash(h);
        }
        Value::Float(x) => {
            1u8.hash(h);
            x.to_bits().hash(h);
        }
        Value::Bool(b) => {
            2u8.hash(h);
            b.hash(h);
        }
        Value::Tag(s) => {
            3u8.hash(h);
            s.hash(h);
        }
        Value::Nil => 4u8.hash(h),
    }
}

/// Per-genome compilation cache: the compiled callable plus the fingerprint
/// it was built from. Excluded from genome equality and serialization.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    compiled: Option<Arc<Program>>,
    fingerprint: Option<u64>,
}

impl Cache {
    /// The cached callable, if any.
    #[must_use]
    pub fn compiled(&self) -> Option<Arc<Program>> {
        self.compiled.clone()
    }

    /// The fingerprint the cached callable was built from.
    #[must_use]
    pub fn fingerprint(&self) -> Option<u64> {
        self.fingerprint
    }

    /// Drop the cached program.
    pub fn invalidate(&mut self) {
        self.compiled = None;
        self.fingerprint = None;
    }

    /// Recache against a fingerprint computable without lowering (ICGP's
    /// output-ref set). Skips the build entirely on a fingerprint hit
    /// unless `force` is set.
    pub fn recache_keyed(
        &mut self,
        fp: u64,
        force: bool,
        build: impl FnOnce() -> Result<Program>,
    ) -> Result<Arc<Program>> {
        if !force && self.fingerprint == Some(fp) {
            if let Some(p) = &self.compiled {
                return Ok(p.clone());
            }
        }
        let program = Arc::new(build()?);
        self.compiled = Some(program.clone());
        self.fingerprint = Some(fp);
        Ok(program)
    }

    /// Recache from a freshly lowered program whose own fingerprint is the
    /// key (Tree/CGP). On a fingerprint hit the previously cached `Arc` is
    /// kept, preserving callable identity.
    pub fn recache_lowered(
        &mut self,
        force: bool,
        build: impl FnOnce() -> Result<Program>,
    ) -> Result<Arc<Program>> {
        let program = build()?;
        let fp = program.fingerprint();
        if !force && self.fingerprint == Some(fp) {
            if let Some(p) = &self.compiled {
                return Ok(p.clone());
            }
        }
        let program = Arc::new(program);
        self.compiled = Some(program.clone());
        self.fingerprint = Some(fp);
        Ok(program)
    }
}
