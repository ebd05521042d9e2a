//! The operator vocabulary a genome draws from.
//!
//! A language is an immutable sequence of operator specs, validated at
//! construction. Variation operators use it for random entry selection;
//! the compiler resolves function names against the primitive table.

use crate::error::{Error, Result};
use crate::ops::Op;
use crate::value::{Type, Value};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One language entry: a callable function or an inlined constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpSpec {
    /// A named function with a return type and argument types.
    Func {
        /// Symbol resolved against the primitive table.
        name: String,
        /// Return type.
        ret: Type,
        /// Argument types; arity is their count.
        args: Vec<Type>,
    },
    /// A constant value of a declared type.
    Const {
        /// The constant.
        value: Value,
        /// Its declared type.
        ty: Type,
    },
}

impl OpSpec {
    /// Function spec shorthand.
    #[must_use]
    pub fn func(name: &str, ret: Type, args: Vec<Type>) -> Self {
        OpSpec::Func {
            name: name.to_string(),
            ret,
            args,
        }
    }

    /// Constant spec shorthand.
    #[must_use]
    pub fn constant(value: Value, ty: Type) -> Self {
        OpSpec::Const { value, ty }
    }

    /// The type a node built from this entry produces.
    #[must_use]
    pub fn ret_type(&self) -> &Type {
        match self {
            OpSpec::Func { ret, .. } => ret,
            OpSpec::Const { ty, .. } => ty,
        }
    }

    /// Argument count (zero for constants).
    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            OpSpec::Func { args, .. } => args.len(),
            OpSpec::Const { .. } => 0,
        }
    }
}

/// An immutable, validated operator vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Language {
    entries: Vec<OpSpec>,
}

impl Language {
    /// Validate and build a language.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLanguage`] when the entry list is empty, a
    /// function name does not resolve to a primitive, a declared arity
    /// disagrees with the primitive's, or a constant does not inhabit its
    /// declared type.
    pub fn new(entries: Vec<OpSpec>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::InvalidLanguage("no entries".to_string()));
        }
        for entry in &entries {
            match entry {
                OpSpec::Func { name, args, .. } => {
                    let op = Op::resolve(name).ok_or_else(|| {
                        Error::InvalidLanguage(format!("unknown operator `{name}`"))
                    })?;
                    if op.arity() != args.len() {
                        return Err(Error::InvalidLanguage(format!(
                            "`{name}` takes {} arguments, {} declared",
                            op.arity(),
                            args.len()
                        )));
                    }
                }
                OpSpec::Const { value, ty } => {
                    if !value.conforms_to(ty) {
                        return Err(Error::InvalidLanguage(format!(
                            "constant {value} does not inhabit type {ty}"
                        )));
                    }
                }
            }
        }
        Ok(Language { entries })
    }

    /// All entries, in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[OpSpec] {
        &self.entries
    }

    /// Uniform random entry.
    pub fn rand_entry<R: Rng>(&self, rng: &mut R) -> &OpSpec {
        &self.entries[rng.gen_range(0..self.entries.len())]
    }

    /// Uniform random entry whose return type is compatible with `wanted`,
    /// or `None` when the language has no such entry.
    pub fn rand_entry_returning<R: Rng>(&self, wanted: &Type, rng: &mut R) -> Option<&OpSpec> {
        let matching: Vec<&OpSpec> = self
            .entries
            .iter()
            .filter(|e| e.ret_type().is_subtype_of(wanted))
            .collect();
        if matching.is_empty() {
            None
        } else {
            Some(matching[rng.gen_range(0..matching.len())])
        }
    }

    /// Whether every return and argument type in the language is the same
    /// single type. CGP genomes require this, since their back-link
    /// selection is untyped.
    #[must_use]
    pub fn is_homogeneous(&self) -> bool {
        let mut types = self.entries.iter().flat_map(|e| {
            let args: &[Type] = match e {
                OpSpec::Func { args, .. } => args,
                OpSpec::Const { .. } => &[],
            };
            std::iter::once(e.ret_type()).chain(args.iter())
        });
        let Some(first) = types.next() else {
            return true;
        };
        types.all(|t| t == first)
    }

    /// Float arithmetic: `abs add mul sub div mod min max if<` plus the
    /// constant `0.0`.
    #[must_use]
    pub fn float_arithmetic() -> Language {
        let f = Type::Float;
        let bin = vec![f.clone(), f.clone()];
        Language {
            entries: vec![
                OpSpec::func("abs", f.clone(), vec![f.clone()]),
                OpSpec::func("add", f.clone(), bin.clone()),
                OpSpec::func("mul", f.clone(), bin.clone()),
                OpSpec::func("sub", f.clone(), bin.clone()),
                OpSpec::func("div", f.clone(), bin.clone()),
                OpSpec::func("mod", f.clone(), bin.clone()),
                OpSpec::func("min", f.clone(), bin.clone()),
                OpSpec::func("max", f.clone(), bin),
                OpSpec::func(
                    "if<",
                    f.clone(),
                    vec![f.clone(), f.clone(), f.clone(), f.clone()],
                ),
                OpSpec::constant(Value::Float(0.0), f),
            ],
        }
    }

    /// Boolean logic: `and or nand nor`.
    #[must_use]
    pub fn boolean_logic() -> Language {
        let b = Type::Bool;
        let bin = vec![b.clone(), b.clone()];
        Language {
            entries: vec![
                OpSpec::func("and", b.clone(), bin.clone()),
                OpSpec::func("or", b.clone(), bin.clone()),
                OpSpec::func("nand", b.clone(), bin.clone()),
                OpSpec::func("nor", b, bin),
            ],
        }
    }

    /// Integer arithmetic: `add sub mul quot mod` plus the constants 0 and 1.
    #[must_use]
    pub fn integer_arithmetic() -> Language {
        let i = Type::Int;
        let bin = vec![i.clone(), i.clone()];
        Language {
            entries: vec![
                OpSpec::func("add", i.clone(), bin.clone()),
                OpSpec::func("sub", i.clone(), bin.clone()),
                OpSpec::func("mul", i.clone(), bin.clone()),
                OpSpec::func("quot", i.clone(), bin.clone()),
                OpSpec::func("mod", i.clone(), bin),
                OpSpec::constant(Value::Int(0), i.clone()),
                OpSpec::constant(Value::Int(1), i),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_empty_language_rejected() {
        assert!(matches!(
            Language::new(Vec::new()),
            Err(Error::InvalidLanguage(_))
        ));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = Language::new(vec![OpSpec::func("frobnicate", Type::Int, vec![])]);
        assert!(matches!(err, Err(Error::InvalidLanguage(_))));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let err = Language::new(vec![OpSpec::func("add", Type::Int, vec![Type::Int])]);
        assert!(matches!(err, Err(Error::InvalidLanguage(_))));
    }

    #[test]
    fn test_bad_constant_rejected() {
        let err = Language::new(vec![OpSpec::constant(Value::Int(1), Type::Float)]);
        assert!(matches!(err, Err(Error::InvalidLanguage(_))));
    }

    #[test]
    fn test_builtin_vocabularies_valid() {
        for lang in [
            Language::float_arithmetic(),
            Language::boolean_logic(),
            Language::integer_arithmetic(),
        ] {
            assert!(Language::new(lang.entries().to_vec()).is_ok());
            assert!(lang.is_homogeneous());
        }
    }

    #[test]
    fn test_typed_random_selection() {
        let mut rng = SmallRng::seed_from_u64(7);
        let lang = Language::float_arithmetic();
        for _ in 0..50 {
            let entry = lang.rand_entry_returning(&Type::Float, &mut rng).unwrap();
            assert!(entry.ret_type().is_subtype_of(&Type::Float));
        }
        assert!(lang.rand_entry_returning(&Type::Bool, &mut rng).is_none());
    }

    #[test]
    fn test_heterogeneous_detection() {
        let lang = Language::new(vec![
            OpSpec::func("lt", Type::Bool, vec![Type::Int, Type::Int]),
            OpSpec::constant(Value::Int(0), Type::Int),
        ])
        .unwrap();
        assert!(!lang.is_homogeneous());
    }
}
