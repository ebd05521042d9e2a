//! Error types for the genetic-programming engine.

use crate::value::Type;
use std::fmt;

/// Errors raised by language construction, variation and compilation.
///
/// Variation operators treat `NoTypedNode` and `NoCompatibleOutput` as
/// recoverable: the mutation becomes a no-op and the genome is returned
/// unchanged. `InvalidLanguage` and `Compile` are fatal for the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed operator spec at language construction.
    InvalidLanguage(String),
    /// Variation could not find a type-compatible link after bounded retries.
    NoTypedNode,
    /// Output initialisation or remap found no node of a compatible type.
    NoCompatibleOutput {
        /// Output index that could not be (re)pointed.
        index: usize,
        /// The declared output type that no node satisfies.
        wanted: Type,
    },
    /// A genome violated a type or arity invariant at compile time.
    Compile(String),
    /// A user fitness callback failed.
    Fitness(String),
    /// Two genomes cannot be combined (mismatched signatures).
    Incompatible(String),
    /// A declared but unimplemented protocol.
    Unimplemented(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLanguage(msg) => write!(f, "invalid language: {msg}"),
            Error::NoTypedNode => {
                write!(f, "no type-compatible node available for a random link")
            }
            Error::NoCompatibleOutput { index, wanted } => {
                write!(f, "no node compatible with output {index} of type {wanted}")
            }
            Error::Compile(msg) => write!(f, "compile error: {msg}"),
            Error::Fitness(msg) => write!(f, "fitness error: {msg}"),
            Error::Incompatible(msg) => write!(f, "incompatible genomes: {msg}"),
            Error::Unimplemented(what) => write!(f, "{what} is not implemented"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
