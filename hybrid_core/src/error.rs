//! Error types for hybrid elimination.

use crate::types::Key;
use thiserror::Error;

/// Everything that can abort an elimination or a solve.
#[derive(Debug, Error)]
pub enum HybridError {
    /// An element of the mixture sub-collection is not a Gaussian mixture.
    #[error("type mismatch: mixture slot {index} holds a {found} factor, expected a Gaussian mixture")]
    TypeMismatch { index: usize, found: &'static str },

    /// A linear system could not be factored (not positive definite).
    #[error("singular system: {0}")]
    SingularSystem(String),

    /// A key was requested that no factor mentions.
    #[error("key {0} is not involved in any factor")]
    UnknownKey(Key),

    /// Two factors (or a factor and a value) disagree on a variable dimension.
    #[error("dimension mismatch for key {key}: expected {expected}, found {found}")]
    DimensionMismatch {
        key: Key,
        expected: usize,
        found: usize,
    },

    /// The same discrete key was declared with two cardinalities.
    #[error("discrete key {key} declared with cardinality {left} and {right}")]
    CardinalityMismatch { key: Key, left: usize, right: usize },

    /// A decision tree was built with the wrong number of leaves.
    #[error("decision tree needs {expected} leaves, got {found}")]
    LeafCountMismatch { expected: usize, found: usize },

    /// Hypotheses produced different frontal or separator key sets.
    #[error("hypotheses disagree on {which} keys: {first:?} vs {other:?}")]
    InconsistentKeySets {
        which: &'static str,
        first: Vec<Key>,
        other: Vec<Key>,
    },

    /// An elimination step was asked to eliminate no variables.
    #[error("elimination ordering is empty")]
    EmptyOrdering,

    /// No feasible conditional exists for the requested discrete assignment.
    #[error("no feasible conditional for assignment {0}")]
    Infeasible(String),
}

/// Result type alias for hybrid elimination.
pub type Result<T> = std::result::Result<T, HybridError>;
