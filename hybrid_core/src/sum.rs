//! Aggregate combinator: fold a hybrid graph's continuous content into one
//! decision tree of Gaussian factor collections, one collection per discrete
//! hypothesis.
//!
//! Invariant: the aggregate's discrete keys are exactly the union of the
//! discrete keys of every mixture folded in so far. An empty aggregate (no
//! leaves) means no continuous content at all; a keyless single leaf means
//! continuous content but no mixtures yet.

use crate::{
    decision_tree::DecisionTree,
    error::{HybridError, Result},
    gaussian::{GaussianFactorGraph, GaussianFactorHandle},
    graph::{HybridFactor, HybridFactorGraph},
    mixture::MixtureFactor,
};

/// Decision tree mapping each hypothesis to its Gaussian factor collection.
pub type Sum = DecisionTree<GaussianFactorGraph>;

/// Broadcast-append `factor` to every leaf. Keys and leaf count never change,
/// except that an empty aggregate becomes a single keyless leaf.
pub fn fold_plain(sum: &Sum, factor: &GaussianFactorHandle) -> Sum {
    if sum.is_empty() {
        return DecisionTree::leaf(GaussianFactorGraph::from_handles(vec![factor.clone()]));
    }
    sum.map(|graph| {
        let mut graph = graph.clone();
        graph.push(factor.clone());
        graph
    })
}

/// Join `sum` with the mixture over the union of their discrete keys; each
/// new leaf is the old collection followed by the mixture's component for
/// that assignment. Null components are appended as null handles so the
/// hypothesis is later recognised as infeasible.
pub fn fold_mixture(sum: &Sum, mixture: &MixtureFactor) -> Result<Sum> {
    if sum.is_empty() {
        return Ok(mixture
            .factors()
            .map(|f| GaussianFactorGraph::from_handles(vec![f.clone()])));
    }
    sum.join(mixture.factors(), |graph, factor| {
        let mut graph = graph.clone();
        graph.push(factor.clone());
        graph
    })
}

/// Fold every mixture factor, then every plain Gaussian factor, of `graph`.
pub fn sum(graph: &HybridFactorGraph) -> Result<Sum> {
    let mut acc = Sum::empty();
    for (index, factor) in graph.dc_factors().iter().enumerate() {
        match factor {
            HybridFactor::Mixture(mixture) => acc = fold_mixture(&acc, mixture)?,
            other => {
                return Err(HybridError::TypeMismatch {
                    index,
                    found: other.kind(),
                })
            }
        }
    }
    for factor in graph.gaussian_factors() {
        acc = fold_plain(&acc, &Some(factor.clone()));
    }
    Ok(acc)
}

/// A hypothesis holding a null factor carries no information: its collection
/// is replaced by an empty one.
pub(crate) fn zero_out_infeasible(graph: &GaussianFactorGraph) -> GaussianFactorGraph {
    if graph.has_null() {
        GaussianFactorGraph::new()
    } else {
        graph.clone()
    }
}

impl HybridFactorGraph {
    /// See [`sum`].
    pub fn sum(&self) -> Result<Sum> {
        sum(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
