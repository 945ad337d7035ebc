//! Mixture factors and mixture conditionals: continuous content indexed by a
//! discrete assignment.

use crate::{
    cholesky::GaussianConditional,
    decision_tree::DecisionTree,
    error::Result,
    gaussian::{GaussianFactor, GaussianFactorHandle, VectorValues},
    types::{Assignment, DiscreteKey, DiscreteKeys, Key, KeyFormatter},
};
use std::sync::Arc;

/// Stretch `tree` so it branches on every key of `declared` (leaves repeat
/// along keys the tree did not depend on).
fn broadcast<V: Clone>(tree: DecisionTree<V>, declared: &DiscreteKeys) -> Result<DecisionTree<V>> {
    if declared.iter().all(|dk| tree.keys().contains(dk.key)) {
        return Ok(tree);
    }
    let axes = DecisionTree::from_fn(declared.clone(), |_| ());
    tree.join(&axes, |leaf, _| leaf.clone())
}

// ---------------------------------------------------------------------------
// MixtureFactor
// ---------------------------------------------------------------------------

/// A continuous factor whose content depends on discrete variables: one
/// factor (or a null marker) per assignment of its discrete keys.
#[derive(Clone, Debug)]
pub struct MixtureFactor {
    continuous_keys: Vec<Key>,
    factors: DecisionTree<GaussianFactorHandle>,
}

impl MixtureFactor {
    /// `discrete_keys` may list keys the tree does not branch on; the tree is
    /// broadcast over them so the mixture's key set is exactly
    /// `discrete_keys ∪ factors.keys()`.
    pub fn new(
        continuous_keys: Vec<Key>,
        discrete_keys: &DiscreteKeys,
        factors: DecisionTree<GaussianFactorHandle>,
    ) -> Result<Self> {
        let factors = broadcast(factors, discrete_keys)?;
        Ok(Self {
            continuous_keys,
            factors,
        })
    }

    /// One component per value of a single discrete key, in value order.
    pub fn from_components(
        continuous_keys: Vec<Key>,
        mode: DiscreteKey,
        components: Vec<GaussianFactor>,
    ) -> Result<Self> {
        let keys = DiscreteKeys::from_keys([mode])?;
        let leaves = components
            .into_iter()
            .map(|f| Some(Arc::new(f)))
            .collect();
        let factors = DecisionTree::from_leaves(keys, leaves)?;
        Ok(Self {
            continuous_keys,
            factors,
        })
    }

    pub fn continuous_keys(&self) -> &[Key] {
        &self.continuous_keys
    }

    pub fn discrete_keys(&self) -> &DiscreteKeys {
        self.factors.keys()
    }

    pub fn factors(&self) -> &DecisionTree<GaussianFactorHandle> {
        &self.factors
    }

    /// Component selected by `assignment`; `None` when the assignment does not
    /// cover the discrete keys or the component is null.
    pub fn factor(&self, assignment: &Assignment) -> Option<&Arc<GaussianFactor>> {
        self.factors.get(assignment).and_then(Option::as_ref)
    }

    /// Error of the selected component at `continuous`; `None` when no
    /// component is selected.
    pub fn error(&self, continuous: &VectorValues, discrete: &Assignment) -> Result<Option<f64>> {
        self.factor(discrete).map(|f| f.error(continuous)).transpose()
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        let keys: Vec<String> = self.continuous_keys.iter().map(|k| formatter(*k)).collect();
        let mut out = format!(
            "MixtureFactor [{}; {}]",
            keys.join(" "),
            self.discrete_keys().format(formatter)
        );
        for (assignment, leaf) in self.factors.iter() {
            let body = match leaf {
                Some(f) => f.format(formatter),
                None => "null".to_string(),
            };
            out.push_str(&format!("\n    {} -> {}", assignment.format(formatter), body));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// GaussianMixture
// ---------------------------------------------------------------------------

/// Conditional on the eliminated continuous variables, one Gaussian
/// conditional per discrete assignment (`None` for infeasible hypotheses).
#[derive(Clone, Debug)]
pub struct GaussianMixture {
    nr_frontals: usize,
    keys: Vec<Key>,
    discrete_keys: DiscreteKeys,
    conditionals: DecisionTree<Option<Arc<GaussianConditional>>>,
}

impl GaussianMixture {
    /// `keys` lists the `nr_frontals` eliminated variables first, then the
    /// separator.
    pub fn new(
        nr_frontals: usize,
        keys: Vec<Key>,
        discrete_keys: DiscreteKeys,
        conditionals: DecisionTree<Option<Arc<GaussianConditional>>>,
    ) -> Self {
        Self {
            nr_frontals,
            keys,
            discrete_keys,
            conditionals,
        }
    }

    pub fn nr_frontals(&self) -> usize {
        self.nr_frontals
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn frontals(&self) -> &[Key] {
        &self.keys[..self.nr_frontals.min(self.keys.len())]
    }

    pub fn parents(&self) -> &[Key] {
        &self.keys[self.nr_frontals.min(self.keys.len())..]
    }

    pub fn discrete_keys(&self) -> &DiscreteKeys {
        &self.discrete_keys
    }

    pub fn conditionals(&self) -> &DecisionTree<Option<Arc<GaussianConditional>>> {
        &self.conditionals
    }

    /// Conditional for `assignment`, if that hypothesis is feasible.
    pub fn conditional(&self, assignment: &Assignment) -> Option<&Arc<GaussianConditional>> {
        self.conditionals.get(assignment).and_then(Option::as_ref)
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        let frontals: Vec<String> = self.frontals().iter().map(|k| formatter(*k)).collect();
        let parents: Vec<String> = self.parents().iter().map(|k| formatter(*k)).collect();
        format!(
            "GaussianMixture p({} | {}; {}) with {} hypotheses",
            frontals.join(" "),
            parents.join(" "),
            self.discrete_keys.format(formatter),
            self.conditionals.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
