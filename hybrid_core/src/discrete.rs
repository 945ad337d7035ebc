//! Discrete potentials and max-product (MPE) elimination.

use crate::{
    decision_tree::{assignments, DecisionTree},
    error::{HybridError, Result},
    types::{Assignment, DiscreteKeys, Key, KeyFormatter},
};

// ---------------------------------------------------------------------------
// DecisionTreeFactor
// ---------------------------------------------------------------------------

/// Unnormalised non-negative potential over discrete keys.
///
/// The declared key set may be larger than the set the tree branches on; the
/// potential is constant along the extra keys.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionTreeFactor {
    keys: DiscreteKeys,
    potentials: DecisionTree<f64>,
}

impl DecisionTreeFactor {
    pub fn new(keys: DiscreteKeys, potentials: DecisionTree<f64>) -> Result<Self> {
        let keys = keys.union(potentials.keys())?;
        Ok(Self { keys, potentials })
    }

    /// Potentials listed in mixed-radix order over `keys`.
    pub fn from_values(keys: DiscreteKeys, values: Vec<f64>) -> Result<Self> {
        let potentials = DecisionTree::from_leaves(keys.clone(), values)?;
        Ok(Self { keys, potentials })
    }

    pub fn constant(value: f64) -> Self {
        Self {
            keys: DiscreteKeys::new(),
            potentials: DecisionTree::leaf(value),
        }
    }

    pub fn keys(&self) -> &DiscreteKeys {
        &self.keys
    }

    pub fn tree(&self) -> &DecisionTree<f64> {
        &self.potentials
    }

    pub fn value(&self, assignment: &Assignment) -> Option<f64> {
        self.potentials.get(assignment).copied()
    }

    /// Pointwise product over the union of keys.
    pub fn product(&self, other: &DecisionTreeFactor) -> Result<DecisionTreeFactor> {
        Ok(Self {
            keys: self.keys.union(&other.keys)?,
            potentials: self.potentials.join(&other.potentials, |a, b| a * b)?,
        })
    }

    /// Maximise out `eliminated`, leaving a potential over the other keys.
    pub fn max_out(&self, eliminated: &[Key]) -> DecisionTreeFactor {
        let tree_keys = self.potentials.keys();
        let gone = tree_keys.only(eliminated);
        let kept = tree_keys.without(eliminated);

        let potentials = DecisionTree::from_fn(kept, |partial| {
            assignments(&gone)
                .filter_map(|mut full| {
                    full.merge(partial);
                    self.potentials.get(&full).copied()
                })
                .fold(f64::NEG_INFINITY, f64::max)
        });
        Self {
            keys: self.keys.without(eliminated),
            potentials,
        }
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        let leaves: Vec<String> = self
            .potentials
            .iter()
            .map(|(a, p)| format!("{} {:.6}", a.format(formatter), p))
            .collect();
        format!(
            "DecisionTreeFactor [{}] {{ {} }}",
            self.keys.format(formatter),
            leaves.join("; ")
        )
    }
}

// ---------------------------------------------------------------------------
// DiscreteConditional
// ---------------------------------------------------------------------------

/// Max-normalised table `p(frontals | parents)`: for every parent assignment
/// the best frontal assignment scores exactly 1.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteConditional {
    frontals: DiscreteKeys,
    parents: DiscreteKeys,
    table: DecisionTree<f64>,
}

impl DiscreteConditional {
    pub fn new(frontals: DiscreteKeys, parents: DiscreteKeys, table: DecisionTree<f64>) -> Self {
        Self {
            frontals,
            parents,
            table,
        }
    }

    pub fn nr_frontals(&self) -> usize {
        self.frontals.len()
    }

    pub fn frontals(&self) -> &DiscreteKeys {
        &self.frontals
    }

    pub fn parents(&self) -> &DiscreteKeys {
        &self.parents
    }

    pub fn table(&self) -> &DecisionTree<f64> {
        &self.table
    }

    /// Best frontal assignment given `parents` (first one on ties).
    pub fn argmax(&self, parents: &Assignment) -> Assignment {
        let mut best = Assignment::new();
        let mut best_value = f64::NEG_INFINITY;
        for frontal in assignments(&self.frontals) {
            let mut full = parents.clone();
            full.merge(&frontal);
            let value = self.table.get(&full).copied().unwrap_or(0.0);
            if value > best_value {
                best_value = value;
                best = frontal;
            }
        }
        best
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        if self.parents.is_empty() {
            format!("P({})", self.frontals.format(formatter))
        } else {
            format!(
                "P({} | {})",
                self.frontals.format(formatter),
                self.parents.format(formatter)
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Eliminates discrete keys from a set of discrete factors.
pub trait DiscreteEliminator: Send + Sync {
    fn eliminate(
        &self,
        factors: &[DecisionTreeFactor],
        ordering: &[Key],
    ) -> Result<(DiscreteConditional, DecisionTreeFactor)>;
}

/// Max-product elimination: tracks the most probable explanation.
#[derive(Clone, Copy, Debug, Default)]
pub struct MpeEliminator;

impl DiscreteEliminator for MpeEliminator {
    fn eliminate(
        &self,
        factors: &[DecisionTreeFactor],
        ordering: &[Key],
    ) -> Result<(DiscreteConditional, DecisionTreeFactor)> {
        let product = factors
            .iter()
            .try_fold(DecisionTreeFactor::constant(1.0), |acc, f| acc.product(f))?;

        let mut frontals = DiscreteKeys::new();
        for key in ordering {
            let dk = product.keys().get(*key).ok_or(HybridError::UnknownKey(*key))?;
            frontals.insert(*dk)?;
        }
        let parents = product.keys().without(ordering);

        let max = product.max_out(ordering);
        let table = product
            .tree()
            .join(max.tree(), |p, m| if *m > 0.0 { p / m } else { 0.0 })?;

        Ok((DiscreteConditional::new(frontals, parents, table), max))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
