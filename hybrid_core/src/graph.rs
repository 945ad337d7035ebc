//! Hybrid factor graph: discrete factors, plain Gaussian factors and mixture
//! factors sharing one key namespace.

use crate::{
    discrete::DecisionTreeFactor,
    error::Result,
    gaussian::{GaussianFactor, JacobianFactor},
    mixture::MixtureFactor,
    types::{symbol_key_formatter, DiscreteKeys, Key, KeyFormatter},
};
use std::{collections::BTreeSet, fmt, sync::Arc};

// ---------------------------------------------------------------------------
// HybridFactor
// ---------------------------------------------------------------------------

/// Any factor a hybrid graph can hold. The variant is fixed at construction.
#[derive(Clone, Debug)]
pub enum HybridFactor {
    Discrete(DecisionTreeFactor),
    Gaussian(Arc<GaussianFactor>),
    Mixture(MixtureFactor),
}

impl HybridFactor {
    pub fn kind(&self) -> &'static str {
        match self {
            HybridFactor::Discrete(_) => "discrete",
            HybridFactor::Gaussian(_) => "Gaussian",
            HybridFactor::Mixture(_) => "mixture",
        }
    }

    pub fn continuous_keys(&self) -> &[Key] {
        match self {
            HybridFactor::Discrete(_) => &[],
            HybridFactor::Gaussian(f) => f.keys(),
            HybridFactor::Mixture(m) => m.continuous_keys(),
        }
    }

    pub fn discrete_keys(&self) -> DiscreteKeys {
        match self {
            HybridFactor::Discrete(f) => f.keys().clone(),
            HybridFactor::Gaussian(_) => DiscreteKeys::new(),
            HybridFactor::Mixture(m) => m.discrete_keys().clone(),
        }
    }

    /// True if any continuous or discrete key of this factor is in `keys`.
    pub fn involves(&self, keys: &[Key]) -> bool {
        self.continuous_keys().iter().any(|k| keys.contains(k))
            || self.discrete_keys().keys().any(|k| keys.contains(&k))
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        match self {
            HybridFactor::Discrete(f) => f.format(formatter),
            HybridFactor::Gaussian(f) => f.format(formatter),
            HybridFactor::Mixture(m) => m.format(formatter),
        }
    }
}

impl From<DecisionTreeFactor> for HybridFactor {
    fn from(f: DecisionTreeFactor) -> Self {
        HybridFactor::Discrete(f)
    }
}

impl From<GaussianFactor> for HybridFactor {
    fn from(f: GaussianFactor) -> Self {
        HybridFactor::Gaussian(Arc::new(f))
    }
}

impl From<JacobianFactor> for HybridFactor {
    fn from(f: JacobianFactor) -> Self {
        HybridFactor::Gaussian(Arc::new(f.into()))
    }
}

impl From<MixtureFactor> for HybridFactor {
    fn from(m: MixtureFactor) -> Self {
        HybridFactor::Mixture(m)
    }
}

// ---------------------------------------------------------------------------
// HybridFactorGraph
// ---------------------------------------------------------------------------

/// Three sub-collections: discrete factors, plain Gaussian factors and the
/// discrete-continuous (mixture) slot.
#[derive(Clone, Debug, Default)]
pub struct HybridFactorGraph {
    discrete: Vec<DecisionTreeFactor>,
    gaussian: Vec<Arc<GaussianFactor>>,
    dc: Vec<HybridFactor>,
}

impl HybridFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factor to the sub-collection matching its variant.
    pub fn push(&mut self, factor: impl Into<HybridFactor>) {
        match factor.into() {
            HybridFactor::Discrete(f) => self.discrete.push(f),
            HybridFactor::Gaussian(f) => self.gaussian.push(f),
            mixture @ HybridFactor::Mixture(_) => self.dc.push(mixture),
        }
    }

    /// Add a factor straight to the discrete-continuous slot, without routing.
    /// Only mixtures belong there; anything else makes [`crate::sum::sum`]
    /// fail with `TypeMismatch`.
    pub fn push_dc(&mut self, factor: HybridFactor) {
        self.dc.push(factor);
    }

    pub fn discrete_factors(&self) -> &[DecisionTreeFactor] {
        &self.discrete
    }

    pub fn gaussian_factors(&self) -> &[Arc<GaussianFactor>] {
        &self.gaussian
    }

    pub fn dc_factors(&self) -> &[HybridFactor] {
        &self.dc
    }

    pub fn len(&self) -> usize {
        self.discrete.len() + self.gaussian.len() + self.dc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every factor, discrete first, then the mixture slot, then Gaussian.
    pub fn factors(&self) -> impl Iterator<Item = HybridFactor> + '_ {
        self.discrete
            .iter()
            .cloned()
            .map(HybridFactor::Discrete)
            .chain(self.dc.iter().cloned())
            .chain(self.gaussian.iter().cloned().map(HybridFactor::Gaussian))
    }

    /// Sorted union of the discrete keys of discrete and mixture factors.
    pub fn discrete_keys(&self) -> Result<DiscreteKeys> {
        let mut keys = DiscreteKeys::new();
        for f in &self.discrete {
            keys = keys.union(f.keys())?;
        }
        for f in &self.dc {
            keys = keys.union(&f.discrete_keys())?;
        }
        Ok(keys)
    }

    /// Union of the continuous keys of Gaussian and mixture factors.
    pub fn continuous_keys(&self) -> BTreeSet<Key> {
        self.gaussian
            .iter()
            .flat_map(|f| f.keys().iter().copied())
            .chain(
                self.dc
                    .iter()
                    .flat_map(|f| f.continuous_keys().iter().copied()),
            )
            .collect()
    }

    /// Split into (factors involving any of `keys`, everything else).
    pub fn partition(&self, keys: &[Key]) -> (HybridFactorGraph, HybridFactorGraph) {
        let mut involved = HybridFactorGraph::new();
        let mut rest = HybridFactorGraph::new();
        for f in &self.discrete {
            let target = if f.keys().keys().any(|k| keys.contains(&k)) {
                &mut involved
            } else {
                &mut rest
            };
            target.discrete.push(f.clone());
        }
        for f in &self.gaussian {
            let target = if f.keys().iter().any(|k| keys.contains(k)) {
                &mut involved
            } else {
                &mut rest
            };
            target.gaussian.push(f.clone());
        }
        for f in &self.dc {
            let target = if f.involves(keys) {
                &mut involved
            } else {
                &mut rest
            };
            target.dc.push(f.clone());
        }
        (involved, rest)
    }

    /// Textual dump of the graph structure, for debugging.
    pub fn print(&self, title: &str, formatter: KeyFormatter) -> String {
        let mut out = String::new();
        if !title.is_empty() {
            out.push_str(title);
            out.push('\n');
        }
        out.push_str(&format!(
            "HybridFactorGraph: {} discrete, {} mixture, {} Gaussian\n",
            self.discrete.len(),
            self.dc.len(),
            self.gaussian.len()
        ));
        for (i, f) in self.discrete.iter().enumerate() {
            out.push_str(&format!("  factor {}: {}\n", i, f.format(formatter)));
        }
        for (i, f) in self.dc.iter().enumerate() {
            out.push_str(&format!(
                "  factor {}: {}\n",
                self.discrete.len() + i,
                f.format(formatter)
            ));
        }
        out.push_str("GaussianGraph\n");
        for (i, f) in self.gaussian.iter().enumerate() {
            out.push_str(&format!("  factor {}: {}\n", i, f.format(formatter)));
        }
        out
    }
}

impl fmt::Display for HybridFactorGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print("", symbol_key_formatter))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
