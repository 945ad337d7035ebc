//! Hybrid Bayes net: the conditionals produced by eliminating a hybrid graph
//! block by block, and MPE back-substitution over them.

use crate::{
    cholesky::ContinuousEliminator,
    discrete::DiscreteEliminator,
    eliminate::{HybridConditional, HybridEliminator},
    error::{HybridError, Result},
    gaussian::VectorValues,
    graph::HybridFactorGraph,
    types::{symbol_key_formatter, Assignment, Key, KeyFormatter},
};
use tracing::debug;

/// Conditionals in elimination order.
#[derive(Clone, Debug, Default)]
pub struct HybridBayesNet {
    conditionals: Vec<HybridConditional>,
}

/// Most probable discrete assignment and the continuous values under it.
#[derive(Clone, Debug, Default)]
pub struct HybridValues {
    pub discrete: Assignment,
    pub continuous: VectorValues,
}

impl HybridBayesNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, conditional: HybridConditional) {
        self.conditionals.push(conditional);
    }

    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HybridConditional> {
        self.conditionals.iter()
    }

    /// Walk the conditionals last-eliminated first. Discrete conditionals fix
    /// their frontals by argmax; mixture conditionals pick the Gaussian
    /// conditional for the fixed modes and back-substitute it.
    ///
    /// Fails with `Infeasible` when the chosen modes select a null
    /// conditional, or `UnknownKey` when a mixture's modes are not fixed yet
    /// (i.e. its discrete keys were never eliminated).
    pub fn optimize(&self) -> Result<HybridValues> {
        let mut values = HybridValues::default();
        for conditional in self.conditionals.iter().rev() {
            match conditional {
                HybridConditional::Discrete(c) => {
                    let best = c.argmax(&values.discrete);
                    values.discrete.merge(&best);
                }
                HybridConditional::Mixture(m) => {
                    if let Some(missing) = m.discrete_keys().keys().find(|k| values.discrete.get(*k).is_none()) {
                        return Err(HybridError::UnknownKey(missing));
                    }
                    let gaussian = m.conditional(&values.discrete).ok_or_else(|| {
                        HybridError::Infeasible(values.discrete.format(symbol_key_formatter))
                    })?;
                    let solved = gaussian.solve(&values.continuous)?;
                    values.continuous.merge(solved);
                }
            }
        }
        Ok(values)
    }

    pub fn print(&self, title: &str, formatter: KeyFormatter) -> String {
        let mut out = String::new();
        if !title.is_empty() {
            out.push_str(title);
            out.push('\n');
        }
        out.push_str(&format!("HybridBayesNet of size {}\n", self.len()));
        for (i, c) in self.conditionals.iter().enumerate() {
            out.push_str(&format!("  conditional {}: {}\n", i, c.format(formatter)));
        }
        out
    }
}

/// Eliminate `blocks` in turn. Each block takes the factors that mention one
/// of its keys; the conditional goes into the Bayes net and the residual back
/// into the graph. Returns the Bayes net and whatever was not eliminated.
pub fn eliminate_sequential<C, D>(
    graph: &HybridFactorGraph,
    blocks: &[Vec<Key>],
    eliminator: &HybridEliminator<C, D>,
) -> Result<(HybridBayesNet, HybridFactorGraph)>
where
    C: ContinuousEliminator,
    D: DiscreteEliminator,
{
    let mut remaining = graph.clone();
    let mut net = HybridBayesNet::new();
    for (step, block) in blocks.iter().enumerate() {
        let (involved, rest) = remaining.partition(block);
        debug!(step, keys = ?block, factors = involved.len(), "eliminating block");
        let (conditional, residual) = eliminator.eliminate(&involved, block)?;
        net.push(conditional);
        remaining = rest;
        remaining.push(residual);
    }
    Ok((net, remaining))
}
