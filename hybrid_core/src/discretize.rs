//! Discretizer: collapse a hybrid graph's continuous content into a discrete
//! potential whose value per hypothesis is the least-squares residual energy.
//!
//! Unlike elimination, the value here is the raw `error`, not `exp(−error)`.
//! A hypothesis holding a null factor is emptied first, as in elimination, so
//! it scores `0.0`: the energy counterpart of the neutral potential `1.0`.

use crate::{
    decision_tree::DecisionTree,
    discrete::DecisionTreeFactor,
    error::Result,
    gaussian::GaussianFactorGraph,
    graph::HybridFactorGraph,
    sum::{sum, zero_out_infeasible},
};
use tracing::debug;

fn residual_energy(graph: &GaussianFactorGraph) -> Result<f64> {
    let graph = zero_out_infeasible(graph);
    let optimum = graph.optimize()?;
    graph.error(&optimum)
}

/// Solve every hypothesis of `graph` for its optimum and record the energy
/// there. The result is declared over all of the graph's discrete keys; a
/// graph without continuous content gives a constant 0.
pub fn to_discrete_potential(graph: &HybridFactorGraph) -> Result<DecisionTreeFactor> {
    let keys = graph.discrete_keys()?;
    let aggregate = sum(graph)?;
    if aggregate.is_empty() {
        return DecisionTreeFactor::new(keys, DecisionTree::leaf(0.0));
    }
    debug!(hypotheses = aggregate.len(), "discretizing continuous content");
    let energies = aggregate.try_map(residual_energy)?;
    DecisionTreeFactor::new(keys, energies)
}

impl HybridFactorGraph {
    /// See [`to_discrete_potential`].
    pub fn to_discrete_potential(&self) -> Result<DecisionTreeFactor> {
        to_discrete_potential(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::HybridError,
        eliminate::{eliminate_hybrid, HybridResidual},
        gaussian::{GaussianFactor, JacobianFactor},
        mixture::MixtureFactor,
        types::{Assignment, DMat, DVec, DiscreteKey, DiscreteKeys},
    };
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn two_reads(b: &[f64]) -> JacobianFactor {
        JacobianFactor::new(
            vec![(1, DMat::from_column_slice(2, 1, &[1.0, 1.0]))],
            DVec::from_column_slice(b),
        )
        .unwrap()
    }

    #[test]
    fn keyless_aggregate_gives_one_leaf_with_residual_energy() {
        let mut graph = HybridFactorGraph::new();
        graph.push(two_reads(&[0.0, 4.0]));
        let potential = graph.to_discrete_potential().unwrap();
        assert!(potential.keys().is_empty());
        assert_eq!(potential.tree().len(), 1);
        assert_abs_diff_eq!(potential.value(&Assignment::new()).unwrap(), 4.0, epsilon = 1e-10);
    }

    #[test]
    fn energies_per_hypothesis_are_raw_errors() {
        let mut graph = HybridFactorGraph::new();
        graph.push(
            MixtureFactor::from_components(
                vec![1],
                DiscreteKey::new(10, 2),
                vec![two_reads(&[1.0, 1.0]).into(), two_reads(&[0.0, 4.0]).into()],
            )
            .unwrap(),
        );
        let potential = to_discrete_potential(&graph).unwrap();
        let leaves = potential.tree().leaves();
        assert_abs_diff_eq!(leaves[0], 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(leaves[1], 4.0, epsilon = 1e-10);
    }

    #[test]
    fn declared_keys_include_purely_discrete_ones() {
        let mut graph = HybridFactorGraph::new();
        graph.push(two_reads(&[0.0, 2.0]));
        graph.push(
            DecisionTreeFactor::from_values(
                DiscreteKeys::from_keys([DiscreteKey::new(30, 3)]).unwrap(),
                vec![0.2, 0.3, 0.5],
            )
            .unwrap(),
        );
        let potential = to_discrete_potential(&graph).unwrap();
        assert_eq!(potential.keys().keys().collect::<Vec<_>>(), vec![30]);
        let a: Assignment = [(30, 2)].into_iter().collect();
        assert_abs_diff_eq!(potential.value(&a).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn null_hypothesis_scores_like_the_neutral_potential() {
        // m10 = 0 fits, m10 = 1 is a null component; a plain factor is shared
        let tree = DecisionTree::from_leaves(
            DiscreteKeys::from_keys([DiscreteKey::new(10, 2)]).unwrap(),
            vec![Some(Arc::new(GaussianFactor::from(two_reads(&[1.0, 1.0])))), None],
        )
        .unwrap();
        let mut graph = HybridFactorGraph::new();
        graph.push(MixtureFactor::new(vec![1], &DiscreteKeys::new(), tree).unwrap());
        graph.push(two_reads(&[0.0, 4.0]));

        let energies = to_discrete_potential(&graph).unwrap();
        let leaves = energies.tree().leaves();
        assert!(leaves[1] == 0.0 && leaves[1].is_sign_positive());

        // same convention as elimination: potential = exp(−energy)
        let (_, residual) = eliminate_hybrid(&graph, &[1]).unwrap();
        let HybridResidual::Discrete(potential) = residual else {
            panic!("expected a discrete potential");
        };
        for (energy, p) in leaves.iter().zip(potential.tree().leaves()) {
            assert_abs_diff_eq!((-energy).exp(), *p, epsilon = 1e-10);
        }
    }

    #[test]
    fn singular_hypothesis_propagates() {
        let mut graph = HybridFactorGraph::new();
        graph.push(JacobianFactor::new(vec![(1, DMat::zeros(1, 1))], DVec::from_element(1, 1.0)).unwrap());
        assert!(matches!(
            to_discrete_potential(&graph),
            Err(HybridError::SingularSystem(_))
        ));
    }
}
