//! Hybrid elimination: eliminate a block of continuous variables once per
//! discrete hypothesis and repackage the results.
//!
//! # Steps per call
//! 1. Aggregate the graph's continuous content ([`crate::sum::sum`]).
//! 2. No continuous content → delegate to the discrete (MPE) eliminator.
//! 3. Hypotheses holding a null factor become empty collections.
//! 4. Run the continuous eliminator on every non-empty leaf.
//! 5. Read the frontal and separator key sets off the first feasible leaf.
//! 6. Unzip into a tree of conditionals and a tree of residual factors.
//! 7. Wrap the conditionals as a [`GaussianMixture`]; wrap the residuals as a
//!    discrete potential `exp(−error)` when no continuous separator remains,
//!    otherwise as a new [`MixtureFactor`] on the separator.
//!
//! Continuous variables must be eliminated before the discrete variables
//! their mixtures depend on.

use crate::{
    cholesky::{CholeskyEliminator, ContinuousEliminator, GaussianConditional},
    decision_tree::DecisionTree,
    discrete::{DecisionTreeFactor, DiscreteConditional, DiscreteEliminator, MpeEliminator},
    error::{HybridError, Result},
    gaussian::{GaussianFactorGraph, GaussianFactorHandle, VectorValues},
    graph::{HybridFactor, HybridFactorGraph},
    mixture::{GaussianMixture, MixtureFactor},
    sum::{sum, zero_out_infeasible},
    types::{Key, KeyFormatter},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for hybrid elimination. The defaults reproduce the plain
/// algorithm: serial, unchecked key sets, singular leaves abort the call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EliminationConfig {
    /// Eliminate hypotheses on the rayon pool.
    pub parallel: bool,
    /// Fail with `InconsistentKeySets` when feasible hypotheses disagree on
    /// their frontal or separator keys.
    pub validate_key_sets: bool,
    /// Treat a hypothesis whose system is singular as infeasible instead of
    /// aborting the whole elimination.
    pub singular_as_infeasible: bool,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Conditional produced by one elimination step.
#[derive(Clone, Debug)]
pub enum HybridConditional {
    Discrete(DiscreteConditional),
    Mixture(GaussianMixture),
}

impl HybridConditional {
    pub fn format(&self, formatter: KeyFormatter) -> String {
        match self {
            HybridConditional::Discrete(c) => c.format(formatter),
            HybridConditional::Mixture(c) => c.format(formatter),
        }
    }
}

/// Factor left on the remaining variables by one elimination step.
#[derive(Clone, Debug)]
pub enum HybridResidual {
    Discrete(DecisionTreeFactor),
    Mixture(MixtureFactor),
}

impl From<HybridResidual> for HybridFactor {
    fn from(residual: HybridResidual) -> Self {
        match residual {
            HybridResidual::Discrete(f) => HybridFactor::Discrete(f),
            HybridResidual::Mixture(m) => HybridFactor::Mixture(m),
        }
    }
}

impl HybridResidual {
    pub fn format(&self, formatter: KeyFormatter) -> String {
        match self {
            HybridResidual::Discrete(f) => f.format(formatter),
            HybridResidual::Mixture(m) => m.format(formatter),
        }
    }
}

/// Per-hypothesis outcome of continuous elimination; `(None, None)` for an
/// infeasible or empty hypothesis.
pub type EliminationPair = (Option<Arc<GaussianConditional>>, GaussianFactorHandle);

// ---------------------------------------------------------------------------
// Eliminator
// ---------------------------------------------------------------------------

/// Hybrid eliminator parameterised by its continuous and discrete oracles.
#[derive(Clone, Debug, Default)]
pub struct HybridEliminator<C = CholeskyEliminator, D = MpeEliminator> {
    pub config: EliminationConfig,
    continuous: C,
    discrete: D,
}

impl HybridEliminator {
    pub fn new(config: EliminationConfig) -> Self {
        Self {
            config,
            continuous: CholeskyEliminator,
            discrete: MpeEliminator,
        }
    }
}

impl<C: ContinuousEliminator, D: DiscreteEliminator> HybridEliminator<C, D> {
    pub fn with_oracles(config: EliminationConfig, continuous: C, discrete: D) -> Self {
        Self {
            config,
            continuous,
            discrete,
        }
    }

    /// Eliminate `ordering` from `graph`, returning the new conditional and
    /// the residual factor on whatever remains. An empty ordering fails with
    /// `EmptyOrdering`.
    pub fn eliminate(
        &self,
        graph: &HybridFactorGraph,
        ordering: &[Key],
    ) -> Result<(HybridConditional, HybridResidual)> {
        if ordering.is_empty() {
            return Err(HybridError::EmptyOrdering);
        }
        let aggregate = sum(graph)?;

        if aggregate.is_empty() {
            debug!(
                keys = ordering.len(),
                factors = graph.discrete_factors().len(),
                "no continuous content, eliminating discretely"
            );
            let (conditional, factor) = self
                .discrete
                .eliminate(graph.discrete_factors(), ordering)?;
            return Ok((
                HybridConditional::Discrete(conditional),
                HybridResidual::Discrete(factor),
            ));
        }

        let aggregate = aggregate.map(zero_out_infeasible);
        debug!(
            hypotheses = aggregate.len(),
            discrete_keys = aggregate.keys().len(),
            frontals = ordering.len(),
            parallel = self.config.parallel,
            "eliminating continuous block"
        );

        let results = if self.config.parallel {
            aggregate.par_try_map(|leaf| self.eliminate_leaf(leaf, ordering))?
        } else {
            aggregate.try_map(|leaf| self.eliminate_leaf(leaf, ordering))?
        };

        let (frontal_keys, separator_keys) = self.key_sets(&results, ordering)?;
        let discrete_keys = results.keys().clone();
        let (conditionals, residuals) = results.unzip();

        let keys = frontal_keys.into_iter().chain(separator_keys.iter().copied()).collect();
        let conditional = GaussianMixture::new(ordering.len(), keys, discrete_keys.clone(), conditionals);

        let residual = if separator_keys.is_empty() {
            let zero = VectorValues::new();
            let potentials = residuals.try_map(|factor| match factor {
                Some(f) => f.error(&zero).map(|e| (-e).exp()),
                None => Ok(1.0),
            })?;
            HybridResidual::Discrete(DecisionTreeFactor::new(discrete_keys, potentials)?)
        } else {
            HybridResidual::Mixture(MixtureFactor::new(separator_keys, &discrete_keys, residuals)?)
        };

        Ok((HybridConditional::Mixture(conditional), residual))
    }

    fn eliminate_leaf(&self, leaf: &GaussianFactorGraph, ordering: &[Key]) -> Result<EliminationPair> {
        if leaf.is_empty() {
            return Ok((None, None));
        }
        match self.continuous.eliminate(leaf, ordering) {
            Ok(res) => {
                trace!(
                    factors = leaf.len(),
                    separator = res.factor.keys().len(),
                    "hypothesis eliminated"
                );
                Ok((Some(res.conditional), Some(res.factor)))
            }
            Err(HybridError::SingularSystem(reason)) if self.config.singular_as_infeasible => {
                warn!(%reason, "singular hypothesis treated as infeasible");
                Ok((None, None))
            }
            Err(e) => Err(e),
        }
    }

    /// Frontal and separator keys of the first feasible hypothesis. When no
    /// hypothesis is feasible the frontals are the ordering itself and the
    /// separator is empty.
    fn key_sets(
        &self,
        results: &DecisionTree<EliminationPair>,
        ordering: &[Key],
    ) -> Result<(Vec<Key>, Vec<Key>)> {
        let mut feasible = results.leaves().iter().filter_map(|(c, f)| match (c, f) {
            (Some(c), Some(f)) => Some((c.frontals(), f.keys())),
            _ => None,
        });

        let Some((frontals, separator)) = feasible.next() else {
            debug!("no feasible hypothesis");
            return Ok((ordering.to_vec(), Vec::new()));
        };

        if self.config.validate_key_sets {
            for (other_frontals, other_separator) in feasible {
                if other_frontals != frontals {
                    return Err(HybridError::InconsistentKeySets {
                        which: "frontal",
                        first: frontals.to_vec(),
                        other: other_frontals.to_vec(),
                    });
                }
                if other_separator != separator {
                    return Err(HybridError::InconsistentKeySets {
                        which: "separator",
                        first: separator.to_vec(),
                        other: other_separator.to_vec(),
                    });
                }
            }
        }
        Ok((frontals.to_vec(), separator.to_vec()))
    }
}

/// Eliminate with the default oracles and configuration.
pub fn eliminate_hybrid(
    graph: &HybridFactorGraph,
    ordering: &[Key],
) -> Result<(HybridConditional, HybridResidual)> {
    HybridEliminator::new(EliminationConfig::default()).eliminate(graph, ordering)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cholesky::GaussianEliminationResult,
        gaussian::{GaussianFactor, JacobianFactor},
        types::{Assignment, DMat, DVec, DiscreteKey, DiscreteKeys},
    };
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn v(x: f64) -> DVec {
        DVec::from_element(1, x)
    }

    fn prior(key: Key, mean: f64) -> GaussianFactor {
        JacobianFactor::prior(key, v(mean), 1.0).unwrap().into()
    }

    fn mode_prior(key: Key, p: &[f64]) -> DecisionTreeFactor {
        DecisionTreeFactor::from_values(
            DiscreteKeys::from_keys([DiscreteKey::new(key, p.len())]).unwrap(),
            p.to_vec(),
        )
        .unwrap()
    }

    /// Counts calls and refuses to see null factors.
    #[derive(Default)]
    struct CountingEliminator {
        calls: AtomicUsize,
    }

    impl ContinuousEliminator for CountingEliminator {
        fn eliminate(
            &self,
            factors: &GaussianFactorGraph,
            ordering: &[Key],
        ) -> Result<GaussianEliminationResult> {
            assert!(!factors.has_null(), "null factor reached the oracle");
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            CholeskyEliminator.eliminate(factors, ordering)
        }
    }

    #[test]
    fn discrete_only_graph_falls_back_to_mpe() {
        let mut graph = HybridFactorGraph::new();
        graph.push(mode_prior(7, &[0.25, 0.75]));

        let (conditional, residual) = eliminate_hybrid(&graph, &[7]).unwrap();
        let (expected_conditional, expected_factor) =
            MpeEliminator.eliminate(graph.discrete_factors(), &[7]).unwrap();

        let HybridConditional::Discrete(c) = conditional else {
            panic!("expected a discrete conditional");
        };
        let HybridResidual::Discrete(f) = residual else {
            panic!("expected a discrete factor");
        };
        assert_eq!(c, expected_conditional);
        assert_eq!(f, expected_factor);
    }

    #[test]
    fn null_hypothesis_never_reaches_the_oracle() {
        let tree = DecisionTree::from_leaves(
            DiscreteKeys::from_keys([DiscreteKey::new(10, 2)]).unwrap(),
            vec![Some(Arc::new(prior(1, 0.0))), None],
        )
        .unwrap();
        let mut graph = HybridFactorGraph::new();
        graph.push(MixtureFactor::new(vec![1], &DiscreteKeys::new(), tree).unwrap());
        graph.push(prior(1, 1.0));

        let eliminator = HybridEliminator::with_oracles(
            EliminationConfig::default(),
            CountingEliminator::default(),
            MpeEliminator,
        );
        let (conditional, residual) = eliminator.eliminate(&graph, &[1]).unwrap();
        assert_eq!(eliminator.continuous.calls.load(AtomicOrdering::SeqCst), 1);

        let HybridConditional::Mixture(mixture) = conditional else {
            panic!("expected a mixture conditional");
        };
        let infeasible: Assignment = [(10, 1)].into_iter().collect();
        assert!(mixture.conditional(&infeasible).is_none());

        let HybridResidual::Discrete(potential) = residual else {
            panic!("expected a discrete potential");
        };
        assert_abs_diff_eq!(potential.value(&infeasible).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn separator_residual_becomes_mixture_factor() {
        let m = DiscreteKey::new(10, 2);
        let mut graph = HybridFactorGraph::new();
        graph.push(prior(1, 0.0));
        graph.push(
            MixtureFactor::from_components(
                vec![1, 2],
                m,
                vec![
                    JacobianFactor::between(1, 2, v(0.0), 1.0).unwrap().into(),
                    JacobianFactor::between(1, 2, v(1.0), 1.0).unwrap().into(),
                ],
            )
            .unwrap(),
        );

        let (conditional, residual) = eliminate_hybrid(&graph, &[1]).unwrap();
        let HybridConditional::Mixture(mixture) = conditional else {
            panic!("expected a mixture conditional");
        };
        assert_eq!(mixture.nr_frontals(), 1);
        assert_eq!(mixture.keys(), &[1, 2]);
        assert_eq!(mixture.discrete_keys().keys().collect::<Vec<_>>(), vec![10]);

        let HybridResidual::Mixture(factor) = residual else {
            panic!("expected a mixture factor");
        };
        assert_eq!(factor.continuous_keys(), &[2]);
        // Marginal on x2 per mode: N(0, 2) and N(1, 2)
        let at_one: VectorValues = [(2, v(1.0))].into_iter().collect();
        let mode1: Assignment = [(10, 1)].into_iter().collect();
        let mode0: Assignment = [(10, 0)].into_iter().collect();
        assert_abs_diff_eq!(factor.error(&at_one, &mode1).unwrap().unwrap(), 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(factor.error(&at_one, &mode0).unwrap().unwrap(), 0.25, epsilon = 1e-10);
    }

    #[test]
    fn parallel_and_serial_agree() {
        let m1 = DiscreteKey::new(10, 3);
        let m2 = DiscreteKey::new(11, 2);
        let mut graph = HybridFactorGraph::new();
        graph.push(
            MixtureFactor::from_components(vec![1], m1, vec![prior(1, 0.0), prior(1, 1.0), prior(1, 3.0)])
                .unwrap(),
        );
        graph.push(MixtureFactor::from_components(vec![1], m2, vec![prior(1, 0.5), prior(1, 2.0)]).unwrap());

        let serial = HybridEliminator::new(EliminationConfig::default());
        let parallel = HybridEliminator::new(EliminationConfig {
            parallel: true,
            ..Default::default()
        });
        let (_, a) = serial.eliminate(&graph, &[1]).unwrap();
        let (_, b) = parallel.eliminate(&graph, &[1]).unwrap();
        let (HybridResidual::Discrete(a), HybridResidual::Discrete(b)) = (a, b) else {
            panic!("expected discrete potentials");
        };
        assert_eq!(a.tree().len(), 6);
        for (x, y) in a.tree().leaves().iter().zip(b.tree().leaves()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    fn graph_with_singular_mode() -> HybridFactorGraph {
        // Mode 1 carries no information on x1 at all.
        let degenerate = JacobianFactor::new(vec![(1, DMat::zeros(1, 1))], v(0.0)).unwrap();
        let mut graph = HybridFactorGraph::new();
        graph.push(
            MixtureFactor::from_components(
                vec![1],
                DiscreteKey::new(10, 2),
                vec![prior(1, 0.0), degenerate.into()],
            )
            .unwrap(),
        );
        graph
    }

    #[test]
    fn singular_hypothesis_aborts_by_default() {
        assert!(matches!(
            eliminate_hybrid(&graph_with_singular_mode(), &[1]),
            Err(HybridError::SingularSystem(_))
        ));
    }

    #[test]
    fn singular_hypothesis_can_be_downgraded() {
        let eliminator = HybridEliminator::new(EliminationConfig {
            singular_as_infeasible: true,
            ..Default::default()
        });
        let (conditional, residual) = eliminator.eliminate(&graph_with_singular_mode(), &[1]).unwrap();
        let HybridConditional::Mixture(mixture) = conditional else {
            panic!("expected a mixture conditional");
        };
        let good: Assignment = [(10, 0)].into_iter().collect();
        let bad: Assignment = [(10, 1)].into_iter().collect();
        assert!(mixture.conditional(&good).is_some());
        assert!(mixture.conditional(&bad).is_none());
        assert!(matches!(residual, HybridResidual::Discrete(_)));
    }

    #[test]
    fn inconsistent_separators_are_caught_when_validating() {
        // Mode 0 couples x1 to x2, mode 1 to x3.
        let mut graph = HybridFactorGraph::new();
        graph.push(prior(1, 0.0));
        graph.push(
            MixtureFactor::from_components(
                vec![1, 2, 3],
                DiscreteKey::new(10, 2),
                vec![
                    JacobianFactor::between(1, 2, v(0.0), 1.0).unwrap().into(),
                    JacobianFactor::between(1, 3, v(0.0), 1.0).unwrap().into(),
                ],
            )
            .unwrap(),
        );
        let strict = HybridEliminator::new(EliminationConfig {
            validate_key_sets: true,
            ..Default::default()
        });
        assert!(matches!(
            strict.eliminate(&graph, &[1]),
            Err(HybridError::InconsistentKeySets { which: "separator", .. })
        ));
        // Without validation the first hypothesis decides.
        let (_, residual) = eliminate_hybrid(&graph, &[1]).unwrap();
        let HybridResidual::Mixture(m) = residual else {
            panic!("expected a mixture factor");
        };
        assert_eq!(m.continuous_keys(), &[2]);
    }

    #[test]
    fn empty_ordering_is_rejected() {
        let mut graph = HybridFactorGraph::new();
        graph.push(
            MixtureFactor::from_components(vec![1], DiscreteKey::new(10, 2), vec![prior(1, 0.0), prior(1, 1.0)])
                .unwrap(),
        );
        assert!(matches!(eliminate_hybrid(&graph, &[]), Err(HybridError::EmptyOrdering)));

        let mut discrete_only = HybridFactorGraph::new();
        discrete_only.push(mode_prior(7, &[0.5, 0.5]));
        assert!(matches!(
            eliminate_hybrid(&discrete_only, &[]),
            Err(HybridError::EmptyOrdering)
        ));
    }

    #[test]
    fn config_reads_partial_json() {
        let cfg: EliminationConfig = serde_json::from_str(r#"{"parallel":true}"#).unwrap();
        assert!(cfg.parallel);
        assert!(!cfg.validate_key_sets);
        assert!(!cfg.singular_as_infeasible);
    }

    #[test]
    fn two_modes_one_used_gives_exp_neg_error_potential() {
        // Both components read x twice: b = [1, 1] fits exactly, b = [0, 4]
        // leaves energy 4 at x = 2.
        let m1 = DiscreteKey::new(20, 2);
        let m2 = DiscreteKey::new(21, 2);
        let a = DMat::from_column_slice(2, 1, &[1.0, 1.0]);
        let fit = JacobianFactor::new(vec![(1, a.clone())], DVec::from_column_slice(&[1.0, 1.0])).unwrap();
        let miss = JacobianFactor::new(vec![(1, a)], DVec::from_column_slice(&[0.0, 4.0])).unwrap();

        let mut graph = HybridFactorGraph::new();
        graph.push(MixtureFactor::from_components(vec![1], m1, vec![fit.into(), miss.into()]).unwrap());
        graph.push(
            DecisionTreeFactor::from_values(
                DiscreteKeys::from_keys([m2]).unwrap(),
                vec![0.5, 0.5],
            )
            .unwrap(),
        );

        let (conditional, residual) = eliminate_hybrid(&graph, &[1]).unwrap();
        let HybridConditional::Mixture(mixture) = conditional else {
            panic!("expected a mixture conditional");
        };
        assert_eq!(mixture.discrete_keys().keys().collect::<Vec<_>>(), vec![20]);
        assert!(mixture.parents().is_empty());

        let HybridResidual::Discrete(potential) = residual else {
            panic!("expected a discrete potential");
        };
        assert_eq!(potential.keys().keys().collect::<Vec<_>>(), vec![20]);
        let leaves = potential.tree().leaves();
        assert_eq!(leaves.len(), 2);
        assert_abs_diff_eq!(leaves[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(leaves[1], (-4.0f64).exp(), epsilon = 1e-10);
    }
}
