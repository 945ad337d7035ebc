//! `hybrid_core` — Variable elimination on hybrid discrete/continuous factor graphs.
//!
//! # Module layout
//! - [`types`]         — Keys, symbols, discrete keys, assignments
//! - [`error`]         — `HybridError` and the crate `Result`
//! - [`decision_tree`] — Flat decision tree over discrete assignments
//! - [`gaussian`]      — Jacobian / Hessian factors, factor collections, least squares
//! - [`cholesky`]      — Gaussian conditionals and the dense Cholesky eliminator
//! - [`discrete`]      — Discrete potentials and max-product elimination
//! - [`mixture`]       — Mixture factors and mixture conditionals
//! - [`graph`]         — Hybrid factor graph container
//! - [`sum`]           — Per-hypothesis aggregation of continuous content
//! - [`eliminate`]     — Hybrid elimination step
//! - [`discretize`]    — Residual-energy potential over the discrete keys
//! - [`bayes_net`]     — Block-sequential elimination and MPE back-substitution

pub mod bayes_net;
pub mod cholesky;
pub mod decision_tree;
pub mod discrete;
pub mod discretize;
pub mod eliminate;
pub mod error;
pub mod gaussian;
pub mod graph;
pub mod mixture;
pub mod sum;
pub mod types;

pub use bayes_net::{eliminate_sequential, HybridBayesNet, HybridValues};
pub use cholesky::{CholeskyEliminator, ContinuousEliminator, GaussianConditional};
pub use decision_tree::DecisionTree;
pub use discrete::{DecisionTreeFactor, DiscreteConditional, DiscreteEliminator, MpeEliminator};
pub use discretize::to_discrete_potential;
pub use eliminate::{
    eliminate_hybrid, EliminationConfig, HybridConditional, HybridEliminator, HybridResidual,
};
pub use error::{HybridError, Result};
pub use gaussian::{GaussianFactor, GaussianFactorGraph, HessianFactor, JacobianFactor, VectorValues};
pub use graph::{HybridFactor, HybridFactorGraph};
pub use mixture::{GaussianMixture, MixtureFactor};
pub use types::{symbol, Assignment, DiscreteKey, DiscreteKeys, Key, Symbol};
