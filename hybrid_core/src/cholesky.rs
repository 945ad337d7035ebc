//! Continuous elimination: turn a collection of Gaussian factors into a
//! Gaussian conditional on the eliminated variables plus a residual factor on
//! the remaining (separator) variables.
//!
//! # Algorithm (dense, information form)
//! 1. Lay out `[x_F | x_S | b]`: frontals in elimination order, then the
//!    separator sorted by key, then the right-hand side.
//! 2. Accumulate the augmented information `Λ` of every factor.
//! 3. Cholesky-factor the frontal block: `Λ_FF = L·Lᵀ`, `R = Lᵀ`.
//! 4. `[S d] = L⁻¹·Λ_F[S b]` gives the conditional `R·x_F + S·x_S = d`.
//! 5. The Schur complement `Λ_[Sb][Sb] − [S d]ᵀ[S d]` is the residual, kept as
//!    a Hessian factor. With no separator it is a 1×1 constant holding twice
//!    the energy left over after elimination.

use crate::{
    error::{HybridError, Result},
    gaussian::{GaussianFactor, GaussianFactorGraph, HessianFactor, Scatter, VectorValues},
    types::{DMat, DVec, Key, KeyFormatter},
};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// GaussianConditional
// ---------------------------------------------------------------------------

/// `p(x_F | x_S) ∝ exp(−½‖R·x_F + S·x_S − d‖²)` with `R` upper triangular.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianConditional {
    keys: Vec<Key>,
    dims: Vec<usize>,
    nr_frontals: usize,
    r: DMat,
    s: DMat,
    d: DVec,
}

impl GaussianConditional {
    /// `keys` lists frontals first; `dims` matches `keys`.
    pub fn new(
        keys: Vec<Key>,
        dims: Vec<usize>,
        nr_frontals: usize,
        r: DMat,
        s: DMat,
        d: DVec,
    ) -> Self {
        Self {
            keys,
            dims,
            nr_frontals,
            r,
            s,
            d,
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn nr_frontals(&self) -> usize {
        self.nr_frontals
    }

    pub fn frontals(&self) -> &[Key] {
        &self.keys[..self.nr_frontals]
    }

    pub fn parents(&self) -> &[Key] {
        &self.keys[self.nr_frontals..]
    }

    pub fn r(&self) -> &DMat {
        &self.r
    }

    pub fn s(&self) -> &DMat {
        &self.s
    }

    pub fn d(&self) -> &DVec {
        &self.d
    }

    /// Back-substitute the frontal values given values for every parent.
    pub fn solve(&self, parents: &VectorValues) -> Result<VectorValues> {
        let mut rhs = self.d.clone();
        let mut offset = 0;
        for (key, &dim) in self.parents().iter().zip(&self.dims[self.nr_frontals..]) {
            let value = parents.get(*key).ok_or(HybridError::UnknownKey(*key))?;
            if value.len() != dim {
                return Err(HybridError::DimensionMismatch {
                    key: *key,
                    expected: dim,
                    found: value.len(),
                });
            }
            rhs -= self.s.columns(offset, dim) * value;
            offset += dim;
        }

        let x = self.r.solve_upper_triangular(&rhs).ok_or_else(|| {
            HybridError::SingularSystem("conditional R has a zero pivot".to_string())
        })?;

        let mut out = VectorValues::new();
        let mut offset = 0;
        for (key, &dim) in self.frontals().iter().zip(&self.dims) {
            out.insert(*key, x.rows(offset, dim).into_owned());
            offset += dim;
        }
        Ok(out)
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        let frontals: Vec<String> = self.frontals().iter().map(|k| formatter(*k)).collect();
        let parents: Vec<String> = self.parents().iter().map(|k| formatter(*k)).collect();
        if parents.is_empty() {
            format!("p({})", frontals.join(" "))
        } else {
            format!("p({} | {})", frontals.join(" "), parents.join(" "))
        }
    }
}

// ---------------------------------------------------------------------------
// Oracle trait
// ---------------------------------------------------------------------------

/// Output of one continuous elimination.
#[derive(Clone, Debug)]
pub struct GaussianEliminationResult {
    pub conditional: Arc<GaussianConditional>,
    /// Residual on the separator (keyless when nothing remains).
    pub factor: Arc<GaussianFactor>,
}

/// Eliminates `ordering` from a collection of Gaussian factors.
///
/// Implementations must be pure: the hybrid eliminator may call them from
/// several rayon workers at once.
pub trait ContinuousEliminator: Send + Sync {
    fn eliminate(
        &self,
        factors: &GaussianFactorGraph,
        ordering: &[Key],
    ) -> Result<GaussianEliminationResult>;
}

/// Dense Cholesky elimination on the augmented information matrix.
#[derive(Clone, Copy, Debug, Default)]
pub struct CholeskyEliminator;

impl ContinuousEliminator for CholeskyEliminator {
    fn eliminate(
        &self,
        factors: &GaussianFactorGraph,
        ordering: &[Key],
    ) -> Result<GaussianEliminationResult> {
        let dims = factors.dims()?;

        let mut slots = Vec::with_capacity(dims.len());
        for key in ordering {
            let dim = dims.get(key).ok_or(HybridError::UnknownKey(*key))?;
            slots.push((*key, *dim));
        }
        let nf: usize = slots.iter().map(|(_, d)| d).sum();
        slots.extend(
            dims.iter()
                .filter(|(k, _)| !ordering.contains(k))
                .map(|(k, d)| (*k, *d)),
        );
        let scatter = Scatter::new(slots);
        let n = scatter.total();
        let info = factors.augmented_information(&scatter)?;

        let frontal_block = info.view((0, 0), (nf, nf)).into_owned();
        let chol = frontal_block.cholesky().ok_or_else(|| {
            HybridError::SingularSystem(format!(
                "frontal block of {} variables is not positive definite",
                ordering.len()
            ))
        })?;
        let l = chol.l();

        // [S d] = L⁻¹ Λ_F[S b]
        let coupling = info.view((0, nf), (nf, n + 1 - nf)).into_owned();
        let sd = l.solve_lower_triangular(&coupling).ok_or_else(|| {
            HybridError::SingularSystem("Cholesky factor has a zero pivot".to_string())
        })?;
        let s = sd.columns(0, n - nf).into_owned();
        let d = sd.column(n - nf).into_owned();

        let schur = info.view((nf, nf), (n + 1 - nf, n + 1 - nf)).into_owned() - sd.tr_mul(&sd);

        let keys = scatter.keys().to_vec();
        let all_dims = scatter.dims().to_vec();
        let separator_keys = keys[ordering.len()..].to_vec();
        let separator_dims = all_dims[ordering.len()..].to_vec();

        let conditional = GaussianConditional::new(keys, all_dims, ordering.len(), l.transpose(), s, d);
        let factor = HessianFactor::from_augmented(separator_keys, separator_dims, schur)?;

        Ok(GaussianEliminationResult {
            conditional: Arc::new(conditional),
            factor: Arc::new(factor.into()),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
