//! Linear Gaussian factors and collections of them.
//!
//! # Conventions
//! - Every factor is whitened: its error is `½‖A·x − b‖²` (Jacobian form) or
//!   `½(xᵀGx − 2xᵀg + f)` (Hessian form).
//! - Both forms expose the augmented information matrix
//!   `Λ = [A b]ᵀ[A b] = [G g; gᵀ f]`, which is what elimination consumes.
//! - A factor with no keys is a constant: its error does not depend on `x`.
//! - Missing variables read as zero vectors when evaluating an error, so
//!   `error(&VectorValues::new())` is the error at zero displacement.

use crate::{
    error::{HybridError, Result},
    types::{DMat, DVec, Key, KeyFormatter},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

// ---------------------------------------------------------------------------
// VectorValues
// ---------------------------------------------------------------------------

/// Values of continuous variables, one vector per key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorValues(BTreeMap<Key, DVec>);

impl VectorValues {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: Key, value: DVec) -> Option<DVec> {
        self.0.insert(key, value)
    }

    /// Copy every entry of `other` into this set (later values win).
    pub fn merge(&mut self, other: VectorValues) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: Key) -> Option<&DVec> {
        self.0.get(&key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.0.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVec)> + '_ {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Value of `key` if present, checked against the expected dimension.
    fn get_checked(&self, key: Key, dim: usize) -> Result<Option<&DVec>> {
        match self.0.get(&key) {
            Some(v) if v.len() != dim => Err(HybridError::DimensionMismatch {
                key,
                expected: dim,
                found: v.len(),
            }),
            other => Ok(other),
        }
    }

    /// Stack the values of `keys` (zeros for absent keys) into one vector.
    fn stacked(&self, keys: &[Key], dims: &[usize]) -> Result<DVec> {
        let total = dims.iter().sum();
        let mut x = DVec::zeros(total);
        let mut offset = 0;
        for (key, &dim) in keys.iter().zip(dims) {
            if let Some(v) = self.get_checked(*key, dim)? {
                x.rows_mut(offset, dim).copy_from(v);
            }
            offset += dim;
        }
        Ok(x)
    }
}

impl FromIterator<(Key, DVec)> for VectorValues {
    fn from_iter<I: IntoIterator<Item = (Key, DVec)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// JacobianFactor
// ---------------------------------------------------------------------------

/// `½‖Σ_j A_j·x_j − b‖²`, stored whitened.
#[derive(Clone, Debug, PartialEq)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    blocks: Vec<DMat>,
    b: DVec,
}

impl JacobianFactor {
    /// Build from `(key, A_j)` terms and right-hand side `b`. Keys must be
    /// distinct and every block must have as many rows as `b`.
    pub fn new(terms: Vec<(Key, DMat)>, b: DVec) -> Result<Self> {
        for (key, block) in &terms {
            if block.nrows() != b.len() {
                return Err(HybridError::DimensionMismatch {
                    key: *key,
                    expected: b.len(),
                    found: block.nrows(),
                });
            }
        }
        let (keys, blocks) = terms.into_iter().unzip();
        Ok(Self { keys, blocks, b })
    }

    /// Same as [`JacobianFactor::new`] with isotropic noise `sigma` whitened in.
    pub fn isotropic(terms: Vec<(Key, DMat)>, b: DVec, sigma: f64) -> Result<Self> {
        let inv = 1.0 / sigma;
        let terms = terms.into_iter().map(|(k, a)| (k, a * inv)).collect();
        Self::new(terms, b * inv)
    }

    /// A keyless factor with constant error `½‖b‖²`.
    pub fn constant(b: DVec) -> Self {
        Self {
            keys: Vec::new(),
            blocks: Vec::new(),
            b,
        }
    }

    /// Prior `x ≈ mean` with isotropic `sigma`.
    pub fn prior(key: Key, mean: DVec, sigma: f64) -> Result<Self> {
        let dim = mean.len();
        Self::isotropic(vec![(key, DMat::identity(dim, dim))], mean, sigma)
    }

    /// Relative measurement `x2 − x1 ≈ measured` with isotropic `sigma`.
    pub fn between(k1: Key, k2: Key, measured: DVec, sigma: f64) -> Result<Self> {
        let dim = measured.len();
        Self::isotropic(
            vec![
                (k1, -DMat::identity(dim, dim)),
                (k2, DMat::identity(dim, dim)),
            ],
            measured,
            sigma,
        )
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn blocks(&self) -> &[DMat] {
        &self.blocks
    }

    pub fn b(&self) -> &DVec {
        &self.b
    }

    pub fn rows(&self) -> usize {
        self.b.len()
    }

    pub fn dims(&self) -> Vec<usize> {
        self.blocks.iter().map(|a| a.ncols()).collect()
    }

    /// `½‖Ax − b‖²`; absent keys read as zero, a wrong-sized value fails
    /// with `DimensionMismatch`.
    pub fn error(&self, x: &VectorValues) -> Result<f64> {
        let mut residual = -self.b.clone();
        for (key, block) in self.keys.iter().zip(&self.blocks) {
            if let Some(v) = x.get_checked(*key, block.ncols())? {
                residual += block * v;
            }
        }
        Ok(0.5 * residual.norm_squared())
    }

    /// `[A b]ᵀ[A b]` in this factor's own key order.
    pub fn augmented_information(&self) -> DMat {
        let dims = self.dims();
        let n: usize = dims.iter().sum();
        let m = self.rows();
        let mut ab = DMat::zeros(m, n + 1);
        let mut offset = 0;
        for (block, dim) in self.blocks.iter().zip(&dims) {
            ab.view_mut((0, offset), (m, *dim)).copy_from(block);
            offset += dim;
        }
        ab.column_mut(n).copy_from(&self.b);
        ab.tr_mul(&ab)
    }
}

// ---------------------------------------------------------------------------
// HessianFactor
// ---------------------------------------------------------------------------

/// `½(xᵀGx − 2xᵀg + f)`, stored as the augmented matrix `[G g; gᵀ f]`.
#[derive(Clone, Debug, PartialEq)]
pub struct HessianFactor {
    keys: Vec<Key>,
    dims: Vec<usize>,
    info: DMat,
}

impl HessianFactor {
    /// `info` must be square of size `Σ dims + 1`.
    pub fn from_augmented(keys: Vec<Key>, dims: Vec<usize>, info: DMat) -> Result<Self> {
        let n: usize = dims.iter().sum();
        if info.nrows() != n + 1 || info.ncols() != n + 1 {
            return Err(HybridError::DimensionMismatch {
                key: keys.first().copied().unwrap_or_default(),
                expected: n + 1,
                found: info.nrows(),
            });
        }
        Ok(Self { keys, dims, info })
    }

    /// A keyless factor with constant error `½f`.
    pub fn constant(f: f64) -> Self {
        Self {
            keys: Vec::new(),
            dims: Vec::new(),
            info: DMat::from_element(1, 1, f),
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn info(&self) -> &DMat {
        &self.info
    }

    /// Twice the error at zero: the `f` corner of the augmented matrix.
    pub fn constant_term(&self) -> f64 {
        let n = self.info.nrows() - 1;
        self.info[(n, n)]
    }

    pub fn error(&self, x: &VectorValues) -> Result<f64> {
        let n = self.info.nrows() - 1;
        let xv = x.stacked(&self.keys, &self.dims)?;
        let g_mat = self.info.view((0, 0), (n, n));
        let g_vec = self.info.view((0, n), (n, 1));
        let quad = xv.dot(&(g_mat * &xv));
        let lin = xv.dot(&g_vec.column(0));
        Ok(0.5 * (quad - 2.0 * lin + self.constant_term()))
    }
}

// ---------------------------------------------------------------------------
// GaussianFactor
// ---------------------------------------------------------------------------

/// A continuous factor in either representation.
#[derive(Clone, Debug, PartialEq)]
pub enum GaussianFactor {
    Jacobian(JacobianFactor),
    Hessian(HessianFactor),
}

impl From<JacobianFactor> for GaussianFactor {
    fn from(f: JacobianFactor) -> Self {
        GaussianFactor::Jacobian(f)
    }
}

impl From<HessianFactor> for GaussianFactor {
    fn from(f: HessianFactor) -> Self {
        GaussianFactor::Hessian(f)
    }
}

impl GaussianFactor {
    pub fn keys(&self) -> &[Key] {
        match self {
            GaussianFactor::Jacobian(f) => f.keys(),
            GaussianFactor::Hessian(f) => f.keys(),
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            GaussianFactor::Jacobian(f) => f.dims(),
            GaussianFactor::Hessian(f) => f.dims().to_vec(),
        }
    }

    pub fn error(&self, x: &VectorValues) -> Result<f64> {
        match self {
            GaussianFactor::Jacobian(f) => f.error(x),
            GaussianFactor::Hessian(f) => f.error(x),
        }
    }

    pub fn augmented_information(&self) -> DMat {
        match self {
            GaussianFactor::Jacobian(f) => f.augmented_information(),
            GaussianFactor::Hessian(f) => f.info().clone(),
        }
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        let keys: Vec<String> = self.keys().iter().map(|k| formatter(*k)).collect();
        match self {
            GaussianFactor::Jacobian(f) => {
                format!("Jacobian [{}] rows={}", keys.join(" "), f.rows())
            }
            GaussianFactor::Hessian(f) => {
                format!("Hessian [{}] f={:.6}", keys.join(" "), f.constant_term())
            }
        }
    }
}

/// Shared handle to a continuous factor; `None` marks an infeasible or
/// not-yet-materialised factor under some hypothesis.
pub type GaussianFactorHandle = Option<Arc<GaussianFactor>>;

// ---------------------------------------------------------------------------
// Scatter: block layout of a dense system
// ---------------------------------------------------------------------------

/// Where each key's block lives in a dense augmented system.
/// The right-hand side column sits after every key block.
#[derive(Clone, Debug)]
pub(crate) struct Scatter {
    keys: Vec<Key>,
    dims: Vec<usize>,
    offsets: Vec<usize>,
    total: usize,
}

impl Scatter {
    pub(crate) fn new(slots: Vec<(Key, usize)>) -> Self {
        let mut offsets = Vec::with_capacity(slots.len());
        let mut total = 0;
        for (_, dim) in &slots {
            offsets.push(total);
            total += dim;
        }
        let (keys, dims) = slots.into_iter().unzip();
        Self {
            keys,
            dims,
            offsets,
            total,
        }
    }

    pub(crate) fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub(crate) fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Total variable dimension (excluding the right-hand side column).
    pub(crate) fn total(&self) -> usize {
        self.total
    }

    fn offset(&self, key: Key) -> Option<usize> {
        self.keys
            .iter()
            .position(|k| *k == key)
            .map(|i| self.offsets[i])
    }

    /// Add `factor`'s augmented information into `target`.
    fn accumulate(&self, factor: &GaussianFactor, target: &mut DMat) -> Result<()> {
        let local = factor.augmented_information();
        let dims = factor.dims();

        // (local offset, global offset, dim) for every block, rhs last
        let mut slots = Vec::with_capacity(dims.len() + 1);
        let mut local_offset = 0;
        for (key, dim) in factor.keys().iter().zip(&dims) {
            let global = self.offset(*key).ok_or(HybridError::UnknownKey(*key))?;
            slots.push((local_offset, global, *dim));
            local_offset += dim;
        }
        slots.push((local_offset, self.total, 1));

        for &(li, gi, di) in &slots {
            for &(lj, gj, dj) in &slots {
                let mut dst = target.view_mut((gi, gj), (di, dj));
                dst += local.view((li, lj), (di, dj));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GaussianFactorGraph
// ---------------------------------------------------------------------------

/// An ordered collection of continuous factor handles.
///
/// Null handles are kept in the collection (so callers can detect them with
/// [`GaussianFactorGraph::has_null`]) but contribute nothing to errors or
/// solves.
#[derive(Clone, Debug, Default)]
pub struct GaussianFactorGraph {
    factors: Vec<GaussianFactorHandle>,
}

impl GaussianFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_handles(factors: Vec<GaussianFactorHandle>) -> Self {
        Self { factors }
    }

    pub fn push(&mut self, factor: GaussianFactorHandle) {
        self.factors.push(factor);
    }

    pub fn push_factor(&mut self, factor: impl Into<GaussianFactor>) {
        self.factors.push(Some(Arc::new(factor.into())));
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GaussianFactorHandle> {
        self.factors.iter()
    }

    pub fn has_null(&self) -> bool {
        self.factors.iter().any(Option::is_none)
    }

    /// Non-null factors only.
    pub fn present(&self) -> impl Iterator<Item = &Arc<GaussianFactor>> + '_ {
        self.factors.iter().flatten()
    }

    pub fn keys(&self) -> BTreeSet<Key> {
        self.present()
            .flat_map(|f| f.keys().iter().copied())
            .collect()
    }

    /// Dimension of every variable, checking that factors agree.
    pub fn dims(&self) -> Result<BTreeMap<Key, usize>> {
        let mut dims = BTreeMap::new();
        for factor in self.present() {
            for (key, dim) in factor.keys().iter().zip(factor.dims()) {
                let known = *dims.entry(*key).or_insert(dim);
                if known != dim {
                    return Err(HybridError::DimensionMismatch {
                        key: *key,
                        expected: known,
                        found: dim,
                    });
                }
            }
        }
        Ok(dims)
    }

    /// Total error of the non-null factors; `0.0` when there are none.
    pub fn error(&self, x: &VectorValues) -> Result<f64> {
        self.present().try_fold(0.0, |acc, f| Ok(acc + f.error(x)?))
    }

    /// Sum of all augmented information matrices laid out by `scatter`.
    pub(crate) fn augmented_information(&self, scatter: &Scatter) -> Result<DMat> {
        let n = scatter.total() + 1;
        let mut info = DMat::zeros(n, n);
        for factor in self.present() {
            scatter.accumulate(factor, &mut info)?;
        }
        Ok(info)
    }

    /// Least-squares minimiser over every variable of the collection.
    ///
    /// Solves the normal equations `G·x = g` with a dense Cholesky; a system
    /// that is not positive definite fails with `SingularSystem`.
    pub fn optimize(&self) -> Result<VectorValues> {
        let dims = self.dims()?;
        let scatter = Scatter::new(dims.into_iter().collect());
        let n = scatter.total();
        if n == 0 {
            return Ok(VectorValues::new());
        }
        let info = self.augmented_information(&scatter)?;
        let hessian = info.view((0, 0), (n, n)).into_owned();
        let gradient = info.view((0, n), (n, 1)).into_owned();
        let chol = hessian.cholesky().ok_or_else(|| {
            HybridError::SingularSystem(format!(
                "normal equations over {} variables are not positive definite",
                scatter.keys().len()
            ))
        })?;
        let solution = chol.solve(&gradient);

        let mut values = VectorValues::new();
        let mut offset = 0;
        for (key, dim) in scatter.keys().iter().zip(scatter.dims()) {
            values.insert(*key, solution.view((offset, 0), (*dim, 1)).column(0).into_owned());
            offset += dim;
        }
        Ok(values)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn v(values: &[f64]) -> DVec {
        DVec::from_column_slice(values)
    }

    #[test]
    fn empty_collection_has_positive_zero_error() {
        let e = GaussianFactorGraph::from_handles(vec![None]).error(&VectorValues::new()).unwrap();
        assert!(e == 0.0 && e.is_sign_positive());
    }

    #[test]
    fn wrong_sized_value_is_a_dimension_mismatch() {
        let jf = JacobianFactor::prior(1, v(&[3.0, 4.0]), 1.0).unwrap();
        let hf = HessianFactor::from_augmented(vec![1], vec![2], jf.augmented_information()).unwrap();
        let x: VectorValues = [(1, v(&[1.0]))].into_iter().collect();
        for result in [jf.error(&x), hf.error(&x)] {
            assert!(matches!(
                result,
                Err(HybridError::DimensionMismatch { key: 1, expected: 2, found: 1 })
            ));
        }
    }

    #[test]
    fn jacobian_error_at_zero_reads_missing_keys_as_zero() {
        let f = JacobianFactor::prior(1, v(&[3.0, 4.0]), 1.0).unwrap();
        assert_abs_diff_eq!(f.error(&VectorValues::new()).unwrap(), 12.5, epsilon = 1e-12);
    }

    #[test]
    fn isotropic_sigma_is_whitened_in() {
        let f = JacobianFactor::prior(1, v(&[2.0]), 2.0).unwrap();
        // ½ (2/2)² = 0.5
        assert_abs_diff_eq!(f.error(&VectorValues::new()).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn block_rows_must_match_rhs() {
        let res = JacobianFactor::new(vec![(7, DMat::identity(2, 2))], v(&[1.0]));
        assert!(matches!(
            res,
            Err(HybridError::DimensionMismatch { key: 7, expected: 1, found: 2 })
        ));
    }

    #[test]
    fn hessian_and_jacobian_errors_agree() {
        let jf = JacobianFactor::between(1, 2, v(&[1.5]), 0.5).unwrap();
        let hf = HessianFactor::from_augmented(
            jf.keys().to_vec(),
            jf.dims(),
            jf.augmented_information(),
        )
        .unwrap();
        let x: VectorValues = [(1, v(&[0.2])), (2, v(&[2.0]))].into_iter().collect();
        assert_abs_diff_eq!(jf.error(&x).unwrap(), hf.error(&x).unwrap(), epsilon = 1e-10);
    }

    #[test]
    fn optimize_finds_least_squares_midpoint() {
        // Two conflicting priors on x: optimum at the mean, error = ½(1² + 1²)
        let mut graph = GaussianFactorGraph::new();
        graph.push_factor(JacobianFactor::prior(1, v(&[0.0]), 1.0).unwrap());
        graph.push_factor(JacobianFactor::prior(1, v(&[2.0]), 1.0).unwrap());
        let x = graph.optimize().unwrap();
        assert_abs_diff_eq!(x.get(1).unwrap()[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(graph.error(&x).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn optimize_rejects_underdetermined_system() {
        // Only a relative measurement: the absolute position is unobservable.
        let mut graph = GaussianFactorGraph::new();
        graph.push_factor(JacobianFactor::between(1, 2, v(&[1.0]), 1.0).unwrap());
        assert!(matches!(graph.optimize(), Err(HybridError::SingularSystem(_))));
    }

    #[test]
    fn null_handles_are_detected_but_ignored() {
        let mut graph = GaussianFactorGraph::new();
        graph.push_factor(JacobianFactor::prior(1, v(&[1.0]), 1.0).unwrap());
        graph.push(None);
        assert!(graph.has_null());
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.keys().into_iter().collect::<Vec<_>>(), vec![1]);
        assert_abs_diff_eq!(graph.error(&VectorValues::new()).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn conflicting_dimensions_are_reported() {
        let mut graph = GaussianFactorGraph::new();
        graph.push_factor(JacobianFactor::prior(1, v(&[1.0]), 1.0).unwrap());
        graph.push_factor(JacobianFactor::prior(1, v(&[1.0, 2.0]), 1.0).unwrap());
        assert!(matches!(
            graph.dims(),
            Err(HybridError::DimensionMismatch { key: 1, .. })
        ));
    }
}
