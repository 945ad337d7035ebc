//! Decision tree: a map from discrete assignments to leaf values.
//!
//! # Representation
//! The tree is stored flat: a sorted key set plus one leaf per joint
//! assignment, laid out in mixed radix (first key most significant). For keys
//! `a` (card 2) and `b` (card 3) the leaf order is
//! `(a=0,b=0) (a=0,b=1) (a=0,b=2) (a=1,b=0) ...`.
//!
//! Trees are values: every combinator returns a new tree.
//!
//! An *empty* tree has no leaves at all and stands for "not initialised yet".
//! A tree with no keys and one leaf is a constant.

use crate::{
    error::{HybridError, Result},
    types::{Assignment, DiscreteKeys},
};
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionTree<V> {
    keys: DiscreteKeys,
    leaves: Vec<V>,
}

impl<V> Default for DecisionTree<V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<V> DecisionTree<V> {
    /// A tree with no leaves.
    pub fn empty() -> Self {
        Self {
            keys: DiscreteKeys::new(),
            leaves: Vec::new(),
        }
    }

    /// A constant: one leaf, no keys.
    pub fn leaf(value: V) -> Self {
        Self {
            keys: DiscreteKeys::new(),
            leaves: vec![value],
        }
    }

    /// Build from leaves already in mixed-radix order.
    pub fn from_leaves(keys: DiscreteKeys, leaves: Vec<V>) -> Result<Self> {
        let expected = keys.cardinality_product();
        if leaves.len() != expected {
            return Err(HybridError::LeafCountMismatch {
                expected,
                found: leaves.len(),
            });
        }
        Ok(Self { keys, leaves })
    }

    /// Build by evaluating `f` on every assignment of `keys`.
    pub fn from_fn(keys: DiscreteKeys, f: impl FnMut(&Assignment) -> V) -> Self {
        let mut f = f;
        let leaves = assignments(&keys).map(|a| f(&a)).collect();
        Self { keys, leaves }
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn keys(&self) -> &DiscreteKeys {
        &self.keys
    }

    pub fn leaves(&self) -> &[V] {
        &self.leaves
    }

    pub fn into_leaves(self) -> Vec<V> {
        self.leaves
    }

    /// Every (assignment, leaf) pair in leaf order.
    pub fn iter(&self) -> impl Iterator<Item = (Assignment, &V)> + '_ {
        assignments(&self.keys).zip(self.leaves.iter())
    }

    /// Leaf for `assignment`. Keys the tree does not branch on are ignored;
    /// a missing or out-of-range value for one of its keys yields `None`.
    pub fn get(&self, assignment: &Assignment) -> Option<&V> {
        let mut idx = 0usize;
        for dk in &self.keys {
            let value = assignment.get(dk.key)?;
            if value >= dk.cardinality {
                return None;
            }
            idx = idx * dk.cardinality + value;
        }
        self.leaves.get(idx)
    }

    /// Apply `f` to every leaf.
    pub fn map<U>(&self, f: impl FnMut(&V) -> U) -> DecisionTree<U> {
        DecisionTree {
            keys: self.keys.clone(),
            leaves: self.leaves.iter().map(f).collect(),
        }
    }

    /// Apply a fallible `f` to every leaf; the first error aborts.
    pub fn try_map<U, E>(
        &self,
        f: impl FnMut(&V) -> std::result::Result<U, E>,
    ) -> std::result::Result<DecisionTree<U>, E> {
        let leaves = self
            .leaves
            .iter()
            .map(f)
            .collect::<std::result::Result<Vec<_>, E>>()?;
        Ok(DecisionTree {
            keys: self.keys.clone(),
            leaves,
        })
    }

    /// Merge two trees over the union of their keys: each leaf of the result
    /// is `f` applied to the leaves of `self` and `other` whose assignments
    /// agree with it. Joining with an empty tree gives an empty tree.
    pub fn join<B, C>(
        &self,
        other: &DecisionTree<B>,
        f: impl FnMut(&V, &B) -> C,
    ) -> Result<DecisionTree<C>> {
        let mut f = f;
        if self.is_empty() || other.is_empty() {
            return Ok(DecisionTree::empty());
        }
        let keys = self.keys.union(&other.keys)?;
        let strides_a = strides_in(&self.keys, &keys);
        let strides_b = strides_in(&other.keys, &keys);

        let total = keys.cardinality_product();
        let mut leaves = Vec::with_capacity(total);
        for n in 0..total {
            let digits = digits(&keys, n);
            let ia = dot(&digits, &strides_a);
            let ib = dot(&digits, &strides_b);
            leaves.push(f(&self.leaves[ia], &other.leaves[ib]));
        }
        Ok(DecisionTree { keys, leaves })
    }
}

impl<V: Sync> DecisionTree<V> {
    /// Same as [`DecisionTree::try_map`], with leaves evaluated on the rayon
    /// pool. Leaf order of the result is unchanged.
    pub fn par_try_map<U, E>(
        &self,
        f: impl Fn(&V) -> std::result::Result<U, E> + Sync + Send,
    ) -> std::result::Result<DecisionTree<U>, E>
    where
        U: Send,
        E: Send,
    {
        let leaves = self
            .leaves
            .par_iter()
            .map(f)
            .collect::<std::result::Result<Vec<_>, E>>()?;
        Ok(DecisionTree {
            keys: self.keys.clone(),
            leaves,
        })
    }
}

impl<A, B> DecisionTree<(A, B)> {
    /// Split a tree of pairs into two trees over the same keys.
    pub fn unzip(self) -> (DecisionTree<A>, DecisionTree<B>) {
        let (first, second): (Vec<A>, Vec<B>) = self.leaves.into_iter().unzip();
        (
            DecisionTree {
                keys: self.keys.clone(),
                leaves: first,
            },
            DecisionTree {
                keys: self.keys,
                leaves: second,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Mixed-radix helpers
// ---------------------------------------------------------------------------

/// All assignments of `keys`, in leaf order. No keys → one empty assignment.
pub fn assignments(keys: &DiscreteKeys) -> impl Iterator<Item = Assignment> + '_ {
    (0..keys.cardinality_product()).map(move |n| {
        keys.iter()
            .zip(digits(keys, n))
            .map(|(dk, v)| (dk.key, v))
            .collect()
    })
}

/// Decompose leaf index `n` into one digit per key.
fn digits(keys: &DiscreteKeys, mut n: usize) -> Vec<usize> {
    let mut out = vec![0; keys.len()];
    for (i, dk) in keys.iter().enumerate().rev() {
        out[i] = n % dk.cardinality;
        n /= dk.cardinality;
    }
    out
}

/// Stride of each key of `axes` inside a tree over `own` (0 if `own` does not
/// branch on it).
fn strides_in(own: &DiscreteKeys, axes: &DiscreteKeys) -> Vec<usize> {
    let mut own_strides = vec![0; own.len()];
    let mut stride = 1;
    for (i, dk) in own.iter().enumerate().rev() {
        own_strides[i] = stride;
        stride *= dk.cardinality;
    }
    axes.iter()
        .map(|dk| own.position(dk.key).map_or(0, |i| own_strides[i]))
        .collect()
}

fn dot(digits: &[usize], strides: &[usize]) -> usize {
    digits.iter().zip(strides).map(|(d, s)| d * s).sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiscreteKey;

    fn keys(list: &[(u64, usize)]) -> DiscreteKeys {
        DiscreteKeys::from_keys(list.iter().map(|&(k, c)| DiscreteKey::new(k, c))).unwrap()
    }

    #[test]
    fn leaf_count_is_product_of_cardinalities() {
        let tree = DecisionTree::from_fn(keys(&[(1, 2), (2, 3), (3, 4)]), |_| 0u8);
        assert_eq!(tree.len(), 24);
    }

    #[test]
    fn from_fn_and_get_agree() {
        let tree = DecisionTree::from_fn(keys(&[(1, 2), (2, 3)]), |a| {
            a.get(1).unwrap() * 10 + a.get(2).unwrap()
        });
        let a: Assignment = [(1, 1), (2, 2), (99, 0)].into_iter().collect();
        assert_eq!(tree.get(&a), Some(&12));
        let partial: Assignment = [(1, 1)].into_iter().collect();
        assert_eq!(tree.get(&partial), None);
    }

    #[test]
    fn join_pairs_leaves_that_agree_on_shared_keys() {
        let a = DecisionTree::from_fn(keys(&[(1, 2), (2, 2)]), |a| {
            format!("a{}{}", a.get(1).unwrap(), a.get(2).unwrap())
        });
        let b = DecisionTree::from_fn(keys(&[(2, 2), (3, 2)]), |a| {
            format!("b{}{}", a.get(2).unwrap(), a.get(3).unwrap())
        });
        let joined = a.join(&b, |x, y| format!("{x}{y}")).unwrap();
        assert_eq!(joined.keys().keys().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(joined.len(), 8);
        for (asg, leaf) in joined.iter() {
            let (k1, k2, k3) = (
                asg.get(1).unwrap(),
                asg.get(2).unwrap(),
                asg.get(3).unwrap(),
            );
            assert_eq!(leaf, &format!("a{k1}{k2}b{k2}{k3}"));
        }
    }

    #[test]
    fn join_with_constant_broadcasts() {
        let a = DecisionTree::from_leaves(keys(&[(4, 3)]), vec![1, 2, 3]).unwrap();
        let c = DecisionTree::leaf(10);
        let joined = a.join(&c, |x, y| x + y).unwrap();
        assert_eq!(joined.leaves(), &[11, 12, 13]);
        assert_eq!(joined.keys(), a.keys());
    }

    #[test]
    fn join_with_empty_is_empty() {
        let a = DecisionTree::leaf(1);
        let e: DecisionTree<i32> = DecisionTree::empty();
        assert!(a.join(&e, |x, y| x + y).unwrap().is_empty());
    }

    #[test]
    fn wrong_leaf_count_is_rejected() {
        let res = DecisionTree::from_leaves(keys(&[(1, 2)]), vec![1, 2, 3]);
        assert!(matches!(
            res,
            Err(HybridError::LeafCountMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn unzip_keeps_keys() {
        let tree = DecisionTree::from_fn(keys(&[(1, 2)]), |a| {
            (a.get(1).unwrap(), a.get(1).unwrap() * 2)
        });
        let (first, second) = tree.unzip();
        assert_eq!(first.leaves(), &[0, 1]);
        assert_eq!(second.leaves(), &[0, 2]);
        assert_eq!(first.keys(), second.keys());
    }

    #[test]
    fn par_try_map_matches_try_map() {
        let tree = DecisionTree::from_fn(keys(&[(1, 4), (2, 5)]), |a| {
            a.get(1).unwrap() + 7 * a.get(2).unwrap()
        });
        let serial: DecisionTree<usize> = tree.try_map(|v| Ok::<_, ()>(v * v)).unwrap();
        let parallel: DecisionTree<usize> = tree.par_try_map(|v| Ok::<_, ()>(v * v)).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn try_map_stops_on_error() {
        let tree = DecisionTree::from_leaves(keys(&[(1, 3)]), vec![1, 0, 2]).unwrap();
        let res = tree.try_map(|v| if *v == 0 { Err("zero") } else { Ok(10 / v) });
        assert_eq!(res, Err("zero"));
    }
}
