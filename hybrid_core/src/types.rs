//! Fundamental types used across the entire workspace.

use crate::error::{HybridError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar containers: f64 throughout, dynamic size (block dims vary per key).
// ---------------------------------------------------------------------------

/// Generic dynamic-size vector (right-hand sides, variable values)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (Jacobian blocks, information matrices)
pub type DMat = DMatrix<f64>;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Variable identifier. Discrete and continuous variables share one namespace.
pub type Key = u64;

/// Ordered list of keys to eliminate in one step.
pub type Ordering = Vec<Key>;

/// Renders a key for diagnostic output.
pub type KeyFormatter = fn(Key) -> String;

/// Prints the raw integer.
pub fn default_key_formatter(key: Key) -> String {
    key.to_string()
}

/// Prints `x1` style names for keys built with [`Symbol`], the raw integer otherwise.
pub fn symbol_key_formatter(key: Key) -> String {
    let sym = Symbol::from_key(key);
    if sym.chr.is_ascii_alphabetic() {
        sym.to_string()
    } else {
        key.to_string()
    }
}

const CHR_BITS: u32 = 8;
const INDEX_BITS: u32 = Key::BITS - CHR_BITS;
const INDEX_MASK: Key = (1 << INDEX_BITS) - 1;

/// A character + index pair packed into a [`Key`]: the character lives in the
/// top byte, the index in the low 56 bits.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Symbol {
    pub chr: u8,
    pub index: u64,
}

impl Symbol {
    pub fn new(chr: char, index: u64) -> Self {
        Self {
            chr: chr as u8,
            index,
        }
    }

    pub fn key(&self) -> Key {
        ((self.chr as Key) << INDEX_BITS) | (self.index & INDEX_MASK)
    }

    pub fn from_key(key: Key) -> Self {
        Self {
            chr: (key >> INDEX_BITS) as u8,
            index: key & INDEX_MASK,
        }
    }
}

impl From<Symbol> for Key {
    fn from(sym: Symbol) -> Key {
        sym.key()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.chr as char, self.index)
    }
}

/// Shorthand for `Symbol::new(chr, index).key()`.
pub fn symbol(chr: char, index: u64) -> Key {
    Symbol::new(chr, index).key()
}

// ---------------------------------------------------------------------------
// Discrete keys
// ---------------------------------------------------------------------------

/// A discrete variable: its key and the number of values it can take.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DiscreteKey {
    pub key: Key,
    pub cardinality: usize,
}

impl DiscreteKey {
    pub fn new(key: Key, cardinality: usize) -> Self {
        Self { key, cardinality }
    }
}

/// A set of discrete keys, kept sorted by key and free of duplicates.
///
/// The order matters: [`crate::decision_tree::DecisionTree`] lays its leaves
/// out in mixed radix over exactly this order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscreteKeys(Vec<DiscreteKey>);

impl DiscreteKeys {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Collect keys, rejecting the same key declared with two cardinalities.
    pub fn from_keys(keys: impl IntoIterator<Item = DiscreteKey>) -> Result<Self> {
        let mut out = Self::new();
        for dk in keys {
            out.insert(dk)?;
        }
        Ok(out)
    }

    pub fn insert(&mut self, dk: DiscreteKey) -> Result<()> {
        match self.0.binary_search_by_key(&dk.key, |k| k.key) {
            Ok(pos) => {
                let existing = self.0[pos];
                if existing.cardinality != dk.cardinality {
                    return Err(HybridError::CardinalityMismatch {
                        key: dk.key,
                        left: existing.cardinality,
                        right: dk.cardinality,
                    });
                }
            }
            Err(pos) => self.0.insert(pos, dk),
        }
        Ok(())
    }

    /// Union of two key sets.
    pub fn union(&self, other: &DiscreteKeys) -> Result<DiscreteKeys> {
        let mut out = self.clone();
        for dk in other.iter() {
            out.insert(*dk)?;
        }
        Ok(out)
    }

    /// This set minus every key listed in `keys`.
    pub fn without(&self, keys: &[Key]) -> DiscreteKeys {
        Self(
            self.0
                .iter()
                .filter(|dk| !keys.contains(&dk.key))
                .copied()
                .collect(),
        )
    }

    /// The subset of this set whose keys appear in `keys`.
    pub fn only(&self, keys: &[Key]) -> DiscreteKeys {
        Self(
            self.0
                .iter()
                .filter(|dk| keys.contains(&dk.key))
                .copied()
                .collect(),
        )
    }

    /// Position of `key` inside the sorted set.
    pub fn position(&self, key: Key) -> Option<usize> {
        self.0.binary_search_by_key(&key, |k| k.key).ok()
    }

    pub fn get(&self, key: Key) -> Option<&DiscreteKey> {
        self.position(key).map(|i| &self.0[i])
    }

    pub fn contains(&self, key: Key) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiscreteKey> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[DiscreteKey] {
        &self.0
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.0.iter().map(|dk| dk.key)
    }

    /// Number of joint assignments: product of all cardinalities.
    pub fn cardinality_product(&self) -> usize {
        self.0.iter().map(|dk| dk.cardinality).product()
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        let names: Vec<String> = self
            .0
            .iter()
            .map(|dk| format!("{}({})", formatter(dk.key), dk.cardinality))
            .collect();
        names.join(" ")
    }
}

impl<'a> IntoIterator for &'a DiscreteKeys {
    type Item = &'a DiscreteKey;
    type IntoIter = std::slice::Iter<'a, DiscreteKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// One value per discrete key: a single hypothesis.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Assignment(BTreeMap<Key, usize>);

impl Assignment {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: Key) -> Option<usize> {
        self.0.get(&key).copied()
    }

    pub fn insert(&mut self, key: Key, value: usize) -> Option<usize> {
        self.0.insert(key, value)
    }

    /// Copy every entry of `other` into this assignment (later values win).
    pub fn merge(&mut self, other: &Assignment) {
        self.0.extend(other.iter());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, usize)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn format(&self, formatter: KeyFormatter) -> String {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}={}", formatter(*k), v))
            .collect();
        format!("({})", parts.join(", "))
    }
}

impl FromIterator<(Key, usize)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (Key, usize)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(symbol_key_formatter))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
