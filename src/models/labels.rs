//! Label sets and their stable fingerprints.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An ordered set of `name => value` labels attached to an alert.
///
/// Iteration order is always lexicographic by label name, which makes the
/// rendered form and the fingerprint deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the value of the given label, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Inserts or replaces a label.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns true if the set contains no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of labels in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over `(name, value)` pairs in lexicographic name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the sub-set restricted to the given label names.
    ///
    /// Names absent from this set are skipped rather than materialized as
    /// empty values, so two alerts only share a projection when they agree
    /// on which of the selected labels are present.
    pub fn projected(&self, names: &BTreeSet<String>) -> LabelSet {
        let filtered = self
            .0
            .iter()
            .filter(|(name, _)| names.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self(filtered)
    }

    /// Computes the stable fingerprint of this label set.
    ///
    /// The fingerprint must agree across processes and replicas because it
    /// is used as the key of cluster-shared flush-log entries, so it is
    /// derived from a SHA-256 digest over the sorted label pairs rather
    /// than the process-seeded standard hasher.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for (name, value) in &self.0 {
            hasher.update(name.as_bytes());
            hasher.update([0xff]);
            hasher.update(value.as_bytes());
            hasher.update([0xff]);
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Fingerprint(u64::from_be_bytes(prefix))
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", name, value)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A stable 64-bit hash of a label set, used as a map key and as the
/// cluster-wide identity of an aggregation group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
