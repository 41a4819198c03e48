// ABOUTME: Cache of endpoint pairs that already share a brokered channel.
// ABOUTME: Pairs are unordered; records are purged whenever either side reloads or goes away.

use std::collections::HashSet;
use std::fmt;

use switchboard_core::EndpointId;

/// Unordered endpoint pair, normalised to `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    low: EndpointId,
    high: EndpointId,
}

impl PairKey {
    pub fn new(a: EndpointId, b: EndpointId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn involves(&self, id: EndpointId) -> bool {
        self.low == id || self.high == id
    }

    pub fn ids(&self) -> (EndpointId, EndpointId) {
        (self.low, self.high)
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

#[derive(Debug, Default)]
pub struct PairCache {
    pairs: HashSet<PairKey>,
}

impl PairCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.pairs.contains(key)
    }

    /// Record a pair. Returns false if it was already present.
    pub fn insert(&mut self, key: PairKey) -> bool {
        self.pairs.insert(key)
    }

    pub fn remove(&mut self, key: &PairKey) -> bool {
        self.pairs.remove(key)
    }

    /// Drop every pair involving `id`. Returns how many were removed.
    pub fn purge(&mut self, id: EndpointId) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|key| !key.involves(id));
        before - self.pairs.len()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
