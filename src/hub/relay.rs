//! The undirected set of peer pairs authorized for relay forwarding.

use std::collections::HashSet;

/// Unordered identity pair. Equality and hashing ignore endpoint order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayPair {
    a: String,
    b: String,
}

impl RelayPair {
    pub fn new(x: &str, y: &str) -> Self {
        if x <= y {
            Self {
                a: x.to_string(),
                b: y.to_string(),
            }
        } else {
            Self {
                a: y.to_string(),
                b: x.to_string(),
            }
        }
    }
}

/// Pair membership is the only authorization the relay data plane checks
/// once a pair exists. Insertion and removal are idempotent.
#[derive(Default)]
pub struct RelayGraph {
    pairs: HashSet<RelayPair>,
}

impl RelayGraph {
    pub fn insert(&mut self, x: &str, y: &str) -> bool {
        self.pairs.insert(RelayPair::new(x, y))
    }

    pub fn remove(&mut self, x: &str, y: &str) -> bool {
        self.pairs.remove(&RelayPair::new(x, y))
    }

    pub fn contains(&self, x: &str, y: &str) -> bool {
        self.pairs.contains(&RelayPair::new(x, y))
    }

    /// Remove every pair containing `id` and return the surviving
    /// counterparts, one per removed pair.
    pub fn remove_peer(&mut self, id: &str) -> Vec<String> {
        let mut others = Vec::new();
        self.pairs.retain(|pair| {
            if pair.a == id {
                others.push(pair.b.clone());
                false
            } else if pair.b == id {
                others.push(pair.a.clone());
                false
            } else {
                true
            }
        });
        others
    }

    /// Admin snapshot of the active pairs.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .pairs
            .iter()
            .map(|p| (p.a.clone(), p.b.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}
