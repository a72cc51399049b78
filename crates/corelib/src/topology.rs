//! Ring topology: the endpoint set a ring was built from.
//!
//! Topology changes are detected by comparing endpoint *sets*. Discovery
//! services do not promise a stable ordering between two calls, and a
//! reordered but otherwise identical answer must not tear down every
//! connection in the pool.

use crate::endpoint::Endpoint;
use std::collections::BTreeSet;

/// Snapshot of the endpoints reported by discovery, in reported order.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    endpoints: Vec<Endpoint>,
}

/// Difference between two topologies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub added: Vec<Endpoint>,
    pub removed: Vec<Endpoint>,
}

impl TopologyDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl Topology {
    /// Duplicate endpoints are dropped; the first occurrence keeps its place.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        let mut seen = BTreeSet::new();
        let endpoints = endpoints
            .into_iter()
            .filter(|ep| seen.insert(ep.clone()))
            .collect();
        Self { endpoints }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.contains(endpoint)
    }

    /// Order-insensitive equality.
    pub fn same_members(&self, other: &Topology) -> bool {
        self.member_set() == other.member_set()
    }

    /// Endpoints `next` adds and removes relative to `self`.
    pub fn diff(&self, next: &Topology) -> TopologyDiff {
        let current = self.member_set();
        let upcoming = next.member_set();
        TopologyDiff {
            added: upcoming.difference(&current).map(|ep| (*ep).clone()).collect(),
            removed: current.difference(&upcoming).map(|ep| (*ep).clone()).collect(),
        }
    }

    fn member_set(&self) -> BTreeSet<&Endpoint> {
        self.endpoints.iter().collect()
    }
}
