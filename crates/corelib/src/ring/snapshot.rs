//! Immutable ring snapshots.
//!
//! A snapshot is everything a lookup needs, built in one go and never
//! mutated afterwards. Publishing a new ring means swapping in a new
//! snapshot; readers holding the old one keep a consistent view until they
//! drop it.

use crate::node::{Node, NodeId};
use crate::token::{KetamaToken, Token};
use std::collections::HashMap;
use std::sync::Arc;

/// Sorted positions, their owners, and the nodes the ring was built from.
#[derive(Debug, Clone, Default)]
pub struct RingSnapshot {
    positions: Vec<KetamaToken>,
    owners: HashMap<KetamaToken, Arc<Node>>,
    nodes: Vec<Arc<Node>>,
}

impl RingSnapshot {
    /// Snapshot with no nodes. Every lookup against it misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// `positions` must be sorted, deduplicated, and each one present in
    /// `owners`.
    pub(crate) fn from_parts(
        positions: Vec<KetamaToken>,
        owners: HashMap<KetamaToken, Arc<Node>>,
        nodes: Vec<Arc<Node>>,
    ) -> Self {
        debug_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        debug_assert_eq!(positions.len(), owners.len());
        Self {
            positions,
            owners,
            nodes,
        }
    }

    pub fn positions(&self) -> &[KetamaToken] {
        &self.positions
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn token_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn owner(&self, token: KetamaToken) -> Option<&Arc<Node>> {
        self.owners.get(&token)
    }

    /// Node owning the first position at or after `hash`, wrapping to the
    /// start of the ring past the last position.
    pub fn find(&self, hash: KetamaToken) -> Option<&Arc<Node>> {
        if self.positions.is_empty() {
            return None;
        }
        let index = match self.positions.binary_search(&hash) {
            Ok(exact) => exact,
            Err(insert) if insert >= self.positions.len() => 0,
            Err(insert) => insert,
        };
        self.owners.get(&self.positions[index])
    }

    /// Size of the hash range each node answers for, in hash values.
    ///
    /// A position owns the arc from the previous position (exclusive) to
    /// itself (inclusive). Nodes whose positions were all overwritten by
    /// collisions report zero.
    pub fn ownership(&self) -> Vec<(Arc<Node>, u64)> {
        let mut shares: HashMap<NodeId, u64> = HashMap::with_capacity(self.nodes.len());

        match self.positions.len() {
            0 => {}
            1 => {
                if let Some(owner) = self.owners.get(&self.positions[0]) {
                    shares.insert(owner.id(), 1u64 << 32);
                }
            }
            len => {
                for (i, position) in self.positions.iter().enumerate() {
                    let previous = self.positions[(i + len - 1) % len];
                    let arc = previous.distance_to(position).0 as u64;
                    if let Some(owner) = self.owners.get(position) {
                        *shares.entry(owner.id()).or_default() += arc;
                    }
                }
            }
        }

        self.nodes
            .iter()
            .map(|n| (n.clone(), shares.get(&n.id()).copied().unwrap_or(0)))
            .collect()
    }
}
