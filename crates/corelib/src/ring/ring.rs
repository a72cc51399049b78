//! Ketama hash ring: snapshot construction and key lookup.

use crate::error::{Error, Result};
use crate::node::Node;
use crate::partitioner::{Md5Partitioner, Partitioner};
use crate::ring::snapshot::RingSnapshot;
use crate::token::KetamaToken;
use crate::vnode::{VirtualNode, KETAMA_MUTATIONS_PER_NODE};
use std::collections::HashMap;
use std::sync::Arc;

/// Minimum digest size accepted for ring placement, in bytes.
pub const MIN_DIGEST_LEN: usize = 16;

/// Stateless Ketama locator.
///
/// Holds only the placement parameters. The ring data itself lives in
/// [`RingSnapshot`]s produced by [`HashRing::build`], so one locator can serve
/// any number of snapshots from any number of threads.
#[derive(Debug, Clone)]
pub struct HashRing<P: Partitioner = Md5Partitioner> {
    partitioner: P,
    mutations_per_node: usize,
}

impl HashRing<Md5Partitioner> {
    /// Ring with the standard Ketama parameters: MD5 and 160 mutations.
    pub fn new() -> Self {
        Self {
            partitioner: Md5Partitioner,
            mutations_per_node: KETAMA_MUTATIONS_PER_NODE,
        }
    }
}

impl Default for HashRing<Md5Partitioner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Partitioner> HashRing<P> {
    /// Place every node on a fresh ring.
    ///
    /// Positions are generated node by node in list order; a later position
    /// landing on an already used token takes it over.
    pub fn build(&self, nodes: Vec<Arc<Node>>) -> RingSnapshot {
        let mut positions = Vec::with_capacity(nodes.len() * self.mutations_per_node);
        let mut owners: HashMap<KetamaToken, Arc<Node>> = HashMap::with_capacity(positions.capacity());

        for node in &nodes {
            let address = node.endpoint_string();
            for vnode in
                VirtualNode::mutations(&self.partitioner, node.id(), &address, self.mutations_per_node)
            {
                positions.push(vnode.token());
                owners.insert(vnode.token(), node.clone());
            }
        }

        positions.sort_unstable();
        positions.dedup();

        if positions.len() < nodes.len() * self.mutations_per_node {
            tracing::debug!(
                collisions = nodes.len() * self.mutations_per_node - positions.len(),
                "ring positions collided"
            );
        }
        tracing::debug!(
            nodes = nodes.len(),
            positions = positions.len(),
            partitioner = self.partitioner.name(),
            "built ring snapshot"
        );

        RingSnapshot::from_parts(positions, owners, nodes)
    }

    /// Node responsible for `key`, skipping nodes that are not alive.
    ///
    /// Returns `Ok(None)` when no alive node can be found. When the primary
    /// owner is dead the key is rehashed as `"<i><key>"` for each `i` below
    /// the node count, the same probe sequence spymemcached uses, so every
    /// client picks the same stand-in.
    pub fn locate(&self, snapshot: &RingSnapshot, key: &str) -> Result<Option<Arc<Node>>> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key must not be empty".into()));
        }

        match snapshot.node_count() {
            0 => return Ok(None),
            1 => {
                let only = &snapshot.nodes()[0];
                return Ok(only.is_alive().then(|| only.clone()));
            }
            _ => {}
        }

        let candidate = match snapshot.find(self.key_token(key)) {
            Some(node) => node,
            None => return Ok(None),
        };
        if candidate.is_alive() {
            return Ok(Some(candidate.clone()));
        }

        for i in 0..snapshot.node_count() {
            let probe = self.partitioner.partition(format!("{}{}", i, key).as_bytes()).rehash();
            if let Some(node) = snapshot.find(probe) {
                if node.is_alive() {
                    return Ok(Some(node.clone()));
                }
            }
        }

        Ok(None)
    }

    /// Every node the snapshot was built from, alive or not.
    pub fn working_nodes(&self, snapshot: &RingSnapshot) -> Vec<Arc<Node>> {
        snapshot.nodes().to_vec()
    }

    /// Ring position of a key.
    pub fn key_token(&self, key: &str) -> KetamaToken {
        self.partitioner.partition(key.as_bytes())
    }

    pub fn mutations_per_node(&self) -> usize {
        self.mutations_per_node
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }
}

/// Builder for [`HashRing`] with non-default placement parameters.
///
/// Only the defaults produce placements compatible with other Ketama
/// clients.
#[derive(Debug, Clone)]
pub struct RingBuilder<P: Partitioner = Md5Partitioner> {
    partitioner: P,
    mutations_per_node: usize,
}

impl RingBuilder<Md5Partitioner> {
    pub fn new() -> Self {
        Self {
            partitioner: Md5Partitioner,
            mutations_per_node: KETAMA_MUTATIONS_PER_NODE,
        }
    }
}

impl Default for RingBuilder<Md5Partitioner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Partitioner> RingBuilder<P> {
    pub fn with_partitioner<Q: Partitioner>(self, partitioner: Q) -> RingBuilder<Q> {
        RingBuilder {
            partitioner,
            mutations_per_node: self.mutations_per_node,
        }
    }

    pub fn with_mutations(mut self, mutations_per_node: usize) -> Self {
        self.mutations_per_node = mutations_per_node;
        self
    }

    pub fn build(self) -> Result<HashRing<P>> {
        let digest_len = self.partitioner.digest_len();
        if digest_len < MIN_DIGEST_LEN || digest_len % 4 != 0 {
            return Err(Error::InvalidPartitioner(format!(
                "{} produces {} byte digests; need a multiple of 4, at least {}",
                self.partitioner.name(),
                digest_len,
                MIN_DIGEST_LEN
            )));
        }
        if self.mutations_per_node < self.partitioner.parts_per_hash() {
            return Err(Error::InvalidPartitioner(format!(
                "{} mutations per node is fewer than one digest ({} parts)",
                self.mutations_per_node,
                self.partitioner.parts_per_hash()
            )));
        }

        Ok(HashRing {
            partitioner: self.partitioner,
            mutations_per_node: self.mutations_per_node,
        })
    }
}
