//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Each physical cache server is placed on the ring many times. Ketama calls
//! every placement a *mutation*: the server's endpoint string is suffixed with
//! a round number, hashed, and each 32-bit word of the digest becomes one
//! ring position. This provides:
//!
//! 1. **Better Load Distribution**: 160 positions per server smooths out the
//!    share each server owns
//! 2. **Bounded Remapping**: removing one of N servers only moves the keys that
//!    server owned, roughly 1/N of them
//!
//! # Layout
//!
//! With a 128-bit digest every hash yields 4 positions, so 160 mutations take
//! 40 hashing rounds:
//!
//! ```text
//! "10.0.0.1:11211-0"  -> md5 -> [w0 w1 w2 w3]
//! "10.0.0.1:11211-1"  -> md5 -> [w4 w5 w6 w7]
//! ...
//! "10.0.0.1:11211-39" -> md5 -> [w156 .. w159]
//! ```
//!
//! Every word is read little-endian. This is the layout spymemcached and
//! libketama-compatible clients use, and clients sharing a cluster must agree
//! on it bit for bit.

use crate::node::NodeId;
use crate::partitioner::Partitioner;
use crate::token::KetamaToken;

/// Number of ring positions each server gets in the Ketama scheme.
pub const KETAMA_MUTATIONS_PER_NODE: usize = 160;

/// A virtual node on the hash ring.
///
/// Represents a single token position owned by a physical node.
///
/// # Invariants
///
/// - Every `VirtualNode` belongs to exactly one physical node
/// - Two vnodes may collide on the same token; the ring keeps the one written
///   last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: KetamaToken,

    /// The physical node that owns this virtual node.
    pub node_id: NodeId,
}

impl VirtualNode {
    #[inline]
    pub fn new(token: KetamaToken, node_id: NodeId) -> Self {
        Self { token, node_id }
    }

    /// All virtual nodes for one server, in generation order.
    ///
    /// # Algorithm
    ///
    /// 1. For `round` in `0..mutations / parts_per_hash`, hash the ASCII
    ///    string `"<address>-<round>"`
    /// 2. Split each digest into `parts_per_hash` little-endian words
    /// 3. Each word becomes one vnode owned by `node_id`
    ///
    /// # Performance
    /// - **Time**: O(m) digests where m = `mutations / parts_per_hash`
    /// - **Space**: O(mutations)
    pub fn mutations<P: Partitioner + ?Sized>(
        partitioner: &P,
        node_id: NodeId,
        address: &str,
        mutations: usize,
    ) -> Vec<VirtualNode> {
        let parts = partitioner.parts_per_hash().max(1);
        let rounds = mutations / parts;

        let mut vnodes = Vec::with_capacity(rounds * parts);
        for round in 0..rounds {
            let data = format!("{}-{}", address, round);
            vnodes.extend(
                partitioner
                    .tokens(data.as_bytes())
                    .into_iter()
                    .map(|token| VirtualNode::new(token, node_id)),
            );
        }
        vnodes
    }

    #[inline]
    pub fn token(&self) -> KetamaToken {
        self.token
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

impl std::fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VNode(token={}, node={})", self.token, self.node_id)
    }
}
