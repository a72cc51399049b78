//! Node abstractions for the consistent hash ring.
//!
//! A [`CacheNode`] is the connection to one cache server, supplied by the
//! caller through a [`NodeConnector`](crate::network::NodeConnector). The pool
//! wraps each one in a [`Node`], which adds a compact [`NodeId`] and makes
//! closing idempotent. The ring only ever holds `Arc<Node>`.

use crate::endpoint::Endpoint;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Compact identifier for a node created by a pool.
///
/// Ids are never reused within a pool, so a failure report from a node that
/// a topology change already replaced can be told apart from one coming from
/// its successor at the same endpoint.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Connection to a single cache server.
///
/// Implementations own their liveness flag. When a request fails they flip
/// `is_alive` to false and call [`FailureNotifier::notify`]; a `ping` that
/// succeeds must flip it back to true.
#[async_trait]
pub trait CacheNode: Send + Sync + fmt::Debug {
    /// Server this connection talks to.
    fn endpoint(&self) -> &Endpoint;

    /// Current liveness as last observed by the connection.
    fn is_alive(&self) -> bool;

    /// Probe the server. Returns true when it answered.
    async fn ping(&self) -> bool;

    /// Release the connection's resources.
    async fn close(&self) -> Result<()>;
}

/// Handle a [`CacheNode`] uses to report that its server stopped responding.
#[derive(Clone)]
pub struct FailureNotifier {
    node: NodeId,
    sink: Arc<dyn Fn(NodeId) + Send + Sync>,
}

impl FailureNotifier {
    pub fn new(node: NodeId, sink: Arc<dyn Fn(NodeId) + Send + Sync>) -> Self {
        Self { node, sink }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn notify(&self) {
        (self.sink)(self.node);
    }
}

impl fmt::Debug for FailureNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureNotifier")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// Logical node participating in the ring.
///
/// Cheap to share behind an `Arc`; the heavy connection state lives in the
/// wrapped [`CacheNode`].
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    conn: Arc<dyn CacheNode>,
    closed: AtomicBool,
}

impl Node {
    pub fn new(id: NodeId, conn: Arc<dyn CacheNode>) -> Self {
        Self {
            id,
            conn,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.conn.endpoint()
    }

    /// The string hashed to place this node on the ring.
    pub fn endpoint_string(&self) -> String {
        self.conn.endpoint().to_string()
    }

    /// A closed node is never alive, whatever its connection last reported.
    pub fn is_alive(&self) -> bool {
        !self.is_closed() && self.conn.is_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn ping(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.conn.ping().await
    }

    /// Close the underlying connection. Only the first call reaches it.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.conn.close().await
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.conn.endpoint())
    }
}
