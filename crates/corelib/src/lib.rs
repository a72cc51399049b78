//! Core library for Ketama consistent hashing over a pool of cache servers.
//!
//! This crate provides the fundamental abstractions:
//! - Endpoints and node handles
//! - Collaborator traits for discovery and connections
//! - Token and partitioner (MD5) implementations
//! - Virtual node generation
//! - Immutable ring snapshots and Ketama lookup
//! - Topology comparison

pub mod endpoint;
pub mod error;
pub mod network;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod topology;
pub mod vnode;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use network::{DiscoveryError, NodeConnector, TopologySource};
pub use node::{CacheNode, FailureNotifier, Node, NodeId};
pub use partitioner::{Md5Partitioner, Partitioner};
pub use ring::{HashRing, Ring, RingBuilder, RingSnapshot};
pub use token::{KetamaToken, Token};
pub use topology::{Topology, TopologyDiff};
pub use vnode::{VirtualNode, KETAMA_MUTATIONS_PER_NODE};
