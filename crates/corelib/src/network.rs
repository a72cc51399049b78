//! Collaborator contracts: topology discovery and node construction.
//!
//! Neither the discovery transport nor the cache protocol client lives in
//! this workspace. Callers plug them in through these two traits.

use crate::endpoint::Endpoint;
use crate::node::{CacheNode, FailureNotifier};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Why a topology lookup failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The cluster id is unknown to the discovery service. Treated as a
    /// permanent misconfiguration.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// The discovery service could not be reached or refused the request.
    #[error("discovery service unavailable: {0}")]
    Unavailable(String),

    /// Any other transport-level failure.
    #[error("discovery transport error: {0}")]
    Transport(String),
}

impl DiscoveryError {
    /// Permanent errors stop automatic polling; everything else is retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, DiscoveryError::ClusterNotFound(_))
    }
}

/// Source of the current set of cache server endpoints.
#[async_trait]
pub trait TopologySource: Send + Sync + 'static {
    async fn describe_endpoints(
        &self,
        cluster_id: &str,
        region: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError>;
}

/// Builds connections for newly discovered endpoints.
///
/// Connecting is lazy: the returned node may not have touched the network
/// yet. It reports failures later through `failures`.
pub trait NodeConnector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Endpoint, failures: FailureNotifier) -> Arc<dyn CacheNode>;
}
