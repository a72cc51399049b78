//! Fixed topology source.
//!
//! For deployments whose server list comes from configuration instead of a
//! discovery service, and for driving the pool in tests. The list can be
//! replaced at runtime; the pool picks the change up on its next refresh.

use async_trait::async_trait;
use corelib::{DiscoveryError, Endpoint, TopologySource};
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct StaticTopology {
    endpoints: RwLock<Vec<Endpoint>>,
}

impl StaticTopology {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: RwLock::new(endpoints),
        }
    }

    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.endpoints.write() = endpoints;
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }
}

#[async_trait]
impl TopologySource for StaticTopology {
    async fn describe_endpoints(
        &self,
        _cluster_id: &str,
        _region: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        Ok(self.endpoints())
    }
}
