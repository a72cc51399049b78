//! Configuration types for the server pool.

use crate::error::{PoolError, Result};
use corelib::KETAMA_MUTATIONS_PER_NODE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Topology refresh interval used when none (or zero) is configured.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Delay between the first node failure and the first resurrection probe.
pub const DEFAULT_RESURRECT_INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Delay between resurrection probes while nodes stay dead.
pub const DEFAULT_RESURRECT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Main configuration for a [`ServerPool`](crate::ServerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Region the discovery service is queried in.
    pub region: String,

    /// Cluster whose endpoints make up the pool.
    pub cluster_id: String,

    /// How often topology is polled. `None` or zero means 10 minutes.
    pub refresh_interval: Option<Duration>,

    /// Wait before the first probe of a newly failed node.
    pub resurrect_initial_delay: Duration,

    /// Wait between later probes while dead nodes remain.
    pub resurrect_retry_interval: Duration,

    /// Ring positions per node. Only 160 matches other Ketama clients.
    pub mutations_per_node: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            cluster_id: String::new(),
            refresh_interval: None,
            resurrect_initial_delay: DEFAULT_RESURRECT_INITIAL_DELAY,
            resurrect_retry_interval: DEFAULT_RESURRECT_RETRY_INTERVAL,
            mutations_per_node: KETAMA_MUTATIONS_PER_NODE,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration for the given region and cluster.
    pub fn new(region: impl Into<String>, cluster_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            cluster_id: cluster_id.into(),
            ..Default::default()
        }
    }

    /// Set the topology refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set both resurrection delays.
    pub fn with_resurrect_delays(mut self, initial: Duration, retry: Duration) -> Self {
        self.resurrect_initial_delay = initial;
        self.resurrect_retry_interval = retry;
        self
    }

    /// Set the number of ring positions per node.
    pub fn with_mutations_per_node(mut self, mutations: usize) -> Self {
        self.mutations_per_node = mutations;
        self
    }

    /// Refresh interval with the default applied.
    pub fn effective_refresh_interval(&self) -> Duration {
        match self.refresh_interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => DEFAULT_REFRESH_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.trim().is_empty() {
            return Err(PoolError::Config("cluster_id must not be empty".into()));
        }
        if self.resurrect_initial_delay.is_zero() || self.resurrect_retry_interval.is_zero() {
            return Err(PoolError::Config("resurrection delays must be non-zero".into()));
        }
        Ok(())
    }
}
