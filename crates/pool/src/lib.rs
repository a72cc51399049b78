//! Runtime server pool for Ketama-routed cache clusters.
//!
//! Polls a [`TopologySource`](corelib::TopologySource) for the cluster's
//! endpoints, rebuilds and publishes the hash ring when membership changes,
//! and keeps failed nodes out of the way until they answer a ping again.

pub mod config;
pub mod dead;
pub mod discovery;
pub mod error;
pub mod pool;

pub use config::PoolConfig;
pub use dead::{DeadNodeTracker, TrackerState};
pub use discovery::StaticTopology;
pub use error::{PoolError, Result};
pub use pool::{FailureHandler, HandlerId, Lifecycle, PoolStatus, RefreshOutcome, ServerPool};
