//! Dead-node tracking and resurrection.
//!
//! Nodes that report a failure are queued here and probed on a timer until
//! they answer again. A revived node needs no ring rebuild: liveness is read
//! from the node at lookup time, so it starts receiving its keys again as
//! soon as its ping succeeds.
//!
//! The tracker is plain state. The pool keeps it behind its mutex and owns
//! the timer task; each probe cycle carries an epoch so a timer that fires
//! after [`DeadNodeTracker::reset`] can tell it is stale. Pings happen in
//! [`ping_all`], outside the mutex, and only their result is applied under it.

use corelib::{Node, NodeId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Whether a resurrection cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Probing { epoch: u64 },
}

/// Request to start a resurrection timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTicket {
    pub epoch: u64,
    pub delay: Duration,
}

/// Queue of unreachable nodes plus the resurrection state machine.
#[derive(Debug)]
pub struct DeadNodeTracker {
    queue: VecDeque<Arc<Node>>,
    state: TrackerState,
    epoch: u64,
    initial_delay: Duration,
    retry_interval: Duration,
}

impl DeadNodeTracker {
    pub fn new(initial_delay: Duration, retry_interval: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            state: TrackerState::Idle,
            epoch: 0,
            initial_delay,
            retry_interval,
        }
    }

    /// Queue a failed node.
    ///
    /// Returns a ticket when this failure moved the tracker from `Idle` to
    /// `Probing`; the caller must then schedule [`probe`](Self::probe) after
    /// `ticket.delay`.
    pub fn mark_dead(&mut self, node: Arc<Node>) -> Option<ProbeTicket> {
        if !self.contains(node.id()) {
            tracing::debug!(node = %node, "queued dead node");
            self.queue.push_back(node);
        }

        match self.state {
            TrackerState::Probing { .. } => None,
            TrackerState::Idle => {
                self.epoch += 1;
                self.state = TrackerState::Probing { epoch: self.epoch };
                Some(ProbeTicket {
                    epoch: self.epoch,
                    delay: self.initial_delay,
                })
            }
        }
    }

    /// Drop the nodes that answered a probe round and decide what comes next.
    ///
    /// A node only leaves the queue if it is still alive now; one that
    /// failed again while the round was in flight stays queued. Returns the
    /// delay before the next round, or `None` once the queue is empty and the
    /// tracker is idle again.
    pub fn complete_probe(&mut self, answered: &[NodeId]) -> Option<Duration> {
        self.queue.retain(|node| {
            let revived = answered.contains(&node.id()) && node.is_alive();
            if revived {
                tracing::info!(node = %node, "dead node answered ping, back in service");
                metrics::counter!("pool_node_resurrections_total").increment(1);
            }
            !revived
        });

        if self.queue.is_empty() {
            self.state = TrackerState::Idle;
            None
        } else {
            tracing::debug!(remaining = self.queue.len(), "dead nodes still unreachable");
            Some(self.retry_interval)
        }
    }

    /// Forget every dead node and invalidate any running cycle.
    pub fn reset(&mut self) {
        self.queue.clear();
        if let TrackerState::Probing { .. } = self.state {
            self.epoch += 1;
        }
        self.state = TrackerState::Idle;
    }

    /// True while the cycle identified by `epoch` is the live one.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.state == TrackerState::Probing { epoch }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_probing(&self) -> bool {
        matches!(self.state, TrackerState::Probing { .. })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.queue.iter().any(|n| n.id() == id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dead_nodes(&self) -> Vec<Arc<Node>> {
        self.queue.iter().cloned().collect()
    }
}

/// Ping each node once and return the ids of those that answered.
///
/// Runs without the tracker borrowed so a slow ping never holds up the
/// caller's lock.
pub async fn ping_all(nodes: &[Arc<Node>]) -> Vec<NodeId> {
    let mut answered = Vec::new();
    for node in nodes {
        if node.ping().await {
            answered.push(node.id());
        }
    }
    answered
}
