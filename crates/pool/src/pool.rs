//! Server pool: topology polling, ring publication, failure handling.
//!
//! All mutable state sits behind one async mutex: the node list, the dead
//! node queue, and the lifecycle flags. Lookups never touch it. They load the
//! current [`RingSnapshot`] through an [`ArcSwapOption`], so a reader sees
//! either the ring from before a refresh or the one after it.
//!
//! Three background tasks may run:
//! - topology polling, every `refresh_interval`
//! - resurrection, while dead nodes are queued
//! - the failure listener, which serializes node failure reports
//!
//! Each holds only a `Weak` to the pool and re-checks the lifecycle under
//! the mutex, so work scheduled before [`ServerPool::stop`] becomes a no-op.
//! Resurrection pings run with the mutex released; a slow dead server does
//! not hold up refreshes, failure reports or shutdown.

use crate::config::PoolConfig;
use crate::dead::{ping_all, DeadNodeTracker, ProbeTicket};
use crate::error::{PoolError, Result};
use arc_swap::ArcSwapOption;
use corelib::{
    Endpoint, FailureNotifier, HashRing, Node, NodeConnector, NodeId, RingBuilder, RingSnapshot,
    Topology, TopologySource,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Callback invoked when a node owned by the pool reports a failure.
pub type FailureHandler = Arc<dyn Fn(&Arc<Node>) + Send + Sync>;

/// Registration returned by [`ServerPool::on_node_failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// What a topology refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Discovery returned the same endpoint set.
    Unchanged,
    /// A new ring was published.
    Changed {
        added: Vec<Endpoint>,
        removed: Vec<Endpoint>,
    },
    /// The pool is stopped.
    Skipped,
}

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub lifecycle: Lifecycle,
    pub polling: bool,
    pub nodes: usize,
    pub dead_nodes: usize,
    pub resurrecting: bool,
}

/// Ketama-routed pool of cache servers discovered at runtime.
#[derive(Clone)]
pub struct ServerPool {
    inner: Arc<Inner>,
}

struct Inner {
    config: PoolConfig,
    ring: HashRing,
    snapshot: ArcSwapOption<RingSnapshot>,
    state: Mutex<PoolState>,
    source: Arc<dyn TopologySource>,
    connector: Arc<dyn NodeConnector>,
    handlers: RwLock<Vec<(HandlerId, FailureHandler)>>,
    next_handler: AtomicU64,
    cancel: CancellationToken,
    failure_tx: mpsc::UnboundedSender<NodeId>,
}

struct PoolState {
    lifecycle: Lifecycle,
    topology: Topology,
    nodes: Vec<Arc<Node>>,
    dead: DeadNodeTracker,
    next_node_id: u64,
    /// Present while automatic polling is on.
    polling: Option<CancellationToken>,
    failure_rx: Option<mpsc::UnboundedReceiver<NodeId>>,
    refresh_task: Option<JoinHandle<()>>,
    resurrect_task: Option<JoinHandle<()>>,
    failure_task: Option<JoinHandle<()>>,
}

impl ServerPool {
    pub fn new(
        config: PoolConfig,
        source: Arc<dyn TopologySource>,
        connector: Arc<dyn NodeConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let ring = RingBuilder::new()
            .with_mutations(config.mutations_per_node)
            .build()?;
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let dead = DeadNodeTracker::new(
            config.resurrect_initial_delay,
            config.resurrect_retry_interval,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                ring,
                snapshot: ArcSwapOption::empty(),
                state: Mutex::new(PoolState {
                    lifecycle: Lifecycle::Created,
                    topology: Topology::empty(),
                    nodes: Vec::new(),
                    dead,
                    next_node_id: 0,
                    polling: None,
                    failure_rx: Some(failure_rx),
                    refresh_task: None,
                    resurrect_task: None,
                    failure_task: None,
                }),
                source,
                connector,
                handlers: RwLock::new(Vec::new()),
                next_handler: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                failure_tx,
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Publish an empty ring, load the topology once, then poll it.
    ///
    /// A failed first load is logged and leaves the ring empty; if the
    /// cluster does not exist, polling is not started at all.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            match state.lifecycle {
                Lifecycle::Running => return Err(PoolError::AlreadyStarted),
                Lifecycle::Stopped => return Err(PoolError::Stopped),
                Lifecycle::Created => {}
            }
            let failure_rx = state
                .failure_rx
                .take()
                .ok_or_else(|| PoolError::Config("failure channel already consumed".into()))?;

            state.lifecycle = Lifecycle::Running;
            state.polling = Some(self.inner.cancel.child_token());
            self.inner.snapshot.store(Some(Arc::new(RingSnapshot::empty())));
            state.failure_task = Some(self.inner.spawn_failure_listener(failure_rx));
        }

        tracing::info!(
            cluster_id = %self.inner.config.cluster_id,
            region = %self.inner.config.region,
            interval = ?self.inner.config.effective_refresh_interval(),
            "starting server pool"
        );

        if let Err(err) = self.inner.refresh().await {
            tracing::warn!(error = %err, "initial topology load failed");
        }

        let mut state = self.inner.state.lock().await;
        if state.lifecycle == Lifecycle::Running {
            if let Some(token) = state.polling.clone() {
                state.refresh_task = Some(self.inner.spawn_refresh_loop(token));
            }
        }
        Ok(())
    }

    /// Poll topology now, outside the regular schedule.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        self.inner.refresh().await
    }

    /// Restart automatic polling after it was disabled by a missing cluster.
    ///
    /// Refreshes immediately; if the cluster is still missing polling turns
    /// itself off again and the discovery error is returned.
    pub async fn resume_polling(&self) -> Result<RefreshOutcome> {
        {
            let mut state = self.inner.state.lock().await;
            match state.lifecycle {
                Lifecycle::Created => return Err(PoolError::NotStarted),
                Lifecycle::Stopped => return Err(PoolError::Stopped),
                Lifecycle::Running => {}
            }
            if state.polling.is_none() {
                let token = self.inner.cancel.child_token();
                state.refresh_task = Some(self.inner.spawn_refresh_loop(token.clone()));
                state.polling = Some(token);
                tracing::info!(cluster_id = %self.inner.config.cluster_id, "topology polling resumed");
            }
        }
        self.inner.refresh().await
    }

    /// Node responsible for `key`, or `None` when no alive node is available.
    ///
    /// Never waits on a refresh in progress.
    pub fn locate(&self, key: &str) -> Result<Option<Arc<Node>>> {
        let guard = self.inner.snapshot.load();
        let snapshot = guard.as_deref().ok_or(PoolError::NotStarted)?;
        Ok(self.inner.ring.locate(snapshot, key)?)
    }

    /// Every node in the current ring, including dead ones.
    pub fn get_working_nodes(&self) -> Vec<Arc<Node>> {
        match self.inner.snapshot.load().as_deref() {
            Some(snapshot) => self.inner.ring.working_nodes(snapshot),
            None => Vec::new(),
        }
    }

    /// Currently published ring, if the pool is running.
    pub fn snapshot(&self) -> Option<Arc<RingSnapshot>> {
        self.inner.snapshot.load_full()
    }

    /// Register a failure callback.
    ///
    /// Callbacks run after the dead-node tracker has queued the node, in
    /// registration order, outside the pool mutex.
    pub fn on_node_failed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Arc<Node>) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.write().push((id, Arc::new(handler)));
        id
    }

    pub fn remove_failure_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != id);
        handlers.len() != before
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock().await;
        PoolStatus {
            lifecycle: state.lifecycle,
            polling: state.polling.is_some(),
            nodes: state.nodes.len(),
            dead_nodes: state.dead.len(),
            resurrecting: state.dead.is_probing(),
        }
    }

    /// Nodes currently queued as dead.
    pub async fn dead_nodes(&self) -> Vec<Arc<Node>> {
        self.inner.state.lock().await.dead.dead_nodes()
    }

    /// Stop every timer and close every node.
    ///
    /// Safe to call any number of times; only the first call does the work.
    /// Node close errors are logged and do not interrupt the teardown.
    pub async fn stop(&self) {
        let (tasks, nodes) = {
            let mut state = self.inner.state.lock().await;
            if state.lifecycle == Lifecycle::Stopped {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            state.polling = None;
            state.dead.reset();
            state.topology = Topology::empty();

            let tasks: Vec<JoinHandle<()>> = [
                state.refresh_task.take(),
                state.resurrect_task.take(),
                state.failure_task.take(),
            ]
            .into_iter()
            .flatten()
            .collect();
            (tasks, std::mem::take(&mut state.nodes))
        };

        self.inner.cancel.cancel();
        for task in tasks {
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::error!(error = %err, "pool task panicked");
                }
            }
        }

        self.inner.snapshot.store(None);
        close_nodes(nodes).await;
        metrics::gauge!("pool_nodes").set(0.0);
        metrics::gauge!("pool_dead_nodes").set(0.0);
        tracing::info!(cluster_id = %self.inner.config.cluster_id, "server pool stopped");
    }
}

impl Inner {
    async fn refresh(self: &Arc<Self>) -> Result<RefreshOutcome> {
        let mut state = self.state.lock().await;
        match state.lifecycle {
            Lifecycle::Created => return Err(PoolError::NotStarted),
            Lifecycle::Stopped => return Ok(RefreshOutcome::Skipped),
            Lifecycle::Running => {}
        }

        metrics::counter!("pool_refresh_total").increment(1);
        let fetched = match self
            .source
            .describe_endpoints(&self.config.cluster_id, &self.config.region)
            .await
        {
            Ok(endpoints) => Topology::new(endpoints),
            Err(err) => {
                metrics::counter!("pool_refresh_failures_total").increment(1);
                if err.is_permanent() {
                    if let Some(token) = state.polling.take() {
                        token.cancel();
                    }
                    tracing::error!(
                        cluster_id = %self.config.cluster_id,
                        error = %err,
                        "cluster not found, topology polling disabled"
                    );
                } else {
                    tracing::warn!(
                        cluster_id = %self.config.cluster_id,
                        error = %err,
                        "topology refresh failed, keeping current ring"
                    );
                }
                return Err(err.into());
            }
        };

        if fetched.same_members(&state.topology) {
            tracing::trace!(nodes = fetched.len(), "topology unchanged");
            return Ok(RefreshOutcome::Unchanged);
        }

        let diff = state.topology.diff(&fetched);
        let nodes: Vec<Arc<Node>> = fetched
            .endpoints()
            .iter()
            .map(|endpoint| self.connect(&mut state, endpoint))
            .collect();

        let snapshot = self.ring.build(nodes.clone());
        self.snapshot.store(Some(Arc::new(snapshot)));

        // Dead-node bookkeeping refers to nodes that are about to be closed.
        state.dead.reset();
        if let Some(task) = state.resurrect_task.take() {
            task.abort();
        }

        let retired = std::mem::replace(&mut state.nodes, nodes);
        state.topology = fetched;

        metrics::counter!("pool_topology_changes_total").increment(1);
        metrics::gauge!("pool_nodes").set(state.nodes.len() as f64);
        metrics::gauge!("pool_dead_nodes").set(0.0);
        tracing::info!(
            cluster_id = %self.config.cluster_id,
            nodes = state.nodes.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "topology changed, published new ring"
        );

        close_nodes(retired).await;

        Ok(RefreshOutcome::Changed {
            added: diff.added,
            removed: diff.removed,
        })
    }

    fn connect(&self, state: &mut PoolState, endpoint: &Endpoint) -> Arc<Node> {
        let id = NodeId(state.next_node_id);
        state.next_node_id += 1;

        let tx = self.failure_tx.clone();
        let notifier = FailureNotifier::new(
            id,
            Arc::new(move |failed| {
                // Closed only when the pool itself is gone.
                let _ = tx.send(failed);
            }),
        );
        Arc::new(Node::new(id, self.connector.connect(endpoint, notifier)))
    }

    async fn handle_failure(self: &Arc<Self>, id: NodeId) {
        let node = {
            let mut state = self.state.lock().await;
            if state.lifecycle != Lifecycle::Running {
                return;
            }
            let Some(node) = state.nodes.iter().find(|n| n.id() == id).cloned() else {
                tracing::debug!(node = %id, "ignoring failure from retired node");
                return;
            };

            tracing::warn!(node = %node, "node failed");
            metrics::counter!("pool_node_failures_total").increment(1);

            if let Some(ticket) = state.dead.mark_dead(node.clone()) {
                tracing::debug!(delay = ?ticket.delay, epoch = ticket.epoch, "scheduling resurrection");
                state.resurrect_task = Some(self.spawn_resurrector(ticket));
            }
            metrics::gauge!("pool_dead_nodes").set(state.dead.len() as f64);
            node
        };

        let handlers: Vec<FailureHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(&node);
        }
    }

    fn spawn_failure_listener(
        self: &Arc<Self>,
        mut failures: mpsc::UnboundedReceiver<NodeId>,
    ) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let id = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = failures.recv() => match received {
                        Some(id) => id,
                        None => break,
                    },
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_failure(id).await;
            }
        })
    }

    fn spawn_resurrector(self: &Arc<Self>, ticket: ProbeTicket) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut delay = ticket.delay;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let pending = {
                    let state = inner.state.lock().await;
                    if state.lifecycle != Lifecycle::Running || !state.dead.is_current(ticket.epoch) {
                        break;
                    }
                    state.dead.dead_nodes()
                };

                let answered = tokio::select! {
                    _ = cancel.cancelled() => break,
                    answered = ping_all(&pending) => answered,
                };

                let mut state = inner.state.lock().await;
                if state.lifecycle != Lifecycle::Running || !state.dead.is_current(ticket.epoch) {
                    break;
                }
                let next = state.dead.complete_probe(&answered);
                metrics::gauge!("pool_dead_nodes").set(state.dead.len() as f64);
                drop(state);
                match next {
                    Some(retry) => delay = retry,
                    None => {
                        tracing::debug!("all dead nodes revived, resurrection idle");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_refresh_loop(self: &Arc<Self>, polling: CancellationToken) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let period = self.config.effective_refresh_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = polling.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = inner.refresh().await {
                    tracing::debug!(error = %err, "scheduled refresh failed");
                }
            }
            tracing::debug!("topology polling stopped");
        })
    }
}

async fn close_nodes(nodes: Vec<Arc<Node>>) {
    for node in nodes {
        if let Err(err) = node.close().await {
            tracing::warn!(node = %node, error = %err, "failed to close node");
        }
    }
}
