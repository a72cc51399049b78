//! Server pool behaviour against scripted collaborators.
//!
//! Timer-driven tests run on a paused clock: sleeping in the test advances
//! virtual time, which fires the pool's refresh and resurrection timers
//! deterministically.

use async_trait::async_trait;
use corelib::{
    CacheNode, DiscoveryError, Endpoint, FailureNotifier, NodeConnector, TopologySource,
};
use parking_lot::Mutex;
use pool::{PoolConfig, PoolError, RefreshOutcome, ServerPool, StaticTopology};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Debug)]
struct MockConn {
    endpoint: Endpoint,
    alive: AtomicBool,
    answers_ping: AtomicBool,
    hang_ping: AtomicBool,
    fail_close: bool,
    closes: AtomicUsize,
    notifier: FailureNotifier,
}

impl MockConn {
    /// Simulate a request failure.
    fn fail(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.answers_ping.store(false, Ordering::SeqCst);
        self.notifier.notify();
    }

    fn recover(&self) {
        self.answers_ping.store(true, Ordering::SeqCst);
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheNode for MockConn {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> bool {
        if self.hang_ping.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let ok = self.answers_ping.load(Ordering::SeqCst);
        if ok {
            self.alive.store(true, Ordering::SeqCst);
        }
        ok
    }

    async fn close(&self) -> corelib::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(corelib::Error::NodeClose {
                endpoint: self.endpoint.to_string(),
                reason: "socket already reset".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockConnector {
    created: Mutex<Vec<Arc<MockConn>>>,
    fail_close: BTreeSet<Endpoint>,
}

impl MockConnector {
    fn with_failing_close(endpoints: &[Endpoint]) -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            fail_close: endpoints.iter().cloned().collect(),
        }
    }

    fn all(&self) -> Vec<Arc<MockConn>> {
        self.created.lock().clone()
    }

    /// Most recent connection made to `endpoint`.
    fn latest(&self, endpoint: &Endpoint) -> Arc<MockConn> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| &c.endpoint == endpoint)
            .cloned()
            .expect("endpoint was connected")
    }
}

impl NodeConnector for MockConnector {
    fn connect(&self, endpoint: &Endpoint, failures: FailureNotifier) -> Arc<dyn CacheNode> {
        let conn = Arc::new(MockConn {
            endpoint: endpoint.clone(),
            alive: AtomicBool::new(true),
            answers_ping: AtomicBool::new(true),
            hang_ping: AtomicBool::new(false),
            fail_close: self.fail_close.contains(endpoint),
            closes: AtomicUsize::new(0),
            notifier: failures,
        });
        self.created.lock().push(conn.clone());
        conn
    }
}

/// Topology source whose answer is set by the test.
#[derive(Debug)]
struct ScriptedTopology {
    answer: Mutex<Result<Vec<Endpoint>, DiscoveryError>>,
    calls: AtomicUsize,
}

impl ScriptedTopology {
    fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            answer: Mutex::new(Ok(endpoints)),
            calls: AtomicUsize::new(0),
        }
    }

    fn set(&self, answer: Result<Vec<Endpoint>, DiscoveryError>) {
        *self.answer.lock() = answer;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopologySource for ScriptedTopology {
    async fn describe_endpoints(
        &self,
        _cluster_id: &str,
        _region: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.lock().clone()
    }
}

/// Topology source that waits for a permit before answering.
struct GatedTopology {
    inner: StaticTopology,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl TopologySource for GatedTopology {
    async fn describe_endpoints(
        &self,
        cluster_id: &str,
        region: &str,
    ) -> Result<Vec<Endpoint>, DiscoveryError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;
        permit.forget();
        self.inner.describe_endpoints(cluster_id, region).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn ep(host: &str) -> Endpoint {
    Endpoint::new(host, 11211)
}

fn config() -> PoolConfig {
    PoolConfig::new("eu-west-1", "sessions")
        .with_refresh_interval(Duration::from_secs(60))
        .with_resurrect_delays(Duration::from_secs(30), Duration::from_secs(10))
}

fn pool_with(
    topology: Arc<dyn TopologySource>,
    connector: Arc<MockConnector>,
) -> ServerPool {
    ServerPool::new(config(), topology, connector).unwrap()
}

fn working_set(pool: &ServerPool) -> BTreeSet<Endpoint> {
    pool.get_working_nodes()
        .iter()
        .map(|n| n.endpoint().clone())
        .collect()
}

fn keys() -> Vec<String> {
    (0..300).map(|i| format!("key-{}", i)).collect()
}

fn placement(pool: &ServerPool, keys: &[String]) -> Vec<Option<Endpoint>> {
    keys.iter()
        .map(|k| pool.locate(k).unwrap().map(|n| n.endpoint().clone()))
        .collect()
}

async fn wait_for_dead(pool: &ServerPool, expected: usize) {
    for _ in 0..200 {
        if pool.status().await.dead_nodes == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {} dead nodes", expected);
}

async fn wait_for_count(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {} reports", expected);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_locate_before_start_fails() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a")]));
    let pool = pool_with(topology.clone(), Arc::new(MockConnector::default()));

    assert!(matches!(pool.locate("foo"), Err(PoolError::NotStarted)));
    assert!(pool.get_working_nodes().is_empty());
    assert!(matches!(pool.refresh().await, Err(PoolError::NotStarted)));
    assert_eq!(topology.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_loads_topology() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b"), ep("c")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology.clone(), connector.clone());

    pool.start().await.unwrap();

    assert_eq!(topology.calls(), 1);
    assert_eq!(working_set(&pool), [ep("a"), ep("b"), ep("c")].into_iter().collect());
    assert_eq!(connector.all().len(), 3);

    let foo = pool.locate("foo").unwrap().expect("alive node");
    let again = pool.locate("foo").unwrap().expect("alive node");
    assert_eq!(foo.id(), again.id());

    assert!(matches!(pool.locate(""), Err(PoolError::InvalidKey(_))));
    assert!(matches!(pool.start().await, Err(PoolError::AlreadyStarted)));

    let status = pool.status().await;
    assert!(status.polling);
    assert_eq!(status.nodes, 3);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_topology() {
    let topology = Arc::new(ScriptedTopology::new(Vec::new()));
    let pool = pool_with(topology, Arc::new(MockConnector::default()));
    pool.start().await.unwrap();

    assert!(pool.locate("foo").unwrap().is_none());
    assert!(pool.get_working_nodes().is_empty());

    pool.stop().await;
}

// ============================================================================
// Topology changes
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_topology_change_replaces_nodes() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b"), ep("c")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology.clone(), connector.clone());
    pool.start().await.unwrap();

    let before = connector.all();
    let old_nodes = pool.get_working_nodes();

    topology.set(Ok(vec![ep("b"), ep("c"), ep("d")]));
    let outcome = pool.refresh().await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::Changed {
            added: vec![ep("d")],
            removed: vec![ep("a")],
        }
    );

    assert_eq!(working_set(&pool), [ep("b"), ep("c"), ep("d")].into_iter().collect());
    for conn in &before {
        assert_eq!(conn.closes(), 1, "{} closed once", conn.endpoint);
    }
    assert!(old_nodes.iter().all(|n| n.is_closed() && !n.is_alive()));
    for endpoint in [ep("b"), ep("c"), ep("d")] {
        assert_eq!(connector.latest(&endpoint).closes(), 0);
    }

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_reordered_topology_is_unchanged() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b"), ep("c")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology.clone(), connector.clone());
    pool.start().await.unwrap();
    let published = pool.snapshot().unwrap();

    topology.set(Ok(vec![ep("c"), ep("a"), ep("b")]));
    assert_eq!(pool.refresh().await.unwrap(), RefreshOutcome::Unchanged);

    assert!(Arc::ptr_eq(&published, &pool.snapshot().unwrap()));
    assert_eq!(connector.all().len(), 3, "no reconnects");

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_periodic_refresh() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a")]));
    let pool = pool_with(topology.clone(), Arc::new(MockConnector::default()));
    pool.start().await.unwrap();

    topology.set(Ok(vec![ep("a"), ep("b")]));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(working_set(&pool).len(), 1, "interval not elapsed yet");

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(working_set(&pool), [ep("a"), ep("b")].into_iter().collect());
    assert_eq!(topology.calls(), 2);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_keeps_ring_and_polling() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b")]));
    let pool = pool_with(topology.clone(), Arc::new(MockConnector::default()));
    pool.start().await.unwrap();
    let published = pool.snapshot().unwrap();

    topology.set(Err(DiscoveryError::Unavailable("throttled".into())));
    let err = pool.refresh().await.unwrap_err();
    assert!(matches!(err, PoolError::Discovery(DiscoveryError::Unavailable(_))));

    assert!(Arc::ptr_eq(&published, &pool.snapshot().unwrap()));
    assert!(pool.status().await.polling);

    // The scheduled refresh keeps trying.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(topology.calls(), 3);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cluster_not_found_disables_polling() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b")]));
    let pool = pool_with(topology.clone(), Arc::new(MockConnector::default()));
    pool.start().await.unwrap();

    topology.set(Err(DiscoveryError::ClusterNotFound("sessions".into())));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(topology.calls(), 2);
    assert!(!pool.status().await.polling);
    assert_eq!(working_set(&pool).len(), 2, "last known ring still served");

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(topology.calls(), 2, "no more automatic polls");

    topology.set(Ok(vec![ep("a"), ep("b"), ep("c")]));
    let outcome = pool.resume_polling().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::Changed { .. }));
    assert!(pool.status().await.polling);

    topology.set(Ok(vec![ep("c")]));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(working_set(&pool), [ep("c")].into_iter().collect());

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_cluster_at_start_never_polls() {
    let topology = Arc::new(ScriptedTopology::new(Vec::new()));
    topology.set(Err(DiscoveryError::ClusterNotFound("sessions".into())));
    let pool = pool_with(topology.clone(), Arc::new(MockConnector::default()));

    pool.start().await.unwrap();
    assert!(pool.locate("foo").unwrap().is_none());
    assert!(!pool.status().await.polling);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(topology.calls(), 1);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_locate_does_not_wait_for_refresh() {
    let gate = Arc::new(Semaphore::new(1));
    let topology = Arc::new(GatedTopology {
        inner: StaticTopology::new(vec![ep("a"), ep("b")]),
        gate: gate.clone(),
    });
    let pool = pool_with(topology.clone(), Arc::new(MockConnector::default()));
    pool.start().await.unwrap();
    let before = placement(&pool, &keys());

    topology.inner.set_endpoints(vec![ep("c")]);
    let refreshing = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.refresh().await })
    };
    tokio::task::yield_now().await;

    // The refresh is parked inside discovery while holding the pool mutex.
    assert_eq!(placement(&pool, &keys()), before);

    gate.add_permits(1);
    let outcome = refreshing.await.unwrap().unwrap();
    assert!(matches!(outcome, RefreshOutcome::Changed { .. }));
    assert_eq!(working_set(&pool), [ep("c")].into_iter().collect());

    gate.add_permits(10);
    pool.stop().await;
}

// ============================================================================
// Failures and resurrection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failure_and_resurrection() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("A"), ep("B"), ep("C")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology, connector.clone());
    pool.start().await.unwrap();

    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    pool.on_node_failed(move |node| sink.lock().push(node.endpoint().clone()));

    let keys = keys();
    let healthy = placement(&pool, &keys);
    let published = pool.snapshot().unwrap();

    let a = connector.latest(&ep("A"));
    a.fail();
    wait_for_dead(&pool, 1).await;
    assert_eq!(*reported.lock(), vec![ep("A")]);
    assert!(pool.status().await.resurrecting);

    let degraded = placement(&pool, &keys);
    assert_eq!(degraded, placement(&pool, &keys), "fallback is stable");
    for (h, d) in healthy.iter().zip(degraded.iter()) {
        if h.as_ref() == Some(&ep("A")) {
            assert_ne!(d.as_ref(), Some(&ep("A")));
        } else {
            assert_eq!(h, d);
        }
    }

    // First probe after 30s: A still down.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(pool.status().await.dead_nodes, 1);

    a.recover();
    tokio::time::sleep(Duration::from_secs(10)).await;
    let status = pool.status().await;
    assert_eq!(status.dead_nodes, 0);
    assert!(!status.resurrecting);

    assert_eq!(placement(&pool, &keys), healthy, "A takes its keys back");
    assert!(Arc::ptr_eq(&published, &pool.snapshot().unwrap()), "no rebuild");

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_hung_ping_does_not_block_pool() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b"), ep("c")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology.clone(), connector.clone());
    pool.start().await.unwrap();

    let a = connector.latest(&ep("a"));
    a.hang_ping.store(true, Ordering::SeqCst);
    a.fail();
    wait_for_dead(&pool, 1).await;

    // The first resurrection round starts at 30s and never finishes.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(pool.status().await.resurrecting);

    connector.latest(&ep("b")).fail();
    wait_for_dead(&pool, 2).await;

    topology.set(Ok(vec![ep("b"), ep("c")]));
    let outcome = pool.refresh().await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::Changed { .. }));
    assert_eq!(pool.status().await.dead_nodes, 0);

    pool.stop().await;
    assert_eq!(a.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_hung_ping() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology, connector.clone());
    pool.start().await.unwrap();

    let a = connector.latest(&ep("a"));
    a.hang_ping.store(true, Ordering::SeqCst);
    a.fail();
    wait_for_dead(&pool, 1).await;
    tokio::time::sleep(Duration::from_secs(31)).await;

    pool.stop().await;
    for conn in connector.all() {
        assert_eq!(conn.closes(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_queue_once() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology, connector.clone());
    pool.start().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = pool.on_node_failed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let a = connector.latest(&ep("a"));
    a.fail();
    a.fail();
    a.fail();
    wait_for_count(&calls, 3).await;
    assert_eq!(pool.dead_nodes().await.len(), 1);

    assert!(pool.remove_failure_handler(handler));
    assert!(!pool.remove_failure_handler(handler));
    connector.latest(&ep("b")).fail();
    wait_for_dead(&pool, 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_topology_change_clears_dead_nodes() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology.clone(), connector.clone());
    pool.start().await.unwrap();

    let old_a = connector.latest(&ep("a"));
    old_a.fail();
    wait_for_dead(&pool, 1).await;

    topology.set(Ok(vec![ep("a"), ep("b"), ep("c")]));
    pool.refresh().await.unwrap();
    let status = pool.status().await;
    assert_eq!(status.dead_nodes, 0);
    assert!(!status.resurrecting);

    // A report from the retired connection no longer counts.
    old_a.fail();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.status().await.dead_nodes, 0);

    // The new connection to `a` is alive and serving.
    assert!(connector.latest(&ep("a")).is_alive());
    assert_eq!(working_set(&pool).len(), 3);

    pool.stop().await;
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_stop_closes_each_node_once() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b"), ep("c")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology, connector.clone());
    pool.start().await.unwrap();
    connector.latest(&ep("b")).fail();
    wait_for_dead(&pool, 1).await;

    let other = pool.clone();
    tokio::join!(pool.stop(), other.stop());
    pool.stop().await;

    for conn in connector.all() {
        assert_eq!(conn.closes(), 1, "{} closed once", conn.endpoint);
    }
    assert!(matches!(pool.locate("foo"), Err(PoolError::NotStarted)));
    assert!(pool.get_working_nodes().is_empty());
    assert_eq!(pool.refresh().await.unwrap(), RefreshOutcome::Skipped);
    assert!(matches!(pool.start().await, Err(PoolError::Stopped)));

    let status = pool.status().await;
    assert!(!status.polling);
    assert_eq!(status.nodes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_errors_do_not_stop_teardown() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b"), ep("c")]));
    let connector = Arc::new(MockConnector::with_failing_close(&[ep("a")]));
    let pool = pool_with(topology, connector.clone());
    pool.start().await.unwrap();

    pool.stop().await;
    for conn in connector.all() {
        assert_eq!(conn.closes(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failure_after_stop_is_ignored() {
    let topology = Arc::new(ScriptedTopology::new(vec![ep("a"), ep("b")]));
    let connector = Arc::new(MockConnector::default());
    let pool = pool_with(topology, connector.clone());
    pool.start().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    pool.on_node_failed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    pool.stop().await;
    connector.latest(&ep("a")).fail();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pool.status().await.dead_nodes, 0);
}

#[test]
fn test_invalid_config_rejected() {
    let topology: Arc<dyn TopologySource> = Arc::new(StaticTopology::default());
    let connector: Arc<dyn NodeConnector> = Arc::new(MockConnector::default());

    let result = ServerPool::new(PoolConfig::default(), topology.clone(), connector.clone());
    assert!(matches!(result, Err(PoolError::Config(_))));

    let result = ServerPool::new(
        PoolConfig::new("eu-west-1", "sessions").with_mutations_per_node(0),
        topology,
        connector,
    );
    assert!(matches!(result, Err(PoolError::Core(_))));
}
