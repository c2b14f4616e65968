//! Connection manager integration tests
//!
//! Driven by a scripted in-memory connector; timing tests run on a paused
//! clock.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use nodepool::connection::{
    ConnectionHandle, ConnectionManager, ConnectionManagerConfig, Connector, Endpoint,
    HandleEvent, ManagerEvent, NetworkId, NetworkOptions, ReconnectPolicy, StaticOptions,
};
use nodepool::error::{ConnectionError, Result};

/// Scripted outcome of one establish call
#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    Fail,
    /// Succeed after a delay
    Delay(Duration),
}

/// State shared between a test and its connector
#[derive(Default)]
struct Script {
    steps: Mutex<HashMap<Endpoint, VecDeque<Step>>>,
    attempts: Mutex<HashMap<Endpoint, usize>>,
    log: Mutex<Vec<String>>,
    serial: AtomicUsize,
    closed_total: AtomicUsize,
}

impl Script {
    fn push(&self, endpoint: &str, steps: &[Step]) {
        self.steps
            .lock()
            .entry(Endpoint::from(endpoint))
            .or_default()
            .extend(steps.iter().copied());
    }

    fn attempts(&self, endpoint: &str) -> usize {
        self.attempts
            .lock()
            .get(&Endpoint::from(endpoint))
            .copied()
            .unwrap_or(0)
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn closed_total(&self) -> usize {
        self.closed_total.load(Ordering::SeqCst)
    }
}

struct ScriptedHandle {
    serial: usize,
    connected: AtomicBool,
    closed: AtomicBool,
    events: broadcast::Sender<HandleEvent>,
    script: Arc<Script>,
}

impl ScriptedHandle {
    fn emit(&self, event: HandleEvent) {
        self.events.send(event).unwrap();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionHandle for ScriptedHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ready(&self) {}

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.script.closed_total.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<HandleEvent> {
        self.events.subscribe()
    }
}

/// Logs "settle:<endpoint>" when an attempt finishes or is cancelled
struct AttemptGuard {
    script: Arc<Script>,
    endpoint: Endpoint,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.script.log.lock().push(format!("settle:{}", self.endpoint));
    }
}

struct ScriptedConnector {
    script: Arc<Script>,
}

impl Connector for ScriptedConnector {
    type Handle = ScriptedHandle;

    async fn establish(&self, endpoint: &Endpoint, _options: &NetworkOptions) -> Result<ScriptedHandle> {
        *self.script.attempts.lock().entry(endpoint.clone()).or_default() += 1;
        self.script.log.lock().push(format!("start:{endpoint}"));
        let _guard = AttemptGuard {
            script: self.script.clone(),
            endpoint: endpoint.clone(),
        };

        let step = self
            .script
            .steps
            .lock()
            .get_mut(endpoint)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Succeed);

        match step {
            Step::Succeed => {}
            Step::Fail => return Err(ConnectionError::connect(endpoint, "handshake refused")),
            Step::Delay(delay) => tokio::time::sleep(delay).await,
        }

        let (events, _) = broadcast::channel(4);
        Ok(ScriptedHandle {
            serial: self.script.serial.fetch_add(1, Ordering::SeqCst),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            events,
            script: self.script.clone(),
        })
    }
}

type Manager = Arc<ConnectionManager<ScriptedConnector>>;

fn setup_with(reconnect: ReconnectPolicy) -> (Manager, Arc<Script>) {
    let script = Arc::new(Script::default());
    let manager = ConnectionManager::new(
        ScriptedConnector {
            script: script.clone(),
        },
        Arc::new(StaticOptions::new()),
        ConnectionManagerConfig {
            connect_timeout: Duration::from_secs(20),
            reconnect,
        },
    );
    (manager, script)
}

fn setup() -> (Manager, Arc<Script>) {
    setup_with(ReconnectPolicy::single_attempt())
}

fn endpoints(list: &[&str]) -> Vec<Endpoint> {
    list.iter().map(|e| Endpoint::from(*e)).collect()
}

/// Paused-clock elapsed time, allowing for timer tick rounding
fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "elapsed {elapsed:?}, expected {expected:?}"
    );
}

async fn next_event(events: &mut broadcast::Receiver<ManagerEvent>) -> ManagerEvent {
    tokio::time::timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("timed out waiting for manager event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_duplicate_connect_keeps_existing_handle() {
    let (manager, script) = setup();
    let network = NetworkId::from("polkadot");
    let endpoint = Endpoint::from("wss://a");
    let mut events = manager.subscribe_events();

    assert_ok!(manager.connect(&network, &endpoint).await);
    let original = manager.list_connections(&network);
    assert_ok!(manager.connect(&network, &endpoint).await);

    let current = manager.list_connections(&network);
    assert_eq!(current.len(), 1);
    assert!(Arc::ptr_eq(&original[0], &current[0]));
    assert!(!current[0].is_closed());
    assert!(current[0].is_connected());
    assert_eq!(script.attempts("wss://a"), 2);
    // The discarded duplicate was closed
    assert_eq!(script.closed_total(), 1);

    assert!(matches!(next_event(&mut events).await, ManagerEvent::Registered { .. }));
    assert_eq!(
        next_event(&mut events).await,
        ManagerEvent::DuplicateDropped {
            network,
            endpoint
        }
    );
}

#[tokio::test]
async fn test_same_endpoint_in_different_networks() {
    let (manager, _script) = setup();
    let endpoint = Endpoint::from("wss://shared");

    assert_ok!(manager.connect(&NetworkId::from("a"), &endpoint).await);
    assert_ok!(manager.connect(&NetworkId::from("b"), &endpoint).await);

    assert_eq!(manager.connection_count(), 2);
    assert_eq!(manager.networks(), vec![NetworkId::from("a"), NetworkId::from("b")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_register_once() {
    let (manager, script) = setup();
    let network = NetworkId::from("kusama");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        let network = network.clone();
        tasks.push(tokio::spawn(async move {
            manager.connect(&network, &Endpoint::from("wss://k")).await
        }));
    }
    for task in tasks {
        assert_ok!(task.await.unwrap());
    }

    assert_eq!(manager.endpoints(&network), endpoints(&["wss://k"]));
    assert_eq!(script.attempts("wss://k"), 16);
    assert_eq!(script.closed_total(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_batch_attempts_are_sequential() {
    let (manager, script) = setup();
    let network = NetworkId::from("polkadot");
    script.push("e1", &[Step::Delay(Duration::from_secs(3))]);
    script.push("e2", &[Step::Delay(Duration::from_secs(3600))]);
    script.push("e3", &[Step::Fail]);

    let start = Instant::now();
    let report = manager
        .connect_all_for_network(&network, &endpoints(&["e1", "e2", "e3"]))
        .await;

    assert_eq!(
        script.log(),
        vec!["start:e1", "settle:e1", "start:e2", "settle:e2", "start:e3", "settle:e3"]
    );
    assert_eq!(report.connected, endpoints(&["e1"]));
    assert_eq!(report.dropped.len(), 2);
    // 3s for e1, the full 20s budget for e2, nothing for e3
    assert_elapsed(start, Duration::from_secs(23));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_bound_and_cancels_attempt() {
    let (manager, script) = setup();
    let network = NetworkId::from("polkadot");
    let endpoint = Endpoint::from("slow");
    script.push("slow", &[Step::Delay(Duration::from_secs(6))]);

    let start = Instant::now();
    let err = assert_err!(
        manager
            .connect_within_timeout(&network, &endpoint, Duration::from_secs(5))
            .await
    );

    assert!(err.is_timeout());
    assert_elapsed(start, Duration::from_secs(5));
    assert_eq!(script.log(), vec!["start:slow", "settle:slow"]);

    // The cancelled attempt never registers itself later
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(manager.list_connections(&network).is_empty());
}

#[tokio::test]
async fn test_batch_survives_immediate_failure() {
    let (manager, script) = setup();
    let network = NetworkId::from("kusama");
    script.push("e1", &[Step::Fail]);
    let mut events = manager.subscribe_events();

    let report = manager
        .connect_all_for_network(&network, &endpoints(&["e1", "", "e2", "e3"]))
        .await;

    assert_eq!(report.connected, endpoints(&["e2", "e3"]));
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].0, Endpoint::from("e1"));
    assert_eq!(script.attempts("e2"), 1);
    assert_eq!(script.attempts("e3"), 1);
    // Blank entries are skipped entirely
    assert_eq!(script.attempts(""), 0);
    assert_eq!(manager.endpoints(&network), endpoints(&["e2", "e3"]));

    assert!(matches!(
        next_event(&mut events).await,
        ManagerEvent::Dropped { endpoint, .. } if endpoint == Endpoint::from("e1")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_triggers_reconnect() {
    let (manager, script) = setup();
    let network = NetworkId::from("polkadot");
    let endpoint = Endpoint::from("wss://a");
    script.push("wss://a", &[Step::Succeed, Step::Delay(Duration::from_secs(10))]);

    assert_ok!(manager.connect(&network, &endpoint).await);
    let original = manager.list_connections(&network).remove(0);
    let mut events = manager.subscribe_events();

    original.emit(HandleEvent::Disconnected);
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Record removed before the new attempt completes
    assert!(manager.list_connections(&network).is_empty());
    assert!(original.is_closed());
    assert_eq!(script.attempts("wss://a"), 2);

    assert!(matches!(next_event(&mut events).await, ManagerEvent::Registered { .. }));
    assert_eq!(
        next_event(&mut events).await,
        ManagerEvent::Reconnected {
            network: network.clone(),
            endpoint,
            attempts: 1
        }
    );

    let replacement = manager.list_connections(&network);
    assert_eq!(replacement.len(), 1);
    assert_ne!(replacement[0].serial, original.serial);
}

#[tokio::test(start_paused = true)]
async fn test_error_signal_retries_with_backoff() {
    let policy = ReconnectPolicy {
        max_retries: Some(3),
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        multiplier: 2.0,
    };
    let (manager, script) = setup_with(policy);
    let network = NetworkId::from("kusama");
    let endpoint = Endpoint::from("wss://k");
    script.push("wss://k", &[Step::Succeed, Step::Fail, Step::Fail, Step::Succeed]);

    assert_ok!(manager.connect(&network, &endpoint).await);
    let mut events = manager.subscribe_events();
    let start = Instant::now();

    manager.list_connections(&network)[0].emit(HandleEvent::Error("reset".into()));

    loop {
        if let ManagerEvent::Reconnected { attempts, .. } = next_event(&mut events).await {
            assert_eq!(attempts, 3);
            break;
        }
    }
    // Backoff of 1s then 2s between the failed attempts
    assert_elapsed(start, Duration::from_secs(3));
    assert_eq!(script.attempts("wss://k"), 4);
    assert_eq!(manager.connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_failure_is_reported() {
    let policy = ReconnectPolicy {
        max_retries: Some(1),
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(1),
        multiplier: 2.0,
    };
    let (manager, script) = setup_with(policy);
    let network = NetworkId::from("polkadot");
    let endpoint = Endpoint::from("wss://gone");
    script.push("wss://gone", &[Step::Succeed, Step::Fail, Step::Fail]);

    assert_ok!(manager.connect(&network, &endpoint).await);
    let mut events = manager.subscribe_events();
    manager.list_connections(&network)[0].emit(HandleEvent::Disconnected);

    match next_event(&mut events).await {
        ManagerEvent::ReconnectFailed {
            endpoint: failed,
            attempts,
            reason,
            ..
        } => {
            assert_eq!(failed, endpoint);
            assert_eq!(attempts, 2);
            assert!(reason.contains("handshake refused"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(manager.list_connections(&network).is_empty());
}

#[tokio::test]
async fn test_status_report_reflects_liveness() {
    let (manager, _script) = setup();
    let network = NetworkId::from("polkadot");
    assert_ok!(manager.connect(&network, &Endpoint::from("up")).await);
    assert_ok!(manager.connect(&network, &Endpoint::from("down")).await);

    manager.list_connections(&network)[1]
        .connected
        .store(false, Ordering::SeqCst);

    let status = manager.report_status();

    assert_eq!(status.len(), 1);
    assert_eq!(status[0].network, network);
    let flags: Vec<(String, bool)> = status[0]
        .endpoints
        .iter()
        .map(|e| (e.endpoint.to_string(), e.connected))
        .collect();
    assert_eq!(flags, vec![("up".to_string(), true), ("down".to_string(), false)]);
    assert_eq!(status[0].connected_count(), 1);
    // Pure read
    assert_eq!(manager.connection_count(), 2);
}

#[tokio::test]
async fn test_connect_networks_runs_every_network() {
    let (manager, script) = setup();
    script.push("k2", &[Step::Fail]);

    let reports = manager
        .connect_networks(vec![
            (NetworkId::from("polkadot"), endpoints(&["p1", "p2"])),
            (NetworkId::from("kusama"), endpoints(&["k1", "k2"])),
        ])
        .await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].0, NetworkId::from("kusama"));
    assert_eq!(reports[0].1.connected, endpoints(&["k1"]));
    assert_eq!(reports[1].1.connected, endpoints(&["p1", "p2"]));
    assert_eq!(manager.connection_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reconnects() {
    let (manager, script) = setup();
    let network = NetworkId::from("polkadot");
    assert_ok!(manager.connect(&network, &Endpoint::from("wss://a")).await);
    let handle = manager.list_connections(&network).remove(0);

    manager.shutdown().await;
    assert!(handle.is_closed());

    let _ = handle.events.send(HandleEvent::Disconnected);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(script.attempts("wss://a"), 1);
    assert_eq!(manager.connection_count(), 0);
    assert!(manager.is_shut_down());
}
