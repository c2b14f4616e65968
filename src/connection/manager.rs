//! Connection manager
//!
//! Owns the per-network registry of live connections and keeps it
//! populated: bounded connect attempts, duplicate suppression, and
//! reconnection when a registered connection errors or drops.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::handle::{ConnectionHandle, Connector, HandleEvent, OptionsProvider};
use super::retry::ReconnectPolicy;
use super::state::{
    ConnectionRecord, Endpoint, EndpointStatus, NetworkId, NetworkStatus, RecordId,
};
use super::timeout;
use crate::error::{ConnectionError, Result};
use crate::metrics::METRICS;

/// Budget for a single bounded connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

const EVENT_CAPACITY: usize = 256;

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Budget per endpoint in batch connection
    pub connect_timeout: Duration,
    /// How dropped connections are re-established
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Lifecycle events published by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// A ready connection was added to the registry
    Registered { network: NetworkId, endpoint: Endpoint },
    /// A new connection was discarded because the endpoint was already registered
    DuplicateDropped { network: NetworkId, endpoint: Endpoint },
    /// Batch connection gave up on an endpoint
    Dropped {
        network: NetworkId,
        endpoint: Endpoint,
        reason: String,
    },
    /// A dropped connection was re-established
    Reconnected {
        network: NetworkId,
        endpoint: Endpoint,
        attempts: u32,
    },
    /// Every reconnect attempt failed
    ReconnectFailed {
        network: NetworkId,
        endpoint: Endpoint,
        attempts: u32,
        reason: String,
    },
}

/// Per-endpoint outcome of a batch connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub connected: Vec<Endpoint>,
    pub dropped: Vec<(Endpoint, String)>,
}

/// Error/disconnect signal forwarded from a watcher to the supervisor
#[derive(Debug)]
struct Signal {
    network: NetworkId,
    endpoint: Endpoint,
    id: RecordId,
    event: HandleEvent,
}

type Registry<H> = DashMap<NetworkId, Vec<ConnectionRecord<H>>>;

/// Manages live connections for every network
pub struct ConnectionManager<C: Connector> {
    connector: C,
    options: Arc<dyn OptionsProvider>,
    /// Registered connections, per network in registration order
    registry: Registry<C::Handle>,
    /// Record ID generator
    next_id: AtomicU64,
    config: ConnectionManagerConfig,
    /// Watchers forward handle signals here
    signal_tx: mpsc::UnboundedSender<Signal>,
    events_tx: broadcast::Sender<ManagerEvent>,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a new connection manager.
    ///
    /// Must be called within a Tokio runtime: the reconnect supervisor is
    /// spawned here and lives as long as the manager.
    pub fn new(
        connector: C,
        options: Arc<dyn OptionsProvider>,
        config: ConnectionManagerConfig,
    ) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();

        let manager = Arc::new(Self {
            connector,
            options,
            registry: DashMap::new(),
            next_id: AtomicU64::new(1),
            config,
            signal_tx,
            events_tx,
            shutdown_tx,
            shut_down: AtomicBool::new(false),
        });

        tokio::spawn(supervise(Arc::downgrade(&manager), signal_rx, shutdown_rx));

        manager
    }

    /// Manager configuration
    pub fn config(&self) -> &ConnectionManagerConfig {
        &self.config
    }

    /// Connect to `endpoint` and register the connection under `network`.
    ///
    /// Only the connect primitive can fail this call. If the endpoint is
    /// already registered the new connection is closed and the existing one
    /// stays authoritative.
    pub async fn connect(&self, network: &NetworkId, endpoint: &Endpoint) -> Result<()> {
        if self.is_shut_down() {
            return Err(ConnectionError::Shutdown);
        }

        let options = self.options.lookup(network);
        METRICS.connect_attempted();

        let handle = match self.connector.establish(endpoint, &options).await {
            Ok(handle) => handle,
            Err(e) => {
                METRICS.connect_failed();
                error!(%network, %endpoint, error = %e, "Can not connect to endpoint");
                return Err(e);
            }
        };
        METRICS.connect_succeeded();

        // Subscribe before the readiness wait so no signal is missed
        let signals = handle.subscribe();

        if self.contains(network, endpoint) {
            self.discard_duplicate(network, endpoint, &handle).await;
            return Ok(());
        }

        handle.ready().await;

        // Shutdown may have drained the registry while this attempt was in flight
        if self.is_shut_down() {
            handle.close().await;
            return Err(ConnectionError::Shutdown);
        }

        let handle = Arc::new(handle);
        let id = RecordId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = ConnectionRecord::new(id, endpoint.clone(), handle.clone());

        if !self.try_register(network, record) {
            self.discard_duplicate(network, endpoint, &handle).await;
            return Ok(());
        }

        METRICS.connection_opened();
        info!(%network, %endpoint, record = %id, "Connection registered");

        self.spawn_watcher(network.clone(), endpoint.clone(), id, signals);
        self.publish(ManagerEvent::Registered {
            network: network.clone(),
            endpoint: endpoint.clone(),
        });

        Ok(())
    }

    /// Connect within `budget`, failing with [`ConnectionError::Timeout`]
    /// otherwise. A timed-out attempt is cancelled.
    pub async fn connect_within_timeout(
        &self,
        network: &NetworkId,
        endpoint: &Endpoint,
        budget: Duration,
    ) -> Result<()> {
        let result = timeout::race(self.connect(network, endpoint), budget).await;
        if matches!(result, Err(ConnectionError::Timeout(_))) {
            METRICS.timeout();
            debug!(%network, %endpoint, budget_secs = budget.as_secs_f64(), "Connect attempt cancelled");
        }
        result
    }

    /// Connect every non-blank endpoint, one at a time, in list order.
    ///
    /// Never fails: endpoints that error or time out are logged and dropped.
    pub async fn connect_all_for_network(
        &self,
        network: &NetworkId,
        endpoints: &[Endpoint],
    ) -> BatchReport {
        let budget = self.config.connect_timeout;
        let mut report = BatchReport::default();

        for endpoint in endpoints.iter().filter(|e| !e.is_blank()) {
            match self.connect_within_timeout(network, endpoint, budget).await {
                Ok(()) => {
                    info!(%network, %endpoint, "Endpoint connected");
                    report.connected.push(endpoint.clone());
                }
                Err(e) => {
                    info!(
                        %network,
                        %endpoint,
                        budget_secs = budget.as_secs(),
                        error = %e,
                        "Can not connect to endpoint in time, dropping it"
                    );
                    self.publish(ManagerEvent::Dropped {
                        network: network.clone(),
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    });
                    report.dropped.push((endpoint.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Batch-connect several networks concurrently.
    ///
    /// Endpoints within one network stay sequential. Reports come back
    /// sorted by network.
    pub async fn connect_networks<I>(self: &Arc<Self>, networks: I) -> Vec<(NetworkId, BatchReport)>
    where
        I: IntoIterator<Item = (NetworkId, Vec<Endpoint>)>,
    {
        let mut tasks = JoinSet::new();
        for (network, endpoints) in networks {
            let manager = Arc::clone(self);
            tasks.spawn(async move {
                let report = manager.connect_all_for_network(&network, &endpoints).await;
                (network, report)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Network connect task failed"),
            }
        }
        reports.sort_by(|a, b| a.0.cmp(&b.0));
        reports
    }

    /// Handles registered for `network`, in registration order
    pub fn list_connections(&self, network: &NetworkId) -> Vec<Arc<C::Handle>> {
        self.registry
            .get(network)
            .map(|records| records.iter().map(|r| Arc::clone(&r.handle)).collect())
            .unwrap_or_default()
    }

    /// Endpoints registered for `network`, in registration order
    pub fn endpoints(&self, network: &NetworkId) -> Vec<Endpoint> {
        self.registry
            .get(network)
            .map(|records| records.iter().map(|r| r.endpoint.clone()).collect())
            .unwrap_or_default()
    }

    /// Networks present in the registry
    pub fn networks(&self) -> Vec<NetworkId> {
        let mut networks: Vec<NetworkId> =
            self.registry.iter().map(|entry| entry.key().clone()).collect();
        networks.sort();
        networks
    }

    /// Total registered connections
    pub fn connection_count(&self) -> usize {
        self.registry.iter().map(|entry| entry.value().len()).sum()
    }

    /// Snapshot of every network's endpoints and liveness
    pub fn status(&self) -> Vec<NetworkStatus> {
        let mut status: Vec<NetworkStatus> = self
            .registry
            .iter()
            .map(|entry| NetworkStatus {
                network: entry.key().clone(),
                endpoints: entry
                    .value()
                    .iter()
                    .map(|record| EndpointStatus {
                        endpoint: record.endpoint.clone(),
                        connected: record.handle.is_connected(),
                        duration_secs: record.duration().as_secs_f64(),
                    })
                    .collect(),
            })
            .collect();
        status.sort_by(|a, b| a.network.cmp(&b.network));
        status
    }

    /// Log every network's endpoints and liveness, returning the snapshot
    pub fn report_status(&self) -> Vec<NetworkStatus> {
        let status = self.status();
        for network in &status {
            info!(network = %network.network, "Network status");
            for endpoint in &network.endpoints {
                info!(
                    network = %network.network,
                    endpoint = %endpoint.endpoint,
                    connected = endpoint.connected,
                    "Endpoint status"
                );
            }
        }
        status
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events_tx.subscribe()
    }

    /// Check if shutdown has started
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop reconnecting and close every registered connection
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(
            connections = self.connection_count(),
            "Shutting down connection manager"
        );
        let _ = self.shutdown_tx.send(());

        let networks: Vec<NetworkId> = self.registry.iter().map(|e| e.key().clone()).collect();
        let mut drained = Vec::new();
        for network in networks {
            if let Some((_, records)) = self.registry.remove(&network) {
                drained.extend(records);
            }
        }

        for record in drained {
            record.handle.close().await;
            METRICS.connection_closed();
        }

        info!("All connections closed");
    }

    fn contains(&self, network: &NetworkId, endpoint: &Endpoint) -> bool {
        self.registry
            .get(network)
            .map(|records| records.iter().any(|r| &r.endpoint == endpoint))
            .unwrap_or(false)
    }

    /// Append under the network's entry lock unless the endpoint is taken
    fn try_register(&self, network: &NetworkId, record: ConnectionRecord<C::Handle>) -> bool {
        let mut records = self.registry.entry(network.clone()).or_default();
        if records.iter().any(|r| r.endpoint == record.endpoint) {
            return false;
        }
        records.push(record);
        true
    }

    /// Remove the record with `id`, leaving newer records for the endpoint alone
    fn remove_record(&self, network: &NetworkId, id: RecordId) -> Option<ConnectionRecord<C::Handle>> {
        let mut records = self.registry.get_mut(network)?;
        let position = records.iter().position(|r| r.id == id)?;
        Some(records.remove(position))
    }

    async fn discard_duplicate(&self, network: &NetworkId, endpoint: &Endpoint, handle: &C::Handle) {
        METRICS.duplicate_dropped();
        info!(%network, %endpoint, "Endpoint already registered, ignoring new connection");
        handle.close().await;
        self.publish(ManagerEvent::DuplicateDropped {
            network: network.clone(),
            endpoint: endpoint.clone(),
        });
    }

    /// Forward the handle's first error/disconnect signal to the supervisor
    fn spawn_watcher(
        &self,
        network: NetworkId,
        endpoint: Endpoint,
        id: RecordId,
        mut signals: broadcast::Receiver<HandleEvent>,
    ) {
        let signal_tx = self.signal_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let event = loop {
                tokio::select! {
                    received = signals.recv() => match received {
                        Ok(event) => break event,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break HandleEvent::Disconnected,
                    },
                    _ = shutdown_rx.recv() => return,
                }
            };

            let _ = signal_tx.send(Signal {
                network,
                endpoint,
                id,
                event,
            });
        });
    }

    /// Drop the signalling record and re-establish its endpoint
    async fn reconnect(&self, signal: Signal) {
        let Signal {
            network,
            endpoint,
            id,
            event,
        } = signal;
        METRICS.disconnect_signalled();

        let Some(record) = self.remove_record(&network, id) else {
            debug!(%network, %endpoint, record = %id, "Record already gone, skipping reconnect");
            return;
        };
        METRICS.connection_closed();

        match &event {
            HandleEvent::Error(reason) => {
                info!(%network, %endpoint, %reason, "Connection errored")
            }
            HandleEvent::Disconnected => info!(%network, %endpoint, "Connection dropped"),
        }
        record.handle.close().await;

        info!(%network, %endpoint, "Reconnecting");

        let policy = &self.config.reconnect;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut retry = 0u32;

        let outcome = loop {
            match self.connect(&network, &endpoint).await {
                Ok(()) => break Ok(()),
                Err(ConnectionError::Shutdown) => return,
                Err(e) if policy.should_retry(retry) => {
                    let delay = policy.delay_for_retry(retry);
                    retry += 1;
                    debug!(
                        %network,
                        %endpoint,
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reconnect attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => return,
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let attempts = retry + 1;
        match outcome {
            Ok(()) => {
                METRICS.reconnect_succeeded();
                info!(%network, %endpoint, attempts, "Reconnected");
                self.publish(ManagerEvent::Reconnected {
                    network,
                    endpoint,
                    attempts,
                });
            }
            Err(e) => {
                METRICS.reconnect_failed();
                warn!(%network, %endpoint, attempts, error = %e, "Giving up reconnecting");
                self.publish(ManagerEvent::ReconnectFailed {
                    network,
                    endpoint,
                    attempts,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn publish(&self, event: ManagerEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Reconnect supervisor: one reconnect task per forwarded signal
async fn supervise<C: Connector>(
    manager: Weak<ConnectionManager<C>>,
    mut signal_rx: mpsc::UnboundedReceiver<Signal>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            signal = signal_rx.recv() => {
                let Some(signal) = signal else { break };
                let Some(manager) = manager.upgrade() else { break };
                tokio::spawn(async move {
                    manager.reconnect(signal).await;
                });
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("Reconnect supervisor stopped");
}
