//! Collaborator seams: the connect primitive, its handles, and option lookup

use std::collections::HashMap;
use std::future::Future;
use tokio::sync::broadcast;

use super::state::{Endpoint, NetworkId, NetworkOptions};
use crate::error::Result;

/// Signal emitted by a live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
    /// The connection reported an error
    Error(String),
    /// The connection dropped
    Disconnected,
}

/// An established connection to one endpoint
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Liveness flag
    fn is_connected(&self) -> bool;

    /// Resolves once the connection is usable
    fn ready(&self) -> impl Future<Output = ()> + Send;

    /// Close the connection. Must not emit further events.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Subscribe to error/disconnect signals.
    ///
    /// A closed channel is treated as a disconnect.
    fn subscribe(&self) -> broadcast::Receiver<HandleEvent>;
}

/// Establishes connections to endpoints
pub trait Connector: Send + Sync + 'static {
    type Handle: ConnectionHandle;

    /// Connect to `endpoint` using the network's options
    fn establish(
        &self,
        endpoint: &Endpoint,
        options: &NetworkOptions,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// Maps a network to its connection options
pub trait OptionsProvider: Send + Sync + 'static {
    /// Options for `network`; unknown networks get the empty default
    fn lookup(&self, network: &NetworkId) -> NetworkOptions;
}

/// Options provider backed by a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticOptions {
    table: HashMap<NetworkId, NetworkOptions>,
}

impl StaticOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, network: NetworkId, options: NetworkOptions) {
        self.table.insert(network, options);
    }
}

impl FromIterator<(NetworkId, NetworkOptions)> for StaticOptions {
    fn from_iter<I: IntoIterator<Item = (NetworkId, NetworkOptions)>>(iter: I) -> Self {
        Self {
            table: iter.into_iter().collect(),
        }
    }
}

impl OptionsProvider for StaticOptions {
    fn lookup(&self, network: &NetworkId) -> NetworkOptions {
        self.table.get(network).cloned().unwrap_or_default()
    }
}
