//! Registry state types

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Identifier of a logical network (a group of interchangeable nodes)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NetworkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Address of one remote node within a network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank entries are skipped by batch connection
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Endpoint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Connection options for one network.
///
/// Opaque to the manager; only the connector interprets the keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkOptions(serde_json::Map<String, serde_json::Value>);

impl NetworkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, returning the updated set
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Unique identifier of one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A registered, ready connection to one endpoint
#[derive(Debug)]
pub struct ConnectionRecord<H> {
    pub id: RecordId,
    pub endpoint: Endpoint,
    pub handle: Arc<H>,
    pub connected_at: Instant,
}

impl<H> ConnectionRecord<H> {
    pub fn new(id: RecordId, endpoint: Endpoint, handle: Arc<H>) -> Self {
        Self {
            id,
            endpoint,
            handle,
            connected_at: Instant::now(),
        }
    }

    /// Time since registration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

/// Serializable status of one registered endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub connected: bool,
    pub duration_secs: f64,
}

/// Serializable status of one network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStatus {
    pub network: NetworkId,
    pub endpoints: Vec<EndpointStatus>,
}

impl NetworkStatus {
    /// Number of endpoints currently reporting connected
    pub fn connected_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.connected).count()
    }
}
