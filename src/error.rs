//! Connection errors

use std::time::Duration;
use thiserror::Error;

use crate::connection::Endpoint;

/// Errors surfaced by connection attempts
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connect primitive failed (bad endpoint, handshake, auth)
    #[error("can not connect to {endpoint}: {reason}")]
    Connect { endpoint: Endpoint, reason: String },

    /// The attempt did not settle within its budget
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint string could not be turned into an address
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manager has been shut down
    #[error("connection manager is shut down")]
    Shutdown,
}

impl ConnectionError {
    /// Build a connect failure for an endpoint
    pub fn connect(endpoint: &Endpoint, reason: impl std::fmt::Display) -> Self {
        Self::Connect {
            endpoint: endpoint.clone(),
            reason: reason.to_string(),
        }
    }

    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result alias for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
