//! Nodepool - fault-tolerant connections to remote network nodes
//!
//! Keeps live connections to the configured endpoints of several logical
//! networks, bounds each connect attempt by a timeout, suppresses duplicate
//! connections, and reconnects endpoints whose connection errors or drops.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod transport;
pub mod util;

pub use config::Config;
pub use connection::{ConnectionManager, ConnectionManagerConfig, Endpoint, NetworkId};
pub use error::ConnectionError;

/// Crate version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
