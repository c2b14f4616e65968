//! Connection management
//!
//! Registry of live connections per network, bounded connect attempts,
//! and reconnection on error or disconnect.

mod handle;
mod manager;
mod retry;
mod state;
pub mod timeout;

pub use handle::{ConnectionHandle, Connector, HandleEvent, OptionsProvider, StaticOptions};
pub use manager::{
    BatchReport, ConnectionManager, ConnectionManagerConfig, ManagerEvent,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use retry::ReconnectPolicy;
pub use state::{
    ConnectionRecord, Endpoint, EndpointStatus, NetworkId, NetworkOptions, NetworkStatus,
    RecordId,
};
