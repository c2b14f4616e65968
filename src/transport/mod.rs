//! Connect primitives
//!
//! Concrete [`Connector`](crate::connection::Connector) implementations.

mod tcp;

pub use tcp::{TcpConnector, TcpHandle};
