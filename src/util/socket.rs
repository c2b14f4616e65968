//! Socket utilities and tuning

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Tuning applied to outbound node connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// TCP keepalive idle time (None = disabled)
    pub keepalive: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Create a non-blocking TCP socket for connecting to `addr`
pub fn create_tcp_socket(addr: SocketAddr, options: &SocketOptions) -> io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    socket.set_nodelay(options.nodelay)?;
    socket.set_nonblocking(true)?;

    // Detect dead peers that never send FIN
    if let Some(idle) = options.keepalive {
        let keepalive = TcpKeepalive::new()
            .with_time(idle)
            .with_interval(Duration::from_secs(10));
        socket.set_tcp_keepalive(&keepalive)?;
    }

    Ok(socket)
}
