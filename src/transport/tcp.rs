//! TCP connector
//!
//! Plain TCP connections to node endpoints. Inbound bytes are read and
//! discarded so that EOF and socket errors surface as handle signals.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::TransportConfig;
use crate::connection::{ConnectionHandle, Connector, Endpoint, HandleEvent, NetworkOptions};
use crate::error::{ConnectionError, Result};
use crate::util::{create_tcp_socket, SocketOptions};

const READ_BUFFER_SIZE: usize = 16 * 1024;
const EVENT_CAPACITY: usize = 8;

/// Connects to endpoints over TCP
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: TransportConfig,
}

impl TcpConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Socket tuning, with per-network `nodelay`/`keepalive_secs` overrides
    fn socket_options(&self, options: &NetworkOptions) -> SocketOptions {
        let keepalive_secs = options
            .get_u64("keepalive_secs")
            .unwrap_or(self.config.keepalive_secs);

        SocketOptions {
            nodelay: options.get_bool("nodelay").unwrap_or(self.config.nodelay),
            keepalive: (keepalive_secs > 0).then(|| Duration::from_secs(keepalive_secs)),
        }
    }
}

impl Connector for TcpConnector {
    type Handle = TcpHandle;

    async fn establish(&self, endpoint: &Endpoint, options: &NetworkOptions) -> Result<TcpHandle> {
        let (host, port) = split_endpoint(endpoint)?;
        let addr = resolve(endpoint, &host, port).await?;

        let socket = create_tcp_socket(addr, &self.socket_options(options))?;
        let socket = TcpSocket::from_std_stream(std::net::TcpStream::from(socket));

        let stream = socket
            .connect(addr)
            .await
            .map_err(|e| ConnectionError::connect(endpoint, e))?;

        debug!(%endpoint, %addr, "TCP connection established");

        let (reader, writer) = stream.into_split();
        Ok(TcpHandle::new(addr, reader, writer))
    }
}

/// Live TCP connection to one node.
///
/// Signals are emitted once [`ConnectionHandle::ready`] has started the
/// connection monitor.
#[derive(Debug)]
pub struct TcpHandle {
    peer_addr: SocketAddr,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<HandleEvent>,
    /// Taken by the monitor when it starts
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl TcpHandle {
    fn new(peer_addr: SocketAddr, reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            peer_addr,
            connected: Arc::new(AtomicBool::new(true)),
            events,
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            monitor: Mutex::new(None),
        }
    }

    /// Remote socket address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Write raw bytes to the node
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => Ok(w.write_all(data).await?),
            None => Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection closed",
            ))),
        }
    }
}

impl ConnectionHandle for TcpHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn ready(&self) {
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let task = tokio::spawn(monitor(
                reader,
                self.peer_addr,
                self.connected.clone(),
                self.events.clone(),
            ));
            *self.monitor.lock() = Some(task);
        }
    }

    async fn close(&self) {
        let task = self.monitor.lock().take();
        if let Some(task) = task {
            task.abort();
        }
        self.reader.lock().take();
        self.connected.store(false, Ordering::Release);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<HandleEvent> {
        self.events.subscribe()
    }
}

impl Drop for TcpHandle {
    fn drop(&mut self) {
        if let Some(task) = self.monitor.get_mut().take() {
            task.abort();
        }
    }
}

/// Drain inbound bytes until EOF or error, then signal
async fn monitor(
    mut reader: OwnedReadHalf,
    peer_addr: SocketAddr,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<HandleEvent>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let event = loop {
        buf.clear();
        match reader.read_buf(&mut buf).await {
            Ok(0) => break HandleEvent::Disconnected,
            Ok(n) => trace!(%peer_addr, bytes = n, "Discarded inbound bytes"),
            Err(e) => break HandleEvent::Error(e.to_string()),
        }
    };

    connected.store(false, Ordering::Release);
    debug!(%peer_addr, ?event, "Connection monitor stopped");
    let _ = events.send(event);
}

/// Split an endpoint into host and port.
///
/// Accepts `host:port`, `tcp://host:port` and `ws[s]://host[:port][/path]`.
fn split_endpoint(endpoint: &Endpoint) -> Result<(String, u16)> {
    let raw = endpoint.as_str().trim();
    let invalid = |why: &str| ConnectionError::InvalidEndpoint(format!("{raw}: {why}"));

    let (default_port, rest) = match raw.split_once("://") {
        Some(("ws", rest)) => (Some(80), rest),
        Some(("wss", rest)) => (Some(443), rest),
        Some(("tcp", rest)) => (None, rest),
        Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme {scheme}"))),
        None => (None, raw),
    };

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid("missing host"));
    }

    let (host, port) = match authority.strip_prefix('[') {
        Some(bracketed) => {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            (host, after.strip_prefix(':'))
        }
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid("bad port"))?,
        None => default_port.ok_or_else(|| invalid("missing port"))?,
    };

    Ok((host.to_string(), port))
}

async fn resolve(endpoint: &Endpoint, host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ConnectionError::connect(endpoint, format!("resolve failed: {e}")))?;

    addrs
        .next()
        .ok_or_else(|| ConnectionError::connect(endpoint, "no addresses found"))
}
