//! HTTP API for connection monitoring
//!
//! Provides JSON endpoints for viewing registered connections and stats.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::counters::{MetricsSnapshot, METRICS};
use crate::connection::{ConnectionManager, Connector, NetworkStatus};

/// API response for /connections endpoint
#[derive(Serialize)]
struct ConnectionsResponse {
    count: usize,
    networks: Vec<NetworkStatus>,
}

/// Start the connections API server
///
/// This runs a simple HTTP server that responds to:
/// - GET /connections - Registered endpoints per network
/// - GET /stats - Connection statistics
pub fn start_api_server<C: Connector>(addr: SocketAddr, manager: Arc<ConnectionManager<C>>) {
    thread::spawn(move || {
        if let Err(e) = run_api_server(addr, manager) {
            error!(error = %e, "API server error");
        }
    });
    info!(%addr, "Connections API server started");
}

fn run_api_server<C: Connector>(
    addr: SocketAddr,
    manager: Arc<ConnectionManager<C>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let manager = manager.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_request(stream, &manager) {
                        debug!(error = %e, "Request handling error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }

    Ok(())
}

fn handle_request<C: Connector>(
    mut stream: TcpStream,
    manager: &ConnectionManager<C>,
) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer)?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let (status, body) = route(path, manager.status(), METRICS.snapshot());

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(())
}

fn route(path: &str, networks: Vec<NetworkStatus>, stats: MetricsSnapshot) -> (&'static str, String) {
    match path {
        "/connections" => {
            let response = ConnectionsResponse {
                count: networks.iter().map(|n| n.endpoints.len()).sum(),
                networks,
            };
            ("200 OK", serde_json::to_string_pretty(&response).unwrap_or_default())
        }
        "/stats" => ("200 OK", serde_json::to_string_pretty(&stats).unwrap_or_default()),
        "/" => {
            let help = r#"{
  "endpoints": {
    "/connections": "Registered endpoints per network",
    "/stats": "Connection statistics"
  }
}"#;
            ("200 OK", help.to_string())
        }
        _ => ("404 Not Found", r#"{"error": "Not found"}"#.to_string()),
    }
}
