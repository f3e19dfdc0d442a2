//! HTTP API for pipeline monitoring
//!
//! Serves the counter snapshot as JSON.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::counters::{MetricsSnapshot, METRICS};

/// API response for /stats endpoint
#[derive(Serialize)]
struct StatsResponse {
    version: &'static str,
    #[serde(flatten)]
    counters: MetricsSnapshot,
    /// Buffers acquired but not yet recycled, across all pools
    buffers_in_flight: u64,
}

impl StatsResponse {
    fn current() -> Self {
        let counters = METRICS.snapshot();
        Self {
            version: crate::VERSION,
            buffers_in_flight: counters
                .buffers_acquired
                .saturating_sub(counters.buffers_recycled),
            counters,
        }
    }
}

/// Start the stats API server
///
/// Responds to:
/// - GET /stats - Pipeline counters
pub fn start_api_server(addr: SocketAddr) -> Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("Failed to bind stats API on {}", addr))?;
    let local = listener.local_addr()?;

    thread::Builder::new()
        .name("stats-api".to_string())
        .spawn(move || run_api_server(listener))
        .context("Failed to spawn stats API thread")?;

    info!(addr = %local, "Stats API server started");
    Ok(local)
}

fn run_api_server(listener: TcpListener) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(e) = handle_request(stream) {
                    debug!(error = %e, "Request handling error");
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }
    error!("Stats API listener closed");
}

fn handle_request(mut stream: TcpStream) -> std::io::Result<()> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer)?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    let (status, body) = route(request.lines().next().unwrap_or(""));

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
    stream.flush()
}

fn route(request_line: &str) -> (&'static str, String) {
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");

    match path {
        "/stats" => match serde_json::to_string_pretty(&StatsResponse::current()) {
            Ok(body) => ("200 OK", body),
            Err(e) => (
                "500 Internal Server Error",
                serde_json::json!({ "error": e.to_string() }).to_string(),
            ),
        },
        _ => ("404 Not Found", r#"{"error": "Not found"}"#.to_string()),
    }
}
