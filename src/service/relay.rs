//! HTTP pass-through relay.
//!
//! A connection classified as HTTP is never parsed beyond its request head.
//! The bytes already read are forwarded verbatim over a loopback connection
//! to the configured HTTP handler, every later inbound chunk follows them,
//! and the handler's response is streamed back byte-for-byte. When the
//! handler finishes (closes its side), the originating socket is closed.
//!
//! Forwarding failure is terminal for the connection and never retried.

use crate::config::READ_BUFFER_SIZE;
use crate::core::registry::ConnectionRegistry;
use crate::error::{constants, MuxError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Description of a relayed request, parsed from the sniffed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    /// Header name/value pairs in order of appearance, whitespace-trimmed.
    pub headers: Vec<(String, String)>,
}

/// Bytes moved in each direction by one relayed exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaySummary {
    pub request_bytes: u64,
    pub response_bytes: u64,
}

/// Parse the request line and headers up to the first blank line.
///
/// Tolerant by contract: lines split on CRLF (bare LF accepted), each
/// header splits on the first `:` with both sides trimmed, and lines
/// without a colon are skipped. No body parsing is attempted.
pub fn parse_request_head(initial: &[u8]) -> Result<RequestHead> {
    let text = String::from_utf8_lossy(initial);
    let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

    let request_line = lines
        .next()
        .ok_or_else(|| MuxError::RelayForward(constants::ERR_RELAY_BAD_HEAD.to_string()))?;
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => (method.to_string(), target.to_string()),
        _ => return Err(MuxError::RelayForward(constants::ERR_RELAY_BAD_HEAD.to_string())),
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(RequestHead {
        method,
        target,
        headers,
    })
}

/// Forward `initial` plus all later client bytes to the upstream handler
/// and stream the response back, then close the client socket.
///
/// Client bytes seen while relaying are recorded against `conn_id`.
pub(crate) async fn run_relay(
    client: TcpStream,
    initial: &[u8],
    upstream_address: &str,
    registry: &ConnectionRegistry,
    conn_id: &str,
) -> Result<RelaySummary> {
    let head = parse_request_head(initial)?;
    debug!(
        method = %head.method,
        target = %head.target,
        upstream = %upstream_address,
        "Relaying HTTP request"
    );

    let upstream = TcpStream::connect(upstream_address).await.map_err(|e| {
        MuxError::RelayForward(format!("{}: {e}", constants::ERR_RELAY_UNREACHABLE))
    })?;

    let (mut client_read, mut client_write) = client.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    upstream_write
        .write_all(initial)
        .await
        .map_err(|e| MuxError::RelayForward(e.to_string()))?;

    let mut summary = RelaySummary {
        request_bytes: initial.len() as u64,
        response_bytes: 0,
    };
    let mut request_buf = vec![0u8; READ_BUFFER_SIZE];
    let mut response_buf = vec![0u8; READ_BUFFER_SIZE];
    let mut client_eof = false;

    loop {
        tokio::select! {
            read = client_read.read(&mut request_buf), if !client_eof => match read {
                Ok(0) => {
                    // Request side finished; half-close and keep draining the response
                    client_eof = true;
                    let _ = upstream_write.shutdown().await;
                }
                Ok(n) => {
                    registry.record_bytes(conn_id, n as u64)?;
                    summary.request_bytes += n as u64;
                    upstream_write
                        .write_all(&request_buf[..n])
                        .await
                        .map_err(|e| MuxError::RelayForward(e.to_string()))?;
                }
                Err(e) => return Err(e.into()),
            },
            read = upstream_read.read(&mut response_buf) => match read {
                // Response complete once the handler closes its side
                Ok(0) => break,
                Ok(n) => {
                    summary.response_bytes += n as u64;
                    client_write.write_all(&response_buf[..n]).await?;
                }
                Err(e) => return Err(MuxError::RelayForward(e.to_string())),
            },
        }
    }

    let _ = client_write.shutdown().await;
    Ok(summary)
}
