//! Admin command server.
//!
//! A separate listener speaking newline-terminated ASCII: one command per
//! line, verb matched case-insensitively, one response per command on the
//! same connection. The connection stays open until the peer closes it.
//!
//! Every command gets a response line, including internal failures; the
//! admin peer never sees a silently dropped command.
//!
//! | Command      | Effect                         |
//! |--------------|--------------------------------|
//! | `stats`      | per-connection metrics + totals |
//! | `banned`     | list of banned IPs             |
//! | `unban <ip>` | lift a ban                     |
//! | anything else| unknown-command message        |

use crate::core::ban::BanStore;
use crate::core::registry::ConnectionRegistry;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Serve one admin connection until the peer closes it.
pub(crate) async fn handle_admin_conn(
    stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
    ban_store: Arc<dyn BanStore>,
) {
    let peer = stream.peer_addr().ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = LinesStream::new(BufReader::new(read_half).lines());

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(peer = ?peer, error = %e, "Admin connection read failed");
                break;
            }
        };

        let response = execute_command(&line, &registry, ban_store.as_ref()).await;
        if let Err(e) = write_half.write_all(response.as_bytes()).await {
            debug!(peer = ?peer, error = %e, "Admin connection write failed");
            break;
        }
    }
}

/// Run one command line and render its response. Always produces at least
/// one line, even when the registry or the ban store errors out.
pub async fn execute_command(
    line: &str,
    registry: &ConnectionRegistry,
    ban_store: &dyn BanStore,
) -> String {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("").to_ascii_lowercase();

    match verb.as_str() {
        "stats" => render_stats(registry),
        "banned" => render_banned(ban_store).await,
        "unban" => unban(parts.next(), ban_store).await,
        "" => "unknown command\n".to_string(),
        other => format!("unknown command: {other}\n"),
    }
}

fn render_stats(registry: &ConnectionRegistry) -> String {
    let snapshot = match registry.snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Stats snapshot failed");
            return format!("error: {e}\n");
        }
    };
    let aggregate = match registry.aggregate() {
        Ok(aggregate) => aggregate,
        Err(e) => return format!("error: {e}\n"),
    };

    let mut out = String::new();
    let _ = writeln!(out, "connections: {}", snapshot.len());
    for conn in &snapshot {
        let _ = writeln!(
            out,
            "{} started={} bytes={} errors={}",
            conn.id,
            humantime::format_rfc3339_seconds(conn.started_at),
            conn.bytes_received,
            conn.error_count
        );
    }
    let _ = writeln!(
        out,
        "total: accepted={} active={} errors={}",
        aggregate.total_connections, aggregate.active_connections, aggregate.total_errors
    );
    out
}

async fn render_banned(ban_store: &dyn BanStore) -> String {
    match ban_store.list().await {
        Ok(ips) if ips.is_empty() => "no banned ips\n".to_string(),
        Ok(ips) => {
            let mut out = String::new();
            let _ = writeln!(out, "banned: {}", ips.len());
            for ip in ips {
                let _ = writeln!(out, "{ip}");
            }
            out
        }
        Err(e) => {
            warn!(error = %e, "Ban list unavailable");
            format!("error: {e}\n")
        }
    }
}

async fn unban(arg: Option<&str>, ban_store: &dyn BanStore) -> String {
    let Some(raw) = arg else {
        return "usage: unban <ip>\n".to_string();
    };
    let ip: IpAddr = match raw.parse() {
        Ok(ip) => ip,
        Err(_) => return format!("invalid ip: {raw}\n"),
    };

    match ban_store.remove(ip).await {
        Ok(true) => format!("unbanned {ip}\n"),
        Ok(false) => format!("{ip} is not banned\n"),
        Err(e) => {
            warn!(ip = %ip, error = %e, "Unban failed");
            format!("error: {e}\n")
        }
    }
}
