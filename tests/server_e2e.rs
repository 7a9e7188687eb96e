//! End-to-end scenarios over real loopback sockets
//!
//! Each test binds ephemeral ports, runs the full supervisor, and talks to
//! it the way a real client would: binary frames, HTTP requests, and admin
//! commands.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use conn_mux::config::MuxConfig;
use conn_mux::core::ban::{BanStore, MemoryBanStore};
use conn_mux::core::codec::CodecMode;
use conn_mux::core::packet::Packet;
use conn_mux::core::registry::ConnectionRegistry;
use conn_mux::error::{MuxError, Result};
use conn_mux::protocol::handler::{ClientHandle, PacketHandler};
use conn_mux::service::server::Server;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Echoes every decoded frame back unchanged.
struct EchoHandler;

#[async_trait]
impl PacketHandler for EchoHandler {
    async fn handle(&self, packet: Packet, conn: &mut ClientHandle) -> Result<()> {
        conn.send(&packet).await
    }
}

/// Ban store whose every call fails, for policy tests.
struct UnavailableBanStore;

#[async_trait]
impl BanStore for UnavailableBanStore {
    async fn contains(&self, _ip: IpAddr) -> Result<bool> {
        Err(MuxError::StoreUnavailable("store offline".to_string()))
    }
    async fn add(&self, _ip: IpAddr) -> Result<()> {
        Err(MuxError::StoreUnavailable("store offline".to_string()))
    }
    async fn remove(&self, _ip: IpAddr) -> Result<bool> {
        Err(MuxError::StoreUnavailable("store offline".to_string()))
    }
    async fn list(&self) -> Result<Vec<IpAddr>> {
        Err(MuxError::StoreUnavailable("store offline".to_string()))
    }
}

struct TestServer {
    binary_addr: SocketAddr,
    admin_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    ban_store: Arc<dyn BanStore>,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<Result<()>>,
}

async fn start_server(
    mutate: impl FnOnce(&mut MuxConfig),
    ban_store: Arc<dyn BanStore>,
) -> TestServer {
    let mut config = MuxConfig::default_with_overrides(|c| {
        c.listener.host = "127.0.0.1".to_string();
        c.listener.ports = vec![0];
        c.listener.admin_port = 0;
        c.listener.shutdown_timeout = Duration::from_secs(2);
    });
    mutate(&mut config);

    let server = Server::builder()
        .config(config)
        .ban_store(ban_store)
        .packet_handler(Arc::new(EchoHandler))
        .build();

    let bound = server.bind().await.expect("bind");
    let binary_addr = bound.binary_addrs()[0];
    let admin_addr = bound.admin_addr();
    let registry = bound.registry();
    let ban_store = bound.ban_store();

    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(bound.run_with_shutdown(shutdown_rx));

    TestServer {
        binary_addr,
        admin_addr,
        registry,
        ban_store,
        shutdown,
        task,
    }
}

async fn wait_until(mut probe: impl FnMut() -> bool, what: &str) {
    for _ in 0..100 {
        if probe() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Read one admin response: line-count aware for `stats` and `banned`.
async fn admin_round_trip(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    command: &str,
) -> Vec<String> {
    writer
        .write_all(format!("{command}\n").as_bytes())
        .await
        .expect("send command");

    let mut first = String::new();
    reader.read_line(&mut first).await.expect("response line");
    let first = first.trim_end().to_string();

    let extra = if let Some(count) = first.strip_prefix("connections: ") {
        count.parse::<usize>().expect("count") + 1 // per-conn lines + totals
    } else if let Some(count) = first.strip_prefix("banned: ") {
        count.parse::<usize>().expect("count")
    } else {
        0
    };

    let mut lines = vec![first];
    for _ in 0..extra {
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("response line");
        lines.push(line.trim_end().to_string());
    }
    lines
}

#[tokio::test]
async fn banned_ip_is_rejected_before_registration() {
    let store = Arc::new(MemoryBanStore::new());
    store.add("127.0.0.1".parse().unwrap()).await.unwrap();

    let server = start_server(|_| {}, store).await;

    let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.expect("read");

    assert_eq!(response, b"rejected: address is banned\n");

    // Never counted: no record, no aggregate increment
    let stats = server.registry.aggregate().unwrap();
    assert_eq!(stats.total_connections, 0);

    // The admin listener is not subject to the ban
    let admin = TcpStream::connect(server.admin_addr).await.expect("admin");
    let (read_half, mut write_half) = admin.into_split();
    let mut reader = BufReader::new(read_half);
    let lines = admin_round_trip(&mut reader, &mut write_half, "stats").await;
    assert_eq!(lines[0], "connections: 0");

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn concurrent_binary_clients_are_tracked_per_connection() {
    let server = start_server(|_| {}, Arc::new(MemoryBanStore::new())).await;

    let frame = Packet::new(1, b"ab".to_vec()).to_bytes().unwrap();
    let frame_len = frame.len(); // 7 bytes
    let mut clients = Vec::new();

    for _ in 0..2 {
        let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
        for _ in 0..3 {
            client.write_all(&frame).await.expect("send frame");
            // Each echoed frame confirms the server consumed ours
            let mut echo = vec![0u8; frame_len];
            client.read_exact(&mut echo).await.expect("read echo");
            assert_eq!(echo, frame);
        }
        clients.push(client);
    }

    let expected = (3 * frame_len) as u64;
    let admin = TcpStream::connect(server.admin_addr).await.expect("admin");
    let (read_half, mut write_half) = admin.into_split();
    let mut reader = BufReader::new(read_half);
    let lines = admin_round_trip(&mut reader, &mut write_half, "stats").await;

    assert_eq!(lines[0], "connections: 2");
    let per_conn = &lines[1..lines.len() - 1];
    assert_eq!(per_conn.len(), 2);
    for line in per_conn {
        assert!(
            line.contains(&format!("bytes={expected}")),
            "unexpected stats line: {line}"
        );
        assert!(line.contains("errors=0"));
        assert!(line.contains("started="));
    }
    assert!(lines.last().unwrap().starts_with("total: accepted=2 active=2"));

    drop(clients);
    wait_until(|| server.registry.len().unwrap() == 0, "connections to unregister").await;

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn http_connection_is_relayed_byte_for_byte() {
    const RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 12\r\n\r\nHello, HTTP!";

    let upstream = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let upstream_addr = upstream.local_addr().unwrap();

    let upstream_task = tokio::spawn(async move {
        let (mut socket, _) = upstream.accept().await.expect("accept");
        let mut request = Vec::new();
        let mut buf = vec![0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.expect("read request");
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        assert!(request.starts_with(b"GET /hello HTTP/1.1\r\n"));
        socket.write_all(RESPONSE).await.expect("write response");
        socket.shutdown().await.expect("shutdown");
    });

    let server = start_server(
        |c| c.relay.upstream_address = upstream_addr.to_string(),
        Arc::new(MemoryBanStore::new()),
    )
    .await;

    let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
    client
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .expect("send request");

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.expect("read response");
    assert_eq!(response, RESPONSE, "response must pass through unmodified");

    upstream_task.await.unwrap();
    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn unreachable_http_handler_terminates_the_connection() {
    // Grab an ephemeral port, then free it so connects are refused
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let server = start_server(
        |c| c.relay.upstream_address = dead_addr.to_string(),
        Arc::new(MemoryBanStore::new()),
    )
    .await;

    let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .expect("send request");

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.expect("read");
    assert!(response.is_empty(), "no bytes without a reachable handler");

    let registry = server.registry.clone();
    wait_until(
        || registry.aggregate().unwrap().total_errors >= 1,
        "relay error to be recorded",
    )
    .await;

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn admin_connection_survives_many_commands() {
    let server = start_server(|_| {}, Arc::new(MemoryBanStore::new())).await;

    let admin = TcpStream::connect(server.admin_addr).await.expect("admin");
    let (read_half, mut write_half) = admin.into_split();
    let mut reader = BufReader::new(read_half);

    let lines = admin_round_trip(&mut reader, &mut write_half, "banned").await;
    assert_eq!(lines, vec!["no banned ips"]);

    let lines = admin_round_trip(&mut reader, &mut write_half, "unban 10.0.0.5").await;
    assert_eq!(lines, vec!["10.0.0.5 is not banned"]);

    server
        .ban_store
        .add("10.0.0.5".parse().unwrap())
        .await
        .unwrap();

    let lines = admin_round_trip(&mut reader, &mut write_half, "banned").await;
    assert_eq!(lines, vec!["banned: 1", "10.0.0.5"]);

    let lines = admin_round_trip(&mut reader, &mut write_half, "UNBAN 10.0.0.5").await;
    assert_eq!(lines, vec!["unbanned 10.0.0.5"]);

    let lines = admin_round_trip(&mut reader, &mut write_half, "unban").await;
    assert_eq!(lines, vec!["usage: unban <ip>"]);

    let lines = admin_round_trip(&mut reader, &mut write_half, "reboot").await;
    assert_eq!(lines, vec!["unknown command: reboot"]);

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn fail_open_admits_connections_while_store_is_down() {
    let server = start_server(|_| {}, Arc::new(UnavailableBanStore)).await;

    let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
    let frame = Packet::new(3, b"ping".to_vec()).to_bytes().unwrap();
    client.write_all(&frame).await.expect("send frame");

    let mut echo = vec![0u8; frame.len()];
    client.read_exact(&mut echo).await.expect("read echo");
    assert_eq!(echo, frame);

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn fail_closed_rejects_connections_while_store_is_down() {
    let server = start_server(
        |c| c.ban.policy = conn_mux::core::ban::BanPolicy::FailClosed,
        Arc::new(UnavailableBanStore),
    )
    .await;

    let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.expect("read");
    assert_eq!(response, b"rejected: ban list unavailable\n");

    let stats = server.registry.aggregate().unwrap();
    assert_eq!(stats.total_connections, 0);

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn streaming_mode_reassembles_split_frames() {
    let server = start_server(|_| {}, Arc::new(MemoryBanStore::new())).await;

    let frame = Packet::new(8, b"split-across-reads".to_vec())
        .to_bytes()
        .unwrap();
    let (head, tail) = frame.split_at(3);

    let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
    client.write_all(head).await.expect("send head");
    client.flush().await.expect("flush");
    sleep(Duration::from_millis(200)).await;
    client.write_all(tail).await.expect("send tail");

    let mut echo = vec![0u8; frame.len()];
    client.read_exact(&mut echo).await.expect("read echo");
    assert_eq!(echo, frame);

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn chunked_mode_counts_split_frame_as_error_but_survives() {
    let server = start_server(
        |c| c.codec.mode = CodecMode::Chunked,
        Arc::new(MemoryBanStore::new()),
    )
    .await;

    let frame = Packet::new(8, b"whole".to_vec()).to_bytes().unwrap();
    let (head, tail) = frame.split_at(3);

    let mut client = TcpStream::connect(server.binary_addr).await.expect("connect");
    client.write_all(head).await.expect("send head");
    client.flush().await.expect("flush");
    sleep(Duration::from_millis(200)).await;
    client.write_all(tail).await.expect("send tail");

    // Both halves fail on their own: the head is shorter than a header,
    // the tail's leading bytes declare an absurd payload length
    let registry = server.registry.clone();
    wait_until(
        || registry.aggregate().unwrap().total_errors >= 2,
        "decode errors to be recorded",
    )
    .await;

    // The connection is still usable for a well-formed single-chunk frame
    client.write_all(&frame).await.expect("send full frame");
    let mut echo = vec![0u8; frame.len()];
    client.read_exact(&mut echo).await.expect("read echo");
    assert_eq!(echo, frame);

    let _ = server.shutdown.send(()).await;
}

#[tokio::test]
async fn shutdown_resolves_run() {
    let server = start_server(|_| {}, Arc::new(MemoryBanStore::new())).await;

    server.shutdown.send(()).await.expect("signal shutdown");
    let result = timeout(Duration::from_secs(5), server.task)
        .await
        .expect("run_with_shutdown resolves")
        .expect("task joins");
    assert!(result.is_ok());
}

#[tokio::test]
async fn bind_failure_is_fatal() {
    // Occupy a port, then configure the server to bind the same one
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken_port = taken.local_addr().unwrap().port();

    let config = MuxConfig::default_with_overrides(|c| {
        c.listener.host = "127.0.0.1".to_string();
        c.listener.ports = vec![taken_port];
        c.listener.admin_port = 0;
    });

    let server = Server::builder()
        .config(config)
        .packet_handler(Arc::new(EchoHandler))
        .build();

    let result = server.bind().await;
    assert!(matches!(result, Err(MuxError::ListenerBind { .. })));
}
