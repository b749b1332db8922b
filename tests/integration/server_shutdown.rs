//! Integration tests for orderly server shutdown.
//!
//! Validates:
//! - The console keyword stops the server
//! - Every client observes end of stream
//! - The listener is closed afterwards
//! - Completion is reported exactly once

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use linechat_relay::config::RelayConfig;
use linechat_relay::event::ServerEvent;
use linechat_relay::relay::{self, RelayHandle};
use linechat_relay::shutdown::ShutdownController;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

/// Start the relay server in-process on an OS-assigned port.
async fn start_relay() -> (RelayHandle, mpsc::UnboundedReceiver<ServerEvent>) {
    let config = RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..RelayConfig::default()
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = relay::start_server(&config, Arc::new(tx))
        .await
        .expect("failed to start relay server");
    (handle, rx)
}

/// Wait for the first server event matching `pred`.
async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<ServerEvent>,
    pred: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for server event")
}

/// A bare line client.
struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Client {
    /// Connect and wait until the server has registered us.
    async fn join(addr: SocketAddr, events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for(events, |e| matches!(e, ServerEvent::Accepted { .. })).await;
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn send(&mut self, line: &str) {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for line")
            .unwrap()
    }
}

#[tokio::test]
async fn exit_keyword_disconnects_everyone() {
    let (handle, mut events) = start_relay().await;
    let addr = handle.local_addr();
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(Client::join(addr, &mut events).await);
    }

    let (console, console_rx) = mpsc::channel(4);
    let watcher = tokio::spawn(ShutdownController::new(handle.clone(), "EXIT").watch(console_rx));

    console.send("not yet".to_string()).await.unwrap();
    console.send("EXIT".to_string()).await.unwrap();

    let stopped = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("shutdown did not finish")
        .unwrap();
    assert!(stopped);

    for client in &mut clients {
        assert_eq!(client.recv().await, None);
    }
    assert_eq!(handle.connection_count(), 0);

    // The listener is gone.
    assert!(TcpStream::connect(addr).await.is_err());

    let completions = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, ServerEvent::ShutdownComplete))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn shutdown_with_no_clients_is_prompt() {
    let (handle, _events) = start_relay().await;
    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown hung with no clients");
    tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("wait hung after shutdown");
}

#[tokio::test]
async fn wait_returns_after_shutdown_elsewhere() {
    let (handle, _events) = start_relay().await;
    let waiter = tokio::spawn({
        let handle = handle.clone();
        async move { handle.wait().await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    handle.shutdown().await;
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_during_traffic_completes() {
    let (handle, mut events) = start_relay().await;
    let mut alice = Client::join(handle.local_addr(), &mut events).await;
    let mut bob = Client::join(handle.local_addr(), &mut events).await;

    for n in 0..100 {
        alice.send(&format!("burst {n}")).await;
    }
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown hung under traffic");

    // Whatever was delivered arrives intact, then the stream ends.
    let mut n = 0;
    while let Some(line) = bob.recv().await {
        assert_eq!(line, format!("burst {n}"));
        n += 1;
    }
    assert!(n <= 100);
    assert_eq!(handle.connection_count(), 0);
}

#[tokio::test]
async fn shutdown_interrupts_write_to_stalled_client() {
    const LINES: usize = 300;

    let config = RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        write_timeout: Duration::from_secs(60),
        ..RelayConfig::default()
    };
    let (tx, mut events) = mpsc::unbounded_channel();
    let handle = relay::start_server(&config, Arc::new(tx)).await.unwrap();

    // Neither client reads; the broadcaster ends up blocked writing to them.
    let stalled = Client::join(handle.local_addr(), &mut events).await;
    let mut sender = Client::join(handle.local_addr(), &mut events).await;

    let payload = "s".repeat(60_000);
    for _ in 0..LINES {
        sender.send(&payload).await;
    }
    for _ in 0..LINES {
        wait_for(&mut events, |e| matches!(e, ServerEvent::Received { .. })).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown waited on a stalled write");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(handle.connection_count(), 0);

    drop((stalled, sender));
}
