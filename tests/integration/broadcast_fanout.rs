//! Integration tests for broadcast fan-out through the relay server.
//!
//! Validates:
//! - Every line reaches every connected client, the sender included
//! - All clients observe the same global order
//! - Empty lines are messages too
//! - Clients only see lines broadcast after they joined

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use linechat_relay::config::RelayConfig;
use linechat_relay::event::ServerEvent;
use linechat_relay::relay::{self, RelayHandle};
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
async fn hello_world_reaches_everyone_including_sender() {
    let (handle, mut events) = start_relay().await;
    let mut alice = Client::join(handle.local_addr(), &mut events).await;
    let mut bob = Client::join(handle.local_addr(), &mut events).await;

    alice.send("hello").await;
    assert_eq!(alice.recv().await.as_deref(), Some("hello"));
    assert_eq!(bob.recv().await.as_deref(), Some("hello"));

    bob.send("world").await;
    assert_eq!(alice.recv().await.as_deref(), Some("world"));
    assert_eq!(bob.recv().await.as_deref(), Some("world"));

    handle.shutdown().await;
}

#[tokio::test]
async fn all_clients_see_the_same_order() {
    const PER_CLIENT: usize = 20;

    let (handle, mut events) = start_relay().await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(Client::join(handle.local_addr(), &mut events).await);
    }

    // Split each client so all three can send concurrently.
    let mut readers = Vec::new();
    let mut senders = Vec::new();
    for (i, client) in clients.into_iter().enumerate() {
        readers.push(client.lines);
        let mut write = client.write;
        senders.push(tokio::spawn(async move {
            for n in 0..PER_CLIENT {
                write
                    .write_all(format!("{i}:{n}\n").as_bytes())
                    .await
                    .unwrap();
            }
            write
        }));
    }
    let mut writers = Vec::new();
    for sender in senders {
        writers.push(sender.await.unwrap());
    }

    let mut transcripts = Vec::new();
    for mut lines in readers {
        let mut seen = Vec::new();
        for _ in 0..3 * PER_CLIENT {
            let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            seen.push(line);
        }
        transcripts.push(seen);
    }

    // Identical global order for every recipient.
    assert_eq!(transcripts[0], transcripts[1]);
    assert_eq!(transcripts[1], transcripts[2]);

    // Each sender's lines keep their relative order.
    for sender in 0..3 {
        let own: Vec<usize> = transcripts[0]
            .iter()
            .filter_map(|l| l.split_once(':'))
            .filter(|(s, _)| s.parse::<usize>().unwrap() == sender)
            .map(|(_, n)| n.parse().unwrap())
            .collect();
        assert_eq!(own, (0..PER_CLIENT).collect::<Vec<_>>());
    }

    drop(writers);
    handle.shutdown().await;
}

#[tokio::test]
async fn empty_line_is_broadcast() {
    let (handle, mut events) = start_relay().await;
    let mut alice = Client::join(handle.local_addr(), &mut events).await;
    let mut bob = Client::join(handle.local_addr(), &mut events).await;

    alice.send("").await;
    assert_eq!(alice.recv().await.as_deref(), Some(""));
    assert_eq!(bob.recv().await.as_deref(), Some(""));

    handle.shutdown().await;
}

#[tokio::test]
async fn late_joiner_sees_no_history() {
    let (handle, mut events) = start_relay().await;
    let mut alice = Client::join(handle.local_addr(), &mut events).await;

    alice.send("before").await;
    assert_eq!(alice.recv().await.as_deref(), Some("before"));

    let mut carol = Client::join(handle.local_addr(), &mut events).await;
    alice.send("after").await;
    assert_eq!(carol.recv().await.as_deref(), Some("after"));
    assert_eq!(alice.recv().await.as_deref(), Some("after"));

    handle.shutdown().await;
}

#[tokio::test]
async fn received_lines_are_reported_to_operator() {
    let (handle, mut events) = start_relay().await;
    let mut alice = Client::join(handle.local_addr(), &mut events).await;

    alice.send("for the log").await;
    let event = wait_for(&mut events, |e| matches!(e, ServerEvent::Received { .. })).await;
    match event {
        ServerEvent::Received { line, peer, .. } => {
            assert_eq!(line, "for the log");
            assert_eq!(peer, alice.write.local_addr().unwrap());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    handle.shutdown().await;
}
