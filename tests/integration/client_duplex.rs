//! Integration tests for the client session against a live relay.
//!
//! Validates:
//! - Input lines are broadcast and come back as messages
//! - Server shutdown surfaces as a lost connection
//! - An unreachable server is reported, not retried
//! - Closing input ends the session cleanly

use std::sync::Arc;
use std::time::Duration;

use linechat::config::ClientConfig;
use linechat::net::{self, ClientError, ClientEvent};
use linechat_relay::config::RelayConfig;
use linechat_relay::event::ServerEvent;
use linechat_relay::relay::{self, RelayHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

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

fn client_config(port: u16) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

/// A client session driven by channels.
struct Session {
    input: mpsc::Sender<String>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<Result<(), ClientError>>,
}

impl Session {
    /// Start a session and wait until both ends see the connection.
    async fn open(handle: &RelayHandle, server_events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Self {
        let config = client_config(handle.local_addr().port());
        let (input, input_rx) = mpsc::channel(16);
        let (tx, mut events) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { net::run(&config, input_rx, Arc::new(tx)).await });

        let first = next_event(&mut events).await;
        assert!(matches!(first, ClientEvent::Connected { .. }), "got {first:?}");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !matches!(server_events.recv().await, Some(ServerEvent::Accepted { .. })) {}
        })
        .await
        .expect("server never accepted");

        Self { input, events, task }
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client event channel closed")
}

#[tokio::test]
async fn two_sessions_exchange_lines() {
    let (handle, mut server_events) = start_relay().await;
    let mut alice = Session::open(&handle, &mut server_events).await;
    let mut bob = Session::open(&handle, &mut server_events).await;

    alice.input.send("hello".to_string()).await.unwrap();
    assert_eq!(next_event(&mut alice.events).await, ClientEvent::Message("hello".into()));
    assert_eq!(next_event(&mut bob.events).await, ClientEvent::Message("hello".into()));

    bob.input.send("world".to_string()).await.unwrap();
    assert_eq!(next_event(&mut alice.events).await, ClientEvent::Message("world".into()));
    assert_eq!(next_event(&mut bob.events).await, ClientEvent::Message("world".into()));

    handle.shutdown().await;
}

#[tokio::test]
async fn server_shutdown_is_a_lost_connection() {
    let (handle, mut server_events) = start_relay().await;
    let mut alice = Session::open(&handle, &mut server_events).await;

    handle.shutdown().await;
    assert_eq!(next_event(&mut alice.events).await, ClientEvent::LostConnection);

    let result = tokio::time::timeout(Duration::from_secs(5), alice.task)
        .await
        .expect("session did not end")
        .unwrap();
    assert!(result.is_ok());
    assert!(alice.events.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_server_is_reported() {
    let (handle, _server_events) = start_relay().await;
    let port = handle.local_addr().port();
    handle.shutdown().await;

    let (tx, mut events) = mpsc::unbounded_channel();
    let (_input, input_rx) = mpsc::channel::<String>(1);
    let result = net::run(&client_config(port), input_rx, Arc::new(tx)).await;

    assert!(matches!(result, Err(ClientError::Connect { .. })));
    match next_event(&mut events).await {
        ClientEvent::ConnectFailed { target, .. } => assert_eq!(target, format!("127.0.0.1:{port}")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn closing_input_leaves_quietly() {
    let (handle, mut server_events) = start_relay().await;
    let mut alice = Session::open(&handle, &mut server_events).await;

    drop(alice.input);
    let result = tokio::time::timeout(Duration::from_secs(5), alice.task)
        .await
        .expect("session did not end")
        .unwrap();
    assert!(result.is_ok());
    assert!(alice.events.try_recv().is_err());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !matches!(server_events.recv().await, Some(ServerEvent::Disconnected { .. })) {}
    })
    .await
    .expect("server never saw the departure");
    assert_eq!(handle.connection_count(), 0);

    handle.shutdown().await;
}
