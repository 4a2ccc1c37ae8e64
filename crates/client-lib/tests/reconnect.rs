// ============================
// crates/client-lib/tests/reconnect.rs
// ============================
//! Client lifecycle against a real backend: connect, event delivery, retry
//! budget exhaustion and recovery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use homelet_backend_lib::auth::SessionResolver;
use homelet_backend_lib::config::Settings;
use homelet_backend_lib::store::InMemoryStore;
use homelet_backend_lib::ws_router::create_router;
use homelet_backend_lib::AppState;
use homelet_client_lib::{ChatClient, ClientConfig, ConnectionState, ReconnectPolicy};
use homelet_common::{Chat, Identity, Role, ServerEvent};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// A resolver with one issued token for u1. Created up front so a client can
/// hold a valid credential before the server starts listening.
async fn credential() -> (SessionResolver, String) {
    let resolver = SessionResolver::new();
    let token = resolver.issue(Identity::new("u1", Role::Tenant)).await;
    (resolver, token)
}

/// Serve the chat backend on `addr` with chat c1 seeded.
async fn serve_on(addr: SocketAddr, resolver: SessionResolver) -> tokio::task::JoinHandle<()> {
    serve_with(addr, resolver, Settings::default()).await
}

async fn serve_with(
    addr: SocketAddr,
    resolver: SessionResolver,
    settings: Settings,
) -> tokio::task::JoinHandle<()> {
    let store = InMemoryStore::new();
    store
        .insert_chat(Chat::new("c1", vec!["u1".to_string(), "u2".to_string()]))
        .await;

    let state = Arc::new(AppState::new(store, Arc::new(resolver), settings));
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    })
}

/// An address that is currently not listening.
async fn reserve_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn fast_retry(addr: SocketAddr, token: &str, max_attempts: u8) -> ClientConfig {
    let mut config = ClientConfig::new(format!("ws://{addr}"), token);
    config.reconnect = ReconnectPolicy {
        delay: Duration::from_millis(50),
        max_attempts,
    };
    config
}

async fn wait_for_state(client: &ChatClient, wanted: ConnectionState) {
    let mut state = client.state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == wanted))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
        .unwrap();
}

#[tokio::test]
async fn test_connect_join_and_receive_events() {
    let addr = reserve_addr().await;
    let (resolver, token) = credential().await;
    let _server = serve_on(addr, resolver).await;

    let client = ChatClient::connect(ClientConfig::new(format!("ws://{addr}"), token)).unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    client.subscribe(move |event: &ServerEvent| {
        let _ = events_tx.send(event.clone());
    });

    client.join_chat("c1").unwrap();

    let event = tokio::time::timeout(WAIT, events_rx.recv())
        .await
        .expect("timed out waiting for Joined")
        .unwrap();
    assert!(matches!(event, ServerEvent::Joined { .. }), "got {event:?}");

    client.send_message("c1", "Hello").unwrap();
    let event = tokio::time::timeout(WAIT, events_rx.recv())
        .await
        .expect("timed out waiting for MessageAck")
        .unwrap();
    let ServerEvent::MessageAck { message } = event else {
        panic!("Expected MessageAck, got {event:?}");
    };
    assert_eq!(message.content, "Hello");
    assert_eq!(message.sender_id, "u1");

    client.close().await;
}

#[tokio::test]
async fn test_connects_once_server_comes_up() {
    let addr = reserve_addr().await;
    let (resolver, token) = credential().await;

    let client = ChatClient::connect(fast_retry(addr, &token, 20)).unwrap();

    // Let a few attempts fail before the server starts listening.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let _server = serve_on(addr, resolver).await;

    wait_for_state(&client, ConnectionState::Connected).await;
    client.close().await;
}

#[tokio::test]
async fn test_failed_after_exhausted_budget_and_manual_retry() {
    let addr = reserve_addr().await;
    let (resolver, token) = credential().await;

    let client = ChatClient::connect(fast_retry(addr, &token, 2)).unwrap();
    wait_for_state(&client, ConnectionState::Failed).await;

    // Parked in Failed: a server appearing changes nothing by itself.
    let _server = serve_on(addr, resolver).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*client.state().borrow(), ConnectionState::Failed);

    client.retry();
    wait_for_state(&client, ConnectionState::Connected).await;
    client.close().await;
}

#[tokio::test]
async fn test_leave_and_mark_read_round_trip() {
    let addr = reserve_addr().await;
    let (resolver, token) = credential().await;
    let _server = serve_on(addr, resolver).await;

    let client = ChatClient::connect(ClientConfig::new(format!("ws://{addr}"), token)).unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    client.subscribe(move |event: &ServerEvent| {
        let _ = events_tx.send(event.clone());
    });

    client.join_chat("c1").unwrap();
    let event = tokio::time::timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ServerEvent::Joined { .. }), "got {event:?}");

    // mark_read is fire-and-forget: the next event after it must be the
    // leave ack, not a protocol error.
    client.mark_read("c1").unwrap();
    client.leave_chat("c1").unwrap();
    let event = tokio::time::timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ServerEvent::Left { .. }), "got {event:?}");

    client.close().await;
}

#[tokio::test]
async fn test_refreshed_credential_used_on_reconnect() {
    let addr = reserve_addr().await;
    let (resolver, token) = credential().await;
    let _server = serve_on(addr, resolver).await;

    // The initial token is rejected at the handshake, so the client loops
    // through failed attempts.
    let client = ChatClient::connect(fast_retry(addr, "stale-token", 50)).unwrap();

    let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    {
        let failures = failures.clone();
        client.subscribe_errors(move |_| {
            failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(failures.load(std::sync::atomic::Ordering::SeqCst) > 0);

    client.set_credential(token);
    wait_for_state(&client, ConnectionState::Connected).await;
    client.close().await;
}

#[tokio::test]
async fn test_room_membership_not_restored_after_forced_disconnect() {
    let addr = reserve_addr().await;
    let (resolver, token_u1) = credential().await;
    let token_u2 = resolver.issue(Identity::new("u2", Role::Agent)).await;

    // Short server-side idle timeout so a silent connection is pruned,
    // forcing the client through a disconnect it did not ask for.
    let settings = Settings {
        idle_timeout_secs: 2,
        ..Settings::default()
    };
    let _server = serve_with(addr, resolver, settings).await;

    let u1 = ChatClient::connect(fast_retry(addr, &token_u1, 50)).unwrap();
    wait_for_state(&u1, ConnectionState::Connected).await;

    let (msgs_tx, mut msgs_rx) = mpsc::unbounded_channel();
    u1.subscribe_messages(move |message| {
        let _ = msgs_tx.send(message.clone());
    });
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    u1.subscribe(move |event: &ServerEvent| {
        let _ = events_tx.send(event.clone());
    });

    u1.join_chat("c1").unwrap();
    let event = tokio::time::timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ServerEvent::Joined { .. }), "got {event:?}");

    // The idle server prunes u1, the client reconnects on its own.
    let mut state = u1.state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s != ConnectionState::Connected))
        .await
        .expect("server never dropped the idle connection")
        .unwrap();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .expect("client never reconnected")
        .unwrap();

    // u2 posts while u1 has not re-joined: nothing may reach u1.
    let u2 = ChatClient::connect(ClientConfig::new(format!("ws://{addr}"), token_u2)).unwrap();
    wait_for_state(&u2, ConnectionState::Connected).await;
    u2.join_chat("c1").unwrap();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    u2.subscribe_messages(move |message| {
        let _ = ack_tx.send(message.clone());
    });
    u2.send_message("c1", "while you were away").unwrap();
    let ack = tokio::time::timeout(WAIT, ack_rx.recv()).await.unwrap().unwrap();
    assert_eq!(ack.content, "while you were away");

    assert!(
        tokio::time::timeout(Duration::from_millis(500), msgs_rx.recv())
            .await
            .is_err(),
        "received a message for a room that was never re-joined"
    );

    // An explicit re-join restores delivery.
    wait_for_state(&u1, ConnectionState::Connected).await;
    u1.join_chat("c1").unwrap();
    loop {
        let event = tokio::time::timeout(WAIT, events_rx.recv()).await.unwrap().unwrap();
        if matches!(event, ServerEvent::Joined { .. }) {
            break;
        }
    }
    u2.send_message("c1", "back again").unwrap();
    let message = tokio::time::timeout(WAIT, msgs_rx.recv()).await.unwrap().unwrap();
    assert_eq!(message.content, "back again");

    u1.close().await;
    u2.close().await;
}

#[tokio::test]
async fn test_close_settles_to_idle() {
    let addr = reserve_addr().await;
    let (resolver, token) = credential().await;
    let _server = serve_on(addr, resolver).await;

    let client = ChatClient::connect(ClientConfig::new(format!("ws://{addr}"), token)).unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    let mut state = client.state();
    client.close().await;
    assert_eq!(*state.borrow_and_update(), ConnectionState::Idle);
}
