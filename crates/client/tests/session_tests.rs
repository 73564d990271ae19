//! End-to-end client sessions against a real in-process server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use parley_client::{ChatClient, ClientConfig, ClientError, ClientEvent};
use parley_server::{ChatServer, MemoryStore, ServerConfig};

async fn spawn_server(users: &[(&str, &str)]) -> (Arc<ChatServer>, SocketAddr) {
    let store = Arc::new(MemoryStore::new());
    for (name, password) in users {
        store.create_user(name, password);
    }
    let config = ServerConfig {
        bind: ([127, 0, 0, 1], 0).into(),
        ..ServerConfig::default()
    };
    let server = ChatServer::new(config, store);
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });

    for _ in 0..50 {
        if let Some(addr) = server.local_addr().await {
            return (server, addr);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server did not bind");
}

fn config_for(addr: SocketAddr, name: &str) -> ClientConfig {
    ClientConfig::new(addr.to_string(), name, format!("pk-{name}"))
}

async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn message_round_trip_with_ack() {
    let (server, addr) = spawn_server(&[("alice", "pw-a"), ("bob", "pw-b")]).await;

    let alice = ChatClient::connect(config_for(addr, "alice"), "pw-a")
        .await
        .unwrap();
    let bob = ChatClient::connect(config_for(addr, "bob"), "pw-b")
        .await
        .unwrap();
    let mut bob_events = bob.take_events().await.unwrap();

    alice.send_text("bob", "hello bob").await.unwrap();

    let event = next_event(&mut bob_events).await;
    assert_eq!(
        event,
        ClientEvent::MessageReceived {
            sender: "alice".into(),
            text: "hello bob".into(),
        }
    );

    server.shutdown();
}

#[tokio::test]
async fn wrong_password_is_fatal() {
    let (server, addr) = spawn_server(&[("alice", "secret")]).await;

    let result = ChatClient::connect(config_for(addr, "alice"), "wrong").await;
    assert!(matches!(result, Err(ClientError::AuthFailed(_))));

    server.shutdown();
}

#[tokio::test]
async fn unknown_user_is_refused() {
    let (server, addr) = spawn_server(&[]).await;

    let result = ChatClient::connect(config_for(addr, "stranger"), "pw").await;
    assert!(matches!(result, Err(ClientError::AuthFailed(_))));

    server.shutdown();
}

#[tokio::test]
async fn unreachable_server_exhausts_retries() {
    // Grab a port with no listener behind it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config_for(addr, "alice");
    config.connect_attempts = 2;
    config.retry_delay = Duration::from_millis(10);

    let result = ChatClient::connect(config, "pw").await;
    assert!(matches!(
        result,
        Err(ClientError::ServerUnreachable { attempts: 2 })
    ));
}

#[tokio::test]
async fn duplicate_name_is_refused() {
    let (server, addr) = spawn_server(&[("alice", "pw")]).await;

    let first = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();
    let second = ChatClient::connect(config_for(addr, "alice"), "pw").await;
    assert!(matches!(second, Err(ClientError::AuthFailed(_))));
    assert!(first.is_running());

    server.shutdown();
}

#[tokio::test]
async fn message_to_unregistered_destination_is_a_server_error() {
    let (server, addr) = spawn_server(&[("alice", "pw"), ("bob", "pw")]).await;

    let alice = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();

    // bob exists in the store but has no live session.
    let result = alice.send_text("bob", "anyone home?").await;
    assert!(matches!(result, Err(ClientError::Server { .. })));

    server.shutdown();
}

#[tokio::test]
async fn contact_list_round_trip() {
    let (server, addr) = spawn_server(&[("alice", "pw"), ("bob", "pw")]).await;

    let alice = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();

    assert!(alice.contacts().await.unwrap().is_empty());

    alice.add_contact("bob").await.unwrap();
    assert_eq!(alice.contacts().await.unwrap(), vec!["bob"]);

    alice.remove_contact("bob").await.unwrap();
    assert!(alice.contacts().await.unwrap().is_empty());

    server.shutdown();
}

#[tokio::test]
async fn users_listing_is_sorted() {
    let (server, addr) = spawn_server(&[("carol", "pw"), ("alice", "pw"), ("bob", "pw")]).await;

    let alice = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();

    let users = alice.users().await.unwrap();
    assert_eq!(users, vec!["alice", "bob", "carol"]);

    server.shutdown();
}

#[tokio::test]
async fn public_key_lookup() {
    let (server, addr) = spawn_server(&[("alice", "pw"), ("bob", "pw")]).await;

    let _bob = ChatClient::connect(config_for(addr, "bob"), "pw")
        .await
        .unwrap();
    let alice = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();

    assert_eq!(alice.public_key("bob").await.unwrap(), "pk-bob");

    server.shutdown();
}

#[tokio::test]
async fn peer_login_and_logout_raise_lists_changed() {
    let (server, addr) = spawn_server(&[("alice", "pw"), ("bob", "pw")]).await;

    let alice = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();
    let mut alice_events = alice.take_events().await.unwrap();

    let bob = ChatClient::connect(config_for(addr, "bob"), "pw")
        .await
        .unwrap();
    assert_eq!(next_event(&mut alice_events).await, ClientEvent::ListsChanged);

    bob.close().await;
    assert_eq!(next_event(&mut alice_events).await, ClientEvent::ListsChanged);

    server.shutdown();
}

#[tokio::test]
async fn close_stops_the_transport() {
    let (server, addr) = spawn_server(&[("alice", "pw")]).await;

    let alice = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();
    assert!(alice.is_running());

    alice.close().await;
    assert!(!alice.is_running());
    assert!(matches!(
        alice.contacts().await,
        Err(ClientError::ConnectionLost)
    ));

    server.shutdown();
}

#[tokio::test]
async fn server_shutdown_surfaces_connection_lost() {
    let (server, addr) = spawn_server(&[("alice", "pw")]).await;

    let alice = ChatClient::connect(config_for(addr, "alice"), "pw")
        .await
        .unwrap();
    let mut events = alice.take_events().await.unwrap();

    server.shutdown();

    assert_eq!(next_event(&mut events).await, ClientEvent::ConnectionLost);
    assert!(!alice.is_running());
}
