//! Client against a real server on a random port.

use std::net::SocketAddr;
use std::time::Duration;

use parley_client::{ApiClient, ClientError, Connection, SubscriptionManager, SubscriptionState};
use parley_proto::{SendMessageRequest, UserId};
use parley_server::state::{AppState, WsSettings};
use tokio::net::TcpListener;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
}

impl TestServer {
    fn token(&self, user: &str) -> String {
        parley_server::auth::jwt::issue_access_token(&self.state.jwt_secret, &UserId::from(user))
            .expect("Failed to issue token")
    }

    fn api(&self, user: &str) -> ApiClient {
        ApiClient::new(format!("http://{}", self.addr), self.token(user))
    }

    /// Wait until the registry holds `expected` sockets.
    async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..100 {
            if self.state.connections.connection_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "Expected {} connections, registry has {}",
            expected,
            self.state.connections.connection_count()
        );
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn connect(&self, user: &str) -> Connection {
        Connection::connect(&self.ws_url(), &self.token(user))
            .await
            .expect("Failed to connect")
    }
}

async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = parley_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = parley_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let state = AppState::new(db, &data_dir, jwt_secret, 1024 * 1024, WsSettings::default())
        .expect("Failed to build state");

    let app = parley_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer { addr, state }
}

/// Wait until the connection has seen a presence set equal to `expected`.
async fn wait_for_presence(conn: &Connection, expected: &[&str]) {
    let expected: Vec<UserId> = expected.iter().map(|u| UserId::from(*u)).collect();
    let mut changes = conn.presence_changes();
    tokio::time::timeout(Duration::from_secs(2), changes.wait_for(|online| *online == expected))
        .await
        .expect("Timed out waiting for presence")
        .expect("Connection reader stopped");
}

#[tokio::test]
async fn test_live_message_reaches_open_conversation() {
    let server = start_test_server().await;
    let alice = server.connect("alice").await;
    let bob = server.connect("bob").await;
    wait_for_presence(&alice, &["alice", "bob"]).await;

    let mut view = SubscriptionManager::new(alice.feed().clone(), server.api("alice"));
    view.open(UserId::from("bob")).await.unwrap();
    assert!(view.messages().is_empty());

    let sent = server
        .api("bob")
        .send_message(&UserId::from("alice"), &SendMessageRequest::text("hi"))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), view.next_message())
        .await
        .expect("Timed out waiting for message")
        .expect("Conversation closed");
    assert_eq!(received, sent);
    assert_eq!(view.messages(), &[sent]);

    drop(bob);
}

#[tokio::test]
async fn test_history_then_live_without_duplicates() {
    let server = start_test_server().await;
    let bob_api = server.api("bob");
    let first = bob_api
        .send_message(&UserId::from("alice"), &SendMessageRequest::text("while you were out"))
        .await
        .unwrap();

    let alice = server.connect("alice").await;
    wait_for_presence(&alice, &["alice"]).await;

    let alice_api = server.api("alice");
    let mut view = SubscriptionManager::new(alice.feed().clone(), alice_api.clone());
    view.open(UserId::from("bob")).await.unwrap();
    assert_eq!(view.messages(), &[first.clone()]);

    let reply = alice_api
        .send_message(&UserId::from("bob"), &SendMessageRequest::text("back now"))
        .await
        .unwrap();
    assert!(view.record_sent(reply.clone()));

    let second = bob_api
        .send_message(&UserId::from("alice"), &SendMessageRequest::text("welcome back"))
        .await
        .unwrap();
    let live = tokio::time::timeout(Duration::from_secs(2), view.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, second.id);

    view.resync().await.unwrap();
    let texts: Vec<_> = view.messages().iter().filter_map(|m| m.text.as_deref()).collect();
    assert_eq!(texts, vec!["while you were out", "back now", "welcome back"]);
}

#[tokio::test]
async fn test_invalid_token_reports_close_code() {
    let server = start_test_server().await;
    let conn = Connection::connect(&server.ws_url(), "not-a-jwt").await.unwrap();

    for _ in 0..100 {
        if !conn.is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(conn.close_code(), Some(4002));
    assert_eq!(server.state.connections.connection_count(), 0);
}

#[tokio::test]
async fn test_disconnect_updates_presence() {
    let server = start_test_server().await;
    let alice = server.connect("alice").await;
    let bob = server.connect("bob").await;
    wait_for_presence(&alice, &["alice", "bob"]).await;

    assert_eq!(
        alice.online_users(),
        vec![UserId::from("alice"), UserId::from("bob")]
    );

    bob.disconnect().await.unwrap();
    wait_for_presence(&alice, &["alice"]).await;
    assert_eq!(alice.online_users(), vec![UserId::from("alice")]);

    let online = server.api("alice").online_users().await.unwrap();
    assert_eq!(online, vec![UserId::from("alice")]);
}

#[tokio::test]
async fn test_history_requires_valid_token() {
    let server = start_test_server().await;
    let api = ApiClient::new(format!("http://{}", server.addr), "garbage");
    let bus = parley_client::EventBus::default();
    let mut view = SubscriptionManager::new(bus.feed(), api);

    let err = view.open(UserId::from("bob")).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status, .. } if status == 401));
    assert_eq!(view.state(), SubscriptionState::Unsubscribed);
}

#[tokio::test]
async fn test_dropping_connection_ends_the_open_conversation() {
    let server = start_test_server().await;
    let alice = server.connect("alice").await;
    wait_for_presence(&alice, &["alice"]).await;

    let mut view = SubscriptionManager::new(alice.feed().clone(), server.api("alice"));
    view.open(UserId::from("bob")).await.unwrap();
    assert_eq!(view.state(), SubscriptionState::Subscribed(UserId::from("bob")));

    drop(alice);

    let next = tokio::time::timeout(Duration::from_secs(2), view.next_message())
        .await
        .expect("next_message should return once the connection is gone");
    assert!(next.is_none());
    assert_eq!(view.state(), SubscriptionState::Unsubscribed);
    server.wait_for_connections(0).await;
}
