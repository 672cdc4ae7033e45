//! Behavioral tests for the HTTP client against a local test server.
//!
//! The server is a minimal hand-rolled HTTP/1.1 responder: it records every
//! request it receives and replays a scripted list of responses (repeating
//! the last one once the script runs out).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hd_api::{ApiClient, RetryPolicy, SessionController, TokenRefresher};
use hd_core::config::AppConfig;
use hd_core::error::{HdError, HdResult};
use hd_core::storage::MemoryStore;

struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<tokio::sync::Mutex<Vec<String>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let n = stream.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_headers_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..pos]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() - (pos + 4) >= content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn spawn_server_with(
    responses: Vec<(u16, &'static str)>,
    response_delay: Duration,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let task_hits = Arc::clone(&hits);
    let task_requests = Arc::clone(&requests);
    let task = tokio::spawn(async move {
        let mut script = responses.into_iter();
        let mut last: Option<(u16, &'static str)> = None;
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let raw = read_request(&mut stream).await;
            task_hits.fetch_add(1, Ordering::SeqCst);
            task_requests.lock().await.push(raw);

            let (status, body) = script.next().or(last).unwrap_or((200, r#"{"success":true}"#));
            last = Some((status, body));

            tokio::time::sleep(response_delay).await;

            let reason = match status {
                200 => "OK",
                400 => "Bad Request",
                401 => "Unauthorized",
                429 => "Too Many Requests",
                500 => "Internal Server Error",
                _ => "Unknown",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    TestServer { addr, hits, requests, _task: task }
}

async fn spawn_server(responses: Vec<(u16, &'static str)>) -> TestServer {
    spawn_server_with(responses, Duration::ZERO).await
}

// --- Test collaborators ---

struct StaticRefresher {
    token: &'static str,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh(&self, _token: &str) -> HdResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.to_string())
    }
}

struct FailingRefresher;

#[async_trait]
impl TokenRefresher for FailingRefresher {
    async fn refresh(&self, _token: &str) -> HdResult<String> {
        Err(HdError::Auth("refresh token expired".into()))
    }
}

struct RecordingSession {
    logged_out: Arc<AtomicBool>,
}

#[async_trait]
impl SessionController for RecordingSession {
    async fn logout(&self) {
        self.logged_out.store(true, Ordering::SeqCst);
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

fn build_client(
    addr: SocketAddr,
    refresher: Arc<dyn TokenRefresher>,
    session: Arc<dyn SessionController>,
) -> ApiClient {
    let mut config = AppConfig::default();
    config.server.address = format!("http://{addr}");
    ApiClient::new(&config, Arc::new(MemoryStore::new()), refresher, session)
        .unwrap()
        .with_retry_policy(fast_policy())
}

fn simple_client(addr: SocketAddr) -> ApiClient {
    let logged_out = Arc::new(AtomicBool::new(false));
    build_client(
        addr,
        Arc::new(FailingRefresher),
        Arc::new(RecordingSession { logged_out }),
    )
}

// --- Tests ---

#[tokio::test]
async fn concurrent_identical_requests_share_one_network_call() {
    let server = spawn_server_with(
        vec![(200, r#"{"success":true,"data":{"value":7}}"#)],
        Duration::from_millis(100),
    )
    .await;
    let client = simple_client(server.addr);

    let (a, b, c, d, e) = tokio::join!(
        client.get::<Value>("/rooms"),
        client.get::<Value>("/rooms"),
        client.get::<Value>("/rooms"),
        client.get::<Value>("/rooms"),
        client.get::<Value>("/rooms"),
    );

    for outcome in [a, b, c, d, e] {
        assert_eq!(outcome.unwrap()["value"], 7);
    }
    assert_eq!(server.hit_count(), 1, "identical in-flight calls must coalesce");
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn different_bodies_do_not_coalesce() {
    let server = spawn_server_with(vec![(200, r#"{"success":true}"#)], Duration::from_millis(50)).await;
    let client = simple_client(server.addr);

    let (a, b) = tokio::join!(
        client.post::<Value>("/rooms", serde_json::json!({"name": "alpha"})),
        client.post::<Value>("/rooms", serde_json::json!({"name": "beta"})),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(server.hit_count(), 2);
}

#[tokio::test]
async fn retries_500_then_succeeds() {
    let server = spawn_server(vec![
        (500, r#"{"success":false,"error":"boom"}"#),
        (200, r#"{"success":true,"data":{"ok":true}}"#),
    ])
    .await;
    let client = simple_client(server.addr);

    let result: Value = client.get("/rooms").await.unwrap();
    assert_eq!(result["ok"], true);
    assert_eq!(server.hit_count(), 2);
}

#[tokio::test]
async fn persistent_500_surfaces_after_max_attempts() {
    let server = spawn_server(vec![(500, r#"{"success":false,"error":"down"}"#)]).await;
    let client = simple_client(server.addr);

    let err = client.get::<Value>("/rooms").await.unwrap_err();
    match err {
        HdError::Http { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "down");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
    assert_eq!(server.hit_count(), 3, "three attempts with max_attempts=3");
}

#[tokio::test]
async fn rate_limit_is_never_retried() {
    let server = spawn_server(vec![(429, r#"{"success":false,"error":"slow down"}"#)]).await;
    let client = simple_client(server.addr);

    let err = client.get::<Value>("/rooms").await.unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert_eq!(server.hit_count(), 1);
}

#[tokio::test]
async fn unauthorized_refreshes_and_replays_once() {
    let server = spawn_server(vec![
        (401, r#"{"success":false,"error":"token expired"}"#),
        (200, r#"{"success":true,"data":{"roomId":"r-9"}}"#),
    ])
    .await;

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let logged_out = Arc::new(AtomicBool::new(false));
    let client = build_client(
        server.addr,
        Arc::new(StaticRefresher { token: "fresh-token", calls: Arc::clone(&refresh_calls) }),
        Arc::new(RecordingSession { logged_out: Arc::clone(&logged_out) }),
    );
    client.tokens().set("stale-token").await.unwrap();

    let result: Value = client.get("/rooms").await.unwrap();
    assert_eq!(result["roomId"], "r-9");
    assert_eq!(server.hit_count(), 2);
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert!(!logged_out.load(Ordering::SeqCst));

    // The replay carried the fresh token and it was persisted
    let requests = server.requests.lock().await;
    assert!(requests[0].contains("Bearer stale-token"));
    assert!(requests[1].contains("Bearer fresh-token"));
    drop(requests);
    assert_eq!(client.tokens().get().await.unwrap(), Some("fresh-token".into()));
}

#[tokio::test]
async fn failed_refresh_clears_token_and_logs_out() {
    let server = spawn_server(vec![(401, r#"{"success":false,"error":"token expired"}"#)]).await;

    let logged_out = Arc::new(AtomicBool::new(false));
    let client = build_client(
        server.addr,
        Arc::new(FailingRefresher),
        Arc::new(RecordingSession { logged_out: Arc::clone(&logged_out) }),
    );
    client.tokens().set("stale-token").await.unwrap();

    let err = client.get::<Value>("/rooms").await.unwrap_err();
    assert!(matches!(err, HdError::Auth(_)));
    assert!(logged_out.load(Ordering::SeqCst));
    assert_eq!(client.tokens().get().await.unwrap(), None);
    assert_eq!(server.hit_count(), 1, "no replay after failed refresh");
}

#[tokio::test]
async fn unauthorized_without_token_skips_refresh() {
    let server = spawn_server(vec![(401, r#"{"success":false,"error":"missing token"}"#)]).await;

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let logged_out = Arc::new(AtomicBool::new(false));
    let client = build_client(
        server.addr,
        Arc::new(StaticRefresher { token: "unused", calls: Arc::clone(&refresh_calls) }),
        Arc::new(RecordingSession { logged_out }),
    );

    let err = client.get::<Value>("/rooms").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(server.hit_count(), 1);
}

#[tokio::test]
async fn cancellation_aborts_and_frees_slots() {
    let server = spawn_server_with(vec![(200, r#"{"success":true}"#)], Duration::from_secs(5)).await;
    let client = simple_client(server.addr);

    let task_client = client.clone();
    let pending = tokio::spawn(async move { task_client.get::<Value>("/slow").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.pending_count().await, 1);

    client.cancel_request(Method::GET, "/slow", None).await;
    assert_eq!(client.pending_count().await, 0);

    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(HdError::Cancelled)));

    // Cancelling a settled key is a no-op
    client.cancel_request(Method::GET, "/slow", None).await;
}

#[tokio::test]
async fn cancel_all_clears_every_slot() {
    let server = spawn_server_with(vec![(200, r#"{"success":true}"#)], Duration::from_secs(5)).await;
    let client = simple_client(server.addr);

    let c1 = client.clone();
    let c2 = client.clone();
    let t1 = tokio::spawn(async move { c1.get::<Value>("/a").await });
    let t2 = tokio::spawn(async move { c2.get::<Value>("/b").await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.pending_count().await, 2);

    client.cancel_all().await;
    assert_eq!(client.pending_count().await, 0);
    assert!(matches!(t1.await.unwrap(), Err(HdError::Cancelled)));
    assert!(matches!(t2.await.unwrap(), Err(HdError::Cancelled)));
}

#[tokio::test]
async fn error_message_extracted_from_body() {
    let server = spawn_server(vec![(400, r#"{"success":false,"error":"room is full"}"#)]).await;
    let client = simple_client(server.addr);

    let err = client.post::<Value>("/rooms/join", serde_json::json!({"roomId": "r-1"})).await.unwrap_err();
    match err {
        HdError::Http { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "room is full");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn health_check_reports_reachability() {
    let server = spawn_server(vec![(200, r#"{"success":true}"#)]).await;
    let client = simple_client(server.addr);
    assert!(client.health_check().await);

    // A dead port is unreachable
    let dead = simple_client("127.0.0.1:1".parse().unwrap());
    assert!(!dead.health_check().await);
}
