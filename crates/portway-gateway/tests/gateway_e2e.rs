//! End-to-end tests: a real gateway in front of in-process fake platform
//! and upstream servers bound to ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Notify;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::IntoResponse,
    routing::{any, get},
};
use portway_config::GatewayConfig;
use portway_gateway::{SESSION_COOKIE, Server, signature};

const REQUEST_SECRET: &str = "request-secret";
const RESPONSE_SECRET: &str = "response-secret";

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

async fn spawn_gateway(upstream_origin: &str) -> SocketAddr {
    let config = GatewayConfig {
        upstream_origin: upstream_origin.to_string(),
        request_secret: Some(REQUEST_SECRET.to_string()),
        response_secret: Some(RESPONSE_SECRET.to_string()),
        ..Default::default()
    };
    config.validate().expect("valid test config");
    let server = Server::new(config).expect("build server");
    spawn(server.router()).await
}

/// Build a transport-form token for the platform at `addr`, signed with
/// the deployment's request secret.
fn signed_token(addr: SocketAddr) -> (String, String, String) {
    let url = format!("http://{addr}/verify");
    let sig = signature::sign(&url, REQUEST_SECRET);
    let raw = format!("{url}~{sig}");
    (url, sig, raw)
}

fn profile_json() -> serde_json::Value {
    serde_json::json!({
        "id": "u1",
        "name": "Ada",
        "email": "ada@example.com",
        "permissions": ["read", "write"],
        "groups": ["eng"],
        "portal": { "name": "Example Portal" }
    })
}

#[derive(Clone, Default)]
struct PlatformState {
    calls: Arc<AtomicUsize>,
    seen_headers: Arc<Mutex<Vec<HeaderMap>>>,
    /// When set, answer this status to requests carrying an `x-token`
    /// header (the signed form); bare fallback requests get the profile.
    reject_signed_with: Option<u16>,
    /// When set, answer every request with this status.
    always_status: Option<u16>,
}

async fn platform_verify(
    State(state): State<PlatformState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.calls.fetch_add(1, Ordering::SeqCst);
    state
        .seen_headers
        .lock()
        .expect("lock")
        .push(headers.clone());

    if let Some(status) = state.always_status {
        return (
            StatusCode::from_u16(status).expect("status"),
            Json(serde_json::json!({"error": "denied"})),
        )
            .into_response();
    }
    if let Some(status) = state.reject_signed_with {
        if headers.contains_key("x-token") {
            return (
                StatusCode::from_u16(status).expect("status"),
                Json(serde_json::json!({"error": "signed form rejected"})),
            )
                .into_response();
        }
    }
    Json(profile_json()).into_response()
}

fn platform_router(state: PlatformState) -> Router {
    Router::new()
        .route("/verify", get(platform_verify))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification handshake
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn verify_success_returns_profile_and_signs_headers() {
    let platform_state = PlatformState::default();
    let platform = spawn(platform_router(platform_state.clone())).await;
    let gateway = spawn_gateway("http://127.0.0.1:9").await;

    let (_, sig, raw) = signed_token(platform);
    let response = reqwest::get(format!(
        "http://{gateway}/verify?openplatform={}",
        urlencoding::encode(&raw)
    ))
    .await
    .expect("request gateway");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["profile"]["id"], "u1");
    assert_eq!(body["profile"]["permissions"][1], "write");
    // defaulted fields are present, not null
    assert_eq!(body["profile"]["photo"], "");
    assert_eq!(body["profile"]["portal"]["apps"], serde_json::json!([]));

    let seen = platform_state.seen_headers.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    let headers = &seen[0];
    assert_eq!(
        headers.get("x-token").expect("x-token").to_str().unwrap(),
        signature::sign(&sig, RESPONSE_SECRET)
    );
    assert_eq!(
        headers
            .get("x-signature")
            .expect("x-signature")
            .to_str()
            .unwrap(),
        sig
    );
    assert_eq!(
        headers
            .get("x-openplatform")
            .expect("x-openplatform")
            .to_str()
            .unwrap(),
        raw
    );
    assert_eq!(
        headers.get(header::ACCEPT).expect("accept").to_str().unwrap(),
        "application/json"
    );
}

#[tokio::test]
async fn verify_is_stateless_across_repeated_calls() {
    let platform_state = PlatformState::default();
    let platform = spawn(platform_router(platform_state.clone())).await;
    let gateway = spawn_gateway("http://127.0.0.1:9").await;

    let (_, _, raw) = signed_token(platform);
    let url = format!(
        "http://{gateway}/verify?openplatform={}",
        urlencoding::encode(&raw)
    );

    let first: serde_json::Value = reqwest::get(&url)
        .await
        .expect("first call")
        .json()
        .await
        .expect("first body");
    let second: serde_json::Value = reqwest::get(&url)
        .await
        .expect("second call")
        .json()
        .await
        .expect("second body");

    assert_eq!(first, second);
    assert_eq!(platform_state.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn verify_falls_back_once_after_401() {
    let platform_state = PlatformState {
        reject_signed_with: Some(401),
        ..Default::default()
    };
    let platform = spawn(platform_router(platform_state.clone())).await;
    let gateway = spawn_gateway("http://127.0.0.1:9").await;

    let (_, _, raw) = signed_token(platform);
    let response = reqwest::get(format!(
        "http://{gateway}/verify?openplatform={}",
        urlencoding::encode(&raw)
    ))
    .await
    .expect("request gateway");

    assert_eq!(response.status(), 200);
    assert_eq!(platform_state.calls.load(Ordering::SeqCst), 2);

    // the fallback call is bare: no handshake headers, not even Accept
    let seen = platform_state.seen_headers.lock().expect("lock");
    assert!(seen[0].contains_key("x-token"));
    assert!(!seen[1].contains_key("x-token"));
    assert!(!seen[1].contains_key("x-signature"));
    assert!(!seen[1].contains_key("x-openplatform"));
    assert!(!seen[1].contains_key(header::ACCEPT));
}

#[tokio::test]
async fn verify_surfaces_failure_without_a_third_attempt() {
    let platform_state = PlatformState {
        always_status: Some(401),
        ..Default::default()
    };
    let platform = spawn(platform_router(platform_state.clone())).await;
    let gateway = spawn_gateway("http://127.0.0.1:9").await;

    let (_, _, raw) = signed_token(platform);
    let response = reqwest::get(format!(
        "http://{gateway}/verify?openplatform={}",
        urlencoding::encode(&raw)
    ))
    .await
    .expect("request gateway");

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["code"], "upstream_unavailable");
    // signed attempt + one fallback, never a third
    assert_eq!(platform_state.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn verify_rejects_non_json_platform_response() {
    let platform = spawn(Router::new().route(
        "/verify",
        get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html>oops</html>") }),
    ))
    .await;
    let gateway = spawn_gateway("http://127.0.0.1:9").await;

    let url = format!("http://{platform}/verify");
    let sig = signature::sign(&url, REQUEST_SECRET);
    let raw = format!("{url}~{sig}");

    let response = reqwest::get(format!(
        "http://{gateway}/verify?openplatform={}",
        urlencoding::encode(&raw)
    ))
    .await
    .expect("request gateway");

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["code"], "upstream_protocol");
}

// ─────────────────────────────────────────────────────────────────────────────
// Reverse proxy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct UpstreamState {
    hits: Arc<AtomicUsize>,
    payload: Arc<String>,
}

async fn upstream_data(State(state): State<UpstreamState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (HeaderName::from_static("x-upstream-tag"), "data-v1"),
        ],
        state.payload.as_str().to_owned(),
    )
}

async fn upstream_echo(State(state): State<UpstreamState>, body: Bytes) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    body
}

fn upstream_router(state: UpstreamState) -> Router {
    Router::new()
        .route("/api/data", get(upstream_data))
        .route("/echo", any(upstream_echo))
        .with_state(state)
}

fn upstream_state() -> UpstreamState {
    // 10 KB non-chunked JSON payload
    UpstreamState {
        hits: Arc::new(AtomicUsize::new(0)),
        payload: Arc::new(format!(r#"{{"data":"{}"}}"#, "x".repeat(10_000))),
    }
}

#[tokio::test]
async fn proxy_options_never_reaches_upstream() {
    let state = upstream_state();
    let upstream = spawn(upstream_router(state.clone())).await;
    let gateway = spawn_gateway(&format!("http://{upstream}")).await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("http://{gateway}/proxy/api/data"),
        )
        .send()
        .await
        .expect("preflight");

    assert_eq!(response.status(), 204);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .expect("cors origin"),
        "*"
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-max-age")
            .expect("cors max-age"),
        "86400"
    );
    assert_eq!(state.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn proxy_preserves_body_bytes_and_recomputes_framing() {
    let state = upstream_state();
    let upstream = spawn(upstream_router(state.clone())).await;
    let gateway = spawn_gateway(&format!("http://{upstream}")).await;

    let response = reqwest::get(format!("http://{gateway}/proxy/api/data"))
        .await
        .expect("proxied get");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-upstream-tag").expect("tag"),
        "data-v1"
    );
    assert!(response.headers().contains_key("x-proxy-duration-ms"));
    // debug is off: no target echo
    assert!(!response.headers().contains_key("x-proxy-debug"));

    let body = response.bytes().await.expect("body");
    assert_eq!(&body[..], state.payload.as_bytes());
}

#[tokio::test]
async fn proxy_streams_request_bodies() {
    let state = upstream_state();
    let upstream = spawn(upstream_router(state.clone())).await;
    let gateway = spawn_gateway(&format!("http://{upstream}")).await;

    let payload = "hello streaming world".repeat(1000);
    let response = reqwest::Client::new()
        .post(format!("http://{gateway}/proxy/echo"))
        .body(payload.clone())
        .send()
        .await
        .expect("proxied post");

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("echoed body");
    assert_eq!(body, payload);
}

#[tokio::test]
async fn proxy_passes_redirects_through_unfollowed() {
    // the location target is unroutable: following it instead of passing
    // the 302 through would surface as a 502 here
    let upstream = spawn(Router::new().route(
        "/old",
        get(|| async {
            (
                StatusCode::FOUND,
                [(header::LOCATION, "https://elsewhere.example/new")],
            )
        }),
    ))
    .await;
    let gateway = spawn_gateway(&format!("http://{upstream}")).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client");
    let response = client
        .get(format!("http://{gateway}/proxy/old"))
        .send()
        .await
        .expect("proxied get");

    assert_eq!(response.status(), 302);
    assert_eq!(
        response.headers().get(header::LOCATION).expect("location"),
        "https://elsewhere.example/new"
    );
}

struct DripGuard(Arc<Notify>);

impl Drop for DripGuard {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Streams a chunk every 20 ms forever; notifies when the stream is
/// dropped, which only happens once the transfer is torn down.
async fn upstream_drip(State(closed): State<Arc<Notify>>) -> impl IntoResponse {
    let guard = DripGuard(closed);
    let stream = futures::stream::unfold(guard, |guard| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from_static(b"chunk")), guard))
    });
    axum::body::Body::from_stream(stream)
}

#[tokio::test]
async fn proxy_client_disconnect_cancels_upstream_transfer() {
    let closed = Arc::new(Notify::new());
    let upstream = spawn(
        Router::new()
            .route("/drip", get(upstream_drip))
            .with_state(closed.clone()),
    )
    .await;
    let gateway = spawn_gateway(&format!("http://{upstream}")).await;

    let response = reqwest::get(format!("http://{gateway}/proxy/drip"))
        .await
        .expect("start streaming");
    let mut body = response.bytes_stream();
    let first = body.next().await.expect("first chunk").expect("chunk bytes");
    assert!(!first.is_empty());

    // hang up mid-stream; the cancellation must reach the upstream
    drop(body);

    tokio::time::timeout(Duration::from_secs(5), closed.notified())
        .await
        .expect("upstream transfer kept running after client disconnect");
}

#[tokio::test]
async fn proxy_forwards_query_strings() {
    let upstream = spawn(Router::new().route(
        "/search",
        get(|axum::extract::RawQuery(q): axum::extract::RawQuery| async move {
            q.unwrap_or_default()
        }),
    ))
    .await;
    let gateway = spawn_gateway(&format!("http://{upstream}")).await;

    let response = reqwest::get(format!("http://{gateway}/proxy/search?q=rust&page=2"))
        .await
        .expect("proxied get");

    assert_eq!(response.text().await.expect("body"), "q=rust&page=2");
}

// ─────────────────────────────────────────────────────────────────────────────
// Access gate, end to end
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gate_full_flow_token_then_cookie() {
    let platform_state = PlatformState::default();
    let platform = spawn(platform_router(platform_state.clone())).await;
    let gateway = spawn_gateway("http://127.0.0.1:9").await;
    let client = reqwest::Client::new();

    // no credentials: restricted, regardless of Referer
    let response = client
        .get(format!("http://{gateway}/"))
        .header(header::REFERER, "https://platform.example/dashboard")
        .send()
        .await
        .expect("bare request");
    assert_eq!(response.status(), 403);
    assert!(
        response
            .text()
            .await
            .expect("body")
            .contains("Access Restricted")
    );

    // first visit with a token: verified, session cookie attached
    let (_, _, raw) = signed_token(platform);
    let response = client
        .get(format!(
            "http://{gateway}/?openplatform={}",
            urlencoding::encode(&raw)
        ))
        .send()
        .await
        .expect("token request");
    assert_eq!(response.status(), 200);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie issued")
        .to_str()
        .expect("cookie string")
        .to_owned();
    assert!(set_cookie.starts_with(&format!("{SESSION_COOKIE}=")));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Max-Age=86400"));

    let body: serde_json::Value = response.json().await.expect("profile body");
    assert_eq!(body["profile"]["id"], "u1");

    // subsequent visit with the cookie alone: no new verification call
    let calls_before = platform_state.calls.load(Ordering::SeqCst);
    let cookie_pair = set_cookie.split(';').next().expect("cookie pair");
    let response = client
        .get(format!("http://{gateway}/"))
        .header(header::COOKIE, cookie_pair)
        .send()
        .await
        .expect("cookied request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("profile body");
    assert_eq!(body["profile"]["id"], "u1");
    assert_eq!(platform_state.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn gate_rejects_tampered_token() {
    let platform_state = PlatformState::default();
    let platform = spawn(platform_router(platform_state.clone())).await;
    let gateway = spawn_gateway("http://127.0.0.1:9").await;

    let (url, sig, _) = signed_token(platform);
    // flip one hex character
    let mut tampered = sig.into_bytes();
    tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
    let raw = format!("{url}~{}", String::from_utf8(tampered).expect("hex"));

    let response = reqwest::get(format!(
        "http://{gateway}/?openplatform={}",
        urlencoding::encode(&raw)
    ))
    .await
    .expect("tampered request");

    assert_eq!(response.status(), 401);
    // strict mode: rejected before any platform call
    assert_eq!(platform_state.calls.load(Ordering::SeqCst), 0);
}
