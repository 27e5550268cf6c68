//! Streaming reverse proxy to the configured upstream origin.
//!
//! Forwards arbitrary method/path/headers/body verbatim, minus hop-by-hop
//! headers. Bodies stream in both directions so memory stays bounded
//! regardless of payload size; when the inbound client disconnects, the
//! handler future is dropped and the upstream transfer is cancelled with
//! it. Redirects are never followed — 3xx responses pass through.

use std::time::{Duration, Instant};

use axum::{
    Json,
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;

use portway_config::GatewayConfig;

use crate::error::{GatewayError, Result};
use crate::state::AppState;

/// Hop-by-hop headers, meaningful only to one transport leg. Stripped in
/// both directions.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response headers the serving layer recomputes: the body may be
/// re-chunked, so upstream framing must not be copied.
const FRAMING: [&str; 2] = ["content-length", "content-encoding"];

/// Methods advertised in the preflight response.
pub const ALLOWED_METHODS: &str = "GET,POST,PUT,PATCH,DELETE,OPTIONS";

/// Marker header added on the outbound leg so the upstream can detect
/// proxied traffic.
const PROXIED_BY: HeaderName = HeaderName::from_static("x-proxied-by");

/// Non-authoritative elapsed-forwarding-time diagnostic.
const PROXY_DURATION: HeaderName = HeaderName::from_static("x-proxy-duration-ms");

/// Debug-only echo of the attempted upstream URL and status.
const PROXY_DEBUG: HeaderName = HeaderName::from_static("x-proxy-debug");

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// The streaming forwarder.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    client: reqwest::Client,
    origin: String,
    debug: bool,
}

impl ReverseProxy {
    /// Build a proxy from validated configuration.
    ///
    /// The timeout bounds connection establishment only; a total-request
    /// timeout would cut long streamed bodies short.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            origin: config.upstream_origin.clone(),
            debug: config.debug,
        })
    }

    /// Join origin, path, and query into the upstream URL, collapsing
    /// duplicate slash runs after the scheme separator only — `origin//a`
    /// becomes `origin/a` without corrupting `https://`.
    fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}/{}", self.origin, path);
        if let Some((scheme, rest)) = url.split_once("://") {
            url = format!("{}://{}", scheme, collapse_slashes(rest));
        }
        if let Some(q) = query {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// Forward one request to the upstream origin.
    pub async fn forward(&self, request: Request, path: String) -> Response {
        let method = request.method().clone();

        // Preflight never reaches the upstream.
        if method == Method::OPTIONS {
            return preflight_response();
        }

        let url = self.upstream_url(&path, request.uri().query());
        let headers = filter_request_headers(request.headers());
        let has_body = !matches!(method, Method::GET | Method::HEAD);

        let started = Instant::now();

        let mut outbound = self.client.request(method, &url).headers(headers);
        if has_body {
            let stream = request.into_body().into_data_stream();
            outbound = outbound.body(reqwest::Body::wrap_stream(stream));
        }

        let upstream = match outbound.send().await {
            Ok(response) => response,
            Err(err) => return self.bad_gateway(&url, &err),
        };

        let status = upstream.status();
        let mut response_headers = filter_response_headers(upstream.headers());

        let elapsed_ms = started.elapsed().as_millis();
        if let Ok(value) = HeaderValue::from_str(&elapsed_ms.to_string()) {
            response_headers.insert(PROXY_DURATION, value);
        }
        if self.debug {
            let echo =
                serde_json::json!({ "upstream_url": url, "status": status.as_u16() }).to_string();
            if let Ok(value) = HeaderValue::from_str(&echo) {
                response_headers.insert(PROXY_DEBUG, value);
            }
        }

        let stream = upstream
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));

        let mut builder = Response::builder().status(status);
        if let Some(target) = builder.headers_mut() {
            *target = response_headers;
        }
        match builder.body(Body::from_stream(stream)) {
            Ok(response) => response,
            Err(e) => GatewayError::Internal(format!("failed to assemble proxy response: {e}"))
                .into_response(),
        }
    }

    /// 502 with diagnostics gated behind the debug flag. The gateway never
    /// crashes on an unreachable upstream.
    fn bad_gateway(&self, url: &str, err: &reqwest::Error) -> Response {
        tracing::warn!(upstream_url = %url, error = %err, "upstream fetch failed");

        let mut body = serde_json::json!({
            "code": "upstream_unavailable",
            "message": "upstream fetch failed",
        });
        if self.debug {
            body["upstream_url"] = url.into();
            body["detail"] = err.to_string().into();
        }

        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

/// Handler for `ANY /proxy/{*path}`.
pub async fn proxy_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    state.proxy.forward(request, path).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Header filtering
// ─────────────────────────────────────────────────────────────────────────────

fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || lower == "host" {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out.insert(PROXIED_BY, HeaderValue::from_static("portway"));
    out
}

fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || FRAMING.contains(&lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_slash = false;
    for c in s.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    out
}

fn preflight_response() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
