//! Per-request access gate.
//!
//! Runs on every route except static assets and the gateway's own
//! verification/proxy endpoints. Decision order: a token parameter is
//! verified synchronously and a fresh session cookie attached; failing
//! that, an existing session cookie passes; failing both, the request gets
//! the access-restricted page. The gate is stateless — a fresh
//! (non-cookied) visit pays one verification round trip and nothing is
//! stored server-side.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::session::Session;
use crate::state::AppState;
use crate::token;

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Access gate middleware.
///
/// On success the verified profile is inserted into request extensions for
/// downstream handlers.
pub async fn gate_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    // First visit from the platform: token in the query string. Kept
    // percent-encoded here; the parser performs the single decode.
    let raw_token = request
        .uri()
        .query()
        .and_then(token::token_from_query)
        .map(str::to_owned);

    if let Some(raw) = raw_token {
        return match state.fetcher.verify(&raw).await {
            Ok(profile) => {
                let session = Session::issue(profile.clone());
                let cookie = match session.to_cookie(state.config.production) {
                    Ok(cookie) => cookie,
                    Err(e) => return e.into_response_with_debug(state.config.debug),
                };
                request.extensions_mut().insert(profile);
                let response = next.run(request).await;
                (jar.add(cookie), response).into_response()
            }
            Err(e) => e.into_response_with_debug(state.config.debug),
        };
    }

    // Returning visitor: existing session cookie.
    if let Some(profile) = Session::read(&jar) {
        request.extensions_mut().insert(profile);
        return next.run(request).await;
    }

    // Neither. The Referer header is deliberately never consulted here:
    // it is attacker-controlled and must not gate access.
    restricted_response()
}

/// Paths the gate never inspects: static assets and the gateway's own
/// verification/proxy endpoints.
fn is_exempt(path: &str) -> bool {
    path == "/favicon.ico"
        || path == "/health"
        || path == "/verify"
        || path.starts_with("/assets/")
        || path.starts_with("/proxy/")
        || path
            .rsplit('/')
            .next()
            .is_some_and(|segment| segment.contains('.'))
}

// ─────────────────────────────────────────────────────────────────────────────
// Restricted page
// ─────────────────────────────────────────────────────────────────────────────

const RESTRICTED_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Access Restricted</title>
  </head>
  <body>
    <h1>Access Restricted</h1>
    <p>This application is only available through the platform portal.</p>
    <p>Please open it from your portal dashboard.</p>
  </body>
</html>
"#;

fn restricted_response() -> Response {
    (
        StatusCode::FORBIDDEN,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::X_FRAME_OPTIONS, "DENY"),
            (header::CONTENT_SECURITY_POLICY, "frame-ancestors 'none';"),
        ],
        RESTRICTED_PAGE,
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
