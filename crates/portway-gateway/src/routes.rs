//! HTTP routes for the gateway.

use axum::{
    Extension, Json, Router,
    extract::{RawQuery, State},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::profile::VerifiedProfile;
use crate::state::AppState;
use crate::token;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Simple health check (not gated).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Verification endpoint response.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub profile: VerifiedProfile,
}

/// `GET /verify?openplatform=<token>`
///
/// Runs the verification handshake and returns the profile. Uses the raw
/// query string so the token value reaches the parser still
/// percent-encoded.
pub async fn verify_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Response {
    let raw = query.as_deref().and_then(token::token_from_query);
    let Some(raw) = raw else {
        return GatewayError::MalformedToken("missing token parameter".to_string())
            .into_response_with_debug(state.config.debug);
    };

    match state.fetcher.verify(raw).await {
        Ok(profile) => Json(VerifyResponse { profile }).into_response(),
        Err(e) => e.into_response_with_debug(state.config.debug),
    }
}

/// Protected root. Echoes the profile the gate attached — stands in for
/// the application UI the gateway fronts.
pub async fn root_handler(Extension(profile): Extension<VerifiedProfile>) -> Json<VerifyResponse> {
    Json(VerifyResponse { profile })
}
