//! Error types for the gateway.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error taxonomy.
///
/// Parsing and signature errors are resolved locally and surface as
/// 400/401. Upstream errors surface as 502; their diagnostics (attempted
/// URL, status, body) are gated behind the `debug` flag so internal
/// targets never leak from a production deployment.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Token failed to parse: no separator, or an empty half.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Local signature check failed (strict mode only).
    #[error("token signature mismatch")]
    SignatureMismatch,

    /// Verification endpoint unreachable, timed out, or non-2xx after the
    /// one documented fallback.
    #[error("verification endpoint unavailable")]
    UpstreamUnavailable {
        status: Option<u16>,
        detail: String,
    },

    /// Verification endpoint answered with a non-JSON body.
    #[error("verification endpoint returned a non-JSON body")]
    UpstreamProtocol(String),

    /// The gateway is missing required configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<portway_config::ConfigError> for GatewayError {
    fn from(e: portway_config::ConfigError) -> Self {
        GatewayError::Config(e.to_string())
    }
}

impl GatewayError {
    /// HTTP status this error surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MalformedToken(_) => StatusCode::BAD_REQUEST,
            GatewayError::SignatureMismatch => StatusCode::UNAUTHORIZED,
            GatewayError::UpstreamUnavailable { .. } | GatewayError::UpstreamProtocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Config(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MalformedToken(_) => "malformed_token",
            GatewayError::SignatureMismatch => "signature_mismatch",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::UpstreamProtocol(_) => "upstream_protocol",
            GatewayError::Config(_) => "config_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Render the error as a structured JSON response.
    ///
    /// `debug` controls whether upstream diagnostics (status, body, raw
    /// payload) are included. Secrets are never echoed either way.
    pub fn into_response_with_debug(self, debug: bool) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        match &self {
            GatewayError::Config(_) | GatewayError::Internal(_) => {
                tracing::error!(status = %status, code, error = %message, "gateway error");
            }
            _ => {
                tracing::warn!(status = %status, code, error = %message, "request rejected");
            }
        }

        let mut body = serde_json::json!({
            "code": code,
            "message": message,
        });
        if debug {
            match &self {
                GatewayError::UpstreamUnavailable {
                    status: upstream_status,
                    detail,
                } => {
                    body["diagnostics"] = serde_json::json!({
                        "upstream_status": upstream_status,
                        "detail": detail,
                    });
                }
                GatewayError::UpstreamProtocol(raw) => {
                    body["diagnostics"] = serde_json::json!({ "raw": raw });
                }
                _ => {}
            }
        }

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.into_response_with_debug(false)
    }
}
