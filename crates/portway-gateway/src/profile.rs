//! Verification handshake against the identity platform.
//!
//! A token names its own verification endpoint; the gateway proves it was
//! the intended recipient by deriving a second signature from the token's
//! signature and the deployment's response secret, then asks the platform
//! for the profile. The handshake is stateless: every fresh token pays one
//! round trip (two at most, see the fallback below) and nothing is cached.

use std::time::Duration;

use reqwest::{Client, header};
use serde::{Deserialize, Serialize};

use portway_config::{GatewayConfig, VerificationMode};

use crate::error::{GatewayError, Result};
use crate::signature;
use crate::token::{self, ParsedToken};

/// Signed response header the platform checks.
pub const X_TOKEN_HEADER: &str = "x-token";

/// Raw token signature, for verification endpoints that expect it.
pub const X_SIGNATURE_HEADER: &str = "x-signature";

/// Full reassembled token, same compatibility purpose.
pub const X_OPENPLATFORM_HEADER: &str = "x-openplatform";

const BODY_SNIPPET_LEN: usize = 512;

// ─────────────────────────────────────────────────────────────────────────────
// Profile
// ─────────────────────────────────────────────────────────────────────────────

/// A group within the platform portal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalGroup {
    pub id: String,
    pub name: String,
}

/// An application registered in the platform portal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalApp {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub url: String,
}

/// Portal metadata attached to a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Portal {
    pub name: String,
    pub logo: String,
    pub groups: Vec<PortalGroup>,
    pub apps: Vec<PortalApp>,
}

/// Identity record returned by the platform after successful verification.
///
/// Every field is total: unset values deserialize to empty strings and
/// empty collections, never null, so downstream consumers never branch on
/// absence. `id` is guaranteed non-empty once verification succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifiedProfile {
    /// Subject identifier.
    pub id: String,
    /// Platform-assigned identifier; fills in `id` when the payload omits
    /// the explicit identity field.
    pub openplatformid: String,
    pub name: String,
    pub email: String,
    pub photo: String,
    /// Super-admin flag.
    pub sa: bool,
    pub gender: String,
    pub color: String,
    pub darkmode: i64,
    pub sounds: bool,
    pub notifications: bool,
    pub notify: String,
    pub dtcreated: String,
    pub dtupdated: String,
    pub permissions: Vec<String>,
    pub groups: Vec<String>,
    pub portal: Portal,
}

impl VerifiedProfile {
    /// Resolve the subject identifier and reject identity-less payloads.
    fn finalize(mut self) -> Result<Self> {
        if self.id.is_empty() {
            self.id = self.openplatformid.clone();
        }
        if self.id.is_empty() {
            return Err(GatewayError::UpstreamProtocol(
                "profile payload carries no subject identifier".to_string(),
            ));
        }
        Ok(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// Performs the verification handshake.
#[derive(Debug, Clone)]
pub struct ProfileFetcher {
    client: Client,
    request_secret: Option<String>,
    response_secret: String,
    mode: VerificationMode,
    timeout: Duration,
}

impl ProfileFetcher {
    /// Build a fetcher from validated configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let response_secret = config
            .response_secret
            .clone()
            .ok_or_else(|| GatewayError::Config("response_secret is not configured".to_string()))?;

        if config.verification_mode == VerificationMode::Strict && config.request_secret.is_none()
        {
            return Err(GatewayError::Config(
                "strict verification requires request_secret".to_string(),
            ));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            request_secret: config.request_secret.clone(),
            response_secret,
            mode: config.verification_mode,
            timeout: config.verify_timeout(),
        })
    }

    /// Verify a raw transport-form token and return the profile.
    ///
    /// Issues at most two sequential calls: the signed-header GET, and one
    /// unauthenticated fallback if the platform answers 400 or 401 to the
    /// first. A timeout classifies as unavailable, same as a connection
    /// failure.
    pub async fn verify(&self, raw_token: &str) -> Result<VerifiedProfile> {
        let parsed = token::parse(raw_token)?;
        self.check_request_signature(&parsed)?;

        let response_signature = signature::sign(&parsed.signature, &self.response_secret);

        let response = self
            .client
            .get(&parsed.verify_url)
            .header(header::ACCEPT, "application/json")
            .header(X_TOKEN_HEADER, &response_signature)
            .header(X_SIGNATURE_HEADER, &parsed.signature)
            .header(X_OPENPLATFORM_HEADER, parsed.to_raw())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| unavailable(None, &e))?;

        // Some platform deployments reject the signed-header form outright.
        // Exactly one unauthenticated retry, never a third call. The retry
        // carries no headers at all, matching a plain browser-less fetch.
        let response = if matches!(response.status().as_u16(), 400 | 401) {
            tracing::debug!(
                status = %response.status(),
                url = %parsed.verify_url,
                "verification rejected signed headers, retrying bare"
            );
            self.client
                .get(&parsed.verify_url)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| unavailable(None, &e))?
        } else {
            response
        };

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| unavailable(Some(status.as_u16()), &e))?;

        if !status.is_success() {
            return Err(GatewayError::UpstreamUnavailable {
                status: Some(status.as_u16()),
                detail: snippet(&body),
            });
        }

        let profile: VerifiedProfile = serde_json::from_slice(&body)
            .map_err(|_| GatewayError::UpstreamProtocol(snippet(&body)))?;
        profile.finalize()
    }

    /// Local check that the token was issued for this deployment.
    ///
    /// Strict mode fails closed before any network traffic; permissive
    /// mode logs and proceeds.
    fn check_request_signature(&self, parsed: &ParsedToken) -> Result<()> {
        let Some(secret) = &self.request_secret else {
            return Ok(());
        };

        if signature::verify(&parsed.verify_url, secret, &parsed.signature) {
            return Ok(());
        }

        match self.mode {
            VerificationMode::Strict => Err(GatewayError::SignatureMismatch),
            VerificationMode::Permissive => {
                tracing::warn!(
                    url = %parsed.verify_url,
                    "token signature mismatch, proceeding in permissive mode"
                );
                Ok(())
            }
        }
    }
}

fn unavailable(status: Option<u16>, err: &reqwest::Error) -> GatewayError {
    GatewayError::UpstreamUnavailable {
        status,
        detail: err.to_string(),
    }
}

fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut end = text.len().min(BODY_SNIPPET_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
