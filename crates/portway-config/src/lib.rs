//! Configuration for the Portway gateway.
//!
//! A TOML file (`portway.toml` by default) provides the base configuration;
//! `PORTWAY_*` environment variables override individual options. Validation
//! is fail-fast: a half-configured gateway refuses to start rather than
//! serving requests it cannot gate. There is no runtime reload — changing
//! configuration requires a restart.

pub mod error;

pub use error::{ConfigError, Result};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "portway.toml";

/// Default timeout for verification calls to the platform, in seconds.
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 5;

/// Whether a local signature mismatch blocks verification.
///
/// Chosen once at deployment, never mixed per request. `Strict` is the
/// default: a mismatched token is rejected before any network call.
/// `Permissive` only logs the mismatch and proceeds — a migration aid for
/// deployments whose request secret is not yet distributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    #[default]
    Strict,
    Permissive,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Proxy forwarding target, scheme included, no trailing slash.
    pub upstream_origin: String,

    /// Validates that inbound tokens were issued for this deployment.
    /// Required in strict mode.
    pub request_secret: Option<String>,

    /// Derives the signed header sent to the verification endpoint.
    pub response_secret: Option<String>,

    /// Strict or permissive local signature checking.
    pub verification_mode: VerificationMode,

    /// Echo upstream URLs and statuses in error bodies and diagnostic
    /// headers. Must stay off in production: it leaks internal targets.
    pub debug: bool,

    /// Production deployment — marks the session cookie `Secure`.
    pub production: bool,

    /// Timeout for each verification call, in seconds.
    pub verify_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".parse().expect("valid default address"),
            upstream_origin: String::new(),
            request_secret: None,
            response_secret: None,
            verification_mode: VerificationMode::default(),
            debug: false,
            production: false,
            verify_timeout_secs: DEFAULT_VERIFY_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    /// Load configuration: TOML file, then environment overrides, then
    /// normalization. Does not validate — call [`GatewayConfig::validate`]
    /// before serving.
    ///
    /// With an explicit `path` the file must exist. Without one,
    /// `portway.toml` is used if present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        config.normalize();
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Apply `PORTWAY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("PORTWAY_"))
            .collect();
        self.apply_overrides(&vars)
    }

    fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        if let Some(v) = vars.get("PORTWAY_BIND_ADDRESS") {
            self.bind_address = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "bind_address",
                reason: format!("'{v}' is not a socket address"),
            })?;
        }
        if let Some(v) = vars.get("PORTWAY_UPSTREAM_ORIGIN") {
            self.upstream_origin = v.clone();
        }
        if let Some(v) = vars.get("PORTWAY_REQUEST_SECRET") {
            self.request_secret = Some(v.clone());
        }
        if let Some(v) = vars.get("PORTWAY_RESPONSE_SECRET") {
            self.response_secret = Some(v.clone());
        }
        if let Some(v) = vars.get("PORTWAY_VERIFICATION_MODE") {
            self.verification_mode = match v.as_str() {
                "strict" => VerificationMode::Strict,
                "permissive" => VerificationMode::Permissive,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "verification_mode",
                        reason: format!("'{other}' is neither 'strict' nor 'permissive'"),
                    });
                }
            };
        }
        if let Some(v) = vars.get("PORTWAY_DEBUG") {
            self.debug = parse_bool("debug", v)?;
        }
        if let Some(v) = vars.get("PORTWAY_PRODUCTION") {
            self.production = parse_bool("production", v)?;
        }
        if let Some(v) = vars.get("PORTWAY_VERIFY_TIMEOUT_SECS") {
            self.verify_timeout_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "verify_timeout_secs",
                reason: format!("'{v}' is not a number of seconds"),
            })?;
        }
        Ok(())
    }

    /// Canonicalize option values. The upstream origin is stored without a
    /// trailing slash so URL joining stays predictable.
    pub fn normalize(&mut self) {
        while self.upstream_origin.ends_with('/') {
            self.upstream_origin.pop();
        }
    }

    /// Fail-fast validation, run once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.upstream_origin.is_empty() {
            return Err(ConfigError::MissingField {
                field: "upstream_origin",
                hint: "set it in portway.toml or via PORTWAY_UPSTREAM_ORIGIN",
            });
        }
        if !self.upstream_origin.starts_with("http://")
            && !self.upstream_origin.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "upstream_origin",
                reason: format!("'{}' has no http(s) scheme", self.upstream_origin),
            });
        }
        if self.response_secret.is_none() {
            return Err(ConfigError::MissingField {
                field: "response_secret",
                hint: "the verification handshake cannot derive its signed header without it",
            });
        }
        if self.verification_mode == VerificationMode::Strict && self.request_secret.is_none() {
            return Err(ConfigError::MissingField {
                field: "request_secret",
                hint: "strict verification needs it; permissive mode is the only way to run without one",
            });
        }
        if self.verify_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "verify_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Timeout for each verification call.
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

fn parse_bool(field: &'static str, v: &str) -> Result<bool> {
    match v {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field,
            reason: format!("'{other}' is not a boolean (use 1/0 or true/false)"),
        }),
    }
}
