//! Application state shared across handlers.

use std::sync::Arc;

use portway_config::GatewayConfig;

use crate::error::Result;
use crate::profile::ProfileFetcher;
use crate::proxy::ReverseProxy;

/// Application state shared across all handlers.
///
/// Everything in here is immutable after startup; concurrent requests
/// share no mutable state.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,

    /// Verification handshake client.
    pub fetcher: Arc<ProfileFetcher>,

    /// Streaming forwarder to the upstream origin.
    pub proxy: Arc<ReverseProxy>,
}

impl AppState {
    /// Build state from configuration. Fails fast on misconfiguration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let fetcher = ProfileFetcher::new(&config)?;
        let proxy = ReverseProxy::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            proxy: Arc::new(proxy),
        })
    }
}
