//! Edge gateway for platform-fronted deployments.
//!
//! Portway sits in front of a chat application deployed inside an external
//! platform portal. It verifies the platform's signed identity tokens,
//! materializes a client-held session from the verified profile, and
//! transparently reverse-proxies application traffic to a configured
//! upstream origin.
//!
//! Components, leaves first:
//!
//! - [`signature`] — keyed digests, the trust primitive
//! - [`token`] — opaque token transport format
//! - [`profile`] — verification handshake against the platform
//! - [`session`] — client-held session cookie
//! - [`gate`] — per-request access decision
//! - [`proxy`] — streaming reverse proxy
//!
//! # Example
//!
//! ```ignore
//! use portway_config::GatewayConfig;
//! use portway_gateway::Server;
//!
//! let config = GatewayConfig::load(None)?;
//! config.validate()?;
//! Server::new(config)?.run().await?;
//! ```

pub mod error;
pub mod gate;
pub mod profile;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod signature;
pub mod state;
pub mod token;

pub use error::{GatewayError, Result};
pub use profile::{ProfileFetcher, VerifiedProfile};
pub use session::{SESSION_COOKIE, Session};
pub use state::AppState;

use std::net::SocketAddr;

use axum::{
    Router, middleware,
    routing::{any, get},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use portway_config::GatewayConfig;

/// The Portway HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server from validated configuration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Ok(Self {
            state: AppState::new(config)?,
        })
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    ///
    /// The gate wraps everything; its own exemption table keeps health,
    /// verification, proxy, and asset paths open.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::health_routes())
            .route("/verify", get(routes::verify_handler))
            .route("/proxy/{*path}", any(proxy::proxy_handler))
            .route("/", get(routes::root_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                gate::gate_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server on the configured bind address.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let router = self.router();

        info!("Starting gateway on {}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to bind {addr}: {e}")))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| GatewayError::Internal(format!("server error: {e}")))?;

        Ok(())
    }

    /// The configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
