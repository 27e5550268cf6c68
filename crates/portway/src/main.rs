//! Portway — edge gateway for platform-fronted deployments.
//!
//! Main entry point for the Portway CLI.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use portway_config::GatewayConfig;
use portway_gateway::{Server, signature, token};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Portway — edge gateway for platform-fronted deployments
#[derive(Parser)]
#[command(name = "portway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (default: portway.toml)
    #[arg(short, long, global = true, env = "PORTWAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Sign a verification URL into an opaque token (operator utility for
    /// smoke-testing a deployment)
    Sign {
        /// Verification URL to sign
        url: String,

        /// Signing secret (defaults to the configured request secret)
        #[arg(long)]
        secret: Option<String>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "portway=debug,portway_gateway=debug,portway_config=debug,tower_http=debug,info"
    } else {
        "portway=info,portway_gateway=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    match cli.command {
        Commands::Serve => {
            let config = load_config(cli.config.as_deref())?;
            let server = Server::new(config)?;
            server.run().await?;
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config.as_deref())?;
            println!(
                "configuration ok: forwarding to {} ({:?} verification)",
                config.upstream_origin, config.verification_mode
            );
        }
        Commands::Sign { url, secret } => {
            let secret = match secret {
                Some(secret) => secret,
                None => load_config(cli.config.as_deref())?
                    .request_secret
                    .context("no --secret given and no request_secret configured")?,
            };
            let digest = signature::sign(&url, &secret);
            println!("{}{}{}", url, token::TOKEN_SEPARATOR, digest);
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<GatewayConfig> {
    let config = GatewayConfig::load(path).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}
