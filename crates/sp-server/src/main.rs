//! # SAML Service Provider Server
//!
//! Main entry point for the reference service provider.

#![forbid(unsafe_code)]

use sp_server::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(entity_id = %config.sp.entity_id, "SAML service provider starting");

    Server::new(config)?.run().await
}
