//! Server configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.
//! The service provider settings themselves live in a TOML file named by
//! `SP_CONFIG`.

use std::sync::Arc;

use sp_core::SpConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host to bind to.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Whether cookies carry the `Secure` flag.
    pub secure_cookies: bool,

    /// Service provider settings.
    pub sp: Arc<SpConfig>,

    /// Log level.
    pub log_level: String,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = std::env::var("SP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("SP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        let config_path = std::env::var("SP_CONFIG")
            .map_err(|_| anyhow::anyhow!("SP_CONFIG environment variable is required"))?;
        let sp = SpConfig::load(&config_path)
            .map_err(|e| anyhow::anyhow!("failed to load {config_path}: {e}"))?;

        let secure_cookies = std::env::var("SP_SECURE_COOKIES")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            host,
            port,
            secure_cookies,
            sp: Arc::new(sp),
            log_level,
        })
    }

    /// Creates a configuration for testing.
    #[must_use]
    pub fn for_testing(sp: SpConfig) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
            secure_cookies: false,
            sp: Arc::new(sp),
            log_level: "debug".to_string(),
        }
    }
}
