//! Application state management.
//!
//! This module defines the shared state that is passed to all request handlers.

use std::sync::Arc;

use sp_protocol_saml::{SamlResult, ServiceProvider};

use crate::config::ServerConfig;
use crate::providers::{TracingEventListener, UserDirectory};
use crate::session::{LocalSessions, SessionRegistry};
use crate::templates::AskamaRenderer;

const DEFAULT_SP_NAME: &str = "SAML Service Provider";

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,

    /// The protocol engine.
    pub sp: Arc<ServiceProvider>,

    /// SAML sessions.
    pub sessions: Arc<SessionRegistry>,

    /// Local logins.
    pub local_sessions: Arc<LocalSessions>,

    /// Local users.
    pub directory: Arc<UserDirectory>,

    /// Client for SOAP calls to identity providers.
    pub http: reqwest::Client,
}

impl AppState {
    /// Creates the application state, loading the signing key.
    pub fn new(config: ServerConfig) -> SamlResult<Self> {
        let directory = Arc::new(UserDirectory::new());
        let renderer = AskamaRenderer::new(sp_name(&config));
        let sp = ServiceProvider::new(Arc::clone(&config.sp), directory.clone())?
            .with_renderer(Arc::new(renderer))
            .with_events(Arc::new(TracingEventListener));

        Ok(Self {
            config,
            sp: Arc::new(sp),
            sessions: Arc::new(SessionRegistry::default()),
            local_sessions: Arc::new(LocalSessions::default()),
            directory,
            http: reqwest::Client::new(),
        })
    }

    /// Display name of this service provider.
    #[must_use]
    pub fn sp_name(&self) -> &str {
        sp_name(&self.config)
    }

    /// Returns the server configuration.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn sp_name(config: &ServerConfig) -> &str {
    config.sp.name.as_deref().unwrap_or(DEFAULT_SP_NAME)
}
