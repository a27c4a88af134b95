//! Collaborators supplied by the hosting application.
//!
//! The protocol engine never touches the application's user directory, local
//! session or page templates directly. It calls the traits below instead, and
//! every one of them has a usable default.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bindings::PostForm;
use crate::error::{SamlError, SamlResult};
use crate::types::NameId;

/// A value that is either fixed or computed when it is needed.
///
/// Resolvers run once per protocol operation.
pub enum Setting<T> {
    /// Fixed value.
    Static(T),
    /// Computed on every call.
    Resolver(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Setting<T> {
    /// Wraps a resolver function.
    pub fn resolver(f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::Resolver(Arc::new(f))
    }

    /// Returns the current value.
    #[must_use]
    pub fn resolve(&self) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Resolver(f) => f(),
        }
    }
}

impl<T: Clone> Clone for Setting<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(value) => Self::Static(value.clone()),
            Self::Resolver(f) => Self::Resolver(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Setting<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Self::Static(value)
    }
}

/// A user of the hosting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Application user ID.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Profile fields set from the assertion.
    pub attributes: BTreeMap<String, String>,
}

/// What the identity provider said about the subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Encoded subject identifier.
    pub subject_id: String,
    /// The subject's NameID.
    pub name_id: NameId,
    /// IdP that authenticated the subject.
    pub issuer: String,
    /// Attributes of the assertion.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Session index at the IdP.
    pub session_index: Option<String>,
    /// End of the IdP session, if limited.
    pub not_on_or_after: Option<DateTime<Utc>>,
}

/// Input of [`LocalAuthenticator::authenticate`].
#[derive(Debug, Clone)]
pub struct AuthenticationRequest<'a> {
    /// Validated assertion data.
    pub session_info: &'a SessionInfo,
    /// SAML attribute name to local field names.
    pub attribute_mapping: BTreeMap<String, Vec<String>>,
    /// Whether a user that does not exist yet may be created.
    pub create_unknown_user: bool,
}

impl AuthenticationRequest<'_> {
    /// First value of every mapped attribute, keyed by local field name.
    #[must_use]
    pub fn mapped_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        for (saml_name, local_names) in &self.attribute_mapping {
            let Some(value) = self
                .session_info
                .attributes
                .get(saml_name)
                .and_then(|values| values.first())
            else {
                continue;
            };
            for local in local_names {
                fields.insert(local.clone(), value.clone());
            }
        }
        fields
    }
}

/// Resolves or provisions the local user for an authenticated subject.
#[async_trait]
pub trait LocalAuthenticator: Send + Sync {
    /// Returns the local user, or `None` when the subject may not log in.
    async fn authenticate(
        &self,
        request: &AuthenticationRequest<'_>,
    ) -> SamlResult<Option<LocalUser>>;
}

/// The hosting application's own login session for the current browser.
#[async_trait]
pub trait LocalSession: Send + Sync {
    /// Logs the user out of the application.
    async fn terminate(&self) -> SamlResult<()>;
}

/// Renders pages for the user agent.
///
/// Returning `None` selects the built-in output.
pub trait TemplateRenderer: Send + Sync {
    /// Renders the auto-submitting form of the HTTP-POST binding.
    fn render_post_form(&self, _form: &PostForm) -> Option<String> {
        None
    }

    /// Renders the IdP selection page. `idps` maps entity IDs to display names.
    fn render_discovery(&self, _idps: &BTreeMap<String, String>, _next: &str) -> Option<String> {
        None
    }

    /// Renders an error page.
    fn render_error(&self, _error: &SamlError) -> Option<String> {
        None
    }
}

/// Extension points of the assertion consumer.
///
/// Called after the local user has been resolved, in the order
/// `customize_session`, `customize_relay_state`, `custom_redirect`.
pub trait AcsHooks: Send + Sync {
    /// Runs after a successful login.
    fn customize_session(&self, _user: &LocalUser, _session_info: &SessionInfo) {}

    /// Rewrites the relay state before the redirect is chosen.
    fn customize_relay_state(&self, relay_state: String) -> String {
        relay_state
    }

    /// Replaces the redirect target entirely.
    fn custom_redirect(&self, _user: &LocalUser, _relay_state: &str) -> Option<String> {
        None
    }
}

/// Hooks that change nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAcsHooks;

impl AcsHooks for DefaultAcsHooks {}

/// Local session that has nothing to terminate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalSession;

#[async_trait]
impl LocalSession for NoLocalSession {
    async fn terminate(&self) -> SamlResult<()> {
        Ok(())
    }
}
