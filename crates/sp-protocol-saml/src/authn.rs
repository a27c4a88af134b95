//! Authentication request construction.

use std::collections::BTreeMap;

use sp_core::{Endpoint, IdpConfig, SamlBinding, SpConfig};

use crate::error::{SamlError, SamlResult};
use crate::metadata::{endpoint_for, MetadataResolver};
use crate::types::{AuthnRequest, NameIdPolicy};

/// Outcome of IdP selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdpSelection {
    /// Continue with this IdP.
    Selected(String),
    /// More than one IdP is configured and none was chosen. Maps entity IDs
    /// to display names.
    Discovery(BTreeMap<String, String>),
}

/// Picks the IdP to authenticate with.
///
/// A single configured IdP is used implicitly; with several, the caller has to
/// present a choice unless `selected` names one of them.
pub async fn select_idp(
    resolver: &dyn MetadataResolver,
    selected: Option<&str>,
) -> SamlResult<IdpSelection> {
    let idps = resolver.identity_providers().await?;
    if idps.is_empty() {
        return Err(SamlError::NoIdpConfigured);
    }

    match selected.filter(|s| !s.is_empty()) {
        Some(entity_id) if idps.contains_key(entity_id) => {
            Ok(IdpSelection::Selected(entity_id.to_string()))
        }
        Some(entity_id) => Err(SamlError::Configuration(format!(
            "IdP '{entity_id}' is not configured"
        ))),
        None if idps.len() == 1 => Ok(idps
            .into_keys()
            .next()
            .map_or(IdpSelection::Discovery(BTreeMap::new()), IdpSelection::Selected)),
        None => Ok(IdpSelection::Discovery(idps)),
    }
}

/// An AuthnRequest ready to be encoded.
#[derive(Debug, Clone)]
pub struct PreparedAuthnRequest {
    /// The request.
    pub request: AuthnRequest,
    /// Binding to send it with.
    pub binding: SamlBinding,
    /// SSO endpoint URL.
    pub destination: String,
    /// Entity ID of the IdP.
    pub idp: String,
}

/// Builds AuthnRequests from the SP configuration.
#[derive(Debug, Clone, Copy)]
pub struct AuthnRequestBuilder<'a> {
    config: &'a SpConfig,
}

impl<'a> AuthnRequestBuilder<'a> {
    /// Creates a builder.
    #[must_use]
    pub const fn new(config: &'a SpConfig) -> Self {
        Self { config }
    }

    /// Chooses the SSO binding for `idp`.
    ///
    /// Signed requests prefer HTTP-POST, unsigned ones HTTP-Redirect; the other
    /// of the two is used when the IdP lacks the preferred one.
    pub fn select_binding<'i>(&self, idp: &'i IdpConfig) -> SamlResult<(SamlBinding, &'i Endpoint)> {
        let (preferred, fallback) = if self.config.sign_requests {
            (SamlBinding::HttpPost, SamlBinding::HttpRedirect)
        } else {
            (SamlBinding::HttpRedirect, SamlBinding::HttpPost)
        };

        if let Some(endpoint) = endpoint_for(&idp.sso, preferred) {
            return Ok((preferred, endpoint));
        }
        if let Some(endpoint) = endpoint_for(&idp.sso, fallback) {
            tracing::debug!(
                idp = %idp.entity_id,
                preferred = %preferred,
                "IdP lacks preferred SSO binding, falling back to {fallback}"
            );
            return Ok((fallback, endpoint));
        }

        Err(SamlError::UnsupportedBinding(format!(
            "IdP '{}' offers neither HTTP-Redirect nor HTTP-POST for single sign-on",
            idp.entity_id
        )))
    }

    /// Builds a fresh AuthnRequest for `idp`.
    pub fn build(&self, idp: &IdpConfig) -> SamlResult<PreparedAuthnRequest> {
        let (binding, endpoint) = self.select_binding(idp)?;

        let request = AuthnRequest::new(&self.config.entity_id)
            .with_destination(&endpoint.location)
            .with_acs(&self.config.acs_url, SamlBinding::HttpPost)
            .with_force_authn(self.config.force_authn)
            .with_name_id_policy(NameIdPolicy::new(
                self.config.name_id_format.clone(),
                self.config.allow_create,
            ));

        tracing::debug!(
            request_id = %request.id,
            idp = %idp.entity_id,
            binding = %binding,
            "built AuthnRequest"
        );

        Ok(PreparedAuthnRequest {
            binding,
            destination: endpoint.location.clone(),
            idp: idp.entity_id.clone(),
            request,
        })
    }
}

/// Accepts a relay target if it stays on a trusted host.
///
/// Relative paths are accepted, as are absolute HTTP(S) URLs whose host is
/// the SP's own or listed in `allowed_hosts`. Targets containing control
/// characters are refused: browsers drop tabs and newlines from URLs, which
/// turns `/\t/host` into `//host`.
#[must_use]
pub fn safe_relay_target(config: &SpConfig, candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() || candidate.chars().any(|c| c.is_ascii_control()) {
        return None;
    }

    if candidate.starts_with('/') {
        if candidate.starts_with("//") || candidate.starts_with("/\\") {
            return None;
        }
        return Some(candidate.to_string());
    }

    let url = url::Url::parse(candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let trusted = config.own_host().as_deref() == Some(host)
        || config.allowed_hosts.iter().any(|allowed| allowed == host);
    trusted.then(|| candidate.to_string())
}

/// Relay target of a login, falling back to `login_redirect_url`.
#[must_use]
pub fn login_relay_target(config: &SpConfig, requested: Option<&str>) -> String {
    match requested.filter(|r| !r.trim().is_empty()) {
        Some(candidate) => safe_relay_target(config, candidate).unwrap_or_else(|| {
            tracing::warn!(relay_target = candidate, "refusing untrusted relay target");
            config.login_redirect_url.clone()
        }),
        None => config.login_redirect_url.clone(),
    }
}
