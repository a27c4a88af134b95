//! Service provider configuration.
//!
//! Configuration is read from TOML (see [`SpConfig::load`]) or assembled in code with
//! the `with_*` builders. A loaded configuration is validated once and then shared
//! read-only by every component.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::binding::SamlBinding;
use crate::error::{CoreError, CoreResult};

/// Default clock skew tolerance in seconds.
pub const DEFAULT_ACCEPTED_TIME_DIFF: i64 = 60;

/// Largest accepted clock skew, one day.
pub const MAX_ACCEPTED_TIME_DIFF: i64 = 86_400;

/// Longest validity of published metadata, ten years.
pub const MAX_METADATA_VALID_HOURS: i64 = 87_600;

/// Algorithm used to sign outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSignatureAlgorithm {
    /// RSA with SHA-1. Kept as the default for compatibility with older IdPs.
    #[default]
    Sha1,
    /// RSA with SHA-256.
    Sha256,
}

/// A protocol endpoint advertised by an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Binding served at this location.
    pub binding: SamlBinding,
    /// Endpoint URL.
    pub location: String,
    /// Separate URL for responses, when the entity uses one.
    #[serde(default)]
    pub response_location: Option<String>,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(binding: SamlBinding, location: impl Into<String>) -> Self {
        Self {
            binding,
            location: location.into(),
            response_location: None,
        }
    }
}

/// Private key and certificate used by the service provider.
///
/// Each half may be given inline (PEM text) or as a file path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Path to the PEM private key.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Path to the PEM certificate.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    /// Inline PEM private key.
    #[serde(default)]
    pub key_pem: Option<String>,
    /// Inline PEM certificate.
    #[serde(default)]
    pub cert_pem: Option<String>,
}

impl KeyMaterial {
    /// Creates key material from inline PEM text.
    pub fn from_pem(key_pem: impl Into<String>, cert_pem: impl Into<String>) -> Self {
        Self {
            key_file: None,
            cert_file: None,
            key_pem: Some(key_pem.into()),
            cert_pem: Some(cert_pem.into()),
        }
    }

    /// Returns the PEM private key, reading the file when needed.
    pub fn private_key_pem(&self) -> CoreResult<String> {
        resolve_pem(self.key_pem.as_deref(), self.key_file.as_deref(), "private key")
    }

    /// Returns the PEM certificate, reading the file when needed.
    pub fn certificate_pem(&self) -> CoreResult<String> {
        resolve_pem(self.cert_pem.as_deref(), self.cert_file.as_deref(), "certificate")
    }
}

fn resolve_pem(inline: Option<&str>, file: Option<&Path>, what: &str) -> CoreResult<String> {
    if let Some(pem) = inline {
        return Ok(pem.to_string());
    }
    match file {
        Some(path) => read_file(path),
        None => Err(CoreError::Config(format!("no {what} configured"))),
    }
}

fn read_file(path: &Path) -> CoreResult<String> {
    std::fs::read_to_string(path).map_err(|e| CoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Identity provider known to this service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// IdP entity ID.
    pub entity_id: String,
    /// Display name used on the discovery page.
    #[serde(default)]
    pub name: Option<String>,
    /// Single sign-on endpoints.
    #[serde(default)]
    pub sso: Vec<Endpoint>,
    /// Single logout endpoints.
    #[serde(default)]
    pub slo: Vec<Endpoint>,
    /// Inline PEM signing certificates.
    #[serde(default)]
    pub certificates: Vec<String>,
    /// Paths to PEM signing certificates.
    #[serde(default)]
    pub certificate_files: Vec<PathBuf>,
    /// End of validity of this IdP's metadata.
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl IdpConfig {
    /// Creates an IdP entry without endpoints.
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: None,
            sso: Vec::new(),
            slo: Vec::new(),
            certificates: Vec::new(),
            certificate_files: Vec::new(),
            valid_until: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a single sign-on endpoint.
    #[must_use]
    pub fn with_sso(mut self, binding: SamlBinding, location: impl Into<String>) -> Self {
        self.sso.push(Endpoint::new(binding, location));
        self
    }

    /// Adds a single logout endpoint.
    #[must_use]
    pub fn with_slo(mut self, binding: SamlBinding, location: impl Into<String>) -> Self {
        self.slo.push(Endpoint::new(binding, location));
        self
    }

    /// Adds a trusted signing certificate (PEM).
    #[must_use]
    pub fn with_certificate(mut self, pem: impl Into<String>) -> Self {
        self.certificates.push(pem.into());
        self
    }

    /// Sets the metadata validity limit.
    #[must_use]
    pub const fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    /// Returns all configured certificates as PEM text.
    pub fn certificate_pems(&self) -> CoreResult<Vec<String>> {
        let mut pems = self.certificates.clone();
        for path in &self.certificate_files {
            pems.push(read_file(path)?);
        }
        Ok(pems)
    }

    /// Returns the display name, falling back to the entity ID.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.entity_id)
    }
}

/// Service provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpConfig {
    /// SP entity ID.
    pub entity_id: String,
    /// Human readable name, published in metadata.
    #[serde(default)]
    pub name: Option<String>,
    /// Assertion consumer service URL (HTTP-POST).
    pub acs_url: String,
    /// Single logout service URL. Served for both Redirect and POST.
    pub sls_url: String,

    /// Ask the IdP to re-authenticate the user.
    #[serde(default)]
    pub force_authn: bool,
    /// Allow the IdP to create a new identifier for the subject.
    #[serde(default = "default_true")]
    pub allow_create: bool,
    /// Sign AuthnRequests. Also makes HTTP-POST the preferred login binding.
    #[serde(default)]
    pub sign_requests: bool,
    /// Sign LogoutRequests and LogoutResponses.
    #[serde(default)]
    pub logout_requests_signed: bool,
    /// Algorithm for request signatures.
    #[serde(default)]
    pub signature_algorithm: RequestSignatureAlgorithm,

    /// Require a signature on the Response element.
    #[serde(default)]
    pub want_response_signed: bool,
    /// Require assertions to be covered by a signature.
    #[serde(default = "default_true")]
    pub want_assertions_signed: bool,
    /// Require IdP-initiated logout requests to be signed.
    #[serde(default)]
    pub want_logout_requests_signed: bool,
    /// Accept responses that do not answer a request of this session.
    #[serde(default)]
    pub allow_unsolicited: bool,
    /// Clock skew tolerance in seconds.
    #[serde(default = "default_time_diff")]
    pub accepted_time_diff: i64,
    /// Requested NameID format.
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// Signing key and certificate.
    #[serde(default)]
    pub signing: Option<KeyMaterial>,
    /// Known identity providers.
    #[serde(default)]
    pub idps: Vec<IdpConfig>,

    /// Where to go after login when no relay target is known.
    #[serde(default = "default_redirect")]
    pub login_redirect_url: String,
    /// Where to go once logout has finished.
    #[serde(default = "default_redirect")]
    pub logout_redirect_url: String,
    /// Relay state used for responses that carry none (IdP-initiated login).
    #[serde(default)]
    pub default_relay_state: Option<String>,
    /// Hosts that relay targets may point to, besides the SP itself.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Redirect already authenticated users instead of refusing the login.
    #[serde(default = "default_true")]
    pub ignore_authenticated_users_on_login: bool,
    /// Provision local users that do not exist yet.
    #[serde(default = "default_true")]
    pub create_unknown_user: bool,
    /// SAML attribute name to local field names.
    #[serde(default)]
    pub attribute_mapping: BTreeMap<String, Vec<String>>,
    /// Binding order tried for single logout.
    #[serde(default = "default_slo_preference")]
    pub slo_binding_preference: Vec<SamlBinding>,
    /// Validity of the published SP metadata.
    #[serde(default)]
    pub metadata_valid_for_hours: Option<i64>,
}

const fn default_true() -> bool {
    true
}

const fn default_time_diff() -> i64 {
    DEFAULT_ACCEPTED_TIME_DIFF
}

fn default_redirect() -> String {
    "/".to_string()
}

fn default_slo_preference() -> Vec<SamlBinding> {
    vec![
        SamlBinding::HttpRedirect,
        SamlBinding::HttpPost,
        SamlBinding::Soap,
    ]
}

impl SpConfig {
    /// Creates a configuration with defaults for everything but the SP's own URLs.
    pub fn new(
        entity_id: impl Into<String>,
        acs_url: impl Into<String>,
        sls_url: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: None,
            acs_url: acs_url.into(),
            sls_url: sls_url.into(),
            force_authn: false,
            allow_create: true,
            sign_requests: false,
            logout_requests_signed: false,
            signature_algorithm: RequestSignatureAlgorithm::default(),
            want_response_signed: false,
            want_assertions_signed: true,
            want_logout_requests_signed: false,
            allow_unsolicited: false,
            accepted_time_diff: DEFAULT_ACCEPTED_TIME_DIFF,
            name_id_format: None,
            signing: None,
            idps: Vec::new(),
            login_redirect_url: default_redirect(),
            logout_redirect_url: default_redirect(),
            default_relay_state: None,
            allowed_hosts: Vec::new(),
            ignore_authenticated_users_on_login: true,
            create_unknown_user: true,
            attribute_mapping: BTreeMap::new(),
            slo_binding_preference: default_slo_preference(),
            metadata_valid_for_hours: None,
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let content = read_file(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Adds an identity provider.
    #[must_use]
    pub fn with_idp(mut self, idp: IdpConfig) -> Self {
        self.idps.push(idp);
        self
    }

    /// Sets the signing key material.
    #[must_use]
    pub fn with_signing(mut self, signing: KeyMaterial) -> Self {
        self.signing = Some(signing);
        self
    }

    /// Enables or disables AuthnRequest signing.
    #[must_use]
    pub const fn with_sign_requests(mut self, sign: bool) -> Self {
        self.sign_requests = sign;
        self
    }

    /// Enables or disables acceptance of unsolicited responses.
    #[must_use]
    pub const fn with_allow_unsolicited(mut self, allow: bool) -> Self {
        self.allow_unsolicited = allow;
        self
    }

    /// Looks up an IdP by entity ID.
    #[must_use]
    pub fn idp(&self, entity_id: &str) -> Option<&IdpConfig> {
        self.idps.iter().find(|idp| idp.entity_id == entity_id)
    }

    /// Host part of the ACS URL, used as the SP's own host for relay checks.
    #[must_use]
    pub fn own_host(&self) -> Option<String> {
        url::Url::parse(&self.acs_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Checks the configuration for missing or inconsistent values.
    pub fn validate(&self) -> CoreResult<()> {
        if self.entity_id.trim().is_empty() {
            return Err(CoreError::Config("entity_id must not be empty".to_string()));
        }
        for (field, value) in [("acs_url", &self.acs_url), ("sls_url", &self.sls_url)] {
            url::Url::parse(value)
                .map_err(|e| CoreError::Config(format!("{field} is not a valid URL: {e}")))?;
        }
        if (self.sign_requests || self.logout_requests_signed) && self.signing.is_none() {
            return Err(CoreError::Config(
                "request signing is enabled but no signing key is configured".to_string(),
            ));
        }
        if !(0..=MAX_ACCEPTED_TIME_DIFF).contains(&self.accepted_time_diff) {
            return Err(CoreError::Config(format!(
                "accepted_time_diff must be between 0 and {MAX_ACCEPTED_TIME_DIFF} seconds"
            )));
        }
        if let Some(hours) = self.metadata_valid_for_hours {
            if !(1..=MAX_METADATA_VALID_HOURS).contains(&hours) {
                return Err(CoreError::Config(format!(
                    "metadata_valid_for_hours must be between 1 and {MAX_METADATA_VALID_HOURS}"
                )));
            }
        }
        if self.slo_binding_preference.is_empty() {
            return Err(CoreError::Config(
                "slo_binding_preference must name at least one binding".to_string(),
            ));
        }
        for idp in &self.idps {
            if idp.entity_id.trim().is_empty() {
                return Err(CoreError::Config("IdP entity_id must not be empty".to_string()));
            }
            if idp.sso.is_empty() {
                return Err(CoreError::Config(format!(
                    "IdP {} has no single sign-on endpoint",
                    idp.entity_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
entity_id = "https://sp.example.com/saml2/metadata/"
acs_url = "https://sp.example.com/saml2/acs/"
sls_url = "https://sp.example.com/saml2/ls/"
signature_algorithm = "sha256"
allowed_hosts = ["app.example.com"]

[attribute_mapping]
uid = ["username"]
mail = ["email"]

[[idps]]
entity_id = "https://idp.example.com/metadata"
name = "Example IdP"
sso = [
  { binding = "redirect", location = "https://idp.example.com/sso/redirect" },
  { binding = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST", location = "https://idp.example.com/sso/post" },
]
slo = [{ binding = "redirect", location = "https://idp.example.com/slo" }]
"#;

    #[test]
    fn parses_toml_with_defaults() {
        let config = SpConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.signature_algorithm, RequestSignatureAlgorithm::Sha256);
        assert!(config.allow_create);
        assert!(!config.allow_unsolicited);
        assert!(config.ignore_authenticated_users_on_login);
        assert_eq!(config.accepted_time_diff, DEFAULT_ACCEPTED_TIME_DIFF);
        assert_eq!(config.login_redirect_url, "/");
        assert_eq!(
            config.slo_binding_preference,
            vec![SamlBinding::HttpRedirect, SamlBinding::HttpPost, SamlBinding::Soap]
        );

        let idp = config.idp("https://idp.example.com/metadata").unwrap();
        assert_eq!(idp.display_name(), "Example IdP");
        assert_eq!(idp.sso[1].binding, SamlBinding::HttpPost);
        assert_eq!(config.attribute_mapping["mail"], vec!["email".to_string()]);
        assert_eq!(config.own_host().as_deref(), Some("sp.example.com"));
    }

    #[test]
    fn signing_requires_key_material() {
        let config = SpConfig::new(
            "https://sp.example.com",
            "https://sp.example.com/acs",
            "https://sp.example.com/ls",
        )
        .with_sign_requests(true);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no signing key"));
    }

    #[test]
    fn idp_without_sso_is_rejected() {
        let config = SpConfig::new(
            "https://sp.example.com",
            "https://sp.example.com/acs",
            "https://sp.example.com/ls",
        )
        .with_idp(IdpConfig::new("https://idp.example.com"));

        assert!(config.validate().is_err());
    }

    #[test]
    fn time_settings_are_bounded() {
        let mut config = SpConfig::new(
            "https://sp.example.com",
            "https://sp.example.com/acs",
            "https://sp.example.com/ls",
        );
        config.accepted_time_diff = i64::MAX;
        assert!(config.validate().unwrap_err().to_string().contains("accepted_time_diff"));
        config.accepted_time_diff = -1;
        assert!(config.validate().is_err());
        config.accepted_time_diff = MAX_ACCEPTED_TIME_DIFF;
        config.validate().unwrap();

        config.metadata_valid_for_hours = Some(i64::MAX);
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("metadata_valid_for_hours"));
        config.metadata_valid_for_hours = Some(0);
        assert!(config.validate().is_err());
        config.metadata_valid_for_hours = Some(24);
        config.validate().unwrap();
    }

    #[test]
    fn invalid_url_is_rejected() {
        let config = SpConfig::new("https://sp.example.com", "not a url", "https://sp.example.com/ls");
        assert!(config.validate().unwrap_err().to_string().contains("acs_url"));
    }

    #[test]
    fn key_material_reports_missing_half() {
        let keys = KeyMaterial::default();
        assert!(keys.private_key_pem().is_err());

        let keys = KeyMaterial::from_pem("KEY", "CERT");
        assert_eq!(keys.private_key_pem().unwrap(), "KEY");
        assert_eq!(keys.certificate_pem().unwrap(), "CERT");
    }
}
