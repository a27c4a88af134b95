//! Entity metadata.
//!
//! [`MetadataResolver`] answers questions about identity providers: which
//! endpoints and bindings they offer and which certificates sign their
//! messages. [`sp_metadata`] renders this service provider's own
//! `EntityDescriptor`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sp_core::{Endpoint, IdpConfig, SamlBinding, SpConfig};

use crate::error::{SamlError, SamlResult};
use crate::signature::certificate_body;
use crate::types::{format_instant, NameIdFormat, MD_NS, SAMLP_NS, XMLDSIG_NS};
use crate::xml::escape;

/// Looks up identity provider metadata.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Metadata of `entity_id`, or a configuration error when it is unknown.
    async fn resolve(&self, entity_id: &str) -> SamlResult<IdpConfig>;

    /// Every configured identity provider, entity ID to display name.
    async fn identity_providers(&self) -> SamlResult<BTreeMap<String, String>>;
}

/// Resolver backed by the IdPs listed in [`SpConfig`].
#[derive(Debug, Clone)]
pub struct ConfiguredMetadata {
    idps: Vec<IdpConfig>,
}

impl ConfiguredMetadata {
    /// Creates a resolver over `config.idps`.
    #[must_use]
    pub fn new(config: &SpConfig) -> Self {
        Self {
            idps: config.idps.clone(),
        }
    }
}

#[async_trait]
impl MetadataResolver for ConfiguredMetadata {
    async fn resolve(&self, entity_id: &str) -> SamlResult<IdpConfig> {
        let idp = self
            .idps
            .iter()
            .find(|idp| idp.entity_id == entity_id)
            .ok_or_else(|| SamlError::Configuration(format!("unknown IdP '{entity_id}'")))?;

        let mut resolved = idp.clone();
        resolved.certificates = idp.certificate_pems()?;
        resolved.certificate_files.clear();
        Ok(resolved)
    }

    async fn identity_providers(&self) -> SamlResult<BTreeMap<String, String>> {
        Ok(self
            .idps
            .iter()
            .map(|idp| (idp.entity_id.clone(), idp.display_name().to_string()))
            .collect())
    }
}

/// First endpoint offering `binding`.
#[must_use]
pub fn endpoint_for(endpoints: &[Endpoint], binding: SamlBinding) -> Option<&Endpoint> {
    endpoints.iter().find(|e| e.binding == binding)
}

/// Fails when the IdP metadata has expired.
pub fn ensure_valid(idp: &IdpConfig, now: DateTime<Utc>) -> SamlResult<()> {
    match idp.valid_until {
        Some(limit) if limit <= now => {
            tracing::error!(idp = %idp.entity_id, valid_until = %limit, "IdP metadata has expired");
            Err(SamlError::Configuration(format!(
                "metadata of IdP '{}' expired at {}",
                idp.entity_id,
                format_instant(limit)
            )))
        }
        _ => Ok(()),
    }
}

/// Renders the service provider's `EntityDescriptor`.
///
/// `certificate_pem` is the signing certificate advertised in a
/// `KeyDescriptor`; without one the descriptor carries no key.
pub fn sp_metadata(
    config: &SpConfig,
    certificate_pem: Option<&str>,
    now: DateTime<Utc>,
) -> SamlResult<String> {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><md:EntityDescriptor xmlns:md="{MD_NS}" entityID="{}""#,
        escape(&config.entity_id)
    );
    if let Some(hours) = config.metadata_valid_for_hours {
        let valid_until = Duration::try_hours(hours)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| {
                SamlError::Configuration(format!(
                    "metadata_valid_for_hours of {hours} is out of range"
                ))
            })?;
        xml.push_str(&format!(r#" validUntil="{}""#, format_instant(valid_until)));
    }
    xml.push('>');

    xml.push_str(&format!(
        r#"<md:SPSSODescriptor AuthnRequestsSigned="{}" WantAssertionsSigned="{}" protocolSupportEnumeration="{SAMLP_NS}">"#,
        config.sign_requests, config.want_assertions_signed
    ));

    if let Some(pem) = certificate_pem {
        let body = certificate_body(pem)
            .ok_or_else(|| SamlError::Configuration("invalid signing certificate".to_string()))?;
        xml.push_str(&format!(
            r#"<md:KeyDescriptor use="signing"><ds:KeyInfo xmlns:ds="{XMLDSIG_NS}"><ds:X509Data><ds:X509Certificate>{body}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>"#
        ));
    }

    for binding in [SamlBinding::HttpRedirect, SamlBinding::HttpPost] {
        xml.push_str(&format!(
            r#"<md:SingleLogoutService Binding="{}" Location="{}"/>"#,
            binding.uri(),
            escape(&config.sls_url)
        ));
    }

    let format = config
        .name_id_format
        .clone()
        .unwrap_or_else(|| NameIdFormat::Transient.uri().to_string());
    xml.push_str(&format!("<md:NameIDFormat>{}</md:NameIDFormat>", escape(&format)));

    xml.push_str(&format!(
        r#"<md:AssertionConsumerService Binding="{}" Location="{}" index="1"/>"#,
        SamlBinding::HttpPost.uri(),
        escape(&config.acs_url)
    ));
    xml.push_str("</md:SPSSODescriptor>");

    if let Some(name) = &config.name {
        let name = escape(name);
        xml.push_str(&format!(
            r#"<md:Organization><md:OrganizationName xml:lang="en">{name}</md:OrganizationName><md:OrganizationDisplayName xml:lang="en">{name}</md:OrganizationDisplayName><md:OrganizationURL xml:lang="en">{}</md:OrganizationURL></md:Organization>"#,
            escape(&config.entity_id)
        ));
    }

    xml.push_str("</md:EntityDescriptor>");
    Ok(xml)
}
