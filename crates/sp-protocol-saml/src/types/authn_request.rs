//! SAML AuthnRequest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_core::SamlBinding;

use super::message::{
    expect_root, format_instant, generate_id, issuer_of, parse_instant, push_attr, required_attr,
    MessageKind, ProtocolMessage,
};
use super::{NameIdPolicy, SAMLP_NS, SAML_NS};
use crate::error::SamlResult;
use crate::xml::{escape, Element};

/// Authentication request sent to an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnRequest {
    /// Request ID.
    pub id: String,
    /// When the request was issued.
    pub issue_instant: DateTime<Utc>,
    /// SSO endpoint of the IdP.
    pub destination: Option<String>,
    /// SP entity ID.
    pub issuer: String,
    /// Where the IdP should post the response.
    pub assertion_consumer_service_url: Option<String>,
    /// Binding for the response.
    pub protocol_binding: Option<SamlBinding>,
    /// Ask the IdP to re-authenticate the subject.
    pub force_authn: bool,
    /// Requested name identifier policy.
    pub name_id_policy: Option<NameIdPolicy>,
}

impl AuthnRequest {
    /// Creates a request with a fresh ID and the current time.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            issue_instant: Utc::now(),
            destination: None,
            issuer: issuer.into(),
            assertion_consumer_service_url: None,
            protocol_binding: None,
            force_authn: false,
            name_id_policy: None,
        }
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the assertion consumer service URL and the response binding.
    #[must_use]
    pub fn with_acs(mut self, url: impl Into<String>, binding: SamlBinding) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self.protocol_binding = Some(binding);
        self
    }

    /// Sets `ForceAuthn`.
    #[must_use]
    pub const fn with_force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    /// Sets the name ID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Parses an AuthnRequest document.
    pub fn from_xml(xml: &str) -> SamlResult<Self> {
        let root = Element::parse(xml)?;
        expect_root(&root, "AuthnRequest")?;
        let name_id_policy = root.child("NameIDPolicy").map(|p| NameIdPolicy {
            format: p.attr("Format").map(str::to_string),
            allow_create: p.attr("AllowCreate") == Some("true"),
        });
        Ok(Self {
            id: required_attr(&root, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(&root, "IssueInstant")?)?,
            destination: root.attr("Destination").map(str::to_string),
            issuer: issuer_of(&root)?,
            assertion_consumer_service_url: root
                .attr("AssertionConsumerServiceURL")
                .map(str::to_string),
            protocol_binding: root.attr("ProtocolBinding").and_then(SamlBinding::from_uri),
            force_authn: root.attr("ForceAuthn") == Some("true"),
            name_id_policy,
        })
    }
}

impl ProtocolMessage for AuthnRequest {
    fn id(&self) -> &str {
        &self.id
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn issue_instant(&self) -> DateTime<Utc> {
        self.issue_instant
    }

    fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    fn kind(&self) -> MessageKind {
        MessageKind::AuthnRequest
    }

    fn to_xml(&self) -> String {
        let mut out = format!(
            "<samlp:AuthnRequest xmlns:samlp=\"{SAMLP_NS}\" xmlns:saml=\"{SAML_NS}\" ID=\"{}\" Version=\"2.0\" IssueInstant=\"{}\"",
            escape(&self.id),
            format_instant(self.issue_instant)
        );
        push_attr(&mut out, "Destination", self.destination.as_deref());
        push_attr(
            &mut out,
            "AssertionConsumerServiceURL",
            self.assertion_consumer_service_url.as_deref(),
        );
        push_attr(&mut out, "ProtocolBinding", self.protocol_binding.map(|b| b.uri()));
        if self.force_authn {
            out.push_str(" ForceAuthn=\"true\"");
        }
        out.push('>');
        out.push_str(&format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.issuer)));
        if let Some(policy) = &self.name_id_policy {
            out.push_str(&policy.to_xml());
        }
        out.push_str("</samlp:AuthnRequest>");
        out
    }
}
