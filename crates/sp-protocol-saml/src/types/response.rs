//! SAML Response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{
    expect_root, format_instant, generate_id, issuer_of, parse_instant, push_attr, required_attr,
    MessageKind, ProtocolMessage,
};
use super::{Assertion, Status, SAMLP_NS, SAML_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::{escape, Element};

/// Response to an AuthnRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Response ID.
    pub id: String,
    /// When the response was issued.
    pub issue_instant: DateTime<Utc>,
    /// Issuing IdP.
    pub issuer: String,
    /// ACS URL the response was sent to.
    pub destination: Option<String>,
    /// ID of the request being answered.
    pub in_response_to: Option<String>,
    /// Status.
    pub status: Status,
    /// Plain assertions.
    pub assertions: Vec<Assertion>,
    /// Whether the response carried encrypted assertions.
    #[serde(default)]
    pub has_encrypted_assertions: bool,
}

impl Response {
    /// Creates a success response.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            in_response_to: None,
            status: Status::success(),
            assertions: Vec::new(),
            has_encrypted_assertions: false,
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(issuer: impl Into<String>, status: Status) -> Self {
        Self {
            status,
            ..Self::success(issuer)
        }
    }

    /// Returns true if the status is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// First assertion, if any.
    #[must_use]
    pub fn first_assertion(&self) -> Option<&Assertion> {
        self.assertions.first()
    }

    /// Reads a `samlp:Response` element.
    pub fn from_element(root: &Element) -> SamlResult<Self> {
        expect_root(root, "Response")?;
        if root.attr("Version") != Some("2.0") {
            return Err(SamlError::MalformedMessage("unsupported SAML version".to_string()));
        }
        let status = root
            .child("Status")
            .ok_or_else(|| SamlError::MalformedMessage("Response has no Status".to_string()))
            .and_then(Status::from_element)?;
        let assertions = root
            .children_named("Assertion")
            .map(Assertion::from_element)
            .collect::<SamlResult<Vec<_>>>()?;
        Ok(Self {
            id: required_attr(root, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(root, "IssueInstant")?)?,
            issuer: issuer_of(root)?,
            destination: root.attr("Destination").map(str::to_string),
            in_response_to: root.attr("InResponseTo").map(str::to_string),
            status,
            assertions,
            has_encrypted_assertions: root.child("EncryptedAssertion").is_some(),
        })
    }

    /// Parses a Response document.
    pub fn from_xml(xml: &str) -> SamlResult<Self> {
        Self::from_element(&Element::parse(xml)?)
    }
}

impl ProtocolMessage for Response {
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
        MessageKind::AuthnResponse
    }

    fn to_xml(&self) -> String {
        let mut out = format!(
            "<samlp:Response xmlns:samlp=\"{SAMLP_NS}\" xmlns:saml=\"{SAML_NS}\" ID=\"{}\" Version=\"2.0\" IssueInstant=\"{}\"",
            escape(&self.id),
            format_instant(self.issue_instant)
        );
        push_attr(&mut out, "Destination", self.destination.as_deref());
        push_attr(&mut out, "InResponseTo", self.in_response_to.as_deref());
        out.push('>');
        out.push_str(&format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.issuer)));
        out.push_str(&self.status.to_xml());
        for assertion in &self.assertions {
            out.push_str(&assertion.to_xml());
        }
        out.push_str("</samlp:Response>");
        out
    }
}

/// Builder for responses, used by identity provider simulations.
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Creates a builder for a success response.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            response: Response::success(issuer),
        }
    }

    /// Sets the request ID this response is for.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.response.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn destination(mut self, url: impl Into<String>) -> Self {
        self.response.destination = Some(url.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn status(mut self, status: Status) -> Self {
        self.response.status = status;
        self
    }

    /// Adds an assertion.
    #[must_use]
    pub fn assertion(mut self, assertion: Assertion) -> Self {
        self.response.assertions.push(assertion);
        self
    }

    /// Builds the response.
    #[must_use]
    pub fn build(self) -> Response {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_roundtrip() {
        let response = ResponseBuilder::new("https://idp.example.com")
            .in_response_to("_req123")
            .destination("https://sp.example.com/acs")
            .assertion(Assertion::new("https://idp.example.com"))
            .build();

        let parsed = Response::from_xml(&response.to_xml()).unwrap();
        assert!(parsed.is_success());
        assert_eq!(parsed.in_response_to.as_deref(), Some("_req123"));
        assert_eq!(parsed.assertions.len(), 1);
        assert!(!parsed.has_encrypted_assertions);
    }

    #[test]
    fn error_response_has_no_assertions() {
        let response = Response::error("https://idp.example.com", Status::authn_failed("nope"));
        let parsed = Response::from_xml(&response.to_xml()).unwrap();
        assert!(!parsed.is_success());
        assert!(parsed.first_assertion().is_none());
    }

    #[test]
    fn wrong_version_is_malformed() {
        let xml = Response::success("https://idp.example.com")
            .to_xml()
            .replace("Version=\"2.0\"", "Version=\"1.1\"");
        assert!(matches!(Response::from_xml(&xml), Err(SamlError::MalformedMessage(_))));
    }
}
