//! SAML Single Logout messages.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::message::{
    expect_root, format_instant, generate_id, issuer_of, optional_instant, parse_instant,
    push_attr, required_attr, MessageKind, ProtocolMessage,
};
use super::{NameId, Status, SAMLP_NS, SAML_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml::{escape, Element};

/// Logout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// Request ID.
    pub id: String,
    /// When the request was issued.
    pub issue_instant: DateTime<Utc>,
    /// SLO endpoint of the recipient.
    pub destination: Option<String>,
    /// Issuing entity.
    pub issuer: String,
    /// Subject to log out.
    pub name_id: NameId,
    /// Session indexes to terminate.
    pub session_indexes: Vec<String>,
    /// Reason URI.
    pub reason: Option<String>,
    /// The request expires at this instant.
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl LogoutRequest {
    /// Creates a logout request for `name_id`.
    #[must_use]
    pub fn new(issuer: impl Into<String>, name_id: NameId) -> Self {
        Self {
            id: generate_id(),
            issue_instant: Utc::now(),
            destination: None,
            issuer: issuer.into(),
            name_id,
            session_indexes: Vec::new(),
            reason: None,
            not_on_or_after: None,
        }
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds a session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_indexes.push(index.into());
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Limits the validity of the request.
    #[must_use]
    pub fn valid_for(mut self, minutes: i64) -> Self {
        self.not_on_or_after = Some(self.issue_instant + Duration::minutes(minutes));
        self
    }

    /// Returns whether the request expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_on_or_after.is_some_and(|limit| now >= limit)
    }

    /// Reads a `samlp:LogoutRequest` element.
    pub fn from_element(root: &Element) -> SamlResult<Self> {
        expect_root(root, "LogoutRequest")?;
        let name_id = root
            .child("NameID")
            .ok_or_else(|| SamlError::MalformedMessage("LogoutRequest has no NameID".to_string()))
            .and_then(NameId::from_element)?;
        Ok(Self {
            id: required_attr(root, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(root, "IssueInstant")?)?,
            destination: root.attr("Destination").map(str::to_string),
            issuer: issuer_of(root)?,
            name_id,
            session_indexes: root
                .children_named("SessionIndex")
                .map(|e| e.text().trim().to_string())
                .collect(),
            reason: root.attr("Reason").map(str::to_string),
            not_on_or_after: optional_instant(root, "NotOnOrAfter")?,
        })
    }
}

impl ProtocolMessage for LogoutRequest {
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
        MessageKind::LogoutRequest
    }

    fn to_xml(&self) -> String {
        let mut out = format!(
            "<samlp:LogoutRequest xmlns:samlp=\"{SAMLP_NS}\" xmlns:saml=\"{SAML_NS}\" ID=\"{}\" Version=\"2.0\" IssueInstant=\"{}\"",
            escape(&self.id),
            format_instant(self.issue_instant)
        );
        push_attr(&mut out, "Destination", self.destination.as_deref());
        push_attr(&mut out, "Reason", self.reason.as_deref());
        push_attr(&mut out, "NotOnOrAfter", self.not_on_or_after.map(format_instant).as_deref());
        out.push('>');
        out.push_str(&format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.issuer)));
        out.push_str(&self.name_id.to_xml());
        for index in &self.session_indexes {
            out.push_str(&format!("<samlp:SessionIndex>{}</samlp:SessionIndex>", escape(index)));
        }
        out.push_str("</samlp:LogoutRequest>");
        out
    }
}

/// Logout response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    /// Response ID.
    pub id: String,
    /// When the response was issued.
    pub issue_instant: DateTime<Utc>,
    /// SLO endpoint of the recipient.
    pub destination: Option<String>,
    /// Issuing entity.
    pub issuer: String,
    /// ID of the request being answered.
    pub in_response_to: Option<String>,
    /// Status.
    pub status: Status,
}

impl LogoutResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            issue_instant: Utc::now(),
            destination: None,
            issuer: issuer.into(),
            in_response_to: None,
            status: Status::success(),
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

    /// Sets the request ID this response answers.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Returns true if the status is success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Reads a `samlp:LogoutResponse` element.
    pub fn from_element(root: &Element) -> SamlResult<Self> {
        expect_root(root, "LogoutResponse")?;
        let status = root
            .child("Status")
            .ok_or_else(|| SamlError::MalformedMessage("LogoutResponse has no Status".to_string()))
            .and_then(Status::from_element)?;
        Ok(Self {
            id: required_attr(root, "ID")?.to_string(),
            issue_instant: parse_instant(required_attr(root, "IssueInstant")?)?,
            destination: root.attr("Destination").map(str::to_string),
            issuer: issuer_of(root)?,
            in_response_to: root.attr("InResponseTo").map(str::to_string),
            status,
        })
    }
}

impl ProtocolMessage for LogoutResponse {
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
        MessageKind::LogoutResponse
    }

    fn to_xml(&self) -> String {
        let mut out = format!(
            "<samlp:LogoutResponse xmlns:samlp=\"{SAMLP_NS}\" xmlns:saml=\"{SAML_NS}\" ID=\"{}\" Version=\"2.0\" IssueInstant=\"{}\"",
            escape(&self.id),
            format_instant(self.issue_instant)
        );
        push_attr(&mut out, "Destination", self.destination.as_deref());
        push_attr(&mut out, "InResponseTo", self.in_response_to.as_deref());
        out.push('>');
        out.push_str(&format!("<saml:Issuer>{}</saml:Issuer>", escape(&self.issuer)));
        out.push_str(&self.status.to_xml());
        out.push_str("</samlp:LogoutResponse>");
        out
    }
}
