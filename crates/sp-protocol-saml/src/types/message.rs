//! Properties shared by all protocol messages.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{SamlError, SamlResult};
use crate::xml::Element;

/// Kind of protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `samlp:AuthnRequest`.
    AuthnRequest,
    /// `samlp:Response`.
    AuthnResponse,
    /// `samlp:LogoutRequest`.
    LogoutRequest,
    /// `samlp:LogoutResponse`.
    LogoutResponse,
}

impl MessageKind {
    /// Determines the kind from the root element's local name.
    #[must_use]
    pub fn from_local_name(name: &str) -> Option<Self> {
        match name {
            "AuthnRequest" => Some(Self::AuthnRequest),
            "Response" => Some(Self::AuthnResponse),
            "LogoutRequest" => Some(Self::LogoutRequest),
            "LogoutResponse" => Some(Self::LogoutResponse),
            _ => None,
        }
    }

    /// Returns true for request messages.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(self, Self::AuthnRequest | Self::LogoutRequest)
    }

    /// Form or query parameter carrying a message of this kind.
    #[must_use]
    pub const fn param_name(&self) -> &'static str {
        if self.is_request() {
            "SAMLRequest"
        } else {
            "SAMLResponse"
        }
    }
}

/// A SAML protocol message. Immutable once issued.
pub trait ProtocolMessage {
    /// Unique message ID.
    fn id(&self) -> &str;
    /// Entity ID of the issuer.
    fn issuer(&self) -> &str;
    /// When the message was issued.
    fn issue_instant(&self) -> DateTime<Utc>;
    /// Intended recipient URL.
    fn destination(&self) -> Option<&str>;
    /// Message kind.
    fn kind(&self) -> MessageKind;
    /// Serializes the message.
    fn to_xml(&self) -> String;
}

/// Generates a unique message ID.
///
/// XML IDs must not start with a digit, hence the prefix.
#[must_use]
pub fn generate_id() -> String {
    format!("_id{}", uuid::Uuid::new_v4().simple())
}

/// Formats a timestamp as `xs:dateTime` in UTC.
#[must_use]
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses an `xs:dateTime` value.
pub fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SamlError::MalformedMessage(format!("invalid timestamp '{value}': {e}")))
}

pub(crate) fn optional_instant(element: &Element, attr: &str) -> SamlResult<Option<DateTime<Utc>>> {
    element.attr(attr).map(parse_instant).transpose()
}

pub(crate) fn required_attr<'a>(element: &'a Element, attr: &str) -> SamlResult<&'a str> {
    element.attr(attr).ok_or_else(|| {
        SamlError::MalformedMessage(format!("{} is missing {attr}", element.local_name()))
    })
}

pub(crate) fn expect_root(element: &Element, name: &str) -> SamlResult<()> {
    if element.local_name() == name {
        Ok(())
    } else {
        Err(SamlError::MalformedMessage(format!(
            "expected {name}, found {}",
            element.local_name()
        )))
    }
}

pub(crate) fn issuer_of(element: &Element) -> SamlResult<String> {
    element
        .child_text("Issuer")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            SamlError::MalformedMessage(format!("{} has no Issuer", element.local_name()))
        })
}

pub(crate) fn push_attr(out: &mut String, name: &str, value: Option<&str>) {
    if let Some(v) = value {
        out.push_str(&format!(" {name}=\"{}\"", crate::xml::escape(v)));
    }
}
