//! SAML Name ID types.
//!
//! Name identifiers are used to identify subjects in SAML assertions.

use serde::{Deserialize, Serialize};

use super::message::push_attr;
use super::NameIdFormat;
use crate::error::{SamlError, SamlResult};
use crate::xml::{escape, Element};

/// SAML Name ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The identifier value.
    pub value: String,

    /// The format of the name identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The domain that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_qualifier: Option<String>,

    /// The service provider that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,
}

impl NameId {
    /// Creates a name ID without a format.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
        }
    }

    /// Creates a persistent name ID.
    #[must_use]
    pub fn persistent(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Persistent)
    }

    /// Creates a transient name ID.
    #[must_use]
    pub fn transient(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Transient)
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: NameIdFormat) -> Self {
        self.format = Some(format.uri().to_string());
        self
    }

    /// Sets the name qualifier.
    #[must_use]
    pub fn with_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.name_qualifier = Some(qualifier.into());
        self
    }

    /// Sets the SP name qualifier.
    #[must_use]
    pub fn with_sp_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.sp_name_qualifier = Some(qualifier.into());
        self
    }

    /// Encodes the name ID into an opaque subject identifier.
    ///
    /// The result is a comma separated list of `key=value` pairs with
    /// percent-encoded values, stable across requests.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut parts = vec![format!("v={}", urlencoding::encode(&self.value))];
        for (key, value) in [
            ("f", &self.format),
            ("nq", &self.name_qualifier),
            ("spnq", &self.sp_name_qualifier),
        ] {
            if let Some(v) = value {
                parts.push(format!("{key}={}", urlencoding::encode(v)));
            }
        }
        parts.join(",")
    }

    /// Recovers a name ID from [`Self::encode`] output.
    pub fn decode(subject_id: &str) -> SamlResult<Self> {
        let mut name_id = Self::new(String::new());
        let mut has_value = false;
        for part in subject_id.split(',') {
            let (key, raw) = part
                .split_once('=')
                .ok_or_else(|| SamlError::MalformedMessage("invalid subject id".to_string()))?;
            let value = urlencoding::decode(raw)
                .map_err(|e| SamlError::MalformedMessage(format!("invalid subject id: {e}")))?
                .into_owned();
            match key {
                "v" => {
                    name_id.value = value;
                    has_value = true;
                }
                "f" => name_id.format = Some(value),
                "nq" => name_id.name_qualifier = Some(value),
                "spnq" => name_id.sp_name_qualifier = Some(value),
                _ => {
                    return Err(SamlError::MalformedMessage(format!(
                        "invalid subject id key '{key}'"
                    )));
                }
            }
        }
        if has_value {
            Ok(name_id)
        } else {
            Err(SamlError::MalformedMessage("subject id has no value".to_string()))
        }
    }

    /// Reads a `saml:NameID` element.
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        let value = element.text().trim().to_string();
        if value.is_empty() {
            return Err(SamlError::MalformedMessage("empty NameID".to_string()));
        }
        Ok(Self {
            value,
            format: element.attr("Format").map(str::to_string),
            name_qualifier: element.attr("NameQualifier").map(str::to_string),
            sp_name_qualifier: element.attr("SPNameQualifier").map(str::to_string),
        })
    }

    /// Serializes as a `saml:NameID` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<saml:NameID");
        push_attr(&mut out, "Format", self.format.as_deref());
        push_attr(&mut out, "NameQualifier", self.name_qualifier.as_deref());
        push_attr(&mut out, "SPNameQualifier", self.sp_name_qualifier.as_deref());
        out.push('>');
        out.push_str(&escape(&self.value));
        out.push_str("</saml:NameID>");
        out
    }
}

/// Name ID policy for authentication requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIdPolicy {
    /// The requested format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Whether the IdP may create a new identifier.
    #[serde(default)]
    pub allow_create: bool,
}

impl NameIdPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(format: Option<String>, allow_create: bool) -> Self {
        Self { format, allow_create }
    }

    /// Serializes as a `samlp:NameIDPolicy` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<samlp:NameIDPolicy");
        push_attr(&mut out, "Format", self.format.as_deref());
        out.push_str(&format!(" AllowCreate=\"{}\"/>", self.allow_create));
        out
    }
}
