//! SAML transport bindings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// SAML binding types.
///
/// Configuration accepts either the short name (`redirect`, `post`, `soap`,
/// `artifact`) or the full binding URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SamlBinding {
    /// HTTP POST binding.
    HttpPost,
    /// HTTP Redirect binding.
    HttpRedirect,
    /// HTTP Artifact binding.
    HttpArtifact,
    /// SOAP binding.
    Soap,
}

impl SamlBinding {
    /// Returns the URI for this binding.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::HttpPost => "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST",
            Self::HttpRedirect => "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect",
            Self::HttpArtifact => "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact",
            Self::Soap => "urn:oasis:names:tc:SAML:2.0:bindings:SOAP",
        }
    }

    /// Parses a binding from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" => Some(Self::HttpPost),
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" => Some(Self::HttpRedirect),
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact" => Some(Self::HttpArtifact),
            "urn:oasis:names:tc:SAML:2.0:bindings:SOAP" => Some(Self::Soap),
            _ => None,
        }
    }

    /// Short name used in configuration files and logs.
    #[must_use]
    pub const fn short_name(&self) -> &'static str {
        match self {
            Self::HttpPost => "post",
            Self::HttpRedirect => "redirect",
            Self::HttpArtifact => "artifact",
            Self::Soap => "soap",
        }
    }

    /// Returns true for bindings carried by the user agent.
    #[must_use]
    pub const fn is_front_channel(&self) -> bool {
        matches!(self, Self::HttpPost | Self::HttpRedirect | Self::HttpArtifact)
    }
}

impl fmt::Display for SamlBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for SamlBinding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(binding) = Self::from_uri(s) {
            return Ok(binding);
        }
        match s.to_ascii_lowercase().as_str() {
            "post" | "http-post" => Ok(Self::HttpPost),
            "redirect" | "http-redirect" => Ok(Self::HttpRedirect),
            "artifact" | "http-artifact" => Ok(Self::HttpArtifact),
            "soap" => Ok(Self::Soap),
            _ => Err(format!("unknown SAML binding: {s}")),
        }
    }
}

impl TryFrom<String> for SamlBinding {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SamlBinding> for String {
    fn from(binding: SamlBinding) -> Self {
        binding.short_name().to_string()
    }
}
