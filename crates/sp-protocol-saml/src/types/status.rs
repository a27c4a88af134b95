//! SAML Status types.

use serde::{Deserialize, Serialize};

use super::{status_codes, sub_status_codes};
use crate::error::{SamlError, SamlResult};
use crate::xml::{escape, Element};

/// SAML protocol status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Top-level status code.
    pub code: String,

    /// Nested status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_code: Option<String>,

    /// Status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Status {
    /// Creates a success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: status_codes::SUCCESS.to_string(),
            sub_code: None,
            message: None,
        }
    }

    /// Creates a status with an explicit code and sub-code.
    #[must_use]
    pub fn new(code: impl Into<String>, sub_code: Option<&str>) -> Self {
        Self {
            code: code.into(),
            sub_code: sub_code.map(str::to_string),
            message: None,
        }
    }

    /// Creates an authentication failed status.
    #[must_use]
    pub fn authn_failed(message: impl Into<String>) -> Self {
        Self::new(status_codes::RESPONDER, Some(sub_status_codes::AUTHN_FAILED))
            .with_message(message)
    }

    /// Creates a partial logout status.
    #[must_use]
    pub fn partial_logout() -> Self {
        Self::new(status_codes::SUCCESS, Some(sub_status_codes::PARTIAL_LOGOUT))
    }

    /// Builds the status reported for an error.
    #[must_use]
    pub fn from_error(err: &SamlError) -> Self {
        Self::new(err.status_code(), err.sub_status_code()).with_message(err.to_string())
    }

    /// Returns true if this status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == status_codes::SUCCESS
    }

    /// Sets the status message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Reads a `samlp:Status` element.
    pub fn from_element(element: &Element) -> SamlResult<Self> {
        let code_element = element
            .child("StatusCode")
            .ok_or_else(|| SamlError::MalformedMessage("Status has no StatusCode".to_string()))?;
        let code = code_element
            .attr("Value")
            .ok_or_else(|| SamlError::MalformedMessage("StatusCode has no Value".to_string()))?;
        let sub_code = code_element.child("StatusCode").and_then(|e| e.attr("Value"));
        Ok(Self {
            code: code.to_string(),
            sub_code: sub_code.map(str::to_string),
            message: element.child_text("StatusMessage"),
        })
    }

    /// Serializes as a `samlp:Status` element.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = format!("<samlp:Status><samlp:StatusCode Value=\"{}\"", escape(&self.code));
        match &self.sub_code {
            Some(sub) => out.push_str(&format!(
                "><samlp:StatusCode Value=\"{}\"/></samlp:StatusCode>",
                escape(sub)
            )),
            None => out.push_str("/>"),
        }
        if let Some(msg) = &self.message {
            out.push_str(&format!("<samlp:StatusMessage>{}</samlp:StatusMessage>", escape(msg)));
        }
        out.push_str("</samlp:Status>");
        out
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}
