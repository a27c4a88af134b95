//! SOAP Binding implementation.
//!
//! Back-channel messages (single logout with IdPs that only talk SOAP) travel
//! in a SOAP 1.1 envelope. There is no relay state on this binding.

use sp_core::SamlBinding;

use crate::error::{SamlError, SamlResult};
use crate::types::SOAP_ENV_NS;
use crate::xml::Element;

use super::DecodedMessage;

/// SOAP binding encoder/decoder.
pub struct SoapBinding;

impl SoapBinding {
    /// Wraps a SAML message in a SOAP envelope.
    #[must_use]
    pub fn wrap(xml: &str) -> String {
        let body = xml
            .strip_prefix("<?xml")
            .and_then(|rest| rest.find("?>").map(|end| &rest[end + 2..]))
            .unwrap_or(xml);
        format!(
            r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="{SOAP_ENV_NS}"><SOAP-ENV:Body>{}</SOAP-ENV:Body></SOAP-ENV:Envelope>"#,
            body.trim()
        )
    }

    /// Extracts the SAML message from a SOAP envelope.
    ///
    /// The message is serialized from the parsed tree, with the namespace
    /// declarations it inherits from the envelope.
    pub fn decode(envelope: &str) -> SamlResult<DecodedMessage> {
        let root = Element::parse(envelope)?;
        if root.local_name() != "Envelope" {
            return Err(SamlError::MalformedMessage(format!(
                "expected SOAP Envelope, found {}",
                root.local_name()
            )));
        }

        let message = root
            .child("Body")
            .and_then(|body| body.elements().next())
            .ok_or_else(|| SamlError::MalformedMessage("empty SOAP body".to_string()))?;

        if message.local_name() == "Fault" {
            let reason = message
                .child_text("faultstring")
                .unwrap_or_else(|| "unknown fault".to_string());
            return Err(SamlError::MalformedMessage(format!("SOAP fault: {reason}")));
        }

        let scope = root.namespaces_at(message).unwrap_or_default();
        Ok(DecodedMessage {
            xml: message.to_xml(&scope),
            binding: SamlBinding::Soap,
            relay_state: None,
            detached_signature: None,
        })
    }
}
