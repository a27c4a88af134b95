//! SAML bindings implementation.
//!
//! This module implements the SAML 2.0 bindings for message transport:
//!
//! - **HTTP-Redirect Binding** - Messages are deflated, base64-encoded and URL-encoded,
//!   with an optional detached signature over the query string
//! - **HTTP-POST Binding** - Messages are base64-encoded and sent in an auto-submitting form
//! - **SOAP Binding** - Messages travel in a SOAP envelope on the back channel
//!
//! [`BindingEncoder`] turns a protocol message into a [`TransportResponse`]; [`decode`]
//! reads a raw inbound payload.

mod post;
mod redirect;
mod soap;

pub use post::*;
pub use redirect::*;
pub use soap::*;

use sp_core::SamlBinding;

use crate::error::{SamlError, SamlResult};
use crate::hooks::TemplateRenderer;
use crate::signature::XmlSigner;
use crate::types::ProtocolMessage;

/// What the caller has to send to deliver a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportResponse {
    /// Redirect the user agent to this URL.
    Redirect {
        /// Full URL including the encoded message.
        location: String,
    },
    /// Serve this HTML page (an auto-submitting form).
    Html {
        /// Page content.
        body: String,
    },
    /// Post this SOAP envelope to the endpoint on the back channel.
    Soap {
        /// Endpoint URL.
        endpoint: String,
        /// SOAP envelope.
        body: String,
    },
}

/// Detached signature carried by an HTTP-Redirect message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedSignature {
    /// The signed part of the query string, as received.
    pub signed_query: String,
    /// Base64 signature value.
    pub signature: String,
    /// Signature algorithm URI.
    pub sig_alg: String,
}

/// Decoded SAML message.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// The XML content.
    pub xml: String,
    /// Binding the message arrived with.
    pub binding: SamlBinding,
    /// Relay state, if provided.
    pub relay_state: Option<String>,
    /// Detached signature (HTTP-Redirect only).
    pub detached_signature: Option<DetachedSignature>,
}

/// Decodes a raw inbound payload.
///
/// `raw` is the query string for HTTP-Redirect, the form-encoded request body
/// for HTTP-POST and the envelope for SOAP.
pub fn decode(binding: SamlBinding, raw: &str) -> SamlResult<DecodedMessage> {
    match binding {
        SamlBinding::HttpRedirect => HttpRedirectBinding::decode(raw),
        SamlBinding::HttpPost => HttpPostBinding::decode(raw),
        SamlBinding::Soap => SoapBinding::decode(raw),
        SamlBinding::HttpArtifact => Err(SamlError::UnsupportedBinding(binding.to_string())),
    }
}

/// Produces the transport payload for a message.
pub struct BindingEncoder<'a> {
    signer: Option<&'a XmlSigner>,
    renderer: Option<&'a dyn TemplateRenderer>,
}

impl<'a> BindingEncoder<'a> {
    /// Creates an encoder that neither signs nor uses a form template.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            signer: None,
            renderer: None,
        }
    }

    /// Signs outgoing messages with `signer`.
    #[must_use]
    pub const fn with_signer(mut self, signer: Option<&'a XmlSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Renders POST forms with `renderer` when it provides a template.
    #[must_use]
    pub const fn with_renderer(mut self, renderer: Option<&'a dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Encodes `message` for delivery to `destination`.
    ///
    /// The message is serialized and signed first; the signed text is never
    /// modified afterwards.
    pub fn encode(
        &self,
        message: &dyn ProtocolMessage,
        binding: SamlBinding,
        destination: &str,
        relay_state: Option<&str>,
    ) -> SamlResult<TransportResponse> {
        let kind = message.kind();
        let xml = message.to_xml();
        match binding {
            SamlBinding::HttpRedirect => {
                let location =
                    HttpRedirectBinding::encode(&xml, destination, relay_state, kind, self.signer)?;
                Ok(TransportResponse::Redirect { location })
            }
            SamlBinding::HttpPost => {
                let xml = self.sign_enveloped(xml, message.id())?;
                let body = HttpPostBinding::encode(&xml, destination, relay_state, kind, self.renderer);
                Ok(TransportResponse::Html { body })
            }
            SamlBinding::Soap => {
                let xml = self.sign_enveloped(xml, message.id())?;
                Ok(TransportResponse::Soap {
                    endpoint: destination.to_string(),
                    body: SoapBinding::wrap(&xml),
                })
            }
            SamlBinding::HttpArtifact => Err(SamlError::UnsupportedBinding(binding.to_string())),
        }
    }

    fn sign_enveloped(&self, xml: String, id: &str) -> SamlResult<String> {
        match self.signer {
            Some(signer) => signer.sign(&xml, id),
            None => Ok(xml),
        }
    }
}

impl Default for BindingEncoder<'_> {
    fn default() -> Self {
        Self::new()
    }
}
