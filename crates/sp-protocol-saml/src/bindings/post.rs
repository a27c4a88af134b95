//! HTTP-POST Binding implementation.
//!
//! Implements the SAML 2.0 HTTP-POST binding for sending SAML messages
//! via HTML form POST.

use base64::Engine;
use sp_core::SamlBinding;

use crate::error::{SamlError, SamlResult};
use crate::hooks::TemplateRenderer;
use crate::types::MessageKind;

use super::DecodedMessage;

/// Values of an auto-submitting form, handed to a [`TemplateRenderer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostForm {
    /// Form action.
    pub target_url: String,
    /// `SAMLRequest` or `SAMLResponse`.
    pub param_name: &'static str,
    /// Base64 message.
    pub value: String,
    /// Relay state, if any.
    pub relay_state: Option<String>,
}

/// HTTP-POST binding encoder/decoder.
pub struct HttpPostBinding;

impl HttpPostBinding {
    /// Encodes a SAML message for HTTP-POST binding.
    ///
    /// Returns an HTML page that submits itself to the destination. A renderer
    /// that returns `None` falls back to the built-in form.
    pub fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        kind: MessageKind,
        renderer: Option<&dyn TemplateRenderer>,
    ) -> String {
        let form = PostForm {
            target_url: destination.to_string(),
            param_name: kind.param_name(),
            value: base64::engine::general_purpose::STANDARD.encode(xml),
            relay_state: relay_state.map(str::to_string),
        };

        renderer
            .and_then(|r| r.render_post_form(&form))
            .unwrap_or_else(|| default_form(&form))
    }

    /// Decodes a SAML message from a form-encoded request body.
    pub fn decode(body: &str) -> SamlResult<DecodedMessage> {
        let mut message = None;
        let mut relay_state = None;

        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            match key.as_ref() {
                "SAMLRequest" | "SAMLResponse" => message = Some(value.into_owned()),
                "RelayState" => relay_state = Some(value.into_owned()),
                _ => {}
            }
        }

        let encoded = message.ok_or_else(|| {
            SamlError::MalformedMessage("no SAMLRequest or SAMLResponse parameter".to_string())
        })?;

        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = base64::engine::general_purpose::STANDARD.decode(compact)?;

        let xml = String::from_utf8(decoded)
            .map_err(|e| SamlError::MalformedMessage(format!("invalid UTF-8 in message: {e}")))?;

        Ok(DecodedMessage {
            xml,
            binding: SamlBinding::HttpPost,
            relay_state,
            detached_signature: None,
        })
    }
}

fn default_form(form: &PostForm) -> String {
    let relay_state_input = form
        .relay_state
        .as_deref()
        .map(|rs| {
            format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                html_escape(rs)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>SAML POST Binding</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="post" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        html_escape(&form.target_url),
        form.param_name,
        form.value,
        relay_state_input
    )
}

/// Escapes HTML special characters.
pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
