//! HTML pages.
//!
//! [`AskamaRenderer`] renders the pages the protocol engine asks for; the
//! handlers use the same templates for error pages.

use std::collections::BTreeMap;

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use sp_protocol_saml::bindings::PostForm;
use sp_protocol_saml::{SamlError, TemplateRenderer};

/// Auto-submitting form of the HTTP-POST binding.
#[derive(Template)]
#[template(path = "post_form.html")]
pub struct PostFormTemplate {
    /// Form action.
    pub target_url: String,
    /// `SAMLRequest` or `SAMLResponse`.
    pub param_name: String,
    /// Base64 message.
    pub value: String,
    /// Relay state.
    pub relay_state: Option<String>,
}

/// IdP selection page.
#[derive(Template)]
#[template(path = "discovery.html")]
pub struct DiscoveryTemplate {
    /// Name of this service provider.
    pub sp_name: String,
    /// Entity ID and display name of every IdP.
    pub idps: Vec<(String, String)>,
    /// Relay target to carry through the selection.
    pub next: String,
}

/// Error page.
#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    /// Name of this service provider.
    pub sp_name: String,
    /// Heading.
    pub title: String,
    /// Explanation.
    pub message: String,
}

/// Renders error pages with HTTP status `status`.
pub fn error_page(sp_name: &str, status: StatusCode, message: &str) -> Response {
    let template = ErrorTemplate {
        sp_name: sp_name.to_string(),
        title: status.canonical_reason().unwrap_or("Error").to_string(),
        message: message.to_string(),
    };

    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!("Template render error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

/// [`TemplateRenderer`] backed by the askama templates.
#[derive(Debug, Clone)]
pub struct AskamaRenderer {
    sp_name: String,
}

impl AskamaRenderer {
    /// Creates a renderer that titles pages with `sp_name`.
    pub fn new(sp_name: impl Into<String>) -> Self {
        Self {
            sp_name: sp_name.into(),
        }
    }
}

fn render(template: &impl Template) -> Option<String> {
    template
        .render()
        .map_err(|e| tracing::error!("Template render error: {}", e))
        .ok()
}

impl TemplateRenderer for AskamaRenderer {
    fn render_post_form(&self, form: &PostForm) -> Option<String> {
        render(&PostFormTemplate {
            target_url: form.target_url.clone(),
            param_name: form.param_name.to_string(),
            value: form.value.clone(),
            relay_state: form.relay_state.clone(),
        })
    }

    fn render_discovery(&self, idps: &BTreeMap<String, String>, next: &str) -> Option<String> {
        render(&DiscoveryTemplate {
            sp_name: self.sp_name.clone(),
            idps: idps.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            next: next.to_string(),
        })
    }

    fn render_error(&self, error: &SamlError) -> Option<String> {
        render(&ErrorTemplate {
            sp_name: self.sp_name.clone(),
            title: "Sign-in failed".to_string(),
            message: error.to_string(),
        })
    }
}
