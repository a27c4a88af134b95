//! Common test utilities and fixtures.
//!
//! [`TestEnv`] runs the service provider on an ephemeral port. The identity
//! provider is played by the helpers here, which build and sign messages with
//! the fixture key the SP trusts.

use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use reqwest::{header, redirect::Policy, Client};
use sp_core::{IdpConfig, KeyMaterial, SamlBinding, SpConfig};
use sp_protocol_saml::bindings::{self, HttpRedirectBinding};
use sp_protocol_saml::signature::XmlSigner;
use sp_protocol_saml::xml::Element;
use sp_protocol_saml::{
    Assertion, Attribute, AuthnRequest, AuthnStatement, Conditions, LogoutRequest, LogoutResponse,
    MessageKind, NameId, ProtocolMessage, ResponseBuilder, Subject, SubjectConfirmation,
    SubjectConfirmationData,
};
use sp_server::{create_router, AppState, ServerConfig};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const SP_KEY: &str = include_str!("../../fixtures/sp.key");
pub const SP_CERT: &str = include_str!("../../fixtures/sp.crt");
pub const IDP_KEY: &str = include_str!("../../fixtures/idp.key");
pub const IDP_CERT: &str = include_str!("../../fixtures/idp.crt");

pub const IDP: &str = "https://idp.example.com/metadata";
pub const IDP_SSO: &str = "https://idp.example.com/sso";
pub const IDP_SLO: &str = "https://idp.example.com/slo";

/// The identity provider every environment trusts.
pub fn idp() -> IdpConfig {
    IdpConfig::new(IDP)
        .with_name("Example IdP")
        .with_sso(SamlBinding::HttpRedirect, IDP_SSO)
        .with_slo(SamlBinding::HttpRedirect, IDP_SLO)
        .with_certificate(IDP_CERT)
}

/// Test environment running the server.
pub struct TestEnv {
    /// Base URL of the running server.
    pub base_url: String,
    /// Browser with a cookie jar that does not follow redirects.
    pub client: Client,
    /// Server state, for assertions on the directory and sessions.
    pub state: AppState,
    /// Server shutdown signal.
    _shutdown_tx: oneshot::Sender<()>,
}

impl TestEnv {
    /// Starts a server trusting [`idp`].
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_config(|_| {}).await
    }

    /// Starts a server, letting the test adjust the SP configuration.
    pub async fn with_config(customize: impl FnOnce(&mut SpConfig)) -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("sp_server=debug,sp_protocol_saml=debug")
            .try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let mut sp = SpConfig::new(
            format!("{base_url}/saml2/metadata/"),
            format!("{base_url}/saml2/acs/"),
            format!("{base_url}/saml2/ls/"),
        )
        .with_signing(KeyMaterial::from_pem(SP_KEY, SP_CERT))
        .with_idp(idp());
        sp.name = Some("Integration SP".to_string());
        sp.attribute_mapping
            .insert("mail".to_string(), vec!["email".to_string()]);
        customize(&mut sp);

        let state = AppState::new(ServerConfig::for_testing(sp))?;
        let app = create_router(state.clone());

        let (_shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .cookie_store(true)
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            base_url,
            client,
            state,
            _shutdown_tx,
        })
    }

    /// Absolute URL of `path` on the server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn entity_id(&self) -> String {
        self.url("/saml2/metadata/")
    }

    pub fn acs_url(&self) -> String {
        self.url("/saml2/acs/")
    }

    pub fn ls_url(&self) -> String {
        self.url("/saml2/ls/")
    }

    /// Visits the login endpoint and returns the AuthnRequest and relay
    /// state the browser was sent to the IdP with.
    pub async fn start_login(&self, query: &str) -> anyhow::Result<(AuthnRequest, Option<String>)> {
        let response = self
            .client
            .get(self.url(&format!("/saml2/login/{query}")))
            .send()
            .await?;
        anyhow::ensure!(
            response.status().as_u16() == 302,
            "Expected redirect to the IdP, got {}",
            response.status()
        );

        let location = location(&response)?;
        let (endpoint, query) = location
            .split_once('?')
            .context("redirect without a query")?;
        anyhow::ensure!(endpoint == IDP_SSO, "unexpected SSO endpoint {endpoint}");

        let decoded = bindings::decode(SamlBinding::HttpRedirect, query)?;
        Ok((AuthnRequest::from_xml(&decoded.xml)?, decoded.relay_state))
    }

    /// Posts an IdP response to the assertion consumer.
    pub async fn post_response(&self, form: String) -> anyhow::Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.acs_url())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?)
    }

    /// Logs `user` in through the full front-channel flow and returns where
    /// the SP sent the browser afterwards.
    pub async fn login(&self, user: &str, next: &str) -> anyhow::Result<String> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("next", next)
            .finish();
        let (request, relay_state) = self.start_login(&format!("?{query}")).await?;
        let form = self.idp_response(Some(&request.id), user, relay_state.as_deref())?;
        let response = self.post_response(form).await?;
        anyhow::ensure!(
            response.status().as_u16() == 302,
            "Expected redirect after login, got {}",
            response.status()
        );
        location(&response)
    }

    /// A signed IdP response, form encoded for the HTTP-POST binding.
    pub fn idp_response(
        &self,
        request_id: Option<&str>,
        user: &str,
        relay_state: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut data = SubjectConfirmationData::for_request("", self.acs_url(), 5);
        data.in_response_to = request_id.map(str::to_string);

        let assertion = Assertion::new(IDP)
            .with_subject(
                Subject::new(NameId::persistent(user))
                    .with_confirmation(SubjectConfirmation::bearer(data)),
            )
            .with_conditions(Conditions::with_validity(5).with_audience(self.entity_id()))
            .with_authn_statement(AuthnStatement::new(
                "urn:oasis:names:tc:SAML:2.0:ac:classes:Password",
            ))
            .with_attribute(Attribute::single("mail", format!("{user}@example.com")));
        let assertion_id = assertion.id.clone();

        let mut builder = ResponseBuilder::new(IDP)
            .destination(self.acs_url())
            .assertion(assertion);
        if let Some(id) = request_id {
            builder = builder.in_response_to(id);
        }
        let signed = idp_signer()?.sign(&builder.build().to_xml(), &assertion_id)?;

        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair(
            "SAMLResponse",
            &base64::engine::general_purpose::STANDARD.encode(signed),
        );
        if let Some(relay_state) = relay_state {
            form.append_pair("RelayState", relay_state);
        }
        Ok(form.finish())
    }

    /// An IdP-initiated LogoutRequest as a redirect URL to the SP.
    pub fn idp_logout_request(&self, user: &str) -> anyhow::Result<(String, String)> {
        let request =
            LogoutRequest::new(IDP, NameId::persistent(user)).with_destination(self.ls_url());
        let url = HttpRedirectBinding::encode(
            &request.to_xml(),
            &self.ls_url(),
            Some("idp-state"),
            MessageKind::LogoutRequest,
            Some(&idp_signer()?),
        )?;
        Ok((request.id, url))
    }

    /// The IdP's answer to an SP LogoutRequest, as a redirect URL to the SP.
    pub fn idp_logout_response(&self, request_id: &str) -> anyhow::Result<String> {
        let response = LogoutResponse::success(IDP)
            .in_response_to(request_id)
            .with_destination(self.ls_url());
        Ok(HttpRedirectBinding::encode(
            &response.to_xml(),
            &self.ls_url(),
            None,
            MessageKind::LogoutResponse,
            Some(&idp_signer()?),
        )?)
    }
}

pub fn idp_signer() -> anyhow::Result<XmlSigner> {
    Ok(XmlSigner::from_pem(IDP_KEY, None)?)
}

/// The `Location` header of a redirect.
pub fn location(response: &reqwest::Response) -> anyhow::Result<String> {
    Ok(response
        .headers()
        .get(header::LOCATION)
        .context("missing Location header")?
        .to_str()?
        .to_string())
}

/// Decodes the protocol message carried by a redirect to the IdP.
pub fn redirected_message(location: &str, endpoint: &str) -> anyhow::Result<(Element, Option<String>)> {
    let (target, query) = location
        .split_once('?')
        .context("redirect without a query")?;
    anyhow::ensure!(target == endpoint, "unexpected endpoint {target}");
    let decoded = bindings::decode(SamlBinding::HttpRedirect, query)?;
    Ok((Element::parse(&decoded.xml)?, decoded.relay_state))
}
