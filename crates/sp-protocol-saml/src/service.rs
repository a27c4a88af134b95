//! The service provider facade.
//!
//! [`ServiceProvider`] wires configuration, metadata, keys and the hosting
//! application's collaborators together and exposes the protocol operations:
//! login, assertion consumption, logout, logout message handling and metadata.
//! It holds no per-user state; every operation works on the caller's session.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sp_core::{Event, EventListener, EventType, SamlBinding, SpConfig};
use sp_session::{IdentityCache, IdentityRecord, RequestCorrelationStore, SessionStore};

use crate::acs::{remember_subject, ResponseProcessor};
use crate::authn::{login_relay_target, safe_relay_target, select_idp, AuthnRequestBuilder, IdpSelection};
use crate::bindings::{BindingEncoder, TransportResponse};
use crate::error::{SamlError, SamlResult};
use crate::hooks::{
    AcsHooks, AuthenticationRequest, DefaultAcsHooks, LocalAuthenticator, LocalSession, LocalUser,
    SessionInfo, Setting, TemplateRenderer,
};
use crate::metadata::{ensure_valid, sp_metadata, ConfiguredMetadata, MetadataResolver};
use crate::signature::XmlSigner;
use crate::slo::{LogoutAction, LogoutOrchestrator};

/// Result of [`ServiceProvider::initiate_login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAction {
    /// Several IdPs are configured; let the user pick one.
    Discovery {
        /// Entity ID to display name.
        idps: BTreeMap<String, String>,
        /// Relay target to carry through the selection.
        next: String,
    },
    /// Send the AuthnRequest to the IdP.
    Transport {
        /// Redirect or auto-submitting form.
        response: TransportResponse,
        /// ID of the request, now outstanding in the session.
        request_id: String,
        /// Entity ID of the chosen IdP.
        idp: String,
    },
    /// The user is logged in already and is sent on.
    AlreadyAuthenticated {
        /// Where to send the user.
        relay_target: String,
    },
    /// The user is logged in already and may not log in again.
    PermissionDenied,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// The local user.
    pub user: LocalUser,
    /// Subject and attributes from the assertion.
    pub session_info: SessionInfo,
    /// Where to send the user.
    pub redirect: String,
}

/// SAML 2.0 service provider.
pub struct ServiceProvider {
    config: Arc<SpConfig>,
    metadata: Arc<dyn MetadataResolver>,
    signer: Option<XmlSigner>,
    signing_certificate: Option<String>,
    authenticator: Arc<dyn LocalAuthenticator>,
    hooks: Arc<dyn AcsHooks>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    events: Option<Arc<dyn EventListener>>,
    attribute_mapping: Setting<BTreeMap<String, Vec<String>>>,
    create_unknown_user: Setting<bool>,
}

impl ServiceProvider {
    /// Creates a service provider.
    ///
    /// Loads the signing key when one is configured. IdP metadata comes from
    /// the configuration until [`with_metadata`](Self::with_metadata) replaces it.
    pub fn new(
        config: Arc<SpConfig>,
        authenticator: Arc<dyn LocalAuthenticator>,
    ) -> SamlResult<Self> {
        let (signer, signing_certificate) = match &config.signing {
            Some(keys) => {
                let signer = XmlSigner::from_key_material(keys)?
                    .with_algorithm(config.signature_algorithm.into());
                (Some(signer), keys.certificate_pem().ok())
            }
            None => (None, None),
        };
        if config.sign_requests && signer.is_none() {
            return Err(SamlError::Configuration(
                "sign_requests is set but no signing key is configured".to_string(),
            ));
        }

        Ok(Self {
            metadata: Arc::new(ConfiguredMetadata::new(&config)),
            attribute_mapping: Setting::Static(config.attribute_mapping.clone()),
            create_unknown_user: Setting::Static(config.create_unknown_user),
            config,
            signer,
            signing_certificate,
            authenticator,
            hooks: Arc::new(DefaultAcsHooks),
            renderer: None,
            events: None,
        })
    }

    /// Replaces the IdP metadata source.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataResolver>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the assertion consumer hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn AcsHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets the page renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Sets the listener for login and logout events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventListener>) -> Self {
        self.events = Some(events);
        self
    }

    /// Overrides the configured attribute mapping.
    #[must_use]
    pub fn with_attribute_mapping(
        mut self,
        mapping: impl Into<Setting<BTreeMap<String, Vec<String>>>>,
    ) -> Self {
        self.attribute_mapping = mapping.into();
        self
    }

    /// Overrides whether unknown users are created.
    #[must_use]
    pub fn with_create_unknown_user(mut self, create: impl Into<Setting<bool>>) -> Self {
        self.create_unknown_user = create.into();
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SpConfig {
        &self.config
    }

    /// The page renderer, if any.
    #[must_use]
    pub fn renderer(&self) -> Option<&dyn TemplateRenderer> {
        self.renderer.as_deref()
    }

    /// Starts a login at the selected (or only) IdP.
    ///
    /// `relay_target` is where the user wants to go afterwards. The request
    /// becomes outstanding in `session` only once it has been encoded.
    pub async fn initiate_login<S: SessionStore>(
        &self,
        session: &S,
        selected_idp: Option<&str>,
        relay_target: Option<&str>,
        already_authenticated: bool,
    ) -> SamlResult<LoginAction> {
        let next = login_relay_target(&self.config, relay_target);

        if already_authenticated {
            if self.config.ignore_authenticated_users_on_login {
                return Ok(LoginAction::AlreadyAuthenticated { relay_target: next });
            }
            tracing::debug!("authenticated user asked to log in again");
            return Ok(LoginAction::PermissionDenied);
        }

        let entity_id = match select_idp(self.metadata.as_ref(), selected_idp).await? {
            IdpSelection::Selected(entity_id) => entity_id,
            IdpSelection::Discovery(idps) => return Ok(LoginAction::Discovery { idps, next }),
        };

        let idp = self.metadata.resolve(&entity_id).await?;
        ensure_valid(&idp, Utc::now())?;

        let prepared = AuthnRequestBuilder::new(&self.config).build(&idp)?;
        let signer = if self.config.sign_requests {
            self.signer.as_ref()
        } else {
            None
        };
        let response = BindingEncoder::new()
            .with_signer(signer)
            .with_renderer(self.renderer.as_deref())
            .encode(
                &prepared.request,
                prepared.binding,
                &prepared.destination,
                Some(&next),
            )?;

        RequestCorrelationStore::new(session)
            .put(&prepared.request.id, &next)
            .await?;

        tracing::info!(
            request_id = %prepared.request.id,
            idp = %entity_id,
            binding = %prepared.binding,
            "login started"
        );

        Ok(LoginAction::Transport {
            response,
            request_id: prepared.request.id,
            idp: entity_id,
        })
    }

    /// Consumes an AuthnResponse and logs the subject in locally.
    pub async fn process_authn_response<S: SessionStore>(
        &self,
        session: &S,
        raw: &str,
        binding: SamlBinding,
    ) -> SamlResult<LoginOutcome> {
        match self.consume(session, raw, binding).await {
            Ok(outcome) => {
                self.emit(
                    Event::builder(EventType::Login)
                        .subject(&outcome.session_info.subject_id)
                        .idp(&outcome.session_info.issuer)
                        .detail("user", &outcome.user.username)
                        .build(),
                );
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(error = %err, "authentication response rejected");
                self.emit(Event::builder(EventType::LoginError).failure(err.to_string()).build());
                Err(err)
            }
        }
    }

    async fn consume<S: SessionStore>(
        &self,
        session: &S,
        raw: &str,
        binding: SamlBinding,
    ) -> SamlResult<LoginOutcome> {
        let accepted = ResponseProcessor::new(&self.config, self.metadata.as_ref())
            .process(session, raw, binding)
            .await?;

        let request = AuthenticationRequest {
            session_info: &accepted.session_info,
            attribute_mapping: self.attribute_mapping.resolve(),
            create_unknown_user: self.create_unknown_user.resolve(),
        };
        let user = self.authenticator.authenticate(&request).await?.ok_or_else(|| {
            SamlError::Authentication(format!(
                "no local user for subject '{}'",
                accepted.session_info.name_id.value
            ))
        })?;
        remember_subject(session, &accepted.session_info).await?;

        let transport_relay = accepted.relay_state.as_deref().and_then(|candidate| {
            let safe = safe_relay_target(&self.config, candidate);
            if safe.is_none() {
                tracing::warn!(relay_state = candidate, "ignoring untrusted relay state");
            }
            safe
        });
        let relay_state = transport_relay
            .or(accepted.relay_target)
            .or_else(|| self.config.default_relay_state.clone())
            .unwrap_or_else(|| self.config.login_redirect_url.clone());

        self.hooks.customize_session(&user, &accepted.session_info);
        let relay_state = self.hooks.customize_relay_state(relay_state);
        let redirect = self
            .hooks
            .custom_redirect(&user, &relay_state)
            .unwrap_or(relay_state);

        Ok(LoginOutcome {
            user,
            session_info: accepted.session_info,
            redirect,
        })
    }

    /// Logs the current subject out locally and at every IdP.
    pub async fn initiate_logout<S: SessionStore>(
        &self,
        session: &S,
        local: &dyn LocalSession,
    ) -> SamlResult<LogoutAction> {
        let result = self.orchestrator().initiate(session, local).await;
        self.report_logout_error(result)
    }

    /// Handles a LogoutRequest or LogoutResponse from an IdP.
    pub async fn process_logout_message<S: SessionStore>(
        &self,
        session: &S,
        local: &dyn LocalSession,
        raw: &str,
        binding: SamlBinding,
    ) -> SamlResult<LogoutAction> {
        let result = self
            .orchestrator()
            .process_message(session, local, raw, binding)
            .await;
        self.report_logout_error(result)
    }

    /// This SP's metadata document.
    pub fn get_metadata(&self) -> SamlResult<String> {
        sp_metadata(&self.config, self.signing_certificate.as_deref(), Utc::now())
    }

    /// Identity of the subject logged in with `session`, unless expired.
    pub async fn identity<S: SessionStore>(&self, session: &S) -> SamlResult<Option<IdentityRecord>> {
        let cache = IdentityCache::new(session);
        let Some(subject_id) = cache.current_subject().await? else {
            return Ok(None);
        };
        Ok(cache.get(&subject_id, Utc::now()).await?)
    }

    /// Configured IdPs, entity ID to display name.
    pub async fn identity_providers(&self) -> SamlResult<BTreeMap<String, String>> {
        self.metadata.identity_providers().await
    }

    fn orchestrator(&self) -> LogoutOrchestrator<'_> {
        LogoutOrchestrator::new(&self.config, self.metadata.as_ref())
            .with_signer(self.signer.as_ref())
            .with_renderer(self.renderer.as_deref())
            .with_events(self.events.as_deref())
    }

    fn report_logout_error(&self, result: SamlResult<LogoutAction>) -> SamlResult<LogoutAction> {
        if let Err(err) = &result {
            tracing::warn!(error = %err, "logout failed");
            self.emit(Event::builder(EventType::LogoutError).failure(err.to_string()).build());
        }
        result
    }

    fn emit(&self, event: Event) {
        if let Some(listener) = &self.events {
            listener.on_event(&event);
        }
    }
}
