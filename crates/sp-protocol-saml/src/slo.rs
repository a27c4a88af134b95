//! Single logout.
//!
//! [`LogoutOrchestrator`] drives logout in both directions:
//!
//! - SP-initiated: the local session is terminated first, then every entity
//!   the subject has a session at receives a LogoutRequest, one at a time.
//!   Each LogoutResponse triggers the request to the next entity.
//! - IdP-initiated: an incoming LogoutRequest terminates the local session
//!   and is answered with a signed LogoutResponse.
//!
//! Progress is kept in the session under [`LogoutStateStore`]. A finished
//! logout stays there so that late duplicates are recognised.

use chrono::{DateTime, Utc};
use sp_core::{Event, EventListener, EventType, IdpConfig, SamlBinding, SpConfig};
use sp_session::{
    IdentityCache, LogoutPhase, LogoutState, LogoutStateStore, ResponseMatch, SessionStore,
};

use crate::bindings::{self, BindingEncoder, DecodedMessage, TransportResponse};
use crate::error::{SamlError, SamlResult};
use crate::hooks::{LocalSession, TemplateRenderer};
use crate::metadata::{endpoint_for, MetadataResolver};
use crate::signature::{XmlSignatureValidator, XmlSigner};
use crate::types::{
    LogoutRequest, LogoutResponse, MessageKind, NameId, ProtocolMessage, LOGOUT_REASON_USER,
};
use crate::xml::Element;

/// Minutes a LogoutRequest stays valid.
const LOGOUT_REQUEST_VALIDITY_MINUTES: i64 = 5;

/// What the caller does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutAction {
    /// Deliver this message. The logout continues when the reply arrives.
    Transport(TransportResponse),
    /// Nothing is left to send; redirect the user agent.
    Finished {
        /// Where to send the user.
        redirect: String,
        /// Phase the logout is in.
        phase: LogoutPhase,
    },
}

/// Drives single logout for one session.
pub struct LogoutOrchestrator<'a> {
    config: &'a SpConfig,
    resolver: &'a dyn MetadataResolver,
    signer: Option<&'a XmlSigner>,
    renderer: Option<&'a dyn TemplateRenderer>,
    events: Option<&'a dyn EventListener>,
    now: Option<DateTime<Utc>>,
}

impl<'a> LogoutOrchestrator<'a> {
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(config: &'a SpConfig, resolver: &'a dyn MetadataResolver) -> Self {
        Self {
            config,
            resolver,
            signer: None,
            renderer: None,
            events: None,
            now: None,
        }
    }

    /// Key used to sign outgoing messages.
    #[must_use]
    pub const fn with_signer(mut self, signer: Option<&'a XmlSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Renderer for HTTP-POST forms.
    #[must_use]
    pub const fn with_renderer(mut self, renderer: Option<&'a dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Listener for logout events.
    #[must_use]
    pub const fn with_events(mut self, events: Option<&'a dyn EventListener>) -> Self {
        self.events = events;
        self
    }

    /// Uses a fixed clock instead of the current time.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Starts an SP-initiated logout.
    ///
    /// The local session is terminated before anything else, exactly once,
    /// whatever happens with the remote entities.
    pub async fn initiate<S: SessionStore>(
        &self,
        session: &S,
        local: &dyn LocalSession,
    ) -> SamlResult<LogoutAction> {
        terminate_local(local).await;

        let identity = IdentityCache::new(session);
        let Some(subject_id) = identity.current_subject().await? else {
            tracing::debug!("logout without a SAML subject");
            return Ok(LogoutAction::Finished {
                redirect: self.config.logout_redirect_url.clone(),
                phase: LogoutPhase::Complete,
            });
        };
        identity.clear_current_subject().await?;

        let entities = identity
            .sessions(&subject_id)
            .await?
            .into_iter()
            .map(|s| s.authenticating_entity);
        let mut state = LogoutState::after_local_logout(
            &subject_id,
            entities,
            &self.config.logout_redirect_url,
        );
        tracing::info!(
            entities = state.entities.len(),
            "local logout done, notifying entities"
        );

        self.advance(session, &mut state).await
    }

    /// Handles a LogoutRequest or LogoutResponse arriving over `binding`.
    pub async fn process_message<S: SessionStore>(
        &self,
        session: &S,
        local: &dyn LocalSession,
        raw: &str,
        binding: SamlBinding,
    ) -> SamlResult<LogoutAction> {
        let decoded = bindings::decode(binding, raw)?;
        let root = Element::parse(&decoded.xml)?;

        match MessageKind::from_local_name(root.local_name()) {
            Some(MessageKind::LogoutResponse) => {
                self.handle_response(session, &root, &decoded).await
            }
            Some(MessageKind::LogoutRequest) => {
                self.handle_request(session, local, &root, &decoded).await
            }
            _ => Err(SamlError::MalformedMessage(format!(
                "unexpected {} on the logout service",
                root.local_name()
            ))),
        }
    }

    /// Contacts the next entity, or finishes when none is left.
    async fn advance<S: SessionStore>(
        &self,
        session: &S,
        state: &mut LogoutState,
    ) -> SamlResult<LogoutAction> {
        let identity = IdentityCache::new(session);
        let store = LogoutStateStore::new(session);

        while let Some(entity_id) = state.next_queued().map(str::to_string) {
            match self.send_request(session, &state.subject_id, &entity_id).await {
                Ok((binding, request_id, transport)) => {
                    state.mark_sent(&entity_id, binding, &request_id);
                    store.save(state).await?;
                    tracing::debug!(idp = %entity_id, %request_id, %binding, "sent LogoutRequest");
                    return Ok(LogoutAction::Transport(transport));
                }
                Err(SamlError::LogoutNotSupported { entity_id }) => {
                    tracing::warn!(idp = %entity_id, "entity does not support single logout");
                    state.mark_not_supported(&entity_id);
                    identity.remove_entity(&state.subject_id, &entity_id).await?;
                }
                Err(err) => {
                    tracing::warn!(idp = %entity_id, error = %err, "could not send LogoutRequest");
                    state.mark_failed(&entity_id, err.to_string());
                }
            }
        }

        self.finish(session, state).await
    }

    async fn finish<S: SessionStore>(
        &self,
        session: &S,
        state: &mut LogoutState,
    ) -> SamlResult<LogoutAction> {
        let phase = state.settle();

        let identity = IdentityCache::new(session);
        identity.delete(&state.subject_id).await?;
        identity.clear_current_subject().await?;
        LogoutStateStore::new(session).save(state).await?;

        let mut event = Event::builder(EventType::Logout).subject(&state.subject_id);
        if phase != LogoutPhase::Complete {
            event = event.failure("not every entity confirmed the logout");
        }
        self.emit(
            event
                .detail("completed", state.completed_count().to_string())
                .detail("entities", state.entities.len().to_string())
                .build(),
        );
        tracing::info!(?phase, completed = state.completed_count(), "logout finished");

        Ok(LogoutAction::Finished {
            redirect: state.relay_target.clone(),
            phase,
        })
    }

    async fn send_request<S: SessionStore>(
        &self,
        session: &S,
        subject_id: &str,
        entity_id: &str,
    ) -> SamlResult<(SamlBinding, String, TransportResponse)> {
        let idp = self.resolver.resolve(entity_id).await?;
        let (binding, location) = self
            .config
            .slo_binding_preference
            .iter()
            .find_map(|b| endpoint_for(&idp.slo, *b).map(|e| (*b, e.location.clone())))
            .ok_or_else(|| SamlError::LogoutNotSupported {
                entity_id: entity_id.to_string(),
            })?;

        let mut request = LogoutRequest::new(&self.config.entity_id, NameId::decode(subject_id)?)
            .with_destination(&location)
            .with_reason(LOGOUT_REASON_USER)
            .valid_for(LOGOUT_REQUEST_VALIDITY_MINUTES);
        let sessions = IdentityCache::new(session).sessions(subject_id).await?;
        if let Some(index) = sessions
            .into_iter()
            .find(|s| s.authenticating_entity == entity_id)
            .and_then(|s| s.session_index)
        {
            request = request.with_session_index(index);
        }

        let signer = if self.config.logout_requests_signed {
            self.signer
        } else {
            None
        };
        let transport = BindingEncoder::new()
            .with_signer(signer)
            .with_renderer(self.renderer)
            .encode(&request, binding, &location, None)?;
        Ok((binding, request.id, transport))
    }

    async fn handle_response<S: SessionStore>(
        &self,
        session: &S,
        root: &Element,
        decoded: &DecodedMessage,
    ) -> SamlResult<LogoutAction> {
        let response = LogoutResponse::from_element(root)?;
        let idp = self.resolver.resolve(&response.issuer).await?;
        self.verify_if_signed(&idp, root, decoded, false)?;

        let request_id = response.in_response_to.as_deref().ok_or_else(|| {
            SamlError::UnsolicitedResponse("LogoutResponse does not answer a request".to_string())
        })?;

        let store = LogoutStateStore::new(session);
        let Some(mut state) = store.load().await? else {
            return Err(SamlError::UnsolicitedResponse(
                "no logout in progress".to_string(),
            ));
        };

        let reason = response.status.message.as_deref().or(response.status.sub_code.as_deref());
        match state.record_response(&response.issuer, request_id, response.is_success(), reason) {
            ResponseMatch::Unknown => Err(SamlError::UnsolicitedResponse(format!(
                "no LogoutRequest '{request_id}' was sent"
            ))),
            ResponseMatch::WrongIssuer { entity_id } => Err(SamlError::UnsolicitedResponse(format!(
                "LogoutRequest '{request_id}' was sent to {entity_id}, not {}",
                response.issuer
            ))),
            ResponseMatch::Duplicate { entity_id } => {
                tracing::debug!(idp = %entity_id, request_id, "ignoring duplicate LogoutResponse");
                Ok(LogoutAction::Finished {
                    redirect: state.relay_target.clone(),
                    phase: state.phase,
                })
            }
            ResponseMatch::Accepted { entity_id } => {
                if !response.is_success() {
                    tracing::warn!(idp = %entity_id, status = %response.status.code, "entity refused logout");
                }
                IdentityCache::new(session)
                    .remove_entity(&state.subject_id, &entity_id)
                    .await?;
                self.advance(session, &mut state).await
            }
        }
    }

    async fn handle_request<S: SessionStore>(
        &self,
        session: &S,
        local: &dyn LocalSession,
        root: &Element,
        decoded: &DecodedMessage,
    ) -> SamlResult<LogoutAction> {
        let request = LogoutRequest::from_element(root)?;
        let idp = self.resolver.resolve(&request.issuer).await?;
        self.verify_if_signed(&idp, root, decoded, self.config.want_logout_requests_signed)?;

        terminate_local(local).await;

        let identity = IdentityCache::new(session);
        let subject_id = identity.current_subject().await?;
        let known = subject_id
            .as_deref()
            .and_then(|s| NameId::decode(s).ok())
            .is_some_and(|n| same_subject(&n, &request.name_id));

        let Some(subject_id) = subject_id.filter(|_| known) else {
            identity.clear_current_subject().await?;
            tracing::warn!(idp = %idp.entity_id, "logout request for an unknown subject");
            self.emit(
                Event::builder(EventType::IdpLogout)
                    .idp(&idp.entity_id)
                    .failure("unknown subject")
                    .build(),
            );
            return Err(SamlError::UnknownSubject);
        };

        identity.remove_entity(&subject_id, &idp.entity_id).await?;
        identity.clear_current_subject().await?;

        let (binding, destination) = reply_binding(&idp, decoded.binding)?;
        let response = LogoutResponse::success(&self.config.entity_id)
            .in_response_to(&request.id)
            .with_destination(&destination);
        let transport = BindingEncoder::new()
            .with_signer(self.signer)
            .with_renderer(self.renderer)
            .encode(&response, binding, &destination, decoded.relay_state.as_deref())?;

        tracing::info!(idp = %idp.entity_id, request_id = %request.id, %binding, "answered IdP logout");
        self.emit(
            Event::builder(EventType::IdpLogout)
                .subject(&subject_id)
                .idp(&idp.entity_id)
                .detail("response_id", response.id())
                .build(),
        );
        Ok(LogoutAction::Transport(transport))
    }

    fn verify_if_signed(
        &self,
        idp: &IdpConfig,
        root: &Element,
        decoded: &DecodedMessage,
        required: bool,
    ) -> SamlResult<()> {
        let element_signed = XmlSignatureValidator::is_signed(root);
        let detached = decoded.detached_signature.as_ref();
        if !element_signed && detached.is_none() {
            return if required {
                Err(SamlError::Signature("logout message is not signed".to_string()))
            } else {
                Ok(())
            };
        }

        let validator = XmlSignatureValidator::from_pem(&idp.certificates)?;
        if let Some(d) = detached {
            validator.verify_detached(&d.signed_query, &d.signature, &d.sig_alg)?;
        }
        if element_signed {
            validator.verify_element(root, root)?;
        }
        Ok(())
    }

    fn emit(&self, event: Event) {
        if let Some(listener) = self.events {
            listener.on_event(&event);
        }
    }
}

async fn terminate_local(local: &dyn LocalSession) {
    if let Err(err) = local.terminate().await {
        tracing::error!(error = %err, "local logout failed");
    }
}

fn same_subject(known: &NameId, requested: &NameId) -> bool {
    known.value == requested.value
        && match (&known.format, &requested.format) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
}

/// Binding and location for answering a LogoutRequest that came over `received`.
fn reply_binding(idp: &IdpConfig, received: SamlBinding) -> SamlResult<(SamlBinding, String)> {
    let candidates: &[SamlBinding] = match received {
        SamlBinding::Soap => &[SamlBinding::Soap],
        SamlBinding::HttpPost => &[SamlBinding::HttpPost, SamlBinding::HttpRedirect],
        _ => &[SamlBinding::HttpRedirect, SamlBinding::HttpPost],
    };

    for binding in candidates {
        if let Some(endpoint) = endpoint_for(&idp.slo, *binding) {
            let location = endpoint
                .response_location
                .clone()
                .unwrap_or_else(|| endpoint.location.clone());
            return Ok((*binding, location));
        }
    }

    if received == SamlBinding::Soap {
        // The reply travels in the HTTP response of the SOAP call.
        return Ok((SamlBinding::Soap, String::new()));
    }
    Err(SamlError::LogoutNotSupported {
        entity_id: idp.entity_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ConfiguredMetadata;
    use crate::types::Status;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sp_core::KeyMaterial;
    use sp_session::{EntityLogoutStatus, IdentityRecord, MemorySessionStore, SubjectSession};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SP_KEY: &str = include_str!("../../../tests/fixtures/sp.key");
    const SP_CERT: &str = include_str!("../../../tests/fixtures/sp.crt");
    const IDP_KEY: &str = include_str!("../../../tests/fixtures/idp.key");
    const IDP_CERT: &str = include_str!("../../../tests/fixtures/idp.crt");

    const IDP_A: &str = "https://idp-a.example.com";
    const IDP_B: &str = "https://idp-b.example.com";
    const IDP_C: &str = "https://idp-c.example.com";

    #[derive(Default)]
    struct CountingSession(AtomicUsize);

    #[async_trait]
    impl LocalSession for CountingSession {
        async fn terminate(&self) -> SamlResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventListener for Recorder {
        fn on_event(&self, event: &Event) {
            self.0.lock().push(event.clone());
        }
    }

    fn config() -> SpConfig {
        SpConfig::new(
            "https://sp.example.com",
            "https://sp.example.com/acs",
            "https://sp.example.com/ls",
        )
        .with_signing(KeyMaterial::from_pem(SP_KEY, SP_CERT))
        .with_idp(
            IdpConfig::new(IDP_A)
                .with_sso(SamlBinding::HttpRedirect, "https://idp-a.example.com/sso")
                .with_slo(SamlBinding::HttpRedirect, "https://idp-a.example.com/slo")
                .with_certificate(IDP_CERT),
        )
        .with_idp(
            IdpConfig::new(IDP_B)
                .with_sso(SamlBinding::HttpRedirect, "https://idp-b.example.com/sso")
                .with_slo(SamlBinding::Soap, "https://idp-b.example.com/soap")
                .with_certificate(IDP_CERT),
        )
        .with_idp(
            IdpConfig::new(IDP_C)
                .with_sso(SamlBinding::HttpRedirect, "https://idp-c.example.com/sso")
                .with_certificate(IDP_CERT),
        )
    }

    async fn logged_in(entities: &[&str]) -> (MemorySessionStore, String) {
        let session = MemorySessionStore::new();
        let subject = NameId::persistent("alice").encode();
        let identity = IdentityCache::new(&session);
        for entity in entities {
            identity
                .store(IdentityRecord::new(
                    SubjectSession {
                        subject_id: subject.clone(),
                        authenticating_entity: (*entity).to_string(),
                        session_index: Some(format!("idx-{entity}")),
                        not_on_or_after: None,
                    },
                    BTreeMap::new(),
                ))
                .await
                .unwrap();
        }
        identity.set_current_subject(&subject).await.unwrap();
        (session, subject)
    }

    fn redirect_query(action: &LogoutAction) -> &str {
        match action {
            LogoutAction::Transport(TransportResponse::Redirect { location }) => {
                location.split_once('?').unwrap().1
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    fn idp_logout_response(issuer: &str, request_id: &str, status: Status) -> String {
        let response = LogoutResponse::error(issuer, status).in_response_to(request_id);
        let signer = XmlSigner::from_pem(IDP_KEY, None).unwrap();
        let url = bindings::HttpRedirectBinding::encode(
            &response.to_xml(),
            "https://sp.example.com/ls",
            None,
            MessageKind::LogoutResponse,
            Some(&signer),
        )
        .unwrap();
        url.split_once('?').unwrap().1.to_string()
    }

    fn request_id_of(query: &str) -> String {
        let decoded = bindings::decode(SamlBinding::HttpRedirect, query).unwrap();
        LogoutRequest::from_element(&Element::parse(&decoded.xml).unwrap())
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn no_subject_finishes_immediately() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let session = MemorySessionStore::new();

        let action = LogoutOrchestrator::new(&config, &resolver)
            .initiate(&session, &local)
            .await
            .unwrap();
        assert_eq!(
            action,
            LogoutAction::Finished {
                redirect: "/".to_string(),
                phase: LogoutPhase::Complete
            }
        );
        assert_eq!(local.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fans_out_one_entity_at_a_time() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let events = Recorder::default();
        let signer = XmlSigner::from_pem(SP_KEY, None).unwrap();
        let (session, subject) = logged_in(&[IDP_A, IDP_B]).await;
        let orchestrator = LogoutOrchestrator::new(&config, &resolver)
            .with_signer(Some(&signer))
            .with_events(Some(&events));

        let first = orchestrator.initiate(&session, &local).await.unwrap();
        let query = redirect_query(&first).to_string();
        assert!(query.starts_with("SAMLRequest="));
        let first_id = request_id_of(&query);

        let second = orchestrator
            .process_message(
                &session,
                &local,
                &idp_logout_response(IDP_A, &first_id, Status::success()),
                SamlBinding::HttpRedirect,
            )
            .await
            .unwrap();
        let LogoutAction::Transport(TransportResponse::Soap { endpoint, body }) = second else {
            panic!("expected SOAP request");
        };
        assert_eq!(endpoint, "https://idp-b.example.com/soap");
        let soap_request = bindings::decode(SamlBinding::Soap, &body).unwrap();
        let second_id = LogoutRequest::from_element(&Element::parse(&soap_request.xml).unwrap())
            .unwrap()
            .id;

        let reply = LogoutResponse::success(IDP_B).in_response_to(&second_id);
        let envelope = bindings::SoapBinding::wrap(&reply.to_xml());
        let done = orchestrator
            .process_message(&session, &local, &envelope, SamlBinding::Soap)
            .await
            .unwrap();
        assert_eq!(
            done,
            LogoutAction::Finished {
                redirect: "/".to_string(),
                phase: LogoutPhase::Complete
            }
        );

        assert_eq!(local.0.load(Ordering::SeqCst), 1);
        let identity = IdentityCache::new(&session);
        assert!(identity.current_subject().await.unwrap().is_none());
        assert!(identity.sessions(&subject).await.unwrap().is_empty());

        let recorded = events.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event_type, EventType::Logout);
    }

    #[tokio::test]
    async fn duplicate_response_changes_nothing() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let (session, _) = logged_in(&[IDP_A]).await;
        let orchestrator = LogoutOrchestrator::new(&config, &resolver);

        let first = orchestrator.initiate(&session, &local).await.unwrap();
        let request_id = request_id_of(redirect_query(&first));
        let reply = idp_logout_response(IDP_A, &request_id, Status::success());

        let done = orchestrator
            .process_message(&session, &local, &reply, SamlBinding::HttpRedirect)
            .await
            .unwrap();
        let before = LogoutStateStore::new(&session).load().await.unwrap().unwrap();

        let again = orchestrator
            .process_message(&session, &local, &reply, SamlBinding::HttpRedirect)
            .await
            .unwrap();
        let after = LogoutStateStore::new(&session).load().await.unwrap().unwrap();

        assert_eq!(done, again);
        assert_eq!(before, after);
        assert_eq!(after.completed_count(), 1);
        assert_eq!(local.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entity_without_slo_still_logs_out_locally() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let (session, _) = logged_in(&[IDP_C]).await;

        let action = LogoutOrchestrator::new(&config, &resolver)
            .initiate(&session, &local)
            .await
            .unwrap();
        assert_eq!(
            action,
            LogoutAction::Finished {
                redirect: "/".to_string(),
                phase: LogoutPhase::PartialFailure
            }
        );
        assert_eq!(local.0.load(Ordering::SeqCst), 1);

        let state = LogoutStateStore::new(&session).load().await.unwrap().unwrap();
        assert_eq!(state.entities[0].status, EntityLogoutStatus::NotSupported);
    }

    #[tokio::test]
    async fn refused_logout_is_partial_failure() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let (session, _) = logged_in(&[IDP_A]).await;
        let orchestrator = LogoutOrchestrator::new(&config, &resolver);

        let first = orchestrator.initiate(&session, &local).await.unwrap();
        let request_id = request_id_of(redirect_query(&first));
        let status = Status::new(crate::types::status_codes::RESPONDER, None);
        let done = orchestrator
            .process_message(
                &session,
                &local,
                &idp_logout_response(IDP_A, &request_id, status),
                SamlBinding::HttpRedirect,
            )
            .await
            .unwrap();
        assert!(matches!(
            done,
            LogoutAction::Finished { phase: LogoutPhase::PartialFailure, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_response_is_unsolicited() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let (session, _) = logged_in(&[IDP_A]).await;
        let orchestrator = LogoutOrchestrator::new(&config, &resolver);

        let reply = idp_logout_response(IDP_A, "_nothing", Status::success());
        let err = orchestrator
            .process_message(&session, &local, &reply, SamlBinding::HttpRedirect)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnsolicitedResponse(_)));

        orchestrator.initiate(&session, &local).await.unwrap();
        let err = orchestrator
            .process_message(&session, &local, &reply, SamlBinding::HttpRedirect)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnsolicitedResponse(_)));
    }

    #[tokio::test]
    async fn response_from_another_idp_is_unsolicited() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let (session, subject) = logged_in(&[IDP_A, IDP_B]).await;
        let orchestrator = LogoutOrchestrator::new(&config, &resolver);

        let first = orchestrator.initiate(&session, &local).await.unwrap();
        let request_id = request_id_of(redirect_query(&first));
        let before = LogoutStateStore::new(&session).load().await.unwrap().unwrap();

        let forged = idp_logout_response(IDP_B, &request_id, Status::success());
        let err = orchestrator
            .process_message(&session, &local, &forged, SamlBinding::HttpRedirect)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnsolicitedResponse(_)));

        let after = LogoutStateStore::new(&session).load().await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(after.phase, LogoutPhase::AwaitingEntityResponses);
        let remaining = IdentityCache::new(&session).sessions(&subject).await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    fn idp_logout_request(name_id: NameId) -> (String, String) {
        let request = LogoutRequest::new(IDP_A, name_id).with_destination("https://sp.example.com/ls");
        let signer = XmlSigner::from_pem(IDP_KEY, None).unwrap();
        let url = bindings::HttpRedirectBinding::encode(
            &request.to_xml(),
            "https://sp.example.com/ls",
            Some("idp-state"),
            MessageKind::LogoutRequest,
            Some(&signer),
        )
        .unwrap();
        (request.id, url.split_once('?').unwrap().1.to_string())
    }

    #[tokio::test]
    async fn answers_idp_initiated_logout() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let signer = XmlSigner::from_pem(SP_KEY, None).unwrap();
        let (session, subject) = logged_in(&[IDP_A, IDP_B]).await;

        let (request_id, query) = idp_logout_request(NameId::persistent("alice"));
        let action = LogoutOrchestrator::new(&config, &resolver)
            .with_signer(Some(&signer))
            .process_message(&session, &local, &query, SamlBinding::HttpRedirect)
            .await
            .unwrap();

        let reply = bindings::decode(SamlBinding::HttpRedirect, redirect_query(&action)).unwrap();
        assert_eq!(reply.relay_state.as_deref(), Some("idp-state"));
        assert!(reply.detached_signature.is_some());
        let response = LogoutResponse::from_element(&Element::parse(&reply.xml).unwrap()).unwrap();
        assert_eq!(response.in_response_to.as_deref(), Some(request_id.as_str()));
        assert!(response.is_success());

        assert_eq!(local.0.load(Ordering::SeqCst), 1);
        let identity = IdentityCache::new(&session);
        assert!(identity.current_subject().await.unwrap().is_none());
        let left = identity.sessions(&subject).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].authenticating_entity, IDP_B);
    }

    #[tokio::test]
    async fn unknown_subject_still_logs_out_locally() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let (session, _) = logged_in(&[IDP_A]).await;

        let (_, query) = idp_logout_request(NameId::persistent("mallory"));
        let err = LogoutOrchestrator::new(&config, &resolver)
            .process_message(&session, &local, &query, SamlBinding::HttpRedirect)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnknownSubject));
        assert_eq!(local.0.load(Ordering::SeqCst), 1);
        assert!(IdentityCache::new(&session).current_subject().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsigned_request_rejected_when_signatures_wanted() {
        let mut config = config();
        config.want_logout_requests_signed = true;
        let resolver = ConfiguredMetadata::new(&config);
        let local = CountingSession::default();
        let (session, _) = logged_in(&[IDP_A]).await;

        let request = LogoutRequest::new(IDP_A, NameId::persistent("alice"));
        let url = bindings::HttpRedirectBinding::encode(
            &request.to_xml(),
            "https://sp.example.com/ls",
            None,
            MessageKind::LogoutRequest,
            None,
        )
        .unwrap();
        let err = LogoutOrchestrator::new(&config, &resolver)
            .process_message(&session, &local, url.split_once('?').unwrap().1, SamlBinding::HttpRedirect)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Signature(_)));
        assert_eq!(local.0.load(Ordering::SeqCst), 0);
    }
}
