//! Assertion consumer.
//!
//! [`ResponseProcessor`] runs an incoming Response through a fixed sequence of
//! checks. Every check has its own error kind and the first failure ends the
//! processing with the outstanding request left in place:
//!
//! 1. decode and parse ([`SamlError::MalformedMessage`])
//! 2. signatures against the IdP's metadata certificates ([`SamlError::Signature`])
//! 3. validity window with clock skew ([`SamlError::ResponseTooEarly`],
//!    [`SamlError::ResponseExpired`])
//! 4. correlation with an outstanding request ([`SamlError::UnsolicitedResponse`])
//! 5. status ([`SamlError::StatusDenied`])
//! 6. audience and recipient ([`SamlError::InvalidAssertion`]), then subject and
//!    attribute extraction
//!
//! Only after all checks pass is the outstanding request consumed.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sp_core::{SamlBinding, SpConfig};
use sp_session::{
    IdentityCache, IdentityRecord, OutstandingExchange, RequestCorrelationStore, SessionStore,
    SubjectSession,
};

use crate::bindings::{self, DecodedMessage};
use crate::error::{SamlError, SamlResult, StatusDenial};
use crate::hooks::SessionInfo;
use crate::metadata::{ensure_valid, MetadataResolver};
use crate::signature::XmlSignatureValidator;
use crate::types::{Assertion, Response};
use crate::xml::Element;

/// A response that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedResponse {
    /// ID of the Response.
    pub response_id: String,
    /// Request the response answers, if solicited.
    pub in_response_to: Option<String>,
    /// Subject and attributes.
    pub session_info: SessionInfo,
    /// RelayState sent along with the response.
    pub relay_state: Option<String>,
}

/// A response that was validated and consumed.
#[derive(Debug, Clone)]
pub struct AuthenticatedResponse {
    /// Subject and attributes.
    pub session_info: SessionInfo,
    /// Relay target stored with the outstanding request.
    pub relay_target: Option<String>,
    /// RelayState sent along with the response.
    pub relay_state: Option<String>,
}

/// Validates AuthnResponses.
pub struct ResponseProcessor<'a> {
    config: &'a SpConfig,
    resolver: &'a dyn MetadataResolver,
    now: Option<DateTime<Utc>>,
}

impl<'a> ResponseProcessor<'a> {
    /// Creates a processor.
    #[must_use]
    pub const fn new(config: &'a SpConfig, resolver: &'a dyn MetadataResolver) -> Self {
        Self {
            config,
            resolver,
            now: None,
        }
    }

    /// Validates against a fixed clock instead of the current time.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Validates and consumes the matching outstanding request.
    ///
    /// The session's identity cache is left alone; see [`remember_subject`].
    pub async fn process<S: SessionStore>(
        &self,
        session: &S,
        raw: &str,
        binding: SamlBinding,
    ) -> SamlResult<AuthenticatedResponse> {
        let correlation = RequestCorrelationStore::new(session);
        let outstanding = correlation.outstanding().await?;

        let validated = self.validate(raw, binding, &outstanding).await?;

        let relay_target = match &validated.in_response_to {
            Some(request_id) => {
                let exchange = correlation.take(request_id).await?.ok_or_else(|| {
                    SamlError::UnsolicitedResponse(format!(
                        "request '{request_id}' was already answered"
                    ))
                })?;
                Some(exchange.relay_target)
            }
            None => None,
        };

        tracing::info!(
            response_id = %validated.response_id,
            idp = %validated.session_info.issuer,
            "accepted authentication response"
        );

        Ok(AuthenticatedResponse {
            session_info: validated.session_info,
            relay_target,
            relay_state: validated.relay_state,
        })
    }

    /// Runs every check without touching the session.
    ///
    /// `outstanding` is a snapshot of the requests this session is waiting for.
    pub async fn validate(
        &self,
        raw: &str,
        binding: SamlBinding,
        outstanding: &BTreeMap<String, OutstandingExchange>,
    ) -> SamlResult<ValidatedResponse> {
        if !matches!(binding, SamlBinding::HttpPost | SamlBinding::HttpRedirect) {
            return Err(SamlError::UnsupportedBinding(format!(
                "responses are not accepted over {binding}"
            )));
        }

        let decoded = bindings::decode(binding, raw)?;
        let root = Element::parse(&decoded.xml)?;
        let response = Response::from_element(&root)?;
        if response.has_encrypted_assertions {
            return Err(SamlError::MalformedMessage(
                "encrypted assertions are not supported".to_string(),
            ));
        }
        let now = self.now.unwrap_or_else(Utc::now);

        self.check_signatures(&root, &response, &decoded, now).await?;
        self.check_validity(&response, now)?;
        self.check_correlation(&response, outstanding)?;

        if !response.is_success() {
            let status = &response.status;
            let denial = StatusDenial::from_status(
                &status.code,
                status.sub_code.as_deref(),
                status.message.as_deref(),
            );
            tracing::warn!(idp = %response.issuer, %denial, "IdP refused authentication");
            return Err(SamlError::StatusDenied(denial));
        }

        let assertion = response
            .first_assertion()
            .ok_or_else(|| SamlError::MalformedMessage("response has no assertion".to_string()))?;
        self.check_audience(&response, assertion)?;

        Ok(ValidatedResponse {
            response_id: response.id.clone(),
            in_response_to: response.in_response_to.clone(),
            session_info: session_info(&response, assertion)?,
            relay_state: decoded.relay_state,
        })
    }

    async fn check_signatures(
        &self,
        root: &Element,
        response: &Response,
        decoded: &DecodedMessage,
        now: DateTime<Utc>,
    ) -> SamlResult<()> {
        let idp = self.resolver.resolve(&response.issuer).await?;
        ensure_valid(&idp, now)?;
        let validator = XmlSignatureValidator::from_pem(&idp.certificates)?;

        let mut response_signed = false;
        if let Some(detached) = &decoded.detached_signature {
            validator.verify_detached(&detached.signed_query, &detached.signature, &detached.sig_alg)?;
            response_signed = true;
        }
        if XmlSignatureValidator::is_signed(root) {
            validator.verify_element(root, root)?;
            response_signed = true;
        }
        if self.config.want_response_signed && !response_signed {
            return Err(SamlError::Signature("response is not signed".to_string()));
        }

        for assertion in root.children_named("Assertion") {
            if XmlSignatureValidator::is_signed(assertion) {
                validator.verify_element(root, assertion)?;
            } else if self.config.want_assertions_signed && !response_signed {
                return Err(SamlError::Signature("assertion is not signed".to_string()));
            }
        }
        Ok(())
    }

    fn check_validity(&self, response: &Response, now: DateTime<Utc>) -> SamlResult<()> {
        let skew = Duration::try_seconds(self.config.accepted_time_diff);
        let (Some(earliest), Some(latest)) = (
            skew.and_then(|skew| now.checked_sub_signed(skew)),
            skew.and_then(|skew| now.checked_add_signed(skew)),
        ) else {
            return Err(SamlError::Configuration(format!(
                "accepted_time_diff of {} seconds is out of range",
                self.config.accepted_time_diff
            )));
        };

        for assertion in &response.assertions {
            if let Some(conditions) = &assertion.conditions {
                if conditions.not_before.is_some_and(|nb| latest < nb) {
                    return Err(SamlError::ResponseTooEarly);
                }
                if conditions.not_on_or_after.is_some_and(|noa| earliest >= noa) {
                    return Err(SamlError::ResponseExpired);
                }
            }
            let confirmations = assertion.subject.iter().flat_map(|s| &s.confirmations);
            for data in confirmations.filter_map(|c| c.data.as_ref()) {
                if data.not_on_or_after.is_some_and(|noa| earliest >= noa) {
                    return Err(SamlError::ResponseExpired);
                }
            }
        }
        Ok(())
    }

    fn check_correlation(
        &self,
        response: &Response,
        outstanding: &BTreeMap<String, OutstandingExchange>,
    ) -> SamlResult<()> {
        match response.in_response_to.as_deref() {
            Some(request_id) if outstanding.contains_key(request_id) => {}
            Some(request_id) => {
                tracing::warn!(request_id, "response to unknown or consumed request");
                return Err(SamlError::UnsolicitedResponse(format!(
                    "no outstanding request '{request_id}'"
                )));
            }
            None if self.config.allow_unsolicited => {
                tracing::debug!(idp = %response.issuer, "accepting unsolicited response");
            }
            None => {
                return Err(SamlError::UnsolicitedResponse(
                    "response does not answer a request".to_string(),
                ));
            }
        }

        for assertion in &response.assertions {
            let confirmations = assertion.subject.iter().flat_map(|s| &s.confirmations);
            for data in confirmations.filter_map(|c| c.data.as_ref()) {
                if let Some(irt) = data.in_response_to.as_deref() {
                    if response.in_response_to.as_deref() != Some(irt) {
                        return Err(SamlError::UnsolicitedResponse(format!(
                            "subject confirmation answers '{irt}'"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_audience(&self, response: &Response, assertion: &Assertion) -> SamlResult<()> {
        if let Some(destination) = response.destination.as_deref() {
            if destination != self.config.acs_url {
                return Err(SamlError::InvalidAssertion(format!(
                    "response is addressed to {destination}"
                )));
            }
        }

        if assertion.issuer != response.issuer {
            return Err(SamlError::InvalidAssertion(
                "assertion issuer differs from response issuer".to_string(),
            ));
        }

        if let Some(conditions) = &assertion.conditions {
            if !conditions.audiences.is_empty()
                && !conditions.audiences.iter().any(|a| *a == self.config.entity_id)
            {
                return Err(SamlError::InvalidAssertion(
                    "service provider is not in the audience".to_string(),
                ));
            }
        }

        let confirmations = assertion.subject.iter().flat_map(|s| &s.confirmations);
        for data in confirmations.filter_map(|c| c.data.as_ref()) {
            if let Some(recipient) = data.recipient.as_deref() {
                if recipient != self.config.acs_url {
                    return Err(SamlError::InvalidAssertion(format!(
                        "assertion is meant for {recipient}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn session_info(response: &Response, assertion: &Assertion) -> SamlResult<SessionInfo> {
    let name_id = assertion
        .subject
        .as_ref()
        .and_then(|s| s.name_id.clone())
        .ok_or_else(|| SamlError::InvalidAssertion("assertion has no NameID".to_string()))?;

    let not_on_or_after = assertion
        .authn_statements
        .iter()
        .filter_map(|s| s.session_not_on_or_after)
        .min();

    Ok(SessionInfo {
        subject_id: name_id.encode(),
        name_id,
        issuer: response.issuer.clone(),
        attributes: assertion.attribute_map(),
        session_index: assertion.session_index().map(str::to_string),
        not_on_or_after,
    })
}

/// Records an accepted subject as the session's current subject.
///
/// Called once the local user behind the response is known.
pub async fn remember_subject<S: SessionStore>(session: &S, info: &SessionInfo) -> SamlResult<()> {
    let identity = IdentityCache::new(session);
    identity
        .store(IdentityRecord::new(
            SubjectSession {
                subject_id: info.subject_id.clone(),
                authenticating_entity: info.issuer.clone(),
                session_index: info.session_index.clone(),
                not_on_or_after: info.not_on_or_after,
            },
            info.attributes.clone(),
        ))
        .await?;
    identity.set_current_subject(&info.subject_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ConfiguredMetadata;
    use crate::signature::{SignatureAlgorithm, XmlSigner};
    use crate::types::{
        sub_status_codes, status_codes, Attribute, AuthnStatement, Conditions, NameId,
        ProtocolMessage, ResponseBuilder, Status, Subject, SubjectConfirmation,
        SubjectConfirmationData,
    };
    use base64::Engine;
    use sp_core::IdpConfig;
    use sp_session::MemorySessionStore;

    const IDP_KEY: &str = include_str!("../../../tests/fixtures/idp.key");
    const IDP_CERT: &str = include_str!("../../../tests/fixtures/idp.crt");
    const SP_KEY: &str = include_str!("../../../tests/fixtures/sp.key");

    const IDP: &str = "https://idp.example.com/metadata";
    const SP: &str = "https://sp.example.com/saml2/metadata/";
    const ACS: &str = "https://sp.example.com/saml2/acs/";

    fn config() -> SpConfig {
        SpConfig::new(SP, ACS, "https://sp.example.com/saml2/ls/").with_idp(
            IdpConfig::new(IDP)
                .with_sso(SamlBinding::HttpRedirect, "https://idp.example.com/sso")
                .with_certificate(IDP_CERT),
        )
    }

    fn assertion(request_id: Option<&str>) -> Assertion {
        let mut data = SubjectConfirmationData::for_request("", ACS, 5);
        data.in_response_to = request_id.map(str::to_string);
        Assertion::new(IDP)
            .with_subject(
                Subject::new(NameId::persistent("alice")).with_confirmation(SubjectConfirmation::bearer(data)),
            )
            .with_conditions(Conditions::with_validity(5).with_audience(SP))
            .with_authn_statement(AuthnStatement::new("urn:oasis:names:tc:SAML:2.0:ac:classes:Password"))
            .with_attribute(Attribute::single("mail", "alice@example.com"))
    }

    fn response_xml(request_id: Option<&str>, assertion: Assertion, key: &str) -> String {
        let assertion_id = assertion.id.clone();
        let mut builder = ResponseBuilder::new(IDP).destination(ACS).assertion(assertion);
        if let Some(id) = request_id {
            builder = builder.in_response_to(id);
        }
        let response = builder.build();
        let signer = XmlSigner::from_pem(key, None)
            .unwrap()
            .with_algorithm(SignatureAlgorithm::RsaSha256);
        signer.sign(&response.to_xml(), &assertion_id).unwrap()
    }

    fn post_body(xml: &str, relay: Option<&str>) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair(
            "SAMLResponse",
            &base64::engine::general_purpose::STANDARD.encode(xml),
        );
        if let Some(r) = relay {
            form.append_pair("RelayState", r);
        }
        form.finish()
    }

    async fn session_with_request(id: &str) -> MemorySessionStore {
        let session = MemorySessionStore::new();
        RequestCorrelationStore::new(&session)
            .put(id, "/dashboard")
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn accepts_and_consumes_once() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let processor = ResponseProcessor::new(&config, &resolver);
        let session = session_with_request("_req1").await;

        let body = post_body(&response_xml(Some("_req1"), assertion(Some("_req1")), IDP_KEY), None);
        let accepted = processor
            .process(&session, &body, SamlBinding::HttpPost)
            .await
            .unwrap();
        assert_eq!(accepted.relay_target.as_deref(), Some("/dashboard"));
        assert_eq!(accepted.session_info.name_id.value, "alice");
        assert_eq!(accepted.session_info.attributes["mail"], vec!["alice@example.com"]);

        let identity = IdentityCache::new(&session);
        assert!(identity.current_subject().await.unwrap().is_none());
        remember_subject(&session, &accepted.session_info).await.unwrap();
        let subject = identity.current_subject().await.unwrap().unwrap();
        assert_eq!(subject, accepted.session_info.subject_id);
        assert_eq!(identity.sessions(&subject).await.unwrap()[0].authenticating_entity, IDP);

        let replay = processor.process(&session, &body, SamlBinding::HttpPost).await;
        assert!(matches!(replay, Err(SamlError::UnsolicitedResponse(_))));
    }

    #[tokio::test]
    async fn unknown_request_is_unsolicited_even_when_signed() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let session = session_with_request("_req1").await;

        let body = post_body(&response_xml(Some("_other"), assertion(None), IDP_KEY), None);
        let err = ResponseProcessor::new(&config, &resolver)
            .process(&session, &body, SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnsolicitedResponse(_)));
        assert!(RequestCorrelationStore::new(&session).contains("_req1").await.unwrap());
    }

    #[tokio::test]
    async fn unsolicited_only_when_allowed() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let body = post_body(&response_xml(None, assertion(None), IDP_KEY), None);

        let err = ResponseProcessor::new(&config, &resolver)
            .validate(&body, SamlBinding::HttpPost, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnsolicitedResponse(_)));

        let config = config.with_allow_unsolicited(true);
        let validated = ResponseProcessor::new(&config, &resolver)
            .validate(&body, SamlBinding::HttpPost, &BTreeMap::new())
            .await
            .unwrap();
        assert!(validated.in_response_to.is_none());
    }

    #[tokio::test]
    async fn expired_response_is_rejected_after_correlation_would_succeed() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let session = session_with_request("_req1").await;
        let body = post_body(&response_xml(Some("_req1"), assertion(Some("_req1")), IDP_KEY), None);

        let later = Utc::now() + Duration::minutes(10);
        let err = ResponseProcessor::new(&config, &resolver)
            .at(later)
            .process(&session, &body, SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::ResponseExpired));

        let earlier = Utc::now() - Duration::minutes(10);
        let err = ResponseProcessor::new(&config, &resolver)
            .at(earlier)
            .process(&session, &body, SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::ResponseTooEarly));

        assert!(RequestCorrelationStore::new(&session).contains("_req1").await.unwrap());
    }

    #[tokio::test]
    async fn skew_is_tolerated() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let mut assertion = assertion(Some("_req1"));
        let now = Utc::now();
        assertion.conditions.as_mut().unwrap().not_before = Some(now + Duration::seconds(30));

        let body = post_body(&response_xml(Some("_req1"), assertion, IDP_KEY), None);
        let session = session_with_request("_req1").await;
        assert!(ResponseProcessor::new(&config, &resolver)
            .at(now)
            .process(&session, &body, SamlBinding::HttpPost)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn out_of_range_skew_is_a_configuration_error() {
        let mut config = config();
        config.accepted_time_diff = i64::MAX;
        let resolver = ConfiguredMetadata::new(&config);
        let session = session_with_request("_req1").await;

        let body = post_body(&response_xml(Some("_req1"), assertion(Some("_req1")), IDP_KEY), None);
        let err = ResponseProcessor::new(&config, &resolver)
            .process(&session, &body, SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Configuration(_)));
    }

    #[tokio::test]
    async fn signatures_are_required_and_checked() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let session = session_with_request("_req1").await;

        let wrong_key = post_body(&response_xml(Some("_req1"), assertion(Some("_req1")), SP_KEY), None);
        let err = ResponseProcessor::new(&config, &resolver)
            .process(&session, &wrong_key, SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Signature(_)));

        let unsigned = ResponseBuilder::new(IDP)
            .in_response_to("_req1")
            .assertion(assertion(Some("_req1")))
            .build()
            .to_xml();
        let err = ResponseProcessor::new(&config, &resolver)
            .process(&session, &post_body(&unsigned, None), SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Signature(_)));

        let mut lenient = config.clone();
        lenient.want_assertions_signed = false;
        let accepted = ResponseProcessor::new(&lenient, &resolver)
            .process(&session, &post_body(&unsigned, None), SamlBinding::HttpPost)
            .await;
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn unknown_issuer_is_a_configuration_error() {
        let config = SpConfig::new(SP, ACS, "https://sp.example.com/saml2/ls/");
        let resolver = ConfiguredMetadata::new(&config);
        let body = post_body(&response_xml(Some("_req1"), assertion(Some("_req1")), IDP_KEY), None);
        let err = ResponseProcessor::new(&config, &resolver)
            .validate(&body, SamlBinding::HttpPost, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::Configuration(_)));
    }

    #[tokio::test]
    async fn status_is_mapped() {
        let mut config = config();
        config.want_assertions_signed = false;
        let resolver = ConfiguredMetadata::new(&config);
        let session = session_with_request("_req1").await;

        let denied = ResponseBuilder::new(IDP)
            .in_response_to("_req1")
            .status(Status::new(status_codes::RESPONDER, Some(sub_status_codes::AUTHN_FAILED)))
            .build()
            .to_xml();
        let err = ResponseProcessor::new(&config, &resolver)
            .process(&session, &post_body(&denied, None), SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::StatusDenied(StatusDenial::AuthenticationDenied)));
    }

    #[tokio::test]
    async fn wrong_audience_is_invalid() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let session = session_with_request("_req1").await;

        let mut assertion = assertion(Some("_req1"));
        assertion.conditions = Some(Conditions::with_validity(5).with_audience("https://other-sp"));
        let body = post_body(&response_xml(Some("_req1"), assertion, IDP_KEY), None);
        let err = ResponseProcessor::new(&config, &resolver)
            .process(&session, &body, SamlBinding::HttpPost)
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::InvalidAssertion(_)));
    }

    #[tokio::test]
    async fn garbage_is_malformed_and_soap_unsupported() {
        let config = config();
        let resolver = ConfiguredMetadata::new(&config);
        let processor = ResponseProcessor::new(&config, &resolver);

        let err = processor
            .validate("SAMLResponse=PGZvbw%3D%3D", SamlBinding::HttpPost, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::MalformedMessage(_)));

        let err = processor
            .validate("", SamlBinding::Soap, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SamlError::UnsupportedBinding(_)));
    }
}
