//! SAML endpoint handlers.
//!
//! Handlers translate HTTP requests into calls on the [`ServiceProvider`]
//! and its actions back into responses. Every handler that touches the SAML
//! session refreshes the `saml_session` cookie when a new session had to be
//! created.
//!
//! [`ServiceProvider`]: sp_protocol_saml::ServiceProvider

use std::collections::BTreeMap;

use axum::{
    extract::{Query, RawQuery, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{Html, IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sp_core::SamlBinding;
use sp_protocol_saml::{LocalSession, LoginAction, LogoutAction, TransportResponse};
use sp_session::MemorySessionStore;
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::session::{
    clear_cookie, create_cookie, RequestLocalSession, LOCAL_SESSION_COOKIE, SAML_SESSION_COOKIE,
};
use crate::state::AppState;
use crate::templates::error_page;

const SOAP_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
const SOAP_ACTION: &str = "http://www.oasis-open.org/committees/security";
const METADATA_CONTENT_TYPE: &str = "application/samlmetadata+xml";
const ECHO_LOGIN: &str = "/saml2/login/?next=/saml2/echo_attributes/";

/// Query parameters of the login endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    /// Entity ID of the chosen IdP.
    pub idp: Option<String>,
    /// Where to go after login.
    pub next: Option<String>,
}

/// Attributes of the logged-in subject.
#[derive(Debug, Serialize, Deserialize)]
pub struct EchoResponse {
    /// Encoded subject identifier.
    pub subject_id: String,
    /// Local username.
    pub username: String,
    /// Attribute name to values.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// IdPs holding a session for the subject.
    pub idps: Vec<String>,
}

/// `GET /saml2/login/`
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Response {
    let (session_id, session, new) = state.sessions.load(&headers);
    let authenticated = state.local_sessions.current(&headers).is_some();

    let result = state
        .sp
        .initiate_login(
            session.as_ref(),
            params.idp.as_deref(),
            params.next.as_deref(),
            authenticated,
        )
        .await;

    let response = match result {
        Ok(LoginAction::Transport { response, .. }) => transport(response),
        Ok(LoginAction::Discovery { idps, next }) => state
            .sp
            .renderer()
            .and_then(|renderer| renderer.render_discovery(&idps, &next))
            .map_or_else(
                || fail(&state, ServerError::Render("discovery page")),
                |html| Html(html).into_response(),
            ),
        Ok(LoginAction::AlreadyAuthenticated { relay_target }) => found(&relay_target),
        Ok(LoginAction::PermissionDenied) => error_page(
            state.sp_name(),
            StatusCode::FORBIDDEN,
            "You are already logged in.",
        ),
        Err(err) => fail(&state, err.into()),
    };

    with_session_cookie(response, &state, session_id, new)
}

/// `POST /saml2/acs/`
pub async fn acs(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let (session_id, session, new) = state.sessions.load(&headers);

    let response = match state
        .sp
        .process_authn_response(session.as_ref(), &body, SamlBinding::HttpPost)
        .await
    {
        Ok(outcome) => {
            let local_id = state.local_sessions.login(outcome.user);
            let mut response = found(&outcome.redirect);
            append_cookie(
                &mut response,
                &create_cookie(LOCAL_SESSION_COOKIE, local_id, state.config.secure_cookies),
            );
            response
        }
        Err(err) => fail(&state, err.into()),
    };

    with_session_cookie(response, &state, session_id, new)
}

/// `GET /saml2/logout/`
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session_id, session, new) = state.sessions.load(&headers);
    let local = RequestLocalSession::new(state.local_sessions.clone(), &headers);

    let result = match state.sp.initiate_logout(session.as_ref(), &local).await {
        Ok(action) => drive_back_channel(&state, &session, &local, action).await,
        Err(err) => Err(err.into()),
    };

    logout_reply(&state, result, session_id, new)
}

/// `GET /saml2/ls/`
pub async fn ls_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    logout_message(state, headers, &query, SamlBinding::HttpRedirect).await
}

/// `POST /saml2/ls/` and `POST /saml2/ls/post/`
pub async fn ls_post(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    logout_message(state, headers, &body, SamlBinding::HttpPost).await
}

async fn logout_message(
    state: AppState,
    headers: HeaderMap,
    raw: &str,
    binding: SamlBinding,
) -> Response {
    let (session_id, session, new) = state.sessions.load(&headers);
    let local = RequestLocalSession::new(state.local_sessions.clone(), &headers);

    let result = match state
        .sp
        .process_logout_message(session.as_ref(), &local, raw, binding)
        .await
    {
        Ok(action) => drive_back_channel(&state, &session, &local, action).await,
        Err(err) => Err(err.into()),
    };

    logout_reply(&state, result, session_id, new)
}

/// Posts SOAP logout requests until the next step needs the user agent.
async fn drive_back_channel(
    state: &AppState,
    session: &MemorySessionStore,
    local: &dyn LocalSession,
    mut action: LogoutAction,
) -> ServerResult<LogoutAction> {
    loop {
        let (endpoint, body) = match action {
            LogoutAction::Transport(TransportResponse::Soap { endpoint, body }) => (endpoint, body),
            other => return Ok(other),
        };

        tracing::debug!(endpoint = %endpoint, "sending SOAP logout request");
        let reply = state
            .http
            .post(&endpoint)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header("SOAPAction", SOAP_ACTION)
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        action = state
            .sp
            .process_logout_message(session, local, &reply, SamlBinding::Soap)
            .await?;
    }
}

fn logout_reply(
    state: &AppState,
    result: ServerResult<LogoutAction>,
    session_id: Uuid,
    new: bool,
) -> Response {
    let mut response = match result {
        Ok(LogoutAction::Transport(message)) => transport(message),
        Ok(LogoutAction::Finished { redirect, phase }) => {
            tracing::debug!(?phase, redirect = %redirect, "logout finished");
            state.sessions.retire(session_id);
            found(&redirect)
        }
        Err(err) => fail(state, err),
    };

    // The local session may already be gone server-side.
    append_cookie(
        &mut response,
        &clear_cookie(LOCAL_SESSION_COOKIE, state.config.secure_cookies),
    );
    with_session_cookie(response, state, session_id, new)
}

/// `GET /saml2/metadata/`
pub async fn metadata(State(state): State<AppState>) -> Response {
    match state.sp.get_metadata() {
        Ok(xml) => ([(CONTENT_TYPE, METADATA_CONTENT_TYPE)], xml).into_response(),
        Err(err) => fail(&state, err.into()),
    }
}

/// `GET /saml2/echo_attributes/`
///
/// Shows the cached identity of the logged-in user, or sends the user to log
/// in first.
pub async fn echo_attributes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(user) = state.local_sessions.current(&headers) else {
        return found(ECHO_LOGIN);
    };

    let (session_id, session, new) = state.sessions.load(&headers);
    let response = match state.sp.identity(session.as_ref()).await {
        Ok(Some(identity)) => Json(EchoResponse {
            subject_id: identity.subject_id,
            username: user.username,
            attributes: identity.attributes,
            idps: identity.sessions.into_keys().collect(),
        })
        .into_response(),
        Ok(None) => found(ECHO_LOGIN),
        Err(err) => fail(&state, err.into()),
    };

    with_session_cookie(response, &state, session_id, new)
}

fn transport(response: TransportResponse) -> Response {
    match response {
        TransportResponse::Redirect { location } => found(&location),
        TransportResponse::Html { body } => {
            ([(CACHE_CONTROL, "no-cache, no-store")], Html(body)).into_response()
        }
        TransportResponse::Soap { body, .. } => {
            ([(CONTENT_TYPE, SOAP_CONTENT_TYPE)], body).into_response()
        }
    }
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

fn fail(state: &AppState, err: ServerError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::warn!(error = %err, "request rejected");
    }

    if let ServerError::Saml(saml) = &err {
        if let Some(html) = state.sp.renderer().and_then(|r| r.render_error(saml)) {
            return (status, Html(html)).into_response();
        }
    }
    error_page(state.sp_name(), status, &err.to_string())
}

fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

fn with_session_cookie(mut response: Response, state: &AppState, id: Uuid, new: bool) -> Response {
    if new {
        append_cookie(
            &mut response,
            &create_cookie(SAML_SESSION_COOKIE, id, state.config.secure_cookies),
        );
    }
    response
}
