//! Single logout through the running server.

use std::sync::{Arc, Mutex};

use axum::{extract::State, routing::post, Router};
use sp_core::{Endpoint, SamlBinding};
use sp_protocol_saml::bindings::SoapBinding;
use sp_protocol_saml::xml::Element;
use sp_protocol_saml::{LogoutRequest, LogoutResponse, ProtocolMessage};
use tokio::net::TcpListener;

use crate::common::{location, redirected_message, TestEnv, IDP, IDP_SLO};

const ECHO_LOGIN: &str = "/saml2/login/?next=/saml2/echo_attributes/";

async fn echo_location(env: &TestEnv) -> anyhow::Result<String> {
    let response = env
        .client
        .get(env.url("/saml2/echo_attributes/"))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 302);
    location(&response)
}

/// Tests SP-initiated logout over the front channel.
#[tokio::test]
async fn test_sp_initiated_logout() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.login("alice", "/").await?;

    let response = env.client.get(env.url("/saml2/logout/")).send().await?;
    assert_eq!(response.status().as_u16(), 302);
    let (message, _) = redirected_message(&location(&response)?, IDP_SLO)?;
    let request = LogoutRequest::from_element(&message)?;
    assert_eq!(request.name_id.value, "alice");
    assert_eq!(request.issuer, env.entity_id());

    // Logged out locally before the IdP answers.
    assert_eq!(echo_location(&env).await?, ECHO_LOGIN);

    let response = env
        .client
        .get(env.idp_logout_response(&request.id)?)
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(location(&response)?, "/");

    // A repeated answer changes nothing.
    let response = env
        .client
        .get(env.idp_logout_response(&request.id)?)
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(location(&response)?, "/");

    // An answer to a request never sent is refused.
    let response = env
        .client
        .get(env.idp_logout_response("_never-sent")?)
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 400);

    Ok(())
}

/// Tests a LogoutRequest sent by the IdP.
#[tokio::test]
async fn test_idp_initiated_logout() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.login("alice", "/").await?;

    let (request_id, url) = env.idp_logout_request("alice")?;
    let response = env.client.get(url).send().await?;
    assert_eq!(response.status().as_u16(), 302);

    let (message, relay_state) = redirected_message(&location(&response)?, IDP_SLO)?;
    let reply = LogoutResponse::from_element(&message)?;
    assert!(reply.is_success());
    assert_eq!(reply.in_response_to.as_deref(), Some(request_id.as_str()));
    assert_eq!(relay_state.as_deref(), Some("idp-state"));

    assert_eq!(echo_location(&env).await?, ECHO_LOGIN);

    Ok(())
}

/// Tests that a request naming another subject is refused.
#[tokio::test]
async fn test_idp_logout_for_unknown_subject() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.login("alice", "/").await?;

    let (_, url) = env.idp_logout_request("mallory")?;
    let response = env.client.get(url).send().await?;
    assert_eq!(response.status().as_u16(), 403);

    Ok(())
}

/// Tests logout with nobody logged in.
#[tokio::test]
async fn test_logout_without_login() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let response = env.client.get(env.url("/saml2/logout/")).send().await?;
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(location(&response)?, "/");

    Ok(())
}

/// Answers SOAP LogoutRequests, recording the subjects.
async fn soap_idp(State(seen): State<Arc<Mutex<Vec<String>>>>, body: String) -> String {
    let decoded = SoapBinding::decode(&body).expect("SOAP envelope");
    let request = LogoutRequest::from_element(&Element::parse(&decoded.xml).expect("XML"))
        .expect("LogoutRequest");
    seen.lock().unwrap().push(request.name_id.value.clone());

    let response = LogoutResponse::success(IDP).in_response_to(&request.id);
    SoapBinding::wrap(&response.to_xml())
}

/// Tests logout at an IdP that only offers the SOAP binding.
#[tokio::test]
async fn test_back_channel_logout() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let idp_listener = TcpListener::bind("127.0.0.1:0").await?;
    let soap_url = format!("http://{}/soap", idp_listener.local_addr()?);
    let idp_app = Router::new()
        .route("/soap", post(soap_idp))
        .with_state(Arc::clone(&seen));
    tokio::spawn(async move {
        let _ = axum::serve(idp_listener, idp_app).await;
    });

    let env = TestEnv::with_config(|sp| {
        sp.idps[0].slo = vec![Endpoint::new(SamlBinding::Soap, soap_url)];
    })
    .await?;
    env.login("alice", "/").await?;

    let response = env.client.get(env.url("/saml2/logout/")).send().await?;
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(location(&response)?, "/");
    assert_eq!(*seen.lock().unwrap(), vec!["alice".to_string()]);

    assert_eq!(echo_location(&env).await?, ECHO_LOGIN);

    Ok(())
}
