//! Web browser SSO through the running server.

use sp_core::SamlBinding;
use sp_server::handlers::EchoResponse;

use crate::common::{idp, location, TestEnv, IDP};

/// Tests the full SP-initiated login and the attribute echo afterwards.
#[tokio::test]
async fn test_login_round_trip() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let redirect = env.login("alice", "/dashboard").await?;
    assert_eq!(redirect, "/dashboard");

    let response = env
        .client
        .get(env.url("/saml2/echo_attributes/"))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 200);

    let echo: EchoResponse = response.json().await?;
    assert_eq!(echo.username, "alice");
    assert_eq!(echo.attributes["mail"], vec!["alice@example.com".to_string()]);
    assert_eq!(echo.idps, vec![IDP.to_string()]);

    let user = env.state.directory.get("alice").expect("user provisioned");
    assert_eq!(user.attributes["email"], "alice@example.com");

    Ok(())
}

/// Tests that a response is consumed once.
#[tokio::test]
async fn test_replayed_response_is_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let (request, relay_state) = env.start_login("?next=/a").await?;
    let form = env.idp_response(Some(&request.id), "alice", relay_state.as_deref())?;

    let first = env.post_response(form.clone()).await?;
    assert_eq!(first.status().as_u16(), 302);

    let replay = env.post_response(form).await?;
    assert_eq!(replay.status().as_u16(), 400);

    Ok(())
}

/// Tests that a response to some other session's request is refused.
#[tokio::test]
async fn test_response_to_unknown_request_is_rejected() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    env.start_login("").await?;
    let form = env.idp_response(Some("_not-ours"), "alice", None)?;
    let response = env.post_response(form).await?;
    assert_eq!(response.status().as_u16(), 400);
    assert!(env.state.directory.is_empty());

    Ok(())
}

/// Tests IdP-initiated login, refused unless configured.
#[tokio::test]
async fn test_unsolicited_response() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let response = env.post_response(env.idp_response(None, "alice", None)?).await?;
    assert_eq!(response.status().as_u16(), 400);

    let env = TestEnv::with_config(|sp| {
        sp.allow_unsolicited = true;
        sp.default_relay_state = Some("/welcome".to_string());
    })
    .await?;
    let response = env.post_response(env.idp_response(None, "alice", None)?).await?;
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(location(&response)?, "/welcome");

    Ok(())
}

/// Tests that relay targets pointing off-site are never followed.
#[tokio::test]
async fn test_untrusted_relay_state_is_ignored() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let (request, relay_state) = env
        .start_login("?next=https%3A%2F%2Fevil.example.com%2F")
        .await?;
    assert_eq!(relay_state.as_deref(), Some("/"));

    let form = env.idp_response(
        Some(&request.id),
        "alice",
        Some("https://evil.example.com/steal"),
    )?;
    let response = env.post_response(form).await?;
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(location(&response)?, "/");

    Ok(())
}

/// Tests what a logged-in user gets from the login endpoint.
#[tokio::test]
async fn test_login_when_already_authenticated() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.login("alice", "/").await?;

    let response = env
        .client
        .get(env.url("/saml2/login/?next=/again"))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(location(&response)?, "/again");

    let env = TestEnv::with_config(|sp| sp.ignore_authenticated_users_on_login = false).await?;
    env.login("alice", "/").await?;

    let response = env
        .client
        .get(env.url("/saml2/login/?next=/again"))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 403);

    Ok(())
}

/// Tests the discovery page shown when several IdPs are configured.
#[tokio::test]
async fn test_discovery_with_several_idps() -> anyhow::Result<()> {
    let env = TestEnv::with_config(|sp| {
        let mut other = idp().with_name("Other IdP");
        other.entity_id = "https://other.example.com/metadata".to_string();
        other.sso.clear();
        other = other.with_sso(SamlBinding::HttpRedirect, "https://other.example.com/sso");
        sp.idps.push(other);
    })
    .await?;

    let response = env
        .client
        .get(env.url("/saml2/login/?next=/x"))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 200);
    let body = response.text().await?;
    assert!(body.contains("Example IdP"));
    assert!(body.contains("Other IdP"));

    let response = env
        .client
        .get(env.url("/saml2/login/?idp=https%3A%2F%2Fother.example.com%2Fmetadata"))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 302);
    assert!(location(&response)?.starts_with("https://other.example.com/sso?SAMLRequest="));

    Ok(())
}
