//! Metadata and health endpoints.

use crate::common::TestEnv;

/// Tests that the SP metadata endpoint returns valid XML.
#[tokio::test]
async fn test_sp_metadata_endpoint() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let response = env.client.get(env.url("/saml2/metadata/")).send().await?;
    assert!(
        response.status().is_success(),
        "Expected success status, got {}",
        response.status()
    );

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert_eq!(content_type, "application/samlmetadata+xml");

    let body = response.text().await?;
    assert!(body.contains("SPSSODescriptor"));
    assert!(body.contains(&format!(r#"entityID="{}""#, env.entity_id())));
    assert!(body.contains("AssertionConsumerService"));
    assert!(body.contains("SingleLogoutService"));
    assert!(
        body.contains("X509Certificate"),
        "Metadata should publish the signing certificate"
    );

    Ok(())
}

/// Tests the health endpoint.
#[tokio::test]
async fn test_health() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let response = env.client.get(env.url("/health")).send().await?;
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.text().await?.contains("healthy"));

    Ok(())
}

/// Tests that a garbage logout message is rejected.
#[tokio::test]
async fn test_malformed_logout_message() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;

    let response = env
        .client
        .get(env.url("/saml2/ls/?SAMLRequest=not-a-message"))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 400);

    let response = env
        .client
        .post(env.url("/saml2/ls/post/"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("SAMLResponse=%21")
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 400);

    Ok(())
}
