//! Router configuration.
//!
//! This module creates the main Axum router that combines all endpoints.

use axum::{
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    let saml = Router::new()
        .route("/saml2/login/", get(handlers::login))
        .route("/saml2/acs/", post(handlers::acs))
        .route("/saml2/logout/", get(handlers::logout))
        .route(
            "/saml2/ls/",
            get(handlers::ls_redirect).post(handlers::ls_post),
        )
        .route("/saml2/ls/post/", post(handlers::ls_post))
        .route("/saml2/metadata/", get(handlers::metadata))
        .route("/saml2/echo_attributes/", get(handlers::echo_attributes))
        .with_state(state);

    let health = Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check));

    Router::new()
        .merge(saml)
        .merge(health)
        .route("/", get(root))
        .layer(TraceLayer::new_for_http())
}

/// Root endpoint handler.
async fn root() -> Json<ServerInfo> {
    Json(ServerInfo {
        name: "SAML Service Provider".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        metadata: "/saml2/metadata/".to_string(),
    })
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Server information response.
#[derive(Serialize)]
pub struct ServerInfo {
    name: String,
    version: String,
    metadata: String,
}

/// Basic health check.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    })
}

/// Liveness check.
async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use sp_core::{IdpConfig, SamlBinding, SpConfig};
    use tower::ServiceExt;

    use crate::config::ServerConfig;

    fn app() -> Router {
        create_router(state())
    }

    fn state() -> AppState {
        let sp = SpConfig::new(
            "https://sp.example.com/saml2/metadata/",
            "https://sp.example.com/saml2/acs/",
            "https://sp.example.com/saml2/ls/",
        )
        .with_idp(
            IdpConfig::new("https://idp.example.com")
                .with_sso(SamlBinding::HttpRedirect, "https://idp.example.com/sso"),
        );
        AppState::new(ServerConfig::for_testing(sp)).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        assert_eq!(response.0.status, "healthy");
    }

    #[tokio::test]
    async fn metadata_is_served() {
        let response = app()
            .oneshot(Request::get("/saml2/metadata/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/samlmetadata+xml"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("EntityDescriptor"));
    }

    #[tokio::test]
    async fn login_redirects_to_the_only_idp() {
        let response = app()
            .oneshot(Request::get("/saml2/login/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://idp.example.com/sso?SAMLRequest="));
        assert!(response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .starts_with("saml_session="));
    }

    #[tokio::test]
    async fn finished_logout_retires_the_saml_session() {
        let state = state();
        let response = create_router(state.clone())
            .oneshot(Request::get("/saml2/logout/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let cookie = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("saml_session="))
            .unwrap()
            .to_string();
        let id = cookie["saml_session=".len()..].split(';').next().unwrap();
        let expires_at = state
            .sessions
            .expires_at(uuid::Uuid::parse_str(id).unwrap())
            .unwrap();
        let grace = chrono::Duration::seconds(crate::session::LOGOUT_GRACE_SECONDS);
        assert!(expires_at <= chrono::Utc::now() + grace);
    }

    #[tokio::test]
    async fn echo_requires_login() {
        let response = app()
            .oneshot(
                Request::get("/saml2/echo_attributes/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/saml2/login/?next=/saml2/echo_attributes/"
        );
    }

    #[tokio::test]
    async fn garbage_response_is_rejected() {
        let response = app()
            .oneshot(
                Request::post("/saml2/acs/")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("SAMLResponse=%21%21"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
