//! Server error types.

use axum::http::StatusCode;
use sp_protocol_saml::SamlError;
use thiserror::Error;

/// Result type for request handling.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The protocol engine rejected the request.
    #[error(transparent)]
    Saml(#[from] SamlError),

    /// A SOAP call to an identity provider failed.
    #[error("back-channel request failed: {0}")]
    BackChannel(#[from] reqwest::Error),

    /// A page could not be rendered.
    #[error("cannot render {0}")]
    Render(&'static str),
}

impl ServerError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Saml(err) => {
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::BackChannel(_) => StatusCode::BAD_GATEWAY,
            Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
