//! SAML error types.
//!
//! Each validation stage of the service provider reports its own error kind so
//! that callers can branch on the result instead of on a message string.

use sp_core::CoreError;
use sp_session::SessionError;
use thiserror::Error;

use crate::types::{status_codes, sub_status_codes};

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// Why an identity provider refused to authenticate the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDenial {
    /// The IdP could not authenticate the subject.
    AuthenticationDenied,
    /// The subject cancelled, or passive authentication was impossible.
    AuthenticationCancelled,
    /// The IdP refused to answer the request.
    RequestDenied,
    /// The requested authentication context cannot be satisfied.
    NoAuthnContext,
    /// Any other non-success status.
    Other {
        /// Top-level status code.
        code: String,
        /// Second-level status code.
        sub_code: Option<String>,
        /// Status message sent by the IdP.
        message: Option<String>,
    },
}

impl StatusDenial {
    /// Maps a non-success SAML status to a denial kind.
    #[must_use]
    pub fn from_status(code: &str, sub_code: Option<&str>, message: Option<&str>) -> Self {
        match sub_code {
            Some(sub_status_codes::AUTHN_FAILED) => Self::AuthenticationDenied,
            Some(sub_status_codes::NO_PASSIVE) => Self::AuthenticationCancelled,
            Some(sub_status_codes::REQUEST_DENIED) => Self::RequestDenied,
            Some(sub_status_codes::NO_AUTHN_CONTEXT) => Self::NoAuthnContext,
            _ => Self::Other {
                code: code.to_string(),
                sub_code: sub_code.map(str::to_string),
                message: message.map(str::to_string),
            },
        }
    }
}

impl std::fmt::Display for StatusDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthenticationDenied => write!(f, "authentication denied"),
            Self::AuthenticationCancelled => write!(f, "authentication cancelled"),
            Self::RequestDenied => write!(f, "request denied"),
            Self::NoAuthnContext => write!(f, "no acceptable authentication context"),
            Self::Other { code, sub_code, message } => {
                write!(f, "status {code}")?;
                if let Some(sub) = sub_code {
                    write!(f, " / {sub}")?;
                }
                if let Some(msg) = message {
                    write!(f, ": {msg}")?;
                }
                Ok(())
            }
        }
    }
}

/// SAML service provider errors.
#[derive(Debug, Error)]
pub enum SamlError {
    /// IdP metadata is missing or expired, or the SP configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No identity provider is configured.
    #[error("no identity provider configured")]
    NoIdpConfigured,

    /// Neither HTTP-Redirect nor HTTP-POST is offered by the IdP.
    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// The message could not be decoded or parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A required signature is missing or does not verify.
    #[error("signature error: {0}")]
    Signature(String),

    /// The response is not valid yet.
    #[error("response is not yet valid")]
    ResponseTooEarly,

    /// The response is no longer valid.
    #[error("response has expired")]
    ResponseExpired,

    /// The response does not answer an outstanding request of this session.
    #[error("unsolicited response: {0}")]
    UnsolicitedResponse(String),

    /// The IdP answered with a non-success status.
    #[error("identity provider refused: {0}")]
    StatusDenied(StatusDenial),

    /// The assertion is not meant for this service provider.
    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    /// The local user could not be resolved or provisioned.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The entity offers no single logout endpoint.
    #[error("single logout not supported by {entity_id}")]
    LogoutNotSupported {
        /// Entity without a usable endpoint.
        entity_id: String,
    },

    /// The logout request names a subject unknown to this session.
    #[error("unknown subject")]
    UnknownSubject,

    /// Session storage failed.
    #[error("session error: {0}")]
    Session(String),

    /// Cryptographic operation error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SamlError {
    /// Returns the SAML status code to report for this error in a response.
    #[must_use]
    pub const fn status_code(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_)
            | Self::Signature(_)
            | Self::ResponseTooEarly
            | Self::ResponseExpired
            | Self::UnsolicitedResponse(_)
            | Self::InvalidAssertion(_)
            | Self::UnknownSubject
            | Self::UnsupportedBinding(_) => status_codes::REQUESTER,
            _ => status_codes::RESPONDER,
        }
    }

    /// Returns the second-level SAML status code, if one applies.
    #[must_use]
    pub const fn sub_status_code(&self) -> Option<&'static str> {
        match self {
            Self::UnknownSubject => Some(sub_status_codes::UNKNOWN_PRINCIPAL),
            Self::UnsupportedBinding(_) => Some(sub_status_codes::UNSUPPORTED_BINDING),
            Self::Signature(_) => Some(sub_status_codes::REQUEST_DENIED),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::MalformedMessage(_)
            | Self::ResponseTooEarly
            | Self::ResponseExpired
            | Self::UnsolicitedResponse(_)
            | Self::InvalidAssertion(_)
            | Self::UnsupportedBinding(_)
            | Self::LogoutNotSupported { .. } => 400,
            Self::Signature(_) | Self::StatusDenied(_) | Self::Authentication(_) => 401,
            Self::UnknownSubject => 403,
            Self::Configuration(_)
            | Self::NoIdpConfigured
            | Self::Session(_)
            | Self::Crypto(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Returns whether the error is a deployment fault rather than a bad message.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }
}

impl From<quick_xml::Error> for SamlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::MalformedMessage(err.to_string())
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedMessage(format!("base64: {err}"))
    }
}

impl From<SessionError> for SamlError {
    fn from(err: SessionError) -> Self {
        Self::Session(err.to_string())
    }
}

impl From<CoreError> for SamlError {
    fn from(err: CoreError) -> Self {
        Self::Configuration(err.to_string())
    }
}
