//! SAML 2.0 Service Provider engine.
//!
//! This crate provides the service provider side of SAML 2.0 Web Browser SSO:
//!
//! - **AuthnRequest construction** - Build requests for the selected IdP
//! - **Response processing** - Validate AuthnResponses and extract the subject
//! - **XML signature** - Sign outgoing messages and validate incoming ones
//! - **Redirect, POST and SOAP bindings** - Encode and decode protocol messages
//! - **Single Logout (SLO)** - SP- and IdP-initiated logout across every IdP
//! - **Metadata** - Render this SP's `EntityDescriptor`
//!
//! # Architecture
//!
//! - [`types`] - SAML messages and data structures
//! - [`xml`] - Small DOM used for parsing and canonicalization
//! - [`signature`] - XML signature signing and validation
//! - [`bindings`] - Redirect, POST and SOAP bindings
//! - [`metadata`] - IdP metadata resolution and SP metadata
//! - [`authn`] - AuthnRequest construction and IdP selection
//! - [`acs`] - The assertion consumer
//! - [`slo`] - Single logout
//! - [`hooks`] - Collaborators supplied by the hosting application
//! - [`service`] - The [`ServiceProvider`] facade
//! - [`error`] - Error types for SAML operations
//!
//! # Example
//!
//! ```rust,ignore
//! use sp_protocol_saml::{LoginAction, ServiceProvider};
//!
//! let sp = ServiceProvider::new(config, authenticator)?;
//! match sp.initiate_login(&session, None, Some("/dashboard"), false).await? {
//!     LoginAction::Transport { response, .. } => send(response),
//!     LoginAction::Discovery { idps, next } => show_choice(idps, next),
//!     _ => {}
//! }
//! ```
//!
//! # SAML Specifications
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [SAML 2.0 Profiles](https://docs.oasis-open.org/security/saml/v2.0/saml-profiles-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acs;
pub mod authn;
pub mod bindings;
pub mod error;
pub mod hooks;
pub mod metadata;
pub mod service;
pub mod signature;
pub mod slo;
pub mod types;
pub mod xml;

pub use acs::{AuthenticatedResponse, ResponseProcessor};
pub use authn::{AuthnRequestBuilder, IdpSelection};
pub use bindings::{BindingEncoder, TransportResponse};
pub use error::{SamlError, SamlResult, StatusDenial};
pub use hooks::{
    AcsHooks, AuthenticationRequest, DefaultAcsHooks, LocalAuthenticator, LocalSession, LocalUser,
    NoLocalSession, SessionInfo, Setting, TemplateRenderer,
};
pub use metadata::{ConfiguredMetadata, MetadataResolver};
pub use service::{LoginAction, LoginOutcome, ServiceProvider};
pub use slo::{LogoutAction, LogoutOrchestrator};
pub use types::*;
