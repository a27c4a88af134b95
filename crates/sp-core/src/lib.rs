//! # sp-core
//!
//! Configuration model, error handling and authentication events shared by the
//! SAML service provider crates.
//!
//! The configuration is an explicit value: it is loaded once by the host and then
//! handed to every component constructor. Nothing in this workspace reads
//! process-wide mutable state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod binding;
pub mod config;
pub mod error;
pub mod event;

pub use binding::SamlBinding;
pub use config::{Endpoint, IdpConfig, KeyMaterial, RequestSignatureAlgorithm, SpConfig};
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventListener, EventOutcome, EventType};
