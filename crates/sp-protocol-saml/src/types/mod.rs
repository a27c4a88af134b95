//! SAML 2.0 types and data structures.
//!
//! Requests, responses, assertions and their XML form. Every message type
//! implements [`ProtocolMessage`] and can be read back from a parsed tree.

mod assertion;
mod authn_request;
mod constants;
mod logout;
pub(crate) mod message;
mod name_id;
mod response;
mod status;

pub use assertion::*;
pub use authn_request::*;
pub use constants::*;
pub use logout::*;
pub use message::{format_instant, generate_id, parse_instant, MessageKind, ProtocolMessage};
pub use name_id::*;
pub use response::*;
pub use status::*;
