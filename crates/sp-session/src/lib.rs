//! # sp-session
//!
//! Session-scoped storage for the SAML service provider.
//!
//! The host supplies one [`SessionStore`] per browser session. On top of it this
//! crate defines the typed schemas the protocol engine reads and writes:
//!
//! - [`RequestCorrelationStore`] - outstanding requests, consumed exactly once
//! - [`IdentityCache`] - subject identity, attributes and per-IdP sessions
//! - [`LogoutStateStore`] - progress of a single logout across IdPs
//!
//! ## Example
//!
//! ```ignore
//! use sp_session::{MemorySessionStore, RequestCorrelationStore};
//!
//! let session = MemorySessionStore::new();
//! let requests = RequestCorrelationStore::new(&session);
//! requests.put("_id42", "/dashboard").await?;
//! assert!(requests.take("_id42").await?.is_some());
//! assert!(requests.take("_id42").await?.is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod correlation;
pub mod error;
pub mod identity;
pub mod logout;
pub mod memory;
pub mod provider;

pub use correlation::{OutstandingExchange, RequestCorrelationStore};
pub use error::{SessionError, SessionResult};
pub use identity::{IdentityCache, IdentityRecord, SubjectSession};
pub use logout::{
    EntityLogout, EntityLogoutStatus, LogoutPhase, LogoutState, LogoutStateStore, ResponseMatch,
};
pub use memory::MemorySessionStore;
pub use provider::SessionStore;
