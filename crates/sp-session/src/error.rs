//! Session store error types.

use std::fmt;

/// Session store errors.
#[derive(Debug)]
pub enum SessionError {
    /// The backing store could not be reached.
    Backend(String),
    /// A stored value could not be serialized or deserialized.
    Serialization(String),
    /// The session was invalidated while the request was running.
    Invalidated,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "session backend error: {msg}"),
            Self::Serialization(msg) => write!(f, "session serialization error: {msg}"),
            Self::Invalidated => write!(f, "session was invalidated"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
