//! Error handling for configuration loading and validation.

use thiserror::Error;

/// Result type alias using the core error type.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors raised while loading or validating service provider configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration is missing a value or holds an inconsistent one.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(String),

    /// A referenced file (key, certificate, config) could not be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

impl CoreError {
    /// Returns whether this error is caused by the deployment rather than a request.
    ///
    /// Every configuration error is fatal for the current operation.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        true
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
