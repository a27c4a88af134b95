//! Session store trait.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::SessionResult;

/// Key-value storage scoped to one browser session.
///
/// Implementations back a single session; they are never shared between
/// subjects. Values are serialized by the implementation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Gets a value.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn get<T>(&self, key: &str) -> SessionResult<Option<T>>
    where
        T: DeserializeOwned + Send;

    /// Sets a value, replacing any previous one.
    async fn set<T>(&self, key: &str, value: &T) -> SessionResult<()>
    where
        T: Serialize + Sync;

    /// Deletes a value.
    ///
    /// Returns `Ok(())` even if the key doesn't exist.
    async fn delete(&self, key: &str) -> SessionResult<()>;

    /// Gets and deletes a value atomically.
    ///
    /// Two concurrent calls for the same key must not both observe the value.
    async fn take<T>(&self, key: &str) -> SessionResult<Option<T>>
    where
        T: DeserializeOwned + Send;

    /// Lists the keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> SessionResult<Vec<String>>;
}
