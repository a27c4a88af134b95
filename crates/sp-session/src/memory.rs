//! In-process session store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::SessionResult;
use crate::provider::SessionStore;

/// Session store holding values in memory.
///
/// Values are kept as JSON so that reads hand out owned copies, the same way a
/// remote store would.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, Value>>,
    modified: Mutex<bool>,
}

impl MemorySessionStore {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the session holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Returns whether the session was written since the last call to
    /// [`Self::clear_modified`].
    #[must_use]
    pub fn is_modified(&self) -> bool {
        *self.modified.lock()
    }

    /// Resets the modification flag.
    pub fn clear_modified(&self) {
        *self.modified.lock() = false;
    }

    /// Removes every value.
    pub fn flush(&self) {
        self.values.lock().clear();
        *self.modified.lock() = true;
    }

    fn mark_modified(&self) {
        *self.modified.lock() = true;
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get<T>(&self, key: &str) -> SessionResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let value = self.values.lock().get(key).cloned();
        match value {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn set<T>(&self, key: &str, value: &T) -> SessionResult<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.values.lock().insert(key.to_string(), value);
        self.mark_modified();
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        if self.values.lock().remove(key).is_some() {
            self.mark_modified();
        }
        Ok(())
    }

    async fn take<T>(&self, key: &str) -> SessionResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        // Single lock scope: check and remove happen together.
        let removed = self.values.lock().remove(key);
        match removed {
            Some(v) => {
                self.mark_modified();
                Ok(Some(serde_json::from_value(v)?))
            }
            None => Ok(None),
        }
    }

    async fn keys(&self, prefix: &str) -> SessionResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .values
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
