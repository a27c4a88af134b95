//! Subject identities and their sessions at identity providers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;
use crate::provider::SessionStore;

const SUBJECT_KEY: &str = "saml2:subject_id";
const IDENTITY_PREFIX: &str = "saml2:identity:";

/// A session the subject holds at one authenticating entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSession {
    /// Encoded subject identifier.
    pub subject_id: String,
    /// Entity ID of the IdP (or attribute authority).
    pub authenticating_entity: String,
    /// Session index assigned by the entity.
    pub session_index: Option<String>,
    /// End of the session as stated by the entity.
    pub not_on_or_after: Option<DateTime<Utc>>,
}

/// Attributes and sessions of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Encoded subject identifier.
    pub subject_id: String,
    /// Attribute name to values.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Sessions keyed by entity ID.
    pub sessions: BTreeMap<String, SubjectSession>,
    /// When the record stops being usable.
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl IdentityRecord {
    /// Creates a record from a single authentication.
    #[must_use]
    pub fn new(session: SubjectSession, attributes: BTreeMap<String, Vec<String>>) -> Self {
        let not_on_or_after = session.not_on_or_after;
        let subject_id = session.subject_id.clone();
        let mut sessions = BTreeMap::new();
        sessions.insert(session.authenticating_entity.clone(), session);
        Self {
            subject_id,
            attributes,
            sessions,
            not_on_or_after,
        }
    }

    /// Entity IDs the subject has a session at.
    #[must_use]
    pub fn entities(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Returns whether the record has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_on_or_after.is_some_and(|limit| now >= limit)
    }

    /// Folds another authentication of the same subject into this record.
    pub fn merge(&mut self, other: Self) {
        self.attributes.extend(other.attributes);
        self.sessions.extend(other.sessions);
        self.not_on_or_after = match (self.not_on_or_after, other.not_on_or_after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
    }
}

/// Typed view over the identity data of one session.
pub struct IdentityCache<'a, S: SessionStore> {
    store: &'a S,
}

impl<'a, S: SessionStore> IdentityCache<'a, S> {
    /// Wraps a session store.
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Returns the subject logged in through this session.
    pub async fn current_subject(&self) -> SessionResult<Option<String>> {
        self.store.get(SUBJECT_KEY).await
    }

    /// Records the subject logged in through this session.
    pub async fn set_current_subject(&self, subject_id: &str) -> SessionResult<()> {
        self.store.set(SUBJECT_KEY, &subject_id).await
    }

    /// Forgets the current subject.
    pub async fn clear_current_subject(&self) -> SessionResult<()> {
        self.store.delete(SUBJECT_KEY).await
    }

    /// Returns the record of `subject_id` unless it is missing or expired.
    pub async fn get(
        &self,
        subject_id: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<Option<IdentityRecord>> {
        let record: Option<IdentityRecord> = self.store.get(&identity_key(subject_id)).await?;
        Ok(record.filter(|r| !r.is_expired(now)))
    }

    /// Stores a record, merging it with an existing record of the same subject.
    pub async fn store(&self, record: IdentityRecord) -> SessionResult<()> {
        let key = identity_key(&record.subject_id);
        let merged = match self.store.get::<IdentityRecord>(&key).await? {
            Some(mut existing) => {
                existing.merge(record);
                existing
            }
            None => record,
        };
        self.store.set(&key, &merged).await
    }

    /// Sessions of `subject_id`, regardless of expiry.
    pub async fn sessions(&self, subject_id: &str) -> SessionResult<Vec<SubjectSession>> {
        let record: Option<IdentityRecord> = self.store.get(&identity_key(subject_id)).await?;
        Ok(record
            .map(|r| r.sessions.into_values().collect())
            .unwrap_or_default())
    }

    /// Removes the session at `entity_id`. Returns the number of sessions left.
    pub async fn remove_entity(&self, subject_id: &str, entity_id: &str) -> SessionResult<usize> {
        let key = identity_key(subject_id);
        let Some(mut record) = self.store.get::<IdentityRecord>(&key).await? else {
            return Ok(0);
        };
        record.sessions.remove(entity_id);
        let left = record.sessions.len();
        if left == 0 {
            self.store.delete(&key).await?;
        } else {
            self.store.set(&key, &record).await?;
        }
        Ok(left)
    }

    /// Deletes everything known about `subject_id`.
    pub async fn delete(&self, subject_id: &str) -> SessionResult<()> {
        self.store.delete(&identity_key(subject_id)).await
    }
}

fn identity_key(subject_id: &str) -> String {
    format!("{IDENTITY_PREFIX}{subject_id}")
}
