//! Single logout progress.
//!
//! A logout walks through `Idle -> LocalLogoutDone -> AwaitingEntityResponses`
//! and ends in `Complete` or `PartialFailure`. [`LogoutState`] records where each
//! entity stands; the orchestrator in the protocol crate drives the transitions.
//!
//! A session carries at most one subject, so the state lives under one session
//! key and names its subject. A finished state is kept so that late duplicate
//! responses can be recognised.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_core::SamlBinding;

use crate::error::SessionResult;
use crate::provider::SessionStore;

const LOGOUT_KEY: &str = "saml2:logout";

/// Phase of a logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutPhase {
    /// Nothing has happened yet.
    #[default]
    Idle,
    /// The local session is gone; no remote request has been sent.
    LocalLogoutDone,
    /// At least one entity has not answered yet.
    AwaitingEntityResponses,
    /// Every entity confirmed the logout.
    Complete,
    /// Every entity was handled, but at least one failed.
    PartialFailure,
}

impl LogoutPhase {
    /// Returns whether the logout has finished.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::PartialFailure)
    }
}

/// Where a single entity stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityLogoutStatus {
    /// No request sent yet.
    Queued,
    /// Request sent, waiting for the response.
    Awaiting,
    /// The entity confirmed the logout.
    Completed,
    /// The entity answered with an error.
    Failed {
        /// Reason reported by the entity or the transport.
        reason: String,
    },
    /// The entity has no usable single logout endpoint.
    NotSupported,
}

impl EntityLogoutStatus {
    /// Returns whether no further message is expected from the entity.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Queued | Self::Awaiting)
    }
}

/// Logout progress at one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLogout {
    /// Entity ID.
    pub entity_id: String,
    /// Current status.
    pub status: EntityLogoutStatus,
    /// Binding the request was sent with.
    pub binding: Option<SamlBinding>,
    /// ID of the LogoutRequest sent to the entity.
    pub request_id: Option<String>,
}

/// How an incoming LogoutResponse relates to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMatch {
    /// First response for a pending request of this entity.
    Accepted {
        /// Entity that answered.
        entity_id: String,
    },
    /// The entity already answered this request.
    Duplicate {
        /// Entity that answered.
        entity_id: String,
    },
    /// The request was sent to a different entity than the one answering.
    WrongIssuer {
        /// Entity the request was sent to.
        entity_id: String,
    },
    /// No request with this ID was sent.
    Unknown,
}

/// Logout negotiation with every entity the subject has a session at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutState {
    /// Encoded subject identifier.
    pub subject_id: String,
    /// Current phase.
    pub phase: LogoutPhase,
    /// Entities in the order they are contacted.
    pub entities: Vec<EntityLogout>,
    /// Where to send the user when the logout has finished.
    pub relay_target: String,
    /// When the logout started.
    pub started_at: DateTime<Utc>,
}

impl LogoutState {
    /// Starts a logout after the local session has been terminated.
    pub fn after_local_logout(
        subject_id: impl Into<String>,
        entities: impl IntoIterator<Item = String>,
        relay_target: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            phase: LogoutPhase::LocalLogoutDone,
            entities: entities
                .into_iter()
                .map(|entity_id| EntityLogout {
                    entity_id,
                    status: EntityLogoutStatus::Queued,
                    binding: None,
                    request_id: None,
                })
                .collect(),
            relay_target: relay_target.into(),
            started_at: Utc::now(),
        }
    }

    /// Next entity that has not been contacted.
    #[must_use]
    pub fn next_queued(&self) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.status == EntityLogoutStatus::Queued)
            .map(|e| e.entity_id.as_str())
    }

    /// Records that a LogoutRequest was sent to `entity_id`.
    pub fn mark_sent(&mut self, entity_id: &str, binding: SamlBinding, request_id: &str) {
        if let Some(entry) = self.entry_mut(entity_id) {
            entry.status = EntityLogoutStatus::Awaiting;
            entry.binding = Some(binding);
            entry.request_id = Some(request_id.to_string());
        }
        self.phase = LogoutPhase::AwaitingEntityResponses;
    }

    /// Records that `entity_id` offers no single logout.
    pub fn mark_not_supported(&mut self, entity_id: &str) {
        if let Some(entry) = self.entry_mut(entity_id) {
            entry.status = EntityLogoutStatus::NotSupported;
        }
    }

    /// Records a failure for `entity_id`.
    pub fn mark_failed(&mut self, entity_id: &str, reason: impl Into<String>) {
        if let Some(entry) = self.entry_mut(entity_id) {
            entry.status = EntityLogoutStatus::Failed {
                reason: reason.into(),
            };
        }
    }

    /// Matches a response from `issuer` to the request it answers.
    ///
    /// An accepted response marks its entity completed (or failed, when
    /// `success` is false). Duplicates and responses from an entity other
    /// than the one the request went to leave the state untouched.
    pub fn record_response(
        &mut self,
        issuer: &str,
        in_response_to: &str,
        success: bool,
        reason: Option<&str>,
    ) -> ResponseMatch {
        let Some(entry) = self
            .entities
            .iter_mut()
            .find(|e| e.request_id.as_deref() == Some(in_response_to))
        else {
            return ResponseMatch::Unknown;
        };

        let entity_id = entry.entity_id.clone();
        if entity_id != issuer {
            return ResponseMatch::WrongIssuer { entity_id };
        }
        if entry.status != EntityLogoutStatus::Awaiting {
            return ResponseMatch::Duplicate { entity_id };
        }

        entry.status = if success {
            EntityLogoutStatus::Completed
        } else {
            EntityLogoutStatus::Failed {
                reason: reason.unwrap_or("logout refused").to_string(),
            }
        };
        ResponseMatch::Accepted { entity_id }
    }

    /// Returns whether every entity is settled.
    #[must_use]
    pub fn all_settled(&self) -> bool {
        self.entities.iter().all(|e| e.status.is_settled())
    }

    /// Moves to the final phase once every entity is settled.
    ///
    /// Returns the phase after the call.
    pub fn settle(&mut self) -> LogoutPhase {
        if self.all_settled() {
            let all_completed = self
                .entities
                .iter()
                .all(|e| e.status == EntityLogoutStatus::Completed);
            self.phase = if all_completed {
                LogoutPhase::Complete
            } else {
                LogoutPhase::PartialFailure
            };
        }
        self.phase
    }

    /// Number of entities that confirmed the logout.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| e.status == EntityLogoutStatus::Completed)
            .count()
    }

    fn entry_mut(&mut self, entity_id: &str) -> Option<&mut EntityLogout> {
        self.entities.iter_mut().find(|e| e.entity_id == entity_id)
    }
}

/// Typed view over the logout state of one session.
pub struct LogoutStateStore<'a, S: SessionStore> {
    store: &'a S,
}

impl<'a, S: SessionStore> LogoutStateStore<'a, S> {
    /// Wraps a session store.
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Loads the logout state, if a logout was started in this session.
    pub async fn load(&self) -> SessionResult<Option<LogoutState>> {
        self.store.get(LOGOUT_KEY).await
    }

    /// Saves the logout state.
    pub async fn save(&self, state: &LogoutState) -> SessionResult<()> {
        self.store.set(LOGOUT_KEY, state).await
    }

    /// Discards the logout state.
    pub async fn clear(&self) -> SessionResult<()> {
        self.store.delete(LOGOUT_KEY).await
    }
}
