//! Authentication events.
//!
//! The protocol engine emits an [`Event`] whenever a login or logout completes or
//! fails. Hosts subscribe through [`EventListener`] to feed audit logs or to run
//! their own post-authentication logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A SAML response was accepted and the user is authenticated.
    Login,
    /// A SAML response was rejected.
    LoginError,
    /// The user started a logout.
    Logout,
    /// A logout step failed.
    LogoutError,
    /// An identity provider asked this SP to log a subject out.
    IdpLogout,
}

/// Outcome of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Failure,
}

/// An authentication event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: EventType,
    /// Outcome of the event.
    pub outcome: EventOutcome,
    /// Encoded subject identifier, when known.
    pub subject_id: Option<String>,
    /// Entity ID of the identity provider involved.
    pub idp: Option<String>,
    /// Error message (for failure events).
    pub error: Option<String>,
    /// Additional details as key-value pairs.
    pub details: Vec<(String, String)>,
}

impl Event {
    /// Creates a new event builder.
    #[must_use]
    pub const fn builder(event_type: EventType) -> EventBuilder {
        EventBuilder::new(event_type)
    }
}

/// Builder for creating events.
pub struct EventBuilder {
    event_type: EventType,
    outcome: EventOutcome,
    subject_id: Option<String>,
    idp: Option<String>,
    error: Option<String>,
    details: Vec<(String, String)>,
}

impl EventBuilder {
    /// Creates a new event builder.
    #[must_use]
    pub const fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            outcome: EventOutcome::Success,
            subject_id: None,
            idp: None,
            error: None,
            details: Vec::new(),
        }
    }

    /// Sets the outcome to failure with an error message.
    #[must_use]
    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.outcome = EventOutcome::Failure;
        self.error = Some(error.into());
        self
    }

    /// Sets the subject identifier.
    #[must_use]
    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Sets the identity provider.
    #[must_use]
    pub fn idp(mut self, entity_id: impl Into<String>) -> Self {
        self.idp = Some(entity_id.into());
        self
    }

    /// Adds a detail key-value pair.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// Builds the event.
    #[must_use]
    pub fn build(self) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: self.event_type,
            outcome: self.outcome,
            subject_id: self.subject_id,
            idp: self.idp,
            error: self.error,
            details: self.details,
        }
    }
}

/// Receives authentication events.
pub trait EventListener: Send + Sync {
    /// Called once per event, after the operation it describes has completed.
    fn on_event(&self, event: &Event);
}
