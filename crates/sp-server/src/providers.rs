//! In-memory collaborators of the service provider.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sp_core::{Event, EventListener, EventOutcome};
use sp_protocol_saml::{AuthenticationRequest, LocalAuthenticator, LocalUser, SamlResult};
use uuid::Uuid;

/// User directory keyed by username.
///
/// The username is the NameID value of the subject. Unknown subjects are
/// provisioned when the request allows it; profile fields are refreshed from
/// the mapped attributes on every login.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, LocalUser>>,
}

impl UserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user.
    pub fn insert(&self, user: LocalUser) {
        self.users.write().insert(user.username.clone(), user);
    }

    /// Looks a user up by username.
    pub fn get(&self, username: &str) -> Option<LocalUser> {
        self.users.read().get(username).cloned()
    }

    /// Number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Returns whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

#[async_trait]
impl LocalAuthenticator for UserDirectory {
    async fn authenticate(
        &self,
        request: &AuthenticationRequest<'_>,
    ) -> SamlResult<Option<LocalUser>> {
        let username = &request.session_info.name_id.value;
        let fields = request.mapped_fields();

        let mut users = self.users.write();
        match users.get_mut(username) {
            Some(user) => {
                user.attributes.extend(fields);
                Ok(Some(user.clone()))
            }
            None if request.create_unknown_user => {
                let user = LocalUser {
                    id: Uuid::new_v4().to_string(),
                    username: username.clone(),
                    attributes: fields,
                };
                tracing::info!(user = %username, "provisioned new user");
                users.insert(username.clone(), user.clone());
                Ok(Some(user))
            }
            None => {
                tracing::warn!(user = %username, "unknown user and provisioning is disabled");
                Ok(None)
            }
        }
    }
}

/// Writes authentication events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventListener;

impl EventListener for TracingEventListener {
    fn on_event(&self, event: &Event) {
        match event.outcome {
            EventOutcome::Success => tracing::info!(
                event = ?event.event_type,
                subject = event.subject_id.as_deref().unwrap_or("-"),
                idp = event.idp.as_deref().unwrap_or("-"),
                "auth event"
            ),
            EventOutcome::Failure => tracing::warn!(
                event = ?event.event_type,
                error = event.error.as_deref().unwrap_or("-"),
                "auth event"
            ),
        }
    }
}
