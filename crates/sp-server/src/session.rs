//! Browser sessions.
//!
//! Two cookies are involved and they are independent of each other:
//!
//! - `saml_session` keys the server-side [`MemorySessionStore`] holding the
//!   protocol state (outstanding requests, identity cache, logout progress).
//! - `sp_session` marks the user as logged in to this application.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header::COOKIE, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use sp_protocol_saml::{LocalSession, LocalUser, SamlResult};
use sp_session::MemorySessionStore;
use uuid::Uuid;

/// Cookie keying the SAML session store.
pub const SAML_SESSION_COOKIE: &str = "saml_session";

/// Cookie marking a local login.
pub const LOCAL_SESSION_COOKIE: &str = "sp_session";

/// Cookie max age in seconds (8 hours).
pub const SESSION_COOKIE_MAX_AGE: i64 = 28800;

/// How long a SAML session survives a finished logout, in seconds.
///
/// Late or repeated LogoutResponses within this window are still matched.
pub const LOGOUT_GRACE_SECONDS: i64 = 300;

/// Builds a `Set-Cookie` value.
#[must_use]
pub fn create_cookie(name: &str, id: Uuid, secure: bool) -> String {
    format!("{name}={id}; {}; Path=/; Max-Age={SESSION_COOKIE_MAX_AGE}", flags(secure))
}

/// Builds a `Set-Cookie` value that expires the cookie.
#[must_use]
pub fn clear_cookie(name: &str, secure: bool) -> String {
    format!("{name}=; {}; Path=/; Max-Age=0", flags(secure))
}

// The IdP's cross-site POST to the ACS must carry the cookie. Browsers only
// accept SameSite=None together with Secure.
const fn flags(secure: bool) -> &'static str {
    if secure {
        "HttpOnly; Secure; SameSite=None"
    } else {
        "HttpOnly; SameSite=Lax"
    }
}

/// Reads the ID stored in cookie `name`.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    let cookie_str = headers.get(COOKIE)?.to_str().ok()?;

    // Parse cookie string (format: "name1=value1; name2=value2")
    cookie_str
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Server-side SAML sessions, keyed by the `saml_session` cookie.
///
/// A session lives as long as its cookie. Expired sessions are dropped
/// whenever a new one is created.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Expiring<Arc<MemorySessionStore>>>>,
    max_age: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Duration::seconds(SESSION_COOKIE_MAX_AGE))
    }
}

impl SessionRegistry {
    /// Creates a registry whose sessions last `max_age`.
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            sessions: RwLock::default(),
            max_age,
        }
    }

    /// Returns the session named by the request cookie, creating a new one
    /// when the cookie is missing or stale. The flag is true for new sessions.
    pub fn load(&self, headers: &HeaderMap) -> (Uuid, Arc<MemorySessionStore>, bool) {
        self.load_at(headers, Utc::now())
    }

    fn load_at(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> (Uuid, Arc<MemorySessionStore>, bool) {
        if let Some(id) = extract_cookie(headers, SAML_SESSION_COOKIE) {
            if let Some(entry) = self.sessions.read().get(&id).filter(|e| e.is_live(now)) {
                return (id, Arc::clone(&entry.value), false);
            }
        }

        let id = Uuid::new_v4();
        let session = Arc::new(MemorySessionStore::new());
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.is_live(now));
        if sessions.len() < before {
            tracing::debug!(purged = before - sessions.len(), "dropped expired SAML sessions");
        }
        sessions.insert(
            id,
            Expiring {
                value: Arc::clone(&session),
                expires_at: now + self.max_age,
            },
        );
        (id, session, true)
    }

    /// Shortens the life of session `id` to the logout grace period.
    pub fn retire(&self, id: Uuid) {
        self.retire_at(id, Utc::now());
    }

    fn retire_at(&self, id: Uuid, now: DateTime<Utc>) {
        if let Some(entry) = self.sessions.write().get_mut(&id) {
            let grace = now + Duration::seconds(LOGOUT_GRACE_SECONDS);
            entry.expires_at = entry.expires_at.min(grace);
        }
    }

    /// When session `id` expires.
    #[must_use]
    pub fn expires_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.sessions.read().get(&id).map(|entry| entry.expires_at)
    }

    /// Number of stored sessions, expired ones not yet purged included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns whether there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Local logins, keyed by the `sp_session` cookie.
#[derive(Debug)]
pub struct LocalSessions {
    users: RwLock<HashMap<Uuid, Expiring<LocalUser>>>,
    max_age: Duration,
}

impl Default for LocalSessions {
    fn default() -> Self {
        Self::new(Duration::seconds(SESSION_COOKIE_MAX_AGE))
    }
}

impl LocalSessions {
    /// Creates a store whose logins last `max_age`.
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            users: RwLock::default(),
            max_age,
        }
    }

    /// Logs `user` in and returns the new session ID.
    pub fn login(&self, user: LocalUser) -> Uuid {
        self.login_at(user, Utc::now())
    }

    fn login_at(&self, user: LocalUser, now: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        let mut users = self.users.write();
        users.retain(|_, entry| entry.is_live(now));
        users.insert(
            id,
            Expiring {
                value: user,
                expires_at: now + self.max_age,
            },
        );
        id
    }

    /// The user logged in with the request cookie.
    pub fn current(&self, headers: &HeaderMap) -> Option<LocalUser> {
        self.current_at(headers, Utc::now())
    }

    fn current_at(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Option<LocalUser> {
        let id = extract_cookie(headers, LOCAL_SESSION_COOKIE)?;
        self.users
            .read()
            .get(&id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Ends the session `id`.
    pub fn logout(&self, id: Uuid) -> Option<LocalUser> {
        self.users.write().remove(&id).map(|entry| entry.value)
    }

    /// Number of stored logins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Returns whether nobody is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

/// The local session of one request, handed to the protocol engine.
pub struct RequestLocalSession {
    sessions: Arc<LocalSessions>,
    id: Option<Uuid>,
}

impl RequestLocalSession {
    /// Binds the local session named by the request cookie.
    pub fn new(sessions: Arc<LocalSessions>, headers: &HeaderMap) -> Self {
        Self {
            sessions,
            id: extract_cookie(headers, LOCAL_SESSION_COOKIE),
        }
    }
}

#[async_trait]
impl LocalSession for RequestLocalSession {
    async fn terminate(&self) -> SamlResult<()> {
        if let Some(user) = self.id.and_then(|id| self.sessions.logout(id)) {
            tracing::info!(user = %user.username, "local session ended");
        }
        Ok(())
    }
}
