//! Outstanding request tracking.
//!
//! Every AuthnRequest sent to an IdP is recorded here under its request ID. The
//! matching response consumes the record with [`RequestCorrelationStore::take`];
//! a record can be consumed at most once, which is what makes a replayed response
//! detectable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;
use crate::provider::SessionStore;

const KEY_PREFIX: &str = "saml2:outstanding:";

/// A request that has been sent but not yet answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingExchange {
    /// ID of the request message.
    pub request_id: String,
    /// Where to send the user once the response is accepted.
    pub relay_target: String,
    /// When the request was issued.
    pub issued_at: DateTime<Utc>,
}

/// Typed view over the outstanding requests of one session.
pub struct RequestCorrelationStore<'a, S: SessionStore> {
    store: &'a S,
}

impl<'a, S: SessionStore> RequestCorrelationStore<'a, S> {
    /// Wraps a session store.
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Records an outstanding request.
    pub async fn put(&self, request_id: &str, relay_target: &str) -> SessionResult<()> {
        let exchange = OutstandingExchange {
            request_id: request_id.to_string(),
            relay_target: relay_target.to_string(),
            issued_at: Utc::now(),
        };
        self.store.set(&key(request_id), &exchange).await?;
        tracing::debug!(request_id, relay_target, "recorded outstanding request");
        Ok(())
    }

    /// Atomically removes and returns the exchange for `request_id`.
    ///
    /// Returns `None` when the ID is unknown or was already consumed.
    pub async fn take(&self, request_id: &str) -> SessionResult<Option<OutstandingExchange>> {
        self.store.take(&key(request_id)).await
    }

    /// Returns whether `request_id` is outstanding.
    pub async fn contains(&self, request_id: &str) -> SessionResult<bool> {
        let exchange: Option<OutstandingExchange> = self.store.get(&key(request_id)).await?;
        Ok(exchange.is_some())
    }

    /// Snapshot of all outstanding requests, keyed by request ID.
    pub async fn outstanding(&self) -> SessionResult<BTreeMap<String, OutstandingExchange>> {
        let mut snapshot = BTreeMap::new();
        for k in self.store.keys(KEY_PREFIX).await? {
            if let Some(exchange) = self.store.get::<OutstandingExchange>(&k).await? {
                snapshot.insert(exchange.request_id.clone(), exchange);
            }
        }
        Ok(snapshot)
    }
}

fn key(request_id: &str) -> String {
    format!("{KEY_PREFIX}{request_id}")
}
