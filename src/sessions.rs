//! Token and session records — the identity collaborator's tenancy of the
//! shared store.
//!
//! The gateway core does not verify or issue credentials; it only provides
//! the storage contract the auth layer consumes: refresh-token records,
//! an access-token revocation list, and session documents, all with
//! TTL-based expiry. Every operation fails explicitly with
//! [`StoreError`] when the store is down — callers decide what a missing
//! answer means for them, the same availability-degradation contract as
//! every other store tenant.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{SharedStore, StoreError};

const REFRESH_PREFIX: &str = "token:refresh:";
const REVOKED_PREFIX: &str = "token:blacklist:";
const SESSION_PREFIX: &str = "session:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub user_id: String,
    pub session_id: String,
}

pub struct TokenStore {
    store: Arc<dyn SharedStore>,
}

impl TokenStore {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn store_refresh_token(
        &self,
        token: &str,
        record: &RefreshTokenRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_string(record)
            .map_err(|e| StoreError::Command(e.to_string()))?;
        self.store
            .set(&format!("{REFRESH_PREFIX}{token}"), &value, Some(ttl))
            .await?;
        tracing::info!(user_id = %record.user_id, session_id = %record.session_id, "refresh token stored");
        Ok(())
    }

    pub async fn refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let raw = self.store.get(&format!("{REFRESH_PREFIX}{token}")).await?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Command(e.to_string())),
            None => Ok(None),
        }
    }

    /// Used on logout and on rotation.
    pub async fn delete_refresh_token(&self, token: &str) -> Result<(), StoreError> {
        self.store.del(&format!("{REFRESH_PREFIX}{token}")).await
    }

    /// Put an access token on the revocation list until it would have
    /// expired anyway.
    pub async fn revoke(&self, token: &str, remaining: Duration) -> Result<(), StoreError> {
        self.store
            .set(&format!("{REVOKED_PREFIX}{token}"), "1", Some(remaining))
            .await?;
        tracing::info!("access token revoked");
        Ok(())
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        self.store.exists(&format!("{REVOKED_PREFIX}{token}")).await
    }

    pub async fn store_session(
        &self,
        session_id: &str,
        document: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.store
            .set(&format!("{SESSION_PREFIX}{session_id}"), document, Some(ttl))
            .await
    }

    pub async fn session(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        self.store.get(&format!("{SESSION_PREFIX}{session_id}")).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.del(&format!("{SESSION_PREFIX}{session_id}")).await
    }

    /// How long a session record has left, for the admin surface.
    pub async fn session_ttl(&self, session_id: &str) -> Result<Option<Duration>, StoreError> {
        self.store.pttl(&format!("{SESSION_PREFIX}{session_id}")).await
    }
}
