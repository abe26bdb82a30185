//! Just-in-time access token resolution for linked identities.
//!
//! [`DelegatedCredentialManager::resolve_live_access_token`] is the critical path of
//! every authenticated request:
//!
//! ```text
//! store.get ──► decrypt ──► expires_at - now > margin ? ──yes──► return token
//!                                     │
//!                                     no
//!                                     ▼
//!                      provider refresh (bounded by timeout)
//!                                     │
//!                    encrypt ──► store.upsert (failure logged, not fatal)
//!                                     │
//!                                     ▼
//!                               return new token
//! ```
//!
//! A failed refresh leaves the stored record untouched.

use crate::credentials::{decrypt, encrypt, EncryptionKey, StoreError, TokenRecord, TokenRecordStore};
use crate::oauth::TokenRefresher;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};


/// Refresh when the access token has this many seconds or fewer left
pub const REFRESH_SAFETY_MARGIN_SECS: i64 = 300;

/// Upper bound on a single provider refresh call
pub const DEFAULT_REFRESH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Why a live access token could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationError {
    /// No token record exists for the identity
    IdentityNotLinked,
    /// Stored ciphertext did not decrypt; the account needs re-linking
    CorruptCredentialState(String),
    /// Provider refused, failed or timed out; the user must re-consent
    RefreshFailed(String),
    /// Token record could not be read
    Store(StoreError),
}

impl std::fmt::Display for DelegationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DelegationError::IdentityNotLinked => write!(f, "No linked external account"),
            DelegationError::CorruptCredentialState(msg) => {
                write!(f, "Stored credentials are unusable: {}", msg)
            }
            DelegationError::RefreshFailed(msg) => write!(f, "Token refresh failed: {}", msg),
            DelegationError::Store(e) => write!(f, "Token store error: {}", e),
        }
    }
}

impl std::error::Error for DelegationError {}

/// Plaintext provider access token for the duration of one request.
///
/// `Debug` is redacted so the token cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct LiveAccessToken(String);

impl LiveAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for LiveAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LiveAccessToken(<redacted>)")
    }
}

/// Reads, refreshes and re-persists delegated provider credentials.
///
/// Without [`with_refresh_guard`](Self::with_refresh_guard), concurrent requests for
/// the same identity may each refresh and the last upsert wins. Both still get a
/// valid token.
pub struct DelegatedCredentialManager {
    store: Arc<dyn TokenRecordStore>,
    refresher: Arc<dyn TokenRefresher>,
    encryption_key: EncryptionKey,
    safety_margin: Duration,
    refresh_timeout: std::time::Duration,
    /// external identity → lock serializing refreshes; removed once no request holds or awaits it
    refresh_guards: Option<DashMap<String, Arc<Mutex<()>>>>,
}

impl DelegatedCredentialManager {
    pub fn new(
        store: Arc<dyn TokenRecordStore>,
        refresher: Arc<dyn TokenRefresher>,
        encryption_key: EncryptionKey,
    ) -> Self {
        Self {
            store,
            refresher,
            encryption_key,
            safety_margin: Duration::seconds(REFRESH_SAFETY_MARGIN_SECS),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            refresh_guards: None,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Serializes refreshes per external identity.
    ///
    /// A request that waited on the guard re-reads the record and reuses the token
    /// the previous holder stored, instead of refreshing again.
    pub fn with_refresh_guard(mut self) -> Self {
        self.refresh_guards = Some(DashMap::new());
        self
    }

    /// Returns a plaintext access token for `external_id` that is valid for at
    /// least the safety margin, refreshing through the provider when needed.
    pub async fn resolve_live_access_token(
        &self,
        external_id: &str,
    ) -> Result<LiveAccessToken, DelegationError> {
        let record = self.load(external_id).await?;
        let access_token = self.open_access_token(&record)?;

        if self.is_live(&record) {
            return Ok(LiveAccessToken(access_token));
        }

        let Some(guards) = &self.refresh_guards else {
            return self.refresh(record).await;
        };

        let guard = guards.entry(external_id.to_string()).or_default().clone();
        let result = {
            let _held = guard.lock().await;
            self.refresh_or_reuse(external_id).await
        };

        // Map holds one reference and we hold the other; anything more is a waiter
        guards.remove_if(external_id, |_, lock| Arc::strong_count(lock) <= 2);

        result
    }

    /// Runs under the identity's guard.
    async fn refresh_or_reuse(&self, external_id: &str) -> Result<LiveAccessToken, DelegationError> {
        // Another request may have refreshed while we waited
        let record = self.load(external_id).await?;
        let access_token = self.open_access_token(&record)?;
        if self.is_live(&record) {
            debug!(external_id = %external_id, "Reusing token refreshed by concurrent request");
            return Ok(LiveAccessToken(access_token));
        }

        self.refresh(record).await
    }

    /// Identities with a refresh guard currently allocated.
    #[cfg(test)]
    fn guarded_identities(&self) -> usize {
        self.refresh_guards.as_ref().map_or(0, |guards| guards.len())
    }

    async fn load(&self, external_id: &str) -> Result<TokenRecord, DelegationError> {
        self.store
            .get_by_external_id(external_id)
            .await
            .map_err(DelegationError::Store)?
            .ok_or(DelegationError::IdentityNotLinked)
    }

    fn open_access_token(&self, record: &TokenRecord) -> Result<String, DelegationError> {
        decrypt(&record.access_token, self.encryption_key.as_bytes()).map_err(|e| {
            DelegationError::CorruptCredentialState(format!("access token: {}", e))
        })
    }

    fn is_live(&self, record: &TokenRecord) -> bool {
        record.expires_at - Utc::now() > self.safety_margin
    }

    async fn refresh(&self, record: TokenRecord) -> Result<LiveAccessToken, DelegationError> {
        let sealed_refresh = record
            .refresh_token
            .as_deref()
            .ok_or_else(|| DelegationError::RefreshFailed("no refresh token stored".to_string()))?;

        let refresh_token = decrypt(sealed_refresh, self.encryption_key.as_bytes()).map_err(|e| {
            DelegationError::CorruptCredentialState(format!("refresh token: {}", e))
        })?;

        if refresh_token.is_empty() {
            return Err(DelegationError::RefreshFailed(
                "stored refresh token is empty".to_string(),
            ));
        }

        info!(
            external_id = %record.external_id,
            expires_at = %record.expires_at,
            "Refreshing provider access token"
        );

        let grant = match tokio::time::timeout(
            self.refresh_timeout,
            self.refresher.refresh(&refresh_token),
        )
        .await
        {
            Ok(Ok(grant)) => grant,
            Ok(Err(e)) => return Err(DelegationError::RefreshFailed(e.to_string())),
            Err(_) => {
                return Err(DelegationError::RefreshFailed(format!(
                    "timed out after {:?}",
                    self.refresh_timeout
                )))
            }
        };

        let key = self.encryption_key.as_bytes();
        let access_token = encrypt(&grant.access_token, key)
            .map_err(|e| DelegationError::CorruptCredentialState(e.to_string()))?;

        // Keep the existing refresh token if the provider did not rotate it
        let refresh_token = match &grant.refresh_token {
            Some(rotated) => Some(
                encrypt(rotated, key)
                    .map_err(|e| DelegationError::CorruptCredentialState(e.to_string()))?,
            ),
            None => record.refresh_token.clone(),
        };

        let replacement = TokenRecord {
            external_id: record.external_id.clone(),
            access_token,
            refresh_token,
            expires_at: grant.expires_at,
        };

        if let Err(e) = self.store.upsert(&replacement).await {
            warn!(
                external_id = %record.external_id,
                error = %e,
                "Failed to persist refreshed token; serving in-memory token for this request"
            );
        } else {
            info!(
                external_id = %record.external_id,
                rotated = grant.refresh_token.is_some(),
                expires_at = %grant.expires_at,
                "Provider access token refreshed"
            );
        }

        Ok(LiveAccessToken(grant.access_token))
    }
}
