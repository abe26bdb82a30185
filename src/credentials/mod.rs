//! Encrypted storage for delegated provider credentials.
//!
//! One [`TokenRecord`] exists per external identity. Both the access token and the
//! refresh token are sealed with AES-256-GCM before they reach the store; the store
//! itself only ever sees ciphertext.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   DelegatedCredentialManager             │
//! │  - decrypt / refresh / re-encrypt        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - AES-256-GCM, nonce embedded           │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenRecordStore                   │
//! │  - get by external identity              │
//! │  - atomic upsert                         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use calgate::credentials::{encrypt, CredentialStore, EncryptionKey, TokenRecord, TokenRecordStore};
//! use chrono::{Duration, Utc};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let key = EncryptionKey::generate();
//! let store = CredentialStore::new("calgate.db")?;
//!
//! let record = TokenRecord {
//!     external_id: "108234567890".to_string(),
//!     access_token: encrypt("ya29.access", key.as_bytes())?,
//!     refresh_token: Some(encrypt("1//refresh", key.as_bytes())?),
//!     expires_at: Utc::now() + Duration::hours(1),
//! };
//! store.upsert(&record).await?;
//!
//! let stored = store.get_by_external_id("108234567890").await?;
//! assert!(stored.is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::{decrypt, encrypt, validate_key, CryptoError, EncryptionKey, KEY_SIZE};
pub use storage::CredentialStore;

/// Stored credential bundle for one external identity.
///
/// `access_token` and `refresh_token` hold ciphertext produced by [`encrypt`],
/// never plaintext. The record is always replaced whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Provider-issued identity, the lookup key
    pub external_id: String,

    /// Sealed access token
    pub access_token: String,

    /// Sealed refresh token (None when the provider never issued one)
    pub refresh_token: Option<String>,

    /// Absolute access-token expiry, provider clock
    pub expires_at: DateTime<Utc>,
}

/// Persistence failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying database rejected the operation
    Database(String),
    /// A stored row could not be read back into a record
    InvalidRow(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
            StoreError::InvalidRow(msg) => write!(f, "Invalid stored row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Contract the credential manager needs from persistence.
///
/// `upsert` must be atomic per record: a concurrent reader sees either the old
/// ciphertext/expiry pair or the new one, never a mix.
#[async_trait]
pub trait TokenRecordStore: Send + Sync {
    /// Returns the record for `external_id`, or `None` when the identity was never linked.
    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Inserts or replaces the record keyed by `record.external_id`.
    async fn upsert(&self, record: &TokenRecord) -> Result<(), StoreError>;
}
