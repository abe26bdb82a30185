//! Provider-side OAuth 2.0 plumbing.
//!
//! Two grants are used against the provider's token endpoint:
//! - `authorization_code` once, when a user links their account
//! - `refresh_token` on demand, when a stored access token is near expiry
//!
//! The refresh grant sits behind [`TokenRefresher`] so the credential manager can
//! be exercised without a network.

mod exchange;
mod provider;

pub use exchange::ProviderClient;
pub use provider::{ProviderConfig, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Fresh token material returned by the provider.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present when the provider issued (or rotated) a refresh token
    pub refresh_token: Option<String>,
    /// Absolute expiry of `access_token`
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Profile returned by the provider's user-info endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    /// External identity
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// Refresh grant failures.
///
/// Expired, revoked and transient failures are not told apart; every variant
/// ends up as a re-authentication requirement upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Provider answered with a non-success status
    Rejected { status: u16, body: String },
    /// Request never completed (DNS, connect, TLS, client timeout)
    Transport(String),
    /// Success status but the body was not a token response
    InvalidResponse(String),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::Rejected { status, body } => {
                write!(f, "Token refresh failed with status {}: {}", status, body)
            }
            RefreshError::Transport(msg) => write!(f, "Token refresh request failed: {}", msg),
            RefreshError::InvalidResponse(msg) => {
                write!(f, "Failed to parse token refresh response: {}", msg)
            }
        }
    }
}

impl std::error::Error for RefreshError {}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError>;
}
