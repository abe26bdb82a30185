//! OAuth provider endpoints and client credentials.

use serde::{Deserialize, Serialize};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// OAuth provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Token endpoint (code exchange and refresh)
    pub token_url: String,

    /// User-info endpoint, called with the fresh access token after code exchange
    pub userinfo_url: String,

    /// Redirect URI sent with the code exchange. `postmessage` for popup-based
    /// web flows.
    pub redirect_uri: String,

    pub client_id: String,

    pub client_secret: String,
}

impl ProviderConfig {
    /// Google endpoints with the given client credentials.
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            redirect_uri: "postmessage".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}
