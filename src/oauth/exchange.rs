//! OAuth token endpoint calls.
//!
//! Handles exchanging authorization codes and refresh tokens for access tokens,
//! and fetching the linked user's profile.

use super::{ProviderConfig, RefreshError, TokenGrant, TokenRefresher, UserProfile};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::debug;

/// Lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Fails when `expires_in` is not a positive lifetime that fits a timestamp.
    fn into_grant(self) -> std::result::Result<TokenGrant, String> {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        if expires_in <= 0 {
            return Err(format!("expires_in must be positive, got {}", expires_in));
        }

        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| format!("expires_in out of range: {}", expires_in))?;

        Ok(TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        })
    }
}

/// HTTP client for one OAuth provider.
#[derive(Clone, Debug)]
pub struct ProviderClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl ProviderClient {
    /// Builds a client whose every request is bounded by `timeout`.
    pub fn new(config: ProviderConfig, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// The provider only returns a refresh token on first consent (or when consent
    /// is forced), so `refresh_token` may be `None` here.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        debug!(token_url = %self.config.token_url, "Exchanging authorization code for token");

        let response = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .context("Failed to send token exchange request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Token exchange failed with status {}: {}",
                status,
                body
            ));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        debug!(
            has_refresh_token = token_response.refresh_token.is_some(),
            expires_in = ?token_response.expires_in,
            "Token exchange successful"
        );

        token_response
            .into_grant()
            .map_err(|e| anyhow!("Invalid token response: {}", e))
    }

    /// Fetches the profile of the user who owns `access_token`.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile> {
        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Failed to send user info request")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to get user info: status {}",
                response.status()
            ));
        }

        let profile: UserProfile = response
            .json()
            .await
            .context("Failed to parse user info response")?;

        if profile.id.is_empty() {
            return Err(anyhow!("User info response has an empty id"));
        }

        Ok(profile)
    }
}

#[async_trait]
impl TokenRefresher for ProviderClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(RefreshError::Rejected { status, body });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        token_response
            .into_grant()
            .map_err(RefreshError::InvalidResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client_for(server: &Server) -> ProviderClient {
        let config = ProviderConfig {
            token_url: format!("{}/token", server.url()),
            userinfo_url: format!("{}/userinfo", server.url()),
            redirect_uri: "postmessage".to_string(),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        };
        ProviderClient::new(config, std::time::Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "ya29.a0AfH6SMB",
            "refresh_token": "1//0gRefresh",
            "expires_in": 3599,
            "token_type": "Bearer"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "ya29.a0AfH6SMB");
        assert_eq!(response.refresh_token, Some("1//0gRefresh".to_string()));
        assert_eq!(response.expires_in, Some(3599));
    }

    #[test]
    fn test_missing_expiry_defaults_to_one_hour() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "token_12345"}"#).unwrap();
        let before = Utc::now();
        let grant = response.into_grant().unwrap();

        assert!(grant.refresh_token.is_none());
        assert!(grant.expires_at >= before + Duration::seconds(DEFAULT_EXPIRES_IN_SECS));
        assert!(grant.expires_at <= Utc::now() + Duration::seconds(DEFAULT_EXPIRES_IN_SECS));
    }

    #[test]
    fn test_empty_refresh_token_treated_as_absent() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "a", "refresh_token": ""}"#).unwrap();
        assert!(response.into_grant().unwrap().refresh_token.is_none());
    }

    #[test]
    fn test_grant_debug_hides_token() {
        let grant = TokenGrant {
            access_token: "ya29.secret".to_string(),
            refresh_token: None,
            expires_at: Utc::now(),
        };
        assert!(!format!("{:?}", grant).contains("ya29.secret"));
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "my_refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                Matcher::UrlEncoded("client_secret".into(), "client-secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"new_token","expires_in":3600}"#)
            .create_async()
            .await;

        let grant = client_for(&server).refresh("my_refresh").await.unwrap();
        assert_eq!(grant.access_token, "new_token");
        assert!(grant.refresh_token.is_none());
        assert!(grant.expires_at > Utc::now() + Duration::minutes(59));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_returns_rotated_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"new_token","refresh_token":"rotated","expires_in":60}"#)
            .create_async()
            .await;

        let grant = client_for(&server).refresh("my_refresh").await.unwrap();
        assert_eq!(grant.refresh_token.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let result = client_for(&server).refresh("expired_refresh").await;
        assert!(matches!(result, Err(RefreshError::Rejected { status: 400, .. })));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_garbage_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let result = client_for(&server).refresh("my_refresh").await;
        assert!(matches!(result, Err(RefreshError::InvalidResponse(_))));
    }

    #[test]
    fn test_unusable_expiry_rejected() {
        for expires_in in ["0", "-3600", "9223372036854775807", "-9223372036854775808"] {
            let json = format!(r#"{{"access_token": "a", "expires_in": {}}}"#, expires_in);
            let response: TokenResponse = serde_json::from_str(&json).unwrap();
            assert!(response.into_grant().is_err(), "expires_in {} should be rejected", expires_in);
        }
    }

    #[tokio::test]
    async fn test_refresh_out_of_range_expiry() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"x","expires_in":9223372036854775807}"#)
            .create_async()
            .await;

        let result = client_for(&server).refresh("my_refresh").await;
        assert!(matches!(result, Err(RefreshError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_refresh_non_positive_expiry() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"x","expires_in":0}"#)
            .create_async()
            .await;

        let result = client_for(&server).refresh("my_refresh").await;
        assert!(matches!(result, Err(RefreshError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_exchange_code_out_of_range_expiry() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.first","expires_in":9223372036854775807}"#)
            .create_async()
            .await;

        assert!(client_for(&server).exchange_code("auth_code_123").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_unreachable_provider() {
        let config = ProviderConfig {
            token_url: "http://127.0.0.1:9/token".to_string(),
            ..ProviderConfig::google("id", "secret")
        };
        let client = ProviderClient::new(config, std::time::Duration::from_secs(2)).unwrap();

        let result = client.refresh("my_refresh").await;
        assert!(matches!(result, Err(RefreshError::Transport(_))));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "auth_code_123".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "postmessage".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.first","refresh_token":"1//first","expires_in":3599}"#)
            .create_async()
            .await;

        let grant = client_for(&server).exchange_code("auth_code_123").await.unwrap();
        assert_eq!(grant.access_token, "ya29.first");
        assert_eq!(grant.refresh_token.as_deref(), Some("1//first"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_code_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        assert!(client_for(&server).exchange_code("bad").await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_profile() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/userinfo")
            .match_header("authorization", "Bearer ya29.first")
            .with_status(200)
            .with_body(r#"{"id":"1082","email":"ada@example.com","name":"Ada","picture":"x"}"#)
            .create_async()
            .await;

        let profile = client_for(&server).fetch_profile("ya29.first").await.unwrap();
        assert_eq!(
            profile,
            UserProfile {
                id: "1082".to_string(),
                email: "ada@example.com".to_string(),
                name: "Ada".to_string(),
            }
        );

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_profile_unauthorized() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/userinfo")
            .with_status(401)
            .create_async()
            .await;

        assert!(client_for(&server).fetch_profile("bad").await.is_err());
    }
}
