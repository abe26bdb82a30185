//! Account linking callback.
//!
//! The front end runs the provider's consent popup itself and posts the
//! resulting authorization code here:
//! 1. `GET /auth/google/callback?code=...`
//! 2. Exchange code for tokens at the provider
//! 3. Fetch the provider profile
//! 4. Create or update the account, provision its workspace, store sealed tokens
//! 5. Return a session credential for the account

use crate::accounts::{AccountLinker, LinkError};
use crate::oauth::ProviderClient;
use crate::session::SessionSigner;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// `{"data": ..., "error": ...}` envelope used by the login endpoint.
#[derive(Serialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<&'static str>,
}

enum AppError {
    BadRequest(&'static str),
    BadGateway(&'static str),
    ServerError(&'static str),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(Envelope::<()> {
            data: None,
            error: Some(message),
        });

        (status, body).into_response()
    }
}

impl From<LinkError> for AppError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Workspace(_) => AppError::BadGateway("Failed to create workspace"),
            LinkError::Store(_) | LinkError::Crypto(_) => {
                AppError::ServerError("Failed to save account")
            }
        }
    }
}

/// Shared state for the login endpoint.
#[derive(Clone)]
pub struct OAuthAppState {
    pub provider: Arc<ProviderClient>,
    pub linker: Arc<AccountLinker>,
    pub signer: SessionSigner,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    jwt_token: String,
    expires_at: DateTime<Utc>,
    user: LoginUser,
}

#[derive(Serialize)]
pub struct LoginUser {
    id: String,
    email: String,
    name: String,
}

pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/auth/google/callback", get(google_callback))
        .with_state(Arc::new(state))
}

/// GET /auth/google/callback
async fn google_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or(AppError::BadRequest("Authorization code not found"))?;

    let grant = state.provider.exchange_code(&code).await.map_err(|e| {
        warn!(error = %e, "Authorization code exchange failed");
        AppError::BadRequest("Failed to exchange token")
    })?;

    let profile = state
        .provider
        .fetch_profile(&grant.access_token)
        .await
        .map_err(|e| {
            warn!(error = %e, "Fetching provider profile failed");
            AppError::BadRequest("Error getting user info")
        })?;

    debug!(external_id = %profile.id, "Linking provider account");

    let account = state.linker.link(&profile, &grant).await.map_err(|e| {
        error!(external_id = %profile.id, error = %e, "Account linking failed");
        AppError::from(e)
    })?;

    let workspace_ref = account.workspace_ref.as_deref().unwrap_or_default();
    let issued = state
        .signer
        .issue(&account.id.to_string(), &account.external_id, workspace_ref)
        .map_err(|e| {
            error!(account_id = account.id, error = %e, "Failed to issue session credential");
            AppError::ServerError("Failed to issue session")
        })?;

    info!(
        account_id = account.id,
        external_id = %account.external_id,
        has_refresh_token = grant.refresh_token.is_some(),
        "Account linked"
    );

    Ok(Json(Envelope {
        data: Some(LoginResponse {
            jwt_token: issued.token,
            expires_at: issued.expires_at,
            user: LoginUser {
                id: account.id.to_string(),
                email: account.email,
                name: account.name,
            },
        }),
        error: None,
    })
    .into_response())
}
