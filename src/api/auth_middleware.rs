//! Session middleware pipeline.
//!
//! Two layers, applied in this order:
//! 1. [`require_session`] validates the bearer session credential and attaches a
//!    [`SessionContext`] to the request.
//! 2. [`resolve_access_token`] turns the context's external identity into a
//!    [`LiveAccessToken`] and attaches it too.
//!
//! Every failure collapses to [`AuthRejection`]. The reason is logged, the client
//! only ever sees a generic message.

use crate::auth::{extract_bearer_token, TokenError};
use crate::delegation::{DelegatedCredentialManager, DelegationError, LiveAccessToken};
use crate::session::{SessionClaims, SessionError, SessionSigner};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};


/// State shared by both pipeline layers.
#[derive(Clone)]
pub struct PipelineState {
    pub signer: SessionSigner,
    pub credentials: Arc<DelegatedCredentialManager>,
}

/// Identity of the caller, attached by [`require_session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub local_user_id: String,
    pub external_id: String,
    pub workspace_ref: String,
}

impl From<SessionClaims> for SessionContext {
    fn from(claims: SessionClaims) -> Self {
        Self {
            local_user_id: claims.sub,
            external_id: claims.external_id,
            workspace_ref: claims.workspace_ref,
        }
    }
}

/// The only outcomes a client can observe from the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// 401, sign in again
    Unauthenticated,
    /// 500, retry later
    Internal,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AuthRejection::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            AuthRejection::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<TokenError> for AuthRejection {
    fn from(_: TokenError) -> Self {
        AuthRejection::Unauthenticated
    }
}

impl From<SessionError> for AuthRejection {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidCredential(_) => AuthRejection::Unauthenticated,
            SessionError::Signing(_) => AuthRejection::Internal,
        }
    }
}

impl From<DelegationError> for AuthRejection {
    fn from(err: DelegationError) -> Self {
        match err {
            DelegationError::IdentityNotLinked => AuthRejection::Unauthenticated,
            DelegationError::CorruptCredentialState(_) => AuthRejection::Unauthenticated,
            DelegationError::RefreshFailed(_) => AuthRejection::Unauthenticated,
            // Read-path store failures are reported as a sign-in requirement, not a 500
            DelegationError::Store(_) => AuthRejection::Unauthenticated,
        }
    }
}

/// First layer: bearer credential → [`SessionContext`].
pub async fn require_session(
    State(state): State<Arc<PipelineState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthRejection> {
    let token = extract_bearer_token(req.headers()).map_err(|e| {
        debug!(path = %req.uri().path(), error = %e, "Rejected request without usable credential");
        AuthRejection::from(e)
    })?;

    let claims = state.signer.validate(&token).map_err(|e| {
        debug!(path = %req.uri().path(), error = %e, "Rejected session credential");
        AuthRejection::from(e)
    })?;

    req.extensions_mut().insert(SessionContext::from(claims));
    Ok(next.run(req).await)
}

/// Second layer: [`SessionContext`] → [`LiveAccessToken`].
pub async fn resolve_access_token(
    State(state): State<Arc<PipelineState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthRejection> {
    let Some(external_id) = req
        .extensions()
        .get::<SessionContext>()
        .map(|ctx| ctx.external_id.clone())
    else {
        error!("Token resolution ran without a session context; check layer order");
        return Err(AuthRejection::Internal);
    };

    let token = state
        .credentials
        .resolve_live_access_token(&external_id)
        .await
        .map_err(|e| {
            match &e {
                DelegationError::Store(_) | DelegationError::CorruptCredentialState(_) => {
                    error!(external_id = %external_id, error = %e, "Could not resolve access token")
                }
                _ => warn!(external_id = %external_id, error = %e, "Could not resolve access token"),
            }
            AuthRejection::from(e)
        })?;

    req.extensions_mut().insert::<LiveAccessToken>(token);
    Ok(next.run(req).await)
}
