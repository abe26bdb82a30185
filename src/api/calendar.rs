use super::auth_middleware::{require_session, resolve_access_token, PipelineState, SessionContext};
use crate::delegation::LiveAccessToken;
use axum::{extract::Extension, middleware, response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: String,
    pub external_id: String,
    pub workspace_ref: String,
    pub has_live_token: bool,
}

/// Routes under `/calendar`, all behind the session pipeline.
///
/// `route_layer` wraps in reverse: the layer added last runs first, so the
/// credential check precedes token resolution.
pub fn create_calendar_router(state: PipelineState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/calendar/session", get(session_info))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_access_token))
        .route_layer(middleware::from_fn_with_state(state, require_session))
}

/// GET /calendar/session
async fn session_info(
    Extension(ctx): Extension<SessionContext>,
    token: Option<Extension<LiveAccessToken>>,
) -> Json<SessionInfo> {
    Json(SessionInfo {
        user_id: ctx.local_user_id,
        external_id: ctx.external_id,
        workspace_ref: ctx.workspace_ref,
        has_live_token: token.is_some_and(|Extension(t)| !t.secret().is_empty()),
    })
}
