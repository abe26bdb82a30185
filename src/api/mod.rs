// HTTP surface: login callback, protected calendar routes, health

pub mod auth_middleware;
pub mod calendar;
pub mod oauth;

pub use auth_middleware::{
    require_session, resolve_access_token, AuthRejection, PipelineState, SessionContext,
};
pub use calendar::{create_calendar_router, SessionInfo};
pub use oauth::{create_oauth_router, OAuthAppState};

use anyhow::{Context, Result};
use axum::{
    http::{HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

/// Full application router without CORS.
pub fn create_router(pipeline: PipelineState, oauth: OAuthAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(create_oauth_router(oauth))
        .merge(create_calendar_router(pipeline))
}

/// CORS for the single configured front-end origin.
pub fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin: HeaderValue = origin
        .parse()
        .with_context(|| format!("Invalid CORS origin '{}'", origin))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_credentials(true))
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
