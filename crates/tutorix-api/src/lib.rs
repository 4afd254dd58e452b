//! Tutorix API - authentication and token lifecycle service
//!
//! Provides HTTP endpoints for registration, login, token refresh, logout
//! and account confirmation.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use auth::MemoryNotifier;
use axum::{routing::get, Router};
use state::AppState;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tutorix_core::{AppConfig, TutorixError};

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http());

    let router = if state.config.server.cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Router over in-memory stores with a captured mailbox
///
/// Returns the mailbox so tests can read confirmation links and codes.
pub fn create_test_app(
    config: AppConfig,
) -> Result<(Router, Arc<MemoryNotifier>), TutorixError> {
    let mailbox = Arc::new(MemoryNotifier::new());
    let state = AppState::for_testing(config, mailbox.clone())?;
    Ok((create_router(Arc::new(state)), mailbox))
}

/// Router with default configuration for tests
pub fn create_router_for_testing() -> Result<Router, TutorixError> {
    Ok(create_test_app(AppConfig::default())?.0)
}
