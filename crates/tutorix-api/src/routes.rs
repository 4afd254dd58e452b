//! API route definitions

use crate::auth::middleware::auth_middleware;
use crate::handlers::{auth, user};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes; refresh and logout read the bearer header themselves
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/authenticate", post(auth::authenticate_handler))
        .route("/auth/refresh-token", post(auth::refresh_token_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/confirm", get(auth::confirm_handler))
        .route("/auth/activate-account", get(auth::activate_account_handler));

    // Protected routes (valid access token required)
    let protected_routes = Router::new()
        .route("/users/me", get(user::me_handler))
        .route("/users/password", patch(user::change_password_handler))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
