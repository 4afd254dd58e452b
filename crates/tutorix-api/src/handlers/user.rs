//! Handlers for the authenticated user's own account

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::{AuthenticatedUser, ChangePasswordRequest};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Extension, Json};
use std::sync::Arc;

/// Get current user profile
///
/// # Responses
///
/// * `200 OK` - Public profile with authorities
/// * `401 Unauthorized` - Invalid or missing authentication
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.auth.me(user.user_id).await?;
    Ok(Json(profile))
}

/// Change the current user's password
///
/// # Responses
///
/// * `200 OK` - Password changed
/// * `400 Bad Request` - New password and confirmation differ
/// * `401 Unauthorized` - Current password is wrong
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.auth.change_password(user.user_id, request).await;

    audit_log(&AuditEvent::PasswordChange {
        user_id: user.user_id,
        email: user.email.clone(),
        success: result.is_ok(),
        ip_address: extract_ip_address(&headers),
        user_agent: extract_user_agent(&headers),
    });

    Ok(Json(result?))
}
