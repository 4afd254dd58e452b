//! Authentication API handlers
//!
//! Thin HTTP adapters over `AuthService`; each one records an audit event.

use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::{
    AuthenticationRequest, ConfirmationOutcome, RegisterRequest, Registration,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registration response
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(flatten)]
    pub registration: Registration,
    pub message: String,
}

/// Logout response
#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// Confirmation response
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub outcome: ConfirmationOutcome,
    pub message: String,
}

impl From<ConfirmationOutcome> for ConfirmationResponse {
    fn from(outcome: ConfirmationOutcome) -> Self {
        Self {
            outcome,
            message: outcome.message().to_string(),
        }
    }
}

/// Query string carrying a confirmation token or activation code
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

fn outcome_label(outcome: ConfirmationOutcome) -> String {
    serde_json::to_value(outcome)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Register a new account
///
/// # Responses
///
/// * `201 Created` - Account created, tokens returned (link confirmation)
/// * `202 Accepted` - Account created, activation code mailed
/// * `400 Bad Request` - Validation failed, every violation listed
/// * `409 Conflict` - Email already registered
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);
    let email = request.email.clone();

    let registration = match state.auth.register(request).await {
        Ok(registration) => registration,
        Err(e) => {
            audit_log(&AuditEvent::RegistrationFailure {
                email,
                reason: e.to_string(),
                ip_address,
                user_agent,
            });
            return Err(e.into());
        }
    };

    audit_log(&AuditEvent::RegistrationSuccess {
        user_id: registration.user.id,
        email: registration.user.email.clone(),
        role: registration
            .user
            .roles
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(","),
        ip_address,
        user_agent,
    });

    let (status, message) = if registration.tokens.is_some() {
        (
            StatusCode::CREATED,
            "Registration successful, confirm your email with the link we sent",
        )
    } else {
        (
            StatusCode::ACCEPTED,
            "Registration successful, an activation code has been sent to your email",
        )
    };

    Ok((
        status,
        Json(RegisterResponse {
            registration,
            message: message.to_string(),
        }),
    ))
}

/// Login with email and password
///
/// # Responses
///
/// * `200 OK` - Access and refresh tokens
/// * `401 Unauthorized` - Bad credentials
/// * `403 Forbidden` - Account disabled or locked
pub async fn authenticate_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AuthenticationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip_address = extract_ip_address(&headers);
    let user_agent = extract_user_agent(&headers);
    let email = request.email.clone();

    match state.auth.authenticate(request).await {
        Ok(response) => {
            audit_log(&AuditEvent::LoginSuccess {
                email,
                ip_address,
                user_agent,
            });
            Ok(Json(response))
        }
        Err(e) => {
            audit_log(&AuditEvent::LoginFailure {
                email,
                reason: e.to_string(),
                ip_address,
                user_agent,
            });
            Err(e.into())
        }
    }
}

/// Exchange the bearer refresh token for a new access token
///
/// A missing or unacceptable token yields `200 OK` with an empty body.
pub async fn refresh_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let refreshed = state.auth.refresh_token(authorization(&headers)).await?;

    audit_log(&AuditEvent::TokenRefresh {
        granted: refreshed.is_some(),
        ip_address: extract_ip_address(&headers),
        user_agent: extract_user_agent(&headers),
    });

    Ok(match refreshed {
        Some(response) => Json(response).into_response(),
        None => StatusCode::OK.into_response(),
    })
}

/// Revoke the bearer token; always succeeds
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id = state.auth.logout(authorization(&headers)).await;

    audit_log(&AuditEvent::Logout {
        user_id,
        ip_address: extract_ip_address(&headers),
    });

    Json(LogoutResponse {
        message: "Logged out successfully".to_string(),
    })
}

/// Confirm an account from the emailed link
///
/// # Responses
///
/// * `200 OK` - Confirmed, already confirmed, or expired and reissued
/// * `404 Not Found` - Unknown token
pub async fn confirm_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.token.is_empty() {
        return Err(AppError::BadRequest("Token is mandatory".to_string()));
    }

    let result = state.auth.confirm(&query.token).await;
    audit_log(&AuditEvent::AccountConfirmation {
        method: "link".to_string(),
        outcome: match &result {
            Ok(outcome) => outcome_label(*outcome),
            Err(e) => e.to_string(),
        },
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(ConfirmationResponse::from(result?)))
}

/// Activate an account with the emailed code
///
/// # Responses
///
/// * `200 OK` - Activated or already activated
/// * `404 Not Found` - Unknown code
/// * `410 Gone` - Code expired, a new one has been mailed
pub async fn activate_account_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.token.is_empty() {
        return Err(AppError::BadRequest("Token is mandatory".to_string()));
    }

    let result = state.auth.activate_account(&query.token).await;
    audit_log(&AuditEvent::AccountConfirmation {
        method: "code".to_string(),
        outcome: match &result {
            Ok(outcome) => outcome_label(*outcome),
            Err(e) => e.to_string(),
        },
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(ConfirmationResponse::from(result?)))
}
