/// Authentication middleware for protecting routes
///
/// Extracts and validates bearer access tokens from the Authorization header.
/// A token is accepted only if it is correctly signed, unexpired, and its
/// stored record is still valid. On success the authenticated principal is
/// added to request extensions.
use super::jwt::{JwtError, TokenUse};
use super::models::{TokenKind, User};
use super::service::bearer_token;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use tutorix_core::Role;
use uuid::Uuid;

/// Authenticated user information
///
/// This is added to request extensions by the auth middleware
/// and can be extracted in handlers using `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// User's unique identifier
    pub user_id: Uuid,
    /// User's email address
    pub email: String,
    /// User's display name
    pub name: String,
    /// Granted roles
    pub roles: Vec<Role>,
    /// Permission identifiers plus `ROLE_*` names
    pub authorities: Vec<String>,
}

impl AuthenticatedUser {
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }

    pub fn has_any_authority(&self, authorities: &[&str]) -> bool {
        authorities.iter().any(|a| self.has_authority(a))
    }
}

impl From<&User> for AuthenticatedUser {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            name: user.full_name(),
            roles: user.roles.clone(),
            authorities: user.authorities(),
        }
    }
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    #[error("Token is not an access token")]
    NotAnAccessToken,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Account is locked")]
    AccountLocked,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Authentication backend error: {0}")]
    Backend(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::MissingAuthHeader => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Missing Authorization header",
            ),
            AuthError::InvalidAuthHeader => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid Authorization header format",
            ),
            AuthError::InvalidToken(_) | AuthError::NotAnAccessToken => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Invalid or expired token",
            ),
            AuthError::TokenRevoked => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Token has been revoked",
            ),
            AuthError::AccountDisabled => {
                (StatusCode::FORBIDDEN, "ACCOUNT_DISABLED", "Account is disabled")
            }
            AuthError::AccountLocked => {
                (StatusCode::FORBIDDEN, "ACCOUNT_LOCKED", "Account is locked")
            }
            AuthError::InsufficientPermissions => {
                (StatusCode::FORBIDDEN, "FORBIDDEN", "Insufficient permissions")
            }
            AuthError::Backend(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            ),
        };

        (status, axum::Json(ApiError::new(code, message))).into_response()
    }
}

/// Authentication middleware that requires a valid access token
///
/// This middleware:
/// 1. Extracts the Bearer token from the Authorization header
/// 2. Validates the JWT signature, issuer and expiration
/// 3. Checks that the stored token record has not been revoked
/// 4. Loads the user and rejects disabled or locked accounts
/// 5. Adds AuthenticatedUser to request extensions
///
/// # Usage
///
/// ```ignore
/// use axum::{Router, routing::get, middleware};
/// use tutorix_api::auth::middleware::auth_middleware;
///
/// let app = Router::new()
///     .route("/users/me", get(me_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let ip_address = extract_ip_address(request.headers());
    let user_agent = extract_user_agent(request.headers());

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = bearer_token(Some(auth_header)).ok_or(AuthError::InvalidAuthHeader)?;
    let now = Utc::now();

    let claims = match state.auth.jwt().decode(token) {
        Ok(claims) => claims,
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                ip_address,
                user_agent,
                reason: e.to_string(),
            });
            return Err(AuthError::InvalidToken(e));
        }
    };

    if claims.token_use != TokenUse::Access {
        return Err(AuthError::NotAnAccessToken);
    }

    let record = state.auth.find_token(token).await.map_err(|e| {
        warn!(error = %e, "Token lookup failed");
        AuthError::Backend(e.to_string())
    })?;
    let usable = record
        .as_ref()
        .is_some_and(|r| r.kind == TokenKind::Access && r.is_valid_at(now));
    if !usable {
        audit_log(&AuditEvent::InvalidToken {
            ip_address,
            user_agent,
            reason: "Token has been revoked".to_string(),
        });
        return Err(AuthError::TokenRevoked);
    }

    let user = state
        .auth
        .find_user_by_email(&claims.sub)
        .await
        .map_err(|e| AuthError::Backend(e.to_string()))?
        .ok_or(AuthError::TokenRevoked)?;

    if user.locked {
        return Err(AuthError::AccountLocked);
    }
    if !user.enabled {
        return Err(AuthError::AccountDisabled);
    }

    request
        .extensions_mut()
        .insert(AuthenticatedUser::from(&user));

    Ok(next.run(request).await)
}

/// Type alias for authority middleware future
type AuthorityMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>>;

/// Middleware factory requiring a single authority
///
/// Must run after `auth_middleware`.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, routing::get, middleware};
/// use tutorix_api::auth::middleware::{auth_middleware, require_authority};
///
/// let app = Router::new()
///     .route("/admin", get(admin_handler))
///     .route_layer(middleware::from_fn(require_authority("admin:read")))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub fn require_authority(
    authority: &'static str,
) -> impl Fn(Request<Body>, Next) -> AuthorityMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move { authorize(request, next, &[authority]).await })
    }
}

/// Middleware factory requiring any of several authorities
pub fn require_any_authority(
    authorities: &'static [&'static str],
) -> impl Fn(Request<Body>, Next) -> AuthorityMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move { authorize(request, next, authorities).await })
    }
}

async fn authorize(
    request: Request<Body>,
    next: Next,
    authorities: &[&str],
) -> Result<Response, AuthError> {
    let ip_address = extract_ip_address(request.headers());
    let user_agent = extract_user_agent(request.headers());

    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AuthError::MissingAuthHeader)?
        .clone();

    if !user.has_any_authority(authorities) {
        audit_log(&AuditEvent::AccessDenied {
            user_id: Some(user.user_id),
            email: Some(user.email.clone()),
            resource: request.uri().path().to_string(),
            required_authority: Some(authorities.join(",")),
            ip_address,
            user_agent,
        });
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}
