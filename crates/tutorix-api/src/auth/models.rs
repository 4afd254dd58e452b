//! Domain models for authentication and authorization
//!
//! This module defines the core data structures for the auth system:
//! - User: account, credentials and roles
//! - Token: persisted session, refresh and activation tokens
//! - Request/response payloads of the authentication workflow
//!
//! Token values are never stored; records carry their SHA-256 digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tutorix_core::{authorities_for, FieldViolation, Role, TutorixError};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

/// User account model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: Uuid,

    pub first_name: String,

    pub last_name: String,

    /// User's email address (unique, used for login)
    pub email: String,

    /// Hashed password (Argon2id)
    /// This field is never serialized in API responses
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Granted roles
    pub roles: Vec<Role>,

    /// False until the email address has been confirmed
    pub enabled: bool,

    pub locked: bool,

    /// Account creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new, not yet confirmed, user
    pub fn new(
        first_name: String,
        last_name: String,
        email: String,
        password_hash: String,
        roles: Vec<Role>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            first_name,
            last_name,
            email,
            password_hash,
            roles,
            enabled: false,
            locked: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Authorities granted by every role of the user
    pub fn authorities(&self) -> Vec<String> {
        authorities_for(&self.roles)
    }

    /// Convert user to public representation (without sensitive fields)
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            roles: self.roles.clone(),
            authorities: self.authorities(),
            enabled: self.enabled,
            created_at: self.created_at,
        }
    }
}

/// Public user representation (safe for API responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub roles: Vec<Role>,
    pub authorities: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Purpose of a persisted token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Bearer access token (JWT)
    Access,
    /// Bearer refresh token (JWT)
    Refresh,
    /// One-time numeric activation code
    Activation,
}

impl TokenKind {
    pub const SESSION: &'static [TokenKind] = &[TokenKind::Access, TokenKind::Refresh];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Activation => "activation",
        }
    }

}

impl std::str::FromStr for TokenKind {
    type Err = TutorixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            "activation" => Ok(TokenKind::Activation),
            _ => Err(TutorixError::Token(format!("Unknown token kind {s}"))),
        }
    }
}

/// Persisted token record
///
/// Every token belongs to exactly one user. Records are marked expired,
/// revoked or validated but never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// SHA-256 hex digest of the token value
    pub token_hash: String,

    pub kind: TokenKind,

    pub expired: bool,

    pub revoked: bool,

    pub created_at: DateTime<Utc>,

    /// Time-based expiry, if any
    pub expires_at: Option<DateTime<Utc>>,

    /// When the token was consumed by a confirmation
    pub validated_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Create a new token record for a raw token value
    pub fn new(
        user_id: Uuid,
        value: &str,
        kind: TokenKind,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: Self::digest(value),
            kind,
            expired: false,
            revoked: false,
            created_at,
            expires_at,
            validated_at: None,
        }
    }

    /// Digest under which a token value is stored and looked up
    pub fn digest(value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check if the token is expired, either flagged or past its expiry time
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub fn is_validated(&self) -> bool {
        self.validated_at.is_some()
    }

    /// Check if the token is still usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.revoked || self.is_expired_at(now) {
            return false;
        }
        !(self.kind == TokenKind::Activation && self.is_validated())
    }

    /// Mark the token as expired and revoked
    pub fn revoke(&mut self) {
        self.expired = true;
        self.revoked = true;
    }
}

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "First name is mandatory"))]
    pub first_name: String,

    #[validate(length(min = 1, message = "Last name is mandatory"))]
    pub last_name: String,

    #[validate(email(message = "Email is not well formatted"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is mandatory"))]
    pub password: String,

    /// Requested role; anything but the default role is refused unless
    /// role selection is enabled
    #[serde(default)]
    pub role: Option<Role>,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthenticationRequest {
    #[validate(email(message = "Email is not well formatted"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is mandatory"))]
    pub password: String,
}

/// Password change request for the authenticated user
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,

    #[validate(length(min = 1, message = "New password is mandatory"))]
    pub new_password: String,

    pub confirmation_password: String,
}

/// Tokens handed back to the caller, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of a confirmation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// Account enabled by this call
    Confirmed,
    /// Token had been used before; nothing changed
    AlreadyConfirmed,
    /// Token was expired; a new one was issued and mailed
    ExpiredReissued,
}

impl ConfirmationOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            ConfirmationOutcome::Confirmed => "Your account has been successfully activated",
            ConfirmationOutcome::AlreadyConfirmed => "Your account has already been activated",
            ConfirmationOutcome::ExpiredReissued => {
                "Token expired, a new token has been sent to your email"
            }
        }
    }
}

/// Run the declared constraints of a request, reporting every violation
pub fn validate_request<T: Validate>(request: &T) -> Result<(), TutorixError> {
    request
        .validate()
        .map_err(|errors| TutorixError::Validation(violations(&errors)))
}

/// Flatten validator errors into field violations sorted by field name
pub fn violations(errors: &ValidationErrors) -> Vec<FieldViolation> {
    let mut violations: Vec<FieldViolation> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |error| {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("failed validation: {}", error.code));
                FieldViolation::new(field.to_string(), message)
            })
        })
        .collect();
    violations.sort_by(|a, b| a.field.cmp(&b.field).then(a.message.cmp(&b.message)));
    violations
}
