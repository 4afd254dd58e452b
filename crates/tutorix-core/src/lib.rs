//! Tutorix Core - Shared error types, configuration and permission model
//!
//! This crate defines the core abstractions used by the Tutorix services:
//! - Error taxonomy for authentication and token lifecycle operations
//! - Role and permission tables consumed by the authorization layer
//! - Configuration management

pub mod config;
pub mod security;

pub use config::{
    AppConfig, ConfigError, ConfirmationMode, DatabaseConfig, JwtSettings, LoggingConfig,
    MailConfig, RegistrationConfig, SecurityConfig, ServerConfig,
};
pub use security::{authorities_for, Permission, Role, RoleCatalog};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// A single violated input constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Name of the offending field
    pub field: String,
    /// Human-readable constraint message
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Core error types for Tutorix operations
#[derive(Error, Debug)]
pub enum TutorixError {
    #[error("Validation failed: {}", format_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("Email [{0}] is already taken")]
    DuplicateEmail(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Bad credentials")]
    BadCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Account is locked")]
    AccountLocked,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Activation token has expired. A new token has been sent to the same email address")]
    TokenExpired,

    #[error("Role {0} wasn't initialized")]
    RoleNotInitialized(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TutorixError {
    /// Build a validation error for a single field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldViolation::new(field, message)])
    }
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, TutorixError>;
