//! Authentication and authorization module
//!
//! This module provides JWT-based authentication with the following components:
//! - Token generation and validation
//! - Password hashing with Argon2
//! - Middleware for request authentication and authority checks
//! - Authentication service: registration, login, refresh, logout, confirmation
//! - Domain models for users and persisted tokens
//! - Repository layer with in-memory and PostgreSQL stores
//! - Outgoing account mail

pub mod jwt;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod password;
pub mod postgres;
pub mod repository;
pub mod service;

pub use jwt::{Claims, JwtConfig, JwtError, JwtService, TokenUse};
pub use mailer::{
    notifier_from_config, HttpRelayNotifier, LogNotifier, MailDispatcher, MailError, MailMessage,
    MailTemplate, MemoryNotifier, Notifier,
};
pub use middleware::{
    auth_middleware, require_any_authority, require_authority, AuthError, AuthenticatedUser,
};
pub use models::{
    AuthenticationRequest, AuthenticationResponse, ChangePasswordRequest, ConfirmationOutcome,
    RegisterRequest, Token, TokenKind, User, UserPublic,
};
pub use password::{Argon2Hasher, CredentialHasher, PasswordConfig, PasswordError};
pub use postgres::{ensure_schema, PgTokenStore, PgUserDirectory};
pub use repository::{
    MemoryTokenStore, MemoryUserDirectory, RepositoryError, TokenStore, UserDirectory,
};
pub use service::{bearer_token, AuthService, Registration};
