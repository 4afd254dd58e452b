//! Authentication service layer
//!
//! Business logic for registration, login, token refresh, logout, account
//! confirmation and password changes. Storage, hashing and mail delivery are
//! reached through the traits in `repository`, `password` and `mailer`.
//!
//! Every operation reads the clock once and evaluates token validity against
//! that single instant.

use super::jwt::{JwtService, TokenUse, MAX_TOKEN_LIFETIME_SECS};
use super::mailer::{MailDispatcher, MailMessage, Notifier};
use super::models::{
    validate_request, AuthenticationRequest, AuthenticationResponse, ChangePasswordRequest,
    ConfirmationOutcome, RegisterRequest, Token, TokenKind, User, UserPublic,
};
use super::password::CredentialHasher;
use super::repository::{TokenStore, UserDirectory};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tutorix_core::{
    AppConfig, ConfirmationMode, MailConfig, RegistrationConfig, Result, Role, RoleCatalog,
    TutorixError,
};
use uuid::Uuid;

/// Attempts at drawing an activation code that no pending code uses
const MAX_CODE_ATTEMPTS: usize = 10;

/// Result of a successful registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub user: UserPublic,
    /// Issued only when accounts are confirmed by link
    #[serde(flatten)]
    pub tokens: Option<AuthenticationResponse>,
}

/// Extract the token of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn generate_activation_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Authentication service
pub struct AuthService {
    users: Arc<dyn UserDirectory>,
    tokens: Arc<dyn TokenStore>,
    hasher: Arc<dyn CredentialHasher>,
    jwt: JwtService,
    mailer: MailDispatcher,
    roles: RoleCatalog,
    default_role: Role,
    registration: RegistrationConfig,
    mail: MailConfig,
}

impl AuthService {
    /// Wire the service from its collaborators
    ///
    /// Fails with `RoleNotInitialized` when the configured default role is
    /// not part of the configured role catalog.
    pub fn new(
        users: Arc<dyn UserDirectory>,
        tokens: Arc<dyn TokenStore>,
        hasher: Arc<dyn CredentialHasher>,
        notifier: Arc<dyn Notifier>,
        config: &AppConfig,
    ) -> Result<Self> {
        let roles = RoleCatalog::from_names(&config.security.roles)?;
        let default_role = config.registration.default_role.parse::<Role>()?;
        roles.resolve(default_role)?;

        Ok(Self {
            users,
            tokens,
            hasher,
            jwt: JwtService::new(config.jwt.clone().into()),
            mailer: MailDispatcher::new(notifier),
            roles,
            default_role,
            registration: config.registration.clone(),
            mail: config.mail.clone(),
        })
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn confirmation_mode(&self) -> ConfirmationMode {
        self.registration.confirmation_mode
    }

    /// Register a new, disabled account and send its confirmation artifact
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration> {
        validate_request(&request)?;
        let now = Utc::now();

        let requested = request.role.unwrap_or(self.default_role);
        if requested != self.default_role && !self.registration.allow_role_selection {
            return Err(TutorixError::invalid_field(
                "role",
                "Role cannot be chosen at registration",
            ));
        }

        if self.users.find_by_email(&request.email).await?.is_some() {
            return Err(TutorixError::DuplicateEmail(request.email));
        }

        let role = self.roles.resolve(requested)?;
        let password_hash = self
            .hasher
            .hash(&request.password)
            .map_err(|e| TutorixError::Internal(e.to_string()))?;

        let user = User::new(
            request.first_name,
            request.last_name,
            request.email,
            password_hash,
            vec![role],
        );
        // The store decides races between concurrent registrations
        let user = self.users.insert(user).await?;
        info!(user_id = %user.id, email = %user.email, role = %role, "User registered");

        let tokens = match self.registration.confirmation_mode {
            ConfirmationMode::Link => {
                let (response, records) = self.issue_session(&user, now)?;
                self.tokens.save_all(records).await?;
                self.mailer.dispatch(MailMessage::confirmation(
                    &user,
                    &response.access_token,
                    &self.mail,
                ));
                Some(response)
            }
            ConfirmationMode::Code => {
                self.send_activation_code(&user, now).await?;
                None
            }
        };

        Ok(Registration {
            user: user.to_public(),
            tokens,
        })
    }

    /// Verify credentials and start a new session
    ///
    /// A missing user and a wrong password are indistinguishable to the
    /// caller. Previously valid session tokens stop being valid.
    pub async fn authenticate(
        &self,
        request: AuthenticationRequest,
    ) -> Result<AuthenticationResponse> {
        validate_request(&request)?;
        let now = Utc::now();

        let user = self
            .users
            .find_by_email(&request.email)
            .await?
            .ok_or(TutorixError::BadCredentials)?;

        let matches = self
            .hasher
            .matches(&request.password, &user.password_hash)
            .map_err(|e| TutorixError::Internal(e.to_string()))?;
        if !matches {
            debug!(email = %request.email, "Password mismatch");
            return Err(TutorixError::BadCredentials);
        }

        if user.locked {
            return Err(TutorixError::AccountLocked);
        }
        if !user.enabled {
            return Err(TutorixError::AccountDisabled);
        }

        let (response, records) = self.issue_session(&user, now)?;
        let revoked = self
            .tokens
            .rotate(user.id, TokenKind::SESSION, records, now)
            .await?;

        info!(user_id = %user.id, revoked, "User authenticated");
        Ok(response)
    }

    /// Exchange a refresh token for a new access token
    ///
    /// Returns `Ok(None)` without touching any state when the header is
    /// missing or malformed, when the token is not an acceptable refresh
    /// token, or when the account is disabled or locked. An unknown subject
    /// is an error.
    pub async fn refresh_token(
        &self,
        authorization: Option<&str>,
    ) -> Result<Option<AuthenticationResponse>> {
        let Some(refresh_token) = bearer_token(authorization) else {
            return Ok(None);
        };
        let now = Utc::now();

        let email = match self.jwt.subject_of(refresh_token) {
            Ok(email) => email,
            Err(e) => {
                debug!(error = %e, "Unreadable refresh token");
                return Ok(None);
            }
        };

        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(TutorixError::UserNotFound)?;

        if !self.jwt.verify_use(refresh_token, &user, TokenUse::Refresh) {
            debug!(user_id = %user.id, "Refresh token rejected");
            return Ok(None);
        }

        if user.locked || !user.enabled {
            debug!(user_id = %user.id, "Refresh for inactive account ignored");
            return Ok(None);
        }

        match self.tokens.find_by_token(refresh_token).await? {
            Some(record)
                if record.kind == TokenKind::Refresh
                    && record.user_id == user.id
                    && record.is_valid_at(now) => {}
            _ => {
                debug!(user_id = %user.id, "Refresh token revoked or unknown");
                return Ok(None);
            }
        }

        let access_token = self.issue_access(&user)?;
        let record = Token::new(
            user.id,
            &access_token,
            TokenKind::Access,
            now,
            Some(self.expiry(now, self.jwt.config().access_expiration_secs)),
        );
        self.tokens
            .rotate(user.id, &[TokenKind::Access], vec![record], now)
            .await?;

        info!(user_id = %user.id, "Access token refreshed");
        Ok(Some(AuthenticationResponse {
            access_token,
            refresh_token: refresh_token.to_string(),
        }))
    }

    /// Revoke the presented bearer token
    ///
    /// Never fails: missing headers and unknown tokens are ignored, storage
    /// errors are logged. Returns the owner of the revoked token.
    pub async fn logout(&self, authorization: Option<&str>) -> Option<Uuid> {
        let token = bearer_token(authorization)?;

        match self.tokens.find_by_token(token).await {
            Ok(Some(mut record)) => {
                record.revoke();
                let user_id = record.user_id;
                match self.tokens.save(record).await {
                    Ok(_) => {
                        info!(user_id = %user_id, "Token revoked on logout");
                        Some(user_id)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to revoke token on logout");
                        None
                    }
                }
            }
            Ok(None) => {
                debug!("Logout with unknown token");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to look up token on logout");
                None
            }
        }
    }

    /// Confirm an account with the token mailed in its confirmation link
    pub async fn confirm(&self, token: &str) -> Result<ConfirmationOutcome> {
        let now = Utc::now();

        let mut record = match self.tokens.find_by_token(token).await? {
            Some(record) if record.kind == TokenKind::Access => record,
            _ => return Err(TutorixError::TokenNotFound),
        };

        if record.is_validated() {
            return Ok(ConfirmationOutcome::AlreadyConfirmed);
        }

        let mut user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(TutorixError::UserNotFound)?;

        if record.revoked || record.is_expired_at(now) || self.jwt.is_expired(token) {
            if user.enabled {
                return Ok(ConfirmationOutcome::AlreadyConfirmed);
            }

            let access_token = self.issue_access(&user)?;
            let fresh = Token::new(
                user.id,
                &access_token,
                TokenKind::Access,
                now,
                Some(self.expiry(now, self.jwt.config().access_expiration_secs)),
            );
            self.tokens
                .rotate(user.id, TokenKind::SESSION, vec![fresh], now)
                .await?;
            self.mailer
                .dispatch(MailMessage::confirmation(&user, &access_token, &self.mail));

            info!(user_id = %user.id, "Confirmation token expired, new one sent");
            return Ok(ConfirmationOutcome::ExpiredReissued);
        }

        user.enabled = true;
        self.users.save(user).await?;
        record.validated_at = Some(now);
        self.tokens.save(record.clone()).await?;

        info!(user_id = %record.user_id, "Account confirmed");
        Ok(ConfirmationOutcome::Confirmed)
    }

    /// Activate an account with a mailed numeric code
    ///
    /// An expired code is replaced by a freshly mailed one before
    /// `TokenExpired` is returned.
    pub async fn activate_account(&self, code: &str) -> Result<ConfirmationOutcome> {
        let now = Utc::now();

        let mut record = match self.tokens.find_by_token(code).await? {
            Some(record) if record.kind == TokenKind::Activation => record,
            _ => return Err(TutorixError::TokenNotFound),
        };

        if record.is_validated() {
            return Ok(ConfirmationOutcome::AlreadyConfirmed);
        }

        let mut user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(TutorixError::UserNotFound)?;

        if record.revoked || record.is_expired_at(now) {
            self.send_activation_code(&user, now).await?;
            info!(user_id = %user.id, "Activation code expired, new one sent");
            return Err(TutorixError::TokenExpired);
        }

        user.enabled = true;
        self.users.save(user).await?;
        record.validated_at = Some(now);
        self.tokens.save(record.clone()).await?;

        info!(user_id = %record.user_id, "Account activated");
        Ok(ConfirmationOutcome::Confirmed)
    }

    /// Change the password of an authenticated user
    pub async fn change_password(
        &self,
        user_id: Uuid,
        request: ChangePasswordRequest,
    ) -> Result<UserPublic> {
        validate_request(&request)?;

        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(TutorixError::UserNotFound)?;

        let matches = self
            .hasher
            .matches(&request.current_password, &user.password_hash)
            .map_err(|e| TutorixError::Internal(e.to_string()))?;
        if !matches {
            return Err(TutorixError::BadCredentials);
        }

        if request.new_password != request.confirmation_password {
            return Err(TutorixError::invalid_field(
                "confirmation_password",
                "Passwords are not the same",
            ));
        }

        user.password_hash = self
            .hasher
            .hash(&request.new_password)
            .map_err(|e| TutorixError::Internal(e.to_string()))?;
        let user = self.users.save(user).await?;

        info!(user_id = %user.id, "Password changed");
        Ok(user.to_public())
    }

    /// Public view of a user
    pub async fn me(&self, user_id: Uuid) -> Result<UserPublic> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(|user| user.to_public())
            .ok_or(TutorixError::UserNotFound)
    }

    /// Look up a user by the subject of a bearer token
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.find_by_email(email).await?)
    }

    /// Stored record of a token value, if any
    pub async fn find_token(&self, value: &str) -> Result<Option<Token>> {
        Ok(self.tokens.find_by_token(value).await?)
    }

    fn expiry(&self, now: DateTime<Utc>, lifetime_secs: u64) -> DateTime<Utc> {
        let secs = lifetime_secs.min(MAX_TOKEN_LIFETIME_SECS) as i64;
        now + Duration::seconds(secs)
    }

    fn issue_access(&self, user: &User) -> Result<String> {
        let mut claims = Map::new();
        claims.insert("fullName".to_string(), Value::from(user.full_name()));
        self.jwt
            .issue_access(user, claims)
            .map_err(|e| TutorixError::Token(e.to_string()))
    }

    /// Sign an access/refresh pair and build their records
    fn issue_session(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<(AuthenticationResponse, Vec<Token>)> {
        let access_token = self.issue_access(user)?;
        let refresh_token = self
            .jwt
            .issue_refresh(user)
            .map_err(|e| TutorixError::Token(e.to_string()))?;

        let config = self.jwt.config();
        let records = vec![
            Token::new(
                user.id,
                &access_token,
                TokenKind::Access,
                now,
                Some(self.expiry(now, config.access_expiration_secs)),
            ),
            Token::new(
                user.id,
                &refresh_token,
                TokenKind::Refresh,
                now,
                Some(self.expiry(now, config.refresh_expiration_secs)),
            ),
        ];

        Ok((
            AuthenticationResponse {
                access_token,
                refresh_token,
            },
            records,
        ))
    }

    /// Replace pending activation codes of `user` with a new one and mail it
    async fn send_activation_code(&self, user: &User, now: DateTime<Utc>) -> Result<()> {
        let code = self.unused_activation_code(now).await?;
        let record = Token::new(
            user.id,
            &code,
            TokenKind::Activation,
            now,
            Some(now + Duration::minutes(self.registration.activation_code_ttl_mins)),
        );
        self.tokens
            .rotate(user.id, &[TokenKind::Activation], vec![record], now)
            .await?;

        self.mailer
            .dispatch(MailMessage::activation(user, &code, &self.mail));
        Ok(())
    }

    async fn unused_activation_code(&self, now: DateTime<Utc>) -> Result<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_activation_code(self.registration.activation_code_length);
            match self.tokens.find_by_token(&code).await? {
                Some(existing) if existing.is_valid_at(now) => continue,
                _ => return Ok(code),
            }
        }
        Err(TutorixError::Internal(
            "Could not generate an unused activation code".to_string(),
        ))
    }
}
