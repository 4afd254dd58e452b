//! JWT token generation and validation
//!
//! Implements JWT-based authentication with HMAC-SHA256 signing.
//! Access and refresh tokens carry the user's email as subject and expire
//! independently of their persisted token records.

use super::models::User;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tutorix_core::JwtSettings;
use uuid::Uuid;

/// Upper bound for token lifetimes (ten years)
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 3600;

/// What a bearer token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// JWT Claims structure
///
/// Extra claims supplied at issue time are flattened into the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user email
    pub sub: String,
    /// JWT ID - unique token identifier
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// Access or refresh
    pub token_use: TokenUse,
    /// Additional claims (e.g. full name)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token format")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// JWT Configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for HMAC signing (should be at least 256 bits)
    pub secret: String,
    /// Access token expiration time in seconds
    pub access_expiration_secs: u64,
    /// Refresh token expiration time in seconds
    pub refresh_expiration_secs: u64,
    /// Token issuer identifier
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        JwtSettings::default().into()
    }
}

impl From<JwtSettings> for JwtConfig {
    fn from(settings: JwtSettings) -> Self {
        Self {
            secret: settings.secret,
            access_expiration_secs: settings.access_expiration_secs,
            refresh_expiration_secs: settings.refresh_expiration_secs,
            issuer: settings.issuer,
        }
    }
}

/// Signs and verifies bearer tokens
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.config.issuer)
            .field("access_expiration_secs", &self.config.access_expiration_secs)
            .field("refresh_expiration_secs", &self.config.refresh_expiration_secs)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Issue an access token for `user`, embedding `extra_claims`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tutorix_api::auth::jwt::{JwtConfig, JwtService};
    /// use tutorix_api::auth::models::User;
    /// use tutorix_core::Role;
    ///
    /// let jwt = JwtService::new(JwtConfig::default());
    /// let user = User::new(
    ///     "Ada".into(),
    ///     "Lovelace".into(),
    ///     "ada@example.com".into(),
    ///     "hash".into(),
    ///     vec![Role::User],
    /// );
    /// let mut claims = serde_json::Map::new();
    /// claims.insert("fullName".into(), user.full_name().into());
    /// let token = jwt.issue_access(&user, claims).expect("Failed to issue token");
    /// ```
    pub fn issue_access(
        &self,
        user: &User,
        extra_claims: Map<String, Value>,
    ) -> Result<String, JwtError> {
        self.issue(
            user,
            TokenUse::Access,
            self.config.access_expiration_secs,
            extra_claims,
        )
    }

    /// Issue a longer-lived refresh token for `user`
    pub fn issue_refresh(&self, user: &User) -> Result<String, JwtError> {
        self.issue(
            user,
            TokenUse::Refresh,
            self.config.refresh_expiration_secs,
            Map::new(),
        )
    }

    fn issue(
        &self,
        user: &User,
        token_use: TokenUse,
        lifetime_secs: u64,
        extra: Map<String, Value>,
    ) -> Result<String, JwtError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: user.email.clone(),
            jti: Uuid::new_v4().to_string(), // two tokens issued in the same second must differ
            iat: now,
            exp: now + lifetime_secs.min(MAX_TOKEN_LIFETIME_SECS),
            token_use,
            extra,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Decode and validate signature, issuer and expiry
    pub fn decode(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::InvalidToken,
            }
        })?;

        Ok(token_data.claims)
    }

    /// Subject (email) of a correctly signed token
    ///
    /// Expiry is not checked here; `verify` decides whether the token is
    /// still acceptable.
    pub fn subject_of(&self, token: &str) -> Result<String, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.validate_exp = false;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::InvalidToken,
            }
        })?;

        Ok(token_data.claims.sub)
    }

    /// Check that `token` is correctly signed, unexpired and issued to `user`
    pub fn verify(&self, token: &str, user: &User) -> bool {
        self.decode(token)
            .map(|claims| claims.sub == user.email)
            .unwrap_or(false)
    }

    /// Like `verify`, additionally requiring the given token use
    pub fn verify_use(&self, token: &str, user: &User, token_use: TokenUse) -> bool {
        self.decode(token)
            .map(|claims| claims.sub == user.email && claims.token_use == token_use)
            .unwrap_or(false)
    }

    /// Check whether a correctly signed token is past its expiry
    pub fn is_expired(&self, token: &str) -> bool {
        matches!(self.decode(token), Err(JwtError::ExpiredToken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutorix_core::Role;

    fn user(email: &str) -> User {
        User::new(
            "Test".to_string(),
            "User".to_string(),
            email.to_string(),
            "hash".to_string(),
            vec![Role::User],
        )
    }

    fn encode_expired(config: &JwtConfig, email: &str) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();

        // Issued 2 hours ago, expired 1 hour ago
        let claims = Claims {
            iss: config.issuer.clone(),
            sub: email.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now - 7200,
            exp: now - 3600,
            token_use: TokenUse::Access,
            extra: Map::new(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_issue_and_verify_token() {
        let jwt = JwtService::new(JwtConfig::default());
        let ada = user("ada@example.com");

        let mut extra = Map::new();
        extra.insert("fullName".to_string(), Value::from(ada.full_name()));
        let token = jwt.issue_access(&ada, extra).expect("Failed to issue token");

        assert!(jwt.verify(&token, &ada));
        let claims = jwt.decode(&token).unwrap();
        assert_eq!(claims.sub, "ada@example.com");
        assert_eq!(claims.iss, "tutorix");
        assert_eq!(claims.token_use, TokenUse::Access);
        assert_eq!(claims.extra["fullName"], "Test User");
    }

    #[test]
    fn test_verify_fails_for_other_user() {
        let jwt = JwtService::new(JwtConfig::default());
        let ada = user("ada@example.com");
        let bob = user("bob@example.com");

        let token = jwt.issue_access(&ada, Map::new()).unwrap();
        assert!(!jwt.verify(&token, &bob));
    }

    #[test]
    fn test_refresh_token_use() {
        let jwt = JwtService::new(JwtConfig::default());
        let ada = user("ada@example.com");

        let refresh = jwt.issue_refresh(&ada).unwrap();
        let access = jwt.issue_access(&ada, Map::new()).unwrap();

        assert!(jwt.verify_use(&refresh, &ada, TokenUse::Refresh));
        assert!(!jwt.verify_use(&access, &ada, TokenUse::Refresh));
        assert_ne!(refresh, access);
    }

    #[test]
    fn test_invalid_token() {
        let jwt = JwtService::new(JwtConfig::default());
        assert!(matches!(
            jwt.decode("invalid.token.here"),
            Err(JwtError::InvalidToken)
        ));
        assert!(jwt.subject_of("garbage").is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let jwt1 = JwtService::new(JwtConfig {
            secret: "secret1".to_string(),
            ..Default::default()
        });
        let jwt2 = JwtService::new(JwtConfig {
            secret: "secret2".to_string(),
            ..Default::default()
        });
        let ada = user("ada@example.com");

        let token = jwt1.issue_access(&ada, Map::new()).unwrap();

        assert!(matches!(jwt2.decode(&token), Err(JwtError::InvalidSignature)));
        assert!(!jwt2.verify(&token, &ada));
        assert!(jwt2.subject_of(&token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let config = JwtConfig::default();
        let jwt = JwtService::new(config.clone());
        let ada = user("ada@example.com");
        let token = encode_expired(&config, &ada.email);

        assert!(matches!(jwt.decode(&token), Err(JwtError::ExpiredToken)));
        assert!(jwt.is_expired(&token));
        assert!(!jwt.verify(&token, &ada));
        // The subject stays readable so the owner can be resolved
        assert_eq!(jwt.subject_of(&token).unwrap(), "ada@example.com");
    }

    #[test]
    fn test_oversized_lifetime_is_capped() {
        let jwt = JwtService::new(JwtConfig {
            access_expiration_secs: u64::MAX,
            ..Default::default()
        });
        let ada = user("ada@example.com");

        let token = jwt.issue_access(&ada, Map::new()).unwrap();
        let claims = jwt.decode(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, MAX_TOKEN_LIFETIME_SECS);
        assert!(jwt.verify(&token, &ada));
    }
}
