//! Tutorix Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// JWT signing settings
    pub jwt: JwtSettings,

    /// Outgoing mail settings
    pub mail: MailConfig,

    /// Registration and confirmation workflow
    pub registration: RegistrationConfig,

    /// Roles and account protection
    pub security: SecurityConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|message| ConfigError::ParseError { path, message })
    }

    fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overwrite every setting whose variable `var` yields a value
    fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Server
        if let Some(host) = var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("API_PORT") {
            self.server.port = parse_var("API_PORT", port)?;
        }
        if let Some(cors) = var("API_CORS_ENABLED") {
            self.server.cors_enabled = parse_var("API_CORS_ENABLED", cors)?;
        }

        // PostgreSQL
        if let Some(url) = var("DATABASE_URL") {
            self.database.postgres_url = Some(url);
        }
        if let Some(size) = var("DATABASE_POOL_SIZE") {
            self.database.pool_size = parse_var("DATABASE_POOL_SIZE", size)?;
        }

        // JWT
        if let Some(secret) = var("JWT_SECRET") {
            self.jwt.secret = secret;
        }
        if let Some(secs) = var("JWT_ACCESS_EXPIRATION_SECS") {
            self.jwt.access_expiration_secs = parse_var("JWT_ACCESS_EXPIRATION_SECS", secs)?;
        }
        if let Some(secs) = var("JWT_REFRESH_EXPIRATION_SECS") {
            self.jwt.refresh_expiration_secs = parse_var("JWT_REFRESH_EXPIRATION_SECS", secs)?;
        }
        if let Some(issuer) = var("JWT_ISSUER") {
            self.jwt.issuer = issuer;
        }

        // Mail
        if let Some(url) = var("MAIL_RELAY_URL") {
            self.mail.relay_url = Some(url);
        }
        if let Some(from) = var("MAIL_FROM") {
            self.mail.from_address = from;
        }
        if let Some(url) = var("CONFIRMATION_URL") {
            self.mail.confirmation_url = url;
        }
        if let Some(url) = var("ACTIVATION_URL") {
            self.mail.activation_url = url;
        }

        // Registration
        if let Some(mode) = var("CONFIRMATION_MODE") {
            self.registration.confirmation_mode = mode.parse()?;
        }
        if let Some(role) = var("DEFAULT_ROLE") {
            self.registration.default_role = role;
        }
        if let Some(allow) = var("ALLOW_ROLE_SELECTION") {
            self.registration.allow_role_selection = parse_var("ALLOW_ROLE_SELECTION", allow)?;
        }

        // Roles initialised at boot (comma-separated)
        if let Some(roles) = var("ROLES") {
            self.security.roles = roles
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Logging
        if let Some(level) = var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = var("LOG_JSON") {
            self.logging.json_format = parse_var("LOG_JSON", json)?;
        }

        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

/// Database connection configuration
///
/// Without a PostgreSQL URL the service keeps users and tokens in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub postgres_url: Option<String>,

    /// PostgreSQL connection pool size
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            pool_size: 10,
        }
    }
}

/// JWT signing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// Secret key for HMAC signing
    pub secret: String,

    /// Access token lifetime in seconds
    pub access_expiration_secs: u64,

    /// Refresh token lifetime in seconds
    pub refresh_expiration_secs: u64,

    /// Token issuer identifier
    pub issuer: String,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: "development-secret-key-change-in-production".to_string(),
            access_expiration_secs: 86_400,   // 1 day
            refresh_expiration_secs: 604_800, // 7 days
            issuer: "tutorix".to_string(),
        }
    }
}

/// Outgoing mail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// HTTP mail relay endpoint; messages are only logged when unset
    pub relay_url: Option<String>,

    /// Sender address
    pub from_address: String,

    /// Confirmation link, `{token}` is replaced by the issued token
    pub confirmation_url: String,

    /// Frontend page where activation codes are entered
    pub activation_url: String,

    /// Subject of the confirmation link mail
    pub confirmation_subject: String,

    /// Subject of the activation code mail
    pub activation_subject: String,

    /// Relay request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            from_address: "no-reply@tutorix.local".to_string(),
            confirmation_url: "http://localhost:8080/api/v1/auth/confirm?token={token}"
                .to_string(),
            activation_url: "http://localhost:4200/activate-account".to_string(),
            confirmation_subject: "Welcome to Tutorix".to_string(),
            activation_subject: "Account Activation".to_string(),
            timeout_secs: 10,
        }
    }
}

/// How a freshly registered account proves ownership of its email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationMode {
    /// Signed JWT embedded in a confirmation link
    Link,
    /// Short numeric code with a fixed lifetime
    Code,
}

impl std::str::FromStr for ConfirmationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "link" => Ok(Self::Link),
            "code" => Ok(Self::Code),
            _ => Err(ConfigError::InvalidValue {
                key: "CONFIRMATION_MODE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Registration and confirmation workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Confirmation artifact issued at registration
    pub confirmation_mode: ConfirmationMode,

    /// Number of digits in an activation code
    pub activation_code_length: usize,

    /// Activation code lifetime in minutes
    pub activation_code_ttl_mins: i64,

    /// Role assigned to every self-registered account
    pub default_role: String,

    /// Honor a role named in the registration request
    pub allow_role_selection: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            confirmation_mode: ConfirmationMode::Code,
            activation_code_length: 6,
            activation_code_ttl_mins: 15,
            default_role: "USER".to_string(),
            allow_role_selection: false,
        }
    }
}

/// Roles and account protection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Roles initialised at boot
    pub roles: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            roles: vec!["USER".to_string(), "ADMIN".to_string(), "MANAGER".to_string()],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.registration.activation_code_length, 6);
        assert_eq!(config.registration.activation_code_ttl_mins, 15);
        assert_eq!(config.registration.confirmation_mode, ConfirmationMode::Code);
        assert!(config.database.postgres_url.is_none());
        assert_eq!(config.security.roles.len(), 3);
        assert!(!config.registration.allow_role_selection);
    }

    #[test]
    fn test_confirmation_mode_parse() {
        assert_eq!(
            "link".parse::<ConfirmationMode>().unwrap(),
            ConfirmationMode::Link
        );
        assert_eq!(
            "CODE".parse::<ConfirmationMode>().unwrap(),
            ConfirmationMode::Code
        );
        assert!("sms".parse::<ConfirmationMode>().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            port = 9090

            [registration]
            confirmation_mode = "link"

            [jwt]
            secret = "from-file"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.registration.confirmation_mode, ConfirmationMode::Link);
        assert_eq!(config.registration.default_role, "USER");
        assert_eq!(config.jwt.secret, "from-file");
        assert_eq!(config.jwt.issuer, "tutorix");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let file = AppConfig::from_toml_str(
            r#"
            [jwt]
            secret = "from-file"
            access_expiration_secs = 60
            issuer = "file-issuer"

            [registration]
            default_role = "MANAGER"

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("JWT_ACCESS_EXPIRATION_SECS", "900"),
            ("JWT_ISSUER", "env-issuer"),
            ("DEFAULT_ROLE", "USER"),
            ("ROLES", "USER, ADMIN"),
            ("LOG_LEVEL", "debug"),
            ("LOG_JSON", "true"),
            ("MAIL_FROM", "team@tutorix.dev"),
            ("CONFIRMATION_URL", "https://tutorix.dev/confirm?token={token}"),
            ("ACTIVATION_URL", "https://tutorix.dev/activate"),
            ("ALLOW_ROLE_SELECTION", "true"),
        ]
        .into_iter()
        .collect();

        let config = file
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.jwt.secret, "from-file");
        assert_eq!(config.jwt.access_expiration_secs, 900);
        assert_eq!(config.jwt.issuer, "env-issuer");
        assert_eq!(config.registration.default_role, "USER");
        assert!(config.registration.allow_role_selection);
        assert_eq!(config.security.roles, vec!["USER", "ADMIN"]);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.mail.from_address, "team@tutorix.dev");
        assert_eq!(config.mail.confirmation_url, "https://tutorix.dev/confirm?token={token}");
        assert_eq!(config.mail.activation_url, "https://tutorix.dev/activate");
    }

    #[test]
    fn test_invalid_env_value() {
        let result = AppConfig::default().apply_env(|key| {
            (key == "API_PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { key, .. }) if key == "API_PORT"));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::from_file("/nonexistent/tutorix.toml");
        assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
    }
}
