//! Application state management

use crate::auth::{
    ensure_schema, notifier_from_config, Argon2Hasher, AuthService, CredentialHasher,
    MemoryNotifier, MemoryTokenStore, MemoryUserDirectory, Notifier, PasswordConfig,
    PgTokenStore, PgUserDirectory,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tutorix_core::{AppConfig, TutorixError};

/// Where users and tokens are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Postgres => "postgres",
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Authentication workflow
    pub auth: AuthService,
    /// Active persistence backend
    pub storage: StorageBackend,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, auth: AuthService, storage: StorageBackend) -> Self {
        Self {
            config,
            auth,
            storage,
            start_time: Instant::now(),
        }
    }

    /// State backed by in-memory stores
    pub fn in_memory(config: AppConfig) -> Result<Self, TutorixError> {
        let notifier =
            notifier_from_config(&config.mail).map_err(|e| TutorixError::Internal(e.to_string()))?;
        Self::in_memory_with(config, notifier, Arc::new(Argon2Hasher::default()))
    }

    /// In-memory state with explicit mail and hashing collaborators
    pub fn in_memory_with(
        config: AppConfig,
        notifier: Arc<dyn Notifier>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Result<Self, TutorixError> {
        let auth = AuthService::new(
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(MemoryTokenStore::new()),
            hasher,
            notifier,
            &config,
        )?;
        Ok(Self::new(config, auth, StorageBackend::Memory))
    }

    /// State backed by PostgreSQL at `database_url`
    pub async fn with_postgres(
        config: AppConfig,
        database_url: &str,
    ) -> Result<Self, TutorixError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.pool_size)
            .connect(database_url)
            .await
            .map_err(|e| TutorixError::Database(format!("Failed to connect: {e}")))?;
        ensure_schema(&pool).await?;
        info!(pool_size = config.database.pool_size, "Connected to PostgreSQL");

        let notifier =
            notifier_from_config(&config.mail).map_err(|e| TutorixError::Internal(e.to_string()))?;
        let auth = AuthService::new(
            Arc::new(PgUserDirectory::new(pool.clone())),
            Arc::new(PgTokenStore::new(pool)),
            Arc::new(Argon2Hasher::default()),
            notifier,
            &config,
        )?;
        Ok(Self::new(config, auth, StorageBackend::Postgres))
    }

    /// Build state from configuration: PostgreSQL when a URL is set,
    /// in-memory stores otherwise
    pub async fn from_config(config: AppConfig) -> Result<Self, TutorixError> {
        match config.database.postgres_url.clone() {
            Some(url) => Self::with_postgres(config, &url).await,
            None => {
                info!("No database configured, using in-memory stores");
                Self::in_memory(config)
            }
        }
    }

    /// In-memory state for tests: fast hashing, mail kept in `mailbox`
    pub fn for_testing(
        config: AppConfig,
        mailbox: Arc<MemoryNotifier>,
    ) -> Result<Self, TutorixError> {
        Self::in_memory_with(
            config,
            mailbox,
            Arc::new(Argon2Hasher::new(PasswordConfig::fast())),
        )
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
