//! PostgreSQL implementations of the authentication repositories
//!
//! Email uniqueness is enforced by a `UNIQUE` constraint; token rotation
//! runs inside a single transaction.

use super::models::{Token, TokenKind, User};
use super::repository::{RepositoryError, TokenStore, UserDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tutorix_core::Role;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        roles TEXT[] NOT NULL DEFAULT '{}',
        enabled BOOLEAN NOT NULL DEFAULT FALSE,
        locked BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tokens (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id),
        token_hash TEXT NOT NULL,
        kind TEXT NOT NULL,
        expired BOOLEAN NOT NULL DEFAULT FALSE,
        revoked BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ,
        validated_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS tokens_token_hash_idx ON tokens (token_hash)",
    "CREATE INDEX IF NOT EXISTS tokens_user_id_idx ON tokens (user_id)",
];

/// Condition matching records that are still valid at `$now`
const VALID_AT: &str = r#"
    NOT expired
    AND NOT revoked
    AND (expires_at IS NULL OR expires_at > $2)
    AND NOT (kind = 'activation' AND validated_at IS NOT NULL)
"#;

/// Create the tables used by the PostgreSQL stores if they do not exist
pub async fn ensure_schema(pool: &PgPool) -> Result<(), RepositoryError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| RepositoryError::DatabaseError(format!("Failed to create schema: {e}")))?;
    }
    Ok(())
}

fn database_error(context: &str, err: sqlx::Error) -> RepositoryError {
    RepositoryError::DatabaseError(format!("{context}: {err}"))
}

/// Internal user record from database
#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRecord {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: String,
    password_hash: String,
    roles: Vec<String>,
    enabled: bool,
    locked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        let roles = record
            .roles
            .iter()
            .map(|name| {
                Role::from_name(name)
                    .ok_or_else(|| RepositoryError::InvalidRecord(format!("unknown role {name}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(User {
            id: record.id,
            first_name: record.first_name,
            last_name: record.last_name,
            email: record.email,
            password_hash: record.password_hash,
            roles,
            enabled: record.enabled,
            locked: record.locked,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Token record from database
#[derive(Debug, Clone, sqlx::FromRow)]
struct TokenRecord {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    kind: String,
    expired: bool,
    revoked: bool,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    validated_at: Option<DateTime<Utc>>,
}

impl TryFrom<TokenRecord> for Token {
    type Error = RepositoryError;

    fn try_from(record: TokenRecord) -> Result<Self, Self::Error> {
        let kind = record
            .kind
            .parse::<TokenKind>()
            .map_err(|e| RepositoryError::InvalidRecord(e.to_string()))?;

        Ok(Token {
            id: record.id,
            user_id: record.user_id,
            token_hash: record.token_hash,
            kind,
            expired: record.expired,
            revoked: record.revoked,
            created_at: record.created_at,
            expires_at: record.expires_at,
            validated_at: record.validated_at,
        })
    }
}

const USER_COLUMNS: &str =
    "id, first_name, last_name, email, password_hash, roles, enabled, locked, created_at, updated_at";

const TOKEN_COLUMNS: &str =
    "id, user_id, token_hash, kind, expired, revoked, created_at, expires_at, validated_at";

fn role_names(user: &User) -> Vec<String> {
    user.roles.iter().map(|r| r.as_str().to_string()).collect()
}

/// User directory backed by PostgreSQL
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, UserRecord>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to fetch user", e))?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to fetch user", e))?
            .map(User::try_from)
            .transpose()
    }

    async fn insert(&self, user: User) -> Result<User, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash, roles, enabled, locked, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(role_names(&user))
        .bind(user.enabled)
        .bind(user.locked)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RepositoryError::EmailAlreadyExists(user.email))
            }
            Err(e) => Err(database_error("Failed to create user", e)),
        }
    }

    async fn save(&self, mut user: User) -> Result<User, RepositoryError> {
        user.updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users SET
                first_name = $2,
                last_name = $3,
                email = $4,
                password_hash = $5,
                roles = $6,
                enabled = $7,
                locked = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(role_names(&user))
        .bind(user.enabled)
        .bind(user.locked)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(RepositoryError::UserNotFound),
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RepositoryError::EmailAlreadyExists(user.email))
            }
            Err(e) => Err(database_error("Failed to update user", e)),
        }
    }
}

/// Token store backed by PostgreSQL
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn upsert_token<'e, E>(executor: E, token: &Token) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO tokens (id, user_id, token_hash, kind, expired, revoked, created_at, expires_at, validated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            expired = EXCLUDED.expired,
            revoked = EXCLUDED.revoked,
            expires_at = EXCLUDED.expires_at,
            validated_at = EXCLUDED.validated_at
        "#,
    )
    .bind(token.id)
    .bind(token.user_id)
    .bind(&token.token_hash)
    .bind(token.kind.as_str())
    .bind(token.expired)
    .bind(token.revoked)
    .bind(token.created_at)
    .bind(token.expires_at)
    .bind(token.validated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn save(&self, token: Token) -> Result<Token, RepositoryError> {
        upsert_token(&self.pool, &token)
            .await
            .map_err(|e| database_error("Failed to store token", e))?;
        Ok(token)
    }

    async fn save_all(&self, tokens: Vec<Token>) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("Failed to begin transaction", e))?;

        for token in &tokens {
            upsert_token(&mut *tx, token)
                .await
                .map_err(|e| database_error("Failed to store token", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| database_error("Failed to commit tokens", e))
    }

    async fn find_by_token(&self, value: &str) -> Result<Option<Token>, RepositoryError> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_hash = $1 ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, TokenRecord>(&query)
            .bind(Token::digest(value))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to fetch token", e))?
            .map(Token::try_from)
            .transpose()
    }

    async fn find_all_valid(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Token>, RepositoryError> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE user_id = $1 AND {VALID_AT}");
        sqlx::query_as::<_, TokenRecord>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database_error("Failed to fetch tokens", e))?
            .into_iter()
            .map(Token::try_from)
            .collect()
    }

    async fn rotate(
        &self,
        user_id: Uuid,
        revoke_kinds: &[TokenKind],
        new_tokens: Vec<Token>,
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let kinds: Vec<String> = revoke_kinds.iter().map(|k| k.as_str().to_string()).collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("Failed to begin transaction", e))?;

        let query = format!(
            "UPDATE tokens SET expired = TRUE, revoked = TRUE WHERE user_id = $1 AND kind = ANY($3) AND {VALID_AT}"
        );
        let revoked = sqlx::query(&query)
            .bind(user_id)
            .bind(now)
            .bind(&kinds)
            .execute(&mut *tx)
            .await
            .map_err(|e| database_error("Failed to revoke tokens", e))?
            .rows_affected();

        for token in &new_tokens {
            upsert_token(&mut *tx, token)
                .await
                .map_err(|e| database_error("Failed to store token", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| database_error("Failed to commit token rotation", e))?;

        Ok(revoked as usize)
    }
}
