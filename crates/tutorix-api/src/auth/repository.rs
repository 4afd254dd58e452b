//! Authentication repository layer
//!
//! This module defines the storage contracts the authentication service
//! depends on, plus in-memory implementations used by default and in tests:
//! - `UserDirectory`: user records, unique by email
//! - `TokenStore`: session, refresh and activation token records
//!
//! The PostgreSQL implementations live in `auth::postgres`.

use super::models::{Token, TokenKind, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tutorix_core::TutorixError;
use uuid::Uuid;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Email [{0}] is already taken")]
    EmailAlreadyExists(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid stored value: {0}")]
    InvalidRecord(String),
}

impl From<RepositoryError> for TutorixError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::EmailAlreadyExists(email) => TutorixError::DuplicateEmail(email),
            RepositoryError::UserNotFound => TutorixError::UserNotFound,
            RepositoryError::DatabaseError(msg) => TutorixError::Database(msg),
            RepositoryError::InvalidRecord(msg) => TutorixError::Database(msg),
        }
    }
}

/// Durable user records
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Insert a new user
    ///
    /// Fails with `EmailAlreadyExists` when the email is taken. This check is
    /// the source of truth for uniqueness: of two racing inserts exactly one
    /// succeeds.
    async fn insert(&self, user: User) -> Result<User, RepositoryError>;

    /// Persist changes to an existing user
    async fn save(&self, user: User) -> Result<User, RepositoryError>;
}

/// Durable token records
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or update a single record
    async fn save(&self, token: Token) -> Result<Token, RepositoryError>;

    /// Insert or update several records in one step
    async fn save_all(&self, tokens: Vec<Token>) -> Result<(), RepositoryError>;

    /// Look up a record by its raw token value
    ///
    /// When several records share a value the most recent one is returned.
    async fn find_by_token(&self, value: &str) -> Result<Option<Token>, RepositoryError>;

    /// Every record of `user_id` still valid at `now`
    async fn find_all_valid(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Token>, RepositoryError>;

    /// Revoke the user's valid tokens of the given kinds and insert
    /// `new_tokens`, atomically. Returns the number of revoked records.
    async fn rotate(
        &self,
        user_id: Uuid,
        revoke_kinds: &[TokenKind],
        new_tokens: Vec<Token>,
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;
}

#[derive(Default)]
struct UserTable {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

/// In-memory user directory
#[derive(Default)]
pub struct MemoryUserDirectory {
    table: RwLock<UserTable>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    pub async fn len(&self) -> usize {
        self.table.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let table = self.table.read().await;
        Ok(table
            .by_email
            .get(email)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.table.read().await.by_id.get(&id).cloned())
    }

    async fn insert(&self, user: User) -> Result<User, RepositoryError> {
        let mut table = self.table.write().await;
        if table.by_email.contains_key(&user.email) {
            return Err(RepositoryError::EmailAlreadyExists(user.email));
        }
        table.by_email.insert(user.email.clone(), user.id);
        table.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, mut user: User) -> Result<User, RepositoryError> {
        let mut table = self.table.write().await;
        let previous_email = match table.by_id.get(&user.id) {
            Some(existing) => existing.email.clone(),
            None => return Err(RepositoryError::UserNotFound),
        };

        if previous_email != user.email {
            if table.by_email.contains_key(&user.email) {
                return Err(RepositoryError::EmailAlreadyExists(user.email));
            }
            table.by_email.remove(&previous_email);
            table.by_email.insert(user.email.clone(), user.id);
        }

        user.updated_at = Utc::now();
        table.by_id.insert(user.id, user.clone());
        Ok(user)
    }
}

/// In-memory token store
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<Uuid, Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record owned by `user_id`, oldest first
    pub async fn tokens_of(&self, user_id: Uuid) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        tokens
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, token: Token) -> Result<Token, RepositoryError> {
        self.tokens.write().await.insert(token.id, token.clone());
        Ok(token)
    }

    async fn save_all(&self, tokens: Vec<Token>) -> Result<(), RepositoryError> {
        let mut table = self.tokens.write().await;
        for token in tokens {
            table.insert(token.id, token);
        }
        Ok(())
    }

    async fn find_by_token(&self, value: &str) -> Result<Option<Token>, RepositoryError> {
        let digest = Token::digest(value);
        Ok(self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| t.token_hash == digest)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn find_all_valid(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Token>, RepositoryError> {
        Ok(self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id && t.is_valid_at(now))
            .cloned()
            .collect())
    }

    async fn rotate(
        &self,
        user_id: Uuid,
        revoke_kinds: &[TokenKind],
        new_tokens: Vec<Token>,
        now: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        // One write guard covers revocation and insertion
        let mut table = self.tokens.write().await;

        let mut revoked = 0;
        for token in table.values_mut() {
            if token.user_id == user_id
                && revoke_kinds.contains(&token.kind)
                && token.is_valid_at(now)
            {
                token.revoke();
                revoked += 1;
            }
        }

        for token in new_tokens {
            table.insert(token.id, token);
        }

        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;
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

    #[tokio::test]
    async fn test_insert_and_find_user() {
        let directory = MemoryUserDirectory::new();
        let created = directory.insert(user("ada@example.com")).await.unwrap();

        let by_email = directory.find_by_email("ada@example.com").await.unwrap();
        let by_id = directory.find_by_id(created.id).await.unwrap();

        assert_eq!(by_email.unwrap().id, created.id);
        assert_eq!(by_id.unwrap().email, "ada@example.com");
        assert!(directory.find_by_email("bob@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let directory = MemoryUserDirectory::new();
        directory.insert(user("ada@example.com")).await.unwrap();

        let result = directory.insert(user("ada@example.com")).await;
        assert!(matches!(result, Err(RepositoryError::EmailAlreadyExists(_))));
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_racing_inserts_have_one_winner() {
        let directory = Arc::new(MemoryUserDirectory::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let directory = directory.clone();
                tokio::spawn(async move { directory.insert(user("race@example.com")).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_save_unknown_user() {
        let directory = MemoryUserDirectory::new();
        let result = directory.save(user("ghost@example.com")).await;
        assert!(matches!(result, Err(RepositoryError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_save_updates_user() {
        let directory = MemoryUserDirectory::new();
        let mut created = directory.insert(user("ada@example.com")).await.unwrap();

        created.enabled = true;
        directory.save(created.clone()).await.unwrap();

        let stored = directory.find_by_id(created.id).await.unwrap().unwrap();
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_find_by_token_value() {
        let store = MemoryTokenStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        store
            .save(Token::new(owner, "jwt-value", TokenKind::Access, now, None))
            .await
            .unwrap();

        let found = store.find_by_token("jwt-value").await.unwrap().unwrap();
        assert_eq!(found.user_id, owner);
        assert!(store.find_by_token("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_all_valid_skips_revoked_and_expired() {
        let store = MemoryTokenStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let valid = Token::new(owner, "a", TokenKind::Access, now, None);
        let mut revoked = Token::new(owner, "b", TokenKind::Access, now, None);
        revoked.revoke();
        let expired = Token::new(
            owner,
            "c",
            TokenKind::Activation,
            now - Duration::minutes(30),
            Some(now - Duration::minutes(15)),
        );
        let foreign = Token::new(Uuid::new_v4(), "d", TokenKind::Access, now, None);

        store
            .save_all(vec![valid.clone(), revoked, expired, foreign])
            .await
            .unwrap();

        let tokens = store.find_all_valid(owner, now).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].id, valid.id);
    }

    #[tokio::test]
    async fn test_rotate_revokes_only_requested_kinds() {
        let store = MemoryTokenStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let access = Token::new(owner, "access", TokenKind::Access, now, None);
        let refresh = Token::new(owner, "refresh", TokenKind::Refresh, now, None);
        store.save_all(vec![access, refresh]).await.unwrap();

        let replacement = Token::new(owner, "access-2", TokenKind::Access, now, None);
        let revoked = store
            .rotate(owner, &[TokenKind::Access], vec![replacement.clone()], now)
            .await
            .unwrap();

        assert_eq!(revoked, 1);
        let valid = store.find_all_valid(owner, now).await.unwrap();
        let mut kinds: Vec<_> = valid.iter().map(|t| t.kind.as_str()).collect();
        kinds.sort();
        assert_eq!(kinds, vec!["access", "refresh"]);
        assert!(valid.iter().any(|t| t.id == replacement.id));
        assert!(!store.find_by_token("access").await.unwrap().unwrap().is_valid_at(now));
    }
}
