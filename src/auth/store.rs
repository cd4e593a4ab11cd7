use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Session slot: argon2 hash of the one currently-valid refresh token.
    /// `None` means no active session.
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already exists")]
    DuplicateEmail,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

/// Persistence seam for user records and the per-user session slot.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Create a user with an empty session slot. `DuplicateEmail` if taken.
    async fn create(&self, email: &str, password_hash: &str) -> Result<User, StoreError>;

    /// Unconditionally overwrite the session slot (`None` clears it).
    async fn set_refresh_hash(
        &self,
        user_id: Uuid,
        hash: Option<String>,
    ) -> Result<(), StoreError>;

    /// Compare-and-swap on the session slot: writes `next` only if the
    /// stored value still equals `expected`. Returns whether the swap won.
    /// Concurrent refresh calls race here; at most one can succeed.
    async fn swap_refresh_hash(
        &self,
        user_id: Uuid,
        expected: Option<&str>,
        next: Option<String>,
    ) -> Result<bool, StoreError>;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, refresh_token_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, refresh_token_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let res = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING id, email, password_hash, refresh_token_hash, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await;
        match res {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_refresh_hash(
        &self,
        user_id: Uuid,
        hash: Option<String>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users SET refresh_token_hash = $2 WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn swap_refresh_hash(
        &self,
        user_id: Uuid,
        expected: Option<&str>,
        next: Option<String>,
    ) -> Result<bool, StoreError> {
        // Single conditional UPDATE so the compare and the write are atomic
        // on the row; NOT DISTINCT FROM treats NULL as a comparable value.
        let res = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token_hash = $3
            WHERE id = $1 AND refresh_token_hash IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(user_id)
        .bind(expected)
        .bind(next)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}

/// In-memory store used by `AppState::fake()` and unit tests.
#[derive(Default)]
pub struct MemoryStore {
    users: std::sync::Mutex<std::collections::HashMap<Uuid, User>>,
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.get(&id).cloned())
    }

    async fn create(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            refresh_token_hash: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_refresh_hash(
        &self,
        user_id: Uuid,
        hash: Option<String>,
    ) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.get_mut(&user_id) {
            user.refresh_token_hash = hash;
        }
        Ok(())
    }

    async fn swap_refresh_hash(
        &self,
        user_id: Uuid,
        expected: Option<&str>,
        next: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user_id) {
            Some(user) if user.refresh_token_hash.as_deref() == expected => {
                user.refresh_token_hash = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
