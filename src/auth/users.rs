use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Server generated identifier of a user record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The textual form is not a valid key of the credential store.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed user id {0:?}")]
pub struct MalformedUserId(pub String);

impl FromStr for UserId {
    type Err = MalformedUserId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Serial keys start at 1, and `+12` or ` 12` are not ids we ever hand out.
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MalformedUserId(s.to_string()));
        }
        match s.parse::<i32>() {
            Ok(id) if id > 0 => Ok(UserId(id)),
            _ => Err(MalformedUserId(s.to_string())),
        }
    }
}

/// A stored user record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// Primary key.
    pub id: UserId,
    /// Unique, used for lookups at login and signup.
    pub email: String,
    /// PHC formatted argon2 hash.
    pub password_hash: String,
    /// Whether the user may see the admin page.
    pub is_admin: bool,
}

/// A user record before the store assigns it an id.
#[derive(Clone, Debug)]
pub struct NewUser {
    /// Email of the account.
    pub email: String,
    /// Already hashed password.
    pub password_hash: String,
    /// Regular signups always pass `false`.
    pub is_admin: bool,
}

/// Errors of the credential store.
#[derive(Debug, Error)]
pub enum UserStoreError {
    /// Another record already uses this email.
    #[error("user already exists")]
    AlreadyExists,
    /// The backing database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence of user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by its email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError>;
    /// Look up a user by its id.
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserStoreError>;
    /// Insert a new user and return its id.
    async fn insert(&self, user: NewUser) -> Result<UserId, UserStoreError>;
    /// Grant or revoke admin rights. Returns `false` if no user has this email.
    async fn set_admin(&self, email: &str, is_admin: bool) -> Result<bool, UserStoreError>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i32,
    email: String,
    password: String,
    is_admin: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            email: row.email,
            password_hash: row.password,
            is_admin: row.is_admin,
        }
    }
}

/// Credential store backed by the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Wraps an existing connection pool.
    pub fn new(pool: &PgPool) -> PgUserStore {
        PgUserStore { pool: pool.clone() }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"SELECT id, email, password, is_admin FROM users WHERE email=$1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserStoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"SELECT id, email, password, is_admin FROM users WHERE id=$1"#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn insert(&self, user: NewUser) -> Result<UserId, UserStoreError> {
        let res: Result<(i32,), sqlx::Error> = sqlx::query_as(
            r#"INSERT INTO users (email, password, is_admin) VALUES ( $1, $2, $3 ) RETURNING users.id"#,
        )
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.is_admin)
        .fetch_one(&self.pool)
        .await;
        match res {
            Ok((id,)) => Ok(UserId(id)),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(UserStoreError::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_admin(&self, email: &str, is_admin: bool) -> Result<bool, UserStoreError> {
        let res = sqlx::query(r#"UPDATE users SET is_admin=$1 WHERE email=$2"#)
            .bind(is_admin)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// Credential store kept in process memory. Used by the tests.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl MemoryUserStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Whether the store holds no user.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// Drops a record, as an operator deleting an account would.
    pub async fn remove(&self, id: UserId) -> Option<User> {
        self.users.write().await.remove(&id)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserStoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<UserId, UserStoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(UserStoreError::AlreadyExists);
        }
        let next = users.keys().map(|id| id.0).max().unwrap_or(0) + 1;
        let id = UserId(next);
        users.insert(
            id,
            User {
                id,
                email: user.email,
                password_hash: user.password_hash,
                is_admin: user.is_admin,
            },
        );
        Ok(id)
    }

    async fn set_admin(&self, email: &str, is_admin: bool) -> Result<bool, UserStoreError> {
        let mut users = self.users.write().await;
        match users.values_mut().find(|u| u.email == email) {
            Some(user) => {
                user.is_admin = is_admin;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            is_admin: false,
        }
    }

    #[test]
    fn should_parse_well_formed_ids() {
        assert_eq!("42".parse::<UserId>(), Ok(UserId(42)));
        assert_eq!(UserId(7).to_string().parse::<UserId>(), Ok(UserId(7)));
    }

    #[test]
    fn should_reject_malformed_ids() {
        for bad in ["", "0", "-3", "+3", " 3", "abc", "507f1f77bcf86cd799439011", "99999999999"] {
            assert!(bad.parse::<UserId>().is_err(), "{:?} should be rejected", bad);
        }
    }

    #[tokio::test]
    async fn should_find_inserted_user_by_email_and_id() {
        let store = MemoryUserStore::new();
        let id = store.insert(new_user("a@b.com")).await.unwrap();
        let by_email = store.find_by_email("a@b.com").await.unwrap().unwrap();
        let by_id = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(by_email, by_id);
        assert!(!by_id.is_admin);
        assert!(store.find_by_email("c@d.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_refuse_duplicate_emails() {
        let store = MemoryUserStore::new();
        store.insert(new_user("a@b.com")).await.unwrap();
        let res = store.insert(new_user("a@b.com")).await;
        assert!(matches!(res, Err(UserStoreError::AlreadyExists)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn should_toggle_admin_flag() {
        let store = MemoryUserStore::new();
        let id = store.insert(new_user("a@b.com")).await.unwrap();
        assert!(store.set_admin("a@b.com", true).await.unwrap());
        assert!(store.find_by_id(id).await.unwrap().unwrap().is_admin);
        assert!(!store.set_admin("nobody@b.com", true).await.unwrap());
    }
}
