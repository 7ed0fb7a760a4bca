use crate::auth::{
    validate_signup, NewUser, PasswordError, PasswordHasher, SignUp, UserId, UserStore,
    UserStoreError,
};
use thiserror::Error;

/// Errors of the user management commands.
#[derive(Debug, Error)]
pub enum ManageError {
    /// Same rules as the signup form.
    #[error("invalid email or password (the email needs an @, the password 6 characters)")]
    InvalidInput,
    /// The email is taken.
    #[error("user already exists")]
    AlreadyExists,
    /// No user has this email.
    #[error("no user with email {0}")]
    UnknownUser(String),
    /// The credential store failed.
    #[error(transparent)]
    Store(UserStoreError),
    /// Hashing failed.
    #[error(transparent)]
    Hash(#[from] PasswordError),
}

impl From<UserStoreError> for ManageError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::AlreadyExists => ManageError::AlreadyExists,
            err => ManageError::Store(err),
        }
    }
}

/// Creates a user with the admin flag set.
pub async fn create_admin(
    users: &dyn UserStore,
    hasher: &PasswordHasher,
    email: &str,
    password: &str,
) -> Result<UserId, ManageError> {
    let sign_up = SignUp::new(email, email, password);
    if !validate_signup(&sign_up) {
        return Err(ManageError::InvalidInput);
    }
    if users.find_by_email(email).await?.is_some() {
        return Err(ManageError::AlreadyExists);
    }
    let password_hash = hasher.hash(sign_up.password())?;
    let id = users
        .insert(NewUser {
            email: email.to_string(),
            password_hash,
            is_admin: true,
        })
        .await?;
    tracing::info!("created admin user {}", id);
    Ok(id)
}

/// Grants or revokes the admin flag. Active sessions of that user pick up
/// the change on their next request.
pub async fn set_admin(users: &dyn UserStore, email: &str, is_admin: bool) -> Result<(), ManageError> {
    if users.set_admin(email, is_admin).await? {
        tracing::info!("set admin={} for {}", is_admin, email);
        Ok(())
    } else {
        Err(ManageError::UnknownUser(email.to_string()))
    }
}
