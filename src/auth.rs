use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::UserCredential;

/// Login accepted when no stored user of that name exists yet. The first
/// successful login with it creates the stored user.
#[derive(Debug, Clone)]
pub struct DefaultIdentity {
    pub username: String,
    pub password: String,
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn new_credential(username: &str, password: &str) -> UserCredential {
    let salt = Uuid::new_v4().simple().to_string();
    UserCredential {
        username: username.to_string(),
        password_hash: hash_password(&salt, password),
        salt,
        remember_token: None,
    }
}

pub fn verify_password(user: &UserCredential, password: &str) -> bool {
    hash_password(&user.salt, password) == user.password_hash
}

/// Checks a username/password pair. Returns the stored user on success.
pub async fn login(
    store: &dyn Store,
    identity: &DefaultIdentity,
    username: &str,
    password: &str,
) -> Result<Option<UserCredential>, StoreError> {
    if let Some(user) = store.find_user(username).await? {
        return Ok(verify_password(&user, password).then_some(user));
    }

    if username == identity.username && password == identity.password {
        let user = new_credential(username, password);
        store.insert_user(&user).await?;
        info!(username, "created user from default identity");
        return Ok(Some(user));
    }

    Ok(None)
}

pub async fn issue_remember_token(
    store: &dyn Store,
    user: &UserCredential,
) -> Result<String, StoreError> {
    let token = Uuid::new_v4().simple().to_string();
    let updated = UserCredential {
        remember_token: Some(token.clone()),
        ..user.clone()
    };
    store.update_user(&user.username, &updated).await?;
    Ok(token)
}

pub async fn revoke_remember_token(store: &dyn Store, username: &str) -> Result<(), StoreError> {
    if let Some(user) = store.find_user(username).await? {
        if user.remember_token.is_some() {
            let updated = UserCredential {
                remember_token: None,
                ..user
            };
            store.update_user(username, &updated).await?;
        }
    }
    Ok(())
}

pub async fn user_for_remember_token(
    store: &dyn Store,
    token: &str,
) -> Result<Option<UserCredential>, StoreError> {
    if token.is_empty() {
        return Ok(None);
    }
    store.find_user_by_token(token).await
}

#[derive(Debug, Clone, Default)]
pub struct CredentialChange {
    pub current_password: String,
    pub new_username: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Current password is incorrect")]
    IncorrectPassword,
    #[error("New passwords do not match")]
    PasswordMismatch,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("No changes provided")]
    NoChanges,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Changes the username and/or password of `current_username`. A new
/// password invalidates any remember-me token.
pub async fn change_credentials(
    store: &dyn Store,
    current_username: &str,
    change: &CredentialChange,
) -> Result<UserCredential, CredentialError> {
    let user = store
        .find_user(current_username)
        .await?
        .ok_or(CredentialError::IncorrectPassword)?;
    if !verify_password(&user, &change.current_password) {
        return Err(CredentialError::IncorrectPassword);
    }

    if !change.new_password.is_empty() && change.new_password != change.confirm_password {
        return Err(CredentialError::PasswordMismatch);
    }

    let new_username = change.new_username.trim();
    let rename = !new_username.is_empty() && new_username != user.username;
    if !rename && change.new_password.is_empty() {
        return Err(CredentialError::NoChanges);
    }
    if rename && store.find_user(new_username).await?.is_some() {
        return Err(CredentialError::UsernameTaken);
    }

    let mut updated = user.clone();
    if rename {
        updated.username = new_username.to_string();
    }
    if !change.new_password.is_empty() {
        updated.salt = Uuid::new_v4().simple().to_string();
        updated.password_hash = hash_password(&updated.salt, &change.new_password);
        updated.remember_token = None;
    }

    store.update_user(&user.username, &updated).await?;
    info!(
        previous = %user.username,
        username = %updated.username,
        "credentials updated"
    );
    Ok(updated)
}
