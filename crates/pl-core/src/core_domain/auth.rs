use sha2::{Digest, Sha256};

use crate::core::{AuthError, Secret, User, UserId, UserRole, ValidationError};

pub const MIN_SECRET_LENGTH: usize = 4;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Hex SHA-256 of the secret, salted with the user id so equal secrets of
/// different users hash differently.
pub fn hash_secret(user: &UserId, secret: &Secret) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Check `secret` against the stored hash in constant time.
pub fn verify_secret(user: &User, secret: &Secret) -> bool {
    let presented = Secret::new(hash_secret(&user.id, secret));
    presented == Secret::new(user.secret_hash.clone())
}

/// Authenticate an administrator by user and secret.
pub fn authenticate_admin(user: &User, secret: &Secret) -> Result<(), AuthError> {
    if !user.active || !verify_secret(user, secret) {
        return Err(AuthError::InvalidCredentials);
    }
    if user.role != UserRole::Admin {
        return Err(AuthError::NotAdmin(user.id.clone()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Signup validation
// ---------------------------------------------------------------------------

pub fn validate_user_id(id: &str) -> Result<(), ValidationError> {
    let len = id.chars().count();
    if !(2..=16).contains(&len) || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidUserId);
    }
    Ok(())
}

pub fn validate_secret(secret: &Secret) -> Result<(), ValidationError> {
    if secret.as_str().chars().count() < MIN_SECRET_LENGTH {
        return Err(ValidationError::WeakSecret {
            min: MIN_SECRET_LENGTH,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
