use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use std::sync::LazyLock;

use crate::{
    error::{AppError, AppResult},
    models::{Identity, NewIdentity, Role, UserStatus},
    repository::{IdentityRepository, IdentityState},
};

/// Minimum accepted length for a new or changed password.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Username of the identity created on first boot.
pub const BOOTSTRAP_USERNAME: &str = "admin";

/// Hash checked when the username is unknown, so both rejection paths cost one Argon2 verify.
static UNKNOWN_USER_HASH: LazyLock<String> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"no-such-user", &salt)
        .map(|hash| hash.to_string())
        .unwrap_or_default()
});

/// hash_password
///
/// Argon2id with a fresh random salt, returned as a PHC string. Runs on the blocking pool.
pub async fn hash_password(plain: &str) -> AppResult<String> {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
}

/// Constant-time comparison of `plain` against a stored PHC hash. A malformed stored
/// hash counts as a mismatch.
pub async fn verify_password(plain: &str, stored_hash: &str) -> bool {
    let plain = plain.to_owned();
    let stored_hash = stored_hash.to_owned();
    tokio::task::spawn_blocking(move || verify_blocking(&plain, &stored_hash))
        .await
        .unwrap_or(false)
}

/// Burns one Argon2 verify against a throwaway hash. Always a mismatch.
async fn verify_unknown_user(plain: &str) {
    let plain = plain.to_owned();
    let _ = tokio::task::spawn_blocking(move || verify_blocking(&plain, &UNKNOWN_USER_HASH)).await;
}

fn verify_blocking(plain: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is not a valid PHC string");
            false
        }
    }
}

pub fn validate_new_password(plain: &str) -> AppResult<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// CredentialVerifier
///
/// Checks a username/password pair for the admin login surface. Every rejection is
/// `InvalidCredentials`, whether the user is unknown, the password is wrong, the account
/// is disabled or the role is not administrative.
#[derive(Clone)]
pub struct CredentialVerifier {
    identities: IdentityState,
}

impl CredentialVerifier {
    pub fn new(identities: IdentityState) -> Self {
        Self { identities }
    }

    pub async fn verify(&self, username: &str, password: &str) -> AppResult<Identity> {
        let Some(identity) = self.identities.find_by_username(username).await? else {
            verify_unknown_user(password).await;
            tracing::info!(username, "login rejected");
            return Err(AppError::InvalidCredentials);
        };

        if !verify_password(password, &identity.password_hash).await {
            tracing::info!(username, "login rejected");
            return Err(AppError::InvalidCredentials);
        }

        if !identity.role.is_administrative() || identity.status != UserStatus::Enabled {
            tracing::info!(username, role = %identity.role, "login rejected: not an active administrator");
            return Err(AppError::InvalidCredentials);
        }

        Ok(identity)
    }
}

/// ensure_bootstrap_admin
///
/// Creates the `admin` super-administrator when it is missing. Returns whether an identity
/// was created. An existing `admin` is left untouched, whatever its role.
pub async fn ensure_bootstrap_admin(
    identities: &dyn IdentityRepository,
    password: &str,
) -> AppResult<bool> {
    if identities.find_by_username(BOOTSTRAP_USERNAME).await?.is_some() {
        return Ok(false);
    }

    let password_hash = hash_password(password).await?;
    let created = identities
        .create_identity(NewIdentity {
            username: BOOTSTRAP_USERNAME.to_string(),
            email: None,
            phone: None,
            password_hash,
            role: Role::SuperAdmin,
            status: UserStatus::Enabled,
        })
        .await;

    match created {
        Ok(identity) => {
            tracing::info!(id = %identity.id, username = BOOTSTRAP_USERNAME, "bootstrap administrator created");
            Ok(true)
        }
        // Another instance won the race.
        Err(AppError::Conflict(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
