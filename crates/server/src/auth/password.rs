//! One-way hashing for account passwords and refresh-token secrets.
//!
//! Both are "prove knowledge of a random value" checks, so they share one
//! primitive: argon2id with a per-hash random salt, stored as a PHC string.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Argon2,
};

#[derive(Debug, thiserror::Error)]
#[error("failed to hash secret: {0}")]
pub struct HashError(String);

/// Argon2 work runs on the blocking pool, off the async workers.
#[derive(Clone, Default)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub async fn hash(&self, secret: &str) -> Result<String, HashError> {
        let argon2 = self.argon2.clone();
        let secret = secret.to_owned();
        tokio::task::spawn_blocking(move || hash_secret(&argon2, &secret))
            .await
            .map_err(|error| HashError(error.to_string()))?
    }

    /// Malformed digests verify as false.
    pub async fn verify(&self, secret: &str, digest: &str) -> bool {
        let argon2 = self.argon2.clone();
        let secret = secret.to_owned();
        let digest = digest.to_owned();
        tokio::task::spawn_blocking(move || verify_secret(&argon2, &secret, &digest))
            .await
            .unwrap_or(false)
    }
}

fn hash_secret(argon2: &Argon2<'_>, secret: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| HashError(error.to_string()))
}

fn verify_secret(argon2: &Argon2<'_>, secret: &str, digest: &str) -> bool {
    match PasswordHash::new(digest) {
        Ok(parsed) => argon2.verify_password(secret.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// Byte comparison whose timing does not depend on where inputs differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
