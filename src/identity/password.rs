//! Password hashing primitive (Argon2id, PHC string format).

use anyhow::anyhow;
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash,
    PasswordHasher as _, PasswordVerifier, Version,
};
use rand::rngs::OsRng;

use super::error::AuthError;

pub trait PasswordHasher: Send + Sync {
    /// Hash a secret with a fresh salt.
    ///
    /// # Errors
    /// Returns `PasswordHashing` if the primitive fails.
    fn hash(&self, secret: &str) -> Result<String, AuthError>;

    /// Constant-time comparison; malformed hashes never verify.
    fn verify(&self, secret: &str, hash: &str) -> bool;
}

#[derive(Clone, Debug)]
pub struct Argon2Hasher {
    params: Params,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Hasher {
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|err| AuthError::PasswordHashing(anyhow!("argon2: {err}")))?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, secret: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        // Parameters embedded in the PHC string take precedence over ours.
        self.argon2()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fast_hasher() -> Argon2Hasher {
        Argon2Hasher::new(Params::new(1024, 1, 1, None).unwrap())
    }

    #[test]
    fn hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash));
        assert!(!hasher.verify("wrong horse", &hash));
    }

    #[test]
    fn salts_differ_per_hash() {
        let hasher = fast_hasher();
        let first = hasher.hash("secret").unwrap();
        let second = hasher.hash("secret").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("secret", ""));
        assert!(!hasher.verify("secret", "not-a-phc-string"));
    }
}
