//! Credential cryptography: password hashing, reset tokens, temporary
//! passwords.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::config::Argon2 as ArgonConfig;

/// Policy floor for any password set on an account. OAuth-only accounts
/// carry no password at all and are exempt until one is set.
pub const MIN_PASSWORD_LENGTH: u64 = 6;

const RESET_TOKEN_BYTES: usize = 20;
const TEMP_PASSWORD_LENGTH: usize = 12;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Cryptographic manager.
pub struct Crypto {
    pub pwd: PasswordManager,
    pub reset: ResetTokenFactory,
}

impl Crypto {
    /// Create a new [`Crypto`].
    pub fn new(
        config: Option<ArgonConfig>,
        reset_ttl_minutes: i64,
    ) -> Result<Self> {
        Ok(Self {
            pwd: PasswordManager::new(config)?,
            reset: ResetTokenFactory::new(reset_ttl_minutes),
        })
    }
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2 {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a per-call random salt.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a stored PHC string.
    ///
    /// Returns `false` when no hash is stored or the stored value does not
    /// parse; a login path must never fail on a malformed credential.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: Option<&str>,
    ) -> bool {
        let Some(phc_hash) = phc_hash else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }
}

/// A freshly issued reset token. Only `digest` is ever persisted.
#[derive(Debug)]
pub struct IssuedResetToken {
    /// Plaintext form, delivered to the account holder exactly once.
    pub plaintext: String,
    /// SHA-256 digest stored alongside the account.
    pub digest: String,
    /// Moment after which the token must be refused.
    pub expires_at: DateTime<Utc>,
}

/// Generates single-use password-reset tokens.
pub struct ResetTokenFactory {
    ttl: Duration,
}

impl ResetTokenFactory {
    /// Create a new [`ResetTokenFactory`] with the configured lifetime.
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Generate a high-entropy token and the digest to store for it.
    pub fn issue(&self) -> IssuedResetToken {
        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plaintext = hex::encode(bytes);

        IssuedResetToken {
            digest: Self::digest(&plaintext),
            expires_at: Utc::now() + self.ttl,
            plaintext,
        }
    }

    /// Digest a plaintext token for storage or lookup.
    pub fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Generate a temporary plaintext password for administrative reissuance.
pub fn generate_temp_password() -> String {
    Alphanumeric.sample_string(&mut OsRng, TEMP_PASSWORD_LENGTH)
}
