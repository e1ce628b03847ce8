//! Password Hashes
//!
//! bcrypt with a per-hash random salt. The stored form is the encoded
//! `$2b$<cost>$<salt+digest>` string, so the cost travels with the hash.

use thiserror::Error;

/// bcrypt cost used when none is configured.
pub const DEFAULT_COST: u32 = 10;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Hashing failed (cost out of range).
#[derive(Debug, Error, PartialEq, Eq)]
#[error("password hashing failed: {0}")]
pub struct HashError(String);

impl From<bcrypt::BcryptError> for HashError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self(err.to_string())
    }
}

/// Stored password hash.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash `password` at the default cost.
    pub fn new(password: &str) -> Result<Self, HashError> {
        Self::with_cost(password, DEFAULT_COST)
    }

    /// Hash `password` at `cost` (4 to 31).
    pub fn with_cost(password: &str, cost: u32) -> Result<Self, HashError> {
        Ok(Self(bcrypt::hash(password, cost)?))
    }

    /// Wrap an already encoded hash.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check `password` against the stored hash. A malformed hash never
    /// matches.
    pub fn verify(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.0).unwrap_or(false)
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasswordHash").field(&"<redacted>").finish()
    }
}
