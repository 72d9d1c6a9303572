//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! The iteration count is part of the package format: every package ever
//! written used 100,000 iterations and a 32-byte output, and the format has
//! no field to record anything else.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::keys::{DerivedKey, Salt, KEY_LENGTH};
use sealbox_common::{Error, Result};

/// Iteration count used by the package format.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// The parameters every package is written with.
    pub const STANDARD: Self = Self {
        iterations: PBKDF2_ITERATIONS,
    };

    /// Cheap parameters for tests.
    ///
    /// Packages written with these are unreadable with [`KdfParams::STANDARD`].
    pub fn testing() -> Self {
        Self { iterations: 1_000 }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Derive a 32-byte key from a password and salt with the standard parameters.
///
/// Deterministic: the same password and salt always yield the same key.
///
/// # Errors
/// - Returns error if password is empty
pub fn derive_key(password: &[u8], salt: &Salt) -> Result<DerivedKey> {
    derive_key_with(password, salt, &KdfParams::STANDARD)
}

/// Derive a key with explicit parameters.
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if the iteration count is zero
pub fn derive_key_with(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    if params.iterations == 0 {
        return Err(Error::Crypto("Invalid KDF parameters: zero iterations".to_string()));
    }

    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password, salt.as_bytes(), params.iterations, &mut key_bytes);

    Ok(DerivedKey::from_bytes(key_bytes))
}
