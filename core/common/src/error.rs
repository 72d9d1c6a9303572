//! Common error types for Sealbox.

use thiserror::Error;

/// Top-level error type for Sealbox operations.
///
/// None of the variants ever carry a password or key material.
#[derive(Debug, Error)]
pub enum Error {
    /// No package file exists for the project.
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// The package document is malformed or misses required fields.
    #[error("Invalid package format: {0}")]
    InvalidFormat(String),

    /// A ciphertext blob could not be decrypted (malformed base64,
    /// shorter than the IV, or otherwise unusable).
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    /// The password was detected as wrong.
    ///
    /// Only authenticated packages can report this reliably; the legacy
    /// keystream cipher returns garbage instead.
    #[error("Wrong password: {0}")]
    WrongPassword(String),

    /// Every credential backend was tried and none succeeded.
    #[error("Credential store unavailable: {0}")]
    CredentialStoreUnavailable(String),

    /// A password is required but the environment is non-interactive.
    #[error("No interactive input available: {0}")]
    NoInteractiveInput(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Another invocation holds the project lock.
    #[error("Locked: {0}")]
    Locked(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
