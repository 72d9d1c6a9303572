//! Cipher suite selection and the per-file cipher seam.
//!
//! The package format version decides which cipher protects the file
//! blobs. Version 1 packages use the legacy keystream cipher, version 2
//! packages use XChaCha20-Poly1305. Both are keyed by the same PBKDF2 key.

use crate::keys::DerivedKey;
use crate::{aead, keystream};
use sealbox_common::{Error, Result};

/// Format version written for legacy keystream packages.
pub const LEGACY_FORMAT_VERSION: &str = "1.0.4";

/// Format version written for authenticated packages.
pub const AUTHENTICATED_FORMAT_VERSION: &str = "2.0.0";

/// Cipher used for the file blobs of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherSuite {
    /// Unauthenticated keystream cipher, compatible with existing packages.
    #[default]
    Legacy,
    /// XChaCha20-Poly1305.
    Authenticated,
}

impl CipherSuite {
    /// Pick the suite from a package `version` string by its major number.
    ///
    /// # Errors
    /// - `InvalidFormat` if the major version is missing or unknown
    pub fn for_format_version(version: &str) -> Result<Self> {
        let major = version
            .split('.')
            .next()
            .and_then(|m| m.trim().parse::<u32>().ok())
            .ok_or_else(|| Error::InvalidFormat(format!("Unreadable format version: {}", version)))?;

        match major {
            1 => Ok(Self::Legacy),
            2 => Ok(Self::Authenticated),
            other => Err(Error::InvalidFormat(format!(
                "Unsupported format version {} (major {})",
                version, other
            ))),
        }
    }

    /// The format version string this suite writes.
    pub fn format_version(&self) -> &'static str {
        match self {
            Self::Legacy => LEGACY_FORMAT_VERSION,
            Self::Authenticated => AUTHENTICATED_FORMAT_VERSION,
        }
    }

    /// Whether a wrong key is detected on decryption.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// Per-file encryption used by the package codec.
///
/// The codec never derives keys itself; it is handed something that can
/// seal and open individual blobs.
pub trait FileCipher {
    /// Encrypt one file's plaintext into a self-contained blob.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt one blob produced by [`FileCipher::seal`].
    fn open(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

/// A derived key bound to the cipher suite of one package.
#[derive(Debug, Clone)]
pub struct PackageKey {
    key: DerivedKey,
    suite: CipherSuite,
}

impl PackageKey {
    /// Bind a derived key to a suite.
    pub fn new(key: DerivedKey, suite: CipherSuite) -> Self {
        Self { key, suite }
    }

    /// The suite this key encrypts with.
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }
}

impl FileCipher for PackageKey {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.suite {
            CipherSuite::Legacy => Ok(keystream::encrypt(self.key.as_bytes(), plaintext)),
            CipherSuite::Authenticated => aead::encrypt(self.key.as_bytes(), plaintext),
        }
    }

    fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        match self.suite {
            CipherSuite::Legacy => keystream::decrypt(self.key.as_bytes(), blob),
            CipherSuite::Authenticated => aead::decrypt(self.key.as_bytes(), blob),
        }
    }
}
