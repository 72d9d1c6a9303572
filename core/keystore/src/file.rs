//! Encrypted dotfile credential backend.
//!
//! Stores `salt (32 bytes) || keystream(secret)` in `~/.<service>`, keyed by
//! PBKDF2 over the OS username. This keeps the password off disk in
//! cleartext without needing any platform facility; it is obfuscation
//! against casual reads, not protection against the same user.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::backend::{CredentialBackend, Secret};
use sealbox_common::{Error, Result};
use sealbox_crypto::keystream;
use sealbox_crypto::{derive_key_with, KdfParams, Salt, SALT_LENGTH};

/// Credential backend backed by owner-only files in a home directory.
pub struct EncryptedFileBackend {
    home: PathBuf,
    username: String,
    kdf: KdfParams,
}

impl EncryptedFileBackend {
    /// Create a backend storing entries under `home`, keyed by `username`.
    ///
    /// # Errors
    /// - Returns error if `username` is empty
    pub fn new(home: impl AsRef<Path>, username: impl Into<String>) -> Result<Self> {
        let username = username.into();
        if username.is_empty() {
            return Err(Error::InvalidInput("Username cannot be empty".to_string()));
        }
        Ok(Self {
            home: home.as_ref().to_path_buf(),
            username,
            kdf: KdfParams::STANDARD,
        })
    }

    /// Override the KDF parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Path of the entry file for a service.
    pub fn entry_path(&self, service: &str) -> Result<PathBuf> {
        if service.is_empty() || service.contains('/') || service.contains('\\') {
            return Err(Error::InvalidInput(format!("Invalid service name: {}", service)));
        }
        Ok(self.home.join(format!(".{}", service)))
    }

    fn write_owner_only(path: &Path, data: &[u8]) -> Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(data)?;
        file.sync_all()?;

        // An older file may predate the mode above.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl CredentialBackend for EncryptedFileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn get(&self, service: &str) -> Result<Option<Secret>> {
        let path = self.entry_path(service)?;
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        if data.len() <= SALT_LENGTH {
            warn!(path = %path.display(), "credential file too short, ignoring");
            return Ok(None);
        }

        let (salt, blob) = data.split_at(SALT_LENGTH);
        let key = derive_key_with(self.username.as_bytes(), &Salt::from_bytes(salt)?, &self.kdf)?;
        let plaintext = Zeroizing::new(keystream::decrypt(key.as_bytes(), blob)?);

        match std::str::from_utf8(&plaintext) {
            Ok(secret) => Ok(Some(Zeroizing::new(secret.to_string()))),
            Err(_) => {
                warn!(path = %path.display(), "credential file does not decrypt to text, ignoring");
                Ok(None)
            }
        }
    }

    fn set(&self, service: &str, secret: &str) -> Result<()> {
        let path = self.entry_path(service)?;
        let salt = Salt::generate();
        let key = derive_key_with(self.username.as_bytes(), &salt, &self.kdf)?;

        let mut data = Vec::with_capacity(SALT_LENGTH + 16 + secret.len());
        data.extend_from_slice(salt.as_bytes());
        data.extend(keystream::encrypt(key.as_bytes(), secret.as_bytes()));

        Self::write_owner_only(&path, &data)?;
        debug!(path = %path.display(), "stored secret in credential file");
        Ok(())
    }

    fn delete(&self, service: &str) -> Result<bool> {
        let path = self.entry_path(service)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        debug!(path = %path.display(), "deleted credential file");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(dir: &TempDir) -> EncryptedFileBackend {
        EncryptedFileBackend::new(dir.path(), "alice")
            .unwrap()
            .with_kdf(KdfParams::testing())
    }

    #[test]
    fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);

        assert!(backend.get("svc").unwrap().is_none());

        backend.set("svc", "test123").unwrap();
        assert_eq!(backend.get("svc").unwrap().unwrap().as_str(), "test123");

        assert!(backend.delete("svc").unwrap());
        assert!(!backend.delete("svc").unwrap());
        assert!(backend.get("svc").unwrap().is_none());
    }

    #[test]
    fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir);
        backend.set("svc", "pw").unwrap();

        let data = fs::read(dir.path().join(".svc")).unwrap();
        // salt + IV + 2 bytes of ciphertext
        assert_eq!(data.len(), SALT_LENGTH + 16 + 2);
        assert!(!data.windows(2).any(|w| w == b"pw"));
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        backend(&dir).set("svc", "pw").unwrap();

        let mode = fs::metadata(dir.path().join(".svc")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_other_user_reads_garbage() {
        let dir = TempDir::new().unwrap();
        backend(&dir).set("svc", "test123").unwrap();

        let bob = EncryptedFileBackend::new(dir.path(), "bob")
            .unwrap()
            .with_kdf(KdfParams::testing());
        let read = bob.get("svc").unwrap();
        assert!(read.map(|s| s.as_str() != "test123").unwrap_or(true));
    }

    #[test]
    fn test_truncated_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".svc"), [0u8; SALT_LENGTH]).unwrap();
        assert!(backend(&dir).get("svc").unwrap().is_none());
    }

    #[test]
    fn test_invalid_service_name() {
        let dir = TempDir::new().unwrap();
        assert!(backend(&dir).set("../escape", "pw").is_err());
        assert!(EncryptedFileBackend::new(dir.path(), "").is_err());
    }
}
