//! Change detection for working directories.
//!
//! The manifest is a SHA-256 digest over every file path and its contents.
//! It is written into the working directory after a mount and compared on
//! unmount: a match means nothing was edited, so the package is left alone
//! and no new ciphertext ends up in version control.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::workdir::scan_files;
use sealbox_common::Result;

/// Name of the manifest file inside the working directory.
pub const HASH_FILE: &str = "secrets_manager.hash";

/// Hex SHA-256 digest of a working directory's file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeManifest(String);

impl ChangeManifest {
    /// Digest the working directory at `dir`.
    ///
    /// Files are visited in sorted path order; for each one the normalized
    /// relative path and then its bytes are hashed, each preceded by its
    /// length as a little-endian `u64`. The manifest file itself is skipped.
    /// A missing directory digests like an empty one.
    pub fn compute(dir: &Path) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut count = 0usize;
        for (path, fs_path) in scan_files(dir)? {
            let name = path.as_str().as_bytes();
            let content = fs::read(&fs_path)?;
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name);
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
            count += 1;
        }
        let digest = hex::encode(hasher.finalize());
        debug!(dir = %dir.display(), files = count, "computed change manifest");
        Ok(Self(digest))
    }

    /// Read the manifest stored in `dir`, if any.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(HASH_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let stored = fs::read_to_string(path)?;
        Ok(Some(Self(stored.trim().to_string())))
    }

    /// Write this manifest into `dir`.
    pub fn store(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(HASH_FILE), &self.0)?;
        Ok(())
    }

    /// Whether `dir` differs from its stored manifest.
    ///
    /// A directory without a stored manifest always counts as changed.
    pub fn has_changed(dir: &Path) -> Result<bool> {
        match Self::load(dir)? {
            Some(stored) => Ok(stored != Self::compute(dir)?),
            None => Ok(true),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
