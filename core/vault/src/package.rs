//! The secrets package document.
//!
//! A package is a JSON document holding package metadata and one encrypted
//! blob per file:
//!
//! ```json
//! {
//!   "files": {
//!     ".env": { "content": "<base64>", "permissions": "600", "size": 35 }
//!   },
//!   "metadata": {
//!     "created": "2024-01-01T00:00:00+00:00",
//!     "project": "myapp",
//!     "salt": "<base64>",
//!     "version": "1.0.4"
//!   }
//! }
//! ```
//!
//! Keys are written in sorted order (struct fields are declared
//! alphabetically, the file map is a `BTreeMap`) so re-encoding the same
//! content produces minimal diffs.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use sealbox_common::{Error, ProjectName, Result, SecretPath, SensitiveBytes};
use sealbox_crypto::{CipherSuite, FileCipher, Salt};

/// One encrypted file inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Base64 of the cipher blob.
    pub content: String,
    /// Unix mode as three octal digits, e.g. `"600"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    /// Plaintext length in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Package-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Creation time, RFC 3339.
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub project: String,
    /// Base64 of the PBKDF2 salt.
    pub salt: String,
    /// Format version; the major number selects the cipher suite.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    CipherSuite::Legacy.format_version().to_string()
}

impl PackageMetadata {
    /// Fresh metadata stamped with the current time.
    pub fn new(project: &ProjectName, salt: &Salt, suite: CipherSuite) -> Self {
        Self {
            created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            project: project.as_str().to_string(),
            salt: salt.to_base64(),
            version: suite.format_version().to_string(),
        }
    }
}

/// A plaintext file on its way into, or out of, a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainFile {
    pub data: SensitiveBytes,
    pub permissions: Option<String>,
}

impl PlainFile {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: SensitiveBytes::new(data.into()),
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }
}

/// Plaintext file set keyed by normalized path.
pub type FileSet = BTreeMap<SecretPath, PlainFile>;

/// The encrypted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsPackage {
    #[serde(deserialize_with = "unique_paths")]
    pub files: BTreeMap<SecretPath, FileEntry>,
    pub metadata: PackageMetadata,
}

/// Normalize file keys, refusing two keys that name the same path.
fn unique_paths<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<SecretPath, FileEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw = BTreeMap::<String, FileEntry>::deserialize(deserializer)?;
    let mut files = BTreeMap::new();
    for (key, entry) in raw {
        let path = SecretPath::parse(&key).map_err(D::Error::custom)?;
        if files.insert(path, entry).is_some() {
            return Err(D::Error::custom(format!(
                "file path '{}' duplicates another entry after normalization",
                key
            )));
        }
    }
    Ok(files)
}

impl SecretsPackage {
    /// Encrypt every file of `files` with `cipher` under `metadata`.
    ///
    /// Each blob gets a fresh IV or nonce, so sealing the same content twice
    /// never yields the same document.
    pub fn seal(metadata: PackageMetadata, cipher: &dyn FileCipher, files: &FileSet) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (path, file) in files {
            let blob = cipher.seal(file.data.as_bytes())?;
            entries.insert(
                path.clone(),
                FileEntry {
                    content: STANDARD.encode(blob),
                    permissions: file.permissions.clone(),
                    size: Some(file.data.len() as u64),
                },
            );
        }
        debug!(files = entries.len(), version = %metadata.version, "sealed package");
        Ok(Self {
            files: entries,
            metadata,
        })
    }

    /// Parse a package document.
    ///
    /// # Errors
    /// - `InvalidFormat` if the document is not JSON, or `metadata.salt` or
    ///   `files` is missing, a file path is not a valid relative path, or two
    ///   file paths normalize to the same path
    pub fn from_json(document: &str) -> Result<Self> {
        serde_json::from_str(document).map_err(|e| Error::InvalidFormat(e.to_string()))
    }

    /// Serialize as pretty-printed JSON with two-space indentation.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read a package file from disk.
    ///
    /// # Errors
    /// - `PackageNotFound` if `path` does not exist
    /// - `InvalidFormat` if the contents do not parse
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::PackageNotFound(path.display().to_string()));
        }
        let bytes = fs::read(path)?;
        decode_package(&bytes)
    }

    /// Write the package to `path` atomically.
    ///
    /// The document goes to a temporary file in the same directory first and
    /// is renamed over `path`, so a failure leaves any previous package
    /// intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".sealbox-package-")
            .tempfile_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        debug!(path = %path.display(), files = self.files.len(), "package written");
        Ok(())
    }

    /// The salt stored in the metadata.
    pub fn salt(&self) -> Result<Salt> {
        Salt::from_base64(&self.metadata.salt)
    }

    /// The cipher suite selected by the metadata version.
    pub fn suite(&self) -> Result<CipherSuite> {
        CipherSuite::for_format_version(&self.metadata.version)
    }

    /// Normalized paths of all files, sorted. Needs no key.
    pub fn list_files(&self) -> Vec<String> {
        self.files.keys().map(|p| p.as_str().to_string()).collect()
    }

    /// Decrypt a single file without touching any other entry.
    ///
    /// `path` may use either separator style.
    ///
    /// # Returns
    /// `Ok(None)` if no such file is in the package.
    ///
    /// # Errors
    /// - `DecryptionFailure` for malformed base64 or a truncated blob
    /// - `WrongPassword` if an authenticated blob fails verification
    pub fn read_one_file(&self, cipher: &dyn FileCipher, path: &str) -> Result<Option<SensitiveBytes>> {
        let key = match SecretPath::parse(path) {
            Ok(key) => key,
            Err(_) => return Ok(None),
        };
        match self.files.get(&key) {
            Some(entry) => open_entry(cipher, &key, entry).map(Some),
            None => Ok(None),
        }
    }

    /// Decrypt every file.
    pub fn decrypt_all(&self, cipher: &dyn FileCipher) -> Result<FileSet> {
        let mut files = FileSet::new();
        for (path, entry) in &self.files {
            let data = open_entry(cipher, path, entry)?;
            files.insert(
                path.clone(),
                PlainFile {
                    data,
                    permissions: entry.permissions.clone(),
                },
            );
        }
        Ok(files)
    }
}

fn open_entry(cipher: &dyn FileCipher, path: &SecretPath, entry: &FileEntry) -> Result<SensitiveBytes> {
    let blob = STANDARD
        .decode(entry.content.trim())
        .map_err(|e| Error::DecryptionFailure(format!("{}: content is not valid base64: {}", path, e)))?;
    let plaintext = cipher.open(&blob).map_err(|e| match e {
        Error::DecryptionFailure(msg) => Error::DecryptionFailure(format!("{}: {}", path, msg)),
        Error::WrongPassword(_) => Error::WrongPassword(format!("{} failed authentication", path)),
        other => other,
    })?;
    Ok(SensitiveBytes::new(plaintext))
}

/// Build a package for `project` from plaintext files.
pub fn encode_package(
    project: &ProjectName,
    salt: &Salt,
    suite: CipherSuite,
    cipher: &dyn FileCipher,
    files: &FileSet,
) -> Result<SecretsPackage> {
    SecretsPackage::seal(PackageMetadata::new(project, salt, suite), cipher, files)
}

/// Parse a package document from raw bytes.
///
/// # Errors
/// - `InvalidFormat` if the bytes are not UTF-8 JSON with `metadata.salt`
///   and `files`
pub fn decode_package(document: &[u8]) -> Result<SecretsPackage> {
    let text = std::str::from_utf8(document)
        .map_err(|_| Error::InvalidFormat("package is not UTF-8".to_string()))?;
    SecretsPackage::from_json(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealbox_crypto::{derive_key_with, KdfParams, PackageKey};
    use tempfile::TempDir;

    fn key(password: &str, salt: &Salt, suite: CipherSuite) -> PackageKey {
        PackageKey::new(
            derive_key_with(password.as_bytes(), salt, &KdfParams::testing()).unwrap(),
            suite,
        )
    }

    fn sample_files() -> FileSet {
        let mut files = FileSet::new();
        files.insert(
            SecretPath::parse(".env").unwrap(),
            PlainFile::new(b"DB_HOST=localhost\nDB_USER=testuser\n".to_vec()).with_permissions("600"),
        );
        files.insert(
            SecretPath::parse("ssl/cert.pem").unwrap(),
            PlainFile::new(b"-----BEGIN CERTIFICATE-----".to_vec()),
        );
        files
    }

    fn sample(suite: CipherSuite) -> (SecretsPackage, PackageKey) {
        let salt = Salt::generate();
        let key = key("test123", &salt, suite);
        let project = ProjectName::new("myapp").unwrap();
        let pkg = encode_package(&project, &salt, suite, &key, &sample_files()).unwrap();
        (pkg, key)
    }

    #[test]
    fn test_encode_decode() {
        let (pkg, key) = sample(CipherSuite::Legacy);
        let restored = SecretsPackage::from_json(&pkg.to_json().unwrap()).unwrap();
        assert_eq!(restored, pkg);
        assert_eq!(restored.metadata.version, "1.0.4");
        assert_eq!(restored.metadata.project, "myapp");
        assert_eq!(restored.decrypt_all(&key).unwrap(), sample_files());
    }

    #[test]
    fn test_document_layout_is_sorted() {
        let (pkg, _) = sample(CipherSuite::Legacy);
        let json = pkg.to_json().unwrap();

        let files_at = json.find("\"files\"").unwrap();
        let metadata_at = json.find("\"metadata\"").unwrap();
        assert!(files_at < metadata_at);

        let created = json.find("\"created\"").unwrap();
        let project = json.find("\"project\"").unwrap();
        let salt = json.find("\"salt\"").unwrap();
        let version = json.find("\"version\"").unwrap();
        assert!(created < project && project < salt && salt < version);

        assert!(json.contains("\n  \"files\": {"));
        assert!(json.contains("\"permissions\": \"600\""));
        assert!(json.contains("\"size\": 35"));
    }

    #[test]
    fn test_selective_read_matches_full_decode() {
        for suite in [CipherSuite::Legacy, CipherSuite::Authenticated] {
            let (pkg, key) = sample(suite);
            let all = pkg.decrypt_all(&key).unwrap();
            for (path, file) in &all {
                let one = pkg.read_one_file(&key, path.as_str()).unwrap().unwrap();
                assert_eq!(&one, &file.data);
            }
        }
    }

    #[test]
    fn test_read_one_file_normalizes_backslashes() {
        let (pkg, key) = sample(CipherSuite::Legacy);
        let cert = pkg.read_one_file(&key, "ssl\\cert.pem").unwrap().unwrap();
        assert_eq!(cert.as_bytes(), b"-----BEGIN CERTIFICATE-----");
    }

    #[test]
    fn test_read_one_file_missing_is_none() {
        let (pkg, key) = sample(CipherSuite::Legacy);
        assert!(pkg.read_one_file(&key, "nope.txt").unwrap().is_none());
        assert!(pkg.read_one_file(&key, "../escape").unwrap().is_none());
    }

    #[test]
    fn test_selective_read_touches_only_requested_entry() {
        let (mut pkg, key) = sample(CipherSuite::Legacy);
        pkg.files
            .get_mut(&SecretPath::parse("ssl/cert.pem").unwrap())
            .unwrap()
            .content = "!!!not base64!!!".to_string();

        assert!(pkg.read_one_file(&key, ".env").unwrap().is_some());
        assert!(matches!(
            pkg.read_one_file(&key, "ssl/cert.pem"),
            Err(Error::DecryptionFailure(_))
        ));
        assert!(matches!(pkg.decrypt_all(&key), Err(Error::DecryptionFailure(_))));
    }

    #[test]
    fn test_truncated_blob_is_decryption_failure() {
        let (mut pkg, key) = sample(CipherSuite::Legacy);
        pkg.files.get_mut(&SecretPath::parse(".env").unwrap()).unwrap().content =
            STANDARD.encode([0u8; 8]);
        assert!(matches!(
            pkg.read_one_file(&key, ".env"),
            Err(Error::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_wrong_password_legacy_returns_same_length_garbage() {
        let (pkg, _) = sample(CipherSuite::Legacy);
        let wrong = key("wrong", &pkg.salt().unwrap(), CipherSuite::Legacy);
        let garbage = pkg.read_one_file(&wrong, ".env").unwrap().unwrap();
        assert_eq!(garbage.len(), 35);
        assert_ne!(garbage.as_bytes(), b"DB_HOST=localhost\nDB_USER=testuser\n");
    }

    #[test]
    fn test_wrong_password_authenticated_is_detected() {
        let (pkg, _) = sample(CipherSuite::Authenticated);
        assert_eq!(pkg.suite().unwrap(), CipherSuite::Authenticated);
        let wrong = key("wrong", &pkg.salt().unwrap(), CipherSuite::Authenticated);
        assert!(matches!(
            pkg.read_one_file(&wrong, ".env"),
            Err(Error::WrongPassword(_))
        ));
    }

    #[test]
    fn test_decode_requires_salt_and_files() {
        let no_salt = r#"{"metadata": {"version": "1.0.4", "project": "p"}, "files": {}}"#;
        assert!(matches!(SecretsPackage::from_json(no_salt), Err(Error::InvalidFormat(_))));

        let no_files = r#"{"metadata": {"salt": "AAAA"}}"#;
        assert!(matches!(SecretsPackage::from_json(no_files), Err(Error::InvalidFormat(_))));

        assert!(matches!(decode_package(b"not json"), Err(Error::InvalidFormat(_))));
        let escaping = r#"{"metadata": {"salt": "AAAA"}, "files": {"../x": {"content": ""}}}"#;
        assert!(matches!(SecretsPackage::from_json(escaping), Err(Error::InvalidFormat(_))));
        assert!(matches!(decode_package(&[0xff, 0xfe]), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_decode_rejects_paths_that_collide_after_normalization() {
        let (pkg, _) = sample(CipherSuite::Legacy);
        let json = pkg.to_json().unwrap();
        let entry = serde_json::to_value(&pkg.files[&SecretPath::parse("ssl/cert.pem").unwrap()]).unwrap();

        let mut doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        doc["files"]["ssl\\cert.pem"] = entry;
        let err = SecretsPackage::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_decode_minimal_and_foreign_documents() {
        let doc = r#"{
            "metadata": {"salt": "AAAA", "extra": 1},
            "files": {"dir\\a.txt": {"content": "AAAA"}},
            "unknown": true
        }"#;
        let pkg = SecretsPackage::from_json(doc).unwrap();
        assert_eq!(pkg.metadata.version, "1.0.4");
        assert_eq!(pkg.list_files(), vec!["dir/a.txt"]);
        assert!(pkg.files.values().all(|e| e.permissions.is_none() && e.size.is_none()));
    }

    #[test]
    fn test_every_seal_uses_fresh_iv() {
        let salt = Salt::generate();
        let key = key("pw", &salt, CipherSuite::Legacy);
        let metadata = PackageMetadata::new(&ProjectName::new("p").unwrap(), &salt, CipherSuite::Legacy);
        let a = SecretsPackage::seal(metadata.clone(), &key, &sample_files()).unwrap();
        let b = SecretsPackage::seal(metadata, &key, &sample_files()).unwrap();
        assert_ne!(a.files, b.files);
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".myapp.secrets");
        let (pkg, _) = sample(CipherSuite::Legacy);

        assert!(matches!(SecretsPackage::load(&path), Err(Error::PackageNotFound(_))));
        pkg.save(&path).unwrap();
        assert_eq!(SecretsPackage::load(&path).unwrap(), pkg);

        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
