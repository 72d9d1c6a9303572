//! Common types used throughout Sealbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use zeroize::Zeroize;

/// Name of a secrets project.
///
/// The name is embedded in the package file name (`.<name>.secrets`), so it
/// must be usable as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectName(String);

impl ProjectName {
    /// Create a new ProjectName from a string.
    ///
    /// # Errors
    /// - Returns error if the name is empty, `.`/`..`, or contains a path separator
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Project name cannot be empty".to_string(),
            ));
        }
        if name == "." || name == ".." {
            return Err(crate::Error::InvalidInput(format!(
                "Invalid project name: {}",
                name
            )));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Project name cannot contain separators".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the package for this project.
    pub fn package_file_name(&self) -> String {
        format!(".{}.secrets", self.0)
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized relative path of a file inside a package.
///
/// Always uses forward slashes, so the same logical path matches regardless
/// of the platform the package was created on. Never absolute, never
/// contains `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretPath(String);

impl SecretPath {
    /// Parse and normalize a relative path.
    ///
    /// Backslashes become forward slashes; empty and `.` components are
    /// dropped.
    ///
    /// # Errors
    /// - Returns error if the path is absolute, escapes with `..`, or is empty
    pub fn parse(path: &str) -> crate::Result<Self> {
        let unified = path.replace('\\', "/");
        if unified.starts_with('/') {
            return Err(crate::Error::InvalidInput(format!(
                "Path must be relative: {}",
                path
            )));
        }

        let mut components = Vec::new();
        for comp in unified.split('/') {
            match comp {
                "" | "." => continue,
                ".." => {
                    return Err(crate::Error::InvalidInput(format!(
                        "Path cannot contain '..': {}",
                        path
                    )))
                }
                _ => components.push(comp),
            }
        }

        if components.is_empty() {
            return Err(crate::Error::InvalidInput("Path cannot be empty".to_string()));
        }

        Ok(Self(components.join("/")))
    }

    /// Build from a filesystem path relative to a working directory.
    pub fn from_relative(path: &Path) -> crate::Result<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(part) => parts.push(part.to_string()),
                    None => {
                        return Err(crate::Error::InvalidInput(format!(
                            "File name is not valid UTF-8: {}",
                            path.display()
                        )))
                    }
                },
                Component::CurDir => continue,
                _ => {
                    return Err(crate::Error::InvalidInput(format!(
                        "Not a relative path: {}",
                        path.display()
                    )))
                }
            }
        }
        Self::parse(&parts.join("/"))
    }

    /// Get the normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this path below a root directory.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut fs_path = root.to_path_buf();
        for component in self.0.split('/') {
            fs_path.push(component);
        }
        fs_path
    }

    /// Get the file name (last component).
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for SecretPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<SecretPath> for String {
    fn from(path: SecretPath) -> Self {
        path.0
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SensitiveBytes {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
