//! Advisory lock serializing mutating commands on one project.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use sealbox_common::{Error, Result};

/// Held lock; the lock file is removed on drop.
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
}

impl ProjectLock {
    /// Take the lock by creating `path` exclusively.
    ///
    /// The file holds the owning process id for diagnostics only.
    ///
    /// # Errors
    /// - `Locked` if the file already exists
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                return Err(Error::Locked(format!(
                    "{} is held (pid {}); remove it if no other sealbox is running",
                    path.display(),
                    holder.trim()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let written = write!(file, "{}", std::process::id());
        drop(file);
        abandon_on_error(path, written)?;

        debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Remove a lock file that was created but could not be written.
fn abandon_on_error(path: &Path, written: io::Result<()>) -> Result<()> {
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %cleanup, "failed to remove partial lock");
        }
        return Err(e.into());
    }
    Ok(())
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release lock");
        } else {
            debug!(path = %self.path.display(), "lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".p.secrets.lock");

        let held = ProjectLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(matches!(ProjectLock::acquire(&path), Err(Error::Locked(_))));

        drop(held);
        assert!(!path.exists());
        let _again = ProjectLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_failed_write_leaves_no_lock_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        fs::write(&path, "").unwrap();

        let result = abandon_on_error(&path, Err(io::Error::other("disk full")));
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!path.exists());
        let _held = ProjectLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_lock_records_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        let _held = ProjectLock::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), std::process::id().to_string());
    }
}
