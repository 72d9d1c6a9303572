//! Plaintext working directory handling.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::manifest::HASH_FILE;
use crate::package::{FileSet, PlainFile};
use sealbox_common::{Error, Result, SecretPath};

/// Permissions recorded for files on platforms without Unix modes.
pub const DEFAULT_PERMISSIONS: &str = "644";

/// Every regular file below `dir`, sorted by normalized path.
///
/// The manifest file at the top level is skipped. Symlinks are followed, so
/// a linked file is read through to its target. A missing directory yields
/// an empty list.
///
/// # Errors
/// - `InvalidInput` if a file name is not valid UTF-8, or two names
///   normalize to the same path
pub fn scan_files(dir: &Path) -> Result<Vec<(SecretPath, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.depth() == 1 && entry.file_name() == HASH_FILE {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| Error::InvalidInput(format!("{} escapes {}", entry.path().display(), dir.display())))?;
        files.push((SecretPath::from_relative(relative)?, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    if let Some(pair) = files.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(duplicate_path(&pair[0].0));
    }
    Ok(files)
}

/// Read every file below `dir` along with its permissions.
pub fn read_files(dir: &Path) -> Result<FileSet> {
    let mut set = FileSet::new();
    for (path, fs_path) in scan_files(dir)? {
        let metadata = fs::metadata(&fs_path)?;
        let data = fs::read(&fs_path)?;
        let file = PlainFile::new(data).with_permissions(permissions_string(&metadata));
        if set.contains_key(&path) {
            return Err(duplicate_path(&path));
        }
        set.insert(path, file);
    }
    Ok(set)
}

fn duplicate_path(path: &SecretPath) -> Error {
    Error::InvalidInput(format!("Several files map to the same path: {}", path))
}

/// Low nine mode bits as three octal digits.
#[cfg(unix)]
pub fn permissions_string(metadata: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:03o}", metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn permissions_string(_metadata: &fs::Metadata) -> String {
    DEFAULT_PERMISSIONS.to_string()
}

/// Apply recorded permissions to `path`. Unparseable values are ignored.
#[cfg(unix)]
pub fn apply_permissions(path: &Path, permissions: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match u32::from_str_radix(permissions, 8) {
        Ok(mode) if mode <= 0o777 => {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        _ => warn!(path = %path.display(), permissions, "ignoring unparseable permissions"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_permissions(_path: &Path, _permissions: &str) -> Result<()> {
    Ok(())
}

/// Create `dir` (and parents) and restrict it to the owner.
pub fn create_secure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `files` below `dir`, creating subdirectories as needed.
pub fn write_files(dir: &Path, files: &FileSet) -> Result<()> {
    for (path, file) in files {
        let target = path.to_fs_path(dir);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, file.data.as_bytes())?;
        if let Some(permissions) = &file.permissions {
            apply_permissions(&target, permissions)?;
        }
    }
    Ok(())
}

/// Materialize `files` as the working directory `dir`.
///
/// Everything is written into a sibling staging directory first, which is
/// renamed into place once complete. On failure the staging directory is
/// wiped and `dir` is never created.
///
/// # Errors
/// - `AlreadyExists` if `dir` exists
pub fn materialize(dir: &Path, files: &FileSet) -> Result<()> {
    if dir.exists() {
        return Err(Error::AlreadyExists(format!(
            "Working directory already exists: {}",
            dir.display()
        )));
    }
    let parent = match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".sealbox-staging-")
        .tempdir_in(parent)?;

    let staged = write_files(staging.path(), files)
        .and_then(|_| create_secure_dir(staging.path()))
        .and_then(|_| fs::rename(staging.path(), dir).map_err(Error::from));

    if let Err(e) = staged {
        warn!(dir = %dir.display(), error = %e, "mount failed, wiping staging directory");
        secure_wipe(staging.path())?;
        return Err(e);
    }

    debug!(dir = %dir.display(), files = files.len(), "working directory materialized");
    Ok(())
}

/// Overwrite every file below `dir` with random bytes, then remove it.
pub fn secure_wipe(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut rng = rand::thread_rng();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let len = entry.metadata().map_err(std::io::Error::from)?.len() as usize;
        let mut noise = vec![0u8; len];
        rng.fill_bytes(&mut noise);

        match fs::OpenOptions::new().write(true).open(entry.path()) {
            Ok(mut file) => {
                file.write_all(&noise)?;
                file.sync_all()?;
            }
            // Read-only files are still removed below.
            Err(e) => warn!(path = %entry.path().display(), error = %e, "could not overwrite file"),
        }
    }

    fs::remove_dir_all(dir)?;
    debug!(dir = %dir.display(), "working directory wiped");
    Ok(())
}

/// Whether `dir` holds no files other than the manifest.
pub fn is_empty(dir: &Path) -> Result<bool> {
    Ok(scan_files(dir)?.is_empty())
}
