//! Keeping plaintext secrets out of version control.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Append each of `entries` to `<root>/.gitignore` unless already listed.
///
/// Returns the entries that were added.
pub fn ensure_ignored(root: &Path, entries: &[&str]) -> Result<Vec<String>> {
    let path = root.join(".gitignore");
    let existing = if path.exists() {
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?
    } else {
        String::new()
    };
    let present: Vec<&str> = existing.lines().map(str::trim).collect();

    let missing: Vec<String> = entries
        .iter()
        .filter(|entry| !present.contains(*entry))
        .map(|entry| entry.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    for entry in &missing {
        writeln!(file, "{}", entry)?;
    }

    debug!(added = ?missing, "updated .gitignore");
    Ok(missing)
}
