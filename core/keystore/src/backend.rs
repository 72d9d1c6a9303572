//! Credential backend trait definition.

use zeroize::Zeroizing;

use sealbox_common::Result;

/// A password read from a credential backend, wiped on drop.
pub type Secret = Zeroizing<String>;

/// One credential facility.
///
/// Entries are keyed by a service name; the account is always the current
/// OS user and is fixed by each backend.
pub trait CredentialBackend: Send + Sync {
    /// Get the backend name (e.g., "keychain", "credential-locker", "file").
    fn name(&self) -> &str;

    /// Look up the secret stored for `service`.
    ///
    /// # Returns
    /// - `Ok(Some(_))` if an entry exists
    /// - `Ok(None)` if the facility answered but has no entry
    ///
    /// # Errors
    /// - The facility itself is unusable (tool missing, I/O failure, timeout)
    fn get(&self, service: &str) -> Result<Option<Secret>>;

    /// Store or replace the secret for `service`.
    fn set(&self, service: &str, secret: &str) -> Result<()>;

    /// Remove the entry for `service`.
    ///
    /// # Returns
    /// Whether an entry was removed.
    fn delete(&self, service: &str) -> Result<bool>;
}
