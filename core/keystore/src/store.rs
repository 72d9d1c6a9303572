//! Backend chain for credential resolution.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::{CredentialBackend, Secret};
use crate::file::EncryptedFileBackend;
use crate::helper::{HelperBackend, PowerShellHelper};
use crate::platform::{current_username, Platform};
use crate::security::SecurityCliBackend;
use sealbox_common::{Error, Result};
use sealbox_crypto::KdfParams;

/// Default wall-clock limit for helper processes.
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(5);

/// Inputs for building the platform backend chain.
#[derive(Debug, Clone)]
pub struct KeystoreSettings {
    /// Directory holding the encrypted fallback files.
    pub home: Option<PathBuf>,
    /// Account name for native stores and key for the fallback file.
    pub username: Option<String>,
    /// KDF parameters for the fallback file.
    pub kdf: KdfParams,
    /// Limit for `security` and PowerShell invocations.
    pub helper_timeout: Duration,
}

impl Default for KeystoreSettings {
    fn default() -> Self {
        Self {
            home: dirs::home_dir(),
            username: current_username(),
            kdf: KdfParams::STANDARD,
            helper_timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }
}

/// Ordered chain of credential backends.
///
/// Lookups try each backend in order; an error or a miss falls through to
/// the next one. Nothing is cached between calls.
pub struct CredentialStore {
    backends: Vec<Box<dyn CredentialBackend>>,
}

impl CredentialStore {
    /// Build a store from an explicit chain, highest priority first.
    pub fn new(backends: Vec<Box<dyn CredentialBackend>>) -> Self {
        Self { backends }
    }

    /// Build the fixed chain for `platform`.
    ///
    /// - macOS: keychain, then file
    /// - Windows: Credential Locker helper, then file
    /// - other: file
    ///
    /// Backends whose inputs are missing (no home directory, no username)
    /// are left out; an empty chain makes every operation report
    /// `CredentialStoreUnavailable`.
    pub fn for_platform(platform: Platform, settings: &KeystoreSettings) -> Self {
        let username = settings.username.clone().unwrap_or_default();
        let mut backends: Vec<Box<dyn CredentialBackend>> = Vec::new();

        if !username.is_empty() {
            match platform {
                Platform::MacOs => backends.push(Box::new(SecurityCliBackend::new(
                    username.clone(),
                    settings.helper_timeout,
                ))),
                Platform::Windows => backends.push(Box::new(HelperBackend::new(
                    PowerShellHelper::new(username.clone(), settings.helper_timeout),
                ))),
                Platform::Other => {}
            }
        }

        match &settings.home {
            Some(home) => match EncryptedFileBackend::new(home, username) {
                Ok(file) => backends.push(Box::new(file.with_kdf(settings.kdf))),
                Err(e) => warn!(error = %e, "file credential backend disabled"),
            },
            None => warn!("no home directory, file credential backend disabled"),
        }

        debug!(
            platform = %platform,
            backends = ?backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "credential store ready"
        );
        Self { backends }
    }

    /// The chain for the current host with default settings.
    pub fn system() -> Self {
        Self::for_platform(Platform::current(), &KeystoreSettings::default())
    }

    /// Names of the backends in priority order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Look up the password for `service`.
    ///
    /// Never fails: total failure is reported as `None` so callers can fall
    /// back to prompting.
    pub fn get_password(&self, service: &str) -> Option<Secret> {
        for backend in &self.backends {
            match backend.get(service) {
                Ok(Some(secret)) => {
                    debug!(backend = backend.name(), service, "password found");
                    return Some(secret);
                }
                Ok(None) => debug!(backend = backend.name(), service, "no password stored"),
                Err(e) => warn!(backend = backend.name(), error = %e, "credential lookup failed"),
            }
        }
        None
    }

    /// Whether any backend holds a password for `service`.
    pub fn has_password(&self, service: &str) -> bool {
        self.get_password(service).is_some()
    }

    /// Store the password in the first backend that accepts it.
    ///
    /// # Errors
    /// - `CredentialStoreUnavailable` if every backend failed
    pub fn set_password(&self, service: &str, secret: &str) -> Result<()> {
        for backend in &self.backends {
            match backend.set(service, secret) {
                Ok(()) => {
                    debug!(backend = backend.name(), service, "password stored");
                    return Ok(());
                }
                Err(e) => warn!(backend = backend.name(), error = %e, "credential store failed"),
            }
        }
        Err(Error::CredentialStoreUnavailable(format!(
            "no credential backend could store the password for {}",
            service
        )))
    }

    /// Remove the password from every backend.
    ///
    /// A backend that had no entry counts as success, so deleting an absent
    /// password is not an error.
    ///
    /// # Errors
    /// - `CredentialStoreUnavailable` if every backend failed
    pub fn delete_password(&self, service: &str) -> Result<()> {
        let mut any_ok = false;
        for backend in &self.backends {
            match backend.delete(service) {
                Ok(removed) => {
                    debug!(backend = backend.name(), service, removed, "password delete");
                    any_ok = true;
                }
                Err(e) => warn!(backend = backend.name(), error = %e, "credential delete failed"),
            }
        }
        if any_ok {
            Ok(())
        } else {
            Err(Error::CredentialStoreUnavailable(format!(
                "no credential backend could delete the password for {}",
                service
            )))
        }
    }
}
