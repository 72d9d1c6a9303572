//! Mount/unmount lifecycle of a secrets project.
//!
//! States:
//! - `Absent`: neither package nor working directory exists
//! - `Sealed`: only the package exists
//! - `Unsealed`: the plaintext working directory exists
//!
//! Unmount compares the working directory against the manifest written at
//! mount time and skips re-encryption when nothing changed, so an
//! unchanged project never produces a new package in version control.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::lock::ProjectLock;
use crate::manifest::ChangeManifest;
use crate::package::{FileSet, PackageMetadata, SecretsPackage};
use crate::password::{prompt_new_password, resolve_password, PasswordSource, Prompter};
use crate::project::Workspace;
use crate::workdir;
use sealbox_common::{Error, Result, SensitiveBytes};
use sealbox_crypto::{derive_key_with, CipherSuite, FileCipher, KdfParams, PackageKey, Salt};
use sealbox_keystore::{CredentialStore, Secret};
use zeroize::Zeroizing;

/// Token `destroy` requires before deleting anything.
pub const DESTROY_CONFIRMATION: &str = "DELETE";

/// Tunables for a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VaultSettings {
    /// Key derivation parameters.
    pub kdf: KdfParams,
    /// Cipher suite for newly created packages.
    pub suite: CipherSuite,
}

/// Where a project currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Sealed,
    Unsealed,
    Absent,
}

/// Snapshot reported by [`SecretsVault::status`].
#[derive(Debug, Clone)]
pub struct VaultStatus {
    pub state: VaultState,
    pub project: String,
    pub secrets_dir: String,
    pub service: String,
    pub password_stored: bool,
    /// Package metadata version, if a readable package exists.
    pub version: Option<String>,
    pub created: Option<String>,
    pub package_file_count: Option<usize>,
    /// Why the package could not be read, if it exists but is unreadable.
    pub package_error: Option<String>,
    /// Files in the working directory while mounted.
    pub working_file_count: Option<usize>,
}

/// Result of [`SecretsVault::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// An empty working directory was created.
    Created { password_stored: bool },
    /// An existing working directory was sealed into a new package.
    SealedExisting { files: usize, password_stored: bool },
}

/// Result of [`SecretsVault::mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    Mounted {
        files: usize,
        source: PasswordSource,
        password_stored: bool,
    },
    /// The working directory already existed; nothing was decrypted.
    AlreadyMounted { files: usize },
}

/// Result of [`SecretsVault::unmount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// A new package was written.
    Sealed { files: usize },
    /// Nothing changed since mount; the package was left untouched.
    Unchanged,
    /// There was no working directory.
    NothingMounted,
    /// The working directory was empty and no package existed.
    EmptyDiscarded,
}

/// What [`SecretsVault::destroy`] removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DestroyReport {
    pub package: bool,
    pub config: bool,
    pub working_dir: bool,
    pub password: bool,
}

/// One secrets project: workspace, credential store and prompter.
pub struct SecretsVault {
    workspace: Workspace,
    store: CredentialStore,
    prompter: Box<dyn Prompter>,
    settings: VaultSettings,
}

impl SecretsVault {
    pub fn new(workspace: Workspace, store: CredentialStore, prompter: Box<dyn Prompter>) -> Self {
        Self {
            workspace,
            store,
            prompter,
            settings: VaultSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: VaultSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Current lifecycle state, from what is on disk.
    pub fn state(&self) -> VaultState {
        if self.workspace.secrets_path().exists() {
            VaultState::Unsealed
        } else if self.workspace.package_path().is_file() {
            VaultState::Sealed
        } else {
            VaultState::Absent
        }
    }

    /// Describe the project without decrypting anything.
    pub fn status(&self) -> Result<VaultStatus> {
        let ws = &self.workspace;
        let mut status = VaultStatus {
            state: self.state(),
            project: ws.project().to_string(),
            secrets_dir: ws.secrets_dir_name().to_string(),
            service: ws.service().to_string(),
            password_stored: self.store.has_password(ws.service()),
            version: None,
            created: None,
            package_file_count: None,
            package_error: None,
            working_file_count: None,
        };

        if ws.package_path().is_file() {
            match SecretsPackage::load(&ws.package_path()) {
                Ok(pkg) => {
                    status.package_file_count = Some(pkg.files.len());
                    status.created = Some(pkg.metadata.created);
                    status.version = Some(pkg.metadata.version);
                }
                Err(e) => status.package_error = Some(e.to_string()),
            }
        }
        if status.state == VaultState::Unsealed {
            status.working_file_count = Some(workdir::scan_files(&ws.secrets_path())?.len());
        }
        Ok(status)
    }

    /// Start a new project.
    ///
    /// With no working directory, an empty one is created. With an existing
    /// working directory the user is asked to confirm, then its contents
    /// are sealed straight away.
    ///
    /// # Errors
    /// - `AlreadyExists` if a package exists
    /// - `NotPermitted` if sealing an existing directory was declined
    pub fn create(&self, password: Option<&str>) -> Result<CreateOutcome> {
        let _lock = self.lock()?;
        let ws = &self.workspace;
        let package_path = ws.package_path();
        let dir = ws.secrets_path();

        if package_path.exists() {
            return Err(Error::AlreadyExists(format!(
                "{} already exists; mount it instead",
                package_path.display()
            )));
        }

        let existing = dir.exists() && !workdir::is_empty(&dir)?;
        if existing {
            let question = format!("Encrypt existing {}/ contents?", ws.secrets_dir_name());
            if !self.prompter.confirm(&question)? {
                return Err(Error::NotPermitted(format!(
                    "{}/ exists and was not encrypted",
                    ws.secrets_dir_name()
                )));
            }
        }

        let password = match password {
            Some(p) if !p.is_empty() => Zeroizing::new(p.to_string()),
            Some(_) => return Err(Error::InvalidInput("Password cannot be empty".to_string())),
            None => prompt_new_password(self.prompter.as_ref(), "Enter password for this project: ")?,
        };

        if existing {
            let files = workdir::read_files(&dir)?;
            let count = files.len();
            let salt = Salt::generate();
            let metadata = PackageMetadata::new(ws.project(), &salt, self.settings.suite);
            self.seal_to_disk(metadata, &salt, password.as_bytes(), &files)?;
            workdir::secure_wipe(&dir)?;

            let password_stored = self.try_store(&password);
            ws.save_config()?;
            info!(project = %ws.project(), files = count, "sealed existing working directory");
            return Ok(CreateOutcome::SealedExisting {
                files: count,
                password_stored,
            });
        }

        workdir::create_secure_dir(&dir)?;
        ChangeManifest::compute(&dir)?.store(&dir)?;
        let password_stored = self.try_store(&password);
        ws.save_config()?;
        info!(project = %ws.project(), dir = %dir.display(), "created project");
        Ok(CreateOutcome::Created { password_stored })
    }

    /// Decrypt the package into the working directory.
    ///
    /// Files are staged and moved into place only once all of them
    /// decrypted, so a failure never leaves a partial working directory.
    ///
    /// # Errors
    /// - `PackageNotFound` if there is no package
    /// - `NoInteractiveInput` if no password is stored and prompting is impossible
    /// - `WrongPassword` for authenticated packages opened with the wrong password
    pub fn mount(&self) -> Result<MountOutcome> {
        let _lock = self.lock()?;
        let ws = &self.workspace;
        let dir = ws.secrets_path();

        if dir.exists() {
            let files = workdir::scan_files(&dir)?.len();
            debug!(dir = %dir.display(), "already mounted");
            return Ok(MountOutcome::AlreadyMounted { files });
        }

        let pkg = SecretsPackage::load(&ws.package_path())?;
        let password = resolve_password(&self.store, ws.service(), self.prompter.as_ref())?;
        let key = self.package_key(password.as_bytes(), &pkg)?;

        let files = pkg.decrypt_all(&key)?;
        workdir::materialize(&dir, &files)?;
        ChangeManifest::compute(&dir)?.store(&dir)?;
        info!(project = %ws.project(), files = files.len(), "mounted");

        let mut password_stored = password.source == PasswordSource::Stored;
        if !password_stored && !self.store.has_password(ws.service()) {
            match self.prompter.confirm("Store password for future use?") {
                Ok(true) => password_stored = self.try_store(&password.secret),
                Ok(false) => {}
                Err(e) => debug!(error = %e, "not offering to store password"),
            }
        }

        Ok(MountOutcome::Mounted {
            files: files.len(),
            source: password.source,
            password_stored,
        })
    }

    /// Decrypt one file from the package without writing anything to disk.
    ///
    /// # Returns
    /// `Ok(None)` if the package has no such file.
    pub fn read_file(&self, path: &str) -> Result<Option<SensitiveBytes>> {
        let ws = &self.workspace;
        let pkg = SecretsPackage::load(&ws.package_path())?;
        let password = resolve_password(&self.store, ws.service(), self.prompter.as_ref())?;
        let key = self.package_key(password.as_bytes(), &pkg)?;
        pkg.read_one_file(&key, path)
    }

    /// Paths stored in the package. Needs no password.
    pub fn list_files(&self) -> Result<Vec<String>> {
        Ok(SecretsPackage::load(&self.workspace.package_path())?.list_files())
    }

    /// Seal the working directory back into the package and remove it.
    ///
    /// Skips encryption entirely, and needs no password, when the working
    /// directory matches the manifest written at mount time and a package
    /// exists. An existing package keeps its salt, suite and creation time.
    ///
    /// # Errors
    /// - `NotPermitted` if the existing package is unreadable and replacing
    ///   it was not confirmed; the working directory stays in place
    pub fn unmount(&self) -> Result<UnmountOutcome> {
        let _lock = self.lock()?;
        let ws = &self.workspace;
        let dir = ws.secrets_path();
        let package_path = ws.package_path();

        if !dir.exists() {
            return Ok(UnmountOutcome::NothingMounted);
        }
        if !dir.is_dir() {
            return Err(Error::InvalidInput(format!("{} is not a directory", dir.display())));
        }

        let package_exists = package_path.is_file();
        if package_exists && !ChangeManifest::has_changed(&dir)? {
            workdir::secure_wipe(&dir)?;
            info!(project = %ws.project(), "no changes, package left untouched");
            return Ok(UnmountOutcome::Unchanged);
        }

        let files = workdir::read_files(&dir)?;
        if files.is_empty() && !package_exists {
            workdir::secure_wipe(&dir)?;
            info!(dir = %dir.display(), "discarded empty working directory");
            return Ok(UnmountOutcome::EmptyDiscarded);
        }

        let existing = if package_exists {
            match SecretsPackage::load(&package_path) {
                Ok(pkg) => Some(pkg),
                Err(e) => {
                    let question = format!(
                        "{} is unreadable ({}). Replace it with the contents of {}/?",
                        package_path.display(),
                        e,
                        ws.secrets_dir_name()
                    );
                    match self.prompter.confirm(&question) {
                        Ok(true) => {
                            warn!(error = %e, "replacing unreadable package");
                            None
                        }
                        Ok(false) => {
                            return Err(Error::NotPermitted(format!(
                                "{} is unreadable and was not replaced: {}",
                                package_path.display(),
                                e
                            )))
                        }
                        Err(prompt) => {
                            return Err(Error::NotPermitted(format!(
                                "{} is unreadable and replacing it needs confirmation ({}): {}",
                                package_path.display(),
                                prompt,
                                e
                            )))
                        }
                    }
                }
            }
        } else {
            None
        };

        let password = resolve_password(&self.store, ws.service(), self.prompter.as_ref())?;

        let (metadata, salt) = match &existing {
            Some(pkg) => {
                let salt = pkg.salt()?;
                self.verify_password(password.as_bytes(), pkg)?;
                let mut metadata = PackageMetadata::new(ws.project(), &salt, pkg.suite()?);
                if !pkg.metadata.created.is_empty() {
                    metadata.created = pkg.metadata.created.clone();
                }
                (metadata, salt)
            }
            None => {
                let salt = Salt::generate();
                (PackageMetadata::new(ws.project(), &salt, self.settings.suite), salt)
            }
        };

        self.seal_to_disk(metadata, &salt, password.as_bytes(), &files)?;
        self.try_store(&password.secret);
        workdir::secure_wipe(&dir)?;
        info!(project = %ws.project(), files = files.len(), "sealed");
        Ok(UnmountOutcome::Sealed { files: files.len() })
    }

    /// Mount, let `edit` change the working directory, then unmount.
    ///
    /// If `edit` fails the working directory is left mounted.
    pub fn update<F>(&self, edit: F) -> Result<UnmountOutcome>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        self.mount()?;
        let dir = self.workspace.secrets_path();
        if let Err(e) = edit(&dir) {
            warn!(dir = %dir.display(), error = %e, "edit failed, leaving secrets mounted");
            return Err(e);
        }
        self.unmount()
    }

    /// Delete the package, sidecar, working directory and stored password.
    ///
    /// # Errors
    /// - `NotPermitted` unless `confirmation` is [`DESTROY_CONFIRMATION`];
    ///   nothing is touched in that case
    pub fn destroy(&self, confirmation: &str) -> Result<DestroyReport> {
        if confirmation != DESTROY_CONFIRMATION {
            return Err(Error::NotPermitted(format!(
                "destroy requires the confirmation token '{}'",
                DESTROY_CONFIRMATION
            )));
        }

        let _lock = self.lock()?;
        let ws = &self.workspace;
        let mut report = DestroyReport::default();

        let package_path = ws.package_path();
        if package_path.exists() {
            fs::remove_file(&package_path)?;
            report.package = true;
        }
        let sidecar = ws.sidecar_path();
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
            report.config = true;
        }
        let dir = ws.secrets_path();
        if dir.exists() {
            workdir::secure_wipe(&dir)?;
            report.working_dir = true;
        }
        if self.store.has_password(ws.service()) {
            match self.store.delete_password(ws.service()) {
                Ok(()) => report.password = true,
                Err(e) => warn!(error = %e, "could not remove stored password"),
            }
        }

        info!(project = %ws.project(), ?report, "destroyed project");
        Ok(report)
    }

    /// Re-encrypt the package under a new password and a new salt.
    ///
    /// Decryption and re-encryption happen in memory; the working directory
    /// is never created. With `upgrade`, the package moves to the
    /// authenticated suite.
    ///
    /// A legacy package cannot tell a wrong current password from the right
    /// one, so a typo here re-encrypts garbage.
    ///
    /// # Returns
    /// Whether the new password could be stored.
    ///
    /// # Errors
    /// - `PackageNotFound` if there is no package
    /// - `NotPermitted` while the project is mounted
    pub fn change_password(&self, new_password: Option<&str>, upgrade: bool) -> Result<bool> {
        let _lock = self.lock()?;
        let ws = &self.workspace;

        if ws.secrets_path().exists() {
            return Err(Error::NotPermitted(format!(
                "{}/ is mounted; unmount first",
                ws.secrets_dir_name()
            )));
        }

        let pkg = SecretsPackage::load(&ws.package_path())?;
        let current = resolve_password(&self.store, ws.service(), self.prompter.as_ref())?;
        let files = pkg.decrypt_all(&self.package_key(current.as_bytes(), &pkg)?)?;

        let new_password = match new_password {
            Some(p) if !p.is_empty() => Zeroizing::new(p.to_string()),
            Some(_) => return Err(Error::InvalidInput("Password cannot be empty".to_string())),
            None => prompt_new_password(self.prompter.as_ref(), "Enter new password: ")?,
        };

        let suite = if upgrade { CipherSuite::Authenticated } else { pkg.suite()? };
        let salt = Salt::generate();
        let mut metadata = PackageMetadata::new(ws.project(), &salt, suite);
        if !pkg.metadata.created.is_empty() {
            metadata.created = pkg.metadata.created.clone();
        }
        self.seal_to_disk(metadata, &salt, new_password.as_bytes(), &files)?;

        if let Err(e) = self.store.delete_password(ws.service()) {
            debug!(error = %e, "no previous password to remove");
        }
        let stored = self.try_store(&new_password);
        info!(project = %ws.project(), version = suite.format_version(), stored, "password changed");
        Ok(stored)
    }

    /// Store a password for this project.
    ///
    /// If a package exists and can detect wrong passwords, the password is
    /// checked against it first.
    pub fn store_password(&self, password: Option<&str>) -> Result<()> {
        let ws = &self.workspace;
        let password = match password {
            Some(p) => Zeroizing::new(p.to_string()),
            None => self.prompter.password("Enter password to store: ")?,
        };
        if password.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }

        if ws.package_path().is_file() {
            let pkg = SecretsPackage::load(&ws.package_path())?;
            self.verify_password(password.as_bytes(), &pkg)?;
        }

        self.store.set_password(ws.service(), &password)?;
        info!(service = ws.service(), "password stored");
        Ok(())
    }

    /// Remove the stored password.
    ///
    /// # Returns
    /// Whether a password had been stored.
    pub fn clear_password(&self) -> Result<bool> {
        let service = self.workspace.service();
        if !self.store.has_password(service) {
            return Ok(false);
        }
        self.store.delete_password(service)?;
        info!(service, "password cleared");
        Ok(true)
    }

    fn lock(&self) -> Result<ProjectLock> {
        ProjectLock::acquire(&self.workspace.lock_path())
    }

    fn derive(&self, password: &[u8], salt: &Salt, suite: CipherSuite) -> Result<PackageKey> {
        let key = derive_key_with(password, salt, &self.settings.kdf)?;
        Ok(PackageKey::new(key, suite))
    }

    fn package_key(&self, password: &[u8], pkg: &SecretsPackage) -> Result<PackageKey> {
        self.derive(password, &pkg.salt()?, pkg.suite()?)
    }

    /// Check `password` against one entry of an authenticated package.
    /// Legacy packages accept any password.
    fn verify_password(&self, password: &[u8], pkg: &SecretsPackage) -> Result<()> {
        if !pkg.suite()?.is_authenticated() {
            return Ok(());
        }
        if let Some(path) = pkg.files.keys().next() {
            let key = self.package_key(password, pkg)?;
            pkg.read_one_file(&key, path.as_str())?;
        }
        Ok(())
    }

    fn seal_to_disk(
        &self,
        metadata: PackageMetadata,
        salt: &Salt,
        password: &[u8],
        files: &FileSet,
    ) -> Result<()> {
        let suite = CipherSuite::for_format_version(&metadata.version)?;
        let key = self.derive(password, salt, suite)?;
        let cipher: &dyn FileCipher = &key;
        SecretsPackage::seal(metadata, cipher, files)?.save(&self.workspace.package_path())
    }

    /// Store `password`, reporting success; failure is only logged.
    fn try_store(&self, password: &Secret) -> bool {
        match self.store.set_password(self.workspace.service(), password) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "could not store password");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::{NonInteractive, ScriptedPrompter};
    use sealbox_common::ProjectName;
    use sealbox_keystore::{CredentialBackend, EncryptedFileBackend, MemoryBackend};
    use tempfile::TempDir;

    const ENV: &[u8] = b"DB_HOST=localhost\nDB_USER=testuser\n";

    struct Fixture {
        root: TempDir,
        home: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
                home: TempDir::new().unwrap(),
            }
        }

        fn workspace(&self) -> Workspace {
            Workspace::new(self.root.path(), ProjectName::new("myapp").unwrap(), "secrets").unwrap()
        }

        fn store(&self) -> CredentialStore {
            let file = EncryptedFileBackend::new(self.home.path(), "alice")
                .unwrap()
                .with_kdf(KdfParams::testing());
            CredentialStore::new(vec![Box::new(file)])
        }

        fn vault_with(&self, prompter: impl Prompter + 'static) -> SecretsVault {
            SecretsVault::new(self.workspace(), self.store(), Box::new(prompter)).with_settings(VaultSettings {
                kdf: KdfParams::testing(),
                suite: CipherSuite::Legacy,
            })
        }

        fn vault(&self) -> SecretsVault {
            self.vault_with(NonInteractive)
        }

        fn secrets(&self) -> std::path::PathBuf {
            self.root.path().join("secrets")
        }

        fn package(&self) -> std::path::PathBuf {
            self.root.path().join(".myapp.secrets")
        }

        /// Create the project with `test123` and seal one `.env` file.
        fn sealed(&self) -> SecretsVault {
            let vault = self.vault();
            vault.create(Some("test123")).unwrap();
            fs::write(self.secrets().join(".env"), ENV).unwrap();
            assert_eq!(vault.unmount().unwrap(), UnmountOutcome::Sealed { files: 1 });
            vault
        }
    }

    #[test]
    fn test_concrete_scenario() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        assert_eq!(vault.state(), VaultState::Sealed);
        assert_eq!(vault.list_files().unwrap(), vec![".env"]);

        assert!(matches!(vault.mount().unwrap(), MountOutcome::Mounted { files: 1, .. }));
        assert_eq!(fs::read(fx.secrets().join(".env")).unwrap(), ENV);
        assert_eq!(vault.state(), VaultState::Unsealed);
        vault.unmount().unwrap();

        // Same package, wrong password, nothing stored.
        let wrong = SecretsVault::new(
            fx.workspace(),
            CredentialStore::new(Vec::new()),
            Box::new(ScriptedPrompter::new().with_password("wrong")),
        )
        .with_settings(VaultSettings {
            kdf: KdfParams::testing(),
            suite: CipherSuite::Legacy,
        });
        let garbage = wrong.read_file(".env").unwrap().unwrap();
        assert_eq!(garbage.len(), ENV.len());
        assert_ne!(garbage.as_bytes(), ENV);
    }

    #[test]
    fn test_create_refuses_existing_package() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        assert!(matches!(vault.create(Some("x")), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_create_writes_sidecar_and_stores_password() {
        let fx = Fixture::new();
        let vault = fx.vault();
        let outcome = vault.create(Some("test123")).unwrap();
        assert_eq!(outcome, CreateOutcome::Created { password_stored: true });

        assert!(fx.secrets().is_dir());
        assert!(!fx.package().exists());
        assert_eq!(vault.store().get_password(vault.workspace().service()).unwrap().as_str(), "test123");

        let discovered = Workspace::discover(fx.root.path()).unwrap();
        assert_eq!(discovered, fx.workspace());
    }

    #[test]
    fn test_create_seals_existing_folder_after_confirmation() {
        let fx = Fixture::new();
        fs::create_dir(fx.secrets()).unwrap();
        fs::write(fx.secrets().join("api.key"), "k").unwrap();

        let declined = fx.vault_with(ScriptedPrompter::new().with_answer(false));
        assert!(matches!(declined.create(Some("pw")), Err(Error::NotPermitted(_))));
        assert!(fx.secrets().join("api.key").exists());

        let accepted = fx.vault_with(ScriptedPrompter::new().with_answer(true));
        let outcome = accepted.create(Some("pw")).unwrap();
        assert_eq!(
            outcome,
            CreateOutcome::SealedExisting {
                files: 1,
                password_stored: true
            }
        );
        assert!(!fx.secrets().exists());
        assert_eq!(accepted.list_files().unwrap(), vec!["api.key"]);
    }

    #[test]
    fn test_unmount_without_changes_is_byte_identical_and_needs_no_password() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        vault.mount().unwrap();
        let before = fs::read(fx.package()).unwrap();

        // No credential and no prompt: any attempt to derive a key would fail.
        let keyless = SecretsVault::new(fx.workspace(), CredentialStore::new(Vec::new()), Box::new(NonInteractive));
        assert_eq!(keyless.unmount().unwrap(), UnmountOutcome::Unchanged);
        assert_eq!(fs::read(fx.package()).unwrap(), before);
        assert!(!fx.secrets().exists());

        assert_eq!(keyless.unmount().unwrap(), UnmountOutcome::NothingMounted);
        assert_eq!(fs::read(fx.package()).unwrap(), before);
    }

    #[test]
    fn test_unmount_after_edit_keeps_salt() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        let salt_before = SecretsPackage::load(&fx.package()).unwrap().metadata.salt;

        let outcome = vault
            .update(|dir| {
                fs::remove_file(dir.join(".env"))?;
                fs::create_dir(dir.join("ssl"))?;
                fs::write(dir.join("ssl").join("key.pem"), "KEY")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, UnmountOutcome::Sealed { files: 1 });

        let pkg = SecretsPackage::load(&fx.package()).unwrap();
        assert_eq!(pkg.metadata.salt, salt_before);
        assert_eq!(pkg.list_files(), vec!["ssl/key.pem"]);
        assert_eq!(vault.read_file("ssl\\key.pem").unwrap().unwrap().as_bytes(), b"KEY");
    }

    #[test]
    fn test_update_edit_failure_leaves_mounted() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        let result = vault.update(|_| Err(Error::InvalidInput("editor crashed".to_string())));
        assert!(result.is_err());
        assert_eq!(vault.state(), VaultState::Unsealed);
    }

    #[test]
    fn test_empty_working_dir() {
        let fx = Fixture::new();
        let vault = fx.vault();
        vault.create(Some("pw")).unwrap();
        fs::write(fx.secrets().join("tmp"), "x").unwrap();
        fs::remove_file(fx.secrets().join("tmp")).unwrap();
        assert_eq!(vault.unmount().unwrap(), UnmountOutcome::EmptyDiscarded);
        assert_eq!(vault.state(), VaultState::Absent);

        let fx = Fixture::new();
        let vault = fx.sealed();
        vault.mount().unwrap();
        fs::remove_file(fx.secrets().join(".env")).unwrap();
        assert_eq!(vault.unmount().unwrap(), UnmountOutcome::Sealed { files: 0 });
        assert!(vault.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_mount_when_already_mounted() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        vault.mount().unwrap();
        assert_eq!(vault.mount().unwrap(), MountOutcome::AlreadyMounted { files: 1 });
    }

    #[test]
    fn test_mount_without_package() {
        let fx = Fixture::new();
        assert!(matches!(fx.vault().mount(), Err(Error::PackageNotFound(_))));
    }

    #[test]
    fn test_mount_non_interactive_without_password() {
        let fx = Fixture::new();
        fx.sealed().clear_password().unwrap();
        assert!(matches!(fx.vault().mount(), Err(Error::NoInteractiveInput(_))));
        assert!(!fx.secrets().exists());
    }

    #[test]
    fn test_mount_with_prompt_offers_to_store() {
        let fx = Fixture::new();
        fx.sealed().clear_password().unwrap();

        let vault = fx.vault_with(ScriptedPrompter::new().with_password("test123").with_answer(true));
        let outcome = vault.mount().unwrap();
        assert_eq!(
            outcome,
            MountOutcome::Mounted {
                files: 1,
                source: PasswordSource::Prompted,
                password_stored: true
            }
        );
        assert!(vault.store().has_password(vault.workspace().service()));
    }

    #[test]
    fn test_authenticated_wrong_password_mounts_nothing() {
        let fx = Fixture::new();
        let vault = fx.vault().with_settings(VaultSettings {
            kdf: KdfParams::testing(),
            suite: CipherSuite::Authenticated,
        });
        vault.create(Some("test123")).unwrap();
        fs::write(fx.secrets().join(".env"), ENV).unwrap();
        vault.unmount().unwrap();
        assert!(SecretsPackage::load(&fx.package()).unwrap().metadata.version.starts_with("2."));

        vault.store().set_password(vault.workspace().service(), "wrong").unwrap();
        assert!(matches!(vault.mount(), Err(Error::WrongPassword(_))));
        assert!(!fx.secrets().exists());
        assert!(matches!(vault.store_password(Some("still-wrong")), Err(Error::WrongPassword(_))));
        vault.store_password(Some("test123")).unwrap();
        assert!(matches!(vault.mount().unwrap(), MountOutcome::Mounted { .. }));
    }

    #[test]
    fn test_destroy_requires_confirmation() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        let service = vault.workspace().service().to_string();

        assert!(matches!(vault.destroy("yes"), Err(Error::NotPermitted(_))));
        assert!(fx.package().exists());
        assert!(vault.store().has_password(&service));

        let report = vault.destroy(DESTROY_CONFIRMATION).unwrap();
        assert!(report.package && report.config && report.password);
        assert!(!report.working_dir);
        assert_eq!(vault.state(), VaultState::Absent);
        assert!(!vault.store().has_password(&service));
    }

    #[test]
    fn test_change_password() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        let salt_before = SecretsPackage::load(&fx.package()).unwrap().metadata.salt;

        assert!(vault.change_password(Some("n3w"), false).unwrap());
        let pkg = SecretsPackage::load(&fx.package()).unwrap();
        assert_ne!(pkg.metadata.salt, salt_before);
        assert_eq!(pkg.metadata.version, "1.0.4");
        assert_eq!(
            vault.store().get_password(vault.workspace().service()).unwrap().as_str(),
            "n3w"
        );
        assert_eq!(vault.read_file(".env").unwrap().unwrap().as_bytes(), ENV);
        assert!(!fx.secrets().exists());
    }

    #[test]
    fn test_change_password_reports_unstored_password() {
        let fx = Fixture::new();
        fx.sealed();

        struct ReadOnly(MemoryBackend);
        impl CredentialBackend for ReadOnly {
            fn name(&self) -> &str {
                "read-only"
            }
            fn get(&self, service: &str) -> Result<Option<Secret>> {
                self.0.get(service)
            }
            fn set(&self, _: &str, _: &str) -> Result<()> {
                Err(Error::CredentialStoreUnavailable("read-only".to_string()))
            }
            fn delete(&self, service: &str) -> Result<bool> {
                self.0.delete(service)
            }
        }

        let memory = MemoryBackend::new();
        memory.set(fx.workspace().service(), "test123").unwrap();
        let store = CredentialStore::new(vec![Box::new(ReadOnly(memory))]);
        let vault = SecretsVault::new(fx.workspace(), store, Box::new(NonInteractive)).with_settings(VaultSettings {
            kdf: KdfParams::testing(),
            suite: CipherSuite::Legacy,
        });

        assert!(!vault.change_password(Some("n3w"), false).unwrap());
        assert!(!vault.store().has_password(vault.workspace().service()));
    }

    #[test]
    fn test_unmount_refuses_to_replace_unreadable_package() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        vault.mount().unwrap();
        fs::write(fx.secrets().join(".env"), "DB_HOST=prod\n").unwrap();

        let conflicted = b"<<<<<<< HEAD\n{}\n=======\n{}\n>>>>>>> origin/main\n";
        fs::write(fx.package(), conflicted).unwrap();

        assert!(matches!(vault.unmount(), Err(Error::NotPermitted(_))));
        let declined = fx.vault_with(ScriptedPrompter::new().with_answer(false));
        assert!(matches!(declined.unmount(), Err(Error::NotPermitted(_))));
        assert_eq!(fs::read(fx.package()).unwrap(), conflicted);
        assert!(fx.secrets().join(".env").exists());

        let accepted = fx.vault_with(ScriptedPrompter::new().with_answer(true));
        assert_eq!(accepted.unmount().unwrap(), UnmountOutcome::Sealed { files: 1 });
        assert_eq!(accepted.read_file(".env").unwrap().unwrap().as_bytes(), b"DB_HOST=prod\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unmount_with_non_utf8_names_keeps_working_dir() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let fx = Fixture::new();
        let vault = fx.sealed();
        vault.mount().unwrap();
        fs::write(fx.secrets().join(OsStr::from_bytes(b"key\xff")), "one").unwrap();
        fs::write(fx.secrets().join(OsStr::from_bytes(b"key\xfe")), "two").unwrap();

        assert!(matches!(vault.unmount(), Err(Error::InvalidInput(_))));
        assert!(fx.secrets().join(OsStr::from_bytes(b"key\xff")).exists());
        assert!(fx.secrets().join(OsStr::from_bytes(b"key\xfe")).exists());
        assert_eq!(vault.list_files().unwrap(), vec![".env"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unmount_seals_symlinked_file() {
        let fx = Fixture::new();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("cert.pem");
        fs::write(&target, "CERT").unwrap();

        let vault = fx.sealed();
        vault.mount().unwrap();
        std::os::unix::fs::symlink(&target, fx.secrets().join("cert.pem")).unwrap();

        assert_eq!(vault.unmount().unwrap(), UnmountOutcome::Sealed { files: 2 });
        assert_eq!(vault.list_files().unwrap(), vec![".env", "cert.pem"]);
        assert_eq!(vault.read_file("cert.pem").unwrap().unwrap().as_bytes(), b"CERT");
        assert_eq!(fs::read(&target).unwrap(), b"CERT");
    }

    #[test]
    fn test_change_password_upgrade_and_mounted_refusal() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        vault.change_password(Some("n3w"), true).unwrap();
        assert_eq!(
            SecretsPackage::load(&fx.package()).unwrap().suite().unwrap(),
            CipherSuite::Authenticated
        );
        assert_eq!(vault.read_file(".env").unwrap().unwrap().as_bytes(), ENV);

        vault.mount().unwrap();
        assert!(matches!(vault.change_password(Some("x"), false), Err(Error::NotPermitted(_))));
    }

    #[test]
    fn test_status() {
        let fx = Fixture::new();
        let vault = fx.vault();
        assert_eq!(vault.status().unwrap().state, VaultState::Absent);

        let vault = fx.sealed();
        let status = vault.status().unwrap();
        assert_eq!(status.state, VaultState::Sealed);
        assert_eq!(status.package_file_count, Some(1));
        assert_eq!(status.version.as_deref(), Some("1.0.4"));
        assert!(status.password_stored);

        vault.mount().unwrap();
        assert_eq!(vault.status().unwrap().working_file_count, Some(1));
    }

    #[test]
    fn test_lock_blocks_concurrent_mutation() {
        let fx = Fixture::new();
        let vault = fx.sealed();
        let _held = ProjectLock::acquire(&vault.workspace().lock_path()).unwrap();
        assert!(matches!(vault.mount(), Err(Error::Locked(_))));
        assert!(matches!(vault.unmount(), Err(Error::Locked(_))));
        assert!(vault.list_files().is_ok());
    }

    #[test]
    fn test_credential_fallthrough_during_mount() {
        struct Offline;
        impl CredentialBackend for Offline {
            fn name(&self) -> &str {
                "offline"
            }
            fn get(&self, _: &str) -> Result<Option<Secret>> {
                Err(Error::CredentialStoreUnavailable("down".to_string()))
            }
            fn set(&self, _: &str, _: &str) -> Result<()> {
                Err(Error::CredentialStoreUnavailable("down".to_string()))
            }
            fn delete(&self, _: &str) -> Result<bool> {
                Err(Error::CredentialStoreUnavailable("down".to_string()))
            }
        }

        let fx = Fixture::new();
        let memory = MemoryBackend::new();
        let store = CredentialStore::new(vec![Box::new(Offline), Box::new(memory)]);
        let vault = SecretsVault::new(fx.workspace(), store, Box::new(NonInteractive)).with_settings(VaultSettings {
            kdf: KdfParams::testing(),
            suite: CipherSuite::Legacy,
        });
        vault.create(Some("test123")).unwrap();
        fs::write(fx.secrets().join(".env"), ENV).unwrap();
        vault.unmount().unwrap();

        assert!(matches!(vault.mount().unwrap(), MountOutcome::Mounted { source: PasswordSource::Stored, .. }));
        assert_eq!(fs::read(fx.secrets().join(".env")).unwrap(), ENV);
    }
}
