//! Project configuration and workspace layout.
//!
//! A workspace is one directory holding the package file, the plaintext
//! working directory while mounted, and a small sidecar file that pins the
//! credential service name so it survives directory renames.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use sealbox_common::{Error, ProjectName, Result};

/// Sidecar file holding the credential service name and project settings.
pub const SIDECAR_FILE: &str = ".secrets_keychain_entry";

/// Working directory names recognized during discovery, in priority order.
pub const KNOWN_SECRETS_DIRS: [&str; 4] = [".private", "secrets", ".secrets", "private"];

/// Working directory name used when nothing else is configured.
pub const DEFAULT_SECRETS_DIR: &str = "secrets";

/// Project name used when the workspace directory has no usable name.
pub const FALLBACK_PROJECT: &str = "secrets_project";

const SERVICE_PREFIX: &str = "secrets_manager_dir_";

/// Persistent project settings stored in the sidecar.
///
/// The sidecar is line oriented: service name, project name, secrets
/// directory. Files with more lines are read from the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub service: String,
    pub project: Option<ProjectName>,
    pub secrets_dir: Option<String>,
}

impl ProjectConfig {
    /// Parse sidecar contents.
    ///
    /// # Errors
    /// - `InvalidFormat` if the service line is empty
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.trim().split('\n').map(str::trim).collect();
        let service = lines.first().copied().unwrap_or_default();
        if service.is_empty() {
            return Err(Error::InvalidFormat(format!("{} has no service name", SIDECAR_FILE)));
        }

        let (project, secrets_dir) = if lines.len() >= 3 {
            (lines[lines.len() - 2], lines[lines.len() - 1])
        } else {
            ("", "")
        };

        let project = if project.is_empty() {
            None
        } else {
            match ProjectName::new(project) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(error = %e, "ignoring project name in sidecar");
                    None
                }
            }
        };

        Ok(Self {
            service: service.to_string(),
            project,
            secrets_dir: Some(secrets_dir.to_string()).filter(|d| !d.is_empty()),
        })
    }

    /// Read the sidecar in `root`, if present and readable.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(SIDECAR_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Self::parse(&text).map(Some)
    }

    /// Serialize in sidecar form.
    pub fn to_sidecar(&self) -> String {
        match (&self.project, &self.secrets_dir) {
            (Some(project), Some(dir)) => format!("{}\n{}\n{}", self.service, project, dir),
            _ => self.service.clone(),
        }
    }

    /// Write the sidecar into `root`.
    pub fn save(&self, root: &Path) -> Result<()> {
        fs::write(root.join(SIDECAR_FILE), self.to_sidecar())?;
        debug!(root = %root.display(), service = %self.service, "saved project config");
        Ok(())
    }
}

/// Credential service name derived from the absolute workspace path.
pub fn default_service_name(root: &Path) -> String {
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    format!("{}{}", SERVICE_PREFIX, &hex::encode(digest)[..12])
}

/// Resolved locations and names for one project.
///
/// Built once at startup and passed to every operation; nothing below this
/// reads the current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    project: ProjectName,
    secrets_dir: String,
    service: String,
}

impl Workspace {
    /// A workspace with explicit settings.
    ///
    /// The service name comes from the sidecar if one exists, otherwise
    /// from the workspace path.
    ///
    /// # Errors
    /// - `InvalidInput` if `secrets_dir` is not a single relative component
    pub fn new(root: impl Into<PathBuf>, project: ProjectName, secrets_dir: impl Into<String>) -> Result<Self> {
        let root = root.into();
        let secrets_dir = secrets_dir.into();
        validate_secrets_dir(&secrets_dir)?;

        let service = match ProjectConfig::load(&root) {
            Ok(Some(config)) => config.service,
            Ok(None) => default_service_name(&root),
            Err(e) => {
                warn!(error = %e, "unreadable sidecar, deriving service name");
                default_service_name(&root)
            }
        };

        Ok(Self {
            root,
            project,
            secrets_dir,
            service,
        })
    }

    /// Work out the project settings for `root` from what is on disk.
    ///
    /// Order: sidecar, then an existing `.<project>.secrets` file, then a
    /// known working directory name, then the directory name itself.
    pub fn discover(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = ProjectConfig::load(&root).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable sidecar, ignoring");
            None
        });

        let mut project = config.as_ref().and_then(|c| c.project.clone());
        let mut secrets_dir = config.as_ref().and_then(|c| c.secrets_dir.clone());

        if project.is_none() {
            project = find_package_project(&root)?;
        }
        if secrets_dir.is_none() {
            secrets_dir = KNOWN_SECRETS_DIRS
                .iter()
                .find(|d| root.join(d).is_dir())
                .map(|d| d.to_string());
        }

        let project = match project {
            Some(project) => project,
            None => project_from_dir_name(&root)?,
        };
        let secrets_dir = secrets_dir.unwrap_or_else(|| DEFAULT_SECRETS_DIR.to_string());
        let service = config.map(|c| c.service).unwrap_or_else(|| default_service_name(&root));

        validate_secrets_dir(&secrets_dir)?;
        debug!(root = %root.display(), project = %project, secrets_dir = %secrets_dir, "discovered workspace");
        Ok(Self {
            root,
            project,
            secrets_dir,
            service,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    pub fn secrets_dir_name(&self) -> &str {
        &self.secrets_dir
    }

    /// Credential service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// `<root>/.<project>.secrets`
    pub fn package_path(&self) -> PathBuf {
        self.root.join(self.project.package_file_name())
    }

    /// `<root>/<secrets_dir>`
    pub fn secrets_path(&self) -> PathBuf {
        self.root.join(&self.secrets_dir)
    }

    /// `<root>/.<project>.secrets.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(format!("{}.lock", self.project.package_file_name()))
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.root.join(SIDECAR_FILE)
    }

    /// The sidecar record for this workspace.
    pub fn config(&self) -> ProjectConfig {
        ProjectConfig {
            service: self.service.clone(),
            project: Some(self.project.clone()),
            secrets_dir: Some(self.secrets_dir.clone()),
        }
    }

    /// Persist the sidecar so later commands need no arguments.
    pub fn save_config(&self) -> Result<()> {
        self.config().save(&self.root)
    }
}

fn validate_secrets_dir(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidInput(format!("Invalid secrets directory: {}", name)));
    }
    Ok(())
}

fn find_package_project(root: &Path) -> Result<Option<ProjectName>> {
    if !root.is_dir() {
        return Ok(None);
    }
    let mut names: Vec<String> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    Ok(names.iter().find_map(|name| {
        let project = name.strip_prefix('.')?.strip_suffix(".secrets")?;
        ProjectName::new(project).ok()
    }))
}

fn project_from_dir_name(root: &Path) -> Result<ProjectName> {
    std::path::absolute(root)
        .ok()
        .and_then(|abs| abs.file_name().map(|n| n.to_string_lossy().into_owned()))
        .and_then(|name| ProjectName::new(name).ok())
        .map_or_else(|| ProjectName::new(FALLBACK_PROJECT), Ok)
}
