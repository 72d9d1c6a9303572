//! Sealbox CLI - keep a project's secret files in one encrypted package.
//!
//! The package (`.<project>.secrets`) is safe to commit. `mount` decrypts it
//! into a working directory, `unmount` seals the directory back and removes
//! it. The password is cached in the platform credential store.

mod gitignore;

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sealbox_common::ProjectName;
use sealbox_crypto::CipherSuite;
use sealbox_keystore::CredentialStore;
use sealbox_vault::{
    CreateOutcome, MountOutcome, NonInteractive, Prompter, SecretsVault, TerminalPrompter,
    UnmountOutcome, VaultSettings, VaultState, Workspace, DESTROY_CONFIRMATION, SIDECAR_FILE,
};

#[derive(Parser)]
#[command(name = "sealbox")]
#[command(about = "Sealbox - encrypted secret files alongside your source")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never prompt; fail if input would be needed.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Write new packages with authenticated encryption (format 2).
    #[arg(long, global = true)]
    authenticated: bool,

    /// Project directory (default: current directory).
    #[arg(short = 'C', long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project with an empty secrets folder, or seal an existing one.
    Create {
        /// Project name (default: directory name).
        #[arg(long)]
        project: Option<String>,

        /// Secrets folder name.
        #[arg(long)]
        secrets_dir: Option<String>,

        /// Password (prompted if omitted).
        #[arg(long)]
        password: Option<String>,
    },

    /// Decrypt the package into the secrets folder.
    Mount,

    /// Encrypt the secrets folder into the package and delete it.
    Unmount,

    /// Mount, wait while you edit, then unmount.
    Update,

    /// Store the project password in the credential store.
    Pass {
        /// Password (prompted if omitted).
        #[arg(long)]
        password: Option<String>,
    },

    /// Remove the stored password.
    Clear,

    /// Re-encrypt everything under a new password.
    ChangePassword {
        /// New password (prompted if omitted).
        #[arg(long)]
        password: Option<String>,
    },

    /// Permanently delete the package, folder, config and stored password.
    Destroy {
        /// Confirmation token; must be DELETE.
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Show project status.
    Status,

    /// List files in the package.
    List,

    /// Print one file from the package without mounting.
    Cat {
        /// Path inside the package.
        path: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let workspace = match &cli.command {
        Commands::Create {
            project,
            secrets_dir,
            ..
        } => create_workspace(&root, project.as_deref(), secrets_dir.as_deref())?,
        _ => Workspace::discover(&root).context("Failed to detect project settings")?,
    };
    info!(project = %workspace.project(), secrets_dir = workspace.secrets_dir_name(), "using project");

    let prompter: Box<dyn Prompter> = if cli.non_interactive {
        Box::new(NonInteractive)
    } else {
        Box::new(TerminalPrompter)
    };
    let settings = VaultSettings {
        suite: if cli.authenticated {
            CipherSuite::Authenticated
        } else {
            CipherSuite::Legacy
        },
        ..VaultSettings::default()
    };
    let vault = SecretsVault::new(workspace, CredentialStore::system(), prompter).with_settings(settings);

    match cli.command {
        Commands::Create { password, .. } => cmd_create(&vault, password.as_deref()),
        Commands::Mount => cmd_mount(&vault),
        Commands::Unmount => cmd_unmount(&vault),
        Commands::Update => cmd_update(&vault, cli.non_interactive),
        Commands::Pass { password } => cmd_pass(&vault, password.as_deref()),
        Commands::Clear => cmd_clear(&vault),
        Commands::ChangePassword { password } => {
            cmd_change_password(&vault, password.as_deref(), cli.authenticated)
        }
        Commands::Destroy { confirm } => cmd_destroy(&vault, confirm, cli.non_interactive),
        Commands::Status => cmd_status(&vault),
        Commands::List => cmd_list(&vault),
        Commands::Cat { path } => cmd_cat(&vault, &path),
    }
}

/// Workspace for `create`: explicit arguments win over discovery.
fn create_workspace(root: &Path, project: Option<&str>, secrets_dir: Option<&str>) -> Result<Workspace> {
    let discovered = Workspace::discover(root).context("Failed to detect project settings")?;
    let project = match project {
        Some(name) => ProjectName::new(name).context("Invalid project name")?,
        None => discovered.project().clone(),
    };
    let secrets_dir = secrets_dir.unwrap_or(discovered.secrets_dir_name());
    Workspace::new(root, project, secrets_dir).context("Invalid project settings")
}

fn ignore_plaintext(vault: &SecretsVault) -> Result<()> {
    let ws = vault.workspace();
    let dir_entry = format!("{}/", ws.secrets_dir_name());
    for added in gitignore::ensure_ignored(ws.root(), &[dir_entry.as_str(), SIDECAR_FILE])? {
        println!("Added {} to .gitignore", added);
    }
    Ok(())
}

/// Read a line from the terminal.
fn read_line(prompt: &str) -> Result<String> {
    if !io::stdin().is_terminal() {
        bail!("Input required but stdin is not a terminal");
    }
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Create a new project.
fn cmd_create(vault: &SecretsVault, password: Option<&str>) -> Result<()> {
    info!("Creating project: {}", vault.workspace().project());

    let outcome = vault.create(password).context("Failed to create project")?;
    ignore_plaintext(vault)?;

    let dir = vault.workspace().secrets_dir_name();
    match outcome {
        CreateOutcome::Created { password_stored } => {
            println!("Created empty {}/ folder", dir);
            report_stored(password_stored);
            println!("Add your secret files to {}/ then run: sealbox unmount", dir);
        }
        CreateOutcome::SealedExisting {
            files,
            password_stored,
        } => {
            println!(
                "Encrypted {} files from {}/ into {}",
                files,
                dir,
                vault.workspace().project().package_file_name()
            );
            report_stored(password_stored);
        }
    }
    Ok(())
}

fn report_stored(stored: bool) {
    if stored {
        println!("Password stored in credential store");
    } else {
        println!("Warning: could not store password; you will be asked for it");
    }
}

/// Decrypt the package into the secrets folder.
fn cmd_mount(vault: &SecretsVault) -> Result<()> {
    let dir = vault.workspace().secrets_path();
    match vault.mount().context("Failed to mount secrets")? {
        MountOutcome::AlreadyMounted { files } => {
            println!("Secrets are already mounted at {}/ ({} files)", dir.display(), files);
        }
        MountOutcome::Mounted { files, .. } => {
            ignore_plaintext(vault)?;
            println!("Mounted {} files to {}/", files, dir.display());
            println!("Edit files there, then run: sealbox unmount");
        }
    }
    Ok(())
}

/// Seal the secrets folder.
fn cmd_unmount(vault: &SecretsVault) -> Result<()> {
    let outcome = vault.unmount().context("Failed to unmount secrets")?;
    print_unmount(vault, outcome);
    Ok(())
}

fn print_unmount(vault: &SecretsVault, outcome: UnmountOutcome) {
    let ws = vault.workspace();
    match outcome {
        UnmountOutcome::Sealed { files } => {
            println!("Encrypted {} files to {}", files, ws.project().package_file_name());
            println!("Deleted {}/ folder", ws.secrets_dir_name());
        }
        UnmountOutcome::Unchanged => {
            println!("No changes detected, package left untouched");
            println!("Deleted {}/ folder", ws.secrets_dir_name());
        }
        UnmountOutcome::NothingMounted => println!("No secrets folder to unmount"),
        UnmountOutcome::EmptyDiscarded => {
            println!("Secrets folder was empty; deleted it without writing a package")
        }
    }
}

/// Mount, wait for edits, unmount.
fn cmd_update(vault: &SecretsVault, non_interactive: bool) -> Result<()> {
    if non_interactive {
        bail!("update waits for manual edits and cannot run non-interactively");
    }
    let outcome = vault
        .update(|dir| {
            println!("Secrets mounted at {}/", dir.display());
            read_line("Edit the files, then press Enter to re-seal... ")
                .map(|_| ())
                .map_err(|e| sealbox_common::Error::NoInteractiveInput(e.to_string()))
        })
        .context("Failed to update secrets")?;
    print_unmount(vault, outcome);
    Ok(())
}

/// Store the password.
fn cmd_pass(vault: &SecretsVault, password: Option<&str>) -> Result<()> {
    vault.store_password(password).context("Failed to store password")?;
    println!("Password stored for {}", vault.workspace().project());
    Ok(())
}

/// Remove the stored password.
fn cmd_clear(vault: &SecretsVault) -> Result<()> {
    if vault.clear_password().context("Failed to clear password")? {
        println!("Stored password removed");
    } else {
        println!("No stored password found");
    }
    Ok(())
}

/// Change the project password.
fn cmd_change_password(vault: &SecretsVault, password: Option<&str>, upgrade: bool) -> Result<()> {
    let stored = vault
        .change_password(password, upgrade)
        .context("Failed to change password")?;
    println!("Password changed");
    report_stored(stored);
    println!("Team members need the new password: sealbox clear && sealbox pass");
    Ok(())
}

/// Delete everything.
fn cmd_destroy(vault: &SecretsVault, confirm: Option<String>, non_interactive: bool) -> Result<()> {
    let ws = vault.workspace();
    let token = match confirm {
        Some(token) => token,
        None if non_interactive => {
            bail!("destroy needs --confirm {} when non-interactive", DESTROY_CONFIRMATION)
        }
        None => {
            println!(
                "WARNING: this permanently deletes all secrets for project '{}':",
                ws.project()
            );
            println!("  - {}", ws.package_path().display());
            println!("  - {}", ws.sidecar_path().display());
            println!("  - stored password ({})", ws.service());
            if ws.secrets_path().exists() {
                println!("  - {}/", ws.secrets_path().display());
            }
            read_line(&format!("Type '{}' to confirm: ", DESTROY_CONFIRMATION))?
        }
    };

    let report = vault.destroy(&token).context("Nothing was deleted")?;
    if report == Default::default() {
        println!("No secrets found to delete");
    } else {
        println!("Deleted:");
        if report.package {
            println!("  - encrypted package");
        }
        if report.config {
            println!("  - config file");
        }
        if report.working_dir {
            println!("  - secrets folder");
        }
        if report.password {
            println!("  - stored password");
        }
    }
    Ok(())
}

/// Show project status.
fn cmd_status(vault: &SecretsVault) -> Result<()> {
    let status = vault.status().context("Failed to read status")?;
    let state = match status.state {
        VaultState::Sealed => "sealed",
        VaultState::Unsealed => "mounted",
        VaultState::Absent => "not created",
    };

    println!("Project:         {}", status.project);
    println!("Secrets folder:  {}/", status.secrets_dir);
    println!("State:           {}", state);
    println!("Credential:      {}", status.service);
    println!("Password stored: {}", if status.password_stored { "yes" } else { "no" });
    if let Some(version) = &status.version {
        println!("Format version:  {}", version);
    }
    if let Some(created) = &status.created {
        println!("Created:         {}", created);
    }
    if let Some(count) = status.package_file_count {
        println!("Encrypted files: {}", count);
    }
    if let Some(error) = &status.package_error {
        println!("Package error:   {}", error);
    }
    if let Some(count) = status.working_file_count {
        println!("Mounted files:   {}", count);
    }
    Ok(())
}

/// List package contents.
fn cmd_list(vault: &SecretsVault) -> Result<()> {
    for path in vault.list_files().context("Failed to read package")? {
        println!("{}", path);
    }
    Ok(())
}

/// Print one decrypted file.
fn cmd_cat(vault: &SecretsVault, path: &str) -> Result<()> {
    let data = vault
        .read_file(path)
        .context("Failed to read package")?
        .with_context(|| format!("{} is not in the package", path))?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(data.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
