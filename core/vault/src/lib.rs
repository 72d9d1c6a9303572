//! Secrets package engine for Sealbox.
//!
//! This crate provides:
//! - The package codec (encode, decode, selective single-file read)
//! - Change detection over the plaintext working directory
//! - Workspace discovery and the project sidecar
//! - Password resolution through the credential store or a prompt
//! - The create/mount/unmount/update/destroy lifecycle
//!
//! # Architecture
//! The lifecycle sits between the command-line surface and the
//! cryptographic and credential crates. It never reads ambient state: the
//! workspace, credential store and prompter are handed in once.

pub mod lifecycle;
pub mod lock;
pub mod manifest;
pub mod package;
pub mod password;
pub mod project;
pub mod workdir;

pub use lifecycle::{
    CreateOutcome, DestroyReport, MountOutcome, SecretsVault, UnmountOutcome, VaultSettings,
    VaultState, VaultStatus, DESTROY_CONFIRMATION,
};
pub use lock::ProjectLock;
pub use manifest::{ChangeManifest, HASH_FILE};
pub use package::{decode_package, encode_package, FileEntry, FileSet, PackageMetadata, PlainFile, SecretsPackage};
pub use password::{
    resolve_password, NonInteractive, PasswordSource, Prompter, ResolvedPassword, ScriptedPrompter,
    TerminalPrompter,
};
pub use project::{ProjectConfig, Workspace, SIDECAR_FILE};
