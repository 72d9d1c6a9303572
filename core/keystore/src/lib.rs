//! Credential store abstraction for Sealbox.
//!
//! A project password is cached outside the package in a platform
//! credential facility. This crate hides three incompatible facilities
//! behind one trait and chains them in a fixed priority order:
//!
//! 1. macOS: the `security` command-line tool (login keychain)
//! 2. Windows: a PowerShell helper driving the Credential Locker, run with a
//!    hard timeout
//! 3. Everywhere: a dotfile in the home directory holding the password
//!    encrypted under a key derived from the OS username
//!
//! # Design Principles
//! - No state survives a call: backend failures are never cached
//! - Higher-priority failures fall through to the next backend
//! - Lookups never fail hard; callers fall back to prompting

pub mod backend;
pub mod file;
pub mod helper;
pub mod memory;
pub mod platform;
pub mod process;
pub mod security;
pub mod store;

pub use backend::{CredentialBackend, Secret};
pub use file::EncryptedFileBackend;
pub use helper::{CredentialHelper, HelperAction, HelperBackend, PowerShellHelper};
pub use memory::MemoryBackend;
pub use platform::{current_username, Platform};
pub use security::SecurityCliBackend;
pub use store::{CredentialStore, KeystoreSettings};
