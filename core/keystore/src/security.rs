//! macOS login keychain via the `security` command-line tool.

use std::ffi::OsString;
use std::process::Command;
use std::time::Duration;

use tracing::debug;
use zeroize::Zeroizing;

use crate::backend::{CredentialBackend, Secret};
use crate::process::run_with_timeout;
use sealbox_common::{Error, Result};

/// Keychain backend that shells out to `security`.
///
/// Lookups treat any non-zero exit or empty output as "not found". Only a
/// failure to run the tool at all is reported as an error.
pub struct SecurityCliBackend {
    program: OsString,
    leading_args: Vec<OsString>,
    account: String,
    timeout: Duration,
}

impl SecurityCliBackend {
    /// Create a backend for entries owned by `account`.
    pub fn new(account: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: OsString::from("security"),
            leading_args: Vec::new(),
            account: account.into(),
            timeout,
        }
    }

    /// Run a different program in place of `security`, with fixed leading
    /// arguments before the subcommand.
    pub fn with_command(mut self, program: impl Into<OsString>, leading_args: Vec<OsString>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    fn command(&self, subcommand: &str, service: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg(subcommand)
            .arg("-s")
            .arg(service)
            .arg("-a")
            .arg(&self.account);
        cmd
    }
}

impl CredentialBackend for SecurityCliBackend {
    fn name(&self) -> &str {
        "keychain"
    }

    fn get(&self, service: &str) -> Result<Option<Secret>> {
        let mut cmd = self.command("find-generic-password", service);
        cmd.arg("-w");

        let output = run_with_timeout(cmd, None, self.timeout)?;
        if !output.status.success() {
            debug!(service, code = ?output.status.code(), "keychain entry not found");
            return Ok(None);
        }

        let stdout = Zeroizing::new(output.stdout);
        let text = String::from_utf8_lossy(&stdout);
        let secret = text.trim_end_matches(['\r', '\n']);
        if secret.is_empty() {
            return Ok(None);
        }
        Ok(Some(Zeroizing::new(secret.to_string())))
    }

    fn set(&self, service: &str, secret: &str) -> Result<()> {
        let mut cmd = self.command("add-generic-password", service);
        cmd.arg("-w").arg(secret).arg("-U");

        let output = run_with_timeout(cmd, None, self.timeout)?;
        if !output.status.success() {
            return Err(Error::CredentialStoreUnavailable(format!(
                "security add-generic-password exited with {:?}",
                output.status.code()
            )));
        }
        debug!(service, "stored secret in keychain");
        Ok(())
    }

    fn delete(&self, service: &str) -> Result<bool> {
        let cmd = self.command("delete-generic-password", service);
        let output = run_with_timeout(cmd, None, self.timeout)?;
        Ok(output.status.success())
    }
}
