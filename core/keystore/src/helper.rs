//! Windows Credential Locker through an out-of-process helper.
//!
//! The Credential Locker has no command-line front end that can read a
//! secret back, so a short PowerShell script is written to a temporary file
//! and run with a hard timeout. The secret is exchanged over stdin/stdout,
//! never on the command line.

use std::ffi::OsString;
use std::io::Write;
use std::process::Command;
use std::time::Duration;

use tracing::debug;
use zeroize::Zeroizing;

use crate::backend::{CredentialBackend, Secret};
use crate::process::run_with_timeout;
use sealbox_common::{Error, Result};

/// Exit code the helper script uses for "no such entry".
const EXIT_NOT_FOUND: i32 = 2;

const LOCKER_SCRIPT: &str = r#"param(
    [Parameter(Mandatory=$true)][string]$Action,
    [Parameter(Mandatory=$true)][string]$Resource,
    [Parameter(Mandatory=$true)][string]$Account
)
$ErrorActionPreference = 'Stop'
[void][Windows.Security.Credentials.PasswordVault, Windows.Security.Credentials, ContentType = WindowsRuntime]
$vault = New-Object Windows.Security.Credentials.PasswordVault

function Find-Entry {
    try { return $vault.Retrieve($Resource, $Account) } catch { return $null }
}

switch ($Action) {
    'get' {
        $entry = Find-Entry
        if ($null -eq $entry) { exit 2 }
        $entry.RetrievePassword()
        [Console]::Out.Write($entry.Password)
        exit 0
    }
    'set' {
        $secret = [Console]::In.ReadToEnd()
        $existing = Find-Entry
        if ($null -ne $existing) { $vault.Remove($existing) }
        $vault.Add((New-Object Windows.Security.Credentials.PasswordCredential($Resource, $Account, $secret)))
        exit 0
    }
    'delete' {
        $entry = Find-Entry
        if ($null -eq $entry) { exit 2 }
        $vault.Remove($entry)
        exit 0
    }
}
exit 1
"#;

/// Operation requested from a credential helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperAction {
    Get,
    Set,
    Delete,
}

impl HelperAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
        }
    }
}

/// Something that performs credential operations out of process.
///
/// `Ok(None)` means "no such entry"; for `Set` and a successful `Delete`
/// the helper returns `Ok(Some(_))` with an empty secret.
pub trait CredentialHelper: Send + Sync {
    fn invoke(&self, action: HelperAction, service: &str, secret: Option<&str>)
        -> Result<Option<Secret>>;
}

impl<F> CredentialHelper for F
where
    F: Fn(HelperAction, &str, Option<&str>) -> Result<Option<Secret>> + Send + Sync,
{
    fn invoke(
        &self,
        action: HelperAction,
        service: &str,
        secret: Option<&str>,
    ) -> Result<Option<Secret>> {
        self(action, service, secret)
    }
}

/// PowerShell script runner for the Windows Credential Locker.
pub struct PowerShellHelper {
    program: OsString,
    account: String,
    timeout: Duration,
}

impl PowerShellHelper {
    pub fn new(account: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: OsString::from("powershell.exe"),
            account: account.into(),
            timeout,
        }
    }

    /// Use a different PowerShell executable, e.g. `pwsh`.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }
}

impl CredentialHelper for PowerShellHelper {
    fn invoke(
        &self,
        action: HelperAction,
        service: &str,
        secret: Option<&str>,
    ) -> Result<Option<Secret>> {
        let mut script = tempfile::Builder::new()
            .prefix("sealbox-locker-")
            .suffix(".ps1")
            .tempfile()?;
        script.write_all(LOCKER_SCRIPT.as_bytes())?;
        script.flush()?;
        // Removed from disk when dropped, on every path out of this function.
        let script_path = script.into_temp_path();

        let mut cmd = Command::new(&self.program);
        cmd.args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-File"])
            .arg(&*script_path)
            .arg("-Action")
            .arg(action.as_str())
            .arg("-Resource")
            .arg(service)
            .arg("-Account")
            .arg(&self.account);

        let output = run_with_timeout(cmd, secret.map(str::as_bytes), self.timeout)?;
        match output.status.code() {
            Some(0) => {
                let stdout = Zeroizing::new(output.stdout);
                let text = String::from_utf8_lossy(&stdout);
                Ok(Some(Zeroizing::new(text.trim_end_matches(['\r', '\n']).to_string())))
            }
            Some(EXIT_NOT_FOUND) => Ok(None),
            code => Err(Error::CredentialStoreUnavailable(format!(
                "credential helper {} exited with {:?}: {}",
                action.as_str(),
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Credential backend that delegates to a [`CredentialHelper`].
pub struct HelperBackend<H> {
    helper: H,
}

impl<H: CredentialHelper> HelperBackend<H> {
    pub fn new(helper: H) -> Self {
        Self { helper }
    }
}

impl<H: CredentialHelper> CredentialBackend for HelperBackend<H> {
    fn name(&self) -> &str {
        "credential-locker"
    }

    fn get(&self, service: &str) -> Result<Option<Secret>> {
        let secret = self.helper.invoke(HelperAction::Get, service, None)?;
        Ok(secret.filter(|s| !s.is_empty()))
    }

    fn set(&self, service: &str, secret: &str) -> Result<()> {
        self.helper.invoke(HelperAction::Set, service, Some(secret))?;
        debug!(service, "stored secret via credential helper");
        Ok(())
    }

    fn delete(&self, service: &str) -> Result<bool> {
        Ok(self.helper.invoke(HelperAction::Delete, service, None)?.is_some())
    }
}
