//! Password resolution: stored credential first, interactive prompt second.

use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Mutex;

use tracing::debug;
use zeroize::Zeroizing;

use sealbox_common::{Error, Result};
use sealbox_keystore::{CredentialStore, Secret};

/// Source of interactive answers.
pub trait Prompter {
    /// Read a password without echo.
    fn password(&self, prompt: &str) -> Result<Secret>;

    /// Ask a yes/no question. Anything but an explicit yes is a no.
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Prompts on the controlling terminal.
///
/// Fails with `NoInteractiveInput` when stdin is not a terminal rather than
/// blocking on a pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn ensure_terminal() -> Result<()> {
        if io::stdin().is_terminal() {
            Ok(())
        } else {
            Err(Error::NoInteractiveInput("stdin is not a terminal".to_string()))
        }
    }
}

impl Prompter for TerminalPrompter {
    fn password(&self, prompt: &str) -> Result<Secret> {
        Self::ensure_terminal()?;
        Ok(Zeroizing::new(rpassword::prompt_password(prompt)?))
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        Self::ensure_terminal()?;
        let mut stderr = io::stderr();
        write!(stderr, "{} [y/N]: ", question)?;
        stderr.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// Refuses every prompt. Used for scripted and CI runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn password(&self, prompt: &str) -> Result<Secret> {
        Err(Error::NoInteractiveInput(format!(
            "password required ({}) but running non-interactively",
            prompt.trim().trim_end_matches(':')
        )))
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        Err(Error::NoInteractiveInput(format!(
            "confirmation required ({}) but running non-interactively",
            question
        )))
    }
}

/// Answers prompts from a fixed script, in order.
///
/// Running out of answers behaves like a non-interactive environment.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    passwords: Mutex<VecDeque<String>>,
    answers: Mutex<VecDeque<bool>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(self, password: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.passwords.lock() {
            queue.push_back(password.into());
        }
        self
    }

    pub fn with_answer(self, answer: bool) -> Self {
        if let Ok(mut queue) = self.answers.lock() {
            queue.push_back(answer);
        }
        self
    }

    /// Password prompts not yet consumed.
    pub fn remaining_passwords(&self) -> usize {
        self.passwords.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Prompter for ScriptedPrompter {
    fn password(&self, prompt: &str) -> Result<Secret> {
        let next = self.passwords.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(password) => Ok(Zeroizing::new(password)),
            None => NonInteractive.password(prompt),
        }
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        let next = self.answers.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(answer) => Ok(answer),
            None => NonInteractive.confirm(question),
        }
    }
}

/// Where a resolved password came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordSource {
    /// Read from the credential store.
    Stored,
    /// Typed in by the user.
    Prompted,
}

/// A password ready for key derivation.
#[derive(Debug)]
pub struct ResolvedPassword {
    pub secret: Secret,
    pub source: PasswordSource,
}

impl ResolvedPassword {
    pub fn as_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

/// Look up the stored password for `service`, prompting if there is none.
///
/// # Errors
/// - `NoInteractiveInput` if nothing is stored and prompting is impossible
/// - `InvalidInput` if an empty password was entered
pub fn resolve_password(
    store: &CredentialStore,
    service: &str,
    prompter: &dyn Prompter,
) -> Result<ResolvedPassword> {
    if let Some(secret) = store.get_password(service) {
        debug!(service, "using stored password");
        return Ok(ResolvedPassword {
            secret,
            source: PasswordSource::Stored,
        });
    }

    let secret = prompter.password("Enter password: ")?;
    if secret.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    Ok(ResolvedPassword {
        secret,
        source: PasswordSource::Prompted,
    })
}

/// Ask for a new password twice.
///
/// # Errors
/// - `InvalidInput` if the password is empty or the two entries differ
pub fn prompt_new_password(prompter: &dyn Prompter, prompt: &str) -> Result<Secret> {
    let password = prompter.password(prompt)?;
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    let confirm = prompter.password("Confirm password: ")?;
    if *password != *confirm {
        return Err(Error::InvalidInput("Passwords do not match".to_string()));
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealbox_keystore::{CredentialBackend, MemoryBackend};

    fn store_with(service: &str, password: &str) -> CredentialStore {
        let memory = MemoryBackend::new();
        memory.set(service, password).unwrap();
        CredentialStore::new(vec![Box::new(memory)])
    }

    #[test]
    fn test_stored_password_wins() {
        let store = store_with("svc", "stored");
        let prompter = ScriptedPrompter::new().with_password("typed");

        let resolved = resolve_password(&store, "svc", &prompter).unwrap();
        assert_eq!(resolved.secret.as_str(), "stored");
        assert_eq!(resolved.source, PasswordSource::Stored);
        assert_eq!(prompter.remaining_passwords(), 1);
    }

    #[test]
    fn test_prompt_when_nothing_stored() {
        let store = CredentialStore::new(Vec::new());
        let prompter = ScriptedPrompter::new().with_password("typed");

        let resolved = resolve_password(&store, "svc", &prompter).unwrap();
        assert_eq!(resolved.as_bytes(), b"typed");
        assert_eq!(resolved.source, PasswordSource::Prompted);
    }

    #[test]
    fn test_non_interactive_fails_fast() {
        let store = CredentialStore::new(Vec::new());
        assert!(matches!(
            resolve_password(&store, "svc", &NonInteractive),
            Err(Error::NoInteractiveInput(_))
        ));
    }

    #[test]
    fn test_empty_prompted_password_rejected() {
        let store = CredentialStore::new(Vec::new());
        let prompter = ScriptedPrompter::new().with_password("");
        assert!(matches!(
            resolve_password(&store, "svc", &prompter),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_new_password_must_match() {
        let ok = ScriptedPrompter::new().with_password("pw").with_password("pw");
        assert_eq!(prompt_new_password(&ok, "New password: ").unwrap().as_str(), "pw");

        let mismatch = ScriptedPrompter::new().with_password("pw").with_password("px");
        assert!(prompt_new_password(&mismatch, "New password: ").is_err());
    }

    #[test]
    fn test_scripted_answers() {
        let prompter = ScriptedPrompter::new().with_answer(true);
        assert!(prompter.confirm("Proceed?").unwrap());
        assert!(matches!(prompter.confirm("Again?"), Err(Error::NoInteractiveInput(_))));
    }
}
