//! Host platform detection.

use std::fmt;

/// Host platform, which decides the backend chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// macOS: login keychain through the `security` tool.
    MacOs,
    /// Windows: Credential Locker through a PowerShell helper.
    Windows,
    /// Linux and everything else: encrypted dotfile only.
    Other,
}

impl Platform {
    /// Detect the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Other
        }
    }

    /// Whether Unix file modes apply.
    pub fn has_unix_permissions(&self) -> bool {
        !matches!(self, Self::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MacOs => "macos",
            Self::Windows => "windows",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Name of the logged-in user.
///
/// Checks `LOGNAME`, `USER`, `LNAME` and `USERNAME` in that order.
pub fn current_username() -> Option<String> {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
}
