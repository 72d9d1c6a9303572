//! In-process credential backend for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::RwLock;

use zeroize::Zeroizing;

use crate::backend::{CredentialBackend, Secret};
use sealbox_common::{Error, Result};

/// Credential backend held entirely in memory.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Secret>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> Error {
        Error::CredentialStoreUnavailable("memory backend lock poisoned".to_string())
    }
}

impl CredentialBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, service: &str) -> Result<Option<Secret>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(service).cloned())
    }

    fn set(&self, service: &str, secret: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(service.to_string(), Zeroizing::new(secret.to_string()));
        Ok(())
    }

    fn delete(&self, service: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(entries.remove(service).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend() {
        let backend = MemoryBackend::new();
        assert!(backend.is_empty());

        backend.set("a", "1").unwrap();
        backend.set("a", "2").unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("a").unwrap().unwrap().as_str(), "2");

        assert!(backend.delete("a").unwrap());
        assert!(backend.get("a").unwrap().is_none());
    }
}
