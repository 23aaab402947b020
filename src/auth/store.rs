// Credential store contract and in-memory implementation

use anyhow::{anyhow, Result};
use std::sync::RwLock;

use super::types::Credential;

/// Secret store consumed by the authentication pipeline
///
/// Implementations must be safe to share between threads. A pair write via
/// [`CredentialStore::save_credential`] must never be observed half-applied.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Result<Option<String>>;

    fn refresh_token(&self) -> Result<Option<String>>;

    fn save_access_token(&self, token: &str) -> Result<()>;

    fn save_refresh_token(&self, token: &str) -> Result<()>;

    /// Persist both tokens as one write
    fn save_credential(&self, credential: &Credential) -> Result<()>;

    /// Remove every stored token
    fn clear(&self) -> Result<()>;
}

/// Read the access token, treating store errors and empty values as absent
pub(crate) fn read_access_token(store: &dyn CredentialStore) -> Option<String> {
    match store.access_token() {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            tracing::warn!("Failed to read access token from store: {:#}", e);
            None
        }
    }
}

/// Read the refresh token, treating store errors and empty values as absent
pub(crate) fn read_refresh_token(store: &dyn CredentialStore) -> Option<String> {
    match store.refresh_token() {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            tracing::warn!("Failed to read refresh token from store: {:#}", e);
            None
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Slots {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Process-local store; both tokens live behind one lock
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slots: RwLock<Slots>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a session
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slots: RwLock::new(Slots {
                access_token: Some(credential.access_token),
                refresh_token: Some(credential.refresh_token),
            }),
        }
    }

    fn read(&self) -> Result<Slots> {
        self.slots
            .read()
            .map(|s| s.clone())
            .map_err(|_| anyhow!("Credential store lock poisoned"))
    }

    fn write<F: FnOnce(&mut Slots)>(&self, f: F) -> Result<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        f(&mut slots);
        Ok(())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.read()?.access_token)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self.read()?.refresh_token)
    }

    fn save_access_token(&self, token: &str) -> Result<()> {
        self.write(|s| s.access_token = Some(token.to_string()))
    }

    fn save_refresh_token(&self, token: &str) -> Result<()> {
        self.write(|s| s.refresh_token = Some(token.to_string()))
    }

    fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.write(|s| {
            s.access_token = Some(credential.access_token.clone());
            s.refresh_token = Some(credential.refresh_token.clone());
        })
    }

    fn clear(&self) -> Result<()> {
        self.write(|s| *s = Slots::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.refresh_token().unwrap(), None);
    }

    #[test]
    fn test_save_and_clear() {
        let store = MemoryCredentialStore::new();
        store.save_credential(&Credential::new("a1", "r1")).unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));

        store.save_access_token("a2").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));

        store.clear().unwrap();
        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.refresh_token().unwrap(), None);
    }

    #[test]
    fn test_empty_tokens_read_as_absent() {
        let store = MemoryCredentialStore::with_credential(Credential::new("", ""));
        assert_eq!(read_access_token(&store), None);
        assert_eq!(read_refresh_token(&store), None);
    }
}
