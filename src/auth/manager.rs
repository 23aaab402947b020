use anyhow::{Context, Result};
use reqwest::{Client, Url};
use std::sync::Arc;
use tokio::sync::watch;

use super::authenticator::RequestAuthenticator;
use super::refresh::TokenRenewer;
use super::store::{read_access_token, CredentialStore};
use super::types::{Credential, SessionState};

/// Broadcasts session state changes to the application
#[derive(Clone)]
pub struct SessionSignal {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionSignal {
    pub fn new(initial: SessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a state; subscribers are only woken on an actual change
    pub fn publish(&self, state: SessionState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

/// Authentication manager
/// Owns the credential store and the request/refresh components built on it
pub struct AuthManager {
    store: Arc<dyn CredentialStore>,
    signal: SessionSignal,
    authenticator: RequestAuthenticator,
    renewer: TokenRenewer,
}

impl AuthManager {
    /// Wire the pipeline around an injected store
    ///
    /// `client` is used for refresh calls only; it must not route through
    /// the authenticated pipeline.
    pub fn new(client: Client, base_url: &Url, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let initial = if read_access_token(store.as_ref()).is_some() {
            SessionState::Active
        } else {
            SessionState::SignedOut
        };
        tracing::debug!("Initial session state: {:?}", initial);

        let signal = SessionSignal::new(initial);
        let authenticator = RequestAuthenticator::new(store.clone());
        let renewer = TokenRenewer::new(client, base_url, store.clone(), signal.clone())?;

        Ok(Self {
            store,
            signal,
            authenticator,
            renewer,
        })
    }

    pub fn authenticator(&self) -> &RequestAuthenticator {
        &self.authenticator
    }

    pub fn renewer(&self) -> &TokenRenewer {
        &self.renewer
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Store a freshly issued credential pair and mark the session active
    pub fn start_session(&self, credential: &Credential) -> Result<()> {
        self.store
            .save_credential(credential)
            .context("Failed to persist session credentials")?;
        self.signal.publish(SessionState::Active);
        tracing::info!("Session started");
        Ok(())
    }

    /// Remove stored credentials and mark the session signed out
    pub fn end_session(&self) -> Result<()> {
        let cleared = self
            .store
            .clear()
            .context("Failed to clear session credentials");
        // Signed out even if the store could not be wiped
        self.signal.publish(SessionState::SignedOut);
        cleared?;
        tracing::info!("Session ended");
        Ok(())
    }

    /// Whether an access token is currently stored
    pub fn is_active(&self) -> bool {
        read_access_token(self.store.as_ref()).is_some()
    }

    pub fn state(&self) -> SessionState {
        self.signal.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.signal.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;

    fn manager(credential: Option<Credential>) -> AuthManager {
        let store: Arc<dyn CredentialStore> = Arc::new(match credential {
            Some(c) => MemoryCredentialStore::with_credential(c),
            None => MemoryCredentialStore::new(),
        });
        let base_url = Url::parse("http://localhost:8080").unwrap();
        AuthManager::new(Client::new(), &base_url, store).unwrap()
    }

    #[test]
    fn test_initial_state_follows_store() {
        assert_eq!(manager(None).state(), SessionState::SignedOut);
        assert_eq!(
            manager(Some(Credential::new("a", "r"))).state(),
            SessionState::Active
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle_notifies_subscribers() {
        let manager = manager(None);
        let mut rx = manager.subscribe();

        manager.start_session(&Credential::new("a1", "r1")).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Active);
        assert!(manager.is_active());

        manager.end_session().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::SignedOut);
        assert!(!manager.is_active());
        assert_eq!(manager.store().refresh_token().unwrap(), None);
    }

    #[test]
    fn test_publish_same_state_does_not_notify() {
        let signal = SessionSignal::new(SessionState::Active);
        let rx = signal.subscribe();
        signal.publish(SessionState::Active);
        assert!(!rx.has_changed().unwrap());

        signal.publish(SessionState::SignedOut);
        assert!(rx.has_changed().unwrap());
    }
}
