// Token refresh on 401

use anyhow::Context;
use reqwest::header::HeaderValue;
use reqwest::{Client, Request, Url};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::authenticator::{bearer_token, set_bearer};
use super::manager::SessionSignal;
use super::routes::REFRESH_PATH;
use super::store::{read_access_token, read_refresh_token, CredentialStore};
use super::types::{Credential, RefreshRequest, RefreshResponse, SessionState};
use crate::error::AuthError;

/// Maximum refresh-and-replay cycles per logical request
pub const MAX_RETRY_COUNT: u32 = 2;

/// Header carrying the number of replays already attempted
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Read the replay counter from a request (0 when absent or unparsable)
pub fn retry_count(request: &Request) -> u32 {
    request
        .headers()
        .get(RETRY_COUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Recovers from 401 responses by exchanging the refresh token
///
/// Refresh cycles are serialized: a request that waited on another cycle
/// reuses the token it produced instead of refreshing again.
pub struct TokenRenewer {
    client: Client,
    refresh_url: Url,
    store: Arc<dyn CredentialStore>,
    signal: SessionSignal,
    refresh_lock: Mutex<()>,
}

impl TokenRenewer {
    pub fn new(
        client: Client,
        base_url: &Url,
        store: Arc<dyn CredentialStore>,
        signal: SessionSignal,
    ) -> anyhow::Result<Self> {
        let refresh_url = base_url
            .join(REFRESH_PATH)
            .context("Failed to build refresh endpoint URL")?;

        Ok(Self {
            client,
            refresh_url,
            store,
            signal,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Attempt one recovery cycle for a request that failed with 401
    ///
    /// Returns the request to resend, or `None` when the caller should see
    /// the original failure. Every `None` caused by a refresh problem leaves
    /// the store empty and the session signed out.
    pub async fn renew(&self, failed: &Request) -> Option<Request> {
        let attempts = retry_count(failed);

        let result = if attempts >= MAX_RETRY_COUNT {
            Err(AuthError::RefreshExhausted(attempts))
        } else {
            let Some(template) = failed.try_clone() else {
                tracing::warn!(
                    url = %failed.url(),
                    "Request body cannot be replayed, skipping token refresh"
                );
                return None;
            };
            self.refresh_and_rebuild(template, attempts).await
        };

        match result {
            Ok(replacement) => Some(replacement),
            Err(reason) => {
                tracing::warn!(
                    url = %failed.url(),
                    attempts = attempts,
                    reason = %reason,
                    "Token refresh failed, clearing session"
                );
                self.invalidate();
                None
            }
        }
    }

    async fn refresh_and_rebuild(
        &self,
        template: Request,
        attempts: u32,
    ) -> Result<Request, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token =
            read_refresh_token(self.store.as_ref()).ok_or(AuthError::RefreshTokenMissing)?;

        // Another request may have refreshed while we waited for the lock
        if let Some(current) = read_access_token(self.store.as_ref()) {
            if bearer_token(&template) != Some(current.as_str()) {
                tracing::debug!("Access token already renewed, replaying with stored token");
                return rebuild(template, &current, attempts);
            }
        }

        let access_token = self.call_refresh_endpoint(&refresh_token).await?;
        rebuild(template, &access_token, attempts)
    }

    /// Exchange the refresh token and persist the result
    async fn call_refresh_endpoint(&self, refresh_token: &str) -> Result<String, AuthError> {
        tracing::info!("Refreshing access token...");

        let response = self
            .client
            .post(self.refresh_url.clone())
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %self.refresh_url, "Refresh request failed");
                AuthError::RefreshCallFailed(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::RefreshCallFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::RefreshCallFailed(format!("status {}", status)));
        }
        if body.trim().is_empty() {
            return Err(AuthError::RefreshCallFailed("empty response body".to_string()));
        }

        let data: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::RefreshCallFailed(format!("invalid response body: {}", e)))?;

        if data.success != Some(true) {
            return Err(AuthError::RefreshRejected);
        }

        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::RefreshRejected)?;

        // Servers that do not rotate leave the old refresh token valid
        let persisted = match data.refresh_token.filter(|t| !t.is_empty()) {
            Some(rotated) => self
                .store
                .save_credential(&Credential::new(access_token.clone(), rotated)),
            None => self.store.save_access_token(&access_token),
        };
        persisted.map_err(|e| AuthError::CredentialPersistFailed(format!("{:#}", e)))?;

        tracing::info!(
            "Access token refreshed (token: {}...)",
            access_token.chars().take(8).collect::<String>()
        );

        Ok(access_token)
    }

    /// Destroy the session
    fn invalidate(&self) {
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear credential store: {:#}", e);
        }
        self.signal.publish(SessionState::SignedOut);
    }
}

/// Same request with a new bearer token and the replay counter bumped
fn rebuild(mut request: Request, access_token: &str, attempts: u32) -> Result<Request, AuthError> {
    if !set_bearer(&mut request, access_token) {
        return Err(AuthError::RefreshRejected);
    }
    request
        .headers_mut()
        .insert(RETRY_COUNT_HEADER, HeaderValue::from(attempts + 1));
    Ok(request)
}
