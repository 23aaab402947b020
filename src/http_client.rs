use anyhow::{Context, Result};
use reqwest::{Client, Method, Request, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{classify, AuthManager, RouteClass};
use crate::error::ApiError;

/// Build the shared reqwest client with connection pooling and timeouts
pub fn build_client(
    max_connections: usize,
    connect_timeout: u64,
    request_timeout: u64,
) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(max_connections)
        .connect_timeout(Duration::from_secs(connect_timeout))
        .timeout(Duration::from_secs(request_timeout))
        .build()
        .context("Failed to create HTTP client")
}

/// HTTP client for the CyberQuest API
///
/// Every request passes through the authenticator; a 401 on a protected
/// route triggers one refresh-and-replay cycle per attempt, bounded by the
/// retry counter header. Transient failures are retried with backoff.
pub struct AuthenticatedClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Authentication manager
    auth: Arc<AuthManager>,

    /// API root that request paths are joined onto
    base_url: Url,

    /// Maximum number of retries for transient failures
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl AuthenticatedClient {
    pub fn new(client: Client, auth: Arc<AuthManager>, base_url: Url, max_retries: u32) -> Self {
        Self {
            client,
            auth,
            base_url,
            max_retries,
            base_delay_ms: 1000, // 1 second base delay
        }
    }

    /// Override the backoff base delay
    pub fn with_base_delay(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Execute a request through the authentication pipeline
    /// Automatically handles:
    /// - 401: refreshes the token and replays the request
    /// - 429: exponential backoff
    /// - 5xx: exponential backoff
    pub async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        self.execute_internal(request, true).await
    }

    /// Execute a request without transient retries
    /// Token refresh on 401 still applies
    pub async fn execute_no_retry(&self, request: Request) -> Result<Response, ApiError> {
        self.execute_internal(request, false).await
    }

    async fn execute_internal(
        &self,
        mut request: Request,
        enable_retry: bool,
    ) -> Result<Response, ApiError> {
        let max_retries = if enable_retry { self.max_retries } else { 0 };
        let mut attempt = 0;

        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let method = request.method().clone();
        let url = request.url().clone();
        let route = classify(url.path());

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            url = %url,
            "Sending HTTP request"
        );

        loop {
            let template = request.try_clone().ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;
            let sent = self.auth.authenticator().authorize(template);
            // Kept so a 401 can be replayed with exactly what went out
            let replay_source = sent.try_clone().ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;

            match self.client.execute(sent).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        tracing::debug!(
                            request_id = %request_id,
                            status = %status,
                            "Request successful"
                        );
                        return Ok(response);
                    }

                    if status == StatusCode::UNAUTHORIZED && route == RouteClass::Protected {
                        tracing::warn!(
                            request_id = %request_id,
                            url = %url,
                            "Received 401, attempting token refresh"
                        );
                        match self.auth.renewer().renew(&replay_source).await {
                            Some(replacement) => {
                                request = replacement;
                                continue;
                            }
                            None => return Err(ApiError::Unauthorized),
                        }
                    }

                    if is_transient(status) && attempt < max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            request_id = %request_id,
                            "Received {}, retrying after {}ms (attempt {}/{})",
                            status,
                            delay,
                            attempt + 1,
                            max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    tracing::error!(
                        request_id = %request_id,
                        status = status.as_u16(),
                        url = %url,
                        attempt = attempt + 1,
                        "HTTP request failed with error response"
                    );
                    return Err(ApiError::from_status(status, &error_text));
                }

                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else {
                        "unknown"
                    };

                    if attempt < max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            request_id = %request_id,
                            error_kind = error_kind,
                            error = %e,
                            "Request failed, retrying after {}ms (attempt {}/{})",
                            delay,
                            attempt + 1,
                            max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        request_id = %request_id,
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        total_attempts = attempt + 1,
                        "HTTP request failed after all retries"
                    );
                    return Err(ApiError::Network(e));
                }
            }
        }
    }

    /// Calculate exponential backoff delay
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        // Exponential backoff: base_delay * 2^attempt, plus up to 10% jitter
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        let jitter = (delay as f64 * 0.1 * rand::random::<f64>()) as u64;
        delay.saturating_add(jitter)
    }

    /// Resolve an API path against the base URL
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid request path: {}", path))
            .map_err(ApiError::Internal)
    }

    /// Start building a request for an API path
    pub fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, ApiError> {
        Ok(self.client.request(method, self.url(path)?))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.request(Method::GET, path)?.build()?;
        let response = self.execute(request).await?;
        decode(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path)?.json(body).build()?;
        let response = self.execute(request).await?;
        decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, path)?.build()?;
        self.execute(request).await?;
        Ok(())
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }
}

/// 429 and 5xx are worth retrying
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let url = response.url().clone();
    response.json().await.map_err(|e| {
        tracing::warn!(url = %url, error = %e, "Failed to decode response body");
        ApiError::InvalidResponse(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, CredentialStore, MemoryCredentialStore};

    fn test_client(max_retries: u32) -> AuthenticatedClient {
        let base_url = Url::parse("http://localhost:8080").unwrap();
        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryCredentialStore::with_credential(Credential::new("a", "r")));
        let client = build_client(20, 30, 300).unwrap();
        let auth = Arc::new(AuthManager::new(client.clone(), &base_url, store).unwrap());
        AuthenticatedClient::new(client, auth, base_url, max_retries)
    }

    #[test]
    fn test_backoff_calculation() {
        let client = test_client(3);

        // Each delay should be roughly double the previous (with jitter)
        let delay0 = client.calculate_backoff_delay(0);
        let delay1 = client.calculate_backoff_delay(1);
        let delay2 = client.calculate_backoff_delay(2);

        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[test]
    fn test_custom_base_delay() {
        let client = test_client(3).with_base_delay(10);
        let delay = client.calculate_backoff_delay(2);
        assert!((40..=44).contains(&delay));
    }

    #[test]
    fn test_backoff_saturates_on_large_attempts() {
        let client = test_client(100);
        assert_eq!(client.calculate_backoff_delay(64), u64::MAX);
        assert_eq!(client.calculate_backoff_delay(100), u64::MAX);
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_url_join() {
        let client = test_client(0);
        assert_eq!(
            client.url("/api/modules").unwrap().as_str(),
            "http://localhost:8080/api/modules"
        );
    }
}
