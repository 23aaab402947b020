// Sign-in flows: login, registration, email verification, logout

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::auth::{
    AuthResponse, Credential, LoginRequest, MessageResponse, RegisterRequest, ResendCodeRequest,
    SessionState, VerifyEmailRequest, LOGIN_PATH, REGISTER_PATH, RESEND_CODE_PATH,
    VERIFY_EMAIL_PATH,
};
use crate::error::{ApiError, Result};
use crate::http_client::AuthenticatedClient;

/// Creates and destroys user sessions
pub struct SessionManager {
    http: Arc<AuthenticatedClient>,
}

impl SessionManager {
    pub fn new(http: Arc<AuthenticatedClient>) -> Self {
        Self { http }
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        tracing::info!("Logging in...");
        let response: AuthResponse = self
            .call(LOGIN_PATH, &LoginRequest { email, password })
            .await?;
        self.accept_tokens(response, "Login")
    }

    /// Create an account; the server may sign the user in right away
    ///
    /// Returns true when a session was started.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<bool> {
        tracing::info!("Registering account...");
        let response: AuthResponse = self
            .call(
                REGISTER_PATH,
                &RegisterRequest {
                    username,
                    email,
                    password,
                },
            )
            .await?;

        if response.success != Some(true) {
            return Err(ApiError::Auth(
                response
                    .message
                    .unwrap_or_else(|| "Registration was not successful".to_string()),
            ));
        }

        let has_tokens = response.access_token.as_deref().is_some_and(|t| !t.is_empty());
        if has_tokens {
            self.accept_tokens(response, "Registration")?;
        }
        Ok(has_tokens)
    }

    /// Confirm an email address with the code that was sent to it
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<String> {
        let response: MessageResponse = self
            .call(VERIFY_EMAIL_PATH, &VerifyEmailRequest { email, code })
            .await?;
        acknowledged(response, "Email verification failed")
    }

    /// Ask the server to send a new verification code
    pub async fn resend_code(&self, email: &str) -> Result<String> {
        let response: MessageResponse = self
            .call(RESEND_CODE_PATH, &ResendCodeRequest { email })
            .await?;
        acknowledged(response, "Could not resend verification code")
    }

    /// Forget the stored session
    pub fn logout(&self) -> Result<()> {
        self.http.auth().end_session()?;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.http.auth().is_active()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.http.auth().subscribe()
    }

    /// POST to a public auth endpoint, turning 4xx bodies into auth errors
    async fn call<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        match self.http.post_json(path, body).await {
            Err(e @ ApiError::Api { status: 400..=499, .. }) => {
                let message = e.server_message().unwrap_or_default();
                tracing::warn!(path = %path, status = ?e.status(), "Auth request refused");
                Err(ApiError::Auth(message))
            }
            other => other,
        }
    }

    /// Start a session from a login/register response
    ///
    /// Only an explicit `success: true` with both tokens present counts.
    fn accept_tokens(&self, response: AuthResponse, flow: &str) -> Result<()> {
        let not_successful = || {
            ApiError::Auth(
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} was not successful", flow)),
            )
        };

        if response.success != Some(true) {
            return Err(not_successful());
        }

        let access_token = response.access_token.clone().filter(|t| !t.is_empty());
        let refresh_token = response.refresh_token.clone().filter(|t| !t.is_empty());
        match (access_token, refresh_token) {
            (Some(access), Some(refresh)) => {
                self.http
                    .auth()
                    .start_session(&Credential::new(access, refresh))?;
                Ok(())
            }
            _ => Err(not_successful()),
        }
    }
}

fn acknowledged(response: MessageResponse, fallback: &str) -> Result<String> {
    let message = response.message.unwrap_or_default();
    if response.success == Some(true) {
        Ok(message)
    } else if message.is_empty() {
        Err(ApiError::Auth(fallback.to_string()))
    } else {
        Err(ApiError::Auth(message))
    }
}
