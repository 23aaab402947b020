// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair owned by a credential store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Whether a user session is currently established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Tokens are stored and protected calls carry a bearer credential
    Active,

    /// Store is empty; the application should route back to sign-in
    SignedOut,
}

/// Refresh endpoint request body
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh endpoint response body
///
/// `success` is tri-state on the wire: only an explicit `true` counts.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Login request body
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Registration request body
#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Email verification request body
#[derive(Debug, Serialize)]
pub struct VerifyEmailRequest<'a> {
    pub email: &'a str,
    pub code: &'a str,
}

/// Resend verification code request body
#[derive(Debug, Serialize)]
pub struct ResendCodeRequest<'a> {
    pub email: &'a str,
}

/// Response of login/register
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Generic `{success, message}` acknowledgement
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Row payload persisted by the SQLite store
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredTokenData {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_response_missing_success() {
        let resp: RefreshResponse =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":"r"}"#).unwrap();
        assert_eq!(resp.success, None);
        assert_eq!(resp.access_token.as_deref(), Some("a"));
    }

    #[test]
    fn test_refresh_response_null_success() {
        let resp: RefreshResponse = serde_json::from_str(r#"{"success":null}"#).unwrap();
        assert_eq!(resp.success, None);
        assert!(resp.access_token.is_none());
    }

    #[test]
    fn test_refresh_request_wire_shape() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "r1" }).unwrap();
        assert_eq!(body, serde_json::json!({ "refresh_token": "r1" }));
    }
}
