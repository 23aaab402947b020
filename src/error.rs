// Error handling module
// Pipeline errors surfaced to callers and the internal refresh taxonomy

use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors returned by the authenticated client
#[derive(Error, Debug)]
pub enum ApiError {
    /// Server rejected the credential and no recovery was possible;
    /// the session has been cleared
    #[error("Unauthorized - session is no longer active")]
    Unauthorized,

    /// Authentication flow (login, register, ...) was refused
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Non-success response from the API
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Transport failure after all retries
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Api {
            status: status.as_u16(),
            message: Self::truncate_body(body),
        }
    }

    /// Server-provided `message` of a JSON error body, else the raw text
    pub fn server_message(&self) -> Option<String> {
        match self {
            ApiError::Api { message, .. } => Some(
                serde_json::from_str::<serde_json::Value>(message)
                    .ok()
                    .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                    .unwrap_or_else(|| message.clone()),
            ),
            _ => None,
        }
    }

    /// Status code carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Why a refresh cycle gave up (or why a request went out unauthenticated)
///
/// Every refresh-stage variant leads to the same recovery: clear the store
/// and let the original 401 reach the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no access token stored")]
    NoCredential,

    #[error("refresh retry budget exhausted ({0} attempts)")]
    RefreshExhausted(u32),

    #[error("no refresh token stored")]
    RefreshTokenMissing,

    #[error("refresh call failed: {0}")]
    RefreshCallFailed(String),

    #[error("refresh rejected by server")]
    RefreshRejected,

    #[error("could not persist renewed tokens: {0}")]
    CredentialPersistFailed(String),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_error_messages() {
        let err = ApiError::Auth("Invalid password".to_string());
        assert_eq!(err.to_string(), "Authentication failed: Invalid password");

        let err = ApiError::Api {
            status: 429,
            message: "Rate limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 429 - Rate limit exceeded");
    }

    #[test]
    fn test_internal_error_message() {
        let err = ApiError::Internal(anyhow::anyhow!("Something went wrong"));
        assert_eq!(err.to_string(), "Internal error: Something went wrong");
    }

    #[test]
    fn test_from_status() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, "bad password");
        assert_eq!(err.status(), Some(401));

        let err = ApiError::from_status(StatusCode::NOT_FOUND, "missing");
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "API error: 404 - missing");
    }

    #[test]
    fn test_server_message() {
        let err = ApiError::from_status(
            StatusCode::BAD_REQUEST,
            r#"{"success":false,"message":"Email already registered"}"#,
        );
        assert_eq!(
            err.server_message().as_deref(),
            Some("Email already registered")
        );

        let err = ApiError::from_status(StatusCode::BAD_REQUEST, "plain text");
        assert_eq!(err.server_message().as_deref(), Some("plain text"));

        assert_eq!(ApiError::Unauthorized.server_message(), None);
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(ApiError::truncate_body(short), short);

        let long = "x".repeat(600);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let long = "é".repeat(400);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_auth_error_messages() {
        assert_eq!(
            AuthError::RefreshExhausted(2).to_string(),
            "refresh retry budget exhausted (2 attempts)"
        );
        assert_eq!(
            AuthError::RefreshTokenMissing.to_string(),
            "no refresh token stored"
        );
        assert_eq!(
            AuthError::RefreshCallFailed("status 500".to_string()).to_string(),
            "refresh call failed: status 500"
        );
    }
}
