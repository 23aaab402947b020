// Outgoing request authentication

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use std::sync::Arc;

use super::routes::{classify, RouteClass};
use super::store::{read_access_token, CredentialStore};
use crate::error::AuthError;

/// Attaches the stored bearer credential to protected requests
#[derive(Clone)]
pub struct RequestAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Decide the `Authorization` header for an outgoing request
    ///
    /// Public routes and requests made without a stored token pass through
    /// untouched; the server is left to reject the latter. Never fails.
    pub fn authorize(&self, mut request: Request) -> Request {
        let path = request.url().path().to_string();
        if classify(&path) == RouteClass::Public {
            tracing::trace!(path = %path, "Public route, no credential attached");
            return request;
        }

        match read_access_token(self.store.as_ref()) {
            Some(token) => {
                set_bearer(&mut request, &token);
            }
            None => {
                tracing::debug!(
                    path = %path,
                    reason = %AuthError::NoCredential,
                    "Sending protected request unauthenticated"
                );
            }
        }

        request
    }
}

/// Replace the `Authorization` header with `Bearer <token>`
///
/// Returns false (and leaves the request alone) if the token is not a valid
/// header value.
pub(crate) fn set_bearer(request: &mut Request, token: &str) -> bool {
    match HeaderValue::from_str(&format!("Bearer {}", token)) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
            true
        }
        Err(e) => {
            tracing::warn!("Stored access token is not a valid header value: {}", e);
            false
        }
    }
}

/// Bearer token carried by a request, if any
pub(crate) fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, MemoryCredentialStore};
    use proptest::prelude::*;
    use reqwest::{Method, Url};

    fn request(path: &str) -> Request {
        let url = Url::parse("https://api.example.test")
            .unwrap()
            .join(path)
            .unwrap();
        Request::new(Method::GET, url)
    }

    fn authenticator(credential: Option<Credential>) -> RequestAuthenticator {
        let store = match credential {
            Some(c) => MemoryCredentialStore::with_credential(c),
            None => MemoryCredentialStore::new(),
        };
        RequestAuthenticator::new(Arc::new(store))
    }

    #[test]
    fn test_protected_route_gets_bearer() {
        let auth = authenticator(Some(Credential::new("tok-1", "ref-1")));
        let req = auth.authorize(request("/api/modules"));
        assert_eq!(
            req.headers().get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer tok-1"
        );
    }

    #[test]
    fn test_public_route_untouched() {
        let auth = authenticator(Some(Credential::new("tok-1", "ref-1")));
        let req = auth.authorize(request("/api/auth/login"));
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_no_token_forwards_unmodified() {
        let auth = authenticator(None);
        let req = auth.authorize(request("/api/profile"));
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_empty_token_forwards_unmodified() {
        let auth = authenticator(Some(Credential::new("", "ref-1")));
        let req = auth.authorize(request("/api/profile"));
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_existing_header_is_replaced() {
        let auth = authenticator(Some(Credential::new("fresh", "ref-1")));
        let mut req = request("/api/profile");
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        let req = auth.authorize(req);
        assert_eq!(bearer_token(&req), Some("fresh"));
    }

    #[test]
    fn test_authorize_does_not_touch_store() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "tok-1", "ref-1",
        )));
        let auth = RequestAuthenticator::new(store.clone());
        let _ = auth.authorize(request("/api/profile"));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("tok-1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("ref-1"));
    }

    #[test]
    fn test_invalid_token_characters_skip_header() {
        let auth = authenticator(Some(Credential::new("bad\ntoken", "ref-1")));
        let req = auth.authorize(request("/api/profile"));
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    proptest! {
        #[test]
        fn prop_public_routes_never_get_credentials(
            idx in 0usize..5,
            suffix in "[a-z0-9/]{0,12}",
            token in "[A-Za-z0-9._-]{1,32}",
        ) {
            let auth = authenticator(Some(Credential::new(token, "ref")));
            let path = format!("{}{}", crate::auth::PUBLIC_ROUTES[idx], suffix);
            let req = auth.authorize(request(&path));
            prop_assert!(req.headers().get(AUTHORIZATION).is_none());
        }

        #[test]
        fn prop_protected_routes_carry_stored_token(
            segment in "[a-z]{1,10}",
            token in "[A-Za-z0-9._-]{1,32}",
        ) {
            let auth = authenticator(Some(Credential::new(token.clone(), "ref")));
            let path = format!("/api/{}/items", segment);
            let req = auth.authorize(request(&path));
            prop_assert_eq!(bearer_token(&req), Some(token.as_str()));
        }
    }
}
