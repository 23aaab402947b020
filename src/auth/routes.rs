// Public route allow-list

/// Paths reachable without an access token
pub const PUBLIC_ROUTES: [&str; 5] = [
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/verify-email",
    "/api/auth/resend-code",
    "/api/auth/refresh",
];

/// Path of the token refresh endpoint
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REGISTER_PATH: &str = "/api/auth/register";
pub const VERIFY_EMAIL_PATH: &str = "/api/auth/verify-email";
pub const RESEND_CODE_PATH: &str = "/api/auth/resend-code";

/// Whether a request needs a bearer credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    Protected,
}

/// Classify a request path against the allow-list (substring match)
pub fn classify(path: &str) -> RouteClass {
    if PUBLIC_ROUTES.iter().any(|route| path.contains(route)) {
        RouteClass::Public
    } else {
        RouteClass::Protected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_routes() {
        for route in PUBLIC_ROUTES {
            assert_eq!(classify(route), RouteClass::Public, "{}", route);
        }
    }

    #[test]
    fn test_public_route_with_suffix() {
        assert_eq!(classify("/api/auth/login/"), RouteClass::Public);
        assert_eq!(classify("/api/auth/verify-email/123"), RouteClass::Public);
    }

    #[test]
    fn test_protected_routes() {
        assert_eq!(classify("/api/auth/me"), RouteClass::Protected);
        assert_eq!(classify("/api/auth/logout"), RouteClass::Protected);
        assert_eq!(classify("/api/modules/3/lessons"), RouteClass::Protected);
        assert_eq!(classify("/"), RouteClass::Protected);
        assert_eq!(classify(""), RouteClass::Protected);
    }

    #[test]
    fn test_prefix_of_public_route_is_protected() {
        assert_eq!(classify("/api/auth/log"), RouteClass::Protected);
        assert_eq!(classify("/api/auth"), RouteClass::Protected);
    }
}
