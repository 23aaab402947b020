// Authentication module
// Bearer credential attachment, 401 recovery and credential storage

mod authenticator;
mod credentials;
mod manager;
mod refresh;
mod routes;
mod store;
mod types;

pub use authenticator::RequestAuthenticator;
pub use credentials::SqliteCredentialStore;
pub use manager::{AuthManager, SessionSignal};
pub use refresh::{retry_count, TokenRenewer, MAX_RETRY_COUNT, RETRY_COUNT_HEADER};
pub use routes::{
    classify, RouteClass, LOGIN_PATH, PUBLIC_ROUTES, REFRESH_PATH, REGISTER_PATH,
    RESEND_CODE_PATH, VERIFY_EMAIL_PATH,
};
pub use store::{CredentialStore, MemoryCredentialStore};
pub use types::{
    AuthResponse, Credential, LoginRequest, MessageResponse, RegisterRequest, ResendCodeRequest,
    SessionState, VerifyEmailRequest,
};
