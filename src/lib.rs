// CyberQuest client - authenticated HTTP pipeline with transparent token refresh

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod session;
