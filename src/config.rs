use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;

/// Default location of the credential database
const DEFAULT_DB_FILE: &str = "~/.cyberquest/credentials.sqlite3";

/// CyberQuest API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the CyberQuest API
    #[arg(short = 'u', long, env = "CYBERQUEST_API_URL")]
    pub api_url: Option<String>,

    /// Path to the credential database
    #[arg(short = 'd', long, env = "CYBERQUEST_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP max retries for transient failures
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "3")]
    pub http_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and store the session
    Login {
        #[arg(short, long)]
        email: String,
    },

    /// Create an account
    Register {
        #[arg(long)]
        username: String,
        #[arg(short, long)]
        email: String,
    },

    /// Confirm an email address with a verification code
    Verify {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        code: String,
    },

    /// Send a new verification code
    Resend {
        #[arg(short, long)]
        email: String,
    },

    /// Forget the stored session
    Logout,

    /// Show whether a session is stored
    Status,

    /// GET an API path with the stored session and print the JSON body
    Get { path: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_url: Url,

    // Credential storage
    pub db_file: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults
    ///
    /// Call `dotenvy::dotenv()` before parsing the arguments so `.env`
    /// values are visible to clap's `env` fallbacks.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let api_url = args
            .api_url
            .clone()
            .or_else(|| std::env::var("CYBERQUEST_API_URL").ok())
            .context("CYBERQUEST_API_URL is required (use -u or set CYBERQUEST_API_URL env var)")?;
        let api_url = Url::parse(&api_url)
            .with_context(|| format!("CYBERQUEST_API_URL is not a valid URL: {}", api_url))?;

        let db_file = expand_tilde(args.db_file.as_deref().unwrap_or(DEFAULT_DB_FILE));

        Ok(Config {
            api_url,
            db_file,

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,
            http_max_retries: args.http_retries,

            log_level: args.log_level.clone(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "CYBERQUEST_API_URL must use http or https: {}",
                self.api_url
            );
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
