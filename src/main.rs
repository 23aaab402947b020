use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use std::sync::Arc;

use cyberquest_client::auth::{AuthManager, CredentialStore, SessionState, SqliteCredentialStore};
use cyberquest_client::config::{CliArgs, Command, Config};
use cyberquest_client::http_client::{self, AuthenticatedClient};
use cyberquest_client::session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap reads env fallbacks
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("API: {}", config.api_url);
    tracing::debug!("Credential store: {}", config.db_file.display());

    let store: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::open(&config.db_file)?);

    let client = http_client::build_client(
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;
    let auth = Arc::new(AuthManager::new(client.clone(), &config.api_url, store)?);
    let http = Arc::new(AuthenticatedClient::new(
        client,
        auth.clone(),
        config.api_url.clone(),
        config.http_max_retries,
    ));
    let sessions = SessionManager::new(http.clone());

    match args.command {
        Command::Login { email } => {
            let password = prompt_password("Password")?;
            sessions.login(&email, &password).await?;
            println!("✅ Logged in as {}", email);
        }
        Command::Register { username, email } => {
            let password = prompt_password("Choose a password")?;
            if sessions.register(&username, &email, &password).await? {
                println!("✅ Registered and logged in as {}", email);
            } else {
                println!("✅ Registered. Check {} for a verification code.", email);
            }
        }
        Command::Verify { email, code } => {
            let message = sessions.verify_email(&email, &code).await?;
            println!("✅ {}", non_empty(message, "Email verified"));
        }
        Command::Resend { email } => {
            let message = sessions.resend_code(&email).await?;
            println!("✅ {}", non_empty(message, "Verification code sent"));
        }
        Command::Logout => {
            sessions.logout()?;
            println!("👋 Logged out");
        }
        Command::Status => match auth.state() {
            SessionState::Active => println!("Session: active"),
            SessionState::SignedOut => println!("Session: signed out"),
        },
        Command::Get { path } => {
            let body: serde_json::Value = http.get_json(&path).await.map_err(|e| {
                if !sessions.is_active() {
                    tracing::warn!("No active session; run `cyberquest login` first");
                }
                e
            })?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

fn prompt_password(prompt: &str) -> Result<String> {
    let password: String = Password::new()
        .with_prompt(prompt)
        .interact()
        .context("Failed to read password")?;

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(password)
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}
