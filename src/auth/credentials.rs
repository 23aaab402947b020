// Persistent credential store backed by SQLite

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::store::CredentialStore;
use super::types::{Credential, StoredTokenData};

/// Key of the session row in `auth_kv`
const TOKEN_KEY: &str = "cyberquest:session:token";

/// Credential store persisted to a SQLite `auth_kv` table
///
/// The token pair lives in a single JSON row, so every write is one upsert.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create credential directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn load(conn: &Connection) -> Result<Option<StoredTokenData>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [TOKEN_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load token data from SQLite")?;

        raw.map(|json| {
            serde_json::from_str(&json).context("Failed to parse token data from SQLite")
        })
        .transpose()
    }

    fn store(conn: &Connection, data: &StoredTokenData) -> Result<()> {
        let json = serde_json::to_string(data).context("Failed to serialize token data")?;
        conn.execute(
            "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [TOKEN_KEY, json.as_str()],
        )
        .context("Failed to write token data to SQLite")?;
        Ok(())
    }

    /// Read-modify-write under the connection lock
    fn update<F: FnOnce(&mut StoredTokenData)>(&self, f: F) -> Result<()> {
        let conn = self.lock()?;
        let mut data = Self::load(&conn)?.unwrap_or(StoredTokenData {
            access_token: None,
            refresh_token: None,
            updated_at: Utc::now(),
        });
        f(&mut data);
        data.updated_at = Utc::now();
        Self::store(&conn, &data)
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn access_token(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(Self::load(&conn)?.and_then(|d| d.access_token))
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(Self::load(&conn)?.and_then(|d| d.refresh_token))
    }

    fn save_access_token(&self, token: &str) -> Result<()> {
        self.update(|d| d.access_token = Some(token.to_string()))
    }

    fn save_refresh_token(&self, token: &str) -> Result<()> {
        self.update(|d| d.refresh_token = Some(token.to_string()))
    }

    fn save_credential(&self, credential: &Credential) -> Result<()> {
        self.update(|d| {
            d.access_token = Some(credential.access_token.clone());
            d.refresh_token = Some(credential.refresh_token.clone());
        })
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM auth_kv WHERE key = ?", [TOKEN_KEY])
            .context("Failed to clear token data from SQLite")?;
        Ok(())
    }
}
