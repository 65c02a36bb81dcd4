//! Database location and connection setup.

use anyhow::Context;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME_DIR: &str = "folio";
const DEFAULT_DB_FILENAME: &str = "folio.sqlite3";
const DB_ENV: &str = "FOLIO_DB_PATH";

pub fn resolve_db_path() -> PathBuf {
    if let Some(path) = env_path(DB_ENV) {
        return path;
    }

    match dirs::data_local_dir() {
        Some(dir) => dir.join(APP_NAME_DIR).join(DEFAULT_DB_FILENAME),
        None => PathBuf::from("data").join(DEFAULT_DB_FILENAME),
    }
}

pub fn ensure_parent_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create SQLite parent directory: {}",
                    parent.display()
                )
            })?;
        }
    }
    Ok(())
}

pub fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Unable to open SQLite database at {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(3))
        .context("Failed to configure SQLite busy timeout")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("Failed to enable SQLite WAL journal mode")?;
    Ok(conn)
}

fn env_path(name: &str) -> Option<PathBuf> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}
