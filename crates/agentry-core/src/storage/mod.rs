//! SQLite persistence for run history, user memories and knowledge chunks.

pub mod memories;
pub mod sessions;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

pub use memories::{MemoryStore, UserMemory};
pub use sessions::{RunRecord, SessionStore};

/// Shared SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory '{}'", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database '{}'", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` is accepted.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("invalid table name '{name}': only letters, digits and '_' are allowed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert!(validate_table_name("agno_assist_agent_sessions").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("x; DROP TABLE y").is_err());
        assert!(validate_table_name("a-b").is_err());
    }

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agentry.sqlite");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        let mode: String = db
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
