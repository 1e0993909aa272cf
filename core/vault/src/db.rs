//! SQLite connection shared by the record store and the side tables.

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use vaultkeep_common::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    original_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    physical_ref TEXT NOT NULL UNIQUE,
    category TEXT,
    folder_path TEXT,
    content_hash TEXT NOT NULL,
    is_image INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_created ON items(created_at);
CREATE INDEX IF NOT EXISTS idx_items_folder ON items(folder_path);

CREATE TABLE IF NOT EXISTS side_tables (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Index database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create or open the index database at `path`.
    ///
    /// # Errors
    /// - Database creation or schema setup failure
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        info!("Index database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("Index connection lock poisoned".to_string()))
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction; commits only if `f` succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.db");

        Database::open(&path).unwrap();
        let db = Database::open(&path).unwrap();
        let tables: i64 = db
            .with_conn(|c| {
                Ok(c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::in_memory().unwrap();

        let result: Result<()> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO side_tables (key, value) VALUES ('k', '1')",
                [],
            )?;
            Err(Error::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM side_tables", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
