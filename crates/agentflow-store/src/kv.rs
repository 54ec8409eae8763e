use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// String key-value table for small pieces of client state.
#[derive(Clone)]
pub struct KvRepo {
    db: Database,
}

impl KvRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
                .optional()?)
        })
    }

    #[instrument(skip(self, value))]
    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, now],
            )?;
            Ok(())
        })
    }

    /// Returns whether a row was removed.
    #[instrument(skip(self))]
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            Ok(n > 0)
        })
    }
}
