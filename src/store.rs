use std::path::Path;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::record::Record;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("count store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Flat `(path, count)` records persisted in a SQLite `todos` table.
pub struct CountStore {
    conn: Connection,
}

impl CountStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = CountStore { conn };
        store.migrate_schema()?;
        debug!("Opened count store at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = CountStore { conn };
        store.migrate_schema()?;
        Ok(store)
    }

    fn migrate_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS todos (
                 path  TEXT PRIMARY KEY NOT NULL,
                 count INTEGER NOT NULL
             );",
        )?;
        Ok(())
    }

    /// Every stored record, ordered by path.
    pub fn load(&self) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, count FROM todos ORDER BY path")?;
        let records = stmt
            .query_map([], |row| {
                Ok(Record {
                    path: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Loaded {} records", records.len());
        Ok(records)
    }

    /// Replaces the stored records with `records`. A path given more than
    /// once keeps its last count.
    pub fn save(&mut self, records: &[Record]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM todos", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO todos (path, count) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET count = excluded.count",
            )?;
            for record in records {
                stmt.execute(params![record.path, record.count])?;
            }
        }
        tx.commit()?;
        debug!("Saved {} records", records.len());
        Ok(())
    }
}
