//! SQLite-backed document store.
//!
//! Content and edits are stored as JSON text. Pending edits keep their
//! insertion order through an autoincrement sequence column.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::DocumentStore;
use crate::error::{Result, SyncError};
use crate::types::{Backup, Content, Document, Edit, Shadow};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS shadows (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    client_version INTEGER NOT NULL,
    server_version INTEGER NOT NULL,
    content TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS backups (
    id TEXT PRIMARY KEY,
    client_version INTEGER NOT NULL,
    server_version INTEGER NOT NULL,
    content TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS pending_edits (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    edit TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_edits_doc ON pending_edits(doc_id, seq);
";

/// Converts rusqlite errors into [`SyncError::Storage`].
trait RusqliteResultExt<T> {
    fn storage(self) -> Result<T>;
}

impl<T> RusqliteResultExt<T> for rusqlite::Result<T> {
    fn storage(self) -> Result<T> {
        self.map_err(|e| SyncError::Storage(e.to_string()))
    }
}

/// Document store persisted in a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).storage()?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().storage()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).storage()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn content_from_json(raw: &str) -> Result<Content> {
    Ok(serde_json::from_str(raw)?)
}

impl DocumentStore for SqliteStore {
    fn save_document(&self, document: &Document) -> Result<()> {
        let content = serde_json::to_string(&document.content)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents (id, content) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET content = excluded.content",
            params![document.id, content],
        )
        .storage()?;
        Ok(())
    }

    fn document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT content FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .storage()?;
        raw.map(|raw| {
            Ok(Document {
                id: id.to_string(),
                content: content_from_json(&raw)?,
            })
        })
        .transpose()
    }

    fn save_shadow(&self, shadow: &Shadow) -> Result<()> {
        let content = serde_json::to_string(&shadow.content)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO shadows (id, client_id, client_version, server_version, content)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                client_id = excluded.client_id,
                client_version = excluded.client_version,
                server_version = excluded.server_version,
                content = excluded.content",
            params![
                shadow.id,
                shadow.client_id,
                shadow.client_version,
                shadow.server_version,
                content
            ],
        )
        .storage()?;
        Ok(())
    }

    fn shadow(&self, id: &str) -> Result<Option<Shadow>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64, i64, String)> = conn
            .query_row(
                "SELECT client_id, client_version, server_version, content
                 FROM shadows WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .storage()?;
        row.map(|(client_id, client_version, server_version, raw)| {
            Ok(Shadow {
                id: id.to_string(),
                client_id,
                client_version,
                server_version,
                content: content_from_json(&raw)?,
            })
        })
        .transpose()
    }

    fn save_backup(&self, backup: &Backup) -> Result<()> {
        let content = serde_json::to_string(&backup.content)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO backups (id, client_version, server_version, content)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                client_version = excluded.client_version,
                server_version = excluded.server_version,
                content = excluded.content",
            params![
                backup.id,
                backup.client_version,
                backup.server_version,
                content
            ],
        )
        .storage()?;
        Ok(())
    }

    fn backup(&self, id: &str) -> Result<Option<Backup>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT client_version, server_version, content FROM backups WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .storage()?;
        row.map(|(client_version, server_version, raw)| {
            Ok(Backup {
                id: id.to_string(),
                client_version,
                server_version,
                content: content_from_json(&raw)?,
            })
        })
        .transpose()
    }

    fn append_pending_edit(&self, id: &str, client_id: &str, edit: &Edit) -> Result<()> {
        let raw = serde_json::to_string(edit)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_edits (doc_id, client_id, edit) VALUES (?1, ?2, ?3)",
            params![id, client_id, raw],
        )
        .storage()?;
        Ok(())
    }

    fn pending_edits(&self, id: &str) -> Result<Vec<Edit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT edit FROM pending_edits WHERE doc_id = ?1 ORDER BY seq")
            .storage()?;
        let rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .storage()?;

        let mut edits = Vec::new();
        for raw in rows {
            let raw = raw.storage()?;
            edits.push(serde_json::from_str(&raw)?);
        }
        Ok(edits)
    }

    fn remove_pending_edits(&self, id: &str, predicate: &dyn Fn(&Edit) -> bool) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let rows: Vec<(i64, String)> = {
            let mut stmt = conn
                .prepare("SELECT seq, edit FROM pending_edits WHERE doc_id = ?1 ORDER BY seq")
                .storage()?;
            let mapped = stmt
                .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .storage()?;
            let rows = mapped
                .collect::<rusqlite::Result<Vec<(i64, String)>>>()
                .storage()?;
            rows
        };

        let mut removed = 0;
        for (seq, raw) in rows {
            let edit: Edit = serde_json::from_str(&raw)?;
            if predicate(&edit) {
                conn.execute("DELETE FROM pending_edits WHERE seq = ?1", params![seq])
                    .storage()?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn clear_pending_edits(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM pending_edits WHERE doc_id = ?1", params![id])
            .storage()?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for table in ["documents", "shadows", "backups"] {
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
                .storage()?;
        }
        conn.execute("DELETE FROM pending_edits WHERE doc_id = ?1", params![id])
            .storage()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[test]
    fn test_sqlite_store_conformance() {
        let store = SqliteStore::in_memory().unwrap();
        conformance::run(&store);
    }

    #[test]
    fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_document(&Document::new("d1", "Hello")).unwrap();
            store
                .append_pending_edit("d1", "c1", &Edit::new(0, 0, vec![]))
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get_document("d1").unwrap().content,
            Content::Text("Hello".to_string())
        );
        assert_eq!(store.pending_edits("d1").unwrap().len(), 1);
    }
}
