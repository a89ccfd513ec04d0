//! Keyed storage for the four record kinds the engine keeps per document.
//!
//! A store is pure persistence: `save_*` replaces the whole record, reads
//! return `None` when absent, and the typed `get_*` helpers turn absence into
//! [`SyncError::NotFound`]. Stores carry no concurrency control of their own
//! beyond what keeps each call memory-safe; the engine serializes access per
//! document id.
//!
//! - [`MemoryStore`]: in-process maps.
//! - [`SqliteStore`] (feature `sqlite`): one SQLite table per record kind.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::{Backup, Document, Edit, Shadow};

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// The record kinds a store holds per document id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Canonical application state.
    Document,
    /// Convergence belief.
    Shadow,
    /// Last good shadow snapshot.
    Backup,
    /// Unacknowledged outgoing edits.
    PendingEdits,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Document => "document",
            RecordKind::Shadow => "shadow",
            RecordKind::Backup => "backup",
            RecordKind::PendingEdits => "pending edits",
        };
        f.write_str(name)
    }
}

/// Persistence for documents, shadows, backups and pending edits.
pub trait DocumentStore: Send + Sync {
    /// Replace the document record.
    fn save_document(&self, document: &Document) -> Result<()>;

    /// Load the document record.
    fn document(&self, id: &str) -> Result<Option<Document>>;

    /// Replace the shadow record.
    fn save_shadow(&self, shadow: &Shadow) -> Result<()>;

    /// Load the shadow record.
    fn shadow(&self, id: &str) -> Result<Option<Shadow>>;

    /// Replace the backup record.
    fn save_backup(&self, backup: &Backup) -> Result<()>;

    /// Load the backup record.
    fn backup(&self, id: &str) -> Result<Option<Backup>>;

    /// Append an edit to the pending list of `id`.
    fn append_pending_edit(&self, id: &str, client_id: &str, edit: &Edit) -> Result<()>;

    /// Pending edits of `id`, oldest first. Empty when there are none.
    fn pending_edits(&self, id: &str) -> Result<Vec<Edit>>;

    /// Remove every pending edit of `id` matching `predicate`.
    /// Returns how many were removed.
    fn remove_pending_edits(&self, id: &str, predicate: &dyn Fn(&Edit) -> bool) -> Result<usize>;

    /// Drop all pending edits of `id`.
    fn clear_pending_edits(&self, id: &str) -> Result<()>;

    /// Delete every record of `id`.
    fn remove(&self, id: &str) -> Result<()>;

    /// Load the document record, failing with `NotFound` when absent.
    fn get_document(&self, id: &str) -> Result<Document> {
        self.document(id)?
            .ok_or_else(|| SyncError::not_found(id, RecordKind::Document))
    }

    /// Load the shadow record, failing with `NotFound` when absent.
    fn get_shadow(&self, id: &str) -> Result<Shadow> {
        self.shadow(id)?
            .ok_or_else(|| SyncError::not_found(id, RecordKind::Shadow))
    }

    /// Load the backup record, failing with `NotFound` when absent.
    fn get_backup(&self, id: &str) -> Result<Backup> {
        self.backup(id)?
            .ok_or_else(|| SyncError::not_found(id, RecordKind::Backup))
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every store must share.

    use super::*;
    use crate::types::Content;

    pub fn run(store: &dyn DocumentStore) {
        save_replaces(store);
        missing_records(store);
        pending_edit_order(store);
        remove_all(store);
    }

    fn save_replaces(store: &dyn DocumentStore) {
        store.save_document(&Document::new("a", "one")).unwrap();
        store.save_document(&Document::new("a", "two")).unwrap();
        assert_eq!(
            store.get_document("a").unwrap().content,
            Content::Text("two".to_string())
        );

        let mut shadow = Shadow::new("a", "c1", Content::from("one"));
        store.save_shadow(&shadow).unwrap();
        shadow.client_version = 4;
        shadow.server_version = 2;
        store.save_shadow(&shadow).unwrap();
        assert_eq!(store.get_shadow("a").unwrap(), shadow);

        let backup = Backup {
            id: "a".to_string(),
            client_version: 4,
            server_version: 2,
            content: Content::Structured(serde_json::json!({"k": [1, 2]})),
        };
        store.save_backup(&backup).unwrap();
        assert_eq!(store.get_backup("a").unwrap(), backup);
    }

    fn missing_records(store: &dyn DocumentStore) {
        assert!(store.document("missing").unwrap().is_none());
        assert!(matches!(
            store.get_shadow("missing"),
            Err(SyncError::NotFound {
                kind: RecordKind::Shadow,
                ..
            })
        ));
        assert!(store.pending_edits("missing").unwrap().is_empty());
    }

    fn pending_edit_order(store: &dyn DocumentStore) {
        for version in 0..4 {
            store
                .append_pending_edit("p", "c1", &Edit::new(version, version % 2, vec![]))
                .unwrap();
        }
        let versions: Vec<i64> = store
            .pending_edits("p")
            .unwrap()
            .iter()
            .map(|edit| edit.client_version)
            .collect();
        assert_eq!(versions, vec![0, 1, 2, 3]);

        let removed = store
            .remove_pending_edits("p", &|edit| edit.server_version == 1)
            .unwrap();
        assert_eq!(removed, 2);
        let versions: Vec<i64> = store
            .pending_edits("p")
            .unwrap()
            .iter()
            .map(|edit| edit.client_version)
            .collect();
        assert_eq!(versions, vec![0, 2]);

        store.clear_pending_edits("p").unwrap();
        assert!(store.pending_edits("p").unwrap().is_empty());
    }

    fn remove_all(store: &dyn DocumentStore) {
        store.save_document(&Document::new("r", "x")).unwrap();
        store
            .save_shadow(&Shadow::new("r", "c1", Content::from("x")))
            .unwrap();
        store
            .append_pending_edit("r", "c1", &Edit::new(0, 0, vec![]))
            .unwrap();
        store.remove("r").unwrap();
        assert!(store.document("r").unwrap().is_none());
        assert!(store.shadow("r").unwrap().is_none());
        assert!(store.pending_edits("r").unwrap().is_empty());
    }
}
