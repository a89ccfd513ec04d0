//! In-memory document store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::DocumentStore;
use crate::error::Result;
use crate::types::{Backup, Document, Edit, Shadow};

#[derive(Debug, Clone)]
struct PendingRecord {
    client_id: String,
    edits: Vec<Edit>,
}

/// Document store backed by in-process hash maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, Document>>,
    shadows: RwLock<HashMap<String, Shadow>>,
    backups: RwLock<HashMap<String, Backup>>,
    pending: RwLock<HashMap<String, PendingRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents held.
    pub fn len(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Client id the pending list of `id` was recorded under.
    pub fn pending_client_id(&self, id: &str) -> Option<String> {
        self.pending
            .read()
            .unwrap()
            .get(id)
            .map(|record| record.client_id.clone())
    }
}

impl DocumentStore for MemoryStore {
    fn save_document(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .unwrap()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().unwrap().get(id).cloned())
    }

    fn save_shadow(&self, shadow: &Shadow) -> Result<()> {
        self.shadows
            .write()
            .unwrap()
            .insert(shadow.id.clone(), shadow.clone());
        Ok(())
    }

    fn shadow(&self, id: &str) -> Result<Option<Shadow>> {
        Ok(self.shadows.read().unwrap().get(id).cloned())
    }

    fn save_backup(&self, backup: &Backup) -> Result<()> {
        self.backups
            .write()
            .unwrap()
            .insert(backup.id.clone(), backup.clone());
        Ok(())
    }

    fn backup(&self, id: &str) -> Result<Option<Backup>> {
        Ok(self.backups.read().unwrap().get(id).cloned())
    }

    fn append_pending_edit(&self, id: &str, client_id: &str, edit: &Edit) -> Result<()> {
        let mut pending = self.pending.write().unwrap();
        let record = pending
            .entry(id.to_string())
            .or_insert_with(|| PendingRecord {
                client_id: client_id.to_string(),
                edits: Vec::new(),
            });
        record.client_id = client_id.to_string();
        record.edits.push(edit.clone());
        Ok(())
    }

    fn pending_edits(&self, id: &str) -> Result<Vec<Edit>> {
        Ok(self
            .pending
            .read()
            .unwrap()
            .get(id)
            .map(|record| record.edits.clone())
            .unwrap_or_default())
    }

    fn remove_pending_edits(&self, id: &str, predicate: &dyn Fn(&Edit) -> bool) -> Result<usize> {
        let mut pending = self.pending.write().unwrap();
        let Some(record) = pending.get_mut(id) else {
            return Ok(0);
        };
        let before = record.edits.len();
        record.edits.retain(|edit| !predicate(edit));
        Ok(before - record.edits.len())
    }

    fn clear_pending_edits(&self, id: &str) -> Result<()> {
        if let Some(record) = self.pending.write().unwrap().get_mut(id) {
            record.edits.clear();
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.documents.write().unwrap().remove(id);
        self.shadows.write().unwrap().remove(id);
        self.backups.write().unwrap().remove(id);
        self.pending.write().unwrap().remove(id);
        Ok(())
    }
}
