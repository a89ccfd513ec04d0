//! The differential synchronization engine.
//!
//! `diff()` turns a local document change into an [`Edit`] against the
//! shadow and advances the shadow. `patch()` absorbs the peer's edits into
//! the shadow, then carries the shadow over to the document and refreshes
//! the backup.
//!
//! Every incoming edit E is classified against the current shadow S:
//!
//! | Case | Condition | Action |
//! |---|---|---|
//! | regression | `E.cv < S.cv`, not seeded | restore S from the backup, then reclassify E |
//! | duplicate | `E.sv < S.sv` | discard, drop matching pending edit |
//! | matching | versions equal, or seeded | apply E, bump versions |
//! | other | anything else | skip and report |
//!
//! All work is synchronous. Calls for one document id are serialized by a
//! per-id lock; different ids proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, SyncError};
use crate::store::{DocumentStore, MemoryStore};
use crate::strategy::Strategy;
use crate::types::{Backup, Content, Document, Edit, EditVersion, PatchMessage, Shadow};

/// What happened to the edits of one `patch()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchReport {
    /// Document after reconciliation.
    pub document: Document,
    /// Edits applied to the shadow (matching or seeded).
    pub applied: Vec<EditVersion>,
    /// Edits discarded as already absorbed.
    pub discarded: Vec<EditVersion>,
    /// Edits that triggered a backup restore. Each one also lands in
    /// `applied`, `discarded` or `skipped` once reclassified.
    pub restored: Vec<EditVersion>,
    /// Edits matching none of the cases. They change nothing.
    pub skipped: Vec<EditVersion>,
}

impl PatchReport {
    fn new(document: Document) -> Self {
        Self {
            document,
            applied: Vec::new(),
            discarded: Vec::new(),
            restored: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Reconciliation engine over a diff/patch strategy and a document store.
pub struct SyncEngine<S: Strategy> {
    strategy: S,
    store: Arc<dyn DocumentStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: Strategy> SyncEngine<S> {
    /// Create an engine over a fresh [`MemoryStore`].
    pub fn new(strategy: S) -> Self {
        Self::with_store(strategy, Arc::new(MemoryStore::new()))
    }

    /// Create an engine over an existing store.
    pub fn with_store(strategy: S, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            strategy,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The strategy in use.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // =========================================================================
    // Document lifecycle
    // =========================================================================

    /// Register a document: creates its document, shadow (versions 0/0) and
    /// backup (clientVersion 0), and starts with no pending edits.
    pub fn add_document(&self, document: &Document, client_id: &str) -> Result<()> {
        let lock = self.lock_for(&document.id);
        let _guard = lock.lock().unwrap();

        self.store.save_document(document)?;
        self.store.save_shadow(&Shadow::new(
            document.id.clone(),
            client_id,
            document.content.clone(),
        ))?;
        self.store.save_backup(&Backup {
            id: document.id.clone(),
            client_version: 0,
            server_version: 0,
            content: document.content.clone(),
        })?;
        self.store.clear_pending_edits(&document.id)?;

        log::debug!(
            "[SyncEngine] Added document {} for client {} ({})",
            document.id,
            client_id,
            self.strategy.name()
        );
        Ok(())
    }

    /// Drop every record of a document.
    pub fn remove_document(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        {
            let _guard = lock.lock().unwrap();
            self.store.remove(id)?;
        }
        // Keep the entry while another caller still holds this mutex.
        let mut locks = self.locks.lock().unwrap();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        log::debug!("[SyncEngine] Removed document {}", id);
        Ok(())
    }

    /// Current document record.
    pub fn get_document(&self, id: &str) -> Result<Document> {
        self.store.get_document(id)
    }

    /// Current shadow record.
    pub fn get_shadow(&self, id: &str) -> Result<Shadow> {
        self.store.get_shadow(id)
    }

    /// Current backup record.
    pub fn get_backup(&self, id: &str) -> Result<Backup> {
        self.store.get_backup(id)
    }

    /// Unacknowledged outgoing edits, oldest first.
    pub fn pending_edits(&self, id: &str) -> Result<Vec<Edit>> {
        self.store.pending_edits(id)
    }

    // =========================================================================
    // Outgoing
    // =========================================================================

    /// Compute the edit from the shadow to `document`, advance the shadow
    /// and return every unacknowledged edit for the document, oldest first.
    ///
    /// Each call is a real state advance: calling twice without changing the
    /// content still produces two distinct edits.
    pub fn diff(&self, document: &Document) -> Result<PatchMessage> {
        let lock = self.lock_for(&document.id);
        let _guard = lock.lock().unwrap();

        let mut shadow = self.store.get_shadow(&document.id)?;
        let diffs = self.strategy.diff(&shadow.content, &document.content)?;
        let edit = Edit::new(shadow.client_version, shadow.server_version, diffs);

        shadow.client_version += 1;
        shadow.content = document.content.clone();
        self.store.save_shadow(&shadow)?;

        self.store
            .append_pending_edit(&document.id, &shadow.client_id, &edit)?;
        self.store.save_document(document)?;

        let edits = self.store.pending_edits(&document.id)?;
        log::debug!(
            "[SyncEngine] Diff for {} at {} ({} pending)",
            document.id,
            edit.version(),
            edits.len()
        );

        Ok(PatchMessage {
            id: document.id.clone(),
            client_id: shadow.client_id,
            edits,
        })
    }

    /// Build the seeded baseline message for a document: one edit marked
    /// with the seeded sentinel that turns `base`, the content the receiver
    /// was seeded with, into this side's shadow content.
    pub fn seeded_message(&self, id: &str, base: &Content) -> Result<PatchMessage> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().unwrap();

        let shadow = self.store.get_shadow(id)?;
        let diffs = self.strategy.diff(base, &shadow.content)?;

        Ok(PatchMessage {
            id: id.to_string(),
            client_id: shadow.client_id,
            edits: vec![Edit::seeded(shadow.server_version, diffs)],
        })
    }

    // =========================================================================
    // Incoming
    // =========================================================================

    /// Absorb the peer's edits into the shadow, bring the document in line
    /// with the shadow and refresh the backup.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotFound`] if the document was never added.
    /// - [`SyncError::VersionConflict`] if a regressed edit does not match the
    ///   backup. The document needs a seeded resync.
    /// - [`SyncError::PatchRejected`] if a structured patch fails. Edits
    ///   absorbed before the failure stay in the shadow.
    pub fn patch(&self, message: &PatchMessage) -> Result<PatchReport> {
        let lock = self.lock_for(&message.id);
        let _guard = lock.lock().unwrap();

        let mut shadow = self.store.get_shadow(&message.id)?;
        let mut document = self.store.get_document(&message.id)?;
        let mut report = PatchReport::new(document.clone());

        for edit in &message.edits {
            if edit.client_version < shadow.client_version && !edit.is_seeded() {
                shadow = self.restore_backup(&shadow, edit)?;
                report.restored.push(edit.version());
            }

            if edit.server_version < shadow.server_version {
                let removed = self.store.remove_pending_edits(&message.id, &|pending| {
                    pending.server_version == edit.server_version
                        && pending.client_version <= edit.client_version
                })?;
                log::debug!(
                    "[SyncEngine] Discarded duplicate edit {} for {} ({} pending dropped)",
                    edit.version(),
                    message.id,
                    removed
                );
                report.discarded.push(edit.version());
                continue;
            }

            let matching = edit.server_version == shadow.server_version
                && edit.client_version == shadow.client_version;
            if matching || edit.is_seeded() {
                self.apply_edit_to_shadow(&mut shadow, edit)?;
                if edit.is_seeded() {
                    shadow.client_version = 0;
                } else {
                    shadow.server_version += 1;
                }
                self.store.save_shadow(&shadow)?;
                self.store.remove_pending_edits(&message.id, &|pending| {
                    pending.server_version <= edit.server_version
                })?;
                report.applied.push(edit.version());
                continue;
            }

            log::warn!(
                "[SyncEngine] Skipping edit {} for {}: shadow is at {}",
                edit.version(),
                message.id,
                shadow.version()
            );
            report.skipped.push(edit.version());
        }

        self.patch_document(&mut document, &shadow)?;
        self.store.save_backup(&Backup {
            id: shadow.id.clone(),
            client_version: shadow.client_version,
            server_version: shadow.server_version,
            content: shadow.content.clone(),
        })?;

        report.document = document;
        Ok(report)
    }

    /// Apply an edit's diffs to the shadow content in place.
    fn apply_edit_to_shadow(&self, shadow: &mut Shadow, edit: &Edit) -> Result<()> {
        let applied = self.strategy.apply_diffs(&shadow.content, &edit.diffs)?;
        if !applied.is_complete() {
            log::warn!(
                "[SyncEngine] Edit {} for {} applied partially ({} of {} hunks failed)",
                edit.version(),
                shadow.id,
                applied.failed(),
                applied.results.len()
            );
        }
        shadow.content = applied.content;
        Ok(())
    }

    /// Carry the shadow over to the document and persist it.
    fn patch_document(&self, document: &mut Document, shadow: &Shadow) -> Result<()> {
        let diffs = self.strategy.diff(&document.content, &shadow.content)?;
        let applied = self.strategy.apply_diffs(&document.content, &diffs)?;
        if !applied.is_complete() {
            log::warn!(
                "[SyncEngine] Document {} patched partially ({} failed)",
                document.id,
                applied.failed()
            );
        }
        document.content = applied.content;
        self.store.save_document(document)
    }

    /// Roll the shadow back to the backup when the peer regressed to the
    /// backup's clientVersion, e.g. after one of our messages was lost.
    /// The edit itself is not applied here.
    fn restore_backup(&self, shadow: &Shadow, edit: &Edit) -> Result<Shadow> {
        let backup = self.store.get_backup(&shadow.id)?;
        if backup.client_version != edit.client_version {
            log::error!(
                "[SyncEngine] Cannot restore {}: edit {} vs backup clientVersion {}",
                shadow.id,
                edit.version(),
                backup.client_version
            );
            return Err(SyncError::VersionConflict {
                id: shadow.id.clone(),
                edit_version: edit.client_version,
                backup_version: backup.client_version,
            });
        }

        let restored = Shadow {
            id: shadow.id.clone(),
            client_id: shadow.client_id.clone(),
            client_version: backup.client_version,
            server_version: backup.server_version,
            content: backup.content,
        };

        self.store.clear_pending_edits(&shadow.id)?;
        self.store.save_shadow(&restored)?;

        log::info!(
            "[SyncEngine] Restored {} from backup at {}",
            shadow.id,
            restored.version()
        );
        Ok(restored)
    }
}

impl<S: Strategy + std::fmt::Debug> std::fmt::Debug for SyncEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{JsonPatchStrategy, TextStrategy};
    use crate::types::DiffOperation;
    use serde_json::json;

    fn text_engine(id: &str, content: &str) -> SyncEngine<TextStrategy> {
        let engine = SyncEngine::new(TextStrategy::new());
        engine
            .add_document(&Document::new(id, content), "client-1")
            .unwrap();
        engine
    }

    fn text_edit(cv: i64, sv: i64, from: &str, to: &str) -> Edit {
        let diffs = TextStrategy::new()
            .diff(&Content::from(from), &Content::from(to))
            .unwrap();
        Edit::new(cv, sv, diffs)
    }

    fn message(id: &str, edits: Vec<Edit>) -> PatchMessage {
        PatchMessage {
            id: id.to_string(),
            client_id: "client-1".to_string(),
            edits,
        }
    }

    #[test]
    fn test_add_document_creates_records() {
        let engine = text_engine("d1", "Hello");
        let shadow = engine.get_shadow("d1").unwrap();
        assert_eq!(shadow.client_id, "client-1");
        assert_eq!(shadow.version(), EditVersion { client_version: 0, server_version: 0 });
        assert_eq!(engine.get_backup("d1").unwrap().client_version, 0);
        assert!(engine.pending_edits("d1").unwrap().is_empty());
    }

    #[test]
    fn test_diff_unknown_document_is_not_found() {
        let engine = SyncEngine::new(TextStrategy::new());
        let err = engine.diff(&Document::new("nope", "x")).unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[test]
    fn test_hello_world_scenario() {
        let client = text_engine("d1", "Hello");
        let msg = client.diff(&Document::new("d1", "Hello World")).unwrap();

        assert_eq!(msg.edits.len(), 1);
        assert_eq!(msg.edits[0].client_version, 0);
        assert_eq!(
            msg.edits[0].diffs,
            vec![DiffOperation::equal("Hello"), DiffOperation::insert(" World")]
        );

        let peer = text_engine("d1", "Hello");
        let report = peer.patch(&msg).unwrap();
        assert_eq!(report.document.content, Content::from("Hello World"));
        assert_eq!(peer.get_shadow("d1").unwrap().server_version, 1);
        assert_eq!(report.applied.len(), 1);
    }

    #[test]
    fn test_two_diffs_accumulate_pending() {
        let engine = text_engine("d1", "a");
        engine.diff(&Document::new("d1", "ab")).unwrap();
        let msg = engine.diff(&Document::new("d1", "abc")).unwrap();

        let versions: Vec<i64> = msg.edits.iter().map(|e| e.client_version).collect();
        assert_eq!(versions, vec![0, 1]);
        assert_eq!(engine.pending_edits("d1").unwrap(), msg.edits);
        assert_eq!(engine.get_shadow("d1").unwrap().client_version, 2);
    }

    #[test]
    fn test_unchanged_diff_still_advances() {
        let engine = text_engine("d1", "same");
        let first = engine.diff(&Document::new("d1", "same")).unwrap();
        let second = engine.diff(&Document::new("d1", "same")).unwrap();
        assert_eq!(first.edits.len(), 1);
        assert_eq!(second.edits.len(), 2);
        assert_ne!(second.edits[0], second.edits[1]);
    }

    #[test]
    fn test_matching_edit_prunes_pending() {
        let engine = text_engine("d1", "abc");
        engine.diff(&Document::new("d1", "abcd")).unwrap();
        assert_eq!(engine.pending_edits("d1").unwrap().len(), 1);

        // Peer absorbed our edit (cv 1) and sends its own first edit.
        let report = engine
            .patch(&message("d1", vec![text_edit(1, 0, "abcd", "xabcd")]))
            .unwrap();
        assert_eq!(report.document.content, Content::from("xabcd"));
        assert!(engine.pending_edits("d1").unwrap().is_empty());
        let shadow = engine.get_shadow("d1").unwrap();
        assert_eq!(shadow.version(), EditVersion { client_version: 1, server_version: 1 });
        assert_eq!(engine.get_backup("d1").unwrap().client_version, 1);
    }

    #[test]
    fn test_duplicate_edit_is_noop() {
        let engine = text_engine("d1", "one");
        let edit = text_edit(0, 0, "one", "one two");
        engine.patch(&message("d1", vec![edit.clone()])).unwrap();
        let shadow_before = engine.get_shadow("d1").unwrap();
        let doc_before = engine.get_document("d1").unwrap();

        let report = engine.patch(&message("d1", vec![edit])).unwrap();
        assert_eq!(report.discarded.len(), 1);
        assert_eq!(engine.get_shadow("d1").unwrap(), shadow_before);
        assert_eq!(engine.get_document("d1").unwrap(), doc_before);
    }

    #[test]
    fn test_seeded_edit_resets_client_version() {
        let engine = text_engine("d1", "");
        for text in ["a", "ab", "abc"] {
            engine.diff(&Document::new("d1", text)).unwrap();
        }
        assert_eq!(engine.get_shadow("d1").unwrap().client_version, 3);

        let seeded = Edit::seeded(0, text_edit(0, 0, "abc", "server baseline").diffs);
        let report = engine.patch(&message("d1", vec![seeded])).unwrap();

        let shadow = engine.get_shadow("d1").unwrap();
        assert_eq!(shadow.client_version, 0);
        assert_eq!(shadow.server_version, 0);
        assert_eq!(shadow.content, Content::from("server baseline"));
        assert_eq!(report.document.content, Content::from("server baseline"));
    }

    #[test]
    fn test_backup_restore_after_lost_message() {
        let engine = text_engine("d1", "base");
        // Our edit cv 0 gets lost on the way to the peer.
        engine.diff(&Document::new("d1", "base mine")).unwrap();

        // The peer never saw it and sends its own edit against the backup.
        let report = engine
            .patch(&message("d1", vec![text_edit(0, 0, "base", "peer base")]))
            .unwrap();

        assert_eq!(report.restored.len(), 1);
        let shadow = engine.get_shadow("d1").unwrap();
        assert_eq!(shadow.version(), EditVersion { client_version: 0, server_version: 1 });
        assert_eq!(shadow.content, Content::from("peer base"));
        assert!(engine.pending_edits("d1").unwrap().is_empty());
        assert_eq!(engine.get_document("d1").unwrap().content, Content::from("peer base"));
    }

    #[test]
    fn test_backup_mismatch_is_version_conflict() {
        let engine = text_engine("d1", "x");
        engine.diff(&Document::new("d1", "xy")).unwrap();
        engine.diff(&Document::new("d1", "xyz")).unwrap();
        // Move the backup to clientVersion 2.
        engine
            .patch(&message("d1", vec![text_edit(2, 0, "xyz", "xyz!")]))
            .unwrap();
        engine.diff(&Document::new("d1", "xyz!?")).unwrap();

        let err = engine
            .patch(&message("d1", vec![text_edit(1, 1, "xy", "xy-")]))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::VersionConflict {
                edit_version: 1,
                backup_version: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_unmatched_edit_is_skipped_then_converges() {
        let engine = text_engine("d1", "start");

        // serverVersion from the future: neither duplicate nor matching.
        let report = engine
            .patch(&message("d1", vec![text_edit(0, 3, "start", "garbage start")]))
            .unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(engine.get_document("d1").unwrap().content, Content::from("start"));

        let report = engine
            .patch(&message("d1", vec![text_edit(0, 0, "start", "start over")]))
            .unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.document.content, Content::from("start over"));
        assert_eq!(engine.get_shadow("d1").unwrap().server_version, 1);
    }

    #[test]
    fn test_structured_engine_round_trip() {
        let client = SyncEngine::new(JsonPatchStrategy::new());
        let peer = SyncEngine::new(JsonPatchStrategy::new());
        let base = Document::new("doc", json!({"name": "Luke", "tags": ["jedi"]}));
        client.add_document(&base, "c1").unwrap();
        peer.add_document(&base, "c1").unwrap();

        let updated = Document::new("doc", json!({"name": "Luke", "tags": ["jedi", "pilot"]}));
        let msg = client.diff(&updated).unwrap();
        let report = peer.patch(&msg).unwrap();
        assert_eq!(report.document, updated);
    }

    #[test]
    fn test_structured_rejection_propagates() {
        let engine = SyncEngine::new(JsonPatchStrategy::new());
        engine
            .add_document(&Document::new("doc", json!({"a": 1})), "c1")
            .unwrap();
        let bad = Edit::new(
            0,
            0,
            vec![DiffOperation {
                operation: crate::types::Operation::Delete,
                text: "/missing".to_string(),
                value: None,
            }],
        );
        let err = engine.patch(&message("doc", vec![bad])).unwrap_err();
        assert!(matches!(err, SyncError::PatchRejected { .. }));
        assert_eq!(
            engine.get_shadow("doc").unwrap().content,
            Content::Structured(json!({"a": 1}))
        );
    }

    #[test]
    fn test_resent_absorbed_edit_after_lost_ack() {
        let engine = text_engine("d1", "one");
        let first = text_edit(0, 0, "one", "one two");
        engine.patch(&message("d1", vec![first.clone()])).unwrap();
        assert_eq!(
            engine.get_backup("d1").unwrap().server_version,
            1,
            "backup keeps the absorbed serverVersion"
        );

        // Our acknowledgment never reaches the peer.
        engine.diff(&Document::new("d1", "one two")).unwrap();

        let second = text_edit(0, 1, "one two", "one two three");
        let report = engine
            .patch(&message("d1", vec![first, second]))
            .unwrap();

        assert_eq!(report.restored.len(), 1);
        assert_eq!(report.discarded.len(), 1);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.document.content, Content::from("one two three"));
        let shadow = engine.get_shadow("d1").unwrap();
        assert_eq!(shadow.version(), EditVersion { client_version: 0, server_version: 2 });
        assert_eq!(shadow.content, Content::from("one two three"));
    }

    #[test]
    fn test_seeded_message_rebuilds_content() {
        let server = text_engine("d1", "full baseline");
        let msg = server.seeded_message("d1", &Content::from("")).unwrap();
        assert!(msg.edits[0].is_seeded());

        let client = text_engine("d1", "");
        let report = client.patch(&msg).unwrap();
        assert_eq!(report.document.content, Content::from("full baseline"));
    }

    #[test]
    fn test_seeded_message_replaces_receiver_base() {
        let server = text_engine("d1", "full baseline");
        let msg = server.seeded_message("d1", &Content::from("local")).unwrap();

        let client = text_engine("d1", "local");
        let report = client.patch(&msg).unwrap();
        assert_eq!(report.document.content, Content::from("full baseline"));
        assert_eq!(
            client.get_shadow("d1").unwrap().content,
            Content::from("full baseline")
        );
    }

    #[test]
    fn test_structured_seeded_message_from_base() {
        let server = SyncEngine::new(JsonPatchStrategy::new());
        server
            .add_document(&Document::new("doc", json!({"a": 1, "b": [2]})), "c1")
            .unwrap();
        let base = Content::Structured(json!({"a": 0}));
        let msg = server.seeded_message("doc", &base).unwrap();

        let client = SyncEngine::new(JsonPatchStrategy::new());
        client
            .add_document(&Document::new("doc", json!({"a": 0})), "c1")
            .unwrap();
        let report = client.patch(&msg).unwrap();
        assert_eq!(
            report.document.content,
            Content::Structured(json!({"a": 1, "b": [2]}))
        );
    }

    #[test]
    fn test_remove_keeps_lock_while_held_elsewhere() {
        let engine = text_engine("d1", "x");
        let held = engine.lock_for("d1");

        engine.remove_document("d1").unwrap();
        assert!(Arc::ptr_eq(&held, &engine.lock_for("d1")));

        drop(held);
        engine
            .add_document(&Document::new("d2", "y"), "client-1")
            .unwrap();
        engine.remove_document("d2").unwrap();
        assert!(!engine.locks.lock().unwrap().contains_key("d2"));
    }

    #[test]
    fn test_remove_document() {
        let engine = text_engine("d1", "x");
        engine.remove_document("d1").unwrap();
        assert!(matches!(
            engine.get_document("d1"),
            Err(SyncError::NotFound { .. })
        ));
    }
}
