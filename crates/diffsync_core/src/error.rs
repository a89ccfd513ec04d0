//! Error types for the sync engine.

use thiserror::Error;

use crate::store::RecordKind;

/// Errors produced by the engine, its strategies and its stores.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No record of the requested kind exists for this document id.
    /// Callers must `add_document` first.
    #[error("{kind} not found for document '{id}'")]
    NotFound {
        /// Document id.
        id: String,
        /// Which record was missing.
        kind: RecordKind,
    },

    /// A regressed edit could not be matched against the retained backup.
    /// The document needs a full seeded resync.
    #[error(
        "edit clientVersion {edit_version} does not match backup clientVersion {backup_version} for document '{id}'"
    )]
    VersionConflict {
        /// Document id.
        id: String,
        /// `clientVersion` carried by the incoming edit.
        edit_version: i64,
        /// `clientVersion` of the retained backup.
        backup_version: i64,
    },

    /// A structured patch could not be applied atomically.
    #[error("patch rejected: {reason}")]
    PatchRejected {
        /// Reason reported by the patch backend.
        reason: String,
    },

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Content or edits could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Shorthand for a [`SyncError::NotFound`].
    pub fn not_found(id: impl Into<String>, kind: RecordKind) -> Self {
        SyncError::NotFound {
            id: id.into(),
            kind,
        }
    }

    /// Whether the error leaves the document unrecoverable without a resync.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::VersionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = SyncError::not_found("d1", RecordKind::Shadow);
        assert_eq!(err.to_string(), "shadow not found for document 'd1'");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_version_conflict_is_fatal() {
        let err = SyncError::VersionConflict {
            id: "d1".to_string(),
            edit_version: 1,
            backup_version: 3,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("clientVersion 1"));
    }
}
