//! # `diffsync_core`
//!
//! Differential synchronization engine. Two replicas of a document stay
//! convergent by exchanging compact edits instead of full state.
//!
//! Each side keeps four records per document id:
//!
//! ```text
//! ┌────────────┐  diff()   ┌────────────┐   PatchMessage   ┌────────────┐
//! │  Document  │ ────────▶ │   Shadow   │ ───────────────▶ │    peer    │
//! └────────────┘           └────────────┘                  └────────────┘
//!       ▲                        │  patch()
//!       └──── patched from ──────┘
//!                                 ├── Backup        (last good shadow)
//!                                 └── PendingEdits  (unacknowledged)
//! ```
//!
//! The [`SyncEngine`] implements the reconciliation algorithm and is
//! generic over a diff/patch [`Strategy`]: [`TextStrategy`] for free text
//! (tolerant apply) and [`JsonPatchStrategy`] for structured JSON (atomic
//! apply). Records live in a [`DocumentStore`].

#![warn(missing_docs)]

/// Reconciliation engine.
pub mod engine;

/// Engine error types.
pub mod error;

pub mod store;
pub mod strategy;

/// Documents, shadows, edits and wire messages.
pub mod types;

pub use engine::{PatchReport, SyncEngine};
pub use error::{Result, SyncError};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{DocumentStore, MemoryStore, RecordKind};
pub use strategy::{Applied, JsonPatchStrategy, Strategy, TextStrategy};
pub use types::{
    AddMessage, Backup, Content, DiffOperation, Document, Edit, EditVersion, Operation,
    PatchMessage, SEEDED_VERSION, Shadow, WireMessage,
};
