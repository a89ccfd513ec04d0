//! Core types for differential synchronization.
//!
//! This module defines the records the engine keeps per document
//! ([`Document`], [`Shadow`], [`Backup`]), the unit of exchange ([`Edit`]
//! made of [`DiffOperation`]s) and the wire envelopes ([`WireMessage`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// `clientVersion` sentinel marking a seeded edit: the initial full
/// baseline every peer starts from.
pub const SEEDED_VERSION: i64 = -1;

/// Document content. Either free text or a structured JSON value.
///
/// Serialized untagged, so a JSON string reads back as [`Content::Text`]
/// and every other JSON value as [`Content::Structured`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Free text.
    Text(String),
    /// Structured tree.
    Structured(serde_json::Value),
}

impl Content {
    /// Canonical string form. Text is returned as is; structured content is
    /// serialized with `serde_json` (object keys in sorted order).
    pub fn to_canonical_string(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Structured(value) => value.to_string(),
        }
    }

    /// View the content as a JSON value. Text becomes a JSON string.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Content::Text(text) => serde_json::Value::String(text.clone()),
            Content::Structured(value) => value.clone(),
        }
    }

    /// Inverse of [`Content::to_value`]: a JSON string becomes text.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Content::Text(text),
            other => Content::Structured(other),
        }
    }

    /// Returns the text if this is [`Content::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Structured(_) => None,
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<serde_json::Value> for Content {
    fn from(value: serde_json::Value) -> Self {
        Content::from_value(value)
    }
}

/// Canonical application state for one document id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id.
    pub id: String,
    /// Current content.
    pub content: Content,
}

impl Document {
    /// Create a document.
    pub fn new(id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// This side's belief about the convergent state of a document.
///
/// `content` always equals the content reached by applying every edit this
/// side has acknowledged, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shadow {
    /// Document id.
    pub id: String,
    /// Client the shadow belongs to.
    pub client_id: String,
    /// Number of local edits produced since the last seed.
    pub client_version: i64,
    /// Number of peer edits absorbed.
    pub server_version: i64,
    /// Shadow content.
    pub content: Content,
}

impl Shadow {
    /// A fresh shadow at versions 0/0.
    pub fn new(id: impl Into<String>, client_id: impl Into<String>, content: Content) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            client_version: 0,
            server_version: 0,
            content,
        }
    }

    /// Versions of this shadow as an [`EditVersion`] pair.
    pub fn version(&self) -> EditVersion {
        EditVersion {
            client_version: self.client_version,
            server_version: self.server_version,
        }
    }
}

/// Single retained shadow snapshot, used to recover from a dropped edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// Document id.
    pub id: String,
    /// `clientVersion` of the shadow when the snapshot was taken.
    pub client_version: i64,
    /// `serverVersion` of the shadow when the snapshot was taken.
    #[serde(default)]
    pub server_version: i64,
    /// Snapshot content.
    pub content: Content,
}

/// Kind of a [`DiffOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Span present on both sides.
    #[serde(rename = "UNCHANGED")]
    Equal,
    /// Span (or value) only present on the new side.
    #[serde(rename = "ADD")]
    Insert,
    /// Span (or value) only present on the old side.
    Delete,
}

/// Atomic change unit exchanged on the wire.
///
/// For text diffs `text` holds the span. For structured diffs `text` holds
/// the JSON pointer the operation addresses and `value` the inserted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffOperation {
    /// What happened to the span.
    pub operation: Operation,
    /// Span text, or JSON pointer for structured operations.
    #[serde(default)]
    pub text: String,
    /// Inserted value for structured operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl DiffOperation {
    /// Unchanged text span.
    pub fn equal(text: impl Into<String>) -> Self {
        Self::span(Operation::Equal, text)
    }

    /// Inserted text span.
    pub fn insert(text: impl Into<String>) -> Self {
        Self::span(Operation::Insert, text)
    }

    /// Deleted text span.
    pub fn delete(text: impl Into<String>) -> Self {
        Self::span(Operation::Delete, text)
    }

    fn span(operation: Operation, text: impl Into<String>) -> Self {
        Self {
            operation,
            text: text.into(),
            value: None,
        }
    }
}

/// Version pair identifying an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditVersion {
    /// `clientVersion` component.
    pub client_version: i64,
    /// `serverVersion` component.
    pub server_version: i64,
}

impl fmt::Display for EditVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}/s{}", self.client_version, self.server_version)
    }
}

/// One edit: the diffs between two consecutive shadow states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    /// Sender's `clientVersion` when the edit was made, or
    /// [`SEEDED_VERSION`].
    pub client_version: i64,
    /// Sender's `serverVersion` when the edit was made.
    pub server_version: i64,
    /// Reserved, always empty.
    #[serde(default)]
    pub checksum: String,
    /// Diff operations.
    #[serde(default)]
    pub diffs: Vec<DiffOperation>,
}

impl Edit {
    /// Create an edit at the given versions.
    pub fn new(client_version: i64, server_version: i64, diffs: Vec<DiffOperation>) -> Self {
        Self {
            client_version,
            server_version,
            checksum: String::new(),
            diffs,
        }
    }

    /// Create a seeded edit carrying the initial baseline.
    pub fn seeded(server_version: i64, diffs: Vec<DiffOperation>) -> Self {
        Self::new(SEEDED_VERSION, server_version, diffs)
    }

    /// Whether this edit is a seeded baseline.
    pub fn is_seeded(&self) -> bool {
        self.client_version == SEEDED_VERSION
    }

    /// Version pair of this edit.
    pub fn version(&self) -> EditVersion {
        EditVersion {
            client_version: self.client_version,
            server_version: self.server_version,
        }
    }
}

/// Edits for one document, as sent between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMessage {
    /// Document id.
    pub id: String,
    /// Client the edits belong to.
    pub client_id: String,
    /// Ordered edits, oldest first.
    #[serde(default)]
    pub edits: Vec<Edit>,
}

/// Announces a new document and its baseline content to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessage {
    /// Document id.
    pub id: String,
    /// Client adding the document.
    pub client_id: String,
    /// Baseline content.
    pub content: Content,
}

/// Envelope for everything exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msgType", rename_all = "lowercase")]
pub enum WireMessage {
    /// `msgType: "add"`.
    Add(AddMessage),
    /// `msgType: "patch"`.
    Patch(PatchMessage),
}

impl WireMessage {
    /// Document id the message refers to.
    pub fn document_id(&self) -> &str {
        match self {
            WireMessage::Add(msg) => &msg.id,
            WireMessage::Patch(msg) => &msg.id,
        }
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
