//! Structured strategy: RFC 6902 JSON Patch with atomic application.
//!
//! Diffs come from `json_patch::diff` and are normalized to diff operations:
//! `add` becomes an insert, `remove` a delete, and `replace` an insert at
//! the same pointer (object members and the root are replaced by `add`), or a
//! delete followed by an insert when the pointer addresses an array element.
//! The operation's `text` carries the JSON pointer.

use serde_json::{Value, json};

use super::{Applied, Strategy};
use crate::error::{Result, SyncError};
use crate::types::{Content, DiffOperation, Operation};

/// JSON Patch strategy. Any failing operation rejects the whole patch.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPatchStrategy;

impl JsonPatchStrategy {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

fn parent_is_array(base: &Value, path: &str) -> bool {
    path.rsplit_once('/')
        .and_then(|(parent, _)| base.pointer(parent))
        .is_some_and(Value::is_array)
}

fn rejected(reason: impl Into<String>) -> SyncError {
    SyncError::PatchRejected {
        reason: reason.into(),
    }
}

impl Strategy for JsonPatchStrategy {
    type Patch = json_patch::Patch;

    fn name(&self) -> &'static str {
        "json-patch"
    }

    fn diff(&self, from: &Content, to: &Content) -> Result<Vec<DiffOperation>> {
        let base = from.to_value();
        let patch = json_patch::diff(&base, &to.to_value());
        let raw = serde_json::to_value(&patch)?;

        let mut ops = Vec::new();
        for op in raw.as_array().into_iter().flatten() {
            let kind = op.get("op").and_then(Value::as_str).unwrap_or_default();
            let path = op
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let value = op.get("value").cloned();

            match kind {
                "add" => ops.push(DiffOperation {
                    operation: Operation::Insert,
                    text: path,
                    value,
                }),
                "remove" => ops.push(DiffOperation {
                    operation: Operation::Delete,
                    text: path,
                    value: None,
                }),
                "replace" => {
                    if parent_is_array(&base, &path) {
                        ops.push(DiffOperation {
                            operation: Operation::Delete,
                            text: path.clone(),
                            value: None,
                        });
                    }
                    ops.push(DiffOperation {
                        operation: Operation::Insert,
                        text: path,
                        value,
                    });
                }
                other => {
                    return Err(rejected(format!(
                        "unexpected '{other}' operation from structured diff"
                    )));
                }
            }
        }
        Ok(ops)
    }

    fn make_patch(&self, _base: &Content, diffs: &[DiffOperation]) -> Result<json_patch::Patch> {
        let mut ops = Vec::with_capacity(diffs.len());
        for diff in diffs {
            match diff.operation {
                Operation::Insert => ops.push(json!({
                    "op": "add",
                    "path": diff.text,
                    "value": diff.value.clone().unwrap_or(Value::Null),
                })),
                Operation::Delete => ops.push(json!({
                    "op": "remove",
                    "path": diff.text,
                })),
                // An equal operation with a value asserts the value is still there.
                Operation::Equal => {
                    if let Some(value) = &diff.value {
                        ops.push(json!({
                            "op": "test",
                            "path": diff.text,
                            "value": value,
                        }));
                    }
                }
            }
        }
        serde_json::from_value(Value::Array(ops)).map_err(|e| rejected(e.to_string()))
    }

    fn apply_patch(&self, base: &Content, patch: &json_patch::Patch) -> Result<Applied> {
        let mut doc = base.to_value();
        json_patch::patch(&mut doc, &patch.0).map_err(|e| rejected(e.to_string()))?;

        let content = match base {
            Content::Text(_) => Content::from_value(doc),
            Content::Structured(_) => Content::Structured(doc),
        };
        Ok(Applied {
            content,
            results: vec![true; patch.0.len()],
        })
    }
}
