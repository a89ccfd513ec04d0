//! Text strategy: character diffs with tolerant, hunk-based application.
//!
//! Content is first reduced to its canonical string (structured content is
//! serialized as JSON). Diffs come from `similar`'s character diff, merged
//! into runs of equal/insert/delete spans.
//!
//! A patch is a list of hunks, each carrying up to [`CONTEXT_CHARS`]
//! characters of surrounding context. Applying tries every hunk at its
//! expected offset first and falls back to the nearest exact occurrence of
//! its context, so edits still land when the target drifted from the text
//! the diff was made against. Hunks whose context cannot be found are
//! skipped and reported as failed.

use similar::{ChangeTag, TextDiff};

use super::{Applied, Strategy};
use crate::error::Result;
use crate::types::{Content, DiffOperation, Operation};

/// Characters of context kept on each side of a change.
pub const CONTEXT_CHARS: usize = 4;

/// One contiguous change with its context.
#[derive(Debug, Clone, PartialEq)]
struct Hunk {
    /// Byte offset of `before` in the text the diff was made against.
    start: usize,
    /// Context plus deleted text.
    before: String,
    /// Context plus inserted text.
    after: String,
}

/// Patch produced by [`TextStrategy::make_patch`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextPatch {
    hunks: Vec<Hunk>,
}

impl TextPatch {
    /// Number of hunks in the patch.
    pub fn len(&self) -> usize {
        self.hunks.len()
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }
}

/// Character-level diff strategy with fuzzy application.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextStrategy;

impl TextStrategy {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for TextStrategy {
    type Patch = TextPatch;

    fn name(&self) -> &'static str {
        "text"
    }

    fn diff(&self, from: &Content, to: &Content) -> Result<Vec<DiffOperation>> {
        let old = from.to_canonical_string();
        let new = to.to_canonical_string();
        Ok(diff_text(&old, &new))
    }

    fn make_patch(&self, base: &Content, diffs: &[DiffOperation]) -> Result<TextPatch> {
        let patch = TextPatch {
            hunks: build_hunks(diffs),
        };
        if log::log_enabled!(log::Level::Trace) {
            let source: String = diffs
                .iter()
                .filter(|op| op.operation != Operation::Insert)
                .map(|op| op.text.as_str())
                .collect();
            if source != base.to_canonical_string() {
                log::trace!("[TextStrategy] Patch base drifted from diff source");
            }
        }
        Ok(patch)
    }

    fn apply_patch(&self, base: &Content, patch: &TextPatch) -> Result<Applied> {
        let text = base.to_canonical_string();
        let (patched, results) = apply_hunks(&text, &patch.hunks);

        let content = match base {
            Content::Text(_) => Content::Text(patched),
            Content::Structured(_) => match serde_json::from_str(&patched) {
                Ok(value) => Content::Structured(value),
                Err(_) => Content::Text(patched),
            },
        };
        Ok(Applied { content, results })
    }
}

/// Character diff of two strings, merged into runs.
fn diff_text(old: &str, new: &str) -> Vec<DiffOperation> {
    let diff = TextDiff::from_chars(old, new);
    let mut ops: Vec<DiffOperation> = Vec::new();

    for change in diff.iter_all_changes() {
        let operation = match change.tag() {
            ChangeTag::Equal => Operation::Equal,
            ChangeTag::Insert => Operation::Insert,
            ChangeTag::Delete => Operation::Delete,
        };
        match ops.last_mut() {
            Some(last) if last.operation == operation => last.text.push_str(change.value()),
            _ => ops.push(DiffOperation {
                operation,
                text: change.value().to_string(),
                value: None,
            }),
        }
    }

    ops
}

fn head_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn tail_chars(text: &str, count: usize) -> &str {
    let total = text.chars().count();
    if total <= count {
        return text;
    }
    match text.char_indices().nth(total - count) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn build_hunks(diffs: &[DiffOperation]) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut pos = 0usize;
    let mut prev_equal = "";

    for (i, op) in diffs.iter().enumerate() {
        let text = op.text.as_str();
        match op.operation {
            Operation::Equal => {
                if let Some(mut hunk) = current.take() {
                    let is_last = i + 1 == diffs.len();
                    if !is_last && text.chars().count() <= 2 * CONTEXT_CHARS {
                        hunk.before.push_str(text);
                        hunk.after.push_str(text);
                        current = Some(hunk);
                    } else {
                        let context = head_chars(text, CONTEXT_CHARS);
                        hunk.before.push_str(context);
                        hunk.after.push_str(context);
                        hunks.push(hunk);
                    }
                }
                pos += text.len();
                prev_equal = text;
            }
            Operation::Insert | Operation::Delete => {
                if current.is_none() {
                    let context = tail_chars(prev_equal, CONTEXT_CHARS);
                    current = Some(Hunk {
                        start: pos - context.len(),
                        before: context.to_string(),
                        after: context.to_string(),
                    });
                }
                if let Some(hunk) = current.as_mut() {
                    if op.operation == Operation::Delete {
                        hunk.before.push_str(text);
                        pos += text.len();
                    } else {
                        hunk.after.push_str(text);
                    }
                }
                prev_equal = "";
            }
        }
    }

    if let Some(hunk) = current {
        hunks.push(hunk);
    }
    hunks
}

/// Find where `needle` should be applied: at `expected` if it matches there,
/// else at the nearest exact occurrence.
fn locate(text: &str, needle: &str, expected: usize) -> Option<usize> {
    if needle.is_empty() {
        let mut at = expected.min(text.len());
        while !text.is_char_boundary(at) {
            at -= 1;
        }
        return Some(at);
    }
    if text
        .get(expected..)
        .is_some_and(|rest| rest.starts_with(needle))
    {
        return Some(expected);
    }
    text.match_indices(needle)
        .map(|(idx, _)| idx)
        .min_by_key(|idx| idx.abs_diff(expected))
}

fn apply_hunks(text: &str, hunks: &[Hunk]) -> (String, Vec<bool>) {
    let mut result = text.to_string();
    let mut results = Vec::with_capacity(hunks.len());
    let mut delta: isize = 0;

    for hunk in hunks {
        let expected = (hunk.start as isize + delta).max(0) as usize;
        match locate(&result, &hunk.before, expected) {
            Some(at) => {
                result.replace_range(at..at + hunk.before.len(), &hunk.after);
                delta = at as isize - hunk.start as isize + hunk.after.len() as isize
                    - hunk.before.len() as isize;
                results.push(true);
            }
            None => {
                log::debug!(
                    "[TextStrategy] Hunk at {} did not match ({} bytes of context)",
                    hunk.start,
                    hunk.before.len()
                );
                results.push(false);
            }
        }
    }

    (result, results)
}
