//! Pluggable diff/patch strategies.
//!
//! A [`Strategy`] computes [`DiffOperation`]s between two contents, turns
//! them into a backend patch and applies that patch. The engine only ever
//! talks to this trait, so both variants share one reconciliation path:
//!
//! | Strategy | Backend | Apply |
//! |---|---|---|
//! | [`TextStrategy`] | `similar` character diff | tolerant, per-hunk |
//! | [`JsonPatchStrategy`] | RFC 6902 (`json-patch`) | atomic |

use crate::error::Result;
use crate::types::{Content, DiffOperation};

mod json;
mod text;

pub use json::JsonPatchStrategy;
pub use text::{TextPatch, TextStrategy};

/// Outcome of applying a patch.
///
/// `results` holds one flag per patch unit (hunk or operation). A tolerant
/// strategy may return some `false` entries alongside usable content; an
/// atomic strategy either returns all `true` or an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Patched content.
    pub content: Content,
    /// Per-unit success flags.
    pub results: Vec<bool>,
}

impl Applied {
    /// Whether every unit applied.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|ok| *ok)
    }

    /// Number of units that failed to apply.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|ok| !**ok).count()
    }
}

/// Diff/patch capability the engine is generic over.
pub trait Strategy: Send + Sync {
    /// Backend patch representation.
    type Patch;

    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Ordered operations turning `from` into `to`.
    fn diff(&self, from: &Content, to: &Content) -> Result<Vec<DiffOperation>>;

    /// Build a patch against `base` from diff operations.
    fn make_patch(&self, base: &Content, diffs: &[DiffOperation]) -> Result<Self::Patch>;

    /// Apply a patch to `base`, returning the new content. `base` itself is
    /// never modified.
    fn apply_patch(&self, base: &Content, patch: &Self::Patch) -> Result<Applied>;

    /// Convenience: `make_patch` then `apply_patch`.
    fn apply_diffs(&self, base: &Content, diffs: &[DiffOperation]) -> Result<Applied> {
        let patch = self.make_patch(base, diffs)?;
        self.apply_patch(base, &patch)
    }
}
