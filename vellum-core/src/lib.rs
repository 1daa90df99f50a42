//! # vellum-core — Document delta model, comparison, and merge engines
//!
//! Documents are rich-text deltas: a flat run of operations carrying plain
//! text and embedded objects (signatures, long responses, line segments,
//! version tables). This crate owns the delta algebra and the offline
//! engines built on it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    to_units     ┌──────────────┐
//! │ Delta (ops)  │ ───────────────► │ Unit stream  │
//! │ insert/embed │ ◄─────────────── │ 1 char/embed │
//! └──────┬───────┘    from_units   └──────┬───────┘
//!        │                                │
//!        ▼                                ▼
//! ┌──────────────┐                 ┌──────────────┐
//! │ apply/invert │                 │ compare (LCS)│
//! │ rebase_onto  │                 │ merge (3-way)│
//! └──────────────┘                 └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`delta`] — Delta document model: ops, apply, invert, rebase
//! - [`compare`] — Unit-level LCS comparison and diff deltas
//! - [`merge`] — Three-way merge with explicit conflict reporting

pub mod compare;
pub mod delta;
pub mod merge;

// Re-exports for convenience
pub use compare::{
    compare, extract_placeholder_changes, generate_diff_delta, ChangeKind, ComparisonResult,
    DeltaChange, PlaceholderChange, PlaceholderChangeKind,
};
pub use delta::{
    Applied, Attributes, Delta, DeltaError, EmbedKind, Op, RebaseBlocked,
};
pub use merge::{merge, ConflictKind, MergeConflict, MergeOutcome};
