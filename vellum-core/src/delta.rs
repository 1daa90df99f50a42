//! Operation-based rich-text document model.
//!
//! A [`Delta`] is an ordered sequence of [`Op`]s. A *document* delta contains
//! only insert ops (text runs and embedded objects); a *change* delta mixes
//! retain/insert/delete ops and is applied positionally against a document.
//!
//! Lengths are counted in **units**: one unit per text character, one unit
//! per embedded object regardless of its payload size.
//!
//! `VersionTable` embeds are protected: a delete or attribute retain that
//! covers one fails with [`DeltaError::ProtectedObject`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Formatting attributes attached to an op. Ordered map so structural
/// equality is deterministic.
pub type Attributes = BTreeMap<String, Value>;

/// Kind of embedded non-text object carried as a single op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmbedKind {
    Signature,
    LongResponse,
    LineSegment,
    VersionTable,
}

impl EmbedKind {
    /// Parse a kind from its wire name. Unknown names are a validation error.
    pub fn parse(name: &str) -> Result<Self, DeltaError> {
        match name {
            "signature" => Ok(Self::Signature),
            "longResponse" => Ok(Self::LongResponse),
            "lineSegment" => Ok(Self::LineSegment),
            "versionTable" => Ok(Self::VersionTable),
            other => Err(DeltaError::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::LongResponse => "longResponse",
            Self::LineSegment => "lineSegment",
            Self::VersionTable => "versionTable",
        }
    }

    /// One-unit text projection marker. Distinct per kind so two embeds of
    /// different kinds are never textually equal.
    pub fn marker(&self) -> char {
        match self {
            Self::Signature => '\u{E000}',
            Self::LongResponse => '\u{E001}',
            Self::LineSegment => '\u{E002}',
            Self::VersionTable => '\u{E003}',
        }
    }
}

/// One element of a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Op {
    /// Text insertion (one unit per character).
    Insert {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    /// Embedded object insertion (exactly one unit).
    InsertEmbed {
        kind: EmbedKind,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    /// Skip `count` units, optionally overlaying attributes.
    Retain {
        count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    /// Remove `count` units.
    Delete { count: usize },
}

impl Op {
    /// Length of this op in diff units.
    pub fn unit_len(&self) -> usize {
        match self {
            Op::Insert { text, .. } => text.chars().count(),
            Op::InsertEmbed { .. } => 1,
            Op::Retain { count, .. } | Op::Delete { count } => *count,
        }
    }

    /// Whether this op inserts content (text or embed).
    pub fn is_insert(&self) -> bool {
        matches!(self, Op::Insert { .. } | Op::InsertEmbed { .. })
    }
}

/// Document/change delta: an ordered op sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub ops: Vec<Op>,
}

/// Result of applying a change to a document: the new document plus the
/// content the change removed (kept so a faithful undo inverse can be built).
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub document: Delta,
    pub removed: Delta,
}

/// One unit of expanded document content. Internal currency of apply,
/// compare and merge.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Unit {
    Text {
        ch: char,
        attributes: Option<Attributes>,
    },
    Embed {
        kind: EmbedKind,
        data: Value,
        attributes: Option<Attributes>,
    },
}

impl Unit {
    pub(crate) fn projection_char(&self) -> char {
        match self {
            Unit::Text { ch, .. } => *ch,
            Unit::Embed { kind, .. } => kind.marker(),
        }
    }

    pub(crate) fn is_version_table(&self) -> bool {
        matches!(
            self,
            Unit::Embed {
                kind: EmbedKind::VersionTable,
                ..
            }
        )
    }

    pub(crate) fn attributes(&self) -> &Option<Attributes> {
        match self {
            Unit::Text { attributes, .. } | Unit::Embed { attributes, .. } => attributes,
        }
    }
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    // Builder-style constructors, used heavily in tests and callers.

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.ops.push(Op::Insert {
            text: text.into(),
            attributes: None,
        });
        self
    }

    pub fn insert_attr(mut self, text: impl Into<String>, attributes: Attributes) -> Self {
        self.ops.push(Op::Insert {
            text: text.into(),
            attributes: Some(attributes),
        });
        self
    }

    pub fn embed(mut self, kind: EmbedKind, data: Value) -> Self {
        self.ops.push(Op::InsertEmbed {
            kind,
            data,
            attributes: None,
        });
        self
    }

    pub fn retain(mut self, count: usize) -> Self {
        self.ops.push(Op::Retain {
            count,
            attributes: None,
        });
        self
    }

    pub fn retain_attr(mut self, count: usize, attributes: Attributes) -> Self {
        self.ops.push(Op::Retain {
            count,
            attributes: Some(attributes),
        });
        self
    }

    pub fn delete(mut self, count: usize) -> Self {
        self.ops.push(Op::Delete { count });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total length in diff units across all ops.
    pub fn len_units(&self) -> usize {
        self.ops.iter().map(Op::unit_len).sum()
    }

    /// Whether this delta is a document (insert ops only).
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(Op::is_insert)
    }

    /// Validate op shapes: retain/delete counts must be positive, text
    /// inserts non-empty. Rejected deltas never mutate downstream state.
    pub fn validate(&self) -> Result<(), DeltaError> {
        for (index, op) in self.ops.iter().enumerate() {
            match op {
                Op::Retain { count, .. } | Op::Delete { count } => {
                    if *count == 0 {
                        return Err(DeltaError::InvalidCount { index });
                    }
                }
                Op::Insert { text, .. } => {
                    if text.is_empty() {
                        return Err(DeltaError::EmptyInsert { index });
                    }
                }
                Op::InsertEmbed { .. } => {}
            }
        }
        Ok(())
    }

    /// Text view of a document delta for similarity scoring. Text inserts
    /// contribute their characters; embeds contribute their kind marker.
    /// Retain/delete ops contribute nothing.
    pub fn text_projection(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            match op {
                Op::Insert { text, .. } => out.push_str(text),
                Op::InsertEmbed { kind, .. } => out.push(kind.marker()),
                Op::Retain { .. } | Op::Delete { .. } => {}
            }
        }
        out
    }

    /// Expand a document delta into per-unit content.
    pub(crate) fn to_units(&self) -> Result<Vec<Unit>, DeltaError> {
        let mut units = Vec::with_capacity(self.len_units());
        for (index, op) in self.ops.iter().enumerate() {
            match op {
                Op::Insert { text, attributes } => {
                    for ch in text.chars() {
                        units.push(Unit::Text {
                            ch,
                            attributes: attributes.clone(),
                        });
                    }
                }
                Op::InsertEmbed {
                    kind,
                    data,
                    attributes,
                } => units.push(Unit::Embed {
                    kind: *kind,
                    data: data.clone(),
                    attributes: attributes.clone(),
                }),
                Op::Retain { .. } | Op::Delete { .. } => {
                    return Err(DeltaError::NotADocument { index });
                }
            }
        }
        Ok(units)
    }

    /// Rebuild a document delta from units, coalescing adjacent text with
    /// identical attributes into single inserts.
    pub(crate) fn from_units(units: &[Unit]) -> Delta {
        let mut ops: Vec<Op> = Vec::new();
        for unit in units {
            match unit {
                Unit::Text { ch, attributes } => {
                    if let Some(Op::Insert {
                        text,
                        attributes: prev,
                    }) = ops.last_mut()
                    {
                        if prev == attributes {
                            text.push(*ch);
                            continue;
                        }
                    }
                    ops.push(Op::Insert {
                        text: ch.to_string(),
                        attributes: attributes.clone(),
                    });
                }
                Unit::Embed {
                    kind,
                    data,
                    attributes,
                } => ops.push(Op::InsertEmbed {
                    kind: *kind,
                    data: data.clone(),
                    attributes: attributes.clone(),
                }),
            }
        }
        Delta { ops }
    }

    /// Apply a change delta to this document with standard positional
    /// retain/insert/delete semantics.
    ///
    /// Returns the new document together with the removed content, so the
    /// caller can construct a faithful inverse later. The inputs are not
    /// mutated. Retaining or deleting past the end of the document is
    /// [`DeltaError::OutOfBounds`]; touching a `VersionTable` embed with a
    /// delete or attribute retain is [`DeltaError::ProtectedObject`].
    pub fn apply(&self, change: &Delta) -> Result<Applied, DeltaError> {
        change.validate()?;
        let units = self.to_units()?;
        let mut out: Vec<Unit> = Vec::with_capacity(units.len());
        let mut removed: Vec<Unit> = Vec::new();
        let mut pos = 0usize;

        for op in &change.ops {
            match op {
                Op::Retain { count, attributes } => {
                    let end = pos + count;
                    if end > units.len() {
                        return Err(DeltaError::OutOfBounds {
                            position: pos,
                            length: *count,
                        });
                    }
                    for (offset, unit) in units[pos..end].iter().enumerate() {
                        let taken = match attributes {
                            None => unit.clone(),
                            Some(overlay) => {
                                if unit.is_version_table() {
                                    return Err(DeltaError::ProtectedObject {
                                        position: pos + offset,
                                    });
                                }
                                overlay_attributes(unit, overlay)
                            }
                        };
                        out.push(taken);
                    }
                    pos = end;
                }
                Op::Insert { text, attributes } => {
                    for ch in text.chars() {
                        out.push(Unit::Text {
                            ch,
                            attributes: attributes.clone(),
                        });
                    }
                }
                Op::InsertEmbed {
                    kind,
                    data,
                    attributes,
                } => out.push(Unit::Embed {
                    kind: *kind,
                    data: data.clone(),
                    attributes: attributes.clone(),
                }),
                Op::Delete { count } => {
                    let end = pos + count;
                    if end > units.len() {
                        return Err(DeltaError::OutOfBounds {
                            position: pos,
                            length: *count,
                        });
                    }
                    for (offset, unit) in units[pos..end].iter().enumerate() {
                        if unit.is_version_table() {
                            return Err(DeltaError::ProtectedObject {
                                position: pos + offset,
                            });
                        }
                        removed.push(unit.clone());
                    }
                    pos = end;
                }
            }
        }
        out.extend_from_slice(&units[pos..]);

        Ok(Applied {
            document: Delta::from_units(&out),
            removed: Delta::from_units(&removed),
        })
    }

    /// Build the inverse of `change`, using the content it removed (as
    /// recorded by [`Delta::apply`]). Inserts invert to deletes; deletes
    /// invert to re-insertion of the recorded content — never placeholder
    /// text. Attribute-only retains are not invertible because the pre-image
    /// attributes are not recorded.
    pub fn invert(change: &Delta, removed: &Delta) -> Result<Delta, DeltaError> {
        let removed_units = removed.to_units()?;
        let mut cursor = 0usize;
        let mut inverse = Delta::new();

        for op in &change.ops {
            match op {
                Op::Retain {
                    count,
                    attributes: None,
                } => inverse = inverse.retain(*count),
                Op::Retain {
                    attributes: Some(_),
                    ..
                } => {
                    return Err(DeltaError::NotInvertible(
                        "attribute retain has no recorded pre-image".to_string(),
                    ));
                }
                Op::Insert { text, .. } => {
                    inverse = inverse.delete(text.chars().count());
                }
                Op::InsertEmbed { .. } => inverse = inverse.delete(1),
                Op::Delete { count } => {
                    let end = cursor + count;
                    if end > removed_units.len() {
                        return Err(DeltaError::NotInvertible(format!(
                            "removed content shorter than delete span ({count} units)"
                        )));
                    }
                    let restored = Delta::from_units(&removed_units[cursor..end]);
                    inverse.ops.extend(restored.ops);
                    cursor = end;
                }
            }
        }
        if cursor != removed_units.len() {
            return Err(DeltaError::NotInvertible(
                "removed content longer than delete spans".to_string(),
            ));
        }
        Ok(inverse)
    }

    /// One-sided rebase: transform `incoming` (a change against some base
    /// document) so it applies after `committed` (another change against the
    /// same base).
    ///
    /// Offsets are shifted by the net inserted length of `committed` edits at
    /// or before them. When the two changes touch overlapping ranges the
    /// rebase refuses to guess and returns [`RebaseBlocked`]; the caller must
    /// refetch and resubmit.
    pub fn rebase_onto(incoming: &Delta, committed: &Delta) -> Result<Delta, RebaseBlocked> {
        let committed_edits = edit_spans(committed);
        let incoming_edits = edit_spans(incoming);

        for c in &committed_edits {
            for i in &incoming_edits {
                if spans_collide(c, i) {
                    log::debug!(
                        "rebase blocked: committed edit at {} collides with incoming edit at {}",
                        c.start,
                        i.start
                    );
                    return Err(RebaseBlocked { position: i.start });
                }
            }
        }

        // Map a base offset into post-committed coordinates. Inserts at or
        // before the offset shift it right; deletes overlapping [0, offset)
        // shift it left by the overlapped amount.
        let map = |offset: usize| -> usize {
            let mut mapped = offset as i64;
            for span in &committed_edits {
                match span.effect {
                    SpanEffect::Insert(len) => {
                        if span.start <= offset {
                            mapped += len as i64;
                        }
                    }
                    SpanEffect::Delete => {
                        let overlap = span.end.min(offset).saturating_sub(span.start);
                        mapped -= overlap as i64;
                    }
                    SpanEffect::Format => {}
                }
            }
            mapped.max(0) as usize
        };

        let mut transformed = Delta::new();
        let mut target_pos = 0usize; // cursor in post-committed coordinates
        let mut base_pos = 0usize;

        for op in &incoming.ops {
            match op {
                Op::Retain {
                    count,
                    attributes: None,
                } => {
                    // Plain retains only advance the base cursor; gaps are
                    // re-derived from the mapping at the next edit.
                    base_pos += count;
                }
                Op::Retain {
                    count,
                    attributes: Some(attrs),
                } => {
                    let gap = map(base_pos).saturating_sub(target_pos);
                    if gap > 0 {
                        transformed = transformed.retain(gap);
                        target_pos += gap;
                    }
                    transformed = transformed.retain_attr(*count, attrs.clone());
                    target_pos += count;
                    base_pos += count;
                }
                Op::Insert { text, attributes } => {
                    let gap = map(base_pos).saturating_sub(target_pos);
                    if gap > 0 {
                        transformed = transformed.retain(gap);
                        target_pos += gap;
                    }
                    transformed.ops.push(Op::Insert {
                        text: text.clone(),
                        attributes: attributes.clone(),
                    });
                }
                Op::InsertEmbed {
                    kind,
                    data,
                    attributes,
                } => {
                    let gap = map(base_pos).saturating_sub(target_pos);
                    if gap > 0 {
                        transformed = transformed.retain(gap);
                        target_pos += gap;
                    }
                    transformed.ops.push(Op::InsertEmbed {
                        kind: *kind,
                        data: data.clone(),
                        attributes: attributes.clone(),
                    });
                }
                Op::Delete { count } => {
                    let gap = map(base_pos).saturating_sub(target_pos);
                    if gap > 0 {
                        transformed = transformed.retain(gap);
                        target_pos += gap;
                    }
                    transformed = transformed.delete(*count);
                    target_pos += count;
                    base_pos += count;
                }
            }
        }
        Ok(transformed)
    }
}

/// Merge an attribute overlay onto a unit; `null` values remove keys.
fn overlay_attributes(unit: &Unit, overlay: &Attributes) -> Unit {
    let merge = |existing: &Option<Attributes>| -> Option<Attributes> {
        let mut merged = existing.clone().unwrap_or_default();
        for (key, value) in overlay {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        if merged.is_empty() {
            None
        } else {
            Some(merged)
        }
    };
    match unit {
        Unit::Text { ch, attributes } => Unit::Text {
            ch: *ch,
            attributes: merge(attributes),
        },
        Unit::Embed {
            kind,
            data,
            attributes,
        } => Unit::Embed {
            kind: *kind,
            data: data.clone(),
            attributes: merge(attributes),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SpanEffect {
    /// Inserts `len` units at `start` (zero-width in base coordinates).
    Insert(usize),
    /// Removes the `[start, end)` base range.
    Delete,
    /// Overlays attributes on the `[start, end)` base range.
    Format,
}

/// An edit region of a change delta, in base-document coordinates.
#[derive(Debug, Clone, Copy)]
struct EditSpan {
    start: usize,
    end: usize,
    effect: SpanEffect,
}

/// Edit regions of a change delta (inserts, deletes, attribute retains).
/// Plain retains are skips, not edits.
fn edit_spans(change: &Delta) -> Vec<EditSpan> {
    let mut spans = Vec::new();
    let mut pos = 0usize;
    for op in &change.ops {
        match op {
            Op::Retain {
                count,
                attributes: None,
            } => pos += count,
            Op::Retain {
                count,
                attributes: Some(_),
            } => {
                spans.push(EditSpan {
                    start: pos,
                    end: pos + count,
                    effect: SpanEffect::Format,
                });
                pos += count;
            }
            Op::Insert { text, .. } => spans.push(EditSpan {
                start: pos,
                end: pos,
                effect: SpanEffect::Insert(text.chars().count()),
            }),
            Op::InsertEmbed { .. } => spans.push(EditSpan {
                start: pos,
                end: pos,
                effect: SpanEffect::Insert(1),
            }),
            Op::Delete { count } => {
                spans.push(EditSpan {
                    start: pos,
                    end: pos + count,
                    effect: SpanEffect::Delete,
                });
                pos += count;
            }
        }
    }
    spans
}

/// Collision test for the one-sided rebase. Ranged edits collide on any
/// non-empty range overlap; an insert collides with a ranged edit only when
/// it lands strictly inside it (boundary inserts are orderable).
fn spans_collide(a: &EditSpan, b: &EditSpan) -> bool {
    let a_insert = matches!(a.effect, SpanEffect::Insert(_));
    let b_insert = matches!(b.effect, SpanEffect::Insert(_));
    match (a_insert, b_insert) {
        (true, true) => false,
        (true, false) => b.start < a.start && a.start < b.end,
        (false, true) => a.start < b.start && b.start < a.end,
        (false, false) => a.start < b.end && b.start < a.end,
    }
}

/// Malformed-delta and application errors.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaError {
    /// Zero-length retain or delete at op `index`.
    InvalidCount { index: usize },
    /// Empty text insert at op `index`.
    EmptyInsert { index: usize },
    /// Unrecognized embed kind name.
    UnknownKind(String),
    /// Retain/delete op found where a document delta was required.
    NotADocument { index: usize },
    /// Retain/delete ran past the end of the document.
    OutOfBounds { position: usize, length: usize },
    /// A delete or attribute retain covered a protected `VersionTable` embed.
    ProtectedObject { position: usize },
    /// Undo inverse could not be constructed.
    NotInvertible(String),
}

impl std::fmt::Display for DeltaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCount { index } => {
                write!(f, "Zero-length retain/delete at op {index}")
            }
            Self::EmptyInsert { index } => write!(f, "Empty text insert at op {index}"),
            Self::UnknownKind(name) => write!(f, "Unknown embed kind: {name}"),
            Self::NotADocument { index } => {
                write!(f, "Op {index} is not an insert; document delta required")
            }
            Self::OutOfBounds { position, length } => {
                write!(f, "Span of {length} units at {position} exceeds document")
            }
            Self::ProtectedObject { position } => {
                write!(f, "Protected version table at unit {position} cannot be edited")
            }
            Self::NotInvertible(reason) => write!(f, "Inverse not constructible: {reason}"),
        }
    }
}

impl std::error::Error for DeltaError {}

/// One-sided rebase refusal: the committed and incoming changes touch
/// overlapping ranges. Recoverable — refetch and resubmit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebaseBlocked {
    /// Base offset of the incoming edit that collided.
    pub position: usize,
}

impl std::fmt::Display for RebaseBlocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Concurrent edits overlap at unit {}; refetch and resubmit",
            self.position
        )
    }
}

impl std::error::Error for RebaseBlocked {}
