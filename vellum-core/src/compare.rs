//! Document comparison engine.
//!
//! Compares two document deltas into:
//! - a change set ([`ComparisonResult`]) with unit counts and a similarity
//!   score,
//! - a render-annotated diff delta ([`generate_diff_delta`]),
//! - per-embed-kind change lists ([`extract_placeholder_changes`]).
//!
//! Alignment is a unit-level longest-common-subsequence over expanded
//! document content, using structural equality only (tag + text/payload +
//! attributes). Ops are never hashed or compared by identity, so map-valued
//! embed payloads align correctly.

use crate::delta::{Attributes, Delta, DeltaError, EmbedKind, Unit};
use serde_json::Value;

/// Classification of one aligned region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Retain,
    Insert,
    Delete,
    Modify,
}

/// One aligned region of the diff. `position`/`length` are in old-document
/// units; for inserts, `position` is the old-document insertion point and
/// `length` the inserted unit count.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaChange {
    pub kind: ChangeKind,
    /// Old-side content of the region (empty for inserts).
    pub old_content: Delta,
    /// New-side content of the region (empty for deletes).
    pub new_content: Delta,
    pub position: usize,
    pub length: usize,
    /// Attribute keys that differ, for `Modify` regions.
    pub attributes_changed: Vec<String>,
}

/// Full output of a comparison run.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub changes: Vec<DeltaChange>,
    pub added_units: usize,
    pub deleted_units: usize,
    pub modified_units: usize,
    /// Number of non-retain changes.
    pub total_changes: usize,
    /// LCS ratio over text projections, in [0, 1]. Two structurally
    /// identical documents (including two empty ones) score 1.0; exactly one
    /// empty side scores 0.0.
    pub similarity: f64,
}

/// A change to one embedded object, grouped by kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderChange {
    pub kind: EmbedKind,
    pub change: PlaceholderChangeKind,
    /// Unit position (new document for added/modified, old for deleted).
    pub position: usize,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderChangeKind {
    Added,
    Deleted,
    Modified,
}

/// Compare two document deltas into a change set.
pub fn compare(old: &Delta, new: &Delta) -> Result<ComparisonResult, DeltaError> {
    old.validate()?;
    new.validate()?;
    let old_units = old.to_units()?;
    let new_units = new.to_units()?;

    let changes = align(&old_units, &new_units);

    let mut added_units = 0usize;
    let mut deleted_units = 0usize;
    let mut modified_units = 0usize;
    let mut total_changes = 0usize;
    for change in &changes {
        match change.kind {
            ChangeKind::Retain => continue,
            ChangeKind::Insert => added_units += change.length,
            ChangeKind::Delete => deleted_units += change.length,
            ChangeKind::Modify => modified_units += change.length,
        }
        total_changes += 1;
    }

    let similarity = similarity_score(&old.text_projection(), &new.text_projection());
    log::trace!(
        "compared {} vs {} units: {} changes, similarity {:.3}",
        old_units.len(),
        new_units.len(),
        total_changes,
        similarity
    );

    Ok(ComparisonResult {
        changes,
        added_units,
        deleted_units,
        modified_units,
        total_changes,
        similarity,
    })
}

/// Re-render the change set as a presentational delta: retained content
/// passes through, deleted content gains a `"removed"` attribute, inserted
/// content an `"added"` attribute, modified content a `"modified"`
/// attribute. Inputs are not mutated.
pub fn generate_diff_delta(old: &Delta, new: &Delta) -> Result<Delta, DeltaError> {
    let result = compare(old, new)?;
    let mut annotated: Vec<Unit> = Vec::new();
    for change in &result.changes {
        match change.kind {
            ChangeKind::Retain => {
                annotated.extend(change.old_content.to_units()?);
            }
            ChangeKind::Delete => {
                for unit in change.old_content.to_units()? {
                    annotated.push(mark(unit, "removed"));
                }
            }
            ChangeKind::Insert => {
                for unit in change.new_content.to_units()? {
                    annotated.push(mark(unit, "added"));
                }
            }
            ChangeKind::Modify => {
                for unit in change.new_content.to_units()? {
                    annotated.push(mark(unit, "modified"));
                }
            }
        }
    }
    Ok(Delta::from_units(&annotated))
}

/// Group embed changes by kind, pairing old/new lists index-by-index.
///
/// Index pairing is a documented approximation: embeds carry no stable
/// identity, so a moved embed reports as modified (or added plus deleted)
/// rather than moved.
pub fn extract_placeholder_changes(
    old: &Delta,
    new: &Delta,
) -> Result<Vec<PlaceholderChange>, DeltaError> {
    let old_embeds = collect_embeds(old)?;
    let new_embeds = collect_embeds(new)?;

    let kinds = [
        EmbedKind::Signature,
        EmbedKind::LongResponse,
        EmbedKind::LineSegment,
        EmbedKind::VersionTable,
    ];

    let mut changes = Vec::new();
    for kind in kinds {
        let olds: Vec<_> = old_embeds.iter().filter(|e| e.kind == kind).collect();
        let news: Vec<_> = new_embeds.iter().filter(|e| e.kind == kind).collect();
        let paired = olds.len().min(news.len());

        for i in 0..paired {
            let (o, n) = (olds[i], news[i]);
            if o.data != n.data || o.attributes != n.attributes {
                changes.push(PlaceholderChange {
                    kind,
                    change: PlaceholderChangeKind::Modified,
                    position: n.position,
                    data: n.data.clone(),
                });
            }
        }
        for n in &news[paired..] {
            changes.push(PlaceholderChange {
                kind,
                change: PlaceholderChangeKind::Added,
                position: n.position,
                data: n.data.clone(),
            });
        }
        for o in &olds[paired..] {
            changes.push(PlaceholderChange {
                kind,
                change: PlaceholderChangeKind::Deleted,
                position: o.position,
                data: o.data.clone(),
            });
        }
    }
    Ok(changes)
}

struct EmbedEntry {
    kind: EmbedKind,
    position: usize,
    data: Value,
    attributes: Option<Attributes>,
}

fn collect_embeds(doc: &Delta) -> Result<Vec<EmbedEntry>, DeltaError> {
    let units = doc.to_units()?;
    Ok(units
        .into_iter()
        .enumerate()
        .filter_map(|(position, unit)| match unit {
            Unit::Embed {
                kind,
                data,
                attributes,
            } => Some(EmbedEntry {
                kind,
                position,
                data,
                attributes,
            }),
            Unit::Text { .. } => None,
        })
        .collect())
}

fn mark(unit: Unit, key: &str) -> Unit {
    let set = |attributes: Option<Attributes>| -> Option<Attributes> {
        let mut attrs = attributes.unwrap_or_default();
        attrs.insert(key.to_string(), Value::Bool(true));
        Some(attrs)
    };
    match unit {
        Unit::Text { ch, attributes } => Unit::Text {
            ch,
            attributes: set(attributes),
        },
        Unit::Embed {
            kind,
            data,
            attributes,
        } => Unit::Embed {
            kind,
            data,
            attributes: set(attributes),
        },
    }
}

/// LCS-based similarity ratio over two char sequences: `2·lcs / (m + n)`.
fn similarity_score(old: &str, new: &str) -> f64 {
    let a: Vec<char> = old.chars().collect();
    let b: Vec<char> = new.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_length(&a, &b);
    (2.0 * lcs as f64) / ((a.len() + b.len()) as f64)
}

fn lcs_length<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    // Two-row DP; O(len(a)·len(b)) time, O(len(b)) space.
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for item_a in a {
        for (j, item_b) in b.iter().enumerate() {
            cur[j + 1] = if item_a == item_b {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Raw alignment steps before coalescing.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Keep,
    Del,
    Ins,
}

/// Align old/new unit sequences and coalesce runs into [`DeltaChange`]s,
/// with a modify-detection pass over adjacent delete/insert pairs.
fn align(old_units: &[Unit], new_units: &[Unit]) -> Vec<DeltaChange> {
    let steps = backtrack(old_units, new_units);

    // Coalesce consecutive identical steps into regions.
    let mut regions: Vec<DeltaChange> = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let mut idx = 0usize;
    while idx < steps.len() {
        let step = steps[idx];
        let mut run = 0usize;
        while idx < steps.len() && steps[idx] == step {
            run += 1;
            idx += 1;
        }
        match step {
            Step::Keep => {
                regions.push(DeltaChange {
                    kind: ChangeKind::Retain,
                    old_content: Delta::from_units(&old_units[i..i + run]),
                    new_content: Delta::from_units(&new_units[j..j + run]),
                    position: i,
                    length: run,
                    attributes_changed: Vec::new(),
                });
                i += run;
                j += run;
            }
            Step::Del => {
                regions.push(DeltaChange {
                    kind: ChangeKind::Delete,
                    old_content: Delta::from_units(&old_units[i..i + run]),
                    new_content: Delta::new(),
                    position: i,
                    length: run,
                    attributes_changed: Vec::new(),
                });
                i += run;
            }
            Step::Ins => {
                // An insert directly after a delete is a replacement; anchor
                // it at the deleted run's start so the pair shares a range.
                let position = match regions.last() {
                    Some(prev) if prev.kind == ChangeKind::Delete => prev.position,
                    _ => i,
                };
                regions.push(DeltaChange {
                    kind: ChangeKind::Insert,
                    old_content: Delta::new(),
                    new_content: Delta::from_units(&new_units[j..j + run]),
                    position,
                    length: run,
                    attributes_changed: Vec::new(),
                });
                j += run;
            }
        }
    }

    detect_modifies(regions)
}

/// Convert an adjacent delete/insert pair at the same position into a
/// `Modify` when the two sides are the same-tag content differing only in
/// payload or attributes: a single same-kind embed pair, or equal text with
/// differing attributes.
fn detect_modifies(regions: Vec<DeltaChange>) -> Vec<DeltaChange> {
    let mut out: Vec<DeltaChange> = Vec::with_capacity(regions.len());
    let mut idx = 0usize;
    while idx < regions.len() {
        if idx + 1 < regions.len()
            && regions[idx].kind == ChangeKind::Delete
            && regions[idx + 1].kind == ChangeKind::Insert
            && regions[idx + 1].position == regions[idx].position
        {
            if let Some(changed) =
                modify_keys(&regions[idx].old_content, &regions[idx + 1].new_content)
            {
                out.push(DeltaChange {
                    kind: ChangeKind::Modify,
                    old_content: regions[idx].old_content.clone(),
                    new_content: regions[idx + 1].new_content.clone(),
                    position: regions[idx].position,
                    length: regions[idx].length,
                    attributes_changed: changed,
                });
                idx += 2;
                continue;
            }
        }
        out.push(regions[idx].clone());
        idx += 1;
    }
    out
}

/// Attribute keys differing between two same-shape sides, or `None` when the
/// pair is not a modify.
fn modify_keys(old_side: &Delta, new_side: &Delta) -> Option<Vec<String>> {
    let old_units = old_side.to_units().ok()?;
    let new_units = new_side.to_units().ok()?;

    // Single embed pair of the same kind: payload or attribute change.
    if let ([Unit::Embed {
        kind: ok,
        data: od,
        attributes: oa,
    }], [Unit::Embed {
        kind: nk,
        data: nd,
        attributes: na,
    }]) = (old_units.as_slice(), new_units.as_slice())
    {
        if ok == nk && (od != nd || oa != na) {
            return Some(attribute_diff(oa, na));
        }
        return None;
    }

    // Same text, different formatting.
    if old_units.len() == new_units.len() {
        let same_text = old_units
            .iter()
            .zip(&new_units)
            .all(|(o, n)| match (o, n) {
                (Unit::Text { ch: a, .. }, Unit::Text { ch: b, .. }) => a == b,
                _ => false,
            });
        if same_text {
            let mut keys: Vec<String> = Vec::new();
            for (o, n) in old_units.iter().zip(&new_units) {
                for key in attribute_diff(o.attributes(), n.attributes()) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            if !keys.is_empty() {
                return Some(keys);
            }
        }
    }
    None
}

fn attribute_diff(old: &Option<Attributes>, new: &Option<Attributes>) -> Vec<String> {
    let empty = Attributes::new();
    let old = old.as_ref().unwrap_or(&empty);
    let new = new.as_ref().unwrap_or(&empty);
    let mut keys: Vec<String> = Vec::new();
    for key in old.keys().chain(new.keys()) {
        if old.get(key) != new.get(key) && !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}

/// Full-table LCS backtrack producing an ordered step sequence. Structural
/// unit equality only.
fn backtrack(a: &[Unit], b: &[Unit]) -> Vec<Step> {
    let (m, n) = (a.len(), b.len());
    let mut table = vec![0u32; (m + 1) * (n + 1)];
    let at = |i: usize, j: usize| i * (n + 1) + j;
    for i in 1..=m {
        for j in 1..=n {
            table[at(i, j)] = if a[i - 1] == b[j - 1] {
                table[at(i - 1, j - 1)] + 1
            } else {
                table[at(i - 1, j)].max(table[at(i, j - 1)])
            };
        }
    }

    let mut steps = Vec::with_capacity(m + n);
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && a[i - 1] == b[j - 1] {
            steps.push(Step::Keep);
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[at(i, j - 1)] >= table[at(i - 1, j)]) {
            steps.push(Step::Ins);
            j -= 1;
        } else {
            steps.push(Step::Del);
            i -= 1;
        }
    }
    steps.reverse();
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identical_documents_only_retains() {
        let doc = Delta::new()
            .insert("Hello ")
            .embed(EmbedKind::Signature, json!({"label": "CEO"}))
            .insert(" World");
        let result = compare(&doc, &doc).unwrap();
        assert_eq!(result.similarity, 1.0);
        assert_eq!(result.total_changes, 0);
        assert!(result
            .changes
            .iter()
            .all(|c| c.kind == ChangeKind::Retain));
    }

    #[test]
    fn test_both_empty_similarity_one() {
        let result = compare(&Delta::new(), &Delta::new()).unwrap();
        assert_eq!(result.similarity, 1.0);
        assert!(result.changes.is_empty());
    }

    #[test]
    fn test_one_empty_counts_all_units_added() {
        let doc = Delta::new()
            .insert("Hi")
            .embed(EmbedKind::LongResponse, json!({"prompt": "Explain"}));
        let result = compare(&Delta::new(), &doc).unwrap();
        assert_eq!(result.similarity, 0.0);
        assert_eq!(
            result.added_units,
            doc.ops.iter().map(|op| op.unit_len()).sum::<usize>()
        );
        assert_eq!(result.deleted_units, 0);
    }

    #[test]
    fn test_appended_text_is_one_insert_change() {
        // Scenario: "Hello" -> "Hello World".
        let old = Delta::new().insert("Hello");
        let new = Delta::new().insert("Hello World");
        let result = compare(&old, &new).unwrap();

        assert_eq!(result.total_changes, 1);
        let change = result
            .changes
            .iter()
            .find(|c| c.kind == ChangeKind::Insert)
            .unwrap();
        assert_eq!(change.new_content, Delta::new().insert(" World"));
        assert_eq!(change.position, 5);
        assert_eq!(change.length, 6);
        assert_eq!(result.added_units, 6);
    }

    #[test]
    fn test_embed_payload_change_is_modify() {
        // Scenario: signature label CEO -> Director.
        let old = Delta::new().embed(EmbedKind::Signature, json!({"label": "CEO"}));
        let new = Delta::new().embed(EmbedKind::Signature, json!({"label": "Director"}));
        let result = compare(&old, &new).unwrap();

        assert_eq!(result.total_changes, 1);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].kind, ChangeKind::Modify);
        assert_eq!(result.modified_units, 1);
        // Same kind markers project identically, so similarity stays 1.0.
        assert_eq!(result.similarity, 1.0);
    }

    #[test]
    fn test_text_attribute_change_is_modify_with_keys() {
        let old = Delta::new().insert("Hi");
        let new = Delta::new().insert_attr("Hi", attrs(&[("bold", json!(true))]));
        let result = compare(&old, &new).unwrap();

        assert_eq!(result.total_changes, 1);
        assert_eq!(result.changes[0].kind, ChangeKind::Modify);
        assert_eq!(result.changes[0].attributes_changed, vec!["bold"]);
    }

    #[test]
    fn test_different_embed_kinds_never_align() {
        let old = Delta::new().embed(EmbedKind::Signature, json!({}));
        let new = Delta::new().embed(EmbedKind::LongResponse, json!({}));
        let result = compare(&old, &new).unwrap();
        // Not a modify: delete plus insert.
        assert_eq!(result.total_changes, 2);
        assert_eq!(result.added_units, 1);
        assert_eq!(result.deleted_units, 1);
        assert!(result.similarity < 1.0);
    }

    #[test]
    fn test_diff_delta_annotations() {
        let old = Delta::new().insert("keep drop");
        let new = Delta::new().insert("keep new");
        let diff = generate_diff_delta(&old, &new).unwrap();

        let json = serde_json::to_value(&diff).unwrap();
        let rendered = serde_json::to_string(&json).unwrap();
        assert!(rendered.contains("removed"));
        assert!(rendered.contains("added"));

        // Inputs untouched.
        assert_eq!(old, Delta::new().insert("keep drop"));
        assert_eq!(new, Delta::new().insert("keep new"));
    }

    #[test]
    fn test_diff_delta_is_document() {
        let old = Delta::new().insert("abc");
        let new = Delta::new().insert("axc");
        let diff = generate_diff_delta(&old, &new).unwrap();
        assert!(diff.is_document());
    }

    #[test]
    fn test_placeholder_modified_entry() {
        let old = Delta::new()
            .insert("Sign here: ")
            .embed(EmbedKind::Signature, json!({"label": "CEO"}));
        let new = Delta::new()
            .insert("Sign here: ")
            .embed(EmbedKind::Signature, json!({"label": "Director"}));
        let changes = extract_placeholder_changes(&old, &new).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, EmbedKind::Signature);
        assert_eq!(changes[0].change, PlaceholderChangeKind::Modified);
        assert_eq!(changes[0].data, json!({"label": "Director"}));
    }

    #[test]
    fn test_placeholder_added_and_deleted() {
        let old = Delta::new()
            .embed(EmbedKind::Signature, json!({"label": "A"}))
            .embed(EmbedKind::LineSegment, json!({"width": 10}));
        let new = Delta::new()
            .embed(EmbedKind::Signature, json!({"label": "A"}))
            .embed(EmbedKind::Signature, json!({"label": "B"}));
        let changes = extract_placeholder_changes(&old, &new).unwrap();

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|c| c.kind == EmbedKind::Signature
            && c.change == PlaceholderChangeKind::Added));
        assert!(changes.iter().any(|c| c.kind == EmbedKind::LineSegment
            && c.change == PlaceholderChangeKind::Deleted));
    }

    #[test]
    fn test_placeholder_unchanged_pairs_skipped() {
        let doc = Delta::new()
            .embed(EmbedKind::Signature, json!({"label": "A"}))
            .embed(EmbedKind::Signature, json!({"label": "B"}));
        let changes = extract_placeholder_changes(&doc, &doc).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_similarity_is_symmetric_ratio() {
        let old = Delta::new().insert("abcd");
        let new = Delta::new().insert("abxy");
        let forward = compare(&old, &new).unwrap().similarity;
        let backward = compare(&new, &old).unwrap().similarity;
        assert!((forward - backward).abs() < 1e-12);
        assert!((forward - 0.5).abs() < 1e-12); // lcs "ab" = 2, 2*2/8
    }

    #[test]
    fn test_invalid_delta_rejected() {
        let bad = Delta::new().retain(0);
        assert!(compare(&bad, &Delta::new()).is_err());
    }
}
