//! Three-way document merge built on two comparison runs.
//!
//! `merge(base, left, right)` diffs both sides against the common base,
//! detects conflicts, applies the non-conflicting changes from both sides to
//! the base, and reports conflicting regions as first-class output (never an
//! error) for explicit external resolution.
//!
//! Conflict rules:
//! - two changes conflict iff their half-open `[position, position+length)`
//!   base ranges overlap;
//! - any change touching a protected `VersionTable` embed conflicts on its
//!   own, even without a counterpart on the other side.
//!
//! Overlapping conflicting edits are coalesced into one region per
//! connected span, so a conflict entry describes a whole contested region
//! with the full base/left/right content of that region.

use crate::compare::{compare, ChangeKind, DeltaChange};
use crate::delta::{Delta, DeltaError, Unit};

/// Which rule produced a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Left and right edited overlapping base ranges.
    Overlap,
    /// A change touched a protected version table.
    ProtectedObject,
}

/// One unresolved merge region. Carries the full content of all three sides
/// so a consuming system can drive any resolution picker.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    pub base_content: Delta,
    pub left_content: Delta,
    pub right_content: Delta,
    /// Base-document unit offset of the conflicting region.
    pub position: usize,
    pub length: usize,
    pub kind: ConflictKind,
}

/// Merge result: the combined document plus unresolved conflicts.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub merged: Delta,
    pub conflicts: Vec<MergeConflict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Three-way merge of two divergent edits of a common base.
///
/// `merge(base, base, base)` yields `base` unchanged with zero conflicts.
pub fn merge(base: &Delta, left: &Delta, right: &Delta) -> Result<MergeOutcome, DeltaError> {
    let diff_left = compare(base, left)?;
    let diff_right = compare(base, right)?;
    let base_units = base.to_units()?;

    let left_edits: Vec<&DeltaChange> = diff_left
        .changes
        .iter()
        .filter(|c| c.kind != ChangeKind::Retain)
        .collect();
    let right_edits: Vec<&DeltaChange> = diff_right
        .changes
        .iter()
        .filter(|c| c.kind != ChangeKind::Retain)
        .collect();

    let mut left_blocked = vec![false; left_edits.len()];
    let mut right_blocked = vec![false; right_edits.len()];
    // (start, end, protected) per blocked edit, later coalesced.
    let mut blocked_ranges: Vec<(usize, usize, bool)> = Vec::new();

    // Protected version tables conflict on their own.
    for (i, edit) in left_edits.iter().enumerate() {
        if touches_version_table(edit, &base_units) {
            left_blocked[i] = true;
            blocked_ranges.push((edit.position, edit.position + edit.length, true));
        }
    }
    for (j, edit) in right_edits.iter().enumerate() {
        if touches_version_table(edit, &base_units) {
            right_blocked[j] = true;
            blocked_ranges.push((edit.position, edit.position + edit.length, true));
        }
    }

    // Cross-side half-open range overlap.
    for (i, l) in left_edits.iter().enumerate() {
        for (j, r) in right_edits.iter().enumerate() {
            if ranges_overlap(l, r) {
                if !left_blocked[i] {
                    left_blocked[i] = true;
                    blocked_ranges.push((l.position, l.position + l.length, false));
                }
                if !right_blocked[j] {
                    right_blocked[j] = true;
                    blocked_ranges.push((r.position, r.position + r.length, false));
                }
            }
        }
    }

    // Coalesce blocked edits into contested regions.
    blocked_ranges.sort_by_key(|&(start, _, _)| start);
    let mut regions: Vec<(usize, usize, bool)> = Vec::new();
    for (start, end, protected) in blocked_ranges {
        match regions.last_mut() {
            Some((_, cur_end, cur_protected)) if start < *cur_end => {
                *cur_end = (*cur_end).max(end);
                *cur_protected |= protected;
            }
            _ => regions.push((start, end, protected)),
        }
    }

    let mut conflicts = Vec::with_capacity(regions.len());
    for (start, end, protected) in regions {
        conflicts.push(MergeConflict {
            base_content: base_slice(&base_units, start, end),
            left_content: side_region_content(&diff_left.changes, start, end)?,
            right_content: side_region_content(&diff_right.changes, start, end)?,
            position: start,
            length: end - start,
            kind: if protected {
                ConflictKind::ProtectedObject
            } else {
                ConflictKind::Overlap
            },
        });
    }

    // Apply the surviving changes highest-position-first so earlier offsets
    // stay valid. Equal positions can only be two touching inserts; left
    // lands first in the final document.
    let mut pending: Vec<(Side, &DeltaChange)> = Vec::new();
    for (i, edit) in left_edits.iter().enumerate() {
        if !left_blocked[i] {
            pending.push((Side::Left, edit));
        }
    }
    for (j, edit) in right_edits.iter().enumerate() {
        if !right_blocked[j] {
            pending.push((Side::Right, edit));
        }
    }
    pending.sort_by(|(side_a, a), (side_b, b)| {
        b.position
            .cmp(&a.position)
            .then_with(|| match (side_a, side_b) {
                (Side::Left, Side::Right) => std::cmp::Ordering::Greater,
                (Side::Right, Side::Left) => std::cmp::Ordering::Less,
                _ => std::cmp::Ordering::Equal,
            })
    });

    let mut merged_units = base_units.clone();
    for (side, edit) in &pending {
        log::trace!(
            "merge applying {:?} {:?} at {} len {}",
            side,
            edit.kind,
            edit.position,
            edit.length
        );
        match edit.kind {
            ChangeKind::Retain => {}
            ChangeKind::Delete => {
                merged_units.drain(edit.position..edit.position + edit.length);
            }
            ChangeKind::Insert => {
                let incoming = edit.new_content.to_units()?;
                let at = edit.position.min(merged_units.len());
                merged_units.splice(at..at, incoming);
            }
            ChangeKind::Modify => {
                let incoming = edit.new_content.to_units()?;
                merged_units.splice(edit.position..edit.position + edit.length, incoming);
            }
        }
    }

    if !conflicts.is_empty() {
        log::debug!("merge produced {} conflict(s)", conflicts.len());
    }

    Ok(MergeOutcome {
        merged: Delta::from_units(&merged_units),
        conflicts,
    })
}

/// Half-open interval overlap on `[position, position+length)`.
fn ranges_overlap(a: &DeltaChange, b: &DeltaChange) -> bool {
    let (a_start, a_end) = (a.position, a.position + a.length);
    let (b_start, b_end) = (b.position, b.position + b.length);
    a_start < b_end && b_start < a_end
}

/// Whether a change's base range covers a version table.
fn touches_version_table(change: &DeltaChange, base_units: &[Unit]) -> bool {
    match change.kind {
        ChangeKind::Retain | ChangeKind::Insert => false,
        ChangeKind::Delete | ChangeKind::Modify => {
            let end = (change.position + change.length).min(base_units.len());
            base_units[change.position.min(end)..end]
                .iter()
                .any(Unit::is_version_table)
        }
    }
}

fn base_slice(base_units: &[Unit], position: usize, length_end: usize) -> Delta {
    let start = position.min(base_units.len());
    let end = length_end.min(base_units.len());
    Delta::from_units(&base_units[start..end.max(start)])
}

/// Reconstruct one side's content for the base region `[start, end)` from
/// its change list: retains contribute the shared base content inside the
/// region, inserts/modifies anchored inside it contribute their new
/// content, deletes contribute nothing.
fn side_region_content(
    changes: &[DeltaChange],
    start: usize,
    end: usize,
) -> Result<Delta, DeltaError> {
    let mut units: Vec<Unit> = Vec::new();
    for change in changes {
        match change.kind {
            ChangeKind::Retain => {
                let s = change.position.max(start);
                let e = (change.position + change.length).min(end);
                if s < e {
                    let all = change.old_content.to_units()?;
                    units.extend_from_slice(&all[s - change.position..e - change.position]);
                }
            }
            ChangeKind::Insert => {
                if change.position >= start && change.position < end {
                    units.extend(change.new_content.to_units()?);
                }
            }
            ChangeKind::Delete => {}
            ChangeKind::Modify => {
                if change.position < end && change.position + change.length > start {
                    units.extend(change.new_content.to_units()?);
                }
            }
        }
    }
    Ok(Delta::from_units(&units))
}
