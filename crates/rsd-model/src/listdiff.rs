//! Edit scripts for list elements.
//!
//! List diffs run Myers over the two sequences and group the resulting
//! operations into hunks that carry surrounding context lines, unified-diff
//! style. The context makes apply work on a best-effort basis against a
//! base that has drifted from the diff's source: each hunk is relocated by
//! matching its context, and a hunk that cannot be located fails with
//! list-drift.

use crate::element::Atom;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, group_diff_ops, Algorithm, DiffOp};

/// Context lines carried on each side of a hunk.
pub const DEFAULT_CONTEXT: usize = 3;

/// One contiguous edit, with enough context to locate it in the base.
///
/// `old` is the span of base lines the hunk replaces (possibly empty for a
/// pure insertion) and `new` is its replacement. `base_start` records where
/// the span sat in the diff's source; it is a hint, not an obligation, when
/// the diff is applied to a drifted base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub base_start: usize,
    pub context_before: Vec<Atom>,
    pub old: Vec<Atom>,
    pub new: Vec<Atom>,
    pub context_after: Vec<Atom>,
}

/// Computes the edit script turning `old` into `new`.
pub(crate) fn diff(old: &[Atom], new: &[Atom], context: usize) -> Vec<Hunk> {
    let ops = capture_diff_slices(Algorithm::Myers, old, new);
    let mut hunks = Vec::new();

    for group in group_diff_ops(ops, context) {
        let last = group.len() - 1;
        let mut hunk = Hunk {
            base_start: 0,
            context_before: Vec::new(),
            old: Vec::new(),
            new: Vec::new(),
            context_after: Vec::new(),
        };
        let mut started = false;

        for (position, op) in group.iter().enumerate() {
            match *op {
                DiffOp::Equal { old_index, len, .. } if position == 0 => {
                    let take = len.min(context);
                    hunk.context_before = old[old_index + len - take..old_index + len].to_vec();
                    hunk.base_start = old_index + len;
                    started = true;
                }
                DiffOp::Equal { old_index, len, .. } if position == last => {
                    let take = len.min(context);
                    hunk.context_after = old[old_index..old_index + take].to_vec();
                }
                op => {
                    if !started {
                        hunk.base_start = op.old_range().start;
                        started = true;
                    }
                    hunk.old.extend_from_slice(&old[op.old_range()]);
                    hunk.new.extend_from_slice(&new[op.new_range()]);
                }
            }
        }

        hunks.push(hunk);
    }

    hunks
}

/// Replays an edit script onto `base`.
///
/// Hunks are located in order: first at the position the script recorded,
/// then by scanning forward from the end of the previous hunk. A hunk
/// whose context cannot be found anywhere fails with list-drift.
pub(crate) fn apply(base: &[Atom], hunks: &[Hunk]) -> Result<Vec<Atom>, Error> {
    let mut out: Vec<Atom> = Vec::new();
    let mut cursor = 0usize;

    for (index, hunk) in hunks.iter().enumerate() {
        let mut needle: Vec<&Atom> =
            Vec::with_capacity(hunk.context_before.len() + hunk.old.len() + hunk.context_after.len());
        needle.extend(&hunk.context_before);
        needle.extend(&hunk.old);
        needle.extend(&hunk.context_after);

        let expected = hunk.base_start.checked_sub(hunk.context_before.len());
        let position = locate(base, cursor, expected, &needle).ok_or(Error::ListDrift {
            hunk: index,
            locus: Default::default(),
        })?;

        out.extend_from_slice(&base[cursor..position + hunk.context_before.len()]);
        out.extend(hunk.new.iter().cloned());
        cursor = position + hunk.context_before.len() + hunk.old.len();
    }

    out.extend_from_slice(&base[cursor..]);
    Ok(out)
}

fn locate(base: &[Atom], cursor: usize, expected: Option<usize>, needle: &[&Atom]) -> Option<usize> {
    let matches = |position: usize| {
        position + needle.len() <= base.len()
            && base[position..position + needle.len()]
                .iter()
                .zip(needle)
                .all(|(have, want)| have == *want)
    };

    if let Some(position) = expected {
        if position >= cursor && matches(position) {
            return Some(position);
        }
    }

    let upper = base.len().checked_sub(needle.len())?;
    (cursor..=upper).find(|&position| matches(position))
}
