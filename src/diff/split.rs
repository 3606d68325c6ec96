//! Splitting hunks down to a maximum number of changed lines.

use std::fmt;
use std::num::NonZeroUsize;

use serde::Serialize;

use super::{Hunk, LineKind, PatchSet, ReplacedRange, offset_to_start};
use crate::error::DiffError;

/// Default bound when neither the CLI nor git config sets one.
pub const DEFAULT_MAX_HUNK_SIZE: usize = 50;

/// Upper bound on added plus removed lines in a single hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MaxHunkSize(NonZeroUsize);

impl MaxHunkSize {
    pub fn new(lines: usize) -> Result<Self, DiffError> {
        NonZeroUsize::new(lines)
            .map(Self)
            .ok_or(DiffError::ZeroHunkSize)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for MaxHunkSize {
    fn default() -> Self {
        Self(NonZeroUsize::new(DEFAULT_MAX_HUNK_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

impl fmt::Display for MaxHunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lazy sequence of pieces cut from one hunk. See [`split_hunk`].
#[derive(Debug, Clone)]
pub struct SplitHunks<'a> {
    hunk: &'a Hunk,
    max: usize,
    cursor: usize,
    old_offset: usize,
    new_offset: usize,
    replaced: Option<ReplacedRange>,
    passthrough: bool,
}

/// Split `hunk` into pieces holding at most `max` changed lines each.
///
/// Context lines do not count against the bound: leading context stays with
/// the first piece, any other context line with the piece holding the change
/// before it. A hunk already within the bound is yielded unchanged.
/// [`Hunk::join`] on the pieces gives back the original hunk.
pub fn split_hunk(hunk: &Hunk, max: MaxHunkSize) -> SplitHunks<'_> {
    SplitHunks {
        hunk,
        max: max.get(),
        cursor: 0,
        old_offset: hunk.old_offset(),
        new_offset: hunk.new_offset(),
        replaced: hunk.replaced.or_else(|| removed_range(hunk)),
        passthrough: hunk.changed_lines() <= max.get(),
    }
}

impl Iterator for SplitHunks<'_> {
    type Item = Hunk;

    fn next(&mut self) -> Option<Hunk> {
        if self.passthrough {
            self.passthrough = false;
            self.cursor = usize::MAX;
            return Some(self.hunk.clone());
        }

        let lines = &self.hunk.lines;
        if self.cursor >= lines.len() {
            return None;
        }

        let start = self.cursor;
        let mut end = start;
        let mut changes = 0;
        while let Some(line) = lines.get(end) {
            if line.kind.is_change() {
                if changes == self.max {
                    break;
                }
                changes += 1;
            }
            end += 1;
        }

        let piece_lines = lines[start..end].to_vec();
        let old_count = piece_lines.iter().filter(|l| l.kind != LineKind::Added).count();
        let new_count = piece_lines.iter().filter(|l| l.kind != LineKind::Removed).count();

        let piece = Hunk {
            old_start: offset_to_start(self.old_offset, old_count),
            old_count,
            new_start: offset_to_start(self.new_offset, new_count),
            new_count,
            section: self.hunk.section.clone(),
            lines: piece_lines,
            replaced: self.replaced,
        };

        self.cursor = end;
        self.old_offset += old_count;
        self.new_offset += new_count;
        Some(piece)
    }
}

/// Old lines from the first to the last removed line of `hunk`.
///
/// Context lines around the removals are not part of the range, so a hunk
/// that only inserts has none.
fn removed_range(hunk: &Hunk) -> Option<ReplacedRange> {
    let removed = hunk.removed_line_numbers();
    let (first, last) = (*removed.first()?, *removed.last()?);
    Some(ReplacedRange {
        offset: first - 1,
        len: last - first + 1,
    })
}

/// Lazily split every hunk of `patch`, yielding `(file index, piece)`.
pub fn split_diff(patch: &PatchSet, max: MaxHunkSize) -> impl Iterator<Item = (usize, Hunk)> + '_ {
    patch.files.iter().enumerate().flat_map(move |(idx, file)| {
        file.hunks
            .iter()
            .flat_map(move |hunk| split_hunk(hunk, max))
            .map(move |piece| (idx, piece))
    })
}

/// Copy of `patch` with every hunk replaced by its pieces.
pub fn split_patch(patch: &PatchSet, max: MaxHunkSize) -> PatchSet {
    let mut split = patch.clone();
    for file in &mut split.files {
        file.hunks = file
            .hunks
            .iter()
            .flat_map(|hunk| split_hunk(hunk, max))
            .collect();
    }
    split
}
