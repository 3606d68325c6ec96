//! Unified diff model: collection from the working tree, parsing, splitting.

pub mod collect;
pub mod parse;
pub mod split;

use std::fmt;

use serde::Serialize;

pub use collect::{PendingDiff, collect_pending_diff, read_patch_file};
pub use parse::{ChangeKind, FilePatch, PatchSet};
pub use split::{MaxHunkSize, SplitHunks, split_diff, split_hunk, split_patch};

/// Marker git prints after a line that lacks a trailing newline.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Role of a single line inside a hunk body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

impl LineKind {
    pub fn prefix(self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Added => '+',
            LineKind::Removed => '-',
        }
    }

    pub fn is_change(self) -> bool {
        !matches!(self, LineKind::Context)
    }
}

/// One line of a hunk body, stored without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub text: String,
    /// Set when the line is followed by `\ No newline at end of file`.
    pub missing_newline: bool,
}

impl DiffLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            missing_newline: false,
        }
    }

    /// File content this line stands for, terminator included.
    pub fn content(&self) -> String {
        if self.missing_newline {
            self.text.clone()
        } else {
            format!("{}\n", self.text)
        }
    }
}

/// Old lines from the first to the last removal of the hunk a split piece
/// was cut from (0-based offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplacedRange {
    pub offset: usize,
    pub len: usize,
}

/// A contiguous block of changes within one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Text after the closing `@@`, leading space included.
    pub section: String,
    pub lines: Vec<DiffLine>,
    /// Set on pieces produced by the splitter.
    pub replaced: Option<ReplacedRange>,
}

/// Convert a unified-diff start number into a 0-based insertion offset.
///
/// For an empty range the header names the line *before* the range.
pub(crate) fn start_to_offset(start: usize, count: usize) -> usize {
    if count == 0 { start } else { start.saturating_sub(1) }
}

pub(crate) fn offset_to_start(offset: usize, count: usize) -> usize {
    if count == 0 { offset } else { offset + 1 }
}

impl Hunk {
    /// 0-based index of the first old line this hunk covers.
    pub fn old_offset(&self) -> usize {
        start_to_offset(self.old_start, self.old_count)
    }

    pub fn new_offset(&self) -> usize {
        start_to_offset(self.new_start, self.new_count)
    }

    /// Number of added plus removed lines.
    pub fn changed_lines(&self) -> usize {
        self.lines.iter().filter(|l| l.kind.is_change()).count()
    }

    pub fn has_removals(&self) -> bool {
        self.lines.iter().any(|l| l.kind == LineKind::Removed)
    }

    /// 1-based old line numbers of every removed line.
    pub fn removed_line_numbers(&self) -> Vec<usize> {
        let mut line = self.old_offset() + 1;
        let mut numbers = Vec::new();
        for l in &self.lines {
            match l.kind {
                LineKind::Context => line += 1,
                LineKind::Removed => {
                    numbers.push(line);
                    line += 1;
                }
                LineKind::Added => {}
            }
        }
        numbers
    }

    pub fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@{}",
            format_range(self.old_start, self.old_count),
            format_range(self.new_start, self.new_count),
            self.section
        )
    }

    /// Reassemble consecutive split pieces into the hunk they came from.
    ///
    /// Returns `None` for an empty slice.
    pub fn join(pieces: &[Hunk]) -> Option<Hunk> {
        let first = pieces.first()?;
        let old_count: usize = pieces.iter().map(|p| p.old_count).sum();
        let new_count: usize = pieces.iter().map(|p| p.new_count).sum();
        let lines = pieces.iter().flat_map(|p| p.lines.iter().cloned()).collect();

        Some(Hunk {
            old_start: offset_to_start(first.old_offset(), old_count),
            old_count,
            new_start: offset_to_start(first.new_offset(), new_count),
            new_count,
            section: first.section.clone(),
            lines,
            replaced: None,
        })
    }
}

/// Render a header range the way xdiff does: the count is omitted when it is 1.
fn format_range(start: usize, count: usize) -> String {
    if count == 1 {
        start.to_string()
    } else {
        format!("{start},{count}")
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;
        for line in &self.lines {
            writeln!(f, "{}{}", line.kind.prefix(), line.text)?;
            if line.missing_newline {
                writeln!(f, "{NO_NEWLINE_MARKER}")?;
            }
        }
        Ok(())
    }
}
