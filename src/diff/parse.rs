//! Unified diff parser.
//!
//! Accepts the output of `git diff` (git headers, extended headers, binary
//! notices, no-newline markers) as well as plain `---`/`+++` diffs. Rendering
//! a parsed [`PatchSet`] with `to_string()` reproduces git-produced input
//! byte-for-byte.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use super::{DiffLine, Hunk, LineKind};
use crate::error::DiffError;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$").expect("valid hunk header regex")
});

/// How a file changes between the old and new side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "Added"),
            ChangeKind::Modified => write!(f, "Modified"),
            ChangeKind::Deleted => write!(f, "Deleted"),
            ChangeKind::Renamed => write!(f, "Renamed"),
            ChangeKind::Copied => write!(f, "Copied"),
        }
    }
}

/// All changes to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Header lines verbatim, from `diff --git` through `+++`.
    pub header: Vec<String>,
    /// `None` when the old side is `/dev/null`.
    pub old_path: Option<String>,
    /// `None` when the new side is `/dev/null`.
    pub new_path: Option<String>,
    pub kind: ChangeKind,
    pub old_mode: Option<u32>,
    pub new_mode: Option<u32>,
    pub binary: bool,
    /// Changed lines were not valid UTF-8 when the diff was collected.
    pub non_utf8: bool,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    fn empty() -> Self {
        Self {
            header: Vec::new(),
            old_path: None,
            new_path: None,
            kind: ChangeKind::Modified,
            old_mode: None,
            new_mode: None,
            binary: false,
            non_utf8: false,
            hunks: Vec::new(),
        }
    }

    /// Path of the file after the change (old path for deletions).
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }

    /// Whether the change can be expressed as line hunks and committed piecewise.
    pub fn is_text(&self) -> bool {
        self.skip_reason().is_none()
    }

    /// Short reason why a non-text patch cannot be split, for reporting.
    pub fn skip_reason(&self) -> Option<&'static str> {
        if self.binary {
            Some("binary change")
        } else if self.non_utf8 {
            Some("non UTF-8 content")
        } else if self.kind == ChangeKind::Copied {
            Some("copy")
        } else if self.hunks.is_empty() && self.kind == ChangeKind::Renamed {
            Some("pure rename")
        } else if self.hunks.is_empty()
            && matches!(self.kind, ChangeKind::Added | ChangeKind::Deleted)
        {
            Some("empty file")
        } else if self.hunks.is_empty() {
            Some("mode-only change")
        } else {
            None
        }
    }
}

impl fmt::Display for FilePatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.header {
            writeln!(f, "{line}")?;
        }
        for hunk in &self.hunks {
            write!(f, "{hunk}")?;
        }
        Ok(())
    }
}

/// A parsed unified diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    /// Lines before the first file header (e.g. a mail header from `format-patch`).
    pub preamble: Vec<String>,
    pub files: Vec<FilePatch>,
}

impl PatchSet {
    /// Parse unified diff text.
    ///
    /// Empty input yields an empty set; anything structurally wrong fails with
    /// [`DiffError::MalformedDiff`] naming the 1-based input line.
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        let lines = text
            .split_inclusive('\n')
            .map(|l| l.strip_suffix('\n').unwrap_or(l))
            .collect();
        Parser { lines, pos: 0 }.run()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn hunk_count(&self) -> usize {
        self.files.iter().map(|f| f.hunks.len()).sum()
    }
}

impl fmt::Display for PatchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.preamble {
            writeln!(f, "{line}")?;
        }
        for file in &self.files {
            write!(f, "{file}")?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<&'a str> {
        self.lines.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.pos += 1;
        Some(line)
    }

    /// 1-based number of the line at the cursor.
    fn line_no(&self) -> usize {
        self.pos + 1
    }

    fn at_file_start(&self) -> bool {
        match self.peek() {
            Some(line) if line.starts_with("diff --git ") => true,
            Some(line) if line.starts_with("--- ") => {
                self.peek_at(1).is_some_and(|next| next.starts_with("+++ "))
            }
            _ => false,
        }
    }

    fn run(mut self) -> Result<PatchSet, DiffError> {
        let mut patch = PatchSet::default();

        while self.peek().is_some() && !self.at_file_start() {
            let line = self.bump().unwrap_or_default();
            if line.starts_with("@@ ") {
                return Err(DiffError::malformed(
                    self.pos,
                    "hunk header without a preceding file header",
                ));
            }
            patch.preamble.push(line.to_string());
        }

        if patch.preamble.iter().any(|l| !l.trim().is_empty()) && self.peek().is_none() {
            return Err(DiffError::malformed(1, "no file header found"));
        }

        while self.peek().is_some() {
            let file = self.file()?;
            patch.files.push(file);
        }

        Ok(patch)
    }

    fn file(&mut self) -> Result<FilePatch, DiffError> {
        let mut file = FilePatch::empty();

        if let Some(line) = self.peek().filter(|l| l.starts_with("diff --git ")) {
            self.pos += 1;
            file.header.push(line.to_string());
            if let Some((old, new)) = split_git_header_paths(&line["diff --git ".len()..]) {
                file.old_path = Some(old);
                file.new_path = Some(new);
            }
            self.extended_headers(&mut file)?;
        }

        if self.peek().is_some_and(|l| l.starts_with("--- ")) {
            let old = self.bump().unwrap_or_default();
            let line_no = self.line_no();
            let new = self
                .bump()
                .filter(|l| l.starts_with("+++ "))
                .ok_or_else(|| DiffError::malformed(line_no, "expected '+++' after '---'"))?;
            file.header.push(old.to_string());
            file.header.push(new.to_string());
            file.old_path = parse_marker_path(&old[4..]);
            file.new_path = parse_marker_path(&new[4..]);
        }

        if file.header.is_empty() {
            return Err(DiffError::malformed(self.line_no(), "expected a file header"));
        }

        while self.peek().is_some_and(|l| l.starts_with("@@")) {
            let hunk = self.hunk()?;
            file.hunks.push(hunk);
        }

        if self.peek().is_some() && !self.at_file_start() {
            return Err(DiffError::malformed(
                self.line_no(),
                "unexpected content after hunk (body longer than its header counts?)",
            ));
        }

        file.kind = match (&file.old_path, &file.new_path) {
            (None, Some(_)) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Deleted,
            _ => file.kind,
        };

        Ok(file)
    }

    fn extended_headers(&mut self, file: &mut FilePatch) -> Result<(), DiffError> {
        while let Some(line) = self.peek() {
            if line.starts_with("--- ") || line.starts_with("@@") || line.starts_with("diff --git ") {
                break;
            }
            let line_no = self.line_no();
            self.pos += 1;
            file.header.push(line.to_string());

            if let Some(mode) = line.strip_prefix("new file mode ") {
                file.kind = ChangeKind::Added;
                file.old_path = None;
                file.new_mode = Some(parse_mode(mode, line_no)?);
            } else if let Some(mode) = line.strip_prefix("deleted file mode ") {
                file.kind = ChangeKind::Deleted;
                file.new_path = None;
                file.old_mode = Some(parse_mode(mode, line_no)?);
            } else if let Some(mode) = line.strip_prefix("old mode ") {
                file.old_mode = Some(parse_mode(mode, line_no)?);
            } else if let Some(mode) = line.strip_prefix("new mode ") {
                file.new_mode = Some(parse_mode(mode, line_no)?);
            } else if let Some(path) = line.strip_prefix("rename from ") {
                file.kind = ChangeKind::Renamed;
                file.old_path = Some(unquote(path));
            } else if let Some(path) = line.strip_prefix("rename to ") {
                file.kind = ChangeKind::Renamed;
                file.new_path = Some(unquote(path));
            } else if let Some(path) = line.strip_prefix("copy from ") {
                file.kind = ChangeKind::Copied;
                file.old_path = Some(unquote(path));
            } else if let Some(path) = line.strip_prefix("copy to ") {
                file.kind = ChangeKind::Copied;
                file.new_path = Some(unquote(path));
            } else if line.starts_with("Binary files ") {
                file.binary = true;
            } else if line.starts_with("GIT binary patch") {
                file.binary = true;
                // Literal/delta payload runs until the next file.
                while self.peek().is_some() && !self.at_file_start() {
                    let payload = self.bump().unwrap_or_default();
                    file.header.push(payload.to_string());
                }
            } else if line.starts_with("index ")
                || line.starts_with("similarity index ")
                || line.starts_with("dissimilarity index ")
            {
                // Informational only.
            } else {
                return Err(DiffError::malformed(
                    line_no,
                    format!("unexpected line in file header: {line:?}"),
                ));
            }
        }
        Ok(())
    }

    fn hunk(&mut self) -> Result<Hunk, DiffError> {
        let header_line = self.line_no();
        let header = self.bump().unwrap_or_default();
        let caps = HUNK_HEADER
            .captures(header)
            .ok_or_else(|| DiffError::malformed(header_line, format!("invalid hunk header {header:?}")))?;

        let number = |idx: usize, default: usize| -> Result<usize, DiffError> {
            match caps.get(idx) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| DiffError::malformed(header_line, "hunk header number out of range")),
                None => Ok(default),
            }
        };

        let mut hunk = Hunk {
            old_start: number(1, 0)?,
            old_count: number(2, 1)?,
            new_start: number(3, 0)?,
            new_count: number(4, 1)?,
            section: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
            lines: Vec::new(),
            replaced: None,
        };

        let mut old_left = hunk.old_count;
        let mut new_left = hunk.new_count;

        while old_left > 0 || new_left > 0 {
            let line_no = self.line_no();
            let line = self.bump().ok_or_else(|| {
                DiffError::malformed(
                    line_no,
                    format!("hunk ends early: {old_left} old and {new_left} new line(s) missing"),
                )
            })?;

            let (kind, text) = match line.chars().next() {
                Some(' ') => (LineKind::Context, &line[1..]),
                // Some tools strip the space from empty context lines.
                None => (LineKind::Context, ""),
                Some('-') => (LineKind::Removed, &line[1..]),
                Some('+') => (LineKind::Added, &line[1..]),
                Some('\\') => {
                    mark_missing_newline(&mut hunk, line_no)?;
                    continue;
                }
                Some(_) => {
                    return Err(DiffError::malformed(
                        line_no,
                        format!("invalid hunk line {line:?}"),
                    ));
                }
            };

            let fits = match kind {
                LineKind::Context => old_left > 0 && new_left > 0,
                LineKind::Removed => old_left > 0,
                LineKind::Added => new_left > 0,
            };
            if !fits {
                return Err(DiffError::malformed(
                    line_no,
                    "hunk body does not match its header counts",
                ));
            }
            if kind != LineKind::Added {
                old_left -= 1;
            }
            if kind != LineKind::Removed {
                new_left -= 1;
            }
            hunk.lines.push(DiffLine::new(kind, text));
        }

        if self.peek().is_some_and(|l| l.starts_with('\\')) {
            let line_no = self.line_no();
            self.pos += 1;
            mark_missing_newline(&mut hunk, line_no)?;
        }

        Ok(hunk)
    }
}

fn mark_missing_newline(hunk: &mut Hunk, line_no: usize) -> Result<(), DiffError> {
    let last = hunk
        .lines
        .last_mut()
        .ok_or_else(|| DiffError::malformed(line_no, "no-newline marker before any hunk line"))?;
    last.missing_newline = true;
    Ok(())
}

fn parse_mode(text: &str, line_no: usize) -> Result<u32, DiffError> {
    u32::from_str_radix(text.trim(), 8)
        .map_err(|_| DiffError::malformed(line_no, format!("invalid file mode {text:?}")))
}

/// Path from a `---`/`+++` line: `None` for `/dev/null`, `a/`/`b/` prefix stripped.
fn parse_marker_path(raw: &str) -> Option<String> {
    let raw = if raw.starts_with('"') {
        raw
    } else {
        raw.split('\t').next().unwrap_or(raw)
    };
    let path = unquote(raw.trim_end());
    if path == "/dev/null" {
        return None;
    }
    Some(strip_side_prefix(&path).to_string())
}

fn strip_side_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Paths from `diff --git a/<old> b/<new>`.
///
/// Only used when no `---`/`+++` lines follow (binary or mode-only changes).
fn split_git_header_paths(rest: &str) -> Option<(String, String)> {
    if rest.starts_with('"') {
        let close = rest[1..].find('"')? + 2;
        let old = unquote(&rest[..close]);
        let new = unquote(rest[close..].trim_start());
        return Some((
            strip_side_prefix(&old).to_string(),
            strip_side_prefix(&new).to_string(),
        ));
    }

    // Identical names split unambiguously even when they contain " b/".
    let half = rest.len().saturating_sub(1) / 2;
    if rest.len() % 2 == 1 && rest.is_char_boundary(half) && rest.is_char_boundary(half + 1) {
        let (old, new) = (&rest[..half], &rest[half + 1..]);
        if rest.as_bytes()[half] == b' '
            && old.strip_prefix("a/").is_some()
            && new.strip_prefix("b/") == old.strip_prefix("a/")
        {
            return Some((old[2..].to_string(), new[2..].to_string()));
        }
    }

    let split = rest.find(" b/")?;
    Some((
        strip_side_prefix(&rest[..split]).to_string(),
        strip_side_prefix(&rest[split + 1..]).to_string(),
    ))
}

/// Undo git's C-style path quoting (`"a/caf\303\251.txt"`).
fn unquote(text: &str) -> String {
    let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) else {
        return text.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut iter = inner.bytes().peekable();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&o @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(o - b'0');
                            iter.next();
                        }
                        _ => break,
                    }
                }
                bytes.push((value & 0xff) as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
