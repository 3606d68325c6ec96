//! Attribution of hunks to the authors who last touched the lines they replace.

pub mod blame;

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diff::{FilePatch, Hunk, LineKind};
use crate::error::{AttributionError, ConfigError};

pub use blame::{BlameBackend, BlameSource, BlamedLine, CliBlame, Git2Blame, LineRange};

/// An author identity as git records it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

impl std::str::FromStr for Identity {
    type Err = ConfigError;

    /// Parse `Name <email>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidIdentity(s.to_string());
        let s = s.trim();
        let open = s.rfind('<').ok_or_else(invalid)?;
        let email = s[open + 1..].strip_suffix('>').ok_or_else(invalid)?.trim();
        let name = s[..open].trim();
        if name.is_empty() || email.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(name, email))
    }
}

/// What to do with hunks that only insert new lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertionPolicy {
    /// Attribute to the default identity.
    #[default]
    Default,
    /// Attribute to whoever last touched the line above the insertion.
    Neighbor,
}

impl std::str::FromStr for InsertionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "neighbor" | "neighbour" => Ok(Self::Neighbor),
            _ => Err(format!("Unknown insertion policy: {} (expected default or neighbor)", s)),
        }
    }
}

/// How an attribution was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionSource {
    /// Blame of the lines the hunk removes.
    Blame,
    /// Blame of the old range an insert-only piece was split from.
    ReplacedRange,
    /// Blame of the line above a pure insertion.
    Neighbor,
    /// The configured default identity.
    Default,
}

/// A hunk together with the author it is committed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributedHunk {
    /// Index of the file in the split patch set.
    pub file: usize,
    /// Position of the hunk within its file, in the split patch set.
    pub index: usize,
    pub path: String,
    pub hunk: Hunk,
    pub author: Identity,
    pub when: Option<DateTime<FixedOffset>>,
    pub source: AttributionSource,
}

/// Resolves hunks to authors through a [`BlameSource`].
pub struct AttributionResolver<'a> {
    blame: &'a dyn BlameSource,
    default: Identity,
    insertions: InsertionPolicy,
}

impl<'a> AttributionResolver<'a> {
    pub fn new(blame: &'a dyn BlameSource, default: Identity, insertions: InsertionPolicy) -> Self {
        Self {
            blame,
            default,
            insertions,
        }
    }

    /// Attribute hunk number `index` of file number `file`.
    ///
    /// Never fails: unavailable attribution falls back to the default identity.
    pub fn attribute(
        &self,
        file: usize,
        index: usize,
        patch: &FilePatch,
        hunk: Hunk,
    ) -> AttributedHunk {
        let path = patch.path().to_string();
        let (author, when, source) = match self.resolve(patch, &hunk) {
            Ok(Some(found)) => found,
            Ok(None) => (self.default.clone(), None, AttributionSource::Default),
            Err(e) => {
                warn!("{e}; attributing hunk {} to {}", hunk.header(), self.default);
                (self.default.clone(), None, AttributionSource::Default)
            }
        };

        debug!("{path} {} -> {author} ({source:?})", hunk.header());
        AttributedHunk {
            file,
            index,
            path,
            hunk,
            author,
            when,
            source,
        }
    }

    #[allow(clippy::type_complexity)]
    fn resolve(
        &self,
        patch: &FilePatch,
        hunk: &Hunk,
    ) -> Result<Option<(Identity, Option<DateTime<FixedOffset>>, AttributionSource)>, AttributionError> {
        // Added files have no history to blame.
        let Some(old_path) = patch.old_path.as_deref() else {
            return Ok(None);
        };
        let Some((lines, source)) = self.blame_target(hunk) else {
            return Ok(None);
        };
        let (Some(&start), Some(&end)) = (lines.first(), lines.last()) else {
            return Ok(None);
        };

        let blamed = self.blame.blame(old_path, LineRange::new(start, end))?;
        let relevant: Vec<BlamedLine> = blamed
            .into_iter()
            .filter(|b| lines.binary_search(&b.line).is_ok())
            .collect();

        Ok(pick_author(&relevant).map(|(author, when)| (author, when, source)))
    }

    /// Sorted old line numbers to blame for `hunk`, and why.
    fn blame_target(&self, hunk: &Hunk) -> Option<(Vec<usize>, AttributionSource)> {
        let removed = hunk.removed_line_numbers();
        if !removed.is_empty() {
            return Some((removed, AttributionSource::Blame));
        }

        if let Some(range) = hunk.replaced.filter(|r| r.len > 0) {
            let lines = (range.offset + 1..=range.offset + range.len).collect();
            return Some((lines, AttributionSource::ReplacedRange));
        }

        if self.insertions == InsertionPolicy::Neighbor {
            let anchor = insertion_anchor(hunk);
            if anchor > 0 {
                return Some((vec![anchor], AttributionSource::Neighbor));
            }
        }

        None
    }
}

/// 1-based old line directly above the first inserted line (0 = top of file).
fn insertion_anchor(hunk: &Hunk) -> usize {
    let leading_context = hunk
        .lines
        .iter()
        .take_while(|l| l.kind == LineKind::Context)
        .count();
    if hunk.old_count == 0 {
        hunk.old_offset()
    } else {
        hunk.old_offset() + leading_context
    }
}

/// Majority author among `lines`; ties go to the author seen first.
///
/// The timestamp is the latest among the winner's lines.
pub fn pick_author(lines: &[BlamedLine]) -> Option<(Identity, Option<DateTime<FixedOffset>>)> {
    let mut tally: Vec<(&Identity, usize, Option<DateTime<FixedOffset>>)> = Vec::new();
    for line in lines {
        let Some(author) = line.author.as_ref() else {
            continue;
        };
        match tally.iter_mut().find(|(a, _, _)| *a == author) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 = entry.2.max(line.when);
            }
            None => tally.push((author, 1, line.when)),
        }
    }

    let mut best: Option<&(&Identity, usize, Option<DateTime<FixedOffset>>)> = None;
    for entry in &tally {
        if best.is_none_or(|b| entry.1 > b.1) {
            best = Some(entry);
        }
    }
    best.map(|(author, _, when)| ((*author).clone(), *when))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffLine, PatchSet, ReplacedRange};
    use blame::MockBlameSource;
    use mockall::predicate::eq;

    fn alice() -> Identity {
        Identity::new("Alice", "alice@example.com")
    }

    fn bob() -> Identity {
        Identity::new("Bob", "bob@example.com")
    }

    fn fallback() -> Identity {
        Identity::new("Me", "me@example.com")
    }

    fn blamed(line: usize, who: Option<Identity>, secs: i64) -> BlamedLine {
        BlamedLine {
            line,
            author: who,
            when: blame::to_datetime(secs, 0),
        }
    }

    fn modified_file() -> FilePatch {
        let text = "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -2,2 +2 @@\n-a\n-b\n+c\n";
        PatchSet::parse(text).unwrap().files.remove(0)
    }

    #[test]
    fn test_identity_parse_and_display() {
        let id: Identity = "Jane Doe <jane@example.com>".parse().unwrap();
        assert_eq!(id, Identity::new("Jane Doe", "jane@example.com"));
        assert_eq!(id.to_string(), "Jane Doe <jane@example.com>");
    }

    #[test]
    fn test_identity_parse_rejects_missing_parts() {
        assert!("Jane Doe".parse::<Identity>().is_err());
        assert!("<jane@example.com>".parse::<Identity>().is_err());
        assert!("Jane <>".parse::<Identity>().is_err());
        assert!("Jane <jane@example.com".parse::<Identity>().is_err());
    }

    #[test]
    fn test_pick_author_majority_wins() {
        let lines = vec![
            blamed(1, Some(alice()), 100),
            blamed(2, Some(bob()), 200),
            blamed(3, Some(bob()), 300),
        ];
        let (author, when) = pick_author(&lines).unwrap();
        assert_eq!(author, bob());
        assert_eq!(when.unwrap().timestamp(), 300);
    }

    #[test]
    fn test_pick_author_tie_goes_to_first_seen() {
        let lines = vec![
            blamed(1, Some(bob()), 100),
            blamed(2, Some(alice()), 200),
            blamed(3, None, 0),
        ];
        assert_eq!(pick_author(&lines).unwrap().0, bob());
    }

    #[test]
    fn test_pick_author_all_unknown() {
        assert_eq!(pick_author(&[BlamedLine::unknown(1)]), None);
        assert_eq!(pick_author(&[]), None);
    }

    #[test]
    fn test_removed_lines_are_blamed() {
        let mut mock = MockBlameSource::new();
        mock.expect_blame()
            .with(eq("src/lib.rs"), eq(LineRange::new(2, 3)))
            .times(1)
            .returning(|_, _| Ok(vec![blamed(2, Some(alice()), 10), blamed(3, Some(alice()), 20)]));

        let file = modified_file();
        let resolver = AttributionResolver::new(&mock, fallback(), InsertionPolicy::Default);
        let attributed = resolver.attribute(0, 0, &file, file.hunks[0].clone());

        assert_eq!(attributed.author, alice());
        assert_eq!(attributed.source, AttributionSource::Blame);
        assert_eq!(attributed.when.unwrap().timestamp(), 20);
        assert_eq!(attributed.path, "src/lib.rs");
    }

    #[test]
    fn test_blame_failure_falls_back_to_default() {
        let mut mock = MockBlameSource::new();
        mock.expect_blame()
            .returning(|path, _| Err(AttributionError::unavailable(path, "shallow clone")));

        let file = modified_file();
        let resolver = AttributionResolver::new(&mock, fallback(), InsertionPolicy::Default);
        let attributed = resolver.attribute(0, 0, &file, file.hunks[0].clone());

        assert_eq!(attributed.author, fallback());
        assert_eq!(attributed.source, AttributionSource::Default);
        assert_eq!(attributed.when, None);
    }

    #[test]
    fn test_pure_insertion_uses_default_without_blame() {
        let mut mock = MockBlameSource::new();
        mock.expect_blame().never();

        let text = "--- a/f\n+++ b/f\n@@ -4,0 +5,2 @@\n+x\n+y\n";
        let file = PatchSet::parse(text).unwrap().files.remove(0);
        let resolver = AttributionResolver::new(&mock, fallback(), InsertionPolicy::Default);
        let attributed = resolver.attribute(0, 0, &file, file.hunks[0].clone());

        assert_eq!(attributed.author, fallback());
        assert_eq!(attributed.source, AttributionSource::Default);
    }

    #[test]
    fn test_pure_insertion_neighbor_policy_blames_line_above() {
        let mut mock = MockBlameSource::new();
        mock.expect_blame()
            .with(eq("f"), eq(LineRange::new(4, 4)))
            .returning(|_, _| Ok(vec![blamed(4, Some(bob()), 5)]));

        let text = "--- a/f\n+++ b/f\n@@ -4,0 +5,2 @@\n+x\n+y\n";
        let file = PatchSet::parse(text).unwrap().files.remove(0);
        let resolver = AttributionResolver::new(&mock, fallback(), InsertionPolicy::Neighbor);
        let attributed = resolver.attribute(0, 0, &file, file.hunks[0].clone());

        assert_eq!(attributed.author, bob());
        assert_eq!(attributed.source, AttributionSource::Neighbor);
    }

    #[test]
    fn test_insert_only_piece_blames_replaced_range() {
        let mut mock = MockBlameSource::new();
        mock.expect_blame()
            .with(eq("src/lib.rs"), eq(LineRange::new(2, 3)))
            .returning(|_, _| Ok(vec![blamed(2, Some(bob()), 1), blamed(3, Some(bob()), 2)]));

        let file = modified_file();
        let piece = Hunk {
            old_start: 3,
            old_count: 0,
            new_start: 2,
            new_count: 1,
            section: String::new(),
            lines: vec![DiffLine::new(LineKind::Added, "c")],
            replaced: Some(ReplacedRange { offset: 1, len: 2 }),
        };
        let resolver = AttributionResolver::new(&mock, fallback(), InsertionPolicy::Default);
        let attributed = resolver.attribute(0, 0, &file, piece);

        assert_eq!(attributed.author, bob());
        assert_eq!(attributed.source, AttributionSource::ReplacedRange);
    }

    #[test]
    fn test_added_file_is_never_blamed() {
        let mut mock = MockBlameSource::new();
        mock.expect_blame().never();

        let text = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+hello\n";
        let file = PatchSet::parse(text).unwrap().files.remove(0);
        let resolver = AttributionResolver::new(&mock, fallback(), InsertionPolicy::Neighbor);
        let attributed = resolver.attribute(0, 0, &file, file.hunks[0].clone());

        assert_eq!(attributed.author, fallback());
        assert_eq!(attributed.path, "new.txt");
    }

    #[test]
    fn test_insertion_policy_from_str() {
        assert_eq!("neighbor".parse::<InsertionPolicy>(), Ok(InsertionPolicy::Neighbor));
        assert_eq!("Default".parse::<InsertionPolicy>(), Ok(InsertionPolicy::Default));
        assert!("nearest".parse::<InsertionPolicy>().is_err());
    }
}
