//! Line-authorship lookups: libgit2 blame and `git blame --porcelain`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use git2::{BlameOptions, Oid, Repository};
use regex_lite::Regex;
use tracing::debug;

use super::Identity;
use crate::error::AttributionError;

static PORCELAIN_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{40}|[0-9a-f]{64}) (\d+) (\d+)(?: (\d+))?$")
        .expect("valid porcelain header regex")
});

/// Inclusive, 1-based range of old-side line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, line: usize) -> bool {
        (self.start..=self.end).contains(&line)
    }
}

/// Who last touched one line. `author` is `None` when blame cannot tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlamedLine {
    pub line: usize,
    pub author: Option<Identity>,
    pub when: Option<DateTime<FixedOffset>>,
}

impl BlamedLine {
    pub fn unknown(line: usize) -> Self {
        Self {
            line,
            author: None,
            when: None,
        }
    }
}

/// Which blame implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlameBackend {
    #[default]
    Libgit2,
    Git,
}

impl std::str::FromStr for BlameBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "libgit2" | "git2" => Ok(Self::Libgit2),
            "git" | "cli" => Ok(Self::Git),
            _ => Err(format!("Unknown blame backend: {} (expected libgit2 or git)", s)),
        }
    }
}

/// Historical line-authorship lookup.
///
/// This abstraction allows swapping libgit2 for the git binary, and mocking
/// blame in tests.
#[cfg_attr(test, mockall::automock)]
pub trait BlameSource {
    /// Blame `range` of `path` as it exists in the original `HEAD`.
    ///
    /// Returns one entry per line in the range.
    fn blame(&self, path: &str, range: LineRange) -> Result<Vec<BlamedLine>, AttributionError>;
}

/// Blame through libgit2, honouring `.mailmap`.
pub struct Git2Blame<'repo> {
    repo: &'repo Repository,
    newest: Option<Oid>,
    shallow: bool,
}

impl<'repo> Git2Blame<'repo> {
    /// Blame against the repository's current `HEAD`.
    pub fn new(repo: &'repo Repository) -> Self {
        let newest = repo.head().ok().and_then(|h| h.target());
        Self {
            repo,
            newest,
            shallow: repo.is_shallow(),
        }
    }
}

impl BlameSource for Git2Blame<'_> {
    fn blame(&self, path: &str, range: LineRange) -> Result<Vec<BlamedLine>, AttributionError> {
        let Some(newest) = self.newest else {
            return Err(AttributionError::unavailable(path, "repository has no commits"));
        };

        let mut opts = BlameOptions::new();
        opts.newest_commit(newest)
            .min_line(range.start)
            .max_line(range.end)
            .use_mailmap(true);

        let blame = self
            .repo
            .blame_file(Path::new(path), Some(&mut opts))
            .map_err(|e| AttributionError::unavailable(path, e.message()))?;

        let mut lines = Vec::with_capacity(range.end + 1 - range.start);
        for line in range.start..=range.end {
            let Some(hunk) = blame.get_line(line) else {
                lines.push(BlamedLine::unknown(line));
                continue;
            };

            // Past a shallow boundary the blamed commit is only the graft point.
            if self.shallow && hunk.is_boundary() {
                lines.push(BlamedLine::unknown(line));
                continue;
            }

            let sig = hunk.final_signature();
            let author = match (sig.name(), sig.email()) {
                (Some(name), Some(email)) => Some(Identity::new(name, email)),
                _ => None,
            };
            let time = sig.when();
            lines.push(BlamedLine {
                line,
                author,
                when: to_datetime(time.seconds(), time.offset_minutes() * 60),
            });
        }

        Ok(lines)
    }
}

/// Blame by running `git blame --porcelain`.
pub struct CliBlame {
    git: PathBuf,
    workdir: PathBuf,
    revision: String,
    shallow: bool,
}

impl CliBlame {
    /// Locate `git` and prepare to blame against the repository's `HEAD`.
    pub fn new(repo: &Repository) -> Result<Self, AttributionError> {
        let git = which::which("git").map_err(|_| AttributionError::GitNotInstalled)?;
        let workdir = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .to_path_buf();
        let revision = repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .map(|oid| oid.to_string())
            .unwrap_or_else(|| "HEAD".to_string());

        Ok(Self {
            git,
            workdir,
            revision,
            shallow: repo.is_shallow(),
        })
    }
}

impl BlameSource for CliBlame {
    fn blame(&self, path: &str, range: LineRange) -> Result<Vec<BlamedLine>, AttributionError> {
        let line_arg = format!("{},{}", range.start, range.end);
        debug!("git blame -L {line_arg} {} -- {path}", self.revision);

        let output = Command::new(&self.git)
            .current_dir(&self.workdir)
            .args(["blame", "--porcelain", "-L", &line_arg, &self.revision, "--", path])
            .output()
            .map_err(AttributionError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AttributionError::unavailable(path, stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = parse_porcelain(&stdout, self.shallow)?;
        lines.retain(|l| range.contains(l.line));
        Ok(lines)
    }
}

#[derive(Debug, Default, Clone)]
struct PorcelainCommit {
    name: Option<String>,
    email: Option<String>,
    time: Option<i64>,
    tz_seconds: Option<i32>,
    boundary: bool,
}

/// Parse `git blame --porcelain` output into per-line entries.
///
/// Commit details are only printed the first time a commit appears, so they
/// are remembered by hash. The all-zero hash marks uncommitted lines.
pub fn parse_porcelain(output: &str, shallow: bool) -> Result<Vec<BlamedLine>, AttributionError> {
    let mut commits: HashMap<String, PorcelainCommit> = HashMap::new();
    let mut result = Vec::new();
    let mut lines = output.lines();

    while let Some(header) = lines.next() {
        if header.is_empty() {
            continue;
        }
        let caps = PORCELAIN_HEADER
            .captures(header)
            .ok_or_else(|| AttributionError::InvalidPorcelain(format!("bad header {header:?}")))?;
        let sha = caps[1].to_string();
        let final_line: usize = caps[3]
            .parse()
            .map_err(|_| AttributionError::InvalidPorcelain(format!("bad line number in {header:?}")))?;

        let info = commits.entry(sha.clone()).or_default();
        loop {
            let Some(line) = lines.next() else {
                return Err(AttributionError::InvalidPorcelain(
                    "output ends before line content".to_string(),
                ));
            };
            if line.starts_with('\t') {
                break;
            }
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "author" => info.name = Some(value.to_string()),
                "author-mail" => {
                    let email = value.trim_start_matches('<').trim_end_matches('>');
                    info.email = Some(email.to_string());
                }
                "author-time" => info.time = value.parse().ok(),
                "author-tz" => info.tz_seconds = parse_tz(value),
                "boundary" => info.boundary = true,
                _ => {}
            }
        }

        let uncommitted = sha.bytes().all(|b| b == b'0');
        let unknown = uncommitted || (shallow && info.boundary);
        let author = match (&info.name, &info.email) {
            (Some(name), Some(email)) if !unknown => Some(Identity::new(name, email)),
            _ => None,
        };
        let when = match (info.time, unknown) {
            (Some(secs), false) => to_datetime(secs, info.tz_seconds.unwrap_or(0)),
            _ => None,
        };

        result.push(BlamedLine {
            line: final_line,
            author,
            when,
        });
    }

    Ok(result)
}

/// `+0130` / `-0800` to seconds east of UTC.
fn parse_tz(value: &str) -> Option<i32> {
    let (sign, digits) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => (1, value),
    };
    if digits.len() != 4 || !digits.is_ascii() {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

pub(crate) fn to_datetime(seconds: i64, offset_seconds: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(offset_seconds)?;
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.with_timezone(&offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORCELAIN: &str = "\
1111111111111111111111111111111111111111 1 1 2
author Alice
author-mail <alice@example.com>
author-time 1700000000
author-tz +0200
committer Alice
committer-mail <alice@example.com>
committer-time 1700000000
committer-tz +0200
summary first
filename src/lib.rs
\tfn one() {}
1111111111111111111111111111111111111111 2 2
\tfn two() {}
2222222222222222222222222222222222222222 3 3 1
author Bob
author-mail <bob@example.com>
author-time 1710000000
author-tz -0500
summary second
boundary
filename src/lib.rs
\tfn three() {}
";

    #[test]
    fn test_parse_porcelain_reuses_commit_details() {
        let lines = parse_porcelain(PORCELAIN, false).unwrap();
        assert_eq!(lines.len(), 3);
        let alice = Identity::new("Alice", "alice@example.com");
        assert_eq!(lines[0].author.as_ref(), Some(&alice));
        assert_eq!(lines[1].author.as_ref(), Some(&alice));
        assert_eq!(lines[1].line, 2);
        assert_eq!(lines[2].author.as_ref().map(|a| a.name.as_str()), Some("Bob"));

        let when = lines[0].when.unwrap();
        assert_eq!(when.timestamp(), 1_700_000_000);
        assert_eq!(when.offset().local_minus_utc(), 7200);
        assert_eq!(lines[2].when.unwrap().offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_parse_porcelain_boundary_unknown_when_shallow() {
        let lines = parse_porcelain(PORCELAIN, true).unwrap();
        assert!(lines[0].author.is_some());
        assert_eq!(lines[2], BlamedLine::unknown(3));
    }

    #[test]
    fn test_parse_porcelain_uncommitted_lines_unknown() {
        let output = "\
0000000000000000000000000000000000000000 4 4 1
author Not Committed Yet
author-mail <not.committed.yet>
author-time 1700000000
author-tz +0000
filename a.txt
\tpending
";
        let lines = parse_porcelain(output, false).unwrap();
        assert_eq!(lines, vec![BlamedLine::unknown(4)]);
    }

    #[test]
    fn test_parse_porcelain_rejects_garbage() {
        let err = parse_porcelain("fatal: no such path\n", false).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidPorcelain(_)));
    }

    #[test]
    fn test_parse_porcelain_rejects_truncated_output() {
        let output = "1111111111111111111111111111111111111111 1 1 1\nauthor A\n";
        assert!(parse_porcelain(output, false).is_err());
    }

    #[test]
    fn test_parse_tz() {
        assert_eq!(parse_tz("+0130"), Some(5400));
        assert_eq!(parse_tz("-0800"), Some(-28800));
        assert_eq!(parse_tz("bogus"), None);
    }

    #[test]
    fn test_blame_backend_from_str() {
        assert_eq!("libgit2".parse::<BlameBackend>(), Ok(BlameBackend::Libgit2));
        assert_eq!("GIT".parse::<BlameBackend>(), Ok(BlameBackend::Git));
        assert!("svn".parse::<BlameBackend>().is_err());
    }

    #[test]
    fn test_git2_blame_on_empty_repo_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let blame = Git2Blame::new(&repo);
        let err = blame.blame("a.txt", LineRange::new(1, 1)).unwrap_err();
        assert!(matches!(err, AttributionError::AttributionUnavailable { .. }));
    }
}
