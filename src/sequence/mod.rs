//! Commit sequencing: group attributed hunks and commit each group as its author.
//!
//! Groups are committed one at a time through an [`IndexSession`]. The first
//! failure stops the sequence; commits made before it stay in place and the
//! [`RunReport`] says which groups were committed, which one failed and which
//! were never attempted.

pub mod apply;
pub mod report;
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, FixedOffset};
use git2::Repository;
use tracing::{debug, warn};

use crate::attribution::{AttributedHunk, Identity};
use crate::diff::PatchSet;
use crate::error::CommitError;

pub use apply::apply_hunks;
pub use report::{FailedGroup, GroupSummary, RunReport, SkippedFile};
pub use session::IndexSession;

/// Default commit message template.
pub const DEFAULT_MESSAGE: &str = "Update {files}";

/// Number of paths named by `{files}` before it summarizes the rest.
const MAX_LISTED_FILES: usize = 3;

/// How attributed hunks are gathered into commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingPolicy {
    /// One commit per author, in order of first appearance.
    #[default]
    Author,
    /// One commit per run of consecutive hunks by the same author.
    Run,
}

impl std::str::FromStr for GroupingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "author" => Ok(Self::Author),
            "run" => Ok(Self::Run),
            _ => Err(format!("Unknown grouping: {} (expected author or run)", s)),
        }
    }
}

/// Which timestamp the author signature carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// The latest original timestamp of the group, else now.
    #[default]
    Original,
    Now,
}

impl std::str::FromStr for TimestampPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "now" => Ok(Self::Now),
            _ => Err(format!("Unknown timestamp policy: {} (expected original or now)", s)),
        }
    }
}

/// Who is recorded as committer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitterPolicy {
    /// Same identity and time as the author.
    #[default]
    Author,
    /// The default identity, at the current time.
    Myself,
}

impl std::str::FromStr for CommitterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "author" => Ok(Self::Author),
            "self" | "me" => Ok(Self::Myself),
            _ => Err(format!("Unknown committer policy: {} (expected author or self)", s)),
        }
    }
}

/// Hunks committed together under one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitGroup {
    pub author: Identity,
    /// Latest original timestamp among the hunks, if any had one.
    pub when: Option<DateTime<FixedOffset>>,
    pub hunks: Vec<AttributedHunk>,
}

impl CommitGroup {
    fn new(first: AttributedHunk) -> Self {
        Self {
            author: first.author.clone(),
            when: first.when,
            hunks: vec![first],
        }
    }

    fn push(&mut self, hunk: AttributedHunk) {
        self.when = self.when.max(hunk.when);
        self.hunks.push(hunk);
    }

    /// Distinct paths touched by the group, in order of appearance.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for hunk in &self.hunks {
            if !paths.contains(&hunk.path) {
                paths.push(hunk.path.clone());
            }
        }
        paths
    }
}

/// Gather attributed hunks into commit groups.
///
/// Groups appear in the order their first hunk appears in `hunks`, and each
/// group keeps its hunks in input order.
pub fn group_hunks(hunks: Vec<AttributedHunk>, policy: GroupingPolicy) -> Vec<CommitGroup> {
    let mut groups: Vec<CommitGroup> = Vec::new();
    for hunk in hunks {
        let existing = match policy {
            GroupingPolicy::Author => groups.iter_mut().find(|g| g.author == hunk.author),
            GroupingPolicy::Run => groups.last_mut().filter(|g| g.author == hunk.author),
        };
        match existing {
            Some(group) => group.push(hunk),
            None => groups.push(CommitGroup::new(hunk)),
        }
    }
    groups
}

/// Commit message template with `{author}` and `{files}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate(String);

impl MessageTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn render(&self, group: &CommitGroup) -> String {
        let paths = group.paths();
        let mut files = paths
            .iter()
            .take(MAX_LISTED_FILES)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if paths.len() > MAX_LISTED_FILES {
            files.push_str(&format!(" and {} more", paths.len() - MAX_LISTED_FILES));
        }

        self.0
            .replace("{author}", &group.author.name)
            .replace("{files}", &files)
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE)
    }
}

/// Everything the sequencer needs besides the groups themselves.
#[derive(Debug, Clone)]
pub struct SequenceOptions {
    /// Identity used when the committer policy is [`CommitterPolicy::Myself`].
    pub default_identity: Identity,
    pub timestamps: TimestampPolicy,
    pub committer: CommitterPolicy,
    pub message: MessageTemplate,
}

/// Commit `groups` in order on top of `HEAD`.
///
/// `patch` is the split patch set the hunks' file and hunk indices refer to.
/// `cancel` is checked before each group and `on_commit` sees every commit
/// as it lands. Only a failure to open the session is returned as an error;
/// per-group failures end up in the report.
pub fn commit_groups(
    repo: &Repository,
    patch: &PatchSet,
    groups: &[CommitGroup],
    opts: &SequenceOptions,
    cancel: &AtomicBool,
    mut on_commit: impl FnMut(&GroupSummary),
) -> Result<RunReport, CommitError> {
    let mut report = RunReport::default();
    let mut session = IndexSession::open(repo, patch)?;

    let mut remaining = groups.iter();
    while let Some(group) = remaining.next() {
        let mut summary = GroupSummary::from_group(group);

        if cancel.load(Ordering::SeqCst) {
            warn!("Interrupted before committing {}", group.author);
            report.interrupted = true;
            report.not_attempted.push(summary);
            report.not_attempted.extend(remaining.by_ref().map(GroupSummary::from_group));
            break;
        }

        let message = opts.message.render(group);
        match session.commit_group(group, &message, opts) {
            Ok(oid) => {
                summary.commit = Some(oid.to_string());
                on_commit(&summary);
                report.committed.push(summary);
            }
            Err(e) => {
                warn!("Stopping at group by {}: {}", group.author, e);
                report.failed = Some(FailedGroup {
                    group: summary,
                    error: e.to_string(),
                });
                report.not_attempted.extend(remaining.by_ref().map(GroupSummary::from_group));
                break;
            }
        }
    }

    if let Err(e) = session.finish() {
        warn!("{e}; run `git reset -q` to refresh the index");
    }
    debug!(
        "Sequence done: {} committed, {} not attempted",
        report.committed.len(),
        report.not_attempted.len()
    );
    Ok(report)
}
