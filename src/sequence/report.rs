//! Run summary: what was committed, what failed, what was left alone.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use super::CommitGroup;
use crate::attribution::Identity;

/// Exit code for an interrupted run (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

/// One commit group as it appears in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub author: Identity,
    pub when: Option<DateTime<FixedOffset>>,
    pub files: Vec<String>,
    pub hunks: usize,
    /// Commit id, set once the group is committed.
    pub commit: Option<String>,
}

impl GroupSummary {
    pub fn from_group(group: &CommitGroup) -> Self {
        Self {
            author: group.author.clone(),
            when: group.when,
            files: group.paths(),
            hunks: group.hunks.len(),
            commit: None,
        }
    }
}

impl fmt::Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(commit) = &self.commit {
            write!(f, "{} ", &commit[..commit.len().min(8)])?;
        }
        write!(
            f,
            "{} ({} hunk{} in {})",
            self.author,
            self.hunks,
            if self.hunks == 1 { "" } else { "s" },
            self.files.join(", ")
        )
    }
}

/// The group that stopped the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedGroup {
    pub group: GroupSummary,
    pub error: String,
}

/// A file patch that cannot be committed hunk by hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Outcome of a run. Every planned group ends up in exactly one of
/// `committed`, `failed` or `not_attempted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub committed: Vec<GroupSummary>,
    pub failed: Option<FailedGroup>,
    pub not_attempted: Vec<GroupSummary>,
    pub skipped_files: Vec<SkippedFile>,
    pub interrupted: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none() && !self.interrupted
    }

    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.failed.is_some() {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in &self.committed {
            writeln!(f, "  [DONE] {group}")?;
        }
        if let Some(failed) = &self.failed {
            writeln!(f, "  [FAIL] {}: {}", failed.group, failed.error)?;
        }
        for group in &self.not_attempted {
            writeln!(f, "  [SKIP] {group} (not attempted)")?;
        }
        for skipped in &self.skipped_files {
            writeln!(
                f,
                "  [SKIP] {} ({}, left in working tree)",
                skipped.path, skipped.reason
            )?;
        }
        if self.interrupted {
            writeln!(f, "Interrupted; repository left at the last completed commit.")?;
        }
        write!(
            f,
            "{} committed, {} failed, {} not attempted",
            self.committed.len(),
            usize::from(self.failed.is_some()),
            self.not_attempted.len()
        )
    }
}
