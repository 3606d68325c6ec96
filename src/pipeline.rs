//! The end-to-end run: split, attribute, group, then commit.

use std::fmt;
use std::sync::atomic::AtomicBool;

use git2::Repository;
use tracing::{debug, info, warn};

use crate::attribution::{
    AttributionResolver, BlameBackend, BlameSource, CliBlame, Git2Blame,
};
use crate::config::Config;
use crate::diff::{PatchSet, split_diff};
use crate::error::CommitError;
use crate::sequence::{
    CommitGroup, GroupSummary, RunReport, SequenceOptions, SkippedFile, commit_groups, group_hunks,
};

/// What a run is going to commit.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The pending diff with every hunk split to the configured bound.
    pub patch: PatchSet,
    pub groups: Vec<CommitGroup>,
    pub skipped: Vec<SkippedFile>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn hunk_count(&self) -> usize {
        self.groups.iter().map(|g| g.hunks.len()).sum()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} hunk(s) in {} commit(s):",
            self.hunk_count(),
            self.groups.len()
        )?;
        for (n, group) in self.groups.iter().enumerate() {
            writeln!(f, "  {}. {}", n + 1, GroupSummary::from_group(group))?;
        }
        for skipped in &self.skipped {
            writeln!(f, "  [SKIP] {} ({})", skipped.path, skipped.reason)?;
        }
        Ok(())
    }
}

/// Split, attribute and group the hunks of `patch`.
pub fn plan(patch: &PatchSet, config: &Config, blame: &dyn BlameSource) -> Plan {
    let resolver = AttributionResolver::new(
        blame,
        config.default_identity.clone(),
        config.insertions,
    );

    let mut split = patch.clone();
    let mut skipped = Vec::new();
    for file in &mut split.files {
        file.hunks.clear();
        if let Some(reason) = file.skip_reason() {
            warn!("Skipping {} ({reason}); it stays in the working tree", file.path());
            skipped.push(SkippedFile {
                path: file.path().to_string(),
                reason: reason.to_string(),
            });
        }
    }

    let mut attributed = Vec::new();
    for (file_idx, piece) in split_diff(patch, config.max_hunk_size) {
        let original = &patch.files[file_idx];
        if !original.is_text() {
            continue;
        }
        let hunks = &mut split.files[file_idx].hunks;
        let index = hunks.len();
        hunks.push(piece.clone());
        attributed.push(resolver.attribute(file_idx, index, original, piece));
    }

    let groups = group_hunks(attributed, config.grouping);
    debug!(
        "Planned {} group(s) from {} piece(s)",
        groups.len(),
        split.hunk_count()
    );
    Plan {
        patch: split,
        groups,
        skipped,
    }
}

/// Commit every group of `plan`, stopping at the first failure.
pub fn execute(
    repo: &Repository,
    plan: &Plan,
    config: &Config,
    cancel: &AtomicBool,
) -> Result<RunReport, CommitError> {
    execute_with(repo, plan, config, cancel, |_| {})
}

/// [`execute`], calling `on_commit` after each commit lands.
pub fn execute_with(
    repo: &Repository,
    plan: &Plan,
    config: &Config,
    cancel: &AtomicBool,
    mut on_commit: impl FnMut(&GroupSummary),
) -> Result<RunReport, CommitError> {
    let opts = SequenceOptions {
        default_identity: config.default_identity.clone(),
        timestamps: config.timestamps,
        committer: config.committer,
        message: config.message.clone(),
    };
    let mut report = commit_groups(repo, &plan.patch, &plan.groups, &opts, cancel, |summary| {
        info!(
            "Committed {} as {}",
            summary.commit.as_deref().unwrap_or_default(),
            summary.author
        );
        on_commit(summary);
    })?;
    report.skipped_files = plan.skipped.clone();
    Ok(report)
}

/// Build the configured blame backend.
///
/// Falls back to libgit2 when the `git` binary cannot be used.
pub fn blame_source<'repo>(
    repo: &'repo Repository,
    backend: BlameBackend,
) -> Box<dyn BlameSource + 'repo> {
    match backend {
        BlameBackend::Libgit2 => Box::new(Git2Blame::new(repo)),
        BlameBackend::Git => match CliBlame::new(repo) {
            Ok(cli) => Box::new(cli),
            Err(e) => {
                warn!("{e}; using libgit2 blame instead");
                Box::new(Git2Blame::new(repo))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::blame::MockBlameSource;
    use crate::attribution::{BlamedLine, Identity, InsertionPolicy};
    use crate::diff::MaxHunkSize;
    use crate::sequence::{CommitterPolicy, GroupingPolicy, MessageTemplate, TimestampPolicy};

    fn config(max: usize) -> Config {
        Config {
            max_hunk_size: MaxHunkSize::new(max).unwrap(),
            default_identity: Identity::new("Me", "me@example.com"),
            grouping: GroupingPolicy::Author,
            insertions: InsertionPolicy::Default,
            timestamps: TimestampPolicy::Original,
            committer: CommitterPolicy::Author,
            blame: BlameBackend::Libgit2,
            message: MessageTemplate::default(),
        }
    }

    fn by_line(line: usize) -> Option<Identity> {
        if line <= 5 {
            Some(Identity::new("Alice", "alice@example.com"))
        } else {
            Some(Identity::new("Bob", "bob@example.com"))
        }
    }

    fn mock() -> MockBlameSource {
        let mut mock = MockBlameSource::new();
        mock.expect_blame().returning(|_, range| {
            Ok((range.start..=range.end)
                .map(|line| BlamedLine {
                    line,
                    author: by_line(line),
                    when: None,
                })
                .collect())
        });
        mock
    }

    const PATCH: &str = "\
diff --git a/src/a.rs b/src/a.rs
--- a/src/a.rs
+++ b/src/a.rs
@@ -2 +2 @@
-x
+X
@@ -9 +9 @@
-y
+Y
@@ -12,0 +13,2 @@
+new
+lines
diff --git a/logo.png b/logo.png
index 1111111..2222222 100644
Binary files a/logo.png and b/logo.png differ
";

    #[test]
    fn test_plan_groups_by_blamed_author() {
        let patch = PatchSet::parse(PATCH).unwrap();
        let mock = mock();
        let plan = plan(&patch, &config(50), &mock);

        let authors: Vec<&str> = plan.groups.iter().map(|g| g.author.name.as_str()).collect();
        assert_eq!(authors, vec!["Alice", "Bob", "Me"]);
        assert_eq!(plan.hunk_count(), 3);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].path, "logo.png");
        assert_eq!(plan.skipped[0].reason, "binary change");
    }

    #[test]
    fn test_plan_indices_address_split_patch() {
        let patch = PatchSet::parse(PATCH).unwrap();
        let mock = mock();
        let plan = plan(&patch, &config(1), &mock);

        // the insertion of two lines becomes two pieces
        assert_eq!(plan.patch.files[0].hunks.len(), 4);
        for group in &plan.groups {
            for h in &group.hunks {
                assert_eq!(plan.patch.files[h.file].hunks[h.index], h.hunk);
            }
        }
        assert!(plan.patch.files[1].hunks.is_empty());
    }

    #[test]
    fn test_plan_display() {
        let patch = PatchSet::parse(PATCH).unwrap();
        let mock = mock();
        let text = plan(&patch, &config(50), &mock).to_string();
        assert!(text.starts_with("3 hunk(s) in 3 commit(s):"));
        assert!(text.contains("1. Alice <alice@example.com> (1 hunk in src/a.rs)"));
        assert!(text.contains("[SKIP] logo.png (binary change)"));
    }
}
