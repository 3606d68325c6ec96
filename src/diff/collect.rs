//! Pending diff collection from the working tree using git2.

use std::io::Read;
use std::path::Path;

use git2::{Diff, DiffFormat, DiffOptions, ErrorCode, Repository, Tree};
use tracing::{debug, warn};

use super::PatchSet;
use crate::error::DiffError;

/// Tree of `HEAD`, or `None` while the branch is unborn.
///
/// Shared by diff collection and the commit session, which wrap the error
/// in their own types.
pub(crate) fn resolve_head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, git2::Error> {
    let head_ref = match repo.head() {
        Ok(r) => r,
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let tree = head_ref.peel_to_tree()?;
    Ok(Some(tree))
}

/// The pending diff as patch text, plus the files it cannot carry faithfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingDiff {
    pub text: String,
    /// Files with changed lines that are not valid UTF-8. Their lines appear
    /// lossily converted in `text` and must never be committed from it.
    pub non_utf8_paths: Vec<String>,
}

impl PendingDiff {
    /// Parse `text`, flagging the files listed in `non_utf8_paths`.
    pub fn parse(&self) -> Result<PatchSet, DiffError> {
        let mut patch = PatchSet::parse(&self.text)?;
        for file in &mut patch.files {
            let flagged = [file.old_path.as_deref(), file.new_path.as_deref()]
                .into_iter()
                .flatten()
                .any(|p| self.non_utf8_paths.iter().any(|n| n == p));
            file.non_utf8 |= flagged;
        }
        Ok(patch)
    }
}

/// Render the pending `HEAD -> working tree` diff as unified diff text.
///
/// Staged and unstaged changes are both included (the index is consulted
/// only to speed up the comparison). Hunks carry no context lines so each
/// contiguous change is its own hunk. Fails with [`DiffError::NoChanges`]
/// when there is nothing pending.
pub fn collect_pending_diff(
    repo: &Repository,
    include_untracked: bool,
) -> Result<PendingDiff, DiffError> {
    let head_tree = resolve_head_tree(repo).map_err(DiffError::CollectFailed)?;

    let mut opts = DiffOptions::new();
    opts.context_lines(0).interhunk_lines(0);
    if include_untracked {
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .show_untracked_content(true);
    }

    let diff = repo
        .diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))
        .map_err(DiffError::CollectFailed)?;

    if diff.deltas().len() == 0 {
        return Err(DiffError::NoChanges);
    }

    let pending = render_patch(&diff)?;
    debug!(
        "Collected pending diff: {} file(s), {} bytes",
        diff.deltas().len(),
        pending.text.len()
    );
    Ok(pending)
}

/// Print a diff in patch format, keeping origin markers on content lines.
fn render_patch(diff: &Diff<'_>) -> Result<PendingDiff, DiffError> {
    let mut pending = PendingDiff::default();

    diff.print(DiffFormat::Patch, |delta, _hunk, line| {
        let origin = line.origin();
        if matches!(origin, '+' | '-' | ' ') {
            pending.text.push(origin);
        }
        match std::str::from_utf8(line.content()) {
            Ok(content) => pending.text.push_str(content),
            Err(_) => {
                let path = delta
                    .new_file()
                    .path()
                    .or(delta.old_file().path())
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if origin == 'F' {
                    warn!("Non UTF-8 bytes in the header of {path}; they will be replaced");
                } else if !pending.non_utf8_paths.contains(&path) {
                    warn!("Non UTF-8 content in {path}; it will not be committed");
                    pending.non_utf8_paths.push(path);
                }
                pending.text.push_str(&String::from_utf8_lossy(line.content()));
            }
        }
        true
    })
    .map_err(DiffError::CollectFailed)?;

    Ok(pending)
}

/// Read a patch from a file, or from stdin when `path` is `-`.
pub fn read_patch_file(path: &Path) -> Result<String, DiffError> {
    let display = path.display().to_string();
    let mut text = String::new();
    if display == "-" {
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|source| DiffError::ReadPatch { path: display, source })?;
    } else {
        text = std::fs::read_to_string(path)
            .map_err(|source| DiffError::ReadPatch { path: display, source })?;
    }
    Ok(text)
}
