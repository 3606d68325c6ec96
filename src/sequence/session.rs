//! The index session: builds and commits one tree per group.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use git2::{Commit, ErrorCode, Index, IndexEntry, IndexTime, Oid, Repository, Signature, Time, Tree};
use tracing::{debug, warn};

use super::{CommitGroup, CommitterPolicy, SequenceOptions, TimestampPolicy, apply_hunks};
use crate::attribution::Identity;
use crate::diff::collect::resolve_head_tree;
use crate::diff::{ChangeKind, FilePatch, PatchSet};
use crate::error::CommitError;

const DEFAULT_FILE_MODE: u32 = 0o100644;

/// Exclusive handle on the commit sequence for one run.
///
/// Every commit tree is built in memory from the current tip; file content is
/// recomputed from the original `HEAD` blob plus all hunks applied so far.
/// When the session ends, by [`IndexSession::finish`] or by drop, the on-disk
/// index entries of every committed path are reset to the new `HEAD` so the
/// changes not yet committed show up as unstaged.
pub struct IndexSession<'repo, 'p> {
    repo: &'repo Repository,
    patch: &'p PatchSet,
    base: Option<Tree<'repo>>,
    tip: Option<Oid>,
    applied: BTreeMap<usize, BTreeSet<usize>>,
    /// Blob each written path should hold at the tip (`None` = removed).
    expected: HashMap<String, Option<Oid>>,
    committed_paths: BTreeSet<String>,
    finished: bool,
}

impl<'repo, 'p> IndexSession<'repo, 'p> {
    /// Start a session on top of the current `HEAD`.
    ///
    /// Hunk indices of the groups later passed in refer to `patch`.
    pub fn open(repo: &'repo Repository, patch: &'p PatchSet) -> Result<Self, CommitError> {
        let base = resolve_head_tree(repo).map_err(CommitError::RepositoryState)?;
        let tip = current_head(repo)?;
        debug!("Opened index session at {:?}", tip);
        Ok(Self {
            repo,
            patch,
            base,
            tip,
            applied: BTreeMap::new(),
            expected: HashMap::new(),
            committed_paths: BTreeSet::new(),
            finished: false,
        })
    }

    /// The commit the next group will be built on.
    pub fn tip(&self) -> Option<Oid> {
        self.tip
    }

    /// Commit `group` on top of the tip and move `HEAD` to the new commit.
    ///
    /// Nothing changes when an error is returned.
    pub fn commit_group(
        &mut self,
        group: &CommitGroup,
        message: &str,
        opts: &SequenceOptions,
    ) -> Result<Oid, CommitError> {
        let head = current_head(self.repo)?;
        if head != self.tip {
            return Err(CommitError::conflict(
                "HEAD",
                format!("moved from {} to {}", describe(self.tip), describe(head)),
            ));
        }

        let mut applied = self.applied.clone();
        let mut touched = BTreeSet::new();
        for hunk in &group.hunks {
            applied.entry(hunk.file).or_default().insert(hunk.index);
            touched.insert(hunk.file);
        }

        let parent = self
            .tip
            .map(|oid| self.repo.find_commit(oid))
            .transpose()
            .map_err(CommitError::RepositoryState)?;
        let tip_tree = parent
            .as_ref()
            .map(Commit::tree)
            .transpose()
            .map_err(CommitError::RepositoryState)?;

        let mut index = Index::new().map_err(CommitError::WriteFailed)?;
        if let Some(tree) = &tip_tree {
            index.read_tree(tree).map_err(CommitError::WriteFailed)?;
        }

        let mut updates = Vec::new();
        for file_idx in touched {
            let Some(file) = self.patch.files.get(file_idx) else {
                return Err(CommitError::conflict(
                    "?",
                    format!("no file #{file_idx} in the patch"),
                ));
            };
            let indices = applied.get(&file_idx).cloned().unwrap_or_default();
            updates.extend(self.stage_file(&mut index, tip_tree.as_ref(), file, &indices)?);
        }

        let tree_id = index.write_tree_to(self.repo).map_err(CommitError::WriteFailed)?;
        let tree = self.repo.find_tree(tree_id).map_err(CommitError::WriteFailed)?;

        let when = match opts.timestamps {
            TimestampPolicy::Original => group.when,
            TimestampPolicy::Now => None,
        };
        let author = signature(&group.author, when).map_err(CommitError::CommitFailed)?;
        let committer = match opts.committer {
            CommitterPolicy::Author => author.clone(),
            CommitterPolicy::Myself => {
                signature(&opts.default_identity, None).map_err(CommitError::CommitFailed)?
            }
        };

        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &author, &committer, message, &tree, &parents)
            .map_err(CommitError::CommitFailed)?;

        self.tip = Some(oid);
        self.applied = applied;
        for (path, blob) in updates {
            self.committed_paths.insert(path.clone());
            self.expected.insert(path, blob);
        }
        Ok(oid)
    }

    /// Write the new content of `file` into `index`.
    ///
    /// Returns the paths written or removed with their new blob ids.
    fn stage_file(
        &self,
        index: &mut Index,
        tip_tree: Option<&Tree<'_>>,
        file: &FilePatch,
        indices: &BTreeSet<usize>,
    ) -> Result<Vec<(String, Option<Oid>)>, CommitError> {
        let path = file.path();
        let old_path = match file.kind {
            ChangeKind::Added => None,
            _ => file.old_path.as_deref(),
        };

        let (original, base_mode) = match old_path {
            Some(old) => self.original_content(old)?,
            None => (String::new(), None),
        };

        let mut hunks = Vec::with_capacity(indices.len());
        for &i in indices {
            let hunk = file.hunks.get(i).ok_or_else(|| {
                CommitError::conflict(path, format!("no hunk #{i} in the patch"))
            })?;
            hunks.push(hunk);
        }
        let content = apply_hunks(path, &original, hunks)?;

        let mut updates = Vec::new();
        let target = file.new_path.as_deref();

        if let Some(old) = old_path.filter(|old| Some(*old) != target) {
            self.verify_tip(old, tip_tree)?;
            if index.get_path(Path::new(old), 0).is_some() {
                index.remove(Path::new(old), 0).map_err(CommitError::WriteFailed)?;
            }
            updates.push((old.to_string(), None));
        }

        // Deleted files keep shrinking content until their last hunk lands.
        let write_to = match target {
            Some(new) => Some(new),
            None if indices.len() < file.hunks.len() => old_path,
            None => None,
        };

        if let Some(dest) = write_to {
            self.verify_tip(dest, tip_tree)?;
            updates.retain(|(p, _)| p != dest);

            let blob = self.repo.blob(content.as_bytes()).map_err(CommitError::WriteFailed)?;
            let mode = file.new_mode.or(base_mode).unwrap_or(DEFAULT_FILE_MODE);
            index
                .add(&index_entry(dest, mode, blob))
                .map_err(CommitError::WriteFailed)?;
            updates.push((dest.to_string(), Some(blob)));
            debug!("Staged {} ({} of {} hunks)", dest, indices.len(), file.hunks.len());
        }

        Ok(updates)
    }

    /// Content and mode of `path` in the original `HEAD`.
    fn original_content(&self, path: &str) -> Result<(String, Option<u32>), CommitError> {
        let Some(base) = &self.base else {
            return Err(CommitError::conflict(path, "repository has no commits"));
        };
        let entry = base
            .get_path(Path::new(path))
            .map_err(|_| CommitError::conflict(path, "not present in HEAD"))?;
        let blob = self
            .repo
            .find_blob(entry.id())
            .map_err(|_| CommitError::conflict(path, "not a regular file in HEAD"))?;
        let text = std::str::from_utf8(blob.content())
            .map_err(|_| CommitError::conflict(path, "original content is not valid UTF-8"))?;
        Ok((text.to_string(), Some(entry.filemode() as u32)))
    }

    /// Check that the tip holds what this session last wrote to `path`.
    fn verify_tip(&self, path: &str, tip_tree: Option<&Tree<'_>>) -> Result<(), CommitError> {
        let expected = match self.expected.get(path) {
            Some(blob) => *blob,
            None => entry_id(self.base.as_ref(), path),
        };
        let actual = entry_id(tip_tree, path);
        if actual != expected {
            return Err(CommitError::conflict(
                path,
                format!(
                    "tip holds {} where {} was expected",
                    describe(actual),
                    describe(expected)
                ),
            ));
        }
        Ok(())
    }

    /// End the session, syncing the on-disk index.
    pub fn finish(mut self) -> Result<(), CommitError> {
        self.finished = true;
        self.sync_index()
    }

    fn sync_index(&self) -> Result<(), CommitError> {
        if self.committed_paths.is_empty() || self.repo.is_bare() {
            return Ok(());
        }
        let Some(tip) = self.tip else {
            return Ok(());
        };

        let tree = self
            .repo
            .find_commit(tip)
            .and_then(|c| c.tree())
            .map_err(CommitError::IndexSyncFailed)?;
        let mut index = self.repo.index().map_err(CommitError::IndexSyncFailed)?;

        for path in &self.committed_paths {
            match tree.get_path(Path::new(path)) {
                Ok(entry) => index
                    .add(&index_entry(path, entry.filemode() as u32, entry.id()))
                    .map_err(CommitError::IndexSyncFailed)?,
                Err(e) if e.code() == ErrorCode::NotFound => {
                    if index.get_path(Path::new(path), 0).is_some() {
                        index
                            .remove(Path::new(path), 0)
                            .map_err(CommitError::IndexSyncFailed)?;
                    }
                }
                Err(e) => return Err(CommitError::IndexSyncFailed(e)),
            }
        }

        index.write().map_err(CommitError::IndexSyncFailed)?;
        debug!("Synced {} index entries to {}", self.committed_paths.len(), tip);
        Ok(())
    }
}

impl Drop for IndexSession<'_, '_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.sync_index() {
            warn!("{e}; run `git reset -q` to refresh the index");
        }
    }
}

fn current_head(repo: &Repository) -> Result<Option<Oid>, CommitError> {
    match repo.head() {
        Ok(head) => Ok(head.target()),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(CommitError::RepositoryState(e)),
    }
}

fn entry_id(tree: Option<&Tree<'_>>, path: &str) -> Option<Oid> {
    tree.and_then(|t| t.get_path(Path::new(path)).ok())
        .map(|entry| entry.id())
}

fn describe(oid: Option<Oid>) -> String {
    oid.map(|o| o.to_string()).unwrap_or_else(|| "nothing".to_string())
}

fn signature(
    identity: &Identity,
    when: Option<DateTime<FixedOffset>>,
) -> Result<Signature<'static>, git2::Error> {
    match when {
        Some(t) => Signature::new(
            &identity.name,
            &identity.email,
            &Time::new(t.timestamp(), t.offset().local_minus_utc() / 60),
        ),
        None => Signature::now(&identity.name, &identity.email),
    }
}

/// Index entry with zeroed stat data, forcing git to re-read the file.
fn index_entry(path: &str, mode: u32, id: Oid) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode,
        uid: 0,
        gid: 0,
        file_size: 0,
        id,
        flags: path.len().min(0xfff) as u16,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}
