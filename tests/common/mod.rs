//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::AtomicBool;

use git2::{Oid, Repository, Signature, Time};

use silent_committer::attribution::{Git2Blame, Identity};
use silent_committer::config::{Config, Overrides};
use silent_committer::diff::collect_pending_diff;
use silent_committer::pipeline::{Plan, execute, plan};
use silent_committer::sequence::RunReport;

/// Identity used for added lines in tests.
pub fn me() -> Identity {
    Identity::new("Default Dev", "default@example.com")
}

pub fn alice() -> Identity {
    Identity::new("Alice", "alice@example.com")
}

pub fn bob() -> Identity {
    Identity::new("Bob", "bob@example.com")
}

/// Numbered lines `"line 1\n"` .. `"line n\n"`.
pub fn numbered(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("line {i}\n")).collect()
}

/// Resolve a config that does not depend on the machine's git config.
pub fn config_with(overrides: Overrides) -> Config {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("config");
    std::fs::write(&path, "").expect("Failed to write config file");
    let git = git2::Config::open(&path).expect("Failed to open config");
    let overrides = Overrides {
        default_author: overrides.default_author.or_else(|| Some(me())),
        ..overrides
    };
    Config::resolve(&git, overrides).expect("Failed to resolve config")
}

/// A test git repository builder for integration tests.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
    pub repo: Repository,
}

impl TestRepo {
    /// Create a new empty git repository in a temp directory.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let repo = Repository::init(dir.path()).expect("Failed to init git repo");
        Self { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file in the working tree without staging it.
    pub fn write(&self, name: &str, contents: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directories");
        }
        std::fs::write(path, contents).expect("Failed to write file");
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Write `files`, stage them and commit as `author` at `seconds`.
    pub fn commit_as(&self, author: &Identity, seconds: i64, files: &[(&str, &str)]) -> Oid {
        let sig = Signature::new(&author.name, &author.email, &Time::new(seconds, 0))
            .expect("Failed to create signature");

        let mut index = self.repo.index().expect("Failed to get index");
        for (name, contents) in files {
            self.write(name, contents);
            index.add_path(Path::new(name)).expect("Failed to add file");
        }
        index.write().expect("Failed to write index");
        let tree_id = index.write_tree().expect("Failed to write tree");
        let tree = self.repo.find_tree(tree_id).expect("Failed to find tree");

        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &sig, &sig, "seed", &tree, &parents)
            .expect("Failed to create commit")
    }

    pub fn head(&self) -> Oid {
        self.repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map(|c| c.id())
            .expect("Failed to resolve HEAD")
    }

    /// Commits from HEAD back to (excluding) `since`, oldest first.
    pub fn commits_since(&self, since: Oid) -> Vec<git2::Commit<'_>> {
        let mut walk = self.repo.revwalk().expect("Failed to create revwalk");
        walk.push_head().expect("Failed to push HEAD");
        walk.hide(since).expect("Failed to hide base");
        let mut commits: Vec<git2::Commit<'_>> = walk
            .map(|oid| self.repo.find_commit(oid.expect("revwalk error")).expect("missing commit"))
            .collect();
        commits.reverse();
        commits
    }

    /// Content of `name` at HEAD.
    pub fn head_content(&self, name: &str) -> String {
        let tree = self.repo.head().unwrap().peel_to_tree().unwrap();
        let entry = tree.get_path(Path::new(name)).expect("path not in HEAD");
        let blob = self.repo.find_blob(entry.id()).unwrap();
        String::from_utf8(blob.content().to_vec()).unwrap()
    }

    /// Collect, parse and plan the pending diff.
    pub fn plan(&self, config: &Config) -> Plan {
        let patch = collect_pending_diff(&self.repo, true)
            .expect("Failed to collect diff")
            .parse()
            .expect("Failed to parse diff");
        let blame = Git2Blame::new(&self.repo);
        plan(&patch, config, &blame)
    }

    /// Plan and commit the pending diff.
    pub fn run(&self, config: &Config) -> RunReport {
        let plan = self.plan(config);
        execute(&self.repo, &plan, config, &AtomicBool::new(false)).expect("Failed to execute")
    }
}
