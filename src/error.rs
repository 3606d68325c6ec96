//! Error types for silent-committer modules using thiserror.

use thiserror::Error;

/// Errors from obtaining or parsing the pending diff.
#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Malformed diff at line {line}: {reason}")]
    MalformedDiff { line: usize, reason: String },

    #[error("No pending changes (working tree matches HEAD)")]
    NoChanges,

    #[error("Failed to collect diff: {0}")]
    CollectFailed(#[source] git2::Error),

    #[error("Failed to read patch {path}: {source}")]
    ReadPatch {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Maximum hunk size must be at least 1")]
    ZeroHunkSize,
}

impl DiffError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedDiff {
            line,
            reason: reason.into(),
        }
    }
}

/// Errors from historical line-authorship lookups.
///
/// These never abort a run: the resolver downgrades them to the default
/// identity and logs a warning.
#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("Attribution unavailable for {path}: {reason}")]
    AttributionUnavailable { path: String, reason: String },

    #[error("`git` executable not found in PATH")]
    GitNotInstalled,

    #[error("Failed to spawn git blame: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Unparseable blame output: {0}")]
    InvalidPorcelain(String),
}

impl AttributionError {
    pub(crate) fn unavailable(path: &str, reason: impl ToString) -> Self {
        Self::AttributionUnavailable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors from applying commit groups to the repository.
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Apply conflict in {path}: {reason}")]
    ApplyConflict { path: String, reason: String },

    #[error("Failed to read repository state: {0}")]
    RepositoryState(#[source] git2::Error),

    #[error("Failed to write objects: {0}")]
    WriteFailed(#[source] git2::Error),

    #[error("Failed to create commit: {0}")]
    CommitFailed(#[source] git2::Error),

    #[error("Failed to update the on-disk index: {0}")]
    IndexSyncFailed(#[source] git2::Error),
}

impl CommitError {
    pub(crate) fn conflict(path: &str, reason: impl Into<String>) -> Self {
        Self::ApplyConflict {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from resolving the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "No default author identity. Pass --default-author \"Name <email>\" or set user.name and user.email"
    )]
    MissingIdentity,

    #[error("Invalid identity '{0}': expected \"Name <email>\"")]
    InvalidIdentity(String),

    #[error("Invalid maximum hunk size {0}: must be a positive number of lines")]
    InvalidMaxHunkSize(i64),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to read git config: {0}")]
    GitConfig(#[source] git2::Error),
}
