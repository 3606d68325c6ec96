//! silent-committer - commits pending changes as the authors of the lines they touch.
//!
//! # Overview
//!
//! The pending working-tree diff is split into hunks of bounded size, each
//! hunk is attributed through blame to whoever last touched the lines it
//! modifies, hunks are grouped per author, and every group is committed with
//! that author's identity and original timestamp.
//!
//! The stages live in their own modules: [`diff`] collects, parses and
//! splits, [`attribution`] blames, [`sequence`] groups and commits.
//! [`pipeline`] ties them together.

pub mod attribution;
pub mod config;
pub mod diff;
pub mod error;
pub mod pipeline;
pub mod sequence;

// Re-export commonly used types
pub use attribution::{AttributedHunk, BlameBackend, BlameSource, Identity, InsertionPolicy};
pub use config::{Config, Overrides};
pub use diff::{Hunk, MaxHunkSize, PatchSet};
pub use error::{AttributionError, CommitError, ConfigError, DiffError};
pub use pipeline::{Plan, execute, plan};
pub use sequence::{CommitGroup, CommitterPolicy, GroupingPolicy, RunReport, TimestampPolicy};
