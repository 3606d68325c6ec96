//! Run configuration, layered from explicit overrides, git config and defaults.
//!
//! Command-line flags and `SILENT_COMMITTER_*` environment variables arrive
//! together as [`Overrides`] (clap merges the two). Anything left unset is
//! read from the `silentcommitter.*` git config section, then falls back to
//! built-in defaults.

use git2::ErrorCode;
use tracing::debug;

use crate::attribution::{BlameBackend, Identity, InsertionPolicy};
use crate::diff::MaxHunkSize;
use crate::diff::split::DEFAULT_MAX_HUNK_SIZE;
use crate::error::ConfigError;
use crate::sequence::{CommitterPolicy, GroupingPolicy, MessageTemplate, TimestampPolicy};

const KEY_MAX_HUNK_SIZE: &str = "silentcommitter.maxHunkSize";
const KEY_DEFAULT_NAME: &str = "silentcommitter.defaultName";
const KEY_DEFAULT_EMAIL: &str = "silentcommitter.defaultEmail";
const KEY_GROUPING: &str = "silentcommitter.grouping";
const KEY_BLAME: &str = "silentcommitter.blame";
const KEY_INSERTIONS: &str = "silentcommitter.insertions";

/// Values given explicitly for this run.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_hunk_size: Option<i64>,
    pub default_author: Option<Identity>,
    pub grouping: Option<GroupingPolicy>,
    pub insertions: Option<InsertionPolicy>,
    pub timestamps: Option<TimestampPolicy>,
    pub committer: Option<CommitterPolicy>,
    pub blame: Option<BlameBackend>,
    pub message: Option<String>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_hunk_size: MaxHunkSize,
    pub default_identity: Identity,
    pub grouping: GroupingPolicy,
    pub insertions: InsertionPolicy,
    pub timestamps: TimestampPolicy,
    pub committer: CommitterPolicy,
    pub blame: BlameBackend,
    pub message: MessageTemplate,
}

impl Config {
    /// Resolve the configuration. Fails before any work is done when no
    /// identity can be found or the hunk bound is not positive.
    pub fn resolve(git: &git2::Config, overrides: Overrides) -> Result<Self, ConfigError> {
        let max = match overrides.max_hunk_size {
            Some(n) => n,
            None => get_i64(git, KEY_MAX_HUNK_SIZE)?.unwrap_or(DEFAULT_MAX_HUNK_SIZE as i64),
        };
        let max_hunk_size = usize::try_from(max)
            .ok()
            .and_then(|n| MaxHunkSize::new(n).ok())
            .ok_or(ConfigError::InvalidMaxHunkSize(max))?;

        let default_identity = match overrides.default_author {
            Some(identity) => identity,
            None => identity_from_git(git)?,
        };

        let grouping = match overrides.grouping {
            Some(g) => g,
            None => parse_key(git, KEY_GROUPING)?.unwrap_or_default(),
        };
        let blame = match overrides.blame {
            Some(b) => b,
            None => parse_key(git, KEY_BLAME)?.unwrap_or_default(),
        };
        let insertions = match overrides.insertions {
            Some(i) => i,
            None => parse_key(git, KEY_INSERTIONS)?.unwrap_or_default(),
        };

        let config = Self {
            max_hunk_size,
            default_identity,
            grouping,
            insertions,
            timestamps: overrides.timestamps.unwrap_or_default(),
            committer: overrides.committer.unwrap_or_default(),
            blame,
            message: overrides
                .message
                .map(MessageTemplate::new)
                .unwrap_or_default(),
        };
        debug!("Resolved config: {:?}", config);
        Ok(config)
    }
}

fn identity_from_git(git: &git2::Config) -> Result<Identity, ConfigError> {
    let name = match get_string(git, KEY_DEFAULT_NAME)? {
        Some(name) => Some(name),
        None => get_string(git, "user.name")?,
    };
    let email = match get_string(git, KEY_DEFAULT_EMAIL)? {
        Some(email) => Some(email),
        None => get_string(git, "user.email")?,
    };

    match (name, email) {
        (Some(name), Some(email)) if !name.trim().is_empty() && !email.trim().is_empty() => {
            Ok(Identity::new(name.trim(), email.trim()))
        }
        _ => Err(ConfigError::MissingIdentity),
    }
}

fn get_string(git: &git2::Config, key: &str) -> Result<Option<String>, ConfigError> {
    match git.get_string(key) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(ConfigError::GitConfig(e)),
    }
}

fn get_i64(git: &git2::Config, key: &str) -> Result<Option<i64>, ConfigError> {
    match git.get_i64(key) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(_) => {
            let value = get_string(git, key)?.unwrap_or_default();
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        }
    }
}

fn parse_key<T: std::str::FromStr>(git: &git2::Config, key: &str) -> Result<Option<T>, ConfigError> {
    get_string(git, key)?
        .map(|value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_config(entries: &[(&str, &str)]) -> (tempfile::TempDir, git2::Config) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "").unwrap();
        let mut config = git2::Config::open(&path).unwrap();
        for (key, value) in entries {
            config.set_str(key, value).unwrap();
        }
        (dir, config)
    }

    #[test]
    fn test_defaults_with_user_identity() {
        let (_dir, git) = git_config(&[("user.name", "Jane"), ("user.email", "jane@example.com")]);
        let config = Config::resolve(&git, Overrides::default()).unwrap();
        assert_eq!(config.max_hunk_size.get(), DEFAULT_MAX_HUNK_SIZE);
        assert_eq!(config.default_identity, Identity::new("Jane", "jane@example.com"));
        assert_eq!(config.grouping, GroupingPolicy::Author);
        assert_eq!(config.blame, BlameBackend::Libgit2);
        assert_eq!(config.message, MessageTemplate::default());
    }

    #[test]
    fn test_git_config_section_beats_defaults() {
        let (_dir, git) = git_config(&[
            ("user.name", "Jane"),
            ("user.email", "jane@example.com"),
            ("silentcommitter.maxHunkSize", "12"),
            ("silentcommitter.defaultName", "Bot"),
            ("silentcommitter.grouping", "run"),
            ("silentcommitter.blame", "git"),
            ("silentcommitter.insertions", "neighbor"),
        ]);
        let config = Config::resolve(&git, Overrides::default()).unwrap();
        assert_eq!(config.max_hunk_size.get(), 12);
        assert_eq!(config.default_identity, Identity::new("Bot", "jane@example.com"));
        assert_eq!(config.grouping, GroupingPolicy::Run);
        assert_eq!(config.blame, BlameBackend::Git);
        assert_eq!(config.insertions, InsertionPolicy::Neighbor);
    }

    #[test]
    fn test_overrides_beat_git_config() {
        let (_dir, git) = git_config(&[
            ("silentcommitter.maxHunkSize", "12"),
            ("silentcommitter.grouping", "run"),
        ]);
        let overrides = Overrides {
            max_hunk_size: Some(3),
            default_author: Some(Identity::new("Cli", "cli@example.com")),
            grouping: Some(GroupingPolicy::Author),
            message: Some("{author} did {files}".to_string()),
            ..Default::default()
        };
        let config = Config::resolve(&git, overrides).unwrap();
        assert_eq!(config.max_hunk_size.get(), 3);
        assert_eq!(config.default_identity.name, "Cli");
        assert_eq!(config.grouping, GroupingPolicy::Author);
        assert_eq!(config.message, MessageTemplate::new("{author} did {files}"));
    }

    #[test]
    fn test_missing_identity_fails() {
        let (_dir, git) = git_config(&[("user.name", "Jane")]);
        let err = Config::resolve(&git, Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingIdentity));
    }

    #[test]
    fn test_non_positive_bound_fails() {
        let (_dir, git) = git_config(&[("user.name", "J"), ("user.email", "j@example.com")]);
        for bad in [0, -4] {
            let overrides = Overrides {
                max_hunk_size: Some(bad),
                ..Default::default()
            };
            let err = Config::resolve(&git, overrides).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidMaxHunkSize(n) if n == bad));
        }
    }

    #[test]
    fn test_invalid_git_config_value() {
        let (_dir, git) = git_config(&[
            ("user.name", "J"),
            ("user.email", "j@example.com"),
            ("silentcommitter.grouping", "sideways"),
        ]);
        let err = Config::resolve(&git, Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == KEY_GROUPING));
    }
}
