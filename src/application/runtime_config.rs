use std::path::PathBuf;

use snafu::{OptionExt, ResultExt, Snafu};

use crate::application::data::LogLevel;
use crate::cli::Cli;
use crate::config::{ProfileError, SyncProfile};

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub source: PathBuf,
    pub replica: PathBuf,
    pub log: Option<PathBuf>,
    pub repeat: Option<String>,
    pub log_level: LogLevel,
    /// Profile keys that were ignored, to be reported once logging is up.
    pub ignored_profile_keys: Vec<String>,
}

impl RuntimeConfig {
    /// Reads the profile named by `--config`, if any, and merges it under the
    /// command line.
    pub async fn load(cli: Cli) -> Result<Self, RuntimeConfigError> {
        let profile = match &cli.config {
            Some(path) => SyncProfile::from_path(path).await.context(ProfileSnafu)?,
            None => SyncProfile::default(),
        };
        Self::merge(cli, profile)
    }

    /// Command-line values win over profile values.
    pub fn merge(cli: Cli, profile: SyncProfile) -> Result<Self, RuntimeConfigError> {
        Ok(Self {
            source: cli.source.or(profile.source).context(MissingSnafu {
                what: "source directory",
            })?,
            replica: cli.replica.or(profile.replica).context(MissingSnafu {
                what: "replica directory",
            })?,
            log: cli.log.or(profile.log),
            repeat: cli.repeat.or(profile.repeat),
            log_level: cli.log_level.or(profile.log_level).unwrap_or_default(),
            ignored_profile_keys: profile.unknown_keys,
        })
    }
}

#[derive(Debug, Snafu)]
pub enum RuntimeConfigError {
    #[snafu(display("Failed to load the profile"))]
    ProfileError { source: ProfileError },
    #[snafu(display("No {} given on the command line or in the profile", what))]
    MissingError { what: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("foldsync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_line_alone_is_enough() {
        let config = RuntimeConfig::merge(cli(&["a", "b"]), SyncProfile::default()).unwrap();

        assert_eq!(config.source, PathBuf::from("a"));
        assert_eq!(config.replica, PathBuf::from("b"));
        assert_eq!(config.log, None);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn command_line_overrides_profile() {
        let profile = SyncProfile {
            source: Some(PathBuf::from("/profile/src")),
            replica: Some(PathBuf::from("/profile/dst")),
            log: Some(PathBuf::from("/profile/log")),
            repeat: Some("@daily".to_string()),
            log_level: Some(LogLevel::Error),
            unknown_keys: vec!["colour".to_string()],
        };

        let config = RuntimeConfig::merge(cli(&["/cli/src", "-L", "debug"]), profile).unwrap();

        assert_eq!(config.source, PathBuf::from("/cli/src"));
        assert_eq!(config.replica, PathBuf::from("/profile/dst"));
        assert_eq!(config.log, Some(PathBuf::from("/profile/log")));
        assert_eq!(config.repeat.as_deref(), Some("@daily"));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.ignored_profile_keys, vec!["colour"]);
    }

    #[test]
    fn missing_replica_is_an_error() {
        let result = RuntimeConfig::merge(cli(&["only-source"]), SyncProfile::default());

        assert!(matches!(
            result,
            Err(RuntimeConfigError::MissingError {
                what: "replica directory"
            })
        ));
    }

    #[compio::test]
    async fn load_reads_profile_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let profile = dir.path().join("foldsync.yaml");
        std::fs::write(&profile, "source: /from/profile\nreplica: /to/profile\n").unwrap();

        let config = RuntimeConfig::load(cli(&["--config", profile.to_str().unwrap()]))
            .await
            .unwrap();

        assert_eq!(config.source, PathBuf::from("/from/profile"));
        assert_eq!(config.replica, PathBuf::from("/to/profile"));
    }
}
