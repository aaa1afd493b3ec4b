use std::path::PathBuf;

use clap::Parser;

use crate::application::data::LogLevel;

/// Make REPLICA an exact copy of SOURCE.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct Cli {
    /// Directory to copy from
    pub source: Option<PathBuf>,

    /// Directory to mirror SOURCE into
    pub replica: Option<PathBuf>,

    /// Also append log lines to this file
    #[clap(long, short)]
    pub log: Option<PathBuf>,

    /// Install a cron job re-running this sync, e.g. "*/15 * * * *"
    #[clap(long, short)]
    pub repeat: Option<String>,

    #[clap(long, short = 'L', value_enum)]
    pub log_level: Option<LogLevel>,

    /// YAML profile providing defaults for the options above
    #[clap(long, short)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_paths_and_flags() {
        let cli = Cli::try_parse_from([
            "foldsync",
            "src",
            "dst",
            "-l",
            "sync.log",
            "-r",
            "*/5 * * * *",
            "-L",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.source, Some(PathBuf::from("src")));
        assert_eq!(cli.replica, Some(PathBuf::from("dst")));
        assert_eq!(cli.log, Some(PathBuf::from("sync.log")));
        assert_eq!(cli.repeat.as_deref(), Some("*/5 * * * *"));
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn paths_may_come_from_a_profile_instead() {
        let cli = Cli::try_parse_from(["foldsync", "--config", "foldsync.yaml"]).unwrap();

        assert_eq!(cli.source, None);
        assert_eq!(cli.config, Some(PathBuf::from("foldsync.yaml")));
    }

    #[test]
    fn rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["foldsync", "a", "b", "-L", "chatty"]).is_err());
    }
}
