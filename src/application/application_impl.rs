use snafu::Snafu;
use snafu::prelude::*;
use tracing::{debug, error, info, warn};

use crate::application::{RuntimeConfig, RuntimeConfigError};
use crate::scheduler::{CronSchedule, CrontabInstaller, JobCommand};
use crate::sync::{SyncError, SyncReport, SyncRunner, TracingEvents};

pub struct Application;

impl Application {
    pub async fn run(config: impl Into<RuntimeConfig>) -> Result<SyncReport, ApplicationError> {
        let config: RuntimeConfig = config.into();
        info!("Starting application");
        for key in &config.ignored_profile_keys {
            debug!("Skipping unknown profile key: {}", key);
        }
        let runner = SyncRunner::new(TracingEvents);

        info!("Validating directories");
        runner
            .validate(&config.source, &config.replica)
            .context(SyncSnafu)?;

        if let Some(expression) = &config.repeat {
            Self::install_schedule(expression, &config, &CrontabInstaller::default()).await;
        }

        info!("Starting synchronization");
        let report = runner
            .reconcile(&config.source, &config.replica)
            .context(SyncSnafu)?;

        if report.is_converged() && report.actions() == 0 {
            info!("Replica already up to date");
        } else if report.is_converged() {
            info!("Synchronization successful: {}", report);
        } else {
            warn!(
                "Synchronization incomplete, {} entries will be retried on the next run: {}",
                report.failures, report
            );
        }
        Ok(report)
    }

    /// Failures here are logged and never stop the immediate sync.
    async fn install_schedule(
        expression: &str,
        config: &RuntimeConfig,
        installer: &CrontabInstaller,
    ) {
        info!("Installing job to run at '{}' interval", expression);

        let schedule = match CronSchedule::parse(expression) {
            Ok(schedule) => schedule,
            Err(err) => {
                error!(
                    "This cron syntax '{}' is not valid: {}",
                    expression,
                    snafu::Report::from_error(err)
                );
                error!("Sync will not run repeatedly");
                return;
            }
        };

        let program = match std::env::current_exe() {
            Ok(program) => program,
            Err(err) => {
                error!("Cannot determine the path of this executable: {}", err);
                error!("Sync will not run repeatedly");
                return;
            }
        };

        let command = JobCommand {
            program,
            source: config.source.clone(),
            replica: config.replica.clone(),
            log: config.log.clone(),
        };
        if let Err(err) = installer.install(&schedule, &command).await {
            error!("Cron job was not installed: {}", snafu::Report::from_error(err));
            error!("Sync will not run repeatedly");
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered during configuration stage"))]
    ConfigError { source: RuntimeConfigError },
    #[snafu(display("Failed to open the log file"))]
    LogFileError { source: std::io::Error },
    #[snafu(display("Critical failure encountered during synchronization"))]
    SyncError { source: SyncError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::data::LogLevel;
    use std::{fs, path::PathBuf};
    use tempfile::TempDir;

    fn config(source: PathBuf, replica: PathBuf, repeat: Option<&str>) -> RuntimeConfig {
        RuntimeConfig {
            source,
            replica,
            log: None,
            repeat: repeat.map(str::to_string),
            log_level: LogLevel::Info,
            ignored_profile_keys: Vec::new(),
        }
    }

    #[compio::test]
    async fn run_mirrors_source_into_new_replica() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("source");
        let replica = root.path().join("replica");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("a.txt"), "0123456789").unwrap();
        fs::write(source.join("sub/c.txt"), "nested").unwrap();

        let report = Application::run(config(source, replica.clone(), None))
            .await
            .unwrap();

        assert_eq!(report.copied, 2);
        assert_eq!(fs::read(replica.join("sub/c.txt")).unwrap(), b"nested");
    }

    #[compio::test]
    async fn run_fails_on_missing_source() {
        let root = TempDir::new().unwrap();
        let replica = root.path().join("replica");

        let result =
            Application::run(config(root.path().join("missing"), replica.clone(), None)).await;

        assert!(matches!(result, Err(ApplicationError::SyncError { .. })));
        assert!(!replica.exists());
    }

    #[compio::test]
    async fn invalid_schedule_does_not_block_sync() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("source");
        let replica = root.path().join("replica");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("a.txt"), "a").unwrap();

        let report = Application::run(config(source, replica.clone(), Some("not a cron")))
            .await
            .unwrap();

        assert_eq!(report.copied, 1);
        assert!(replica.join("a.txt").exists());
    }

    #[cfg(unix)]
    #[compio::test]
    async fn schedule_is_installed_with_absolute_paths() {
        let root = TempDir::new().unwrap();
        let script = root.path().join("crontab.sh");
        fs::write(&script, "[ \"$1\" = \"-l\" ] && exit 0\ncp \"$1\" \"$(dirname \"$0\")/table\"\n")
            .unwrap();
        let installer = CrontabInstaller::with_program("sh", [script]);
        let source = root.path().join("source");
        fs::create_dir(&source).unwrap();

        Application::install_schedule(
            "@hourly",
            &config(source.clone(), root.path().join("replica"), None),
            &installer,
        )
        .await;

        let table = fs::read_to_string(root.path().join("table")).unwrap();
        assert!(table.starts_with("@hourly "));
        assert!(table.contains(&format!("'{}'", source.canonicalize().unwrap().display())));
        assert!(table.trim_end().ends_with("# FOLD_SYNC_JOB"));
    }
}
