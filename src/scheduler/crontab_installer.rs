use std::{
    ffi::OsString,
    io::Write,
    path::{Path, PathBuf},
};

use compio::process::Command;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info};

use crate::ext::BestEffortPathExt;
use crate::scheduler::{CronSchedule, CronTable};

/// The command line a scheduled tick runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    pub program: PathBuf,
    pub source: PathBuf,
    pub replica: PathBuf,
    pub log: Option<PathBuf>,
}

impl JobCommand {
    /// Renders for `sh`, with every path absolute and single-quoted.
    pub fn render(&self) -> String {
        let mut parts = vec![
            shell_quote(&self.program.best_effort_absolute()),
            shell_quote(&self.source.best_effort_absolute()),
            shell_quote(&self.replica.best_effort_absolute()),
        ];
        if let Some(log) = &self.log {
            parts.push("-l".to_string());
            parts.push(shell_quote(&log.best_effort_absolute()));
        }
        parts.join(" ")
    }
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Installs jobs through the host's `crontab` binary.
#[derive(Debug, Clone)]
pub struct CrontabInstaller {
    program: OsString,
    leading_args: Vec<OsString>,
}

impl Default for CrontabInstaller {
    fn default() -> Self {
        Self::with_program("crontab", Vec::<OsString>::new())
    }
}

impl CrontabInstaller {
    pub fn with_program(
        program: impl Into<OsString>,
        leading_args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Replaces any previously installed job with `command` on `schedule`.
    pub async fn install(
        &self,
        schedule: &CronSchedule,
        command: &JobCommand,
    ) -> Result<(), InstallError> {
        ensure!(cfg!(unix), UnsupportedSnafu);

        let mut table = self.read_table().await?;
        let replaced = table.remove_owned_jobs();
        if replaced > 0 {
            debug!("Removing {} previously installed job(s)", replaced);
        }
        table.install(schedule, &command.render());
        self.write_table(&table).await?;

        info!("Installed cron job running at '{}'", schedule);
        Ok(())
    }

    pub async fn read_table(&self) -> Result<CronTable, InstallError> {
        let mut cmd = self.command();
        cmd.arg("-l");
        let output = cmd.output().await.context(SpawnSnafu {
            program: self.program_name(),
        })?;

        if output.status.success() {
            return Ok(CronTable::parse(&String::from_utf8_lossy(&output.stdout)));
        }

        // `crontab -l` exits non-zero when the user has no table yet.
        let stderr = String::from_utf8_lossy(&output.stderr);
        ensure!(
            stderr.to_ascii_lowercase().contains("no crontab"),
            UnsuccessfulSnafu {
                program: self.program_name(),
                status: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            }
        );
        debug!("No existing crontab, starting fresh");
        Ok(CronTable::default())
    }

    /// The staged copy is created exclusively, readable by the owner only,
    /// and deleted once `crontab` has loaded it.
    async fn write_table(&self, table: &CronTable) -> Result<(), InstallError> {
        let mut staged = tempfile::Builder::new()
            .prefix("foldsync-")
            .suffix(".cron")
            .tempfile()
            .context(StageSnafu {
                path: std::env::temp_dir(),
            })?;
        let path = staged.path().to_path_buf();
        staged
            .write_all(table.render().as_bytes())
            .and_then(|()| staged.flush())
            .context(StageSnafu { path: &path })?;

        self.load_file(&path).await
    }

    async fn load_file(&self, file: &Path) -> Result<(), InstallError> {
        let mut cmd = self.command();
        cmd.arg(file);
        let handle = cmd.spawn().context(SpawnSnafu {
            program: self.program_name(),
        })?;
        let status = handle.wait().await.context(SpawnSnafu {
            program: self.program_name(),
        })?;

        ensure!(
            status.success(),
            UnsuccessfulSnafu {
                program: self.program_name(),
                status: status.code().unwrap_or(-1),
                stderr: String::new(),
            }
        );
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

#[derive(Debug, Snafu)]
pub enum InstallError {
    #[snafu(display("Scheduling is only supported through crontab on Unix hosts"))]
    UnsupportedError,
    #[snafu(display("Failed to run '{}'", program))]
    SpawnError {
        program: String,
        source: std::io::Error,
    },
    #[snafu(display("'{}' exited with status {}: {}", program, status, stderr))]
    UnsuccessfulError {
        program: String,
        status: i32,
        stderr: String,
    },
    #[snafu(display("Failed to stage crontab at {}", path.best_effort_path_display()))]
    StageError {
        path: PathBuf,
        source: std::io::Error,
    },
}
