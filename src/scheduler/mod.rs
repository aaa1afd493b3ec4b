//! Periodic re-invocation through the host's cron daemon.

mod cron_schedule;
mod cron_table;
mod crontab_installer;

pub use cron_schedule::CronSchedule;
pub use cron_table::CronTable;
pub use crontab_installer::{CrontabInstaller, JobCommand};
