use crate::scheduler::CronSchedule;

/// Trailing comment identifying the job this program owns.
pub const JOB_MARKER: &str = "FOLD_SYNC_JOB";

/// In-memory copy of a user's crontab.
///
/// Lines that do not belong to us are kept byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CronTable {
    lines: Vec<String>,
}

impl CronTable {
    pub fn parse(contents: &str) -> Self {
        Self {
            lines: contents.lines().map(str::to_string).collect(),
        }
    }

    /// Drops every previously installed job, returning how many were removed.
    pub fn remove_owned_jobs(&mut self) -> usize {
        let before = self.lines.len();
        self.lines.retain(|line| !is_owned_job(line));
        before - self.lines.len()
    }

    /// Replaces any owned job with one running `command` on `schedule`.
    pub fn install(&mut self, schedule: &CronSchedule, command: &str) {
        self.remove_owned_jobs();
        self.lines
            .push(format!("{} {} # {}", schedule, command, JOB_MARKER));
    }

    #[cfg(test)]
    pub fn owned_jobs(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|line| is_owned_job(line))
    }

    /// crontab requires the file to end with a newline.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn is_owned_job(line: &str) -> bool {
    line.trim_end()
        .rsplit_once('#')
        .is_some_and(|(_, comment)| comment.trim() == JOB_MARKER)
}
