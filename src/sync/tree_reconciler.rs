use std::{
    collections::HashSet,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use filetime::FileTime;
use snafu::{ResultExt, Snafu};

use crate::ext::BestEffortPathExt;
use crate::sync::content_identity::{IdentityError, IdentitySource, Sha1Identity};
use crate::sync::sync_events::{SyncEvent, SyncEvents};
use crate::sync::tree_differ::{Links, ListError, SyncDecision, TreeDiffer, list_dir};

const TEMP_SUFFIX: &str = "foldsync-tmp";

static TEMP_FILES: AtomicUsize = AtomicUsize::new(0);

/// Tally of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: usize,
    pub created_dirs: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failures: usize,
}

impl SyncReport {
    pub fn is_converged(&self) -> bool {
        self.failures == 0
    }

    pub fn actions(&self) -> usize {
        self.copied + self.created_dirs + self.removed
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} copied, {} directories created, {} removed, {} unchanged, {} failed",
            self.copied, self.created_dirs, self.removed, self.unchanged, self.failures
        )
    }
}

/// Applies [`SyncDecision`]s level by level until the destination mirrors the
/// source.
///
/// Traversal uses an explicit stack of pending directory pairs, so tree depth
/// does not grow the call stack.
pub struct TreeReconciler<E: SyncEvents, I: IdentitySource = Sha1Identity> {
    events: E,
    identity: I,
}

impl<E: SyncEvents> TreeReconciler<E, Sha1Identity> {
    pub fn new(events: E) -> Self {
        Self::with_identity(events, Sha1Identity)
    }
}

impl<E: SyncEvents, I: IdentitySource> TreeReconciler<E, I> {
    pub fn with_identity(events: E, identity: I) -> Self {
        Self { events, identity }
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Mirrors `source_dir` into `destination_dir`.
    ///
    /// Fails only when the top level itself cannot be processed. Problems
    /// below the top level abort that subtree alone, and per-entry problems
    /// skip that entry; both are reported through the event sink and counted
    /// in [`SyncReport::failures`].
    pub fn reconcile(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
    ) -> Result<SyncReport, ReconcileError> {
        let mut report = SyncReport::default();
        let mut pending = Vec::new();

        self.reconcile_level(source_dir, destination_dir, &mut report, &mut pending)?;

        while let Some((source, destination)) = pending.pop() {
            if let Err(err) =
                self.reconcile_level(&source, &destination, &mut report, &mut pending)
            {
                report.failures += 1;
                self.events.record(SyncEvent::EntryFailed {
                    path: source,
                    reason: snafu::Report::from_error(err).to_string(),
                });
            }
        }

        Ok(report)
    }

    fn reconcile_level(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
        report: &mut SyncReport,
        pending: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<(), ReconcileError> {
        if !destination_dir.exists() {
            fs::create_dir(destination_dir).context(CreateDestinationSnafu {
                path: destination_dir,
            })?;
            report.created_dirs += 1;
            self.events.record(SyncEvent::CreateDir {
                path: destination_dir.to_path_buf(),
            });
        }

        let source = list_dir(source_dir, Links::Follow).context(ListSourceSnafu)?;
        let destination = list_dir(destination_dir, Links::Keep).context(ListDestinationSnafu)?;

        let decision = TreeDiffer::new(&self.identity).diff(
            source_dir,
            &source,
            destination_dir,
            &destination,
        );
        report.unchanged += decision.unchanged.len();

        self.apply(source_dir, destination_dir, decision, report, pending);
        Ok(())
    }

    fn apply(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
        decision: SyncDecision,
        report: &mut SyncReport,
        pending: &mut Vec<(PathBuf, PathBuf)>,
    ) {
        for undecided in decision.undecided {
            self.fail(
                report,
                source_dir.join(&undecided.entry.name),
                EntryError::Identity {
                    source: undecided.error,
                },
            );
        }

        for entry in &decision.remove {
            self.remove_entry(&destination_dir.join(&entry.name), report);
        }

        let mut subdirectories = decision.descend;
        for entry in decision.copy_new.into_iter().chain(decision.copy_stale) {
            let destination = destination_dir.join(&entry.name);
            if entry.is_dir() {
                match fs::create_dir(&destination) {
                    Ok(()) => {
                        report.created_dirs += 1;
                        self.events.record(SyncEvent::CreateDir { path: destination });
                        subdirectories.push(entry);
                    }
                    Err(source) => self.fail(
                        report,
                        destination.clone(),
                        EntryError::CreateDir {
                            path: destination,
                            source,
                        },
                    ),
                }
                continue;
            }

            match copy_file(&source_dir.join(&entry.name), &destination) {
                Ok(()) => {
                    report.copied += 1;
                    self.events.record(SyncEvent::Copy {
                        name: entry.display_name(),
                        size: entry.len,
                        source_dir: source_dir.to_path_buf(),
                        destination_dir: destination_dir.to_path_buf(),
                    });
                }
                Err(err) => self.fail(report, source_dir.join(&entry.name), err),
            }
        }

        // Reverse so the stack pops subdirectories in name order.
        subdirectories.sort_by(|a, b| b.name.cmp(&a.name));
        pending.extend(subdirectories.into_iter().map(|entry| {
            (
                source_dir.join(&entry.name),
                destination_dir.join(&entry.name),
            )
        }));
    }

    /// Deletes `path`, contents first for directories. Symlinks are unlinked,
    /// never followed.
    ///
    /// A child that cannot be removed is reported and keeps its ancestors in
    /// place, while its siblings are still removed.
    fn remove_entry(&self, path: &Path, report: &mut SyncReport) {
        let is_dir = match fs::symlink_metadata(path).context(RemoveSnafu { path }) {
            Ok(metadata) => metadata.is_dir(),
            Err(err) => return self.fail(report, path.to_path_buf(), err),
        };
        if !is_dir {
            match fs::remove_file(path).context(RemoveSnafu { path }) {
                Ok(()) => self.removed(path.to_path_buf(), report),
                Err(err) => self.fail(report, path.to_path_buf(), err),
            }
            return;
        }

        let mut kept: HashSet<PathBuf> = HashSet::new();

        let mut stack = vec![(path.to_path_buf(), false)];
        while let Some((dir, emptied)) = stack.pop() {
            if emptied {
                if kept.contains(&dir) {
                    continue;
                }
                match fs::remove_dir(&dir).context(RemoveSnafu { path: &dir }) {
                    Ok(()) => self.removed(dir, report),
                    Err(err) => {
                        keep_ancestors(&mut kept, &dir, path);
                        self.fail(report, dir, err);
                    }
                }
                continue;
            }

            let children = fs::read_dir(&dir)
                .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
                .context(RemoveSnafu { path: &dir });
            let children = match children {
                Ok(children) => children,
                Err(err) => {
                    keep_ancestors(&mut kept, &dir, path);
                    self.fail(report, dir, err);
                    continue;
                }
            };

            stack.push((dir, true));
            for child in children {
                let child_path = child.path();
                let result = child
                    .file_type()
                    .context(RemoveSnafu { path: &child_path })
                    .and_then(|file_type| {
                        if file_type.is_dir() {
                            Ok(false)
                        } else {
                            fs::remove_file(&child_path)
                                .context(RemoveSnafu { path: &child_path })
                                .map(|()| true)
                        }
                    });
                match result {
                    Ok(true) => self.removed(child_path, report),
                    Ok(false) => stack.push((child_path, false)),
                    Err(err) => {
                        keep_ancestors(&mut kept, &child_path, path);
                        self.fail(report, child_path, err);
                    }
                }
            }
        }
    }

    fn removed(&self, path: PathBuf, report: &mut SyncReport) {
        report.removed += 1;
        self.events.record(SyncEvent::Remove { path });
    }

    fn fail(&self, report: &mut SyncReport, path: PathBuf, error: EntryError) {
        report.failures += 1;
        self.events.record(SyncEvent::EntryFailed {
            path,
            reason: snafu::Report::from_error(error).to_string(),
        });
    }
}

/// Marks `failed` and every directory above it, up to `root`, as staying.
fn keep_ancestors(kept: &mut HashSet<PathBuf>, failed: &Path, root: &Path) {
    for ancestor in failed.ancestors() {
        kept.insert(ancestor.to_path_buf());
        if ancestor == root {
            break;
        }
    }
}

/// Copies `source` over `destination` through a temporary sibling, carrying
/// permission bits and access/modification times along. The destination is
/// either left untouched or fully replaced.
pub fn copy_file(source: &Path, destination: &Path) -> Result<(), EntryError> {
    let temp_path = temp_path_for(destination);

    let result = copy_into_temp(source, &temp_path)
        .and_then(|()| fs::rename(&temp_path, destination).context(CopySnafu { path: destination }));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn copy_into_temp(source: &Path, temp_path: &Path) -> Result<(), EntryError> {
    // fs::copy carries the permission bits over.
    fs::copy(source, temp_path).context(CopySnafu { path: source })?;

    let metadata = fs::metadata(source).context(CopySnafu { path: source })?;
    filetime::set_file_times(
        temp_path,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    )
    .context(CopySnafu { path: temp_path })?;

    Ok(())
}

/// Fixed-length sibling name, so copies of names near the filesystem limit
/// still fit.
fn temp_path_for(destination: &Path) -> PathBuf {
    destination.with_file_name(format!(
        ".{}.{}.{}",
        std::process::id(),
        TEMP_FILES.fetch_add(1, Ordering::Relaxed),
        TEMP_SUFFIX
    ))
}

#[derive(Debug, Snafu)]
pub enum ReconcileError {
    #[snafu(display("Failed to create destination directory {}", path.best_effort_path_display()))]
    CreateDestinationError { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to list source directory"))]
    ListSourceError { source: ListError },
    #[snafu(display("Failed to list destination directory"))]
    ListDestinationError { source: ListError },
}

#[derive(Debug, Snafu)]
pub enum EntryError {
    #[snafu(display("Failed to compare contents"))]
    Identity { source: IdentityError },
    #[snafu(display("Failed to copy {}", path.best_effort_path_display()))]
    CopyError { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to remove {}", path.best_effort_path_display()))]
    RemoveError { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to create directory {}", path.best_effort_path_display()))]
    CreateDir { path: PathBuf, source: io::Error },
}
