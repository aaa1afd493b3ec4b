use std::{
    fs, io,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

use crate::ext::BestEffortPathExt;
use crate::sync::content_identity::{IdentitySource, Sha1Identity};
use crate::sync::sync_events::{SyncEvent, SyncEvents};
use crate::sync::tree_reconciler::{ReconcileError, SyncReport, TreeReconciler};

/// Entry point for one scheduled tick: validate, then run a single pass.
pub struct SyncRunner<E: SyncEvents, I: IdentitySource = Sha1Identity> {
    reconciler: TreeReconciler<E, I>,
}

impl<E: SyncEvents> SyncRunner<E, Sha1Identity> {
    pub fn new(events: E) -> Self {
        Self {
            reconciler: TreeReconciler::new(events),
        }
    }
}

impl<E: SyncEvents, I: IdentitySource> SyncRunner<E, I> {
    /// Validates the pair, then performs one reconciliation pass.
    pub fn run(&self, source: &Path, destination: &Path) -> Result<SyncReport, SyncError> {
        self.validate(source, destination)?;
        self.reconcile(source, destination)
    }

    /// One reconciliation pass over a pair that already passed [`validate`].
    ///
    /// [`validate`]: Self::validate
    pub fn reconcile(&self, source: &Path, destination: &Path) -> Result<SyncReport, SyncError> {
        debug!(
            "Reconciling {} into {}",
            source.best_effort_path_display(),
            destination.best_effort_path_display()
        );
        self.reconciler
            .reconcile(source, destination)
            .context(ReconcileSnafu)
    }

    /// Nothing under `destination` is touched unless `source` passes
    /// validation. A missing `destination` is created, but never its parents.
    pub fn validate(&self, source: &Path, destination: &Path) -> Result<(), SyncError> {
        self.validate_source(source)
            .and_then(|()| self.validate_disjoint(source, destination))
            .and_then(|()| self.prepare_destination(destination))
            .inspect_err(|err| self.report_invalid(err))
    }

    fn validate_source(&self, source: &Path) -> Result<(), SyncError> {
        let metadata = fs::metadata(source).map_err(|err| SyncError::ValidationError {
            path: source.to_path_buf(),
            reason: match err.kind() {
                io::ErrorKind::NotFound => "the source directory doesn't exist".to_string(),
                _ => format!("the source directory is not accessible ({err})"),
            },
        })?;

        ensure!(
            metadata.is_dir(),
            ValidationSnafu {
                path: source,
                reason: "the source is not a directory",
            }
        );

        fs::read_dir(source).map_err(|err| SyncError::ValidationError {
            path: source.to_path_buf(),
            reason: format!("the source directory is not readable ({err})"),
        })?;

        Ok(())
    }

    /// Rejects pairs where one tree contains the other. Reconciling those
    /// would either copy the replica into itself or delete the source.
    fn validate_disjoint(&self, source: &Path, destination: &Path) -> Result<(), SyncError> {
        let source = source.canonicalize().map_err(|err| SyncError::ValidationError {
            path: source.to_path_buf(),
            reason: format!("the source directory cannot be resolved ({err})"),
        })?;
        let destination = canonical_destination(destination)?;

        ensure!(
            !destination.starts_with(&source) && !source.starts_with(&destination),
            ValidationSnafu {
                path: destination,
                reason: format!(
                    "the replica overlaps the source directory {}",
                    source.display()
                ),
            }
        );
        Ok(())
    }

    fn prepare_destination(&self, destination: &Path) -> Result<(), SyncError> {
        match fs::metadata(destination) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => NotADirectorySnafu { path: destination }.fail(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(destination).context(CreateReplicaSnafu { path: destination })?;
                self.reconciler.events().record(SyncEvent::CreateDir {
                    path: destination.to_path_buf(),
                });
                Ok(())
            }
            Err(err) => Err(err).context(CreateReplicaSnafu { path: destination }),
        }
    }

    fn report_invalid(&self, err: &SyncError) {
        let (path, reason) = match err {
            SyncError::ValidationError { path, reason } => (path.clone(), reason.clone()),
            SyncError::NotADirectoryError { path } => {
                (path.clone(), "the replica is not a directory".to_string())
            }
            SyncError::CreateReplicaError { path, source } => (
                path.clone(),
                format!("the replica directory cannot be created ({source})"),
            ),
            SyncError::ReconcileError { .. } => return,
        };
        self.reconciler
            .events()
            .record(SyncEvent::ValidateError { path, reason });
    }
}

/// Canonical form of a destination that may not exist yet: its parent must.
fn canonical_destination(destination: &Path) -> Result<PathBuf, SyncError> {
    if let Ok(canonical) = destination.canonicalize() {
        return Ok(canonical);
    }

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = destination.file_name().ok_or_else(|| SyncError::ValidationError {
        path: destination.to_path_buf(),
        reason: "the replica path has no final component".to_string(),
    })?;

    parent
        .canonicalize()
        .map(|parent| parent.join(name))
        .context(CreateReplicaSnafu { path: destination })
}

#[derive(Debug, Snafu)]
pub enum SyncError {
    #[snafu(display("Validation failed for {}: {}", path.best_effort_path_display(), reason))]
    ValidationError { path: PathBuf, reason: String },
    #[snafu(display("Replica {} exists but is not a directory", path.best_effort_path_display()))]
    NotADirectoryError { path: PathBuf },
    #[snafu(display("Failed to create replica directory {}", path.best_effort_path_display()))]
    CreateReplicaError { path: PathBuf, source: io::Error },
    #[snafu(display("Reconciliation aborted"))]
    ReconcileError { source: ReconcileError },
}
