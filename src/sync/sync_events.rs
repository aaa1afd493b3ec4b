#[cfg(test)]
use std::cell::RefCell;
use std::path::PathBuf;

use tracing::{error, info};

use crate::ext::BestEffortPathExt;

/// A significant action taken (or refused) during a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Copy {
        name: String,
        size: u64,
        source_dir: PathBuf,
        destination_dir: PathBuf,
    },
    CreateDir {
        path: PathBuf,
    },
    Remove {
        path: PathBuf,
    },
    EntryFailed {
        path: PathBuf,
        reason: String,
    },
    ValidateError {
        path: PathBuf,
        reason: String,
    },
}

/// Sink receiving every [`SyncEvent`] emitted by the core.
///
/// The core never logs on its own; whoever constructs a runner decides where
/// the events end up.
pub trait SyncEvents {
    fn record(&self, event: SyncEvent);
}

impl<T: SyncEvents + ?Sized> SyncEvents for &T {
    fn record(&self, event: SyncEvent) {
        (**self).record(event)
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl SyncEvents for TracingEvents {
    fn record(&self, event: SyncEvent) {
        match event {
            SyncEvent::Copy {
                name,
                size,
                source_dir,
                destination_dir,
            } => info!(
                "Copied file {} of size: {} from {} directory to {} directory",
                name,
                size,
                source_dir.best_effort_path_display(),
                destination_dir.best_effort_path_display()
            ),
            SyncEvent::CreateDir { path } => {
                info!("Creating directory {}", path.best_effort_path_display())
            }
            SyncEvent::Remove { path } => info!(
                "Removing unwanted entry {} from destination directory",
                path.best_effort_path_display()
            ),
            SyncEvent::EntryFailed { path, reason } => error!(
                "Skipping {}: {}",
                path.best_effort_path_display(),
                reason
            ),
            SyncEvent::ValidateError { path, reason } => {
                error!("{}: {}", path.best_effort_path_display(), reason)
            }
        }
    }
}

/// Keeps every event in memory, in emission order.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordedEvents {
    events: RefCell<Vec<SyncEvent>>,
}

#[cfg(test)]
impl RecordedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.borrow().clone()
    }

    pub fn copies(&self) -> usize {
        self.count(|e| matches!(e, SyncEvent::Copy { .. }))
    }

    pub fn removals(&self) -> usize {
        self.count(|e| matches!(e, SyncEvent::Remove { .. }))
    }

    pub fn errors(&self) -> usize {
        self.count(|e| {
            matches!(
                e,
                SyncEvent::EntryFailed { .. } | SyncEvent::ValidateError { .. }
            )
        })
    }

    fn count(&self, predicate: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }
}

#[cfg(test)]
impl SyncEvents for RecordedEvents {
    fn record(&self, event: SyncEvent) {
        self.events.borrow_mut().push(event);
    }
}
