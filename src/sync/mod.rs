//! One-way reconciliation of a replica directory tree against a source tree.
//!
//! Files are compared by size first and by content identity only when the
//! sizes agree. Every pass is idempotent, so a pass interrupted or degraded by
//! per-entry failures converges on the next scheduled run.

mod content_identity;
mod sync_events;
mod sync_runner;
mod tree_differ;
mod tree_reconciler;

pub use sync_events::TracingEvents;
pub use sync_runner::{SyncError, SyncRunner};
pub use tree_reconciler::SyncReport;
