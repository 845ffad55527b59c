//! Local↔remote reconciliation.
//!
//! - [`SyncCoordinator`] runs one pass: tombstones, push, pull, conflicts
//! - [`SyncReport`] records the per-record outcomes of a pass
//! - [`BackgroundSync`] decides when passes run and serializes them

pub mod background;
pub mod coordinator;
pub mod report;

pub use background::{BackgroundSync, SyncHandle, SyncReason};
pub use coordinator::{SyncCoordinator, SyncError};
pub use report::{SyncEntry, SyncOutcome, SyncReport};
