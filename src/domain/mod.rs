//! Domain types for the sync and recovery engine.
//!
//! This module contains the core data structures:
//! - Sermon: the synchronizable record with embedded sync/job state
//! - Jobs: lifecycle state machines for transcription and summary
//! - Events: completion notifications for collaborators

pub mod events;
pub mod jobs;
pub mod record;

// Re-export commonly used types
pub use events::JobEvent;
pub use jobs::{
    JobError, JobKind, JobStatus, SummaryJob, Transcript, TranscriptSegment, TranscriptionJob,
};
pub use record::{
    InvariantViolation, OwnerId, Sermon, SermonContent, SyncState, SyncStatus, Tombstone,
};
