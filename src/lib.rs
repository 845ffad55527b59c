//! pulpit - offline-first sync and recovery engine for sermon recordings
//!
//! The application records sermons, sends them to external transcription
//! and summarization services, and keeps the resulting records available
//! across devices. This crate is the engine underneath: a local,
//! always-writable store reconciled with a remote backend under
//! intermittent connectivity, plus recovery of long-running jobs that can
//! fail, stall, or outlive an app restart.
//!
//! # Architecture
//!
//! Two decoupled cycles run over the same store:
//! - Sync moves *record content*: the coordinator pushes dirty records,
//!   pulls remote changes, and resolves conflicts last-writer-wins
//! - Recovery moves *job completion*: scans resubmit stuck or failed
//!   producer jobs, and completions are written back and broadcast
//!
//! # Modules
//!
//! - `domain`: Data structures (Sermon, jobs, events)
//! - `store`: Local store seam and the JSONL implementation
//! - `remote`: Remote backend seam and HTTP client
//! - `producers`: Transcription/summarization seams and HTTP clients
//! - `recovery`: Stuck-job detection and resubmission
//! - `sync`: Reconciliation passes and the background trigger policy
//! - `auth`: Credential provider seam
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create a record and sync it
//! pulpit new "Sunday Service" --audio ~/recordings/sunday.m4a
//! pulpit sync
//!
//! # Resubmit anything stuck or failed
//! pulpit recover
//!
//! # Run the background manager
//! pulpit run
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod domain;
pub mod producers;
pub mod recovery;
pub mod remote;
pub mod store;
pub mod sync;

// Re-export main types at crate root for convenience
pub use domain::{
    JobEvent, JobKind, JobStatus, OwnerId, Sermon, SummaryJob, SyncStatus, Transcript,
    TranscriptionJob,
};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use store::{JsonlStore, LocalStore, StoreError};
pub use sync::{BackgroundSync, SyncCoordinator, SyncOutcome, SyncReason, SyncReport};
